use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use polars::prelude::*;
use serde::Deserialize;

use crate::error::SageError;

/// Role a column plays in a delimited data file.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    /// Node identifier; must be unique within the file.
    Id,
    /// Source endpoint of an edge row; repeats are expected.
    Source,
    /// Target endpoint of an edge row; repeats are expected.
    Target,
    /// Numeric feature, parsed as f32.
    NumericFeature,
    /// Categorical feature, kept as string for one-hot expansion.
    CategoricalFeature,
    /// Class label, kept as string.
    Label,
    /// Free text (e.g. movie title), kept as string.
    Text,
    /// Edge weight / rating, parsed as f32.
    Rating,
    /// Unix timestamp, parsed as i64.
    Timestamp,
    /// Present in the file but not loaded.
    Ignore,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delimiter {
    Tab,
    Pipe,
    Comma,
    Whitespace,
}

impl Delimiter {
    fn split(self, line: &str) -> Vec<&str> {
        match self {
            Self::Tab => line.split('\t').collect(),
            Self::Pipe => line.split('|').collect(),
            Self::Comma => line.split(',').collect(),
            Self::Whitespace => line.split_whitespace().collect(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub role: ColumnRole,
}

impl ColumnDef {
    pub fn new<S: Into<String>>(name: S, role: ColumnRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

/// Column-role description of one delimited file. Deserializable so the
/// MovieLens JSON configuration maps directly onto it.
#[derive(Clone, Debug, Deserialize)]
pub struct TableSchema {
    pub delimiter: Delimiter,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(delimiter: Delimiter, columns: Vec<ColumnDef>) -> Self {
        Self { delimiter, columns }
    }

    pub fn id_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.role == ColumnRole::Id)
            .map(|c| c.name.as_str())
    }

    pub fn columns_with_role(&self, role: ColumnRole) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.role == role)
            .map(|c| c.name.clone())
            .collect()
    }
}

enum ColumnData {
    Utf8(Vec<String>),
    F32(Vec<f32>),
    I64(Vec<i64>),
    Skip,
}

impl ColumnData {
    fn for_role(role: ColumnRole) -> Self {
        match role {
            ColumnRole::Id
            | ColumnRole::Source
            | ColumnRole::Target
            | ColumnRole::CategoricalFeature
            | ColumnRole::Label
            | ColumnRole::Text => Self::Utf8(Vec::new()),
            ColumnRole::NumericFeature | ColumnRole::Rating => Self::F32(Vec::new()),
            ColumnRole::Timestamp => Self::I64(Vec::new()),
            ColumnRole::Ignore => Self::Skip,
        }
    }
}

/// One-shot parse of a delimited file into a DataFrame, one column per
/// non-ignored field. Any malformed row aborts the parse.
pub fn read_table<P: AsRef<Path>>(path: P, schema: &TableSchema) -> Result<DataFrame> {
    let path = path.as_ref();
    // MovieLens ships latin-1 files; decode lossily instead of assuming UTF-8.
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);

    let mut data: Vec<ColumnData> = schema
        .columns
        .iter()
        .map(|c| ColumnData::for_role(c.role))
        .collect();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for (lineno, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let fields = schema.delimiter.split(line);
        if fields.len() != schema.columns.len() {
            return Err(SageError::format(
                path,
                format!(
                    "line {}: expected {} fields, found {}",
                    lineno + 1,
                    schema.columns.len(),
                    fields.len()
                ),
            )
            .into());
        }
        for ((def, field), column) in schema.columns.iter().zip(&fields).zip(&mut data) {
            match column {
                ColumnData::Utf8(values) => {
                    if def.role == ColumnRole::Id && !seen_ids.insert((*field).to_owned()) {
                        return Err(SageError::format(
                            path,
                            format!("line {}: duplicate id {:?}", lineno + 1, field),
                        )
                        .into());
                    }
                    values.push((*field).to_owned());
                }
                ColumnData::F32(values) => {
                    let value: f32 = field.trim().parse().map_err(|_| {
                        SageError::format(
                            path,
                            format!(
                                "line {}: column {:?}: not a number: {:?}",
                                lineno + 1,
                                def.name,
                                field
                            ),
                        )
                    })?;
                    values.push(value);
                }
                ColumnData::I64(values) => {
                    let value: i64 = field.trim().parse().map_err(|_| {
                        SageError::format(
                            path,
                            format!(
                                "line {}: column {:?}: not a timestamp: {:?}",
                                lineno + 1,
                                def.name,
                                field
                            ),
                        )
                    })?;
                    values.push(value);
                }
                ColumnData::Skip => {}
            }
        }
    }

    let mut series = Vec::new();
    for (def, column) in schema.columns.iter().zip(data) {
        match column {
            ColumnData::Utf8(values) => series.push(Series::new(&def.name, values)),
            ColumnData::F32(values) => series.push(Series::new(&def.name, values)),
            ColumnData::I64(values) => series.push(Series::new(&def.name, values)),
            ColumnData::Skip => {}
        }
    }
    Ok(DataFrame::new(series)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn user_schema() -> TableSchema {
        TableSchema::new(
            Delimiter::Pipe,
            vec![
                ColumnDef::new("user_id", ColumnRole::Id),
                ColumnDef::new("age", ColumnRole::NumericFeature),
                ColumnDef::new("gender", ColumnRole::CategoricalFeature),
                ColumnDef::new("zip", ColumnRole::Ignore),
            ],
        )
    }

    #[test]
    fn parses_delimited_rows() {
        let file = write_file("1|24|M|85711\n2|53|F|94043\n");
        let df = read_table(file.path(), &user_schema()).unwrap();
        assert_eq!(df.shape(), (2, 3));
        assert_eq!(
            df.column("age").unwrap().f32().unwrap().get(1),
            Some(53.0)
        );
        assert_eq!(
            df.column("gender").unwrap().utf8().unwrap().get(0),
            Some("M")
        );
        assert!(df.column("zip").is_err());
    }

    #[test]
    fn ragged_row_is_format_error() {
        let file = write_file("1|24|M|85711\n2|53|F\n");
        let err = read_table(file.path(), &user_schema()).unwrap_err();
        let err = err.downcast::<SageError>().unwrap();
        assert!(matches!(err, SageError::Format { .. }));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn duplicate_id_is_format_error() {
        let file = write_file("1|24|M|85711\n1|53|F|94043\n");
        let err = read_table(file.path(), &user_schema()).unwrap_err();
        assert!(err.to_string().contains("duplicate id"));
    }

    #[test]
    fn unparsable_number_is_format_error() {
        let file = write_file("1|old|M|85711\n");
        let err = read_table(file.path(), &user_schema()).unwrap_err();
        assert!(err.to_string().contains("not a number"));
    }

    #[test]
    fn schema_deserializes_from_json() {
        let json = r#"{
            "delimiter": "tab",
            "columns": [
                {"name": "user_id", "role": "id"},
                {"name": "rating", "role": "rating"}
            ]
        }"#;
        let schema: TableSchema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.delimiter, Delimiter::Tab);
        assert_eq!(schema.id_column(), Some("user_id"));
    }
}
