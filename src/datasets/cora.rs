use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use polars::prelude::*;

use super::table::{read_table, ColumnDef, ColumnRole, Delimiter, TableSchema};
use super::utils::{download_and_extract, ArchiveFormat};
use crate::graph::{GraphBuilder, TypedGraph};

const CORA_URL: &str = "https://linqs-data.soe.ucsc.edu/public/lbc/cora.tgz";
const NUM_FEATURES: usize = 1433;

/// CORA citation dataset: 2708 papers with bag-of-words features and a
/// subject label, plus a citation edge list.
///
/// `cora.content` rows are `<id> <w0> ... <w1432> <label>`, `cora.cites` rows
/// are `<cited> <citing>`; both tab-separated.
#[derive(Clone, Debug)]
pub struct CoraDataset {
    pub num_features: usize,
    pub num_classes: usize,
    node_df: DataFrame,
    edge_df: DataFrame,
    feature_cols: Vec<String>,
    label_names: Vec<String>,
}

impl CoraDataset {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        if !root.exists() {
            Self::download(root)?;
        }
        Self::load(root)
    }

    pub fn download<P: AsRef<Path>>(root: P) -> Result<()> {
        download_and_extract(CORA_URL, root.as_ref().join("raw"), ArchiveFormat::TarGz)
    }

    pub fn load<P: AsRef<Path>>(root: P) -> Result<Self> {
        let raw = root.as_ref().join("raw").join("cora");
        Self::from_files(
            raw.join("cora.content"),
            raw.join("cora.cites"),
            NUM_FEATURES,
        )
    }

    pub fn from_files<P: AsRef<Path>>(
        content: P,
        cites: P,
        num_features: usize,
    ) -> Result<Self> {
        let mut columns = vec![ColumnDef::new("id", ColumnRole::Id)];
        let mut feature_cols = Vec::with_capacity(num_features);
        for i in 0..num_features {
            let name = format!("w{}", i);
            columns.push(ColumnDef::new(&name, ColumnRole::NumericFeature));
            feature_cols.push(name);
        }
        columns.push(ColumnDef::new("label", ColumnRole::Label));
        let content_schema = TableSchema::new(Delimiter::Tab, columns);
        let mut node_df = read_table(content, &content_schema)?;

        let cites_schema = TableSchema::new(
            Delimiter::Tab,
            vec![
                ColumnDef::new("source", ColumnRole::Source),
                ColumnDef::new("target", ColumnRole::Target),
            ],
        );
        let edge_df = read_table(cites, &cites_schema)?;

        // stable label codes: sorted label vocabulary
        let mut label_names: Vec<String> = node_df
            .column("label")?
            .utf8()?
            .into_no_null_iter()
            .map(|s| s.to_owned())
            .collect();
        label_names.sort();
        label_names.dedup();
        let code: HashMap<&str, u32> = label_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i as u32))
            .collect();
        let label_u32: Vec<u32> = node_df
            .column("label")?
            .utf8()?
            .into_no_null_iter()
            .map(|s| code[s])
            .collect();
        node_df.with_column(Series::new("label_u32", label_u32))?;

        Ok(Self {
            num_features,
            num_classes: label_names.len(),
            node_df,
            edge_df,
            feature_cols,
            label_names,
        })
    }

    pub fn node_df(&self) -> &DataFrame {
        &self.node_df
    }
    pub fn edge_df(&self) -> &DataFrame {
        &self.edge_df
    }
    pub fn feature_cols(&self) -> &[String] {
        &self.feature_cols
    }
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Label code of every paper, in node-table order (which is also the
    /// node order of [`Self::to_graph`]).
    pub fn labels(&self) -> Result<Vec<u32>> {
        Ok(self
            .node_df
            .column("label_u32")?
            .u32()?
            .into_no_null_iter()
            .collect())
    }

    /// Assemble the undirected citation graph. Every citation endpoint must
    /// appear in the content table.
    pub fn to_graph(&self) -> Result<TypedGraph> {
        let mut builder = GraphBuilder::new();
        builder.add_nodes(&self.node_df, "paper", "id", &self.feature_cols)?;
        builder.add_edges(&self.edge_df, "source", "target", None)?;
        Ok(builder.build())
    }
}
