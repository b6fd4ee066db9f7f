use anyhow::{bail, Result};
use polars::prelude::*;

/// Zero-mean / unit-variance rescaling of one numeric column.
///
/// Statistics are computed over the complete column at fit time (population
/// standard deviation). Fitting once on the full dataset and reusing the
/// parameters everywhere is what keeps train and test features on the same
/// scale.
#[derive(Clone, Debug)]
pub struct StandardScaler {
    pub mean: f64,
    pub std: f64,
}

impl StandardScaler {
    pub fn fit(column: &Series) -> Result<Self> {
        let values = column.f32()?;
        if values.is_empty() {
            bail!("cannot fit scaler on empty column {:?}", column.name());
        }
        let n = values.len() as f64;
        let mean = values.into_no_null_iter().map(|x| x as f64).sum::<f64>() / n;
        let var = values
            .into_no_null_iter()
            .map(|x| (x as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        // constant columns map to zero rather than dividing by zero
        let std = if var > 0.0 { var.sqrt() } else { 1.0 };
        Ok(Self { mean, std })
    }

    pub fn transform(&self, column: &Series) -> Result<Series> {
        let values: Vec<f32> = column
            .f32()?
            .into_no_null_iter()
            .map(|x| ((x as f64 - self.mean) / self.std) as f32)
            .collect();
        Ok(Series::new(column.name(), values))
    }
}

/// One-hot expansion of one categorical column using the vocabulary observed
/// over the complete dataset at fit time.
#[derive(Clone, Debug)]
pub struct OneHotEncoder {
    pub column: String,
    pub vocab: Vec<String>,
}

impl OneHotEncoder {
    pub fn fit(column: &Series) -> Result<Self> {
        let mut vocab: Vec<String> = column
            .utf8()?
            .into_no_null_iter()
            .map(|s| s.to_owned())
            .collect();
        vocab.sort();
        vocab.dedup();
        Ok(Self {
            column: column.name().to_owned(),
            vocab,
        })
    }

    pub fn output_columns(&self) -> Vec<String> {
        self.vocab
            .iter()
            .map(|v| format!("{}={}", self.column, v))
            .collect()
    }

    /// One indicator column per vocabulary entry; exactly one 1.0 per row.
    /// A value outside the fitted vocabulary is a format error.
    pub fn transform(&self, column: &Series) -> Result<Vec<Series>> {
        let values = column.utf8()?;
        let mut indicators = vec![vec![0.0f32; values.len()]; self.vocab.len()];
        for (row, value) in values.into_no_null_iter().enumerate() {
            match self.vocab.iter().position(|v| v == value) {
                Some(i) => indicators[i][row] = 1.0,
                None => bail!(
                    "column {:?}: category {:?} not in fitted vocabulary",
                    self.column,
                    value
                ),
            }
        }
        Ok(self
            .output_columns()
            .into_iter()
            .zip(indicators)
            .map(|(name, column)| Series::new(&name, column))
            .collect())
    }
}

/// Fit-once feature pipeline: scales numeric columns, one-hot expands
/// categorical columns, passes already-numeric columns (e.g. genre flags)
/// through untouched, and concatenates everything into one fixed-width f32
/// block with stable column order.
pub struct FeatureEncoder {
    scalers: Vec<StandardScaler>,
    numeric: Vec<String>,
    encoders: Vec<OneHotEncoder>,
    passthrough: Vec<String>,
}

impl FeatureEncoder {
    pub fn fit(
        df: &DataFrame,
        numeric: &[&str],
        categorical: &[&str],
        passthrough: &[&str],
    ) -> Result<Self> {
        let mut scalers = Vec::new();
        for col in numeric {
            scalers.push(StandardScaler::fit(df.column(col)?)?);
        }
        let mut encoders = Vec::new();
        for col in categorical {
            encoders.push(OneHotEncoder::fit(df.column(col)?)?);
        }
        Ok(Self {
            scalers,
            numeric: numeric.iter().map(|s| (*s).to_owned()).collect(),
            encoders,
            passthrough: passthrough.iter().map(|s| (*s).to_owned()).collect(),
        })
    }

    pub fn feature_columns(&self) -> Vec<String> {
        let mut columns = self.numeric.clone();
        for encoder in &self.encoders {
            columns.extend(encoder.output_columns());
        }
        columns.extend(self.passthrough.clone());
        columns
    }

    /// Returns a DataFrame holding only the encoded feature columns, in the
    /// order reported by [`Self::feature_columns`].
    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        let mut series = Vec::new();
        for (col, scaler) in self.numeric.iter().zip(&self.scalers) {
            series.push(scaler.transform(df.column(col)?)?);
        }
        for encoder in &self.encoders {
            series.extend(encoder.transform(df.column(&encoder.column)?)?);
        }
        for col in &self.passthrough {
            series.push(df.column(col)?.f32()?.clone().into_series());
        }
        Ok(DataFrame::new(series)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescaled_ages_have_population_unit_variance() {
        let ages = Series::new("age", vec![20.0f32, 30.0, 40.0]);
        let scaler = StandardScaler::fit(&ages).unwrap();
        let scaled = scaler.transform(&ages).unwrap();
        let scaled: Vec<f32> = scaled.f32().unwrap().into_no_null_iter().collect();
        let expected = [-1.2247449, 0.0, 1.2247449];
        for (got, want) in scaled.iter().zip(expected) {
            assert!((got - want).abs() < 1e-5, "{got} vs {want}");
        }
    }

    #[test]
    fn constant_column_maps_to_zero() {
        let col = Series::new("x", vec![7.0f32, 7.0]);
        let scaler = StandardScaler::fit(&col).unwrap();
        let scaled = scaler.transform(&col).unwrap();
        assert_eq!(
            scaled.f32().unwrap().into_no_null_iter().collect::<Vec<_>>(),
            vec![0.0, 0.0]
        );
    }

    #[test]
    fn one_hot_has_exactly_one_hot_per_row() {
        let col = Series::new("occupation", vec!["doctor", "artist", "doctor", "none"]);
        let encoder = OneHotEncoder::fit(&col).unwrap();
        let expanded = encoder.transform(&col).unwrap();
        assert_eq!(expanded.len(), 3); // artist, doctor, none
        for row in 0..4 {
            let hot: f32 = expanded
                .iter()
                .map(|s| s.f32().unwrap().get(row).unwrap())
                .sum();
            assert_eq!(hot, 1.0);
        }
    }

    #[test]
    fn vocabulary_is_fixed_at_fit_time() {
        let full = Series::new("gender", vec!["M", "F", "M"]);
        let encoder = OneHotEncoder::fit(&full).unwrap();
        // a later slice with only one observed category still expands to the
        // full fitted width
        let subset = Series::new("gender", vec!["M"]);
        let expanded = encoder.transform(&subset).unwrap();
        assert_eq!(expanded.len(), 2);

        let unseen = Series::new("gender", vec!["X"]);
        assert!(encoder.transform(&unseen).is_err());
    }

    #[test]
    fn encoder_concatenates_blocks_in_stable_order() {
        let df = df! {
            "age" => vec![20.0f32, 30.0, 40.0],
            "gender" => vec!["M", "F", "M"],
            "action" => vec![1.0f32, 0.0, 1.0],
        }
        .unwrap();
        let encoder = FeatureEncoder::fit(&df, &["age"], &["gender"], &["action"]).unwrap();
        assert_eq!(
            encoder.feature_columns(),
            vec!["age", "gender=F", "gender=M", "action"]
        );
        let features = encoder.transform(&df).unwrap();
        assert_eq!(features.shape(), (3, 4));
        assert_eq!(
            features.column("gender=M").unwrap().f32().unwrap().get(1),
            Some(0.0)
        );
    }
}
