use std::ops::BitAnd;
use std::path::Path;

use anyhow::{bail, Context, Result};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::Deserialize;

use super::preprocess::{FeatureEncoder, StandardScaler};
use super::table::{read_table, ColumnDef, ColumnRole, Delimiter, TableSchema};
use super::traits::RandomSplit;
use super::utils::download_zip_entries;
use crate::graph::{GraphBuilder, TypedGraph};

const ML_100K_URL: &str = "https://files.grouplens.org/datasets/movielens/ml-100k.zip";

const GENRES: [&str; 19] = [
    "unknown",
    "Action",
    "Adventure",
    "Animation",
    "Childrens",
    "Comedy",
    "Crime",
    "Documentary",
    "Drama",
    "Fantasy",
    "Film-Noir",
    "Horror",
    "Musical",
    "Mystery",
    "Romance",
    "Sci-Fi",
    "Thriller",
    "War",
    "Western",
];

#[derive(Clone, Debug, Deserialize)]
pub struct FileTable {
    pub path: String,
    pub schema: TableSchema,
}

/// Column-role configuration for the three MovieLens files. The defaults
/// describe the ml-100k layout; a JSON file with the same shape can override
/// them for other releases.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MovieLensConfig {
    pub url: String,
    pub user_prefix: String,
    pub movie_prefix: String,
    pub ratings: FileTable,
    pub users: FileTable,
    pub items: FileTable,
}

impl Default for MovieLensConfig {
    fn default() -> Self {
        let ratings = FileTable {
            path: "u.data".to_owned(),
            schema: TableSchema::new(
                Delimiter::Tab,
                vec![
                    ColumnDef::new("user_id", ColumnRole::Source),
                    ColumnDef::new("movie_id", ColumnRole::Target),
                    ColumnDef::new("rating", ColumnRole::Rating),
                    ColumnDef::new("timestamp", ColumnRole::Timestamp),
                ],
            ),
        };
        let users = FileTable {
            path: "u.user".to_owned(),
            schema: TableSchema::new(
                Delimiter::Pipe,
                vec![
                    ColumnDef::new("user_id", ColumnRole::Id),
                    ColumnDef::new("age", ColumnRole::NumericFeature),
                    ColumnDef::new("gender", ColumnRole::CategoricalFeature),
                    ColumnDef::new("occupation", ColumnRole::CategoricalFeature),
                    ColumnDef::new("zip", ColumnRole::Ignore),
                ],
            ),
        };
        let mut item_columns = vec![
            ColumnDef::new("movie_id", ColumnRole::Id),
            ColumnDef::new("title", ColumnRole::Text),
            ColumnDef::new("release_date", ColumnRole::Ignore),
            ColumnDef::new("video_release_date", ColumnRole::Ignore),
            ColumnDef::new("imdb_url", ColumnRole::Ignore),
        ];
        for genre in GENRES {
            item_columns.push(ColumnDef::new(genre, ColumnRole::NumericFeature));
        }
        let items = FileTable {
            path: "u.item".to_owned(),
            schema: TableSchema::new(Delimiter::Pipe, item_columns),
        };
        Self {
            url: ML_100K_URL.to_owned(),
            user_prefix: "u_".to_owned(),
            movie_prefix: "m_".to_owned(),
            ratings,
            users,
            items,
        }
    }
}

impl MovieLensConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config {:?}", path.as_ref()))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// MovieLens 100k: 943 users, 1682 movies, 100000 ratings. Users carry a
/// scaled age plus one-hot gender/occupation; movies carry their genre flags
/// plus a scaled release year extracted from the title.
///
/// User and movie ids overlap numerically, so graph keys are prefixed
/// (`u_1` / `m_1`) to keep the two id spaces disjoint.
pub struct MovieLensDataset {
    user_prefix: String,
    movie_prefix: String,
    ratings_df: DataFrame,
    user_df: DataFrame,
    movie_df: DataFrame,
    user_feature_cols: Vec<String>,
    movie_feature_cols: Vec<String>,
}

impl MovieLensDataset {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let config = MovieLensConfig::default();
        let root = root.as_ref();
        if !root.exists() {
            Self::download(root, &config)?;
        }
        Self::load(root, &config)
    }

    pub fn download<P: AsRef<Path>>(root: P, config: &MovieLensConfig) -> Result<()> {
        let entries: Vec<String> = [&config.ratings, &config.users, &config.items]
            .iter()
            .map(|f| format!("ml-100k/{}", f.path))
            .collect();
        let entries: Vec<&str> = entries.iter().map(|s| s.as_str()).collect();
        download_zip_entries(&config.url, root.as_ref().join("raw"), &entries)
    }

    pub fn load<P: AsRef<Path>>(root: P, config: &MovieLensConfig) -> Result<Self> {
        let raw = root.as_ref().join("raw");

        // users: scaled numerics + one-hot categoricals, fitted on the full
        // table before any split
        let users_raw = read_table(raw.join(&config.users.path), &config.users.schema)?;
        let user_id_col = config
            .users
            .schema
            .id_column()
            .context("users schema has no id column")?;
        let numeric = config
            .users
            .schema
            .columns_with_role(ColumnRole::NumericFeature);
        let numeric: Vec<&str> = numeric.iter().map(|s| s.as_str()).collect();
        let categorical = config
            .users
            .schema
            .columns_with_role(ColumnRole::CategoricalFeature);
        let categorical: Vec<&str> = categorical.iter().map(|s| s.as_str()).collect();
        let encoder = FeatureEncoder::fit(&users_raw, &numeric, &categorical, &[])?;
        let user_df = with_prefixed_ids(
            &users_raw,
            user_id_col,
            &config.user_prefix,
            encoder.transform(&users_raw)?,
        )?;
        let user_feature_cols = encoder.feature_columns();

        // movies: genre flags pass through, release year is pulled from the
        // title and scaled
        let items_raw = read_table(raw.join(&config.items.path), &config.items.schema)?;
        let movie_id_col = config
            .items
            .schema
            .id_column()
            .context("items schema has no id column")?;
        let genre_cols = config
            .items
            .schema
            .columns_with_role(ColumnRole::NumericFeature);
        let title_col = config
            .items
            .schema
            .columns_with_role(ColumnRole::Text)
            .into_iter()
            .next()
            .context("items schema has no title column")?;
        let year = release_year(items_raw.column(&title_col)?)?;
        let year = StandardScaler::fit(&year)?.transform(&year)?;
        let mut movie_features = DataFrame::new(vec![year])?;
        for col in &genre_cols {
            movie_features.with_column(items_raw.column(col)?.f32()?.clone().into_series())?;
        }
        let mut movie_feature_cols = vec!["year".to_owned()];
        movie_feature_cols.extend(genre_cols);
        let movie_df = with_prefixed_ids(
            &items_raw,
            movie_id_col,
            &config.movie_prefix,
            movie_features,
        )?;

        // ratings become the weighted bipartite edge table
        let ratings_raw = read_table(raw.join(&config.ratings.path), &config.ratings.schema)?;
        let source_col = config
            .ratings
            .schema
            .columns_with_role(ColumnRole::Source)
            .into_iter()
            .next()
            .context("ratings schema has no source column")?;
        let target_col = config
            .ratings
            .schema
            .columns_with_role(ColumnRole::Target)
            .into_iter()
            .next()
            .context("ratings schema has no target column")?;
        let rating_col = config
            .ratings
            .schema
            .columns_with_role(ColumnRole::Rating)
            .into_iter()
            .next()
            .context("ratings schema has no rating column")?;
        let ratings_df = df! {
            "source" => prefixed(ratings_raw.column(&source_col)?, &config.user_prefix)?,
            "target" => prefixed(ratings_raw.column(&target_col)?, &config.movie_prefix)?,
            "rating" => ratings_raw.column(&rating_col)?.f32()?.clone().into_series(),
        }?;

        Ok(Self {
            user_prefix: config.user_prefix.clone(),
            movie_prefix: config.movie_prefix.clone(),
            ratings_df,
            user_df,
            movie_df,
            user_feature_cols,
            movie_feature_cols,
        })
    }

    pub fn ratings_df(&self) -> &DataFrame {
        &self.ratings_df
    }
    pub fn user_df(&self) -> &DataFrame {
        &self.user_df
    }
    pub fn movie_df(&self) -> &DataFrame {
        &self.movie_df
    }
    pub fn user_prefix(&self) -> &str {
        &self.user_prefix
    }
    pub fn movie_prefix(&self) -> &str {
        &self.movie_prefix
    }

    /// Assemble the bipartite user/movie graph with ratings as edge weights.
    pub fn to_graph(&self) -> Result<TypedGraph> {
        let mut builder = GraphBuilder::new();
        builder.add_nodes(&self.user_df, "user", "id", &self.user_feature_cols)?;
        builder.add_nodes(&self.movie_df, "movie", "id", &self.movie_feature_cols)?;
        builder.add_edges(&self.ratings_df, "source", "target", Some("rating"))?;
        Ok(builder.build())
    }
}

/// Ratio split over rating rows; a single seeded uniform score per row
/// decides its partition, so one seed reproduces the whole split.
impl<const N: usize> RandomSplit<[f32; N]> for MovieLensDataset {
    type Output = [DataFrame; N];
    fn random_split(&self, ratio: [f32; N], seed: u64) -> Result<[DataFrame; N]> {
        let mut rng = StdRng::seed_from_u64(seed);
        let score: Vec<f32> = (0..self.ratings_df.height())
            .map(|_| rng.gen::<f32>())
            .collect();
        let score = Float32Chunked::from_vec("rand", score);

        let mut cumsum = 0.0;
        let mut result = Vec::new();
        for f in ratio {
            let mask = score.gt_eq(cumsum).bitand(score.lt(cumsum + f));
            cumsum += f;
            result.push(self.ratings_df.filter(&mask)?);
        }
        match result.try_into() {
            Ok(result) => Ok(result),
            Err(_) => bail!("ratio arity mismatch"),
        }
    }
}

fn prefixed(ids: &Series, prefix: &str) -> Result<Series> {
    let ids = ids.cast(&DataType::Utf8)?;
    let values: Vec<String> = ids
        .utf8()?
        .into_no_null_iter()
        .map(|id| format!("{}{}", prefix, id))
        .collect();
    Ok(Series::new(ids.name(), values))
}

fn with_prefixed_ids(
    raw: &DataFrame,
    id_col: &str,
    prefix: &str,
    features: DataFrame,
) -> Result<DataFrame> {
    let mut id = prefixed(raw.column(id_col)?, prefix)?;
    id.rename("id");
    let mut columns = vec![id];
    columns.extend(features.get_columns().iter().cloned());
    Ok(DataFrame::new(columns)?)
}

/// Release year from titles like `Toy Story (1995)`. Titles without a year
/// are imputed with the mean observed year.
fn release_year(titles: &Series) -> Result<Series> {
    let pattern = Regex::new(r"\((\d{4})\)\s*$")?;
    let years: Vec<Option<f32>> = titles
        .utf8()?
        .into_no_null_iter()
        .map(|title| {
            pattern
                .captures(title)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f32>().ok())
        })
        .collect();
    let observed: Vec<f32> = years.iter().filter_map(|y| *y).collect();
    let fill = if observed.is_empty() {
        0.0
    } else {
        observed.iter().sum::<f32>() / observed.len() as f32
    };
    let years: Vec<f32> = years.into_iter().map(|y| y.unwrap_or(fill)).collect();
    Ok(Series::new("year", years))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_raw(dir: &Path) {
        let raw = dir.join("raw");
        std::fs::create_dir_all(&raw).unwrap();
        let mut f = std::fs::File::create(raw.join("u.user")).unwrap();
        f.write_all(b"1|24|M|technician|85711\n2|53|F|other|94043\n3|33|M|other|32067\n")
            .unwrap();
        let genres = |flags: &str| flags.split(' ').collect::<Vec<_>>().join("|");
        let mut f = std::fs::File::create(raw.join("u.item")).unwrap();
        writeln!(
            f,
            "1|Toy Story (1995)|01-Jan-1995||http://x|{}",
            genres("0 0 0 1 1 1 0 0 0 0 0 0 0 0 0 0 0 0 0")
        )
        .unwrap();
        writeln!(
            f,
            "2|Heat (1995)|01-Jan-1995||http://x|{}",
            genres("0 1 0 0 0 0 1 0 0 0 0 0 0 0 0 0 1 0 0")
        )
        .unwrap();
        let mut f = std::fs::File::create(raw.join("u.data")).unwrap();
        f.write_all(b"1\t1\t5\t874965758\n1\t2\t3\t876893171\n2\t1\t4\t878542960\n3\t2\t1\t876893119\n")
            .unwrap();
    }

    fn load_toy() -> MovieLensDataset {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path());
        MovieLensDataset::load(dir.path(), &MovieLensConfig::default()).unwrap()
    }

    #[test]
    fn builds_bipartite_graph() {
        let dataset = load_toy();
        let graph = dataset.to_graph().unwrap();
        assert_eq!(graph.num_nodes(), 5);
        assert_eq!(graph.num_edges(), 4);
        // age + gender(M,F) + occupation(technician,other)
        assert_eq!(graph.feature_width("user"), Some(5));
        // year + 19 genre flags
        assert_eq!(graph.feature_width("movie"), Some(20));

        let u1 = graph.node_index("u_1").unwrap();
        let m2 = graph.node_index("m_2").unwrap();
        assert_eq!(graph.edge_weight(u1, m2), Some(3.0));
        for &v in graph.neighbors(u1) {
            assert_eq!(graph.node_type(v), "movie");
        }
    }

    #[test]
    fn ratings_split_partitions_rows() {
        let dataset = load_toy();
        let [train, test] = dataset.random_split([0.5, 0.5], 7).unwrap();
        assert_eq!(train.height() + test.height(), 4);
        // same seed, same split
        let [train2, _] = dataset.random_split([0.5, 0.5], 7).unwrap();
        assert_eq!(train.height(), train2.height());
    }

    #[test]
    fn year_extraction_imputes_missing() {
        let titles = Series::new("title", vec!["A (1990)", "B", "C (2000)"]);
        let years = release_year(&titles).unwrap();
        let years: Vec<f32> = years.f32().unwrap().into_no_null_iter().collect();
        assert_eq!(years, vec![1990.0, 1995.0, 2000.0]);
    }
}
