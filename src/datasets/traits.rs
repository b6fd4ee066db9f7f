use anyhow::Result;

/// Seeded, ratio-based random partitioning,
/// e.g. `ratings.random_split([0.8, 0.2], seed)`.
pub trait RandomSplit<Ratio> {
    type Output;
    fn random_split(&self, ratio: Ratio, seed: u64) -> Result<Self::Output>;
}
