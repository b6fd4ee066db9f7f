use std::collections::HashMap;

use anyhow::Result;
use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::nn::SageModule;
use crate::sampling::NodeSequence;

/// Fraction of predictions equal to the label.
pub fn accuracy(predictions: &[u32], labels: &[u32]) -> f32 {
    assert_eq!(predictions.len(), labels.len());
    if predictions.is_empty() {
        return 0.0;
    }
    let correct = predictions
        .iter()
        .zip(labels)
        .filter(|(p, y)| p == y)
        .count();
    correct as f32 / predictions.len() as f32
}

/// Macro-averaged F1 over `num_classes` classes; a class with no support and
/// no predictions scores 0.
pub fn macro_f1(predictions: &[u32], labels: &[u32], num_classes: usize) -> f32 {
    assert_eq!(predictions.len(), labels.len());
    let mut tp = vec![0usize; num_classes];
    let mut fp = vec![0usize; num_classes];
    let mut fn_ = vec![0usize; num_classes];
    for (&p, &y) in predictions.iter().zip(labels) {
        if p == y {
            tp[p as usize] += 1;
        } else {
            fp[p as usize] += 1;
            fn_[y as usize] += 1;
        }
    }
    let mut total = 0.0;
    for c in 0..num_classes {
        let denominator = 2 * tp[c] + fp[c] + fn_[c];
        if denominator > 0 {
            total += 2.0 * tp[c] as f32 / denominator as f32;
        }
    }
    total / num_classes as f32
}

/// Root mean squared error.
pub fn rmse(predictions: &[f32], targets: &[f32]) -> f32 {
    assert_eq!(predictions.len(), targets.len());
    if predictions.is_empty() {
        return 0.0;
    }
    let mse: f32 = predictions
        .iter()
        .zip(targets)
        .map(|(p, y)| (p - y).powi(2))
        .sum::<f32>()
        / predictions.len() as f32;
    mse.sqrt()
}

/// Split sample indices into train/test by label so both sides keep roughly
/// the input class proportions. Operates on embeddings/labels only, never on
/// the graph structure.
pub fn stratified_split(
    labels: &[u32],
    train_fraction: f32,
    seed: u64,
) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut by_class: HashMap<u32, Vec<usize>> = HashMap::new();
    for (i, &y) in labels.iter().enumerate() {
        by_class.entry(y).or_default().push(i);
    }
    let mut classes: Vec<u32> = by_class.keys().copied().collect();
    classes.sort();

    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in classes {
        let mut indices = by_class.remove(&class).unwrap();
        indices.shuffle(&mut rng);
        let cut = ((indices.len() as f32) * train_fraction).round() as usize;
        let cut = cut.min(indices.len());
        train.extend_from_slice(&indices[..cut]);
        test.extend_from_slice(&indices[cut..]);
    }
    (train, test)
}

/// Per-item mean rating with a global-mean fallback for unseen items.
/// Purely data-driven from the training split; no learned parameters.
pub struct MeanRatingBaseline {
    item_means: HashMap<String, f32>,
    global_mean: f32,
}

impl MeanRatingBaseline {
    pub fn fit<'a, I>(train: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f32)>,
    {
        let mut sums: HashMap<String, (f32, usize)> = HashMap::new();
        let mut total = 0.0;
        let mut count = 0usize;
        for (item, rating) in train {
            let entry = sums.entry(item.to_owned()).or_insert((0.0, 0));
            entry.0 += rating;
            entry.1 += 1;
            total += rating;
            count += 1;
        }
        let item_means = sums
            .into_iter()
            .map(|(item, (sum, n))| (item, sum / n as f32))
            .collect();
        let global_mean = if count > 0 { total / count as f32 } else { 0.0 };
        Self {
            item_means,
            global_mean,
        }
    }

    pub fn global_mean(&self) -> f32 {
        self.global_mean
    }

    pub fn predict(&self, item: &str) -> f32 {
        self.item_means
            .get(item)
            .copied()
            .unwrap_or(self.global_mean)
    }
}

/// Deterministic inference pass: one embedding per node, in the sequence's
/// node order (the sequence is unshuffled; the only randomness left is the
/// fixed-fan-out neighbor draw, pinned by the sequence's seed).
pub fn extract_embeddings<M: SageModule>(model: &M, sequence: NodeSequence) -> Result<Tensor> {
    let mut chunks = Vec::new();
    for hops in sequence {
        let hops = hops?;
        chunks.push(model.forward(&hops)?);
    }
    anyhow::ensure!(!chunks.is_empty(), "empty node sequence");
    Ok(Tensor::cat(&chunks, 0)?)
}
