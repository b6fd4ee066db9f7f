use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

use super::utils::linear;

/// Parameter-free link scorer: the dot product of the two endpoint
/// embeddings, returned as a logit per pair for use with
/// `binary_cross_entropy_with_logit`.
pub struct LinkClassifier;

impl LinkClassifier {
    /// `src`, `dst`: `(batch, dim)` → logits `(batch)`.
    pub fn forward(&self, src: &Tensor, dst: &Tensor) -> Result<Tensor> {
        src.mul(dst)?.sum(1)
    }
}

/// Link regression head: concatenated endpoint embeddings through a single
/// linear layer, one scalar per pair.
pub struct LinkRegressor {
    out: Linear,
}

impl LinkRegressor {
    pub fn new(embedding_dim: usize, vs: VarBuilder) -> Result<Self> {
        Ok(Self {
            out: linear(2 * embedding_dim, 1, vs.pp("out"))?,
        })
    }

    /// `src`, `dst`: `(batch, dim)` → predictions `(batch)`.
    pub fn forward(&self, src: &Tensor, dst: &Tensor) -> Result<Tensor> {
        let pair = Tensor::cat(&[src, dst], 1)?;
        self.out.forward(&pair)?.squeeze(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn classifier_scores_are_dot_products() {
        let device = Device::Cpu;
        let src = Tensor::new(&[[1.0f32, 2.0], [0.0, 1.0]], &device).unwrap();
        let dst = Tensor::new(&[[3.0f32, 4.0], [5.0, 6.0]], &device).unwrap();
        let logits = LinkClassifier.forward(&src, &dst).unwrap();
        assert_eq!(logits.to_vec1::<f32>().unwrap(), vec![11.0, 6.0]);
    }

    #[test]
    fn regressor_outputs_one_scalar_per_pair() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let head = LinkRegressor::new(4, vs).unwrap();
        let src = Tensor::rand(-1.0f32, 1.0, (3, 4), &device).unwrap();
        let dst = Tensor::rand(-1.0f32, 1.0, (3, 4), &device).unwrap();
        let predictions = head.forward(&src, &dst).unwrap();
        assert_eq!(predictions.dims(), &[3]);
    }
}
