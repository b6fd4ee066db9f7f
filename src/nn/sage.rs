use candle_core::{Result, Tensor};
use candle_nn::{Activation, Dropout, Module, VarBuilder};

use super::traits::SageModule;
use super::utils::{flat_matmul, l2_normalize, xavier_uniform};
use crate::error::SageError;

/// One GraphSAGE layer with mean aggregation:
/// `out = self W_self + mean(neigh) W_neigh + bias`.
pub struct SageConv {
    w_self: Tensor,
    w_neigh: Tensor,
    bias: Tensor,
}

impl SageConv {
    pub fn new(in_dim: usize, out_dim: usize, vs: VarBuilder) -> Result<Self> {
        let init = xavier_uniform(in_dim, out_dim);
        let w_self = vs.get_with_hints((in_dim, out_dim), "w_self", init)?;
        let w_neigh = vs.get_with_hints((in_dim, out_dim), "w_neigh", init)?;
        let bias = vs.get_with_hints((1, 1, out_dim), "bias", candle_nn::Init::Const(0.0))?;
        Ok(Self {
            w_self,
            w_neigh,
            bias,
        })
    }

    /// `self_x`: `(batch, k, in_dim)`, `neigh_x`: `(batch, k, fanout, in_dim)`.
    pub fn forward(&self, self_x: &Tensor, neigh_x: &Tensor) -> Result<Tensor> {
        let neigh_mean = neigh_x.mean(2)?;
        let ys = flat_matmul(self_x, &self.w_self)?
            .add(&flat_matmul(&neigh_mean, &self.w_neigh)?)?;
        ys.broadcast_add(&self.bias)
    }
}

pub struct SageParams {
    pub dropout_rate: f32,
    pub activation_fn: Activation,
    pub normalize: bool,
}

impl Default for SageParams {
    fn default() -> Self {
        Self {
            dropout_rate: 0.0,
            activation_fn: Activation::Relu,
            normalize: true,
        }
    }
}

/// GraphSAGE encoder over sampled hop tensors.
///
/// `layer_sizes[0]` is the node feature width; each layer collapses the
/// deepest remaining hop into its parents, so after `num_samples.len()`
/// layers only the anchor embedding `(batch, out_dim)` is left.
pub struct Sage {
    layers: Vec<SageConv>,
    layer_sizes: Vec<usize>,
    num_samples: Vec<usize>,
    dropout: Dropout,
    activation_fn: Activation,
    normalize: bool,
}

impl Sage {
    pub fn with_params(
        layer_sizes: &[usize],
        num_samples: &[usize],
        params: SageParams,
        vs: VarBuilder,
    ) -> Result<Self> {
        if layer_sizes.len() != num_samples.len() + 1 {
            candle_core::bail!(
                "{} layer sizes do not fit {} sampling hops",
                layer_sizes.len(),
                num_samples.len()
            );
        }
        let mut layers = Vec::new();
        for i in 0..layer_sizes.len() - 1 {
            layers.push(SageConv::new(
                layer_sizes[i],
                layer_sizes[i + 1],
                vs.pp(i.to_string()),
            )?);
        }
        Ok(Self {
            layers,
            layer_sizes: layer_sizes.to_vec(),
            num_samples: num_samples.to_vec(),
            dropout: Dropout::new(params.dropout_rate),
            activation_fn: params.activation_fn,
            normalize: params.normalize,
        })
    }

    pub fn new(layer_sizes: &[usize], num_samples: &[usize], vs: VarBuilder) -> Result<Self> {
        Self::with_params(layer_sizes, num_samples, SageParams::default(), vs)
    }

    pub fn out_dim(&self) -> usize {
        *self.layer_sizes.last().unwrap()
    }

    /// Every hop tensor must match the declared sampling topology exactly;
    /// a mismatch fails here, before any parameter is touched.
    fn check_shapes(&self, hops: &[Tensor]) -> Result<()> {
        if hops.len() != self.num_samples.len() + 1 {
            candle_core::bail!(
                "expected {} hop tensors, got {}",
                self.num_samples.len() + 1,
                hops.len()
            );
        }
        let batch = hops[0].dim(0)?;
        let mut size = 1;
        for (i, hop) in hops.iter().enumerate() {
            if i > 0 {
                size *= self.num_samples[i - 1];
            }
            let expected = vec![batch, size, self.layer_sizes[0]];
            if hop.dims() != expected {
                candle_core::bail!(
                    "{}",
                    SageError::ShapeMismatch {
                        hop: i,
                        expected,
                        actual: hop.dims().to_vec(),
                    }
                );
            }
        }
        Ok(())
    }
}

impl SageModule for Sage {
    fn forward_t(&self, hops: &[Tensor], train: bool) -> Result<Tensor> {
        self.check_shapes(hops)?;
        let mut h = hops.to_vec();
        for (l, layer) in self.layers.iter().enumerate() {
            let mut next = Vec::with_capacity(h.len() - 1);
            for k in 0..h.len() - 1 {
                let (batch, size, dim) = h[k].dims3()?;
                let neigh = h[k + 1].reshape((batch, size, self.num_samples[k], dim))?;
                let mut out = layer.forward(&h[k], &neigh)?;
                if l + 1 < self.layers.len() {
                    out = self.activation_fn.forward(&out)?;
                    out = self.dropout.forward(&out, train)?;
                }
                next.push(out);
            }
            h = next;
        }
        let embedding = h[0].squeeze(1)?;
        if self.normalize {
            l2_normalize(&embedding)
        } else {
            Ok(embedding)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn model(layer_sizes: &[usize], num_samples: &[usize]) -> Sage {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        Sage::new(layer_sizes, num_samples, vs.pp("sage")).unwrap()
    }

    fn hop(batch: usize, size: usize, dim: usize) -> Tensor {
        Tensor::rand(-1.0f32, 1.0, (batch, size, dim), &Device::Cpu).unwrap()
    }

    #[test]
    fn two_layer_forward_produces_unit_embeddings() {
        let sage = model(&[4, 8, 6], &[3, 2]);
        let hops = [hop(5, 1, 4), hop(5, 3, 4), hop(5, 6, 4)];
        let embeddings = sage.forward(&hops).unwrap();
        assert_eq!(embeddings.dims(), &[5, 6]);
        let norms: Vec<f32> = embeddings
            .sqr()
            .unwrap()
            .sum(1)
            .unwrap()
            .to_vec1()
            .unwrap();
        for n in norms {
            assert!((n - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn wrong_fanout_fails_fast() {
        let sage = model(&[4, 8, 6], &[3, 2]);
        // hop 1 sampled with fan-out 2 instead of 3
        let hops = [hop(5, 1, 4), hop(5, 2, 4), hop(5, 6, 4)];
        let err = sage.forward(&hops).unwrap_err();
        assert!(err.to_string().contains("shape mismatch"));
    }

    #[test]
    fn wrong_feature_width_fails_fast() {
        let sage = model(&[4, 8], &[2]);
        let hops = [hop(3, 1, 5), hop(3, 2, 5)];
        assert!(sage.forward(&hops).is_err());
    }

    #[test]
    fn layer_count_must_match_hops() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        assert!(Sage::new(&[4, 8, 6], &[3], vs).is_err());
    }
}
