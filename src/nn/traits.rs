use candle_core::{Result, Tensor};

/// An encoder over sampled multi-hop neighborhood tensors: `hops[i]` has
/// shape `(batch, hop_size_i, width_i)`, the output is one embedding per
/// anchor, `(batch, out_dim)`.
pub trait SageModule {
    fn forward_t(&self, hops: &[Tensor], train: bool) -> Result<Tensor>;

    fn forward(&self, hops: &[Tensor]) -> Result<Tensor> {
        self.forward_t(hops, false)
    }
}
