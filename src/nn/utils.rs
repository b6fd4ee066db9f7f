use candle_core::{Result, Tensor, D};
use candle_nn::{Init, Linear, VarBuilder};

/// Xavier Uniform bounds, matching torch's default for graph conv weights.
pub(crate) fn xavier_uniform(in_dim: usize, out_dim: usize) -> Init {
    let bound = (6.0 / (in_dim + out_dim) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

//
// Linear layer with torch-equivalent initialisation
//
//   torch.nn.Linear is initialised by Uniform(-1/sqrt(fan_in), 1/sqrt(fan_in)).
//   see https://github.com/pytorch/pytorch/issues/57109
//
pub fn linear(in_dim: usize, out_dim: usize, vs: VarBuilder) -> Result<Linear> {
    let bound = 1.0 / (in_dim as f64).sqrt();
    let init = Init::Uniform {
        lo: -bound,
        up: bound,
    };
    let ws = vs.get_with_hints((out_dim, in_dim), "weight", init)?;
    let bs = vs.get_with_hints(out_dim, "bias", init)?;
    Ok(Linear::new(ws, Some(bs)))
}

/// Matmul of an N-d activation against a 2-d weight: flattens the leading
/// dimensions, multiplies, and restores them with the new trailing width.
pub(crate) fn flat_matmul(xs: &Tensor, weight: &Tensor) -> Result<Tensor> {
    let (in_dim, out_dim) = weight.dims2()?;
    let mut dims = xs.dims().to_vec();
    let rows = xs.elem_count() / in_dim;
    let ys = xs.reshape((rows, in_dim))?.matmul(weight)?;
    *dims.last_mut().unwrap() = out_dim;
    ys.reshape(dims)
}

/// Row-wise L2 normalization over the last dimension.
pub fn l2_normalize(xs: &Tensor) -> Result<Tensor> {
    let norm = xs.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?.clamp(1e-12, f64::INFINITY)?;
    xs.broadcast_div(&norm)
}
