use std::collections::HashMap;
use std::hash::Hash;

use candle_core::{Result, Tensor};
use candle_nn::{Activation, Dropout, Module, VarBuilder};

use super::utils::{flat_matmul, l2_normalize, xavier_uniform};
use crate::error::SageError;

/// One HinSAGE layer: per-node-type self weights plus per-(self, neighbor)
/// type-pair aggregation weights, keyed the way the heterogeneous layers in
/// this codebase key their parameters.
pub struct HinSageConv<NodeType> {
    self_ws: HashMap<NodeType, Tensor>,
    neigh_ws: HashMap<(NodeType, NodeType), Tensor>,
    biases: HashMap<NodeType, Tensor>,
}

impl<NodeType> HinSageConv<NodeType>
where
    NodeType: Clone + Eq + Hash + ToString,
{
    pub fn new(
        in_dims: &[(NodeType, usize)],
        out_dim: usize,
        neighbor_pairs: &[(NodeType, NodeType)],
        vs: VarBuilder,
    ) -> Result<Self> {
        let in_dims: HashMap<NodeType, usize> = in_dims.iter().cloned().collect();

        let mut self_ws = HashMap::new();
        let mut biases = HashMap::new();
        for (node_type, &in_dim) in &in_dims {
            let weight = vs.get_with_hints(
                (in_dim, out_dim),
                &format!("self[{}]", node_type.to_string()),
                xavier_uniform(in_dim, out_dim),
            )?;
            self_ws.insert(node_type.clone(), weight);
            let bias = vs.get_with_hints(
                (1, 1, out_dim),
                &format!("bias[{}]", node_type.to_string()),
                candle_nn::Init::Const(0.0),
            )?;
            biases.insert(node_type.clone(), bias);
        }

        let mut neigh_ws = HashMap::new();
        for pair in neighbor_pairs {
            if !in_dims.contains_key(&pair.0) || !in_dims.contains_key(&pair.1) {
                continue;
            }
            let in_dim = in_dims[&pair.1];
            let weight = vs.get_with_hints(
                (in_dim, out_dim),
                &format!("neigh[{},{}]", pair.0.to_string(), pair.1.to_string()),
                xavier_uniform(in_dim, out_dim),
            )?;
            neigh_ws.insert(pair.clone(), weight);
        }
        Ok(Self {
            self_ws,
            neigh_ws,
            biases,
        })
    }

    /// `self_x`: `(batch, k, in_dim(self_type))`,
    /// `neigh_x`: `(batch, k, fanout, in_dim(neigh_type))`.
    pub fn forward(
        &self,
        self_x: &Tensor,
        neigh_x: &Tensor,
        self_type: &NodeType,
        neigh_type: &NodeType,
    ) -> Result<Tensor> {
        let pair = (self_type.clone(), neigh_type.clone());
        let (Some(w_self), Some(w_neigh), Some(bias)) = (
            self.self_ws.get(self_type),
            self.neigh_ws.get(&pair),
            self.biases.get(self_type),
        ) else {
            candle_core::bail!(
                "no parameters for type pair ({}, {})",
                self_type.to_string(),
                neigh_type.to_string()
            );
        };
        let neigh_mean = neigh_x.mean(2)?;
        let ys = flat_matmul(self_x, w_self)?.add(&flat_matmul(&neigh_mean, w_neigh)?)?;
        ys.broadcast_add(bias)
    }
}

/// HinSAGE encoder for heterogeneous graphs. The hop tensors follow a type
/// chain supplied by the generator (for a bipartite graph the chain simply
/// alternates); one set of type-keyed layers serves every chain, so both
/// endpoints of a link share weights.
pub struct HinSage<NodeType> {
    layers: Vec<HinSageConv<NodeType>>,
    in_dims: HashMap<NodeType, usize>,
    layer_sizes: Vec<usize>,
    num_samples: Vec<usize>,
    dropout: Dropout,
    activation_fn: Activation,
    normalize: bool,
}

impl<NodeType> HinSage<NodeType>
where
    NodeType: Clone + Eq + Hash + ToString,
{
    pub fn new(
        in_dims: &[(NodeType, usize)],
        layer_sizes: &[usize],
        num_samples: &[usize],
        neighbor_pairs: &[(NodeType, NodeType)],
        vs: VarBuilder,
    ) -> Result<Self> {
        if layer_sizes.len() != num_samples.len() {
            candle_core::bail!(
                "{} layer sizes do not fit {} sampling hops",
                layer_sizes.len(),
                num_samples.len()
            );
        }
        let types: Vec<NodeType> = in_dims.iter().map(|(t, _)| t.clone()).collect();
        let mut layers = Vec::new();
        for (i, &out_dim) in layer_sizes.iter().enumerate() {
            let layer_in: Vec<(NodeType, usize)> = if i == 0 {
                in_dims.to_vec()
            } else {
                types
                    .iter()
                    .map(|t| (t.clone(), layer_sizes[i - 1]))
                    .collect()
            };
            layers.push(HinSageConv::new(
                &layer_in,
                out_dim,
                neighbor_pairs,
                vs.pp(i.to_string()),
            )?);
        }
        Ok(Self {
            layers,
            in_dims: in_dims.iter().cloned().collect(),
            layer_sizes: layer_sizes.to_vec(),
            num_samples: num_samples.to_vec(),
            dropout: Dropout::new(0.0),
            activation_fn: Activation::Relu,
            normalize: true,
        })
    }

    pub fn with_dropout(mut self, dropout_rate: f32) -> Self {
        self.dropout = Dropout::new(dropout_rate);
        self
    }

    pub fn out_dim(&self) -> usize {
        *self.layer_sizes.last().unwrap()
    }

    fn check_shapes(&self, hops: &[Tensor], chain: &[NodeType]) -> Result<()> {
        if hops.len() != self.num_samples.len() + 1 || chain.len() != hops.len() {
            candle_core::bail!(
                "expected {} hop tensors with types, got {} tensors / {} types",
                self.num_samples.len() + 1,
                hops.len(),
                chain.len()
            );
        }
        let batch = hops[0].dim(0)?;
        let mut size = 1;
        for (i, (hop, node_type)) in hops.iter().zip(chain).enumerate() {
            if i > 0 {
                size *= self.num_samples[i - 1];
            }
            let Some(&width) = self.in_dims.get(node_type) else {
                candle_core::bail!("unknown node type {}", node_type.to_string());
            };
            let expected = vec![batch, size, width];
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

    pub fn forward_t(
        &self,
        hops: &[Tensor],
        chain: &[NodeType],
        train: bool,
    ) -> Result<Tensor> {
        self.check_shapes(hops, chain)?;
        let mut h = hops.to_vec();
        for (l, layer) in self.layers.iter().enumerate() {
            let mut next = Vec::with_capacity(h.len() - 1);
            for k in 0..h.len() - 1 {
                let (batch, size, _) = h[k].dims3()?;
                let (_, _, neigh_width) = h[k + 1].dims3()?;
                let neigh =
                    h[k + 1].reshape((batch, size, self.num_samples[k], neigh_width))?;
                let mut out = layer.forward(&h[k], &neigh, &chain[k], &chain[k + 1])?;
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

    pub fn forward(&self, hops: &[Tensor], chain: &[NodeType]) -> Result<Tensor> {
        self.forward_t(hops, chain, false)
    }
}
