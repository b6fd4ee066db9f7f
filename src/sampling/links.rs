use anyhow::Result;
use candle_core::{Device, Tensor};
use itertools::Itertools;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::neighbors::NeighborSampler;
use super::walks::UniformRandomWalker;
use crate::error::SageError;
use crate::graph::{TypedGraph, NO_NODE};

/// A link example: two anchor node indices and a scalar label (1/0 for
/// predicted presence, a rating for regression).
pub type LinkExample = (usize, usize, f32);

/// One training batch: per-hop feature tensors for both endpoints plus a
/// label vector. `src_hops[i]` has shape `(batch, hop_size_i, width_i)`.
pub struct LinkBatch {
    pub src_hops: Vec<Tensor>,
    pub dst_hops: Vec<Tensor>,
    pub labels: Tensor,
}

/// Positive/negative node-pair source for unsupervised GraphSAGE training.
///
/// Positives are (head, context) pairs from uniform random walks: the walk's
/// first node against every later node of the same walk. Negatives pair the
/// same heads with independent uniform draws over the whole node set, one
/// per positive. True positives are deliberately not excluded from the
/// negative draws; the occasional false negative is standard for this
/// training scheme.
///
/// Pairs are regenerated per call, so calling once per epoch re-randomizes
/// both walks and negatives.
pub struct UnsupervisedSampler {
    walker: UniformRandomWalker,
}

impl UnsupervisedSampler {
    pub fn new(walk_length: usize, walks_per_node: usize) -> Self {
        Self {
            walker: UniformRandomWalker::new(walk_length, walks_per_node),
        }
    }

    pub fn pairs(
        &self,
        graph: &TypedGraph,
        starts: Option<&[usize]>,
        rng: &mut StdRng,
    ) -> Vec<LinkExample> {
        let all_nodes: Vec<usize> = (0..graph.num_nodes()).collect();
        let starts = starts.unwrap_or(&all_nodes);
        let mut examples = Vec::new();
        for walk in self.walker.walks(graph, starts, rng) {
            let head = walk[0];
            for &context in &walk[1..] {
                examples.push((head, context, 1.0));
                examples.push((head, rng.gen_range(0..graph.num_nodes()), 0.0));
            }
        }
        examples
    }
}

/// Per-hop feature matrix for a flat id list; [`NO_NODE`] rows are zeros.
fn features_tensor(
    graph: &TypedGraph,
    ids: &[usize],
    width: usize,
    device: &Device,
) -> Result<Tensor> {
    let mut flat = Vec::with_capacity(ids.len() * width);
    for &id in ids {
        if id == NO_NODE {
            flat.extend(std::iter::repeat(0.0f32).take(width));
        } else {
            flat.extend_from_slice(graph.features(id));
        }
    }
    Ok(Tensor::from_vec(flat, (ids.len(), width), device)?)
}

fn hop_tensors(
    graph: &TypedGraph,
    sampler: &NeighborSampler,
    anchors: &[usize],
    widths: &[usize],
    device: &Device,
    rng: &mut StdRng,
) -> Result<Vec<Tensor>> {
    let hop_sizes = sampler.hop_sizes();
    let hops = sampler.sample_hops(graph, anchors, rng);
    let mut tensors = Vec::with_capacity(hops.len());
    for ((ids, &size), &width) in hops.iter().zip(&hop_sizes).zip(widths) {
        let flat = features_tensor(graph, ids, width, device)?;
        tensors.push(flat.reshape((anchors.len(), size, width))?);
    }
    Ok(tensors)
}

/// One epoch of link batches: `ceil(M / batch_size)` batches covering every
/// example exactly once, shuffled up front when requested. `reset` rewinds
/// (and reshuffles) for the next epoch.
pub struct LinkSequence<'a> {
    graph: &'a TypedGraph,
    sampler: NeighborSampler,
    src_widths: Vec<usize>,
    dst_widths: Vec<usize>,
    examples: Vec<LinkExample>,
    batch_size: usize,
    position: usize,
    shuffle: bool,
    device: Device,
    rng: StdRng,
}

impl<'a> LinkSequence<'a> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        graph: &'a TypedGraph,
        num_samples: Vec<usize>,
        src_widths: Vec<usize>,
        dst_widths: Vec<usize>,
        mut examples: Vec<LinkExample>,
        batch_size: usize,
        shuffle: bool,
        device: Device,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        if shuffle {
            examples.shuffle(&mut rng);
        }
        Self {
            graph,
            sampler: NeighborSampler::new(num_samples),
            src_widths,
            dst_widths,
            examples,
            batch_size,
            position: 0,
            shuffle,
            device,
            rng,
        }
    }

    pub fn num_batches(&self) -> usize {
        self.examples.len().div_ceil(self.batch_size)
    }

    pub fn num_examples(&self) -> usize {
        self.examples.len()
    }

    pub fn reset(&mut self) {
        self.position = 0;
        if self.shuffle {
            self.examples.shuffle(&mut self.rng);
        }
    }
}

impl<'a> Iterator for LinkSequence<'a> {
    type Item = Result<LinkBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.examples.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.examples.len());
        let batch = &self.examples[self.position..end];
        self.position = end;

        let (sources, targets, labels): (Vec<usize>, Vec<usize>, Vec<f32>) =
            batch.iter().copied().multiunzip();

        let build = || -> Result<LinkBatch> {
            let src_hops = hop_tensors(
                self.graph,
                &self.sampler,
                &sources,
                &self.src_widths,
                &self.device,
                &mut self.rng,
            )?;
            let dst_hops = hop_tensors(
                self.graph,
                &self.sampler,
                &targets,
                &self.dst_widths,
                &self.device,
                &mut self.rng,
            )?;
            let labels = Tensor::from_vec(labels, batch.len(), &self.device)?;
            Ok(LinkBatch {
                src_hops,
                dst_hops,
                labels,
            })
        };
        Some(build())
    }
}

/// Batch generator for link prediction on a homogeneous graph.
pub struct LinkGenerator<'a> {
    graph: &'a TypedGraph,
    num_samples: Vec<usize>,
    batch_size: usize,
    device: Device,
}

impl<'a> LinkGenerator<'a> {
    pub fn new(
        graph: &'a TypedGraph,
        num_samples: Vec<usize>,
        batch_size: usize,
        device: &Device,
    ) -> Result<Self> {
        anyhow::ensure!(
            graph.node_types().len() == 1,
            "homogeneous generator on a graph with {} node types",
            graph.node_types().len()
        );
        Ok(Self {
            graph,
            num_samples,
            batch_size,
            device: device.clone(),
        })
    }

    pub fn num_samples(&self) -> &[usize] {
        &self.num_samples
    }

    pub fn feature_width(&self) -> usize {
        let node_type = &self.graph.node_types()[0];
        self.graph.feature_width(node_type).unwrap_or(0)
    }

    pub fn flow(&self, examples: Vec<LinkExample>, shuffle: bool, seed: u64) -> LinkSequence<'a> {
        let widths = vec![self.feature_width(); self.num_samples.len() + 1];
        LinkSequence::new(
            self.graph,
            self.num_samples.clone(),
            widths.clone(),
            widths,
            examples,
            self.batch_size,
            shuffle,
            self.device.clone(),
            seed,
        )
    }

    /// Deterministic inference pass over `nodes` in the given order.
    pub fn node_flow(&self, nodes: Vec<usize>, seed: u64) -> NodeSequence<'a> {
        NodeSequence {
            graph: self.graph,
            sampler: NeighborSampler::new(self.num_samples.clone()),
            widths: vec![self.feature_width(); self.num_samples.len() + 1],
            nodes,
            batch_size: self.batch_size,
            position: 0,
            device: self.device.clone(),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

/// Batch generator for link regression on a bipartite graph. Hop tensors on
/// each side alternate between the two node types, so their feature widths
/// follow the hop's type.
pub struct HinSageLinkGenerator<'a> {
    graph: &'a TypedGraph,
    num_samples: Vec<usize>,
    batch_size: usize,
    head_types: (String, String),
    device: Device,
}

impl<'a> HinSageLinkGenerator<'a> {
    pub fn new(
        graph: &'a TypedGraph,
        num_samples: Vec<usize>,
        batch_size: usize,
        head_types: (&str, &str),
        device: &Device,
    ) -> Result<Self> {
        anyhow::ensure!(
            graph.node_types().len() == 2,
            "bipartite generator on a graph with {} node types",
            graph.node_types().len()
        );
        for head in [head_types.0, head_types.1] {
            anyhow::ensure!(
                graph.feature_width(head).is_some(),
                "unknown head node type {head:?}"
            );
        }
        Ok(Self {
            graph,
            num_samples,
            batch_size,
            head_types: (head_types.0.to_owned(), head_types.1.to_owned()),
            device: device.clone(),
        })
    }

    pub fn num_samples(&self) -> &[usize] {
        &self.num_samples
    }

    /// Node types along the sampling chain starting from `head`; in a
    /// bipartite graph every hop flips to the other type.
    pub fn type_chain(&self, head: &str) -> Vec<String> {
        let other = if head == self.head_types.0 {
            &self.head_types.1
        } else {
            &self.head_types.0
        };
        (0..=self.num_samples.len())
            .map(|i| {
                if i % 2 == 0 {
                    head.to_owned()
                } else {
                    other.clone()
                }
            })
            .collect()
    }

    pub fn feature_widths(&self) -> Vec<(String, usize)> {
        self.graph
            .node_types()
            .iter()
            .map(|t| (t.clone(), self.graph.feature_width(t).unwrap_or(0)))
            .collect()
    }

    fn chain_widths(&self, head: &str) -> Vec<usize> {
        self.type_chain(head)
            .iter()
            .map(|t| self.graph.feature_width(t).unwrap_or(0))
            .collect()
    }

    pub fn flow(&self, examples: Vec<LinkExample>, shuffle: bool, seed: u64) -> LinkSequence<'a> {
        LinkSequence::new(
            self.graph,
            self.num_samples.clone(),
            self.chain_widths(&self.head_types.0),
            self.chain_widths(&self.head_types.1),
            examples,
            self.batch_size,
            shuffle,
            self.device.clone(),
            seed,
        )
    }
}

/// Unshuffled anchor-only batches for embedding extraction; node order is
/// exactly the order passed in.
pub struct NodeSequence<'a> {
    graph: &'a TypedGraph,
    sampler: NeighborSampler,
    widths: Vec<usize>,
    nodes: Vec<usize>,
    batch_size: usize,
    position: usize,
    device: Device,
    rng: StdRng,
}

impl<'a> NodeSequence<'a> {
    pub fn num_batches(&self) -> usize {
        self.nodes.len().div_ceil(self.batch_size)
    }
}

impl<'a> Iterator for NodeSequence<'a> {
    type Item = Result<Vec<Tensor>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.nodes.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.nodes.len());
        let anchors = &self.nodes[self.position..end];
        self.position = end;
        Some(hop_tensors(
            self.graph,
            &self.sampler,
            anchors,
            &self.widths,
            &self.device,
            &mut self.rng,
        ))
    }
}

/// Map an edge DataFrame (string ids + label column) onto graph indices.
/// An id absent from the graph is a referential-integrity error.
pub fn examples_from_df(
    graph: &TypedGraph,
    df: &DataFrame,
    source_col: &str,
    target_col: &str,
    label_col: &str,
) -> Result<Vec<LinkExample>> {
    let sources = df.column(source_col)?.cast(&DataType::Utf8)?;
    let sources = sources.utf8()?;
    let targets = df.column(target_col)?.cast(&DataType::Utf8)?;
    let targets = targets.utf8()?;
    let labels = df.column(label_col)?.f32()?;

    let mut examples = Vec::with_capacity(df.height());
    for (row, (source, target)) in sources
        .into_no_null_iter()
        .zip(targets.into_no_null_iter())
        .enumerate()
    {
        let lookup = |id: &str| {
            graph.node_index(id).ok_or_else(|| SageError::UnknownNode {
                source: source.to_owned(),
                target: target.to_owned(),
                missing: id.to_owned(),
            })
        };
        examples.push((
            lookup(source)?,
            lookup(target)?,
            labels.get(row).unwrap_or(0.0),
        ));
    }
    Ok(examples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use std::collections::HashSet;

    fn cycle_graph(n: usize) -> TypedGraph {
        let mut builder = GraphBuilder::new();
        for i in 0..n {
            builder
                .add_node(&i.to_string(), "node", vec![i as f32, 1.0])
                .unwrap();
        }
        for i in 0..n {
            builder
                .add_edge(&i.to_string(), &((i + 1) % n).to_string(), 1.0)
                .unwrap();
        }
        builder.build()
    }

    fn bipartite_graph() -> TypedGraph {
        let mut builder = GraphBuilder::new();
        for i in 0..3 {
            builder
                .add_node(&format!("u_{i}"), "user", vec![0.1, 0.2, 0.3])
                .unwrap();
        }
        for i in 0..2 {
            builder
                .add_node(&format!("m_{i}"), "movie", vec![1.0, 0.0])
                .unwrap();
        }
        for i in 0..3 {
            for j in 0..2 {
                builder
                    .add_edge(&format!("u_{i}"), &format!("m_{j}"), 3.0)
                    .unwrap();
            }
        }
        builder.build()
    }

    #[test]
    fn unsupervised_sampler_balances_labels() {
        let graph = cycle_graph(8);
        let sampler = UnsupervisedSampler::new(3, 2);
        let mut rng = StdRng::seed_from_u64(0);
        let pairs = sampler.pairs(&graph, None, &mut rng);
        // 8 nodes x 2 walks x 2 contexts, doubled by negatives
        assert_eq!(pairs.len(), 64);
        let positives = pairs.iter().filter(|e| e.2 == 1.0).count();
        assert_eq!(positives * 2, pairs.len());
    }

    #[test]
    fn one_epoch_covers_every_example_once() {
        let graph = cycle_graph(6);
        let device = Device::Cpu;
        let generator = LinkGenerator::new(&graph, vec![2], 4, &device).unwrap();
        let examples: Vec<LinkExample> =
            (0..10).map(|i| (i % 6, (i + 1) % 6, i as f32)).collect();
        let mut sequence = generator.flow(examples.clone(), true, 11);
        assert_eq!(sequence.num_batches(), 3); // ceil(10 / 4)

        let mut seen = Vec::new();
        let mut batches = 0;
        for batch in sequence.by_ref() {
            let batch = batch.unwrap();
            batches += 1;
            seen.extend(batch.labels.to_vec1::<f32>().unwrap());
        }
        assert_eq!(batches, 3);
        let expected: HashSet<i64> = examples.iter().map(|e| e.2 as i64).collect();
        let got: HashSet<i64> = seen.iter().map(|&l| l as i64).collect();
        assert_eq!(seen.len(), 10);
        assert_eq!(got, expected);

        // restartable: reset yields a fresh epoch
        sequence.reset();
        assert_eq!(sequence.count(), 3);
    }

    #[test]
    fn homogeneous_batch_shapes() {
        let graph = cycle_graph(6);
        let device = Device::Cpu;
        let generator = LinkGenerator::new(&graph, vec![3, 2], 4, &device).unwrap();
        let examples = vec![(0, 1, 1.0), (2, 3, 0.0), (4, 5, 1.0), (5, 0, 0.0)];
        let batch = generator
            .flow(examples, false, 0)
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(batch.src_hops[0].dims(), &[4, 1, 2]);
        assert_eq!(batch.src_hops[1].dims(), &[4, 3, 2]);
        assert_eq!(batch.src_hops[2].dims(), &[4, 6, 2]);
        assert_eq!(batch.labels.dims(), &[4]);
    }

    #[test]
    fn hinsage_chain_alternates_types_and_widths() {
        let graph = bipartite_graph();
        let device = Device::Cpu;
        let generator =
            HinSageLinkGenerator::new(&graph, vec![2, 2], 2, ("user", "movie"), &device).unwrap();
        assert_eq!(generator.type_chain("user"), ["user", "movie", "user"]);
        assert_eq!(generator.type_chain("movie"), ["movie", "user", "movie"]);

        let examples = vec![(0, 3, 5.0), (1, 4, 2.0)];
        let batch = generator
            .flow(examples, false, 0)
            .next()
            .unwrap()
            .unwrap();
        // user side: width 3, then movie width 2, then user width 3
        assert_eq!(batch.src_hops[0].dims(), &[2, 1, 3]);
        assert_eq!(batch.src_hops[1].dims(), &[2, 2, 2]);
        assert_eq!(batch.src_hops[2].dims(), &[2, 4, 3]);
        // movie side mirrors
        assert_eq!(batch.dst_hops[0].dims(), &[2, 1, 2]);
        assert_eq!(batch.dst_hops[1].dims(), &[2, 2, 3]);
        assert_eq!(batch.dst_hops[2].dims(), &[2, 4, 2]);
    }

    #[test]
    fn node_sequence_is_deterministic() {
        let graph = cycle_graph(5);
        let device = Device::Cpu;
        let generator = LinkGenerator::new(&graph, vec![2], 2, &device).unwrap();
        let nodes: Vec<usize> = (0..5).collect();

        let collect = |seq: NodeSequence| -> Vec<Vec<f32>> {
            seq.map(|hops| hops.unwrap()[1].flatten_all().unwrap().to_vec1().unwrap())
                .collect()
        };
        let a = collect(generator.node_flow(nodes.clone(), 21));
        let b = collect(generator.node_flow(nodes, 21));
        assert_eq!(a, b);
    }

    #[test]
    fn examples_from_df_rejects_unknown_ids() {
        let graph = bipartite_graph();
        let df = df! {
            "source" => ["u_0", "u_9"],
            "target" => ["m_0", "m_1"],
            "rating" => [4.0f32, 2.0],
        }
        .unwrap();
        assert!(examples_from_df(&graph, &df, "source", "target", "rating").is_err());

        let df = df! {
            "source" => ["u_0"],
            "target" => ["m_1"],
            "rating" => [4.0f32],
        }
        .unwrap();
        let examples = examples_from_df(&graph, &df, "source", "target", "rating").unwrap();
        assert_eq!(examples, vec![(0, 4, 4.0)]);
    }
}
