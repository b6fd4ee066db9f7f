use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::graph::{TypedGraph, NO_NODE};

/// Fixed-fan-out multi-hop neighbor sampling.
///
/// Each hop draws exactly `num_samples[i]` neighbors per parent, uniformly
/// **with replacement**, so the per-batch tensor shapes are constant
/// regardless of node degree (low-degree nodes repeat neighbors; that bias
/// is inherent to the fixed-fan-out design). A parent with no neighbors
/// (or the [`NO_NODE`] sentinel itself) fans out to `NO_NODE` children,
/// which materialize as all-zero feature rows.
#[derive(Clone, Debug)]
pub struct NeighborSampler {
    num_samples: Vec<usize>,
}

impl NeighborSampler {
    pub fn new(num_samples: Vec<usize>) -> Self {
        Self { num_samples }
    }

    pub fn num_samples(&self) -> &[usize] {
        &self.num_samples
    }

    pub fn num_hops(&self) -> usize {
        self.num_samples.len()
    }

    /// Nodes per anchor at hop `i` (1 at hop 0, then the running product of
    /// the fan-outs).
    pub fn hop_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![1];
        for &k in &self.num_samples {
            sizes.push(sizes.last().unwrap() * k);
        }
        sizes
    }

    /// Multi-hop expansion: result[0] is `anchors`, result[i] holds the hop-i
    /// samples of every hop-(i-1) node in order.
    pub fn sample_hops(
        &self,
        graph: &TypedGraph,
        anchors: &[usize],
        rng: &mut StdRng,
    ) -> Vec<Vec<usize>> {
        let mut hops = vec![anchors.to_vec()];
        for &k in &self.num_samples {
            let parents = hops.last().unwrap();
            let mut children = Vec::with_capacity(parents.len() * k);
            for &parent in parents {
                if parent == NO_NODE || graph.degree(parent) == 0 {
                    children.extend(std::iter::repeat(NO_NODE).take(k));
                } else {
                    let neighbors = graph.neighbors(parent);
                    for _ in 0..k {
                        children.push(*neighbors.choose(rng).unwrap_or(&NO_NODE));
                    }
                }
            }
            hops.push(children);
        }
        hops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use rand::SeedableRng;

    fn star_graph() -> TypedGraph {
        // hub 0 connected to 1..=3, node 4 isolated
        let mut builder = GraphBuilder::new();
        for i in 0..5 {
            builder.add_node(&i.to_string(), "node", vec![]).unwrap();
        }
        for i in 1..4 {
            builder.add_edge("0", &i.to_string(), 1.0).unwrap();
        }
        builder.build()
    }

    #[test]
    fn hop_sizes_are_exact() {
        let graph = star_graph();
        let sampler = NeighborSampler::new(vec![4, 2]);
        let mut rng = StdRng::seed_from_u64(0);
        let hops = sampler.sample_hops(&graph, &[0, 1], &mut rng);
        assert_eq!(hops.len(), 3);
        assert_eq!(hops[0], vec![0, 1]);
        assert_eq!(hops[1].len(), 2 * 4);
        assert_eq!(hops[2].len(), 2 * 4 * 2);
        assert_eq!(sampler.hop_sizes(), vec![1, 4, 8]);
    }

    #[test]
    fn oversampling_repeats_neighbors() {
        let graph = star_graph();
        // node 1 has degree 1; fan-out 5 must still produce 5 samples
        let sampler = NeighborSampler::new(vec![5]);
        let mut rng = StdRng::seed_from_u64(0);
        let hops = sampler.sample_hops(&graph, &[1], &mut rng);
        assert_eq!(hops[1], vec![0, 0, 0, 0, 0]);
    }

    #[test]
    fn isolated_node_fans_out_to_sentinels() {
        let graph = star_graph();
        let sampler = NeighborSampler::new(vec![3, 2]);
        let mut rng = StdRng::seed_from_u64(0);
        let hops = sampler.sample_hops(&graph, &[4], &mut rng);
        assert!(hops[1].iter().all(|&v| v == NO_NODE));
        assert!(hops[2].iter().all(|&v| v == NO_NODE));
        assert_eq!(hops[2].len(), 6);
    }

    #[test]
    fn samples_are_neighbors_of_parents() {
        let graph = star_graph();
        let sampler = NeighborSampler::new(vec![2]);
        let mut rng = StdRng::seed_from_u64(3);
        let hops = sampler.sample_hops(&graph, &[0], &mut rng);
        for &child in &hops[1] {
            assert!(graph.neighbors(0).contains(&child));
        }
    }
}
