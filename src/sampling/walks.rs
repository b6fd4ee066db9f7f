use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::graph::TypedGraph;

/// Fixed-length uniform random walks.
///
/// Each walk holds `walk_length` nodes including the start; a walk ends
/// early only at a dead-end, so an isolated start node yields the length-1
/// walk `[start]`.
#[derive(Clone, Copy, Debug)]
pub struct UniformRandomWalker {
    pub walk_length: usize,
    pub walks_per_node: usize,
}

impl UniformRandomWalker {
    pub fn new(walk_length: usize, walks_per_node: usize) -> Self {
        Self {
            walk_length,
            walks_per_node,
        }
    }

    /// `starts.len() * walks_per_node` walks, in start-node order.
    pub fn walks(
        &self,
        graph: &TypedGraph,
        starts: &[usize],
        rng: &mut StdRng,
    ) -> Vec<Vec<usize>> {
        let mut walks = Vec::with_capacity(starts.len() * self.walks_per_node);
        for &start in starts {
            for _ in 0..self.walks_per_node {
                let mut walk = Vec::with_capacity(self.walk_length);
                walk.push(start);
                let mut current = start;
                while walk.len() < self.walk_length {
                    match graph.neighbors(current).choose(rng) {
                        Some(&next) => {
                            walk.push(next);
                            current = next;
                        }
                        None => break,
                    }
                }
                walks.push(walk);
            }
        }
        walks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use rand::SeedableRng;

    fn path_graph(n: usize) -> TypedGraph {
        let mut builder = GraphBuilder::new();
        for i in 0..n {
            builder.add_node(&i.to_string(), "node", vec![]).unwrap();
        }
        for i in 1..n {
            builder
                .add_edge(&(i - 1).to_string(), &i.to_string(), 1.0)
                .unwrap();
        }
        builder.build()
    }

    #[test]
    fn generates_k_times_w_walks_of_length_l() {
        let graph = path_graph(5);
        let walker = UniformRandomWalker::new(4, 3);
        let starts: Vec<usize> = (0..graph.num_nodes()).collect();
        let mut rng = StdRng::seed_from_u64(0);
        let walks = walker.walks(&graph, &starts, &mut rng);
        assert_eq!(walks.len(), 5 * 3);
        for walk in &walks {
            assert_eq!(walk.len(), 4);
        }
    }

    #[test]
    fn walk_steps_follow_edges() {
        let graph = path_graph(5);
        let walker = UniformRandomWalker::new(6, 2);
        let mut rng = StdRng::seed_from_u64(1);
        for walk in walker.walks(&graph, &[2], &mut rng) {
            for pair in walk.windows(2) {
                assert!(graph.neighbors(pair[0]).contains(&pair[1]));
            }
        }
    }

    #[test]
    fn isolated_node_yields_singleton_walk() {
        let mut builder = GraphBuilder::new();
        builder.add_node("lonely", "node", vec![]).unwrap();
        let graph = builder.build();
        let walker = UniformRandomWalker::new(5, 2);
        let mut rng = StdRng::seed_from_u64(2);
        let walks = walker.walks(&graph, &[0], &mut rng);
        assert_eq!(walks, vec![vec![0], vec![0]]);
    }

    #[test]
    fn same_seed_same_walks() {
        let graph = path_graph(6);
        let walker = UniformRandomWalker::new(5, 2);
        let starts: Vec<usize> = (0..graph.num_nodes()).collect();
        let a = walker.walks(&graph, &starts, &mut StdRng::seed_from_u64(9));
        let b = walker.walks(&graph, &starts, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }
}
