use std::collections::{HashMap, HashSet};

use anyhow::Result;
use polars::prelude::*;

use crate::error::SageError;

/// Sentinel neighbor index used by the sampler when a node has no neighbors.
/// Feature lookups for this index produce an all-zero vector.
pub const NO_NODE: usize = usize::MAX;

/// An immutable, undirected graph with typed nodes and per-node feature
/// vectors. Built once by [`GraphBuilder`]; read-only for the rest of the
/// pipeline.
///
/// Node ids are opaque string keys (bipartite datasets disambiguate the two
/// id spaces with prefixes, e.g. `u_42` / `m_42`). Internally nodes are dense
/// indices so that neighbor lookup is a vector index after one hash lookup.
pub struct TypedGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    type_names: Vec<String>,
    node_types: Vec<usize>,
    features: Vec<Vec<f32>>,
    feature_widths: Vec<usize>,
    adjacency: Vec<Vec<usize>>,
    edges: Vec<(usize, usize)>,
    weights: HashMap<(usize, usize), f32>,
}

impl TypedGraph {
    pub fn num_nodes(&self) -> usize {
        self.ids.len()
    }
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }
    pub fn node_id(&self, node: usize) -> &str {
        &self.ids[node]
    }
    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }
    pub fn node_type(&self, node: usize) -> &str {
        &self.type_names[self.node_types[node]]
    }
    pub fn node_types(&self) -> &[String] {
        &self.type_names
    }
    pub fn nodes_of_type(&self, node_type: &str) -> Vec<usize> {
        (0..self.num_nodes())
            .filter(|&v| self.node_type(v) == node_type)
            .collect()
    }
    pub fn neighbors(&self, node: usize) -> &[usize] {
        &self.adjacency[node]
    }
    pub fn degree(&self, node: usize) -> usize {
        self.adjacency[node].len()
    }
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }
    pub fn edge_weight(&self, u: usize, v: usize) -> Option<f32> {
        self.weights.get(&ordered(u, v)).copied()
    }

    /// Feature vector of a node; [`NO_NODE`] is not a valid argument here,
    /// the sampler substitutes zeros for it when building tensors.
    pub fn features(&self, node: usize) -> &[f32] {
        &self.features[node]
    }

    /// Fixed feature width of a node type.
    pub fn feature_width(&self, node_type: &str) -> Option<usize> {
        let t = self.type_names.iter().position(|t| t == node_type)?;
        Some(self.feature_widths[t])
    }
}

fn ordered(u: usize, v: usize) -> (usize, usize) {
    if u <= v {
        (u, v)
    } else {
        (v, u)
    }
}

/// Builder for [`TypedGraph`]. Nodes first (per type), then edges; every edge
/// endpoint must name an already-added node.
#[derive(Default)]
pub struct GraphBuilder {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    type_names: Vec<String>,
    node_types: Vec<usize>,
    features: Vec<Vec<f32>>,
    feature_widths: Vec<usize>,
    edges: Vec<(usize, usize)>,
    edge_set: HashSet<(usize, usize)>,
    weights: HashMap<(usize, usize), f32>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn type_index(&mut self, node_type: &str, width: usize) -> usize {
        if let Some(t) = self.type_names.iter().position(|t| t == node_type) {
            return t;
        }
        self.type_names.push(node_type.to_owned());
        self.feature_widths.push(width);
        self.type_names.len() - 1
    }

    pub fn add_node(
        &mut self,
        id: &str,
        node_type: &str,
        features: Vec<f32>,
    ) -> Result<(), SageError> {
        if self.index.contains_key(id) {
            return Err(SageError::DuplicateNode { id: id.to_owned() });
        }
        let t = self.type_index(node_type, features.len());
        if features.len() != self.feature_widths[t] {
            return Err(SageError::FeatureWidth {
                id: id.to_owned(),
                node_type: node_type.to_owned(),
                expected: self.feature_widths[t],
                actual: features.len(),
            });
        }
        let v = self.ids.len();
        self.ids.push(id.to_owned());
        self.index.insert(id.to_owned(), v);
        self.node_types.push(t);
        self.features.push(features);
        Ok(())
    }

    /// Undirected; duplicate edges (either orientation) are deduplicated,
    /// keeping the weight of the first occurrence.
    pub fn add_edge(&mut self, source: &str, target: &str, weight: f32) -> Result<(), SageError> {
        let unknown = |missing: &str| SageError::UnknownNode {
            source: source.to_owned(),
            target: target.to_owned(),
            missing: missing.to_owned(),
        };
        let u = self.index.get(source).copied().ok_or_else(|| unknown(source))?;
        let v = self.index.get(target).copied().ok_or_else(|| unknown(target))?;
        let key = ordered(u, v);
        if self.edge_set.insert(key) {
            self.edges.push(key);
            self.weights.insert(key, weight);
        }
        Ok(())
    }

    /// Add one node per row of `df`, tagged with `node_type`. The id column
    /// may be numeric or string; feature columns must be f32.
    pub fn add_nodes(
        &mut self,
        df: &DataFrame,
        node_type: &str,
        id_col: &str,
        feature_cols: &[String],
    ) -> Result<()> {
        let ids = df.column(id_col)?.cast(&DataType::Utf8)?;
        let ids = ids.utf8()?;
        let columns = df.select_series(feature_cols)?;
        for (row, id) in ids.into_no_null_iter().enumerate() {
            let mut features = Vec::with_capacity(columns.len());
            for col in &columns {
                features.push(col.f32()?.get(row).unwrap_or(0.0));
            }
            self.add_node(id, node_type, features)?;
        }
        Ok(())
    }

    /// Add one undirected edge per row of `df`. Fails with a
    /// referential-integrity error if an endpoint is unknown.
    pub fn add_edges(
        &mut self,
        df: &DataFrame,
        source_col: &str,
        target_col: &str,
        weight_col: Option<&str>,
    ) -> Result<()> {
        let sources = df.column(source_col)?.cast(&DataType::Utf8)?;
        let sources = sources.utf8()?;
        let targets = df.column(target_col)?.cast(&DataType::Utf8)?;
        let targets = targets.utf8()?;
        let weights = match weight_col {
            Some(col) => Some(df.column(col)?.f32()?.clone()),
            None => None,
        };
        for (row, (source, target)) in sources
            .into_no_null_iter()
            .zip(targets.into_no_null_iter())
            .enumerate()
        {
            let weight = match &weights {
                Some(w) => w.get(row).unwrap_or(1.0),
                None => 1.0,
            };
            self.add_edge(source, target, weight)?;
        }
        Ok(())
    }

    pub fn build(self) -> TypedGraph {
        let mut adjacency = vec![Vec::new(); self.ids.len()];
        for &(u, v) in &self.edges {
            adjacency[u].push(v);
            if u != v {
                adjacency[v].push(u);
            }
        }
        TypedGraph {
            ids: self.ids,
            index: self.index,
            type_names: self.type_names,
            node_types: self.node_types,
            features: self.features,
            feature_widths: self.feature_widths,
            adjacency,
            edges: self.edges,
            weights: self.weights,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_graph() -> TypedGraph {
        let mut builder = GraphBuilder::new();
        for id in ["a", "b", "c"] {
            builder.add_node(id, "paper", vec![1.0, 2.0]).unwrap();
        }
        builder.add_edge("a", "b", 1.0).unwrap();
        builder.add_edge("b", "c", 1.0).unwrap();
        builder.build()
    }

    #[test]
    fn neighbor_lookup() {
        let graph = toy_graph();
        let b = graph.node_index("b").unwrap();
        let mut neighbors: Vec<&str> = graph
            .neighbors(b)
            .iter()
            .map(|&v| graph.node_id(v))
            .collect();
        neighbors.sort();
        assert_eq!(neighbors, ["a", "c"]);
        assert_eq!(graph.degree(graph.node_index("a").unwrap()), 1);
    }

    #[test]
    fn duplicate_node_rejected() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", "paper", vec![0.0]).unwrap();
        let err = builder.add_node("a", "paper", vec![0.0]).unwrap_err();
        assert!(matches!(err, SageError::DuplicateNode { .. }));
    }

    #[test]
    fn unknown_endpoint_rejected() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", "paper", vec![0.0]).unwrap();
        let err = builder.add_edge("a", "zzz", 1.0).unwrap_err();
        match err {
            SageError::UnknownNode { missing, .. } => assert_eq!(missing, "zzz"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn inconsistent_feature_width_rejected() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", "paper", vec![0.0, 1.0]).unwrap();
        let err = builder.add_node("b", "paper", vec![0.0]).unwrap_err();
        assert!(matches!(err, SageError::FeatureWidth { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn undirected_dedup() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", "paper", vec![]).unwrap();
        builder.add_node("b", "paper", vec![]).unwrap();
        builder.add_edge("a", "b", 1.0).unwrap();
        builder.add_edge("b", "a", 2.0).unwrap();
        builder.add_edge("a", "b", 3.0).unwrap();
        let graph = builder.build();
        // one distinct (min,max) pair, first weight wins
        assert_eq!(graph.num_edges(), 1);
        let (u, v) = graph.edges()[0];
        assert_eq!(graph.edge_weight(u, v), Some(1.0));
        assert_eq!(graph.edge_weight(v, u), Some(1.0));
    }

    #[test]
    fn bipartite_types() {
        let mut builder = GraphBuilder::new();
        builder.add_node("u_1", "user", vec![0.5]).unwrap();
        builder.add_node("m_1", "movie", vec![1.0, 0.0]).unwrap();
        builder.add_edge("u_1", "m_1", 4.0).unwrap();
        let graph = builder.build();
        assert_eq!(graph.feature_width("user"), Some(1));
        assert_eq!(graph.feature_width("movie"), Some(2));
        assert_eq!(graph.nodes_of_type("user").len(), 1);
        let u = graph.node_index("u_1").unwrap();
        assert_eq!(graph.node_type(graph.neighbors(u)[0]), "movie");
    }
}
