use std::path::PathBuf;

/// Errors raised by the ingestion and graph-assembly pipeline.
///
/// Everything here is fatal: the pipeline is a single offline pass and no
/// stage retries or recovers from a partial result.
// Implemented by hand rather than via `#[derive(thiserror::Error)]`: the
// derive unconditionally treats the `UnknownNode::source` field as an error
// source (which `String` is not), and offers no way to opt out.
#[derive(Debug)]
pub enum SageError {
    Format { path: PathBuf, message: String },

    DuplicateNode { id: String },

    UnknownNode {
        source: String,
        target: String,
        missing: String,
    },

    FeatureWidth {
        id: String,
        node_type: String,
        expected: usize,
        actual: usize,
    },

    ShapeMismatch {
        hop: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

impl std::fmt::Display for SageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Format { path, message } => {
                write!(f, "format error in {}: {}", path.display(), message)
            }
            Self::DuplicateNode { id } => write!(f, "duplicate node id {id:?}"),
            Self::UnknownNode {
                source,
                target,
                missing,
            } => write!(
                f,
                "edge ({source:?}, {target:?}) references unknown node {missing:?}"
            ),
            Self::FeatureWidth {
                id,
                node_type,
                expected,
                actual,
            } => write!(
                f,
                "node {id:?} of type {node_type:?} has {actual} features, expected {expected}"
            ),
            Self::ShapeMismatch {
                hop,
                expected,
                actual,
            } => write!(
                f,
                "shape mismatch at hop {hop}: expected {expected:?}, got {actual:?}"
            ),
        }
    }
}

impl std::error::Error for SageError {}

impl SageError {
    pub fn format<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Format {
            path: path.into(),
            message: message.into(),
        }
    }
}
