//! GraphSAGE and HinSAGE tutorial workflows on candle: flat-file ingestion,
//! feature preprocessing, typed graph assembly, sampling-backed batch
//! generation, and link prediction / rating regression heads.

pub mod datasets;
mod error;
pub mod eval;
pub mod graph;
pub mod nn;
pub mod sampling;

pub use error::SageError;
