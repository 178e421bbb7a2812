pub mod hetero_index;
pub mod metagraph;
pub mod sparse;
pub mod unit_graph;

pub use hetero_index::{FlattenedIndex, HeteroGraphIndex, SubgraphIndex};
pub use metagraph::Metagraph;
pub use sparse::SparseMatrix;
pub use unit_graph::UnitGraph;

#[derive(Debug, thiserror::Error)]
pub enum GraphIndexError {
    #[error("{kind} id {id} out of range for {count} {kind}s")]
    InvalidId {
        kind: &'static str,
        id: u64,
        count: u64,
    },
    #[error("no edge from {src} to {dst}")]
    NoSuchEdge { src: u64, dst: u64 },
    #[error("source and destination arrays differ in length: {src} vs {dst}")]
    EndpointLengthMismatch { src: usize, dst: usize },
    #[error("relation expects {expected} {side} nodes but its node type has {got}")]
    NodeCountMismatch {
        side: &'static str,
        expected: u64,
        got: u64,
    },
    #[error("a {0} incidence matrix needs the same source and destination node type")]
    IncidenceNeedsHomogeneous(String),
}
