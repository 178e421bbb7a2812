pub mod backends;
pub mod config;
pub mod dtype;
pub mod error;
pub mod frame;
pub mod function;
pub mod graph_index;
pub mod heterograph;
pub mod kernel;
pub mod merge;
pub mod numeric_tensor;
pub mod scheduler;
pub mod selection;
pub mod serialize;
pub mod type_resolver;
pub mod udf;

pub use backends::eval_backend::EvalBackend;
pub use config::GraphConfig;
pub use dtype::DType;
pub use error::GraphError;
pub use frame::{FeatureMap, Frame, Initializer, Scheme};
pub use heterograph::{HeteroGraph, HeteroGraphBuilder};
pub use merge::CrossReducer;
pub use numeric_tensor::NumericTensor;
pub use selection::{EdgeForm, EdgeOrder, EdgeSelection, GroupBy, IncidenceKind, Selection};
pub use type_resolver::{CanonicalEdgeType, EdgeTypeKey};
