use crate::config::ConfigError;
use crate::frame::FrameError;
use crate::graph_index::GraphIndexError;
use crate::kernel::KernelError;
use crate::numeric_tensor::NumericTensorError;
use crate::serialize::SerializationError;
use crate::type_resolver::TypeResolverError;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    TypeResolver(#[from] TypeResolverError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    GraphIndex(#[from] GraphIndexError),
    #[error(transparent)]
    NumericTensor(#[from] NumericTensorError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("relations {0:?} do not share a destination node type")]
    AmbiguousDestination(Vec<String>),
    #[error("{what} has {got} rows but {expected} were selected")]
    ShapeMismatch {
        what: String,
        expected: usize,
        got: usize,
    },
    #[error("{0} is not supported: graph structure is immutable, build a new graph instead")]
    StructuralMutationUnsupported(&'static str),
    #[error("invalid form argument: {0}")]
    InvalidFormArgument(String),
    #[error("field {field:?} cannot be merged: {detail}")]
    MergeSchemaConflict { field: String, detail: String },
    #[error("unknown field {0:?} in batch")]
    UnknownField(String),
    #[error("invalid program: {0}")]
    InvalidProgram(String),
}

impl GraphError {
    /// Any failure to pick a unique node or edge type.
    pub fn is_ambiguous_type(&self) -> bool {
        matches!(
            self,
            GraphError::TypeResolver(
                TypeResolverError::AmbiguousType { .. } | TypeResolverError::AmbiguousEdgeType(_)
            )
        )
    }

    /// Row-count disagreement, raised either by a frame or by a user function.
    pub fn is_shape_mismatch(&self) -> bool {
        matches!(
            self,
            GraphError::ShapeMismatch { .. } | GraphError::Frame(FrameError::ShapeMismatch { .. })
        )
    }

    pub fn is_unknown_type(&self) -> bool {
        matches!(
            self,
            GraphError::TypeResolver(TypeResolverError::UnknownType { .. })
        )
    }
}
