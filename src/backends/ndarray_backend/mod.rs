pub mod ops;

pub use ops::{NDArrayOperationError, NativeBinaryOperation, ReduceOp};
