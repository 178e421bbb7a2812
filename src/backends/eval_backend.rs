use crate::dtype::DType;
use serde::{Deserialize, Serialize};

/// Where feature arithmetic and aggregation kernels execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalBackend {
    #[default]
    NDArray,
}

impl core::fmt::Display for EvalBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl EvalBackend {
    pub fn supports_kernel_dtype(&self, dtype: DType) -> bool {
        match self {
            EvalBackend::NDArray => dtype.is_float(),
        }
    }

    /// Blocks until all queued work on the device has completed.
    pub fn sync(&self) {
        match self {
            // ndarray executes eagerly
            EvalBackend::NDArray => {}
        }
    }
}
