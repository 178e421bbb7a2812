//! Aggregation over the edges of one relation.
//!
//! `binary_reduce` computes, for every edge, `op(lhs, rhs)` where each operand is
//! read from the source node, destination node or edge row of that edge, then
//! folds the per-edge values into destination rows with a reducer. `copy_reduce`
//! is the single operand case. Both come with an explicit backward pass that
//! takes the state returned by the forward pass.

mod autograd;
mod native;

pub use autograd::{BinaryReduce, BinaryReduceState, CopyReduce, CopyReduceState};

use crate::dtype::DType;
use crate::graph_index::UnitGraph;
use crate::numeric_tensor::NumericTensorError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum TargetCode {
    Src,
    Dst,
    Edge,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Inner product over the last feature axis, which is dropped from the output.
    Dot,
    UseLhs,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Reducer {
    Sum,
    Max,
    Min,
    Mean,
    Prod,
    /// No reduction: one output row per edge.
    None,
}

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("aggregation kernels do not support dtype {0}")]
    UnsupportedDType(DType),
    #[error("operands have different dtypes: {0} and {1}")]
    DTypeMismatch(DType, DType),
    #[error("feature shapes {0:?} and {1:?} are not compatible")]
    IncompatibleFeatureShapes(Vec<usize>, Vec<usize>),
    #[error("{target} row {row} out of range for {rows} rows")]
    RowOutOfRange {
        target: TargetCode,
        row: usize,
        rows: usize,
    },
    #[error("row map for {target} has no entry for id {id}")]
    InvalidMapping { target: TargetCode, id: usize },
    #[error("id {id} does not fit a row map over {len} ids")]
    MapIdOutOfRange { id: u64, len: usize },
    #[error("kernel operands need a leading row axis")]
    ScalarOperand,
    #[error("source and destination arrays differ in length: {0} vs {1}")]
    EndpointLengthMismatch(usize, usize),
    #[error("gradient has shape {got:?}, expected {expected:?}")]
    GradientShape {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error(transparent)]
    NumericTensor(#[from] NumericTensorError),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

/// Edges of one relation in the packed form the kernels consume.
///
/// Edge position `p` connects `src[p]` to `dst[p]` and has edge id `eids[p]`
/// (or `p` when no ids are attached).
#[derive(Debug, Clone)]
pub struct KernelGraph {
    src: Arc<Vec<u64>>,
    dst: Arc<Vec<u64>>,
    eids: Option<Arc<Vec<u64>>>,
    num_src: usize,
    num_dst: usize,
}

impl KernelGraph {
    pub fn new(
        src: Vec<u64>,
        dst: Vec<u64>,
        num_src: usize,
        num_dst: usize,
    ) -> Result<Self, KernelError> {
        if src.len() != dst.len() {
            return Err(KernelError::EndpointLengthMismatch(src.len(), dst.len()));
        }
        Ok(Self {
            src: Arc::new(src),
            dst: Arc::new(dst),
            eids: None,
            num_src,
            num_dst,
        })
    }

    pub fn from_unit_graph(graph: &UnitGraph) -> Self {
        Self {
            src: Arc::new(graph.src().to_vec()),
            dst: Arc::new(graph.dst().to_vec()),
            eids: None,
            num_src: graph.num_src() as usize,
            num_dst: graph.num_dst() as usize,
        }
    }

    pub fn with_edge_ids(mut self, eids: Vec<u64>) -> Result<Self, KernelError> {
        if eids.len() != self.src.len() {
            return Err(KernelError::EndpointLengthMismatch(self.src.len(), eids.len()));
        }
        self.eids = Some(Arc::new(eids));
        Ok(self)
    }

    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    pub fn num_src(&self) -> usize {
        self.num_src
    }

    pub fn num_dst(&self) -> usize {
        self.num_dst
    }

    fn edge_id(&self, p: usize) -> usize {
        match &self.eids {
            Some(eids) => eids[p] as usize,
            None => p,
        }
    }

    /// Row of `target` data touched by edge position `p`, or `None` when the
    /// map marks it as skipped (negative entry).
    fn row(
        &self,
        target: TargetCode,
        p: usize,
        map: Option<&[i64]>,
    ) -> Result<Option<usize>, KernelError> {
        let id = match target {
            TargetCode::Src => self.src[p] as usize,
            TargetCode::Dst => self.dst[p] as usize,
            TargetCode::Edge => self.edge_id(p),
        };
        match map {
            None => Ok(Some(id)),
            Some(m) => {
                let r = *m
                    .get(id)
                    .ok_or(KernelError::InvalidMapping { target, id })?;
                Ok(if r < 0 { None } else { Some(r as usize) })
            }
        }
    }
}

/// Optional id to row remappings for each operand and the output.
/// Entry `map[id]` is the data row for node or edge `id`; negative entries skip.
#[derive(Debug, Clone, Default)]
pub struct RowMaps {
    pub lhs: Option<Arc<Vec<i64>>>,
    pub rhs: Option<Arc<Vec<i64>>>,
    pub out: Option<Arc<Vec<i64>>>,
}

impl RowMaps {
    /// Maps each listed id to its position; every other id up to `len` is skipped.
    pub fn compact(ids: &[u64], len: usize) -> Result<Arc<Vec<i64>>, KernelError> {
        let mut map = vec![-1i64; len];
        for (i, &id) in ids.iter().enumerate() {
            let slot = map
                .get_mut(id as usize)
                .ok_or(KernelError::MapIdOutOfRange { id, len })?;
            *slot = i as i64;
        }
        Ok(Arc::new(map))
    }
}
