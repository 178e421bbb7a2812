//! Message, reduce and apply functions accepted by the message-passing calls.
//!
//! Builtins are plain descriptors. A builtin message paired with a builtin
//! reduce never materialises per-edge messages: the pair runs as one
//! aggregation kernel call.

use crate::backends::eval_backend::EvalBackend;
use crate::backends::ndarray_backend::ReduceOp;
use crate::error::GraphError;
use crate::frame::FeatureMap;
use crate::kernel::{BinaryOp, Reducer, TargetCode};
use crate::numeric_tensor::NumericTensor;
use crate::udf::{EdgeBatch, NodeBatch};
use std::sync::Arc;

type NodeFnInner = dyn Fn(&NodeBatch) -> Result<FeatureMap, GraphError>;
type EdgeFnInner = dyn Fn(&EdgeBatch) -> Result<FeatureMap, GraphError>;

/// User function over a batch of nodes.
#[derive(Clone)]
pub struct NodeFn(Arc<NodeFnInner>);

impl NodeFn {
    pub fn new(f: impl Fn(&NodeBatch) -> Result<FeatureMap, GraphError> + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, batch: &NodeBatch) -> Result<FeatureMap, GraphError> {
        (self.0)(batch)
    }
}

impl core::fmt::Debug for NodeFn {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NodeFn")
    }
}

/// User function over a batch of edges.
#[derive(Clone)]
pub struct EdgeFn(Arc<EdgeFnInner>);

impl EdgeFn {
    pub fn new(f: impl Fn(&EdgeBatch) -> Result<FeatureMap, GraphError> + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, batch: &EdgeBatch) -> Result<FeatureMap, GraphError> {
        (self.0)(batch)
    }
}

impl core::fmt::Debug for EdgeFn {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "EdgeFn")
    }
}

pub type ApplyFunc = NodeFn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinMessage {
    Copy {
        target: TargetCode,
        field: String,
        out: String,
    },
    Binary {
        op: BinaryOp,
        lhs: TargetCode,
        lhs_field: String,
        rhs: TargetCode,
        rhs_field: String,
        out: String,
    },
}

pub fn copy_src(field: &str, out: &str) -> BuiltinMessage {
    BuiltinMessage::Copy {
        target: TargetCode::Src,
        field: field.to_string(),
        out: out.to_string(),
    }
}

pub fn copy_edge(field: &str, out: &str) -> BuiltinMessage {
    BuiltinMessage::Copy {
        target: TargetCode::Edge,
        field: field.to_string(),
        out: out.to_string(),
    }
}

pub fn binary_message(
    op: BinaryOp,
    lhs: TargetCode,
    lhs_field: &str,
    rhs: TargetCode,
    rhs_field: &str,
    out: &str,
) -> BuiltinMessage {
    BuiltinMessage::Binary {
        op,
        lhs,
        lhs_field: lhs_field.to_string(),
        rhs,
        rhs_field: rhs_field.to_string(),
        out: out.to_string(),
    }
}

pub fn src_mul_edge(src_field: &str, edge_field: &str, out: &str) -> BuiltinMessage {
    binary_message(BinaryOp::Mul, TargetCode::Src, src_field, TargetCode::Edge, edge_field, out)
}

pub fn src_add_edge(src_field: &str, edge_field: &str, out: &str) -> BuiltinMessage {
    binary_message(BinaryOp::Add, TargetCode::Src, src_field, TargetCode::Edge, edge_field, out)
}

pub fn src_add_dst(src_field: &str, dst_field: &str, out: &str) -> BuiltinMessage {
    binary_message(BinaryOp::Add, TargetCode::Src, src_field, TargetCode::Dst, dst_field, out)
}

pub fn src_sub_dst(src_field: &str, dst_field: &str, out: &str) -> BuiltinMessage {
    binary_message(BinaryOp::Sub, TargetCode::Src, src_field, TargetCode::Dst, dst_field, out)
}

pub fn src_dot_dst(src_field: &str, dst_field: &str, out: &str) -> BuiltinMessage {
    binary_message(BinaryOp::Dot, TargetCode::Src, src_field, TargetCode::Dst, dst_field, out)
}

pub fn edge_div_dst(edge_field: &str, dst_field: &str, out: &str) -> BuiltinMessage {
    binary_message(BinaryOp::Div, TargetCode::Edge, edge_field, TargetCode::Dst, dst_field, out)
}

impl BuiltinMessage {
    pub fn out_field(&self) -> &str {
        match self {
            BuiltinMessage::Copy { out, .. } | BuiltinMessage::Binary { out, .. } => out,
        }
    }

    /// Materialises the message of every edge in `batch`.
    pub fn compute(&self, batch: &EdgeBatch) -> Result<FeatureMap, GraphError> {
        let backend = batch.backend();
        let value = match self {
            BuiltinMessage::Copy { target, field, .. } => operand(batch, *target, field)?.clone(),
            BuiltinMessage::Binary {
                op,
                lhs,
                lhs_field,
                rhs,
                rhs_field,
                ..
            } => {
                let (a, b) = align_feature_ranks(
                    operand(batch, *lhs, lhs_field)?,
                    operand(batch, *rhs, rhs_field)?,
                )?;
                apply_binary(*op, &a, &b, backend)?
            }
        };
        Ok(FeatureMap::from([(self.out_field().to_string(), value)]))
    }
}

fn operand<'a>(
    batch: &'a EdgeBatch,
    target: TargetCode,
    field: &str,
) -> Result<&'a NumericTensor, GraphError> {
    match target {
        TargetCode::Src => batch.src(field),
        TargetCode::Dst => batch.dst(field),
        TargetCode::Edge => batch.data(field),
    }
}

/// Inserts singleton feature axes after the row axis so both operands have
/// the same rank and broadcast feature-wise.
fn align_feature_ranks(
    a: &NumericTensor,
    b: &NumericTensor,
) -> Result<(NumericTensor, NumericTensor), GraphError> {
    let (mut a, mut b) = (a.clone(), b.clone());
    while a.rank() < b.rank() {
        a = a.unsqueeze(1)?;
    }
    while b.rank() < a.rank() {
        b = b.unsqueeze(1)?;
    }
    Ok((a, b))
}

fn apply_binary(
    op: BinaryOp,
    a: &NumericTensor,
    b: &NumericTensor,
    backend: &EvalBackend,
) -> Result<NumericTensor, GraphError> {
    Ok(match op {
        BinaryOp::Add => NumericTensor::add(a, b, backend)?,
        BinaryOp::Sub => NumericTensor::sub(a, b, backend)?,
        BinaryOp::Mul => NumericTensor::mul(a, b, backend)?,
        BinaryOp::Div => NumericTensor::div(a, b, backend)?,
        BinaryOp::Dot => {
            let product = NumericTensor::mul(a, b, backend)?;
            let last = product.rank() - 1;
            product.reduce(ReduceOp::Sum, last, backend)?
        }
        BinaryOp::UseLhs => a.clone(),
    })
}

#[derive(Debug, Clone)]
pub enum MessageFunc {
    Builtin(BuiltinMessage),
    Udf(EdgeFn),
}

impl MessageFunc {
    pub fn udf(f: impl Fn(&EdgeBatch) -> Result<FeatureMap, GraphError> + 'static) -> Self {
        MessageFunc::Udf(EdgeFn::new(f))
    }

    pub fn compute(&self, batch: &EdgeBatch) -> Result<FeatureMap, GraphError> {
        match self {
            MessageFunc::Builtin(builtin) => builtin.compute(batch),
            MessageFunc::Udf(f) => f.call(batch),
        }
    }
}

impl From<BuiltinMessage> for MessageFunc {
    fn from(value: BuiltinMessage) -> Self {
        MessageFunc::Builtin(value)
    }
}

impl From<EdgeFn> for MessageFunc {
    fn from(value: EdgeFn) -> Self {
        MessageFunc::Udf(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinReduce {
    pub reducer: Reducer,
    pub msg_field: String,
    pub out: String,
}

fn builtin_reduce(reducer: Reducer, msg_field: &str, out: &str) -> BuiltinReduce {
    BuiltinReduce {
        reducer,
        msg_field: msg_field.to_string(),
        out: out.to_string(),
    }
}

pub fn sum(msg_field: &str, out: &str) -> BuiltinReduce {
    builtin_reduce(Reducer::Sum, msg_field, out)
}

pub fn max(msg_field: &str, out: &str) -> BuiltinReduce {
    builtin_reduce(Reducer::Max, msg_field, out)
}

pub fn min(msg_field: &str, out: &str) -> BuiltinReduce {
    builtin_reduce(Reducer::Min, msg_field, out)
}

pub fn mean(msg_field: &str, out: &str) -> BuiltinReduce {
    builtin_reduce(Reducer::Mean, msg_field, out)
}

pub fn prod(msg_field: &str, out: &str) -> BuiltinReduce {
    builtin_reduce(Reducer::Prod, msg_field, out)
}

impl BuiltinReduce {
    fn reduce_op(&self) -> Result<ReduceOp, GraphError> {
        Ok(match self.reducer {
            Reducer::Sum => ReduceOp::Sum,
            Reducer::Max => ReduceOp::Max,
            Reducer::Min => ReduceOp::Min,
            Reducer::Mean => ReduceOp::Mean,
            Reducer::Prod => ReduceOp::Prod,
            Reducer::None => {
                return Err(GraphError::InvalidFormArgument(
                    "reducer \"none\" cannot fold a mailbox".to_string(),
                ));
            }
        })
    }

    /// Folds the degree axis of the mailbox.
    pub fn compute(&self, batch: &NodeBatch) -> Result<FeatureMap, GraphError> {
        let messages = batch.mailbox(&self.msg_field)?;
        let reduced = messages.reduce(self.reduce_op()?, 1, batch.backend())?;
        Ok(FeatureMap::from([(self.out.clone(), reduced)]))
    }
}

#[derive(Debug, Clone)]
pub enum ReduceFunc {
    Builtin(BuiltinReduce),
    Udf(NodeFn),
}

impl ReduceFunc {
    pub fn udf(f: impl Fn(&NodeBatch) -> Result<FeatureMap, GraphError> + 'static) -> Self {
        ReduceFunc::Udf(NodeFn::new(f))
    }

    pub fn compute(&self, batch: &NodeBatch) -> Result<FeatureMap, GraphError> {
        match self {
            ReduceFunc::Builtin(builtin) => builtin.compute(batch),
            ReduceFunc::Udf(f) => f.call(batch),
        }
    }
}

impl From<BuiltinReduce> for ReduceFunc {
    fn from(value: BuiltinReduce) -> Self {
        ReduceFunc::Builtin(value)
    }
}

impl From<NodeFn> for ReduceFunc {
    fn from(value: NodeFn) -> Self {
        ReduceFunc::Udf(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_resolver::CanonicalEdgeType;

    fn batch() -> EdgeBatch {
        let h = NumericTensor::from_vec_shape(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let w = NumericTensor::from_vec_shape(vec![10.0f32, 100.0], &[2]).unwrap();
        EdgeBatch {
            src_ids: vec![0, 1],
            dst_ids: vec![1, 0],
            eids: vec![0, 1],
            src: FeatureMap::from([("h".to_string(), h.clone())]),
            edge: FeatureMap::from([("w".to_string(), w)]),
            dst: FeatureMap::from([("h".to_string(), h)]),
            canonical_etype: CanonicalEdgeType::new("n", "e", "n"),
            backend: EvalBackend::NDArray,
        }
    }

    #[test]
    fn src_mul_edge_broadcasts_scalar_edges() {
        let out = src_mul_edge("h", "w", "m").compute(&batch()).unwrap();
        assert_eq!(out["m"].shape(), &[2, 2]);
        assert_eq!(out["m"].to_vec::<f32>().unwrap(), vec![10.0, 20.0, 300.0, 400.0]);
    }

    #[test]
    fn dot_drops_feature_axis() {
        let out = src_dot_dst("h", "h", "s").compute(&batch()).unwrap();
        assert_eq!(out["s"].shape(), &[2]);
        assert_eq!(out["s"].to_vec::<f32>().unwrap(), vec![5.0, 25.0]);
    }
}
