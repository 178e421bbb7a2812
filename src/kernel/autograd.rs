use super::native::{self, FeaturePlan, Operand, OutSpec, Side};
use super::{BinaryOp, KernelError, KernelGraph, Reducer, RowMaps, TargetCode};
use crate::backends::eval_backend::EvalBackend;
use crate::dtype::DType;
use crate::numeric_tensor::{NumericTensor, TensorElement};
use num_traits::Float;
use std::sync::Arc;

macro_rules! float_dispatch {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            DType::F32 => {
                type $t = f32;
                $body
            }
            DType::F64 => {
                type $t = f64;
                $body
            }
            other => Err(KernelError::UnsupportedDType(other)),
        }
    };
}

fn map_slice(map: &Option<Arc<Vec<i64>>>) -> Option<&[i64]> {
    map.as_deref().map(Vec::as_slice)
}

fn check_operands(
    a: &NumericTensor,
    b: &NumericTensor,
    backend: &EvalBackend,
) -> Result<DType, KernelError> {
    if a.rank() == 0 || b.rank() == 0 {
        return Err(KernelError::ScalarOperand);
    }
    if a.dtype() != b.dtype() {
        return Err(KernelError::DTypeMismatch(a.dtype(), b.dtype()));
    }
    if !backend.supports_kernel_dtype(a.dtype()) {
        return Err(KernelError::UnsupportedDType(a.dtype()));
    }
    Ok(a.dtype())
}

fn out_target(reducer: Reducer) -> TargetCode {
    match reducer {
        Reducer::None => TargetCode::Edge,
        _ => TargetCode::Dst,
    }
}

/// Everything the backward pass of [`BinaryReduce`] needs.
#[derive(Debug, Clone)]
pub struct BinaryReduceState {
    reducer: Reducer,
    op: BinaryOp,
    graph: KernelGraph,
    lhs_target: TargetCode,
    rhs_target: TargetCode,
    out_size: usize,
    maps: RowMaps,
    lhs_data: NumericTensor,
    rhs_data: NumericTensor,
    /// Output before any mean normalization.
    reduced: NumericTensor,
    /// Clamped degrees, shaped to broadcast against the output. Only for mean.
    degs: Option<NumericTensor>,
}

impl BinaryReduceState {
    pub fn reducer(&self) -> Reducer {
        self.reducer
    }

    pub fn out_shape(&self) -> &[usize] {
        self.reduced.shape()
    }

    fn out_spec(&self) -> OutSpec<'_> {
        OutSpec {
            target: out_target(self.reducer),
            rows: self.out_size,
            map: map_slice(&self.maps.out),
        }
    }
}

pub struct BinaryReduce;

impl BinaryReduce {
    /// Computes `reducer` over `op(lhs, rhs)` for every edge of `graph`.
    ///
    /// The output has `out_size` rows, indexed by destination node, or by edge
    /// when `reducer` is [`Reducer::None`].
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        reducer: Reducer,
        op: BinaryOp,
        graph: &KernelGraph,
        lhs_target: TargetCode,
        rhs_target: TargetCode,
        lhs_data: &NumericTensor,
        rhs_data: &NumericTensor,
        out_size: usize,
        maps: &RowMaps,
        backend: &EvalBackend,
    ) -> Result<(NumericTensor, BinaryReduceState), KernelError> {
        let dtype = check_operands(lhs_data, rhs_data, backend)?;
        let out = OutSpec {
            target: out_target(reducer),
            rows: out_size,
            map: map_slice(&maps.out),
        };
        let kernel_reducer = match reducer {
            Reducer::Mean => Reducer::Sum,
            other => other,
        };
        let reduced = float_dispatch!(dtype, F => forward_impl::<F>(
            kernel_reducer,
            op,
            graph,
            (lhs_target, lhs_data, map_slice(&maps.lhs)),
            (rhs_target, rhs_data, map_slice(&maps.rhs)),
            &out,
        ))?;

        let (output, degs) = if reducer == Reducer::Mean {
            // Count along whichever operand is not the destination itself.
            let (target, rows, map) = if lhs_target != TargetCode::Dst {
                (lhs_target, lhs_data.num_rows(), map_slice(&maps.lhs))
            } else {
                (rhs_target, rhs_data.num_rows(), map_slice(&maps.rhs))
            };
            let degs = degrees(graph, target, rows, map, &out, &reduced, backend)?;
            (NumericTensor::div(&reduced, &degs, backend)?, Some(degs))
        } else {
            (reduced.clone(), None)
        };
        backend.sync();

        let state = BinaryReduceState {
            reducer,
            op,
            graph: graph.clone(),
            lhs_target,
            rhs_target,
            out_size,
            maps: maps.clone(),
            lhs_data: lhs_data.clone(),
            rhs_data: rhs_data.clone(),
            reduced,
            degs,
        };
        Ok((output, state))
    }

    /// Gradients with respect to `(lhs_data, rhs_data)`, each shaped like its
    /// input. Only the inputs flagged in `needs_input_grad` are computed.
    pub fn backward(
        state: &BinaryReduceState,
        grad_out: &NumericTensor,
        needs_input_grad: [bool; 2],
        backend: &EvalBackend,
    ) -> Result<(Option<NumericTensor>, Option<NumericTensor>), KernelError> {
        if grad_out.shape() != state.out_shape() {
            return Err(KernelError::GradientShape {
                expected: state.out_shape().to_vec(),
                got: grad_out.shape().to_vec(),
            });
        }
        let grad = match &state.degs {
            Some(degs) => NumericTensor::div(grad_out, degs, backend)?,
            None => grad_out.clone(),
        };
        let dtype = grad.dtype();
        let out = state.out_spec();
        let mut grads = [None, None];
        for (slot, side) in [Side::Lhs, Side::Rhs].into_iter().enumerate() {
            if !needs_input_grad[slot] {
                continue;
            }
            grads[slot] = Some(float_dispatch!(dtype, F => backward_impl::<F>(
                side,
                state,
                &out,
                &grad,
            ))?);
        }
        backend.sync();
        let [lhs, rhs] = grads;
        Ok((lhs, rhs))
    }
}

type OperandArgs<'a> = (TargetCode, &'a NumericTensor, Option<&'a [i64]>);

fn forward_impl<F: Float + TensorElement>(
    reducer: Reducer,
    op: BinaryOp,
    graph: &KernelGraph,
    lhs: OperandArgs,
    rhs: OperandArgs,
    out: &OutSpec,
) -> Result<NumericTensor, KernelError> {
    let lhs = Operand {
        target: lhs.0,
        data: lhs.1.as_array::<F>()?,
        map: lhs.2,
    };
    let rhs = Operand {
        target: rhs.0,
        data: rhs.1.as_array::<F>()?,
        map: rhs.2,
    };
    let plan = FeaturePlan::new(op, &lhs.data.shape()[1..], &rhs.data.shape()[1..])?;
    let result = native::binary_op_reduce(reducer, op, graph, &lhs, &rhs, out, &plan)?;
    Ok(NumericTensor::from_array(result.into_shared()))
}

fn backward_impl<F: Float + TensorElement>(
    side: Side,
    state: &BinaryReduceState,
    out: &OutSpec,
    grad_out: &NumericTensor,
) -> Result<NumericTensor, KernelError> {
    let lhs = Operand {
        target: state.lhs_target,
        data: state.lhs_data.as_array::<F>()?,
        map: map_slice(&state.maps.lhs),
    };
    let rhs = Operand {
        target: state.rhs_target,
        data: state.rhs_data.as_array::<F>()?,
        map: map_slice(&state.maps.rhs),
    };
    let plan = FeaturePlan::new(state.op, &lhs.data.shape()[1..], &rhs.data.shape()[1..])?;
    let reducer = match state.reducer {
        Reducer::Mean => Reducer::Sum,
        other => other,
    };
    let out_data = state.reduced.to_vec::<F>()?;
    let grad_out = grad_out.to_vec::<F>()?;
    let grad = native::backward_binary_op_reduce(
        side, reducer, state.op, &state.graph, &lhs, &rhs, out, &plan, &out_data, &grad_out,
    )?;
    let input_shape = match side {
        Side::Lhs => lhs.data.shape(),
        Side::Rhs => rhs.data.shape(),
    };
    let grad = native::reduce_grad(grad, input_shape)?;
    Ok(NumericTensor::from_array(grad.into_shared()))
}

/// Per-output-row edge counts, clamped to at least one and shaped
/// `(out_size, 1, ...)` so they broadcast over `reduced`.
fn degrees(
    graph: &KernelGraph,
    target: TargetCode,
    rows: usize,
    map: Option<&[i64]>,
    out: &OutSpec,
    reduced: &NumericTensor,
    backend: &EvalBackend,
) -> Result<NumericTensor, KernelError> {
    let ones = NumericTensor::ones(&[rows], reduced.dtype());
    let counts = float_dispatch!(reduced.dtype(), F => forward_impl::<F>(
        Reducer::Sum,
        BinaryOp::UseLhs,
        graph,
        (target, &ones, map),
        (target, &ones, map),
        out,
    ))?;
    let mut shape = vec![out.rows];
    shape.extend(std::iter::repeat_n(1, reduced.rank() - 1));
    let counts = counts.reshape(&shape)?;
    let floor = NumericTensor::ones(&shape, reduced.dtype());
    Ok(NumericTensor::maximum(&counts, &floor, backend)?)
}

/// Saved state for [`CopyReduce::backward`].
#[derive(Debug, Clone)]
pub struct CopyReduceState {
    inner: BinaryReduceState,
}

impl CopyReduceState {
    pub fn out_shape(&self) -> &[usize] {
        self.inner.out_shape()
    }
}

pub struct CopyReduce;

impl CopyReduce {
    /// Reduces the `target` rows of `in_data` touched by each edge into `out_size` rows.
    /// Only `maps.lhs` (input) and `maps.out` are consulted.
    pub fn forward(
        reducer: Reducer,
        graph: &KernelGraph,
        target: TargetCode,
        in_data: &NumericTensor,
        out_size: usize,
        maps: &RowMaps,
        backend: &EvalBackend,
    ) -> Result<(NumericTensor, CopyReduceState), KernelError> {
        let maps = RowMaps {
            lhs: maps.lhs.clone(),
            rhs: maps.lhs.clone(),
            out: maps.out.clone(),
        };
        let (out, inner) = BinaryReduce::forward(
            reducer,
            BinaryOp::UseLhs,
            graph,
            target,
            target,
            in_data,
            in_data,
            out_size,
            &maps,
            backend,
        )?;
        Ok((out, CopyReduceState { inner }))
    }

    pub fn backward(
        state: &CopyReduceState,
        grad_out: &NumericTensor,
        backend: &EvalBackend,
    ) -> Result<NumericTensor, KernelError> {
        let (grad, _) = BinaryReduce::backward(&state.inner, grad_out, [true, false], backend)?;
        grad.ok_or(KernelError::ScalarOperand)
    }
}
