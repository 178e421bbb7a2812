use super::{BinaryOp, KernelError, KernelGraph, Reducer, TargetCode};
use crate::backends::ndarray_backend::ops::try_multidirectional_broadcasting;
use ndarray::{ArcArray, ArrayD, Axis, IxDyn};
use num_traits::Float;

pub(crate) struct Operand<'a, F> {
    pub target: TargetCode,
    pub data: &'a ArcArray<F, IxDyn>,
    pub map: Option<&'a [i64]>,
}

impl<F: Float> Operand<'_, F> {
    fn rows(&self) -> usize {
        self.data.shape()[0]
    }

    fn row_len(&self) -> usize {
        self.data.shape()[1..].iter().product()
    }

    fn flat(&self) -> Vec<F> {
        self.data.iter().copied().collect()
    }

    fn row(&self, graph: &KernelGraph, p: usize) -> Result<Option<usize>, KernelError> {
        let row = graph.row(self.target, p, self.map)?;
        if let Some(row) = row {
            if row >= self.rows() {
                return Err(KernelError::RowOutOfRange {
                    target: self.target,
                    row,
                    rows: self.rows(),
                });
            }
        }
        Ok(row)
    }
}

/// Where the output rows go.
pub(crate) struct OutSpec<'a> {
    pub target: TargetCode,
    pub rows: usize,
    pub map: Option<&'a [i64]>,
}

impl OutSpec<'_> {
    fn row(&self, graph: &KernelGraph, p: usize) -> Result<Option<usize>, KernelError> {
        let row = graph.row(self.target, p, self.map)?;
        if let Some(row) = row {
            if row >= self.rows {
                return Err(KernelError::RowOutOfRange {
                    target: self.target,
                    row,
                    rows: self.rows,
                });
            }
        }
        Ok(row)
    }
}

/// Flat index tables mapping each element of the broadcast feature shape back
/// into the per-row storage of each operand.
#[derive(Debug, Clone)]
pub(crate) struct FeaturePlan {
    pub feat_shape: Vec<usize>,
    pub out_shape: Vec<usize>,
    lhs_index: Vec<usize>,
    rhs_index: Vec<usize>,
    reduce_size: usize,
}

impl FeaturePlan {
    pub(crate) fn new(op: BinaryOp, lhs: &[usize], rhs: &[usize]) -> Result<Self, KernelError> {
        let incompatible = || KernelError::IncompatibleFeatureShapes(lhs.to_vec(), rhs.to_vec());
        let feat_shape = match op {
            BinaryOp::UseLhs => lhs.to_vec(),
            _ => try_multidirectional_broadcasting(lhs, rhs).map_err(|_| incompatible())?,
        };
        let reduce_size = match op {
            BinaryOp::Dot => match (lhs.last(), rhs.last()) {
                (Some(a), Some(b)) if a == b => *a,
                _ => return Err(incompatible()),
            },
            _ => 1,
        };
        let out_shape = match op {
            BinaryOp::Dot => feat_shape[..feat_shape.len() - 1].to_vec(),
            _ => feat_shape.clone(),
        };
        let lhs_index = broadcast_index(&feat_shape, lhs);
        let rhs_index = match op {
            BinaryOp::UseLhs => vec![0; lhs_index.len()],
            _ => broadcast_index(&feat_shape, rhs),
        };
        Ok(Self {
            feat_shape,
            out_shape,
            lhs_index,
            rhs_index,
            reduce_size,
        })
    }

    pub(crate) fn out_len(&self) -> usize {
        self.out_shape.iter().product()
    }

    fn feat_len(&self) -> usize {
        self.feat_shape.iter().product()
    }

    fn edge_value<F: Float>(&self, op: BinaryOp, l: &[F], r: &[F], o: usize) -> F {
        (0..self.reduce_size).fold(F::zero(), |acc, d| {
            let i = o * self.reduce_size + d;
            acc + scalar_op(op, l[self.lhs_index[i]], r[self.rhs_index[i]])
        })
    }
}

fn scalar_op<F: Float>(op: BinaryOp, a: F, b: F) -> F {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul | BinaryOp::Dot => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::UseLhs => a,
    }
}

/// For every element of `full`, the row-major offset of the element of
/// `part` it was broadcast from.
fn broadcast_index(full: &[usize], part: &[usize]) -> Vec<usize> {
    let total: usize = full.iter().product();
    let pad = full.len() - part.len();
    let mut strides = vec![0usize; part.len()];
    let mut s = 1;
    for i in (0..part.len()).rev() {
        strides[i] = s;
        s *= part[i];
    }
    (0..total)
        .map(|flat| {
            let mut rem = flat;
            let mut idx = 0;
            for d in (0..full.len()).rev() {
                let coord = rem % full[d];
                rem /= full[d];
                if d >= pad && part[d - pad] != 1 {
                    idx += coord * strides[d - pad];
                }
            }
            idx
        })
        .collect()
}

fn reducer_identity<F: Float>(reducer: Reducer) -> F {
    match reducer {
        Reducer::Sum | Reducer::Mean | Reducer::None => F::zero(),
        Reducer::Prod => F::one(),
        Reducer::Max => F::neg_infinity(),
        Reducer::Min => F::infinity(),
    }
}

/// Forward kernel. Rows of the output that receive no edge are zero.
pub(crate) fn binary_op_reduce<F: Float>(
    reducer: Reducer,
    op: BinaryOp,
    graph: &KernelGraph,
    lhs: &Operand<F>,
    rhs: &Operand<F>,
    out: &OutSpec,
    plan: &FeaturePlan,
) -> Result<ArrayD<F>, KernelError> {
    let out_len = plan.out_len();
    let (lhs_len, rhs_len) = (lhs.row_len(), rhs.row_len());
    let (l, r) = (lhs.flat(), rhs.flat());
    let mut values = vec![reducer_identity::<F>(reducer); out.rows * out_len];
    let mut touched = vec![false; out.rows];

    for p in 0..graph.num_edges() {
        let Some(orow) = out.row(graph, p)? else {
            continue;
        };
        let (Some(lrow), Some(rrow)) = (lhs.row(graph, p)?, rhs.row(graph, p)?) else {
            continue;
        };
        touched[orow] = true;
        let l_row = &l[lrow * lhs_len..(lrow + 1) * lhs_len];
        let r_row = &r[rrow * rhs_len..(rrow + 1) * rhs_len];
        for o in 0..out_len {
            let v = plan.edge_value(op, l_row, r_row, o);
            let slot = &mut values[orow * out_len + o];
            *slot = match reducer {
                Reducer::Sum | Reducer::Mean => *slot + v,
                Reducer::Prod => *slot * v,
                Reducer::Max => slot.max(v),
                Reducer::Min => slot.min(v),
                Reducer::None => v,
            };
        }
    }

    for (row, _) in touched.iter().enumerate().filter(|(_, t)| !**t) {
        values[row * out_len..(row + 1) * out_len].fill(F::zero());
    }

    let mut shape = vec![out.rows];
    shape.extend_from_slice(&plan.out_shape);
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Lhs,
    Rhs,
}

fn op_derivative<F: Float>(side: Side, op: BinaryOp, a: F, b: F) -> F {
    match (side, op) {
        (Side::Lhs, BinaryOp::Add | BinaryOp::Sub | BinaryOp::UseLhs) => F::one(),
        (Side::Lhs, BinaryOp::Mul | BinaryOp::Dot) => b,
        (Side::Lhs, BinaryOp::Div) => F::one() / b,
        (Side::Rhs, BinaryOp::Add) => F::one(),
        (Side::Rhs, BinaryOp::Sub) => -F::one(),
        (Side::Rhs, BinaryOp::Mul | BinaryOp::Dot) => a,
        (Side::Rhs, BinaryOp::Div) => -a / (b * b),
        (Side::Rhs, BinaryOp::UseLhs) => F::zero(),
    }
}

/// Gradient of the forward kernel with respect to one operand, laid out as
/// `(operand rows, broadcast feature shape)`. `grad_out` must already be
/// divided by the degrees for mean.
#[allow(clippy::too_many_arguments)]
pub(crate) fn backward_binary_op_reduce<F: Float>(
    side: Side,
    reducer: Reducer,
    op: BinaryOp,
    graph: &KernelGraph,
    lhs: &Operand<F>,
    rhs: &Operand<F>,
    out: &OutSpec,
    plan: &FeaturePlan,
    out_data: &[F],
    grad_out: &[F],
) -> Result<ArrayD<F>, KernelError> {
    let out_len = plan.out_len();
    let feat_len = plan.feat_len();
    let (lhs_len, rhs_len) = (lhs.row_len(), rhs.row_len());
    let (l, r) = (lhs.flat(), rhs.flat());
    let grad_rows = match side {
        Side::Lhs => lhs.rows(),
        Side::Rhs => rhs.rows(),
    };
    let mut grad = vec![F::zero(); grad_rows * feat_len];

    for p in 0..graph.num_edges() {
        let Some(orow) = out.row(graph, p)? else {
            continue;
        };
        let (Some(lrow), Some(rrow)) = (lhs.row(graph, p)?, rhs.row(graph, p)?) else {
            continue;
        };
        let l_row = &l[lrow * lhs_len..(lrow + 1) * lhs_len];
        let r_row = &r[rrow * rhs_len..(rrow + 1) * rhs_len];
        let grow = match side {
            Side::Lhs => lrow,
            Side::Rhs => rrow,
        };
        for o in 0..out_len {
            let g = grad_out[orow * out_len + o];
            let e = plan.edge_value(op, l_row, r_row, o);
            let reduced = out_data[orow * out_len + o];
            let dr = match reducer {
                Reducer::Sum | Reducer::Mean | Reducer::None => F::one(),
                Reducer::Max | Reducer::Min => {
                    if e == reduced {
                        F::one()
                    } else {
                        F::zero()
                    }
                }
                Reducer::Prod => reduced / e,
            };
            for d in 0..plan.reduce_size {
                let i = o * plan.reduce_size + d;
                let a = l_row[plan.lhs_index[i]];
                let b = r_row[plan.rhs_index[i]];
                grad[grow * feat_len + i] =
                    grad[grow * feat_len + i] + g * dr * op_derivative(side, op, a, b);
            }
        }
    }

    let mut shape = vec![grad_rows];
    shape.extend_from_slice(&plan.feat_shape);
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), grad)?)
}

/// Sums a gradient over the feature axes its input was broadcast along and
/// reshapes it to the input's shape.
pub(crate) fn reduce_grad<F: Float>(
    grad: ArrayD<F>,
    shape: &[usize],
) -> Result<ArrayD<F>, KernelError> {
    let grad_shape = grad.shape()[1..].to_vec();
    let in_shape = &shape[1..];
    if grad_shape == in_shape {
        return Ok(grad);
    }
    let pad = grad_shape.len() - in_shape.len();
    let padded: Vec<usize> = std::iter::repeat_n(1, pad)
        .chain(in_shape.iter().copied())
        .collect();
    let mut g = grad;
    for (d, (&gs, &is)) in grad_shape.iter().zip(&padded).enumerate() {
        if gs != is {
            g = g.sum_axis(Axis(d + 1)).insert_axis(Axis(d + 1));
        }
    }
    let g = g.as_standard_layout().into_owned();
    Ok(g.into_shape_with_order(IxDyn(shape))?)
}
