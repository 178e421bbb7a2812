use ndarray::{ArcArray, ArrayD, ArrayViewD, Axis, IxDyn, ShapeError};
use num_traits::{NumCast, One, Zero};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum NDArrayOperationError {
    #[error(transparent)]
    ShapeError(#[from] ShapeError),
    #[error("index {index} out of bounds for axis of length {len}")]
    OutOfBounds { index: usize, len: usize },
    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },
    #[error("shape mismatch: {0}")]
    IncompatibleShapes(String),
    #[error("operation needs at least one input")]
    EmptyInput,
}

pub(crate) fn reshape<T: Clone>(
    input: &ArcArray<T, IxDyn>,
    shape: &[usize],
) -> Result<ArcArray<T, IxDyn>, NDArrayOperationError> {
    let owned = input.to_owned();
    Ok(owned.into_shape_with_order(IxDyn(shape))?.into_shared())
}

/// Selects rows along axis 0, in the order given (repeats allowed).
pub(crate) fn gather_rows<T: Clone>(
    tensor: &ArcArray<T, IxDyn>,
    rows: &[usize],
) -> Result<ArcArray<T, IxDyn>, NDArrayOperationError> {
    if tensor.ndim() == 0 {
        return Err(NDArrayOperationError::AxisOutOfRange { axis: 0, rank: 0 });
    }
    let len = tensor.shape()[0];
    if let Some(&index) = rows.iter().find(|&&r| r >= len) {
        return Err(NDArrayOperationError::OutOfBounds { index, len });
    }
    Ok(tensor.select(Axis(0), rows).into_shared())
}

/// Returns a copy of `tensor` with `rows` replaced by the rows of `values`.
/// Later duplicates win.
pub(crate) fn scatter_rows<T: Clone>(
    tensor: &ArcArray<T, IxDyn>,
    rows: &[usize],
    values: &ArcArray<T, IxDyn>,
) -> Result<ArcArray<T, IxDyn>, NDArrayOperationError> {
    if tensor.ndim() == 0 || values.ndim() != tensor.ndim() {
        return Err(NDArrayOperationError::IncompatibleShapes(format!(
            "cannot scatter {:?} into {:?}",
            values.shape(),
            tensor.shape()
        )));
    }
    if values.shape()[0] != rows.len() || values.shape()[1..] != tensor.shape()[1..] {
        return Err(NDArrayOperationError::IncompatibleShapes(format!(
            "cannot scatter {:?} into {} rows of {:?}",
            values.shape(),
            rows.len(),
            tensor.shape()
        )));
    }
    let len = tensor.shape()[0];
    let mut out: ArrayD<T> = tensor.to_owned();
    for (i, &r) in rows.iter().enumerate() {
        if r >= len {
            return Err(NDArrayOperationError::OutOfBounds { index: r, len });
        }
        out.index_axis_mut(Axis(0), r)
            .assign(&values.index_axis(Axis(0), i));
    }
    Ok(out.into_shared())
}

pub(crate) fn concat<T: Clone>(
    dim: usize,
    inputs: &[ArcArray<T, IxDyn>],
) -> Result<ArcArray<T, IxDyn>, NDArrayOperationError> {
    let first = inputs.first().ok_or(NDArrayOperationError::EmptyInput)?;
    if dim >= first.ndim() {
        return Err(NDArrayOperationError::AxisOutOfRange {
            axis: dim,
            rank: first.ndim(),
        });
    }
    let views: Vec<ArrayViewD<T>> = inputs.iter().map(|x| x.view()).collect();
    Ok(ndarray::concatenate(Axis(dim), &views)?.into_shared())
}

pub(crate) fn stack<T: Clone>(
    dim: usize,
    inputs: &[ArcArray<T, IxDyn>],
) -> Result<ArcArray<T, IxDyn>, NDArrayOperationError> {
    let first = inputs.first().ok_or(NDArrayOperationError::EmptyInput)?;
    if dim > first.ndim() {
        return Err(NDArrayOperationError::AxisOutOfRange {
            axis: dim,
            rank: first.ndim(),
        });
    }
    let views: Vec<ArrayViewD<T>> = inputs.iter().map(|x| x.view()).collect();
    Ok(ndarray::stack(Axis(dim), &views)?.into_shared())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
    Mean,
    Prod,
}

impl ReduceOp {
    /// Reduces `axis` away. Max and min over an empty axis produce zero.
    pub(crate) fn apply<T>(
        &self,
        tensor: &ArcArray<T, IxDyn>,
        axis: usize,
    ) -> Result<ArcArray<T, IxDyn>, NDArrayOperationError>
    where
        T: Copy + Zero + One + PartialOrd + NumCast + std::ops::Div<Output = T>,
    {
        if axis >= tensor.ndim() {
            return Err(NDArrayOperationError::AxisOutOfRange {
                axis,
                rank: tensor.ndim(),
            });
        }
        let count = tensor.shape()[axis];
        let out = tensor.map_axis(Axis(axis), |lane| match self {
            ReduceOp::Sum => lane.iter().fold(T::zero(), |acc, &x| acc + x),
            ReduceOp::Prod => lane.iter().fold(T::one(), |acc, &x| acc * x),
            ReduceOp::Mean => {
                let sum = lane.iter().fold(T::zero(), |acc, &x| acc + x);
                match T::from(count.max(1)) {
                    Some(divisor) => sum / divisor,
                    None => sum,
                }
            }
            ReduceOp::Max => lane
                .iter()
                .copied()
                .reduce(|a, b| if b > a { b } else { a })
                .unwrap_or_else(T::zero),
            ReduceOp::Min => lane
                .iter()
                .copied()
                .reduce(|a, b| if b < a { b } else { a })
                .unwrap_or_else(T::zero),
        });
        Ok(out.into_shared())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum NativeBinaryOperation {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

pub(crate) fn try_multidirectional_broadcasting(
    a: &[usize],
    b: &[usize],
) -> Result<Vec<usize>, NDArrayOperationError> {
    let rank = a.len().max(b.len());
    let pad = |s: &[usize]| {
        let mut v = vec![1; rank - s.len()];
        v.extend_from_slice(s);
        v
    };
    let (a, b) = (pad(a), pad(b));
    let mut output_dims = Vec::with_capacity(rank);
    for i in 0..rank {
        output_dims.push(if a[i] == b[i] || b[i] == 1 {
            a[i]
        } else if a[i] == 1 {
            b[i]
        } else {
            Err(NDArrayOperationError::IncompatibleShapes(format!(
                "cannot broadcast {a:?} with {b:?}"
            )))?
        });
    }
    Ok(output_dims)
}

impl NativeBinaryOperation {
    pub(crate) fn apply<T>(
        &self,
        a: &ArcArray<T, IxDyn>,
        b: &ArcArray<T, IxDyn>,
    ) -> Result<ArcArray<T, IxDyn>, NDArrayOperationError>
    where
        T: Copy
            + PartialOrd
            + std::ops::Add<Output = T>
            + std::ops::Sub<Output = T>
            + std::ops::Mul<Output = T>
            + std::ops::Div<Output = T>,
    {
        let shape = try_multidirectional_broadcasting(a.shape(), b.shape())?;
        let av = a.broadcast(IxDyn(&shape)).ok_or_else(|| {
            NDArrayOperationError::IncompatibleShapes(format!("{:?} -> {shape:?}", a.shape()))
        })?;
        let bv = b.broadcast(IxDyn(&shape)).ok_or_else(|| {
            NDArrayOperationError::IncompatibleShapes(format!("{:?} -> {shape:?}", b.shape()))
        })?;
        let f = |x: T, y: T| match self {
            NativeBinaryOperation::Add => x + y,
            NativeBinaryOperation::Sub => x - y,
            NativeBinaryOperation::Mul => x * y,
            NativeBinaryOperation::Div => x / y,
            NativeBinaryOperation::Max => {
                if y > x {
                    y
                } else {
                    x
                }
            }
            NativeBinaryOperation::Min => {
                if y < x {
                    y
                } else {
                    x
                }
            }
        };
        let out = ndarray::Zip::from(&av).and(&bv).map_collect(|&x, &y| f(x, y));
        Ok(out.into_shared())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn arr(shape: &[usize], v: Vec<f32>) -> ArcArray<f32, IxDyn> {
        ArrayD::from_shape_vec(IxDyn(shape), v).unwrap().into_shared()
    }

    #[test]
    fn scatter_leaves_input_untouched() {
        let base = arr(&[3, 2], vec![0.0; 6]);
        let vals = arr(&[1, 2], vec![1.0, 2.0]);
        let out = scatter_rows(&base, &[1], &vals).unwrap();
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0, 1.0, 2.0, 0.0, 0.0]);
        assert!(base.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn gather_rejects_out_of_range() {
        let base = arr(&[2, 1], vec![1.0, 2.0]);
        assert!(matches!(
            gather_rows(&base, &[0, 2]),
            Err(NDArrayOperationError::OutOfBounds { index: 2, len: 2 })
        ));
    }

    #[test]
    fn reduce_max_over_middle_axis() {
        let t = arr(&[2, 3, 1], vec![1.0, 5.0, 2.0, -1.0, -3.0, -2.0]);
        let out = ReduceOp::Max.apply(&t, 1).unwrap();
        assert_eq!(out.shape(), &[2, 1]);
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![5.0, -1.0]);
    }

    #[test]
    fn broadcast_mul() {
        let a = arr(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = arr(&[2, 1], vec![10.0, 100.0]);
        let out = NativeBinaryOperation::Mul.apply(&a, &b).unwrap();
        assert_eq!(
            out.iter().copied().collect::<Vec<_>>(),
            vec![10.0, 20.0, 30.0, 400.0, 500.0, 600.0]
        );
    }
}
