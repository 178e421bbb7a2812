use crate::backends::eval_backend::EvalBackend;
use crate::backends::ndarray_backend::ops::{
    self, NDArrayOperationError, NativeBinaryOperation, ReduceOp,
};
use crate::dtype::{DType, DTypeOfPrimitive};
use ndarray::{ArcArray, Array1, ArrayD, IxDyn};

#[derive(Debug, thiserror::Error)]
pub enum NumericTensorError {
    #[error("Requested dtype {0}, but had dtype {1}")]
    WrongDType(DType, DType),
    #[error("Operands have different dtypes: {0} and {1}")]
    DTypeMismatch(DType, DType),
    #[error("Unsupported operation {0} for dtype {1}")]
    UnsupportedOperationForDType(String, DType),
    #[error("Cannot reshape tensor from {0:?} to {1:?}")]
    InvalidReshape(Vec<usize>, Vec<usize>),
    #[error("Expected at least one tensor")]
    NoTensors,
    #[error(transparent)]
    NDArrayOperationError(#[from] NDArrayOperationError),
    #[error(transparent)]
    ShapeError(#[from] ndarray::ShapeError),
}

/// A dtype-tagged dense tensor. Clones share storage.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericTensor {
    F64(ArcArray<f64, IxDyn>),
    F32(ArcArray<f32, IxDyn>),
    I64(ArcArray<i64, IxDyn>),
    I32(ArcArray<i32, IxDyn>),
    U8(ArcArray<u8, IxDyn>),
    BOOL(ArcArray<bool, IxDyn>),
}

pub trait TensorElement:
    DTypeOfPrimitive + Copy + PartialEq + std::fmt::Debug + 'static
{
    fn wrap(array: ArcArray<Self, IxDyn>) -> NumericTensor;
    fn unwrap(tensor: &NumericTensor) -> Option<&ArcArray<Self, IxDyn>>;
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! impl_tensor_element {
    ($t:ty, $variant:ident, |$v:ident| $from:expr, |$s:ident| $to:expr) => {
        impl TensorElement for $t {
            fn wrap(array: ArcArray<Self, IxDyn>) -> NumericTensor {
                NumericTensor::$variant(array)
            }
            fn unwrap(tensor: &NumericTensor) -> Option<&ArcArray<Self, IxDyn>> {
                match tensor {
                    NumericTensor::$variant(x) => Some(x),
                    _ => None,
                }
            }
            fn from_f64($v: f64) -> Self {
                $from
            }
            fn to_f64(self) -> f64 {
                let $s = self;
                $to
            }
        }
    };
}

impl_tensor_element!(f64, F64, |v| v, |s| s);
impl_tensor_element!(f32, F32, |v| v as f32, |s| s as f64);
impl_tensor_element!(i64, I64, |v| v as i64, |s| s as f64);
impl_tensor_element!(i32, I32, |v| v as i32, |s| s as f64);
impl_tensor_element!(u8, U8, |v| v as u8, |s| s as f64);
impl_tensor_element!(bool, BOOL, |v| v != 0.0, |s| if s { 1.0 } else { 0.0 });

/// Runs `$body` with `$t` bound to the element type of `$dtype`.
macro_rules! with_dtype {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            DType::F64 => {
                type $t = f64;
                $body
            }
            DType::F32 => {
                type $t = f32;
                $body
            }
            DType::I64 => {
                type $t = i64;
                $body
            }
            DType::I32 => {
                type $t = i32;
                $body
            }
            DType::U8 => {
                type $t = u8;
                $body
            }
            DType::BOOL => {
                type $t = bool;
                $body
            }
        }
    };
}

macro_rules! map_any {
    ($tensor:expr, |$x:ident| $body:expr) => {
        match $tensor {
            NumericTensor::F64($x) => NumericTensor::F64($body),
            NumericTensor::F32($x) => NumericTensor::F32($body),
            NumericTensor::I64($x) => NumericTensor::I64($body),
            NumericTensor::I32($x) => NumericTensor::I32($body),
            NumericTensor::U8($x) => NumericTensor::U8($body),
            NumericTensor::BOOL($x) => NumericTensor::BOOL($body),
        }
    };
}

macro_rules! map_numeric {
    ($tensor:expr, $op:expr, |$x:ident| $body:expr) => {
        match $tensor {
            NumericTensor::F64($x) => NumericTensor::F64($body),
            NumericTensor::F32($x) => NumericTensor::F32($body),
            NumericTensor::I64($x) => NumericTensor::I64($body),
            NumericTensor::I32($x) => NumericTensor::I32($body),
            NumericTensor::U8($x) => NumericTensor::U8($body),
            NumericTensor::BOOL(_) => Err(NumericTensorError::UnsupportedOperationForDType(
                $op.to_string(),
                DType::BOOL,
            ))?,
        }
    };
}

macro_rules! map_float {
    ($tensor:expr, $op:expr, |$x:ident| $body:expr) => {
        match $tensor {
            NumericTensor::F64($x) => NumericTensor::F64($body),
            NumericTensor::F32($x) => NumericTensor::F32($body),
            other => Err(NumericTensorError::UnsupportedOperationForDType(
                $op.to_string(),
                other.dtype(),
            ))?,
        }
    };
}

fn scale_array<T>(x: &ArcArray<T, IxDyn>, s: f64) -> ArcArray<T, IxDyn>
where
    T: TensorElement + std::ops::Mul<Output = T>,
{
    let s = T::from_f64(s);
    x.mapv(|v| v * s).into_shared()
}

fn shift_array<T>(x: &ArcArray<T, IxDyn>, s: f64) -> ArcArray<T, IxDyn>
where
    T: TensorElement + std::ops::Add<Output = T>,
{
    let s = T::from_f64(s);
    x.mapv(|v| v + s).into_shared()
}

fn exp_array<T: num_traits::Float>(x: &ArcArray<T, IxDyn>) -> ArcArray<T, IxDyn> {
    x.mapv(|v| v.exp()).into_shared()
}

fn collect_arrays<T: TensorElement>(
    tensors: &[NumericTensor],
) -> Result<Vec<ArcArray<T, IxDyn>>, NumericTensorError> {
    tensors.iter().map(|t| t.as_array::<T>().cloned()).collect()
}

impl NumericTensor {
    pub fn from_array<T: TensorElement>(array: ArcArray<T, IxDyn>) -> Self {
        T::wrap(array)
    }

    pub fn from_vec<T: TensorElement>(v: Vec<T>) -> Self {
        T::wrap(Array1::from_vec(v).into_dyn().into_shared())
    }

    pub fn from_vec_shape<T: TensorElement>(
        v: Vec<T>,
        shape: &[usize],
    ) -> Result<Self, NumericTensorError> {
        Ok(T::wrap(
            ArrayD::from_shape_vec(IxDyn(shape), v)?.into_shared(),
        ))
    }

    pub fn full(shape: &[usize], dtype: DType, value: f64) -> Self {
        with_dtype!(dtype, T => T::wrap(ArcArray::from_elem(IxDyn(shape), T::from_f64(value))))
    }

    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        Self::full(shape, dtype, 0.0)
    }

    pub fn ones(shape: &[usize], dtype: DType) -> Self {
        Self::full(shape, dtype, 1.0)
    }

    pub fn dtype(&self) -> DType {
        match self {
            NumericTensor::F64(_) => DType::F64,
            NumericTensor::F32(_) => DType::F32,
            NumericTensor::I64(_) => DType::I64,
            NumericTensor::I32(_) => DType::I32,
            NumericTensor::U8(_) => DType::U8,
            NumericTensor::BOOL(_) => DType::BOOL,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            NumericTensor::F64(x) => x.shape(),
            NumericTensor::F32(x) => x.shape(),
            NumericTensor::I64(x) => x.shape(),
            NumericTensor::I32(x) => x.shape(),
            NumericTensor::U8(x) => x.shape(),
            NumericTensor::BOOL(x) => x.shape(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    /// Length of the leading axis. Scalars count as one row.
    pub fn num_rows(&self) -> usize {
        self.shape().first().copied().unwrap_or(1)
    }

    /// Shape of a single row.
    pub fn row_shape(&self) -> &[usize] {
        let shape = self.shape();
        if shape.is_empty() { shape } else { &shape[1..] }
    }

    pub fn num_elements(&self) -> usize {
        self.shape().iter().product()
    }

    /// True when both tensors are views of the same storage with the same shape.
    pub fn ptr_eq(&self, other: &NumericTensor) -> bool {
        match (self, other) {
            (NumericTensor::F64(a), NumericTensor::F64(b)) => {
                a.as_ptr() == b.as_ptr() && a.shape() == b.shape()
            }
            (NumericTensor::F32(a), NumericTensor::F32(b)) => {
                a.as_ptr() == b.as_ptr() && a.shape() == b.shape()
            }
            (NumericTensor::I64(a), NumericTensor::I64(b)) => {
                a.as_ptr() == b.as_ptr() && a.shape() == b.shape()
            }
            (NumericTensor::I32(a), NumericTensor::I32(b)) => {
                a.as_ptr() == b.as_ptr() && a.shape() == b.shape()
            }
            (NumericTensor::U8(a), NumericTensor::U8(b)) => {
                a.as_ptr() == b.as_ptr() && a.shape() == b.shape()
            }
            (NumericTensor::BOOL(a), NumericTensor::BOOL(b)) => {
                a.as_ptr() == b.as_ptr() && a.shape() == b.shape()
            }
            _ => false,
        }
    }

    pub fn as_array<T: TensorElement>(&self) -> Result<&ArcArray<T, IxDyn>, NumericTensorError> {
        T::unwrap(self).ok_or(NumericTensorError::WrongDType(T::DTYPE, self.dtype()))
    }

    pub fn to_vec<T: TensorElement>(&self) -> Result<Vec<T>, NumericTensorError> {
        Ok(self.as_array::<T>()?.iter().copied().collect())
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            NumericTensor::F64(x) => x.iter().copied().collect(),
            NumericTensor::F32(x) => x.iter().map(|v| v.to_f64()).collect(),
            NumericTensor::I64(x) => x.iter().map(|v| v.to_f64()).collect(),
            NumericTensor::I32(x) => x.iter().map(|v| v.to_f64()).collect(),
            NumericTensor::U8(x) => x.iter().map(|v| v.to_f64()).collect(),
            NumericTensor::BOOL(x) => x.iter().map(|v| v.to_f64()).collect(),
        }
    }

    pub fn cast(&self, dtype: DType, _backend: &EvalBackend) -> Result<Self, NumericTensorError> {
        if dtype == self.dtype() {
            return Ok(self.clone());
        }
        let shape = self.shape().to_vec();
        let values = self.to_f64_vec();
        with_dtype!(dtype, T => Self::from_vec_shape(values.into_iter().map(T::from_f64).collect::<Vec<T>>(), &shape))
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<Self, NumericTensorError> {
        if shape.iter().product::<usize>() != self.num_elements() {
            return Err(NumericTensorError::InvalidReshape(
                self.shape().to_vec(),
                shape.to_vec(),
            ));
        }
        Ok(map_any!(self, |x| ops::reshape(x, shape)?))
    }

    pub fn unsqueeze(&self, axis: usize) -> Result<Self, NumericTensorError> {
        let mut shape = self.shape().to_vec();
        if axis > shape.len() {
            return Err(NDArrayOperationError::AxisOutOfRange {
                axis,
                rank: shape.len(),
            }
            .into());
        }
        shape.insert(axis, 1);
        self.reshape(&shape)
    }

    pub fn gather_rows(&self, rows: &[u64]) -> Result<Self, NumericTensorError> {
        let rows: Vec<usize> = rows.iter().map(|&r| r as usize).collect();
        Ok(map_any!(self, |x| ops::gather_rows(x, &rows)?))
    }

    /// Returns a copy with `rows` replaced by the rows of `values`.
    pub fn scatter_rows(
        &self,
        rows: &[u64],
        values: &NumericTensor,
    ) -> Result<Self, NumericTensorError> {
        let rows: Vec<usize> = rows.iter().map(|&r| r as usize).collect();
        if values.dtype() != self.dtype() {
            return Err(NumericTensorError::DTypeMismatch(self.dtype(), values.dtype()));
        }
        with_dtype!(self.dtype(), T => Ok(T::wrap(ops::scatter_rows(
            self.as_array::<T>()?,
            &rows,
            values.as_array::<T>()?,
        )?)))
    }

    pub fn concat(tensors: &[NumericTensor], axis: usize) -> Result<Self, NumericTensorError> {
        let first = tensors.first().ok_or(NumericTensorError::NoTensors)?;
        with_dtype!(first.dtype(), T => Ok(T::wrap(ops::concat(axis, &collect_arrays::<T>(tensors)?)?)))
    }

    pub fn concat_rows(tensors: &[NumericTensor]) -> Result<Self, NumericTensorError> {
        Self::concat(tensors, 0)
    }

    /// Stacks equally shaped tensors along a new axis.
    pub fn stack(tensors: &[NumericTensor], axis: usize) -> Result<Self, NumericTensorError> {
        let first = tensors.first().ok_or(NumericTensorError::NoTensors)?;
        with_dtype!(first.dtype(), T => Ok(T::wrap(ops::stack(axis, &collect_arrays::<T>(tensors)?)?)))
    }

    pub fn reduce(
        &self,
        op: ReduceOp,
        axis: usize,
        _backend: &EvalBackend,
    ) -> Result<Self, NumericTensorError> {
        Ok(map_numeric!(self, op, |x| op.apply(x, axis)?))
    }

    pub fn binary(
        op: NativeBinaryOperation,
        a: &NumericTensor,
        b: &NumericTensor,
        _backend: &EvalBackend,
    ) -> Result<Self, NumericTensorError> {
        Ok(match (a, b) {
            (NumericTensor::F64(a), NumericTensor::F64(b)) => NumericTensor::F64(op.apply(a, b)?),
            (NumericTensor::F32(a), NumericTensor::F32(b)) => NumericTensor::F32(op.apply(a, b)?),
            (NumericTensor::I64(a), NumericTensor::I64(b)) => NumericTensor::I64(op.apply(a, b)?),
            (NumericTensor::I32(a), NumericTensor::I32(b)) => NumericTensor::I32(op.apply(a, b)?),
            (NumericTensor::U8(a), NumericTensor::U8(b)) => NumericTensor::U8(op.apply(a, b)?),
            (NumericTensor::BOOL(_), NumericTensor::BOOL(_)) => Err(
                NumericTensorError::UnsupportedOperationForDType(op.to_string(), DType::BOOL),
            )?,
            (a, b) => Err(NumericTensorError::DTypeMismatch(a.dtype(), b.dtype()))?,
        })
    }

    pub fn add(a: &NumericTensor, b: &NumericTensor, backend: &EvalBackend) -> Result<Self, NumericTensorError> {
        Self::binary(NativeBinaryOperation::Add, a, b, backend)
    }

    pub fn sub(a: &NumericTensor, b: &NumericTensor, backend: &EvalBackend) -> Result<Self, NumericTensorError> {
        Self::binary(NativeBinaryOperation::Sub, a, b, backend)
    }

    pub fn mul(a: &NumericTensor, b: &NumericTensor, backend: &EvalBackend) -> Result<Self, NumericTensorError> {
        Self::binary(NativeBinaryOperation::Mul, a, b, backend)
    }

    pub fn div(a: &NumericTensor, b: &NumericTensor, backend: &EvalBackend) -> Result<Self, NumericTensorError> {
        Self::binary(NativeBinaryOperation::Div, a, b, backend)
    }

    pub fn maximum(a: &NumericTensor, b: &NumericTensor, backend: &EvalBackend) -> Result<Self, NumericTensorError> {
        Self::binary(NativeBinaryOperation::Max, a, b, backend)
    }

    pub fn scale(&self, factor: f64, _backend: &EvalBackend) -> Result<Self, NumericTensorError> {
        Ok(map_numeric!(self, "scale", |x| scale_array(x, factor)))
    }

    pub fn add_scalar(&self, value: f64, _backend: &EvalBackend) -> Result<Self, NumericTensorError> {
        Ok(map_numeric!(self, "add_scalar", |x| shift_array(x, value)))
    }

    pub fn exp(&self, _backend: &EvalBackend) -> Result<Self, NumericTensorError> {
        Ok(map_float!(self, "exp", |x| exp_array(x)))
    }

    /// Indices of the non-zero entries of a rank-1 mask.
    pub fn nonzero_rows(&self) -> Result<Vec<u64>, NumericTensorError> {
        if self.rank() != 1 {
            return Err(NumericTensorError::InvalidReshape(
                self.shape().to_vec(),
                vec![self.num_elements()],
            ));
        }
        Ok(self
            .to_f64_vec()
            .into_iter()
            .enumerate()
            .filter(|(_, v)| *v != 0.0)
            .map(|(i, _)| i as u64)
            .collect())
    }
}

impl<T: TensorElement> From<Vec<T>> for NumericTensor {
    fn from(v: Vec<T>) -> Self {
        NumericTensor::from_vec(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_storage() {
        let a = NumericTensor::from_vec_shape(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        let c = a.scatter_rows(&[0], &NumericTensor::zeros(&[1, 2], DType::F32)).unwrap();
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(c.to_vec::<f32>().unwrap(), vec![0.0, 0.0, 3.0, 4.0]);
    }

    #[test]
    fn cast_int_to_float() {
        let a = NumericTensor::from_vec(vec![1i64, 2, 3]);
        let b = a.cast(DType::F32, &EvalBackend::NDArray).unwrap();
        assert_eq!(b.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn bool_arithmetic_is_rejected() {
        let a = NumericTensor::from_vec(vec![true, false]);
        assert!(matches!(
            NumericTensor::add(&a, &a, &EvalBackend::NDArray),
            Err(NumericTensorError::UnsupportedOperationForDType(_, DType::BOOL))
        ));
    }
}
