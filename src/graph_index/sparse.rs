use crate::numeric_tensor::{NumericTensor, NumericTensorError};

/// Coordinate-format sparse matrix. Duplicate coordinates add up when densified.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    pub shape: (usize, usize),
    pub rows: Vec<u64>,
    pub cols: Vec<u64>,
    pub values: Vec<f32>,
}

impl SparseMatrix {
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn to_dense(&self) -> Result<NumericTensor, NumericTensorError> {
        let (n, m) = self.shape;
        let mut dense = vec![0f32; n * m];
        for ((&r, &c), &v) in self.rows.iter().zip(&self.cols).zip(&self.values) {
            dense[r as usize * m + c as usize] += v;
        }
        NumericTensor::from_vec_shape(dense, &[n, m])
    }
}
