use crate::backends::eval_backend::EvalBackend;
use crate::dtype::DType;
use crate::numeric_tensor::{NumericTensor, NumericTensorError};
use crate::selection::Selection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub type FeatureMap = HashMap<String, NumericTensor>;

/// Produces values for rows that were never written.
/// Called with the full shape to produce (rows first), the dtype, the backend,
/// and the ids of the rows being synthesized.
pub type Initializer =
    Arc<dyn Fn(&[usize], DType, &EvalBackend, &[u64]) -> Result<NumericTensor, NumericTensorError>>;

pub fn zero_initializer() -> Initializer {
    Arc::new(|shape, dtype, _backend, _ids| Ok(NumericTensor::zeros(shape, dtype)))
}

pub fn constant_initializer(value: f64) -> Initializer {
    Arc::new(move |shape, dtype, _backend, _ids| Ok(NumericTensor::full(shape, dtype, value)))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("field {field:?} expects {expected} rows, got {got}")]
    ShapeMismatch {
        field: String,
        expected: usize,
        got: usize,
    },
    #[error("field {field:?} has scheme {expected}, cannot write {got}")]
    SchemeMismatch {
        field: String,
        expected: Scheme,
        got: Scheme,
    },
    #[error("field {0:?} must have a leading row axis")]
    ScalarColumn(String),
    #[error("unknown field {0:?}")]
    UnknownField(String),
    #[error("field {0:?} has no initializer to fill its unwritten rows")]
    MissingInitializer(String),
    #[error("row {row} out of range for frame with {num_rows} rows")]
    InvalidRow { row: u64, num_rows: usize },
    #[error(transparent)]
    NumericTensorError(#[from] NumericTensorError),
}

/// Shape of one row plus dtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scheme {
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl Scheme {
    pub fn of(tensor: &NumericTensor) -> Self {
        Self {
            shape: tensor.row_shape().to_vec(),
            dtype: tensor.dtype(),
        }
    }
}

impl core::fmt::Display for Scheme {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Scheme(shape={:?}, dtype={})", self.shape, self.dtype)
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    data: NumericTensor,
    // None once every row has been written
    written: Option<Arc<Vec<bool>>>,
}

impl Column {
    pub fn new(data: NumericTensor) -> Self {
        Self {
            data,
            written: None,
        }
    }

    pub fn scheme(&self) -> Scheme {
        Scheme::of(&self.data)
    }

    /// Raw storage. Rows never written hold placeholder values.
    pub fn storage(&self) -> &NumericTensor {
        &self.data
    }

    pub fn is_fully_written(&self) -> bool {
        self.written.is_none()
    }

    fn unwritten_rows(&self) -> Vec<u64> {
        match &self.written {
            None => vec![],
            Some(mask) => mask
                .iter()
                .enumerate()
                .filter(|(_, w)| !**w)
                .map(|(i, _)| i as u64)
                .collect(),
        }
    }
}

/// Columnar feature table with a fixed row count.
#[derive(Clone)]
pub struct Frame {
    num_rows: usize,
    columns: Vec<(String, Column)>,
    initializers: HashMap<String, Initializer>,
    default_initializer: Option<Initializer>,
    zero_fill_missing: bool,
    backend: EvalBackend,
}

impl core::fmt::Debug for Frame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Frame")
            .field("num_rows", &self.num_rows)
            .field("schemes", &self.schemes())
            .field("initializers", &self.initializers.keys().collect::<Vec<_>>())
            .field("has_default_initializer", &self.default_initializer.is_some())
            .finish()
    }
}

impl Frame {
    pub fn new(num_rows: usize) -> Self {
        Self {
            num_rows,
            columns: Vec::new(),
            initializers: HashMap::new(),
            default_initializer: None,
            zero_fill_missing: true,
            backend: EvalBackend::NDArray,
        }
    }

    pub fn with_backend(mut self, backend: EvalBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Whether fields without any initializer are zero-filled instead of failing.
    pub fn with_zero_fill(mut self, zero_fill_missing: bool) -> Self {
        self.zero_fill_missing = zero_fill_missing;
        self
    }

    pub fn from_features(num_rows: usize, features: &FeatureMap) -> Result<Self, FrameError> {
        let mut frame = Self::new(num_rows);
        frame.update(&Selection::All, features)?;
        Ok(frame)
    }

    /// Same row count, initializers and settings, no columns.
    pub fn frame_like(&self) -> Self {
        Self {
            num_rows: self.num_rows,
            columns: Vec::new(),
            initializers: self.initializers.clone(),
            default_initializer: self.default_initializer.clone(),
            zero_fill_missing: self.zero_fill_missing,
            backend: self.backend,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(k, _)| k.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|i| &self.columns[i].1)
    }

    pub fn schemes(&self) -> Vec<(String, Scheme)> {
        self.columns
            .iter()
            .map(|(k, c)| (k.clone(), c.scheme()))
            .collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(k, _)| k == name)
    }

    pub fn set_initializer(&mut self, initializer: Initializer, field: Option<&str>) {
        match field {
            Some(field) => {
                self.initializers.insert(field.to_string(), initializer);
            }
            None => self.default_initializer = Some(initializer),
        }
    }

    /// Initializer registered for exactly this field, ignoring the default.
    pub fn field_initializer(&self, field: &str) -> Option<&Initializer> {
        self.initializers.get(field)
    }

    pub fn initializer(&self, field: &str) -> Option<&Initializer> {
        self.initializers
            .get(field)
            .or(self.default_initializer.as_ref())
    }

    /// Synthesizes rows `ids` of `field` from its initializer.
    pub fn initialize_rows(
        &self,
        field: &str,
        row_shape: &[usize],
        dtype: DType,
        ids: &[u64],
    ) -> Result<NumericTensor, FrameError> {
        let mut shape = vec![ids.len()];
        shape.extend_from_slice(row_shape);
        let value = match self.initializer(field) {
            Some(init) => init(&shape, dtype, &self.backend, ids)?,
            None if self.zero_fill_missing => {
                log::warn!(
                    "field {field:?} has no initializer, filling {} rows with zeros",
                    ids.len()
                );
                NumericTensor::zeros(&shape, dtype)
            }
            None => return Err(FrameError::MissingInitializer(field.to_string())),
        };
        if value.shape() != shape.as_slice() || value.dtype() != dtype {
            return Err(FrameError::SchemeMismatch {
                field: field.to_string(),
                expected: Scheme {
                    shape: row_shape.to_vec(),
                    dtype,
                },
                got: Scheme::of(&value),
            });
        }
        Ok(value)
    }

    fn check_rows(&self, ids: &[u64]) -> Result<(), FrameError> {
        match ids.iter().find(|&&r| r as usize >= self.num_rows) {
            Some(&row) => Err(FrameError::InvalidRow {
                row,
                num_rows: self.num_rows,
            }),
            None => Ok(()),
        }
    }

    /// Whole column with unwritten rows synthesized. Nothing is stored.
    pub fn get(&self, name: &str) -> Result<NumericTensor, FrameError> {
        let column = self
            .column(name)
            .ok_or_else(|| FrameError::UnknownField(name.to_string()))?;
        let missing = column.unwritten_rows();
        if missing.is_empty() {
            return Ok(column.data.clone());
        }
        let fill = self.initialize_rows(
            name,
            column.data.row_shape(),
            column.data.dtype(),
            &missing,
        )?;
        Ok(column.data.scatter_rows(&missing, &fill)?)
    }

    pub fn get_rows(&self, rows: &Selection, name: &str) -> Result<NumericTensor, FrameError> {
        let full = self.get(name)?;
        match rows {
            Selection::All => Ok(full),
            Selection::Ids(ids) => {
                self.check_rows(ids)?;
                Ok(full.gather_rows(ids)?)
            }
        }
    }

    /// Every field restricted to `rows`.
    pub fn select_rows(&self, rows: &Selection) -> Result<FeatureMap, FrameError> {
        self.columns
            .iter()
            .map(|(k, _)| Ok((k.clone(), self.get_rows(rows, k)?)))
            .collect()
    }

    fn prepare(
        &self,
        rows: &Selection,
        name: &str,
        value: &NumericTensor,
    ) -> Result<Option<Column>, FrameError> {
        if value.rank() == 0 {
            return Err(FrameError::ScalarColumn(name.to_string()));
        }
        let ids = match rows {
            Selection::All => {
                if value.num_rows() != self.num_rows {
                    return Err(FrameError::ShapeMismatch {
                        field: name.to_string(),
                        expected: self.num_rows,
                        got: value.num_rows(),
                    });
                }
                return Ok(Some(Column::new(value.clone())));
            }
            Selection::Ids(ids) => ids,
        };
        if value.num_rows() != ids.len() {
            return Err(FrameError::ShapeMismatch {
                field: name.to_string(),
                expected: ids.len(),
                got: value.num_rows(),
            });
        }
        self.check_rows(ids)?;
        if ids.is_empty() {
            return Ok(None);
        }
        let (base, mut written) = match self.column(name) {
            Some(existing) => {
                if existing.scheme() != Scheme::of(value) {
                    return Err(FrameError::SchemeMismatch {
                        field: name.to_string(),
                        expected: existing.scheme(),
                        got: Scheme::of(value),
                    });
                }
                (
                    existing.data.clone(),
                    existing.written.as_ref().map(|w| w.as_ref().clone()),
                )
            }
            None => {
                if self.initializer(name).is_none() && !self.zero_fill_missing {
                    return Err(FrameError::MissingInitializer(name.to_string()));
                }
                let mut shape = vec![self.num_rows];
                shape.extend_from_slice(value.row_shape());
                (
                    NumericTensor::zeros(&shape, value.dtype()),
                    Some(vec![false; self.num_rows]),
                )
            }
        };
        if let Some(mask) = written.as_mut() {
            for &r in ids {
                mask[r as usize] = true;
            }
        }
        Ok(Some(Column {
            data: base.scatter_rows(ids, value)?,
            written: written.filter(|m| !m.iter().all(|w| *w)).map(Arc::new),
        }))
    }

    fn commit(&mut self, name: &str, column: Column) {
        match self.position(name) {
            Some(i) => self.columns[i].1 = column,
            None => self.columns.push((name.to_string(), column)),
        }
    }

    /// Writes one field. Replacing a whole field rebinds the column; a row
    /// subset produces a new column, leaving any clone of the old one intact.
    pub fn set(
        &mut self,
        rows: &Selection,
        name: &str,
        value: &NumericTensor,
    ) -> Result<(), FrameError> {
        if let Some(column) = self.prepare(rows, name, value)? {
            self.commit(name, column);
        }
        Ok(())
    }

    /// Writes several fields. All fields are validated before any is written.
    pub fn update(&mut self, rows: &Selection, features: &FeatureMap) -> Result<(), FrameError> {
        let mut prepared = Vec::with_capacity(features.len());
        for (name, value) in features {
            if let Some(column) = self.prepare(rows, name, value)? {
                prepared.push((name, column));
            }
        }
        for (name, column) in prepared {
            self.commit(name, column);
        }
        Ok(())
    }

    pub fn pop(&mut self, name: &str) -> Result<NumericTensor, FrameError> {
        let value = self.get(name)?;
        if let Some(i) = self.position(name) {
            self.columns.remove(i);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(rows: usize, width: usize, base: f32) -> NumericTensor {
        let v: Vec<f32> = (0..rows * width).map(|i| base + i as f32).collect();
        NumericTensor::from_vec_shape(v, &[rows, width]).unwrap()
    }

    #[test]
    fn partial_write_to_new_field_synthesizes_on_read() {
        let mut f = Frame::new(3);
        f.set_initializer(constant_initializer(7.0), Some("h"));
        f.set(&Selection::from(vec![1]), "h", &col(1, 2, 0.0)).unwrap();
        assert!(!f.column("h").unwrap().is_fully_written());
        let h = f.get("h").unwrap();
        assert_eq!(h.to_vec::<f32>().unwrap(), vec![7.0, 7.0, 0.0, 1.0, 7.0, 7.0]);
        f.set(&Selection::from(vec![0, 2]), "h", &col(2, 2, 10.0)).unwrap();
        assert!(f.column("h").unwrap().is_fully_written());
    }

    #[test]
    fn partial_write_without_initializer_fails_when_zero_fill_is_off() {
        let mut f = Frame::new(3).with_zero_fill(false);
        assert!(matches!(
            f.set(&Selection::from(vec![0]), "h", &col(1, 1, 0.0)),
            Err(FrameError::MissingInitializer(_))
        ));
    }

    #[test]
    fn scheme_mismatch_on_row_update() {
        let mut f = Frame::new(2);
        f.set(&Selection::All, "h", &col(2, 2, 0.0)).unwrap();
        assert!(matches!(
            f.set(&Selection::from(vec![0]), "h", &col(1, 3, 0.0)),
            Err(FrameError::SchemeMismatch { .. })
        ));
    }

    #[test]
    fn pop_removes_field() {
        let mut f = Frame::new(2);
        f.set(&Selection::All, "a", &col(2, 1, 0.0)).unwrap();
        f.set(&Selection::All, "b", &col(2, 1, 0.0)).unwrap();
        f.pop("a").unwrap();
        assert_eq!(f.keys().collect::<Vec<_>>(), vec!["b"]);
        assert!(matches!(f.pop("a"), Err(FrameError::UnknownField(_))));
    }
}
