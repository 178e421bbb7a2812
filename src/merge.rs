use crate::backends::eval_backend::EvalBackend;
use crate::backends::ndarray_backend::ReduceOp;
use crate::error::GraphError;
use crate::frame::{FeatureMap, Frame, Scheme};
use crate::numeric_tensor::NumericTensor;
use crate::selection::Selection;
use serde::{Deserialize, Serialize};

/// How per-relation outputs aimed at one node type are combined.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum CrossReducer {
    Sum,
    Max,
    Min,
    Mean,
    /// Keeps every contribution on an axis right after the row axis.
    Stack,
}

impl CrossReducer {
    fn reduce_op(&self) -> Option<ReduceOp> {
        match self {
            CrossReducer::Sum => Some(ReduceOp::Sum),
            CrossReducer::Max => Some(ReduceOp::Max),
            CrossReducer::Min => Some(ReduceOp::Min),
            CrossReducer::Mean => Some(ReduceOp::Mean),
            CrossReducer::Stack => None,
        }
    }

    pub fn combine(
        &self,
        field: &str,
        values: &[NumericTensor],
        backend: &EvalBackend,
    ) -> Result<NumericTensor, GraphError> {
        let Some(first) = values.first() else {
            return Err(GraphError::MergeSchemaConflict {
                field: field.to_string(),
                detail: "no values to merge".to_string(),
            });
        };
        if values.len() == 1 {
            return Ok(first.clone());
        }
        let expected = Scheme::of(first);
        if let Some(other) = values.iter().map(Scheme::of).find(|s| *s != expected) {
            return Err(GraphError::MergeSchemaConflict {
                field: field.to_string(),
                detail: format!("{expected} vs {other}"),
            });
        }
        if values.iter().any(|v| v.num_rows() != first.num_rows()) {
            return Err(GraphError::MergeSchemaConflict {
                field: field.to_string(),
                detail: "row counts differ".to_string(),
            });
        }
        match self.reduce_op() {
            None => Ok(NumericTensor::stack(values, 1)?),
            Some(op) => Ok(NumericTensor::stack(values, 0)?.reduce(op, 0, backend)?),
        }
    }
}

/// Merges the given rows of several frames field by field. Fields found in a
/// single frame pass through unchanged; fields in several are combined with
/// `reducer` in frame order.
pub fn merge_frames(
    frames: &[&Frame],
    rows: &Selection,
    reducer: CrossReducer,
    backend: &EvalBackend,
) -> Result<FeatureMap, GraphError> {
    let mut fields: Vec<String> = vec![];
    for frame in frames {
        for key in frame.keys() {
            if !fields.iter().any(|f| f == key) {
                fields.push(key.to_string());
            }
        }
    }
    let mut merged = FeatureMap::new();
    for field in fields {
        let values = frames
            .iter()
            .filter(|f| f.contains(&field))
            .map(|f| f.get_rows(rows, &field))
            .collect::<Result<Vec<_>, _>>()?;
        log::trace!("merging {field:?} from {} frames with {reducer}", values.len());
        let value = reducer.combine(&field, &values, backend)?;
        merged.insert(field, value);
    }
    Ok(merged)
}

/// Name of a merged type: the constituent names sorted and joined with `+`.
pub fn combine_names<S: AsRef<str>>(names: &[S]) -> String {
    let mut names: Vec<&str> = names.iter().map(|n| n.as_ref()).collect();
    names.sort_unstable();
    names.join("+")
}

/// Concatenates the rows of several frames in order, keeping only the fields
/// every frame has.
pub fn combine_frames(frames: &[&Frame]) -> Result<FeatureMap, GraphError> {
    let Some((first, rest)) = frames.split_first() else {
        return Ok(FeatureMap::new());
    };
    let mut combined = FeatureMap::new();
    for field in first.keys().filter(|k| rest.iter().all(|f| f.contains(k))) {
        let values = frames
            .iter()
            .map(|f| f.get(field))
            .collect::<Result<Vec<_>, _>>()?;
        let expected = Scheme::of(&values[0]);
        if let Some(other) = values.iter().map(Scheme::of).find(|s| *s != expected) {
            return Err(GraphError::MergeSchemaConflict {
                field: field.to_string(),
                detail: format!("{expected} vs {other}"),
            });
        }
        combined.insert(field.to_string(), NumericTensor::concat_rows(&values)?);
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_names_are_sorted() {
        assert_eq!(combine_names(&["user", "game"]), "game+user");
        assert_eq!(combine_names(&["follows", "follows"]), "follows+follows");
    }

    fn frame(values: Vec<f32>) -> Frame {
        let n = values.len();
        let mut f = Frame::new(n);
        f.set(
            &Selection::All,
            "h",
            &NumericTensor::from_vec_shape(values, &[n, 1]).unwrap(),
        )
        .unwrap();
        f
    }

    #[test]
    fn stack_keeps_relation_axis_after_rows() {
        let (a, b) = (frame(vec![1.0, 2.0]), frame(vec![3.0, 4.0]));
        let out = merge_frames(&[&a, &b], &Selection::All, CrossReducer::Stack, &EvalBackend::NDArray).unwrap();
        assert_eq!(out["h"].shape(), &[2, 2, 1]);
        assert_eq!(out["h"].to_vec::<f32>().unwrap(), vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn mismatched_schemes_conflict() {
        let a = frame(vec![1.0, 2.0]);
        let mut b = Frame::new(2);
        b.set(&Selection::All, "h", &NumericTensor::from_vec_shape(vec![1.0f64, 2.0], &[2, 1]).unwrap())
            .unwrap();
        let err = merge_frames(&[&a, &b], &Selection::All, CrossReducer::Sum, &EvalBackend::NDArray).unwrap_err();
        assert!(matches!(err, GraphError::MergeSchemaConflict { .. }));
    }
}
