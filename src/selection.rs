use crate::error::GraphError;
use crate::graph_index::GraphIndexError;
use std::ops::Range;
use std::str::FromStr;

pub type NodeId = u64;
pub type EdgeId = u64;

/// Rows of a node-keyed table: every row, or an explicit id list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    All,
    Ids(Vec<NodeId>),
}

impl Selection {
    pub fn is_all(&self) -> bool {
        matches!(self, Selection::All)
    }

    pub fn len(&self, total: u64) -> usize {
        match self {
            Selection::All => total as usize,
            Selection::Ids(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self, total: u64) -> bool {
        self.len(total) == 0
    }

    /// Expands to explicit ids, checking every id against `total`.
    pub fn resolve(&self, total: u64, kind: &'static str) -> Result<Vec<u64>, GraphIndexError> {
        match self {
            Selection::All => Ok((0..total).collect()),
            Selection::Ids(ids) => {
                if let Some(&id) = ids.iter().find(|&&id| id >= total) {
                    return Err(GraphIndexError::InvalidId {
                        kind,
                        id,
                        count: total,
                    });
                }
                Ok(ids.clone())
            }
        }
    }
}

impl From<Vec<u64>> for Selection {
    fn from(ids: Vec<u64>) -> Self {
        Selection::Ids(ids)
    }
}

impl From<&[u64]> for Selection {
    fn from(ids: &[u64]) -> Self {
        Selection::Ids(ids.to_vec())
    }
}

impl<const N: usize> From<[u64; N]> for Selection {
    fn from(ids: [u64; N]) -> Self {
        Selection::Ids(ids.to_vec())
    }
}

impl From<u64> for Selection {
    fn from(id: u64) -> Self {
        Selection::Ids(vec![id])
    }
}

impl From<Range<u64>> for Selection {
    fn from(range: Range<u64>) -> Self {
        Selection::Ids(range.collect())
    }
}

/// Edges addressed by id, by endpoint pairs, or all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EdgeSelection {
    #[default]
    All,
    Ids(Vec<EdgeId>),
    /// Parallel source and destination lists. A length-one side broadcasts.
    Pairs(Vec<NodeId>, Vec<NodeId>),
}

impl EdgeSelection {
    /// Accepts the row-list form used by loaders: exactly one row of edge ids.
    /// A two-row `[u, v]` list is deliberately not read as pairs.
    pub fn from_rows(rows: &[Vec<u64>]) -> Result<Self, GraphError> {
        match rows {
            [ids] => Ok(EdgeSelection::Ids(ids.clone())),
            _ => Err(GraphError::InvalidFormArgument(format!(
                "expected a single edge id array or a (u, v) pair, got a list of {} arrays",
                rows.len()
            ))),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, EdgeSelection::All)
    }
}

impl From<Vec<u64>> for EdgeSelection {
    fn from(ids: Vec<u64>) -> Self {
        EdgeSelection::Ids(ids)
    }
}

impl<const N: usize> From<[u64; N]> for EdgeSelection {
    fn from(ids: [u64; N]) -> Self {
        EdgeSelection::Ids(ids.to_vec())
    }
}

impl From<u64> for EdgeSelection {
    fn from(id: u64) -> Self {
        EdgeSelection::Ids(vec![id])
    }
}

impl From<Range<u64>> for EdgeSelection {
    fn from(range: Range<u64>) -> Self {
        EdgeSelection::Ids(range.collect())
    }
}

impl From<(Vec<u64>, Vec<u64>)> for EdgeSelection {
    fn from((u, v): (Vec<u64>, Vec<u64>)) -> Self {
        EdgeSelection::Pairs(u, v)
    }
}

impl From<(u64, u64)> for EdgeSelection {
    fn from((u, v): (u64, u64)) -> Self {
        EdgeSelection::Pairs(vec![u], vec![v])
    }
}

/// Return shape of edge queries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::EnumString, strum_macros::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum EdgeForm {
    #[default]
    Uv,
    Eid,
    All,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::EnumString, strum_macros::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum EdgeOrder {
    #[default]
    Eid,
    SrcDst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumString, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum IncidenceKind {
    In,
    Out,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumString, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum GroupBy {
    Src,
    Dst,
}

/// Parses one of the string-named option enums, reporting bad input as a form error.
pub fn parse_form<T: FromStr>(s: &str) -> Result<T, GraphError> {
    T::from_str(s).map_err(|_| {
        GraphError::InvalidFormArgument(format!(
            "{s:?} is not a valid {}",
            std::any::type_name::<T>().rsplit("::").next().unwrap_or("option")
        ))
    })
}
