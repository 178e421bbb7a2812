use crate::backends::eval_backend::EvalBackend;
use crate::error::GraphError;
use crate::frame::FeatureMap;
use crate::numeric_tensor::NumericTensor;
use crate::selection::{EdgeId, NodeId};
use crate::type_resolver::CanonicalEdgeType;

/// Rows of one node type handed to a node or reduce function.
///
/// For reduce functions `mailbox` holds every incoming message of each node,
/// shaped `[nodes, degree, ...]`; all nodes of one batch have the same degree.
#[derive(Debug, Clone)]
pub struct NodeBatch {
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) data: FeatureMap,
    pub(crate) mailbox: Option<FeatureMap>,
    pub(crate) ntype: String,
    pub(crate) backend: EvalBackend,
}

impl NodeBatch {
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ntype(&self) -> &str {
        &self.ntype
    }

    pub fn backend(&self) -> &EvalBackend {
        &self.backend
    }

    pub fn data(&self, field: &str) -> Result<&NumericTensor, GraphError> {
        self.data
            .get(field)
            .ok_or_else(|| GraphError::UnknownField(field.to_string()))
    }

    pub fn all_data(&self) -> &FeatureMap {
        &self.data
    }

    pub fn mailbox(&self, field: &str) -> Result<&NumericTensor, GraphError> {
        self.mailbox
            .as_ref()
            .and_then(|m| m.get(field))
            .ok_or_else(|| GraphError::UnknownField(field.to_string()))
    }

    pub fn has_mailbox(&self) -> bool {
        self.mailbox.is_some()
    }
}

/// Rows of one relation's edges, with the features of both endpoints.
#[derive(Debug, Clone)]
pub struct EdgeBatch {
    pub(crate) src_ids: Vec<NodeId>,
    pub(crate) dst_ids: Vec<NodeId>,
    pub(crate) eids: Vec<EdgeId>,
    pub(crate) src: FeatureMap,
    pub(crate) edge: FeatureMap,
    pub(crate) dst: FeatureMap,
    pub(crate) canonical_etype: CanonicalEdgeType,
    pub(crate) backend: EvalBackend,
}

impl EdgeBatch {
    /// `(src, dst, eid)` of every edge in the batch.
    pub fn edges(&self) -> (&[NodeId], &[NodeId], &[EdgeId]) {
        (&self.src_ids, &self.dst_ids, &self.eids)
    }

    pub fn len(&self) -> usize {
        self.eids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eids.is_empty()
    }

    pub fn canonical_etype(&self) -> &CanonicalEdgeType {
        &self.canonical_etype
    }

    pub fn backend(&self) -> &EvalBackend {
        &self.backend
    }

    pub fn src(&self, field: &str) -> Result<&NumericTensor, GraphError> {
        lookup(&self.src, field)
    }

    pub fn dst(&self, field: &str) -> Result<&NumericTensor, GraphError> {
        lookup(&self.dst, field)
    }

    pub fn data(&self, field: &str) -> Result<&NumericTensor, GraphError> {
        lookup(&self.edge, field)
    }
}

fn lookup<'a>(features: &'a FeatureMap, field: &str) -> Result<&'a NumericTensor, GraphError> {
    features
        .get(field)
        .ok_or_else(|| GraphError::UnknownField(field.to_string()))
}
