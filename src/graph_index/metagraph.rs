use crate::type_resolver::{EdgeTypeId, NodeTypeId};

/// Graph over type ids: one node per node type, one edge per canonical edge type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metagraph {
    num_ntypes: usize,
    edges: Vec<(NodeTypeId, NodeTypeId)>,
}

impl Metagraph {
    pub fn new(num_ntypes: usize, edges: Vec<(NodeTypeId, NodeTypeId)>) -> Self {
        Self { num_ntypes, edges }
    }

    pub fn num_ntypes(&self) -> usize {
        self.num_ntypes
    }

    pub fn num_etypes(&self) -> usize {
        self.edges.len()
    }

    pub fn find_edge(&self, etype: EdgeTypeId) -> (NodeTypeId, NodeTypeId) {
        self.edges[etype.index()]
    }

    pub fn edges(&self) -> &[(NodeTypeId, NodeTypeId)] {
        &self.edges
    }

    pub fn in_etypes(&self, ntype: NodeTypeId) -> Vec<EdgeTypeId> {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, (_, d))| *d == ntype)
            .map(|(i, _)| EdgeTypeId::new(i))
            .collect()
    }

    pub fn out_etypes(&self, ntype: NodeTypeId) -> Vec<EdgeTypeId> {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, (s, _))| *s == ntype)
            .map(|(i, _)| EdgeTypeId::new(i))
            .collect()
    }
}
