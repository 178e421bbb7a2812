//! The graph store: structure, one frame per node type and per edge type, and
//! one message buffer per relation.
//!
//! Every frame sits behind a shared cell so that relation views and type
//! subgraphs can share feature storage with the graph they came from. A store
//! is single-threaded.

mod features;
mod message_passing;
mod query;
mod scope;
mod slicing;

pub use message_passing::{RecvFuncs, RelationFuncs};
pub use query::{EdgeList, Edges};

use crate::config::GraphConfig;
use crate::error::GraphError;
use crate::frame::{zero_initializer, Frame};
use crate::graph_index::{GraphIndexError, HeteroGraphIndex, Metagraph};
use crate::scheduler::{
    EdgeSet, Program, ProgramObserver, RelationAdapter, SharedFrame, SharedIndicator,
};
use crate::scheduler::schedule::NodeSet;
use crate::selection::{EdgeSelection, Selection};
use crate::type_resolver::{CanonicalEdgeType, EdgeTypeId, EdgeTypeKey, NodeTypeId, TypeResolver};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Node field holding the parent id of each node of a derived graph.
pub const NID: &str = "_ID";
/// Edge field holding the parent id of each edge of a derived graph.
pub const EID: &str = "_ID";
/// Node field holding the parent type id of each node of a flattened graph.
pub const NTYPE: &str = "_TYPE";
/// Edge field holding the parent type id of each edge of a flattened graph.
pub const ETYPE: &str = "_TYPE";

pub const DEFAULT_NTYPE: &str = "_N";
pub const DEFAULT_ETYPE: &str = "_E";

pub struct HeteroGraph {
    index: HeteroGraphIndex,
    types: Arc<TypeResolver>,
    node_frames: Vec<SharedFrame>,
    edge_frames: Vec<SharedFrame>,
    msg_frames: Vec<SharedFrame>,
    msg_indicators: Vec<SharedIndicator>,
    config: GraphConfig,
    observer: Option<Rc<RefCell<dyn ProgramObserver>>>,
}

/// Collects node types and relations before building a [`HeteroGraph`].
#[derive(Debug, Clone, Default)]
pub struct HeteroGraphBuilder {
    node_types: Vec<(String, Option<u64>)>,
    relations: Vec<(CanonicalEdgeType, Vec<u64>, Vec<u64>)>,
    config: GraphConfig,
}

impl HeteroGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a node type with an explicit node count.
    pub fn node_type(mut self, name: &str, count: u64) -> Self {
        match self.node_types.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = Some(count),
            None => self.node_types.push((name.to_string(), Some(count))),
        }
        self
    }

    pub fn relation(
        mut self,
        etype: impl Into<CanonicalEdgeType>,
        src: Vec<u64>,
        dst: Vec<u64>,
    ) -> Self {
        self.relations.push((etype.into(), src, dst));
        self
    }

    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Node types are numbered in declaration order, then in order of first
    /// appearance in a relation. Undeclared counts are one past the largest id seen.
    pub fn build(self) -> Result<HeteroGraph, GraphError> {
        let mut node_types = self.node_types;
        for (etype, _, _) in &self.relations {
            for name in [&etype.src_type, &etype.dst_type] {
                if !node_types.iter().any(|(n, _)| n == name) {
                    node_types.push((name.clone(), None));
                }
            }
        }
        let ntypes: Vec<String> = node_types.iter().map(|(n, _)| n.clone()).collect();
        let canonical: Vec<CanonicalEdgeType> =
            self.relations.iter().map(|(c, _, _)| c.clone()).collect();
        let types = TypeResolver::new(ntypes, canonical)?;

        let mut counts: Vec<u64> = node_types.iter().map(|(_, c)| c.unwrap_or(0)).collect();
        for (i, (_, src, dst)) in self.relations.iter().enumerate() {
            if src.len() != dst.len() {
                return Err(GraphIndexError::EndpointLengthMismatch {
                    src: src.len(),
                    dst: dst.len(),
                }
                .into());
            }
            let (s, d) = types.endpoints(EdgeTypeId::new(i));
            for (t, ids) in [(s, src), (d, dst)] {
                if node_types[t.index()].1.is_none() {
                    let needed = ids.iter().max().map_or(0, |m| m + 1);
                    counts[t.index()] = counts[t.index()].max(needed);
                }
            }
        }

        let endpoints = types.edge_type_ids().map(|e| types.endpoints(e)).collect();
        let coo = self
            .relations
            .into_iter()
            .map(|(_, src, dst)| (src, dst))
            .collect();
        let index = HeteroGraphIndex::from_coo(counts, endpoints, coo)?;
        log::debug!(
            "built graph with {} node types and {} edge types",
            index.num_ntypes(),
            index.num_etypes()
        );
        Ok(HeteroGraph::from_index(index, Arc::new(types), self.config))
    }
}

impl HeteroGraph {
    /// A graph with one node type and one edge type.
    pub fn homogeneous(num_nodes: u64, src: Vec<u64>, dst: Vec<u64>) -> Result<Self, GraphError> {
        HeteroGraphBuilder::new()
            .node_type(DEFAULT_NTYPE, num_nodes)
            .relation((DEFAULT_NTYPE, DEFAULT_ETYPE, DEFAULT_NTYPE), src, dst)
            .build()
    }

    /// A graph with one relation between two distinct node types.
    pub fn bipartite(
        etype: impl Into<CanonicalEdgeType>,
        num_src: u64,
        num_dst: u64,
        src: Vec<u64>,
        dst: Vec<u64>,
    ) -> Result<Self, GraphError> {
        let etype = etype.into();
        HeteroGraphBuilder::new()
            .node_type(&etype.src_type, num_src)
            .node_type(&etype.dst_type, num_dst)
            .relation(etype, src, dst)
            .build()
    }

    fn new_frame(rows: u64, config: &GraphConfig) -> Frame {
        Frame::new(rows as usize)
            .with_backend(config.backend)
            .with_zero_fill(config.zero_fill_missing_fields)
    }

    fn from_index(index: HeteroGraphIndex, types: Arc<TypeResolver>, config: GraphConfig) -> Self {
        let node_frames = types
            .node_type_ids()
            .map(|t| Rc::new(RefCell::new(Self::new_frame(index.number_of_nodes(t), &config))))
            .collect();
        let edge_frames = types
            .edge_type_ids()
            .map(|e| Rc::new(RefCell::new(Self::new_frame(index.number_of_edges(e), &config))))
            .collect();
        Self::from_frames(index, types, node_frames, edge_frames, config)
    }

    /// Assembles a store over existing frames. Message buffers start empty.
    fn from_frames(
        index: HeteroGraphIndex,
        types: Arc<TypeResolver>,
        node_frames: Vec<SharedFrame>,
        edge_frames: Vec<SharedFrame>,
        config: GraphConfig,
    ) -> Self {
        let mut msg_frames = Vec::with_capacity(index.num_etypes());
        let mut msg_indicators = Vec::with_capacity(index.num_etypes());
        for e in types.edge_type_ids() {
            let num_edges = index.number_of_edges(e);
            let mut frame = Self::new_frame(num_edges, &config);
            frame.set_initializer(zero_initializer(), None);
            msg_frames.push(Rc::new(RefCell::new(frame)));
            msg_indicators.push(Rc::new(RefCell::new(vec![false; num_edges as usize])));
        }
        Self {
            index,
            types,
            node_frames,
            edge_frames,
            msg_frames,
            msg_indicators,
            config,
            observer: None,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn index(&self) -> &HeteroGraphIndex {
        &self.index
    }

    pub fn type_resolver(&self) -> &TypeResolver {
        &self.types
    }

    pub fn metagraph(&self) -> &Metagraph {
        self.index.metagraph()
    }

    pub fn ntypes(&self) -> &[String] {
        self.types.ntypes()
    }

    pub fn etypes(&self) -> Vec<&str> {
        self.types.etypes()
    }

    pub fn canonical_etypes(&self) -> &[CanonicalEdgeType] {
        self.types.canonical_etypes()
    }

    pub fn to_canonical_etype(
        &self,
        etype: impl Into<EdgeTypeKey>,
    ) -> Result<CanonicalEdgeType, GraphError> {
        Ok(self.types.to_canonical_etype(&etype.into())?.clone())
    }

    /// Observer notified of every program op the store executes from now on.
    pub fn set_program_observer(&mut self, observer: Rc<RefCell<dyn ProgramObserver>>) {
        self.observer = Some(observer);
    }

    pub fn clear_program_observer(&mut self) {
        self.observer = None;
    }

    pub(crate) fn ntype_id(&self, ntype: Option<&str>) -> Result<NodeTypeId, GraphError> {
        Ok(self.types.resolve_node_type(ntype)?)
    }

    pub(crate) fn etype_id(&self, etype: Option<&EdgeTypeKey>) -> Result<EdgeTypeId, GraphError> {
        Ok(self.types.resolve_edge_type(etype)?)
    }

    pub(crate) fn node_frame(&self, ntype: NodeTypeId) -> &SharedFrame {
        &self.node_frames[ntype.index()]
    }

    pub(crate) fn edge_frame(&self, etype: EdgeTypeId) -> &SharedFrame {
        &self.edge_frames[etype.index()]
    }

    pub(crate) fn node_adapter(&self, ntype: NodeTypeId) -> RelationAdapter {
        RelationAdapter::for_nodes(
            self.node_frames[ntype.index()].clone(),
            self.types.node_type_name(ntype),
            &self.config,
        )
    }

    pub(crate) fn relation_adapter(&self, etype: EdgeTypeId) -> RelationAdapter {
        let (s, d) = self.types.endpoints(etype);
        RelationAdapter::for_relation(
            self.index.shared_relation(etype),
            self.types.canonical_etype(etype).clone(),
            self.node_frames[s.index()].clone(),
            self.node_frames[d.index()].clone(),
            self.edge_frames[etype.index()].clone(),
            self.msg_frames[etype.index()].clone(),
            self.msg_indicators[etype.index()].clone(),
            &self.config,
        )
    }

    pub(crate) fn execute(&self, program: &Program, adapter: &RelationAdapter) -> Result<(), GraphError> {
        match &self.observer {
            Some(observer) => program.eval(adapter, &mut *observer.borrow_mut()),
            None => program.eval(adapter, &mut ()),
        }
    }

    pub(crate) fn resolve_nodes(&self, ntype: NodeTypeId, nodes: &Selection) -> Result<NodeSet, GraphError> {
        let count = self.index.number_of_nodes(ntype);
        Ok(match nodes {
            Selection::All => NodeSet::all_nodes(count),
            ids => NodeSet::ids(ids.resolve(count, "node")?),
        })
    }

    /// Expands an edge selection on one relation. Endpoint pairs select every
    /// parallel edge between them; a length-one side is broadcast.
    pub(crate) fn resolve_edges(
        &self,
        etype: EdgeTypeId,
        edges: &EdgeSelection,
    ) -> Result<EdgeSet, GraphError> {
        let relation = self.index.relation(etype);
        match edges {
            EdgeSelection::All => Ok(EdgeSet::all_edges(relation)),
            EdgeSelection::Ids(eids) => {
                let (src, dst) = relation.find_edges(eids)?;
                Ok(EdgeSet {
                    src,
                    dst,
                    eids: eids.clone(),
                    all: false,
                })
            }
            EdgeSelection::Pairs(u, v) => {
                let (u, v) = broadcast_pairs(u, v)?;
                let mut set = EdgeSet::default();
                for (&a, &b) in u.iter().zip(&v) {
                    let eids = relation.edge_ids_between(a, b)?;
                    if eids.is_empty() {
                        return Err(GraphIndexError::NoSuchEdge { src: a, dst: b }.into());
                    }
                    set.src.extend(std::iter::repeat_n(a, eids.len()));
                    set.dst.extend(std::iter::repeat_n(b, eids.len()));
                    set.eids.extend(eids);
                }
                Ok(set)
            }
        }
    }

    pub fn add_nodes(&mut self, _num: u64, _ntype: Option<&str>) -> Result<(), GraphError> {
        Err(GraphError::StructuralMutationUnsupported("add_nodes"))
    }

    pub fn add_edge(&mut self, _u: u64, _v: u64, _etype: Option<EdgeTypeKey>) -> Result<(), GraphError> {
        Err(GraphError::StructuralMutationUnsupported("add_edge"))
    }

    pub fn add_edges(
        &mut self,
        _u: &[u64],
        _v: &[u64],
        _etype: Option<EdgeTypeKey>,
    ) -> Result<(), GraphError> {
        Err(GraphError::StructuralMutationUnsupported("add_edges"))
    }

    pub fn remove_nodes(&mut self, _nodes: &[u64], _ntype: Option<&str>) -> Result<(), GraphError> {
        Err(GraphError::StructuralMutationUnsupported("remove_nodes"))
    }

    pub fn remove_edges(&mut self, _eids: &[u64], _etype: Option<EdgeTypeKey>) -> Result<(), GraphError> {
        Err(GraphError::StructuralMutationUnsupported("remove_edges"))
    }
}

pub(crate) fn broadcast_pairs(u: &[u64], v: &[u64]) -> Result<(Vec<u64>, Vec<u64>), GraphError> {
    match (u.len(), v.len()) {
        (a, b) if a == b => Ok((u.to_vec(), v.to_vec())),
        (1, n) => Ok((vec![u[0]; n], v.to_vec())),
        (n, 1) => Ok((u.to_vec(), vec![v[0]; n])),
        (a, b) => Err(GraphError::InvalidFormArgument(format!(
            "endpoint arrays of length {a} and {b} cannot be paired"
        ))),
    }
}

impl core::fmt::Display for HeteroGraph {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.types.num_ntypes() == 1 && self.types.num_etypes() == 1 {
            let schemes = |frame: &SharedFrame| {
                frame
                    .borrow()
                    .schemes()
                    .into_iter()
                    .map(|(k, s)| format!("{k:?}: {s}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            write!(
                f,
                "Graph(num_nodes={}, num_edges={},\n      ndata_schemes={{{}}}\n      edata_schemes={{{}}})",
                self.index.number_of_nodes(NodeTypeId::new(0)),
                self.index.number_of_edges(EdgeTypeId::new(0)),
                schemes(&self.node_frames[0]),
                schemes(&self.edge_frames[0]),
            )
        } else {
            let nodes = self
                .types
                .node_type_ids()
                .map(|t| format!("{:?}: {}", self.types.node_type_name(t), self.index.number_of_nodes(t)))
                .collect::<Vec<_>>()
                .join(", ");
            let edges = self
                .types
                .edge_type_ids()
                .map(|e| format!("{}: {}", self.types.canonical_etype(e), self.index.number_of_edges(e)))
                .collect::<Vec<_>>()
                .join(", ");
            let meta = self
                .metagraph()
                .edges()
                .iter()
                .map(|(s, d)| {
                    format!(
                        "({}, {})",
                        self.types.node_type_name(*s),
                        self.types.node_type_name(*d)
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            write!(
                f,
                "Graph(num_nodes={{{nodes}}},\n      num_edges={{{edges}}},\n      metagraph=[{meta}])"
            )
        }
    }
}

impl core::fmt::Debug for HeteroGraph {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeteroGraph")
            .field("ntypes", &self.types.ntypes())
            .field("canonical_etypes", &self.types.canonical_etypes())
            .field("config", &self.config)
            .finish()
    }
}
