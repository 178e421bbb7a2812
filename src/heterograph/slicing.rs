use super::{HeteroGraph, EID, ETYPE, NID, NTYPE};
use crate::error::GraphError;
use crate::frame::{FeatureMap, Frame};
use crate::graph_index::SubgraphIndex;
use crate::merge::{combine_frames, combine_names};
use crate::numeric_tensor::NumericTensor;
use crate::scheduler::SharedFrame;
use crate::scheduler::schedule::unique_in_order;
use crate::selection::Selection;
use crate::type_resolver::{
    CanonicalEdgeType, EdgeTypeId, EdgeTypeKey, NodeTypeId, TypeKind, TypeResolver,
    TypeResolverError,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

fn id_column(ids: &[u64]) -> NumericTensor {
    NumericTensor::from_vec(ids.iter().map(|&i| i as i64).collect::<Vec<i64>>())
}

impl HeteroGraph {
    fn owned_frame(&self, rows: usize, features: &FeatureMap, tags: &[(&str, &[u64])]) -> Result<SharedFrame, GraphError> {
        let mut frame = Self::new_frame(rows as u64, &self.config);
        frame.update(&Selection::All, features)?;
        for (name, ids) in tags {
            frame.set(&Selection::All, name, &id_column(ids))?;
        }
        Ok(Rc::new(RefCell::new(frame)))
    }

    /// Copies the rows each derived type keeps and records the parent ids in `_ID`.
    fn from_subgraph_index(&self, sub: SubgraphIndex) -> Result<HeteroGraph, GraphError> {
        let node_frames = self
            .types
            .node_type_ids()
            .map(|t| {
                let ids = &sub.induced_nodes[t.index()];
                let features = self.node_frame(t).borrow().select_rows(&Selection::Ids(ids.clone()))?;
                self.owned_frame(ids.len(), &features, &[(NID, ids.as_slice())])
            })
            .collect::<Result<Vec<_>, GraphError>>()?;
        let edge_frames = self
            .types
            .edge_type_ids()
            .map(|e| {
                let ids = &sub.induced_edges[e.index()];
                let features = self.edge_frame(e).borrow().select_rows(&Selection::Ids(ids.clone()))?;
                self.owned_frame(ids.len(), &features, &[(EID, ids.as_slice())])
            })
            .collect::<Result<Vec<_>, GraphError>>()?;
        Ok(HeteroGraph::from_frames(
            sub.graph,
            self.types.clone(),
            node_frames,
            edge_frames,
            self.config.clone(),
        ))
    }

    /// Node-induced subgraph. Node types not listed keep no nodes. Features
    /// are copied, and `_ID` on every node and edge type holds the parent id.
    pub fn subgraph(&self, nodes: &[(&str, Vec<u64>)]) -> Result<HeteroGraph, GraphError> {
        let mut per_type = vec![vec![]; self.types.num_ntypes()];
        for (ntype, ids) in nodes {
            let t = self.ntype_id(Some(*ntype))?;
            let ids = Selection::Ids(unique_in_order(ids)).resolve(self.index.number_of_nodes(t), "node")?;
            per_type[t.index()] = ids;
        }
        let sub = self.index.node_subgraph(&per_type)?;
        log::debug!(
            "node subgraph keeps {} nodes",
            sub.induced_nodes.iter().map(Vec::len).sum::<usize>()
        );
        self.from_subgraph_index(sub)
    }

    /// Edge-induced subgraph. Edge types not listed keep no edges. Without
    /// `preserve_nodes` only nodes touching a kept edge survive.
    pub fn edge_subgraph(
        &self,
        edges: &[(EdgeTypeKey, Vec<u64>)],
        preserve_nodes: bool,
    ) -> Result<HeteroGraph, GraphError> {
        let mut per_type = vec![vec![]; self.types.num_etypes()];
        for (etype, ids) in edges {
            let e = self.etype_id(Some(etype))?;
            let ids = Selection::Ids(unique_in_order(ids)).resolve(self.index.number_of_edges(e), "edge")?;
            per_type[e.index()] = ids;
        }
        let sub = self.index.edge_subgraph(&per_type, preserve_nodes)?;
        self.from_subgraph_index(sub)
    }

    /// Keeps the given node and edge types, sharing their frames with `self`.
    fn type_subgraph(&self, ntypes: &[NodeTypeId], etypes: &[EdgeTypeId]) -> Result<HeteroGraph, GraphError> {
        let types = TypeResolver::new(
            ntypes.iter().map(|t| self.types.node_type_name(*t).to_string()).collect(),
            etypes.iter().map(|e| self.types.canonical_etype(*e).clone()).collect(),
        )?;
        Ok(HeteroGraph::from_frames(
            self.index.type_subgraph(ntypes, etypes),
            Arc::new(types),
            ntypes.iter().map(|t| self.node_frame(*t).clone()).collect(),
            etypes.iter().map(|e| self.edge_frame(*e).clone()).collect(),
            self.config.clone(),
        ))
    }

    /// The given node types with every relation between them.
    pub fn node_type_subgraph(&self, ntypes: &[&str]) -> Result<HeteroGraph, GraphError> {
        let ntids = ntypes
            .iter()
            .map(|n| self.ntype_id(Some(*n)))
            .collect::<Result<Vec<_>, _>>()?;
        let etids: Vec<EdgeTypeId> = self
            .types
            .edge_type_ids()
            .filter(|e| {
                let (s, d) = self.types.endpoints(*e);
                ntids.contains(&s) && ntids.contains(&d)
            })
            .collect();
        self.type_subgraph(&ntids, &etids)
    }

    /// The given relations with their endpoint types.
    pub fn edge_type_subgraph(&self, etypes: &[EdgeTypeKey]) -> Result<HeteroGraph, GraphError> {
        let etids = etypes
            .iter()
            .map(|e| self.etype_id(Some(e)))
            .collect::<Result<Vec<_>, _>>()?;
        let mut ntids: Vec<NodeTypeId> = etids
            .iter()
            .flat_map(|e| {
                let (s, d) = self.types.endpoints(*e);
                [s, d]
            })
            .collect();
        ntids.sort_unstable();
        ntids.dedup();
        self.type_subgraph(&ntids, &etids)
    }

    /// Relations matching `(src_type, relation, dst_type)`, where `None` is a
    /// wildcard. A single match is a view sharing frames with `self`. Several
    /// matches are flattened into one relation whose type names join the sorted
    /// constituent names with `+`; only fields common to all constituents are
    /// copied, and `_TYPE`/`_ID` record where each node and edge came from.
    pub fn relation(
        &self,
        src_type: Option<&str>,
        relation: Option<&str>,
        dst_type: Option<&str>,
    ) -> Result<HeteroGraph, GraphError> {
        let matches = self.types.match_relations(src_type, relation, dst_type);
        match matches.as_slice() {
            [] => Err(TypeResolverError::UnknownType {
                kind: TypeKind::Edge,
                name: format!(
                    "({}, {}, {})",
                    src_type.unwrap_or("*"),
                    relation.unwrap_or("*"),
                    dst_type.unwrap_or("*")
                ),
            }
            .into()),
            [single] => {
                let (s, d) = self.types.endpoints(*single);
                let ntids = if s == d { vec![s] } else { vec![s, d] };
                self.type_subgraph(&ntids, &[*single])
            }
            several => self.flatten(several),
        }
    }

    fn flatten(&self, etypes: &[EdgeTypeId]) -> Result<HeteroGraph, GraphError> {
        let flat = self.index.flatten_relations(etypes)?;
        let side = |types: &[NodeTypeId], tys: &[u64], ids: &[u64]| -> Result<(String, SharedFrame), GraphError> {
            let name = combine_names(&types.iter().map(|t| self.types.node_type_name(*t)).collect::<Vec<_>>());
            let frames: Vec<_> = types.iter().map(|t| self.node_frame(*t).borrow()).collect();
            let features = combine_frames(&frames.iter().map(|f| &**f).collect::<Vec<&Frame>>())?;
            let frame = self.owned_frame(ids.len(), &features, &[(NTYPE, tys), (NID, ids)])?;
            Ok((name, frame))
        };
        let (src_name, src_frame) = side(&flat.src_types, &flat.induced_srctype, &flat.induced_srcid)?;
        let mut ntypes = vec![src_name.clone()];
        let mut node_frames = vec![src_frame];
        let dst_name = if flat.shared_node_space {
            src_name.clone()
        } else {
            let (dst_name, dst_frame) = side(&flat.dst_types, &flat.induced_dsttype, &flat.induced_dstid)?;
            ntypes.push(dst_name.clone());
            node_frames.push(dst_frame);
            dst_name
        };

        let rel_name = combine_names(
            &etypes
                .iter()
                .map(|e| self.types.edge_type_name(*e))
                .collect::<Vec<_>>(),
        );
        let edge_frame = {
            let frames: Vec<_> = etypes.iter().map(|e| self.edge_frame(*e).borrow()).collect();
            let features = combine_frames(&frames.iter().map(|f| &**f).collect::<Vec<&Frame>>())?;
            self.owned_frame(
                flat.induced_eid.len(),
                &features,
                &[(ETYPE, flat.induced_etype.as_slice()), (EID, flat.induced_eid.as_slice())],
            )?
        };
        log::debug!(
            "flattened {} relations into ({src_name}, {rel_name}, {dst_name})",
            etypes.len()
        );
        let types = TypeResolver::new(ntypes, vec![CanonicalEdgeType::new(&src_name, &rel_name, &dst_name)])?;
        Ok(HeteroGraph::from_frames(
            flat.graph,
            Arc::new(types),
            node_frames,
            vec![edge_frame],
            self.config.clone(),
        ))
    }

    /// Every edge flipped; canonical types swap their endpoint types. Frames are shared.
    pub fn reverse(&self) -> Result<HeteroGraph, GraphError> {
        let reversed = self
            .types
            .canonical_etypes()
            .iter()
            .map(|c| CanonicalEdgeType::new(&c.dst_type, &c.relation, &c.src_type))
            .collect();
        let types = TypeResolver::new(self.types.ntypes().to_vec(), reversed)?;
        Ok(HeteroGraph::from_frames(
            self.index.reverse(),
            Arc::new(types),
            self.node_frames.clone(),
            self.edge_frames.clone(),
            self.config.clone(),
        ))
    }
}
