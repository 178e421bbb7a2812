use super::HeteroGraph;
use crate::error::GraphError;
use crate::function::{EdgeFn, MessageFunc, NodeFn, ReduceFunc};
use crate::merge::{merge_frames, CrossReducer};
use crate::numeric_tensor::NumericTensor;
use crate::scheduler::schedule::{self, sorted_unique, EdgeSet, NodeSet};
use crate::scheduler::{FrameSlot, Program, RelationAdapter, SharedIndicator};
use crate::selection::{EdgeSelection, GroupBy, Selection};
use crate::type_resolver::{EdgeTypeId, EdgeTypeKey, NodeTypeId};
use crate::udf::{EdgeBatch, NodeBatch};
use std::cell::RefCell;
use std::rc::Rc;

/// Message, reduce and optional apply function for one relation of a multi_* call.
#[derive(Debug, Clone)]
pub struct RelationFuncs {
    pub message: MessageFunc,
    pub reduce: ReduceFunc,
    pub apply: Option<NodeFn>,
}

impl RelationFuncs {
    pub fn new(message: impl Into<MessageFunc>, reduce: impl Into<ReduceFunc>) -> Self {
        Self {
            message: message.into(),
            reduce: reduce.into(),
            apply: None,
        }
    }

    pub fn with_apply(mut self, apply: NodeFn) -> Self {
        self.apply = Some(apply);
        self
    }
}

/// Reduce and optional apply function for one relation of [`HeteroGraph::multi_recv`].
#[derive(Debug, Clone)]
pub struct RecvFuncs {
    pub reduce: ReduceFunc,
    pub apply: Option<NodeFn>,
}

impl RecvFuncs {
    pub fn new(reduce: impl Into<ReduceFunc>) -> Self {
        Self {
            reduce: reduce.into(),
            apply: None,
        }
    }

    pub fn with_apply(mut self, apply: NodeFn) -> Self {
        self.apply = Some(apply);
        self
    }
}

impl HeteroGraph {
    fn run(&self, program: Result<Program, GraphError>, adapter: &RelationAdapter) -> Result<(), GraphError> {
        self.execute(&program?, adapter)
    }

    pub fn apply_nodes(&self, func: &NodeFn, nodes: impl Into<Selection>, ntype: Option<&str>) -> Result<(), GraphError> {
        let t = self.ntype_id(ntype)?;
        let nodes = self.resolve_nodes(t, &nodes.into())?;
        let adapter = self.node_adapter(t);
        self.execute(&schedule::apply_nodes(&nodes, func), &adapter)
    }

    /// Runs `func` on the selected edges and stores its output as edge features.
    /// Builtin message functions are accepted as well.
    pub fn apply_edges(
        &self,
        func: &MessageFunc,
        edges: impl Into<EdgeSelection>,
        etype: Option<EdgeTypeKey>,
    ) -> Result<(), GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let edges = self.resolve_edges(e, &edges.into())?;
        let adapter = self.relation_adapter(e);
        self.execute(&schedule::apply_edges(&edges, func), &adapter)
    }

    /// Runs `func` over all edges, grouped by the chosen endpoint. Groups with
    /// the same number of edges are batched together as `[groups, size, ...]`.
    pub fn group_apply_edges(&self, group_by: GroupBy, func: &EdgeFn, etype: Option<EdgeTypeKey>) -> Result<(), GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let adapter = self.relation_adapter(e);
        self.run(schedule::group_apply_edges(&adapter, group_by, func), &adapter)
    }

    pub fn send(
        &self,
        edges: impl Into<EdgeSelection>,
        message: &MessageFunc,
        etype: Option<EdgeTypeKey>,
    ) -> Result<(), GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let edges = self.resolve_edges(e, &edges.into())?;
        let adapter = self.relation_adapter(e);
        self.execute(&schedule::send(&edges, message), &adapter)
    }

    pub fn recv(
        &self,
        nodes: impl Into<Selection>,
        reduce: &ReduceFunc,
        apply: Option<&NodeFn>,
        etype: Option<EdgeTypeKey>,
    ) -> Result<(), GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let nodes = self.resolve_nodes(self.types.endpoints(e).1, &nodes.into())?;
        let adapter = self.relation_adapter(e);
        self.run(schedule::recv(&adapter, &nodes, reduce, apply), &adapter)
    }

    pub fn send_and_recv(
        &self,
        edges: impl Into<EdgeSelection>,
        message: &MessageFunc,
        reduce: &ReduceFunc,
        apply: Option<&NodeFn>,
        etype: Option<EdgeTypeKey>,
    ) -> Result<(), GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let edges = self.resolve_edges(e, &edges.into())?;
        let adapter = self.relation_adapter(e);
        self.run(schedule::send_and_recv(&adapter, &edges, message, reduce, apply), &adapter)
    }

    pub fn pull(
        &self,
        nodes: impl Into<Selection>,
        message: &MessageFunc,
        reduce: &ReduceFunc,
        apply: Option<&NodeFn>,
        etype: Option<EdgeTypeKey>,
    ) -> Result<(), GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let nodes = self.resolve_nodes(self.types.endpoints(e).1, &nodes.into())?;
        let adapter = self.relation_adapter(e);
        self.run(schedule::pull(&adapter, &nodes, message, reduce, apply), &adapter)
    }

    pub fn push(
        &self,
        nodes: impl Into<Selection>,
        message: &MessageFunc,
        reduce: &ReduceFunc,
        apply: Option<&NodeFn>,
        etype: Option<EdgeTypeKey>,
    ) -> Result<(), GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let nodes = self.resolve_nodes(self.types.endpoints(e).0, &nodes.into())?;
        let adapter = self.relation_adapter(e);
        self.run(schedule::push(&adapter, &nodes, message, reduce, apply), &adapter)
    }

    pub fn update_all(
        &self,
        message: &MessageFunc,
        reduce: &ReduceFunc,
        apply: Option<&NodeFn>,
        etype: Option<EdgeTypeKey>,
    ) -> Result<(), GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let adapter = self.relation_adapter(e);
        self.run(schedule::update_all(&adapter, message, reduce, apply), &adapter)
    }

    /// Pulls once per frontier, strictly in order.
    pub fn prop_nodes<I>(
        &self,
        frontiers: I,
        message: &MessageFunc,
        reduce: &ReduceFunc,
        apply: Option<&NodeFn>,
        etype: Option<EdgeTypeKey>,
    ) -> Result<(), GraphError>
    where
        I: IntoIterator,
        I::Item: Into<Selection>,
    {
        for (step, frontier) in frontiers.into_iter().enumerate() {
            log::debug!("propagating node frontier {step}");
            self.pull(frontier, message, reduce, apply, etype.clone())?;
        }
        Ok(())
    }

    /// Sends and receives once per edge frontier, strictly in order.
    pub fn prop_edges<I>(
        &self,
        frontiers: I,
        message: &MessageFunc,
        reduce: &ReduceFunc,
        apply: Option<&NodeFn>,
        etype: Option<EdgeTypeKey>,
    ) -> Result<(), GraphError>
    where
        I: IntoIterator,
        I::Item: Into<EdgeSelection>,
    {
        for (step, frontier) in frontiers.into_iter().enumerate() {
            log::debug!("propagating edge frontier {step}");
            self.send_and_recv(frontier, message, reduce, apply, etype.clone())?;
        }
        Ok(())
    }

    /// Destination node type shared by every relation in `etypes`.
    fn common_destination(&self, etypes: &[EdgeTypeId]) -> Result<NodeTypeId, GraphError> {
        let names = || {
            etypes
                .iter()
                .map(|e| self.types.canonical_etype(*e).to_string())
                .collect()
        };
        let mut dsts = etypes.iter().map(|e| self.types.endpoints(*e).1);
        let Some(first) = dsts.next() else {
            return Err(GraphError::InvalidFormArgument("no relation given".to_string()));
        };
        if dsts.any(|d| d != first) {
            return Err(GraphError::AmbiguousDestination(names()));
        }
        Ok(first)
    }

    /// Runs one program per relation with reduced rows redirected to a fresh
    /// side frame, merges the side frames over `touched` into the destination
    /// frame, then applies `apply` to the touched nodes. When `touched` covers
    /// the whole type the merged fields replace their columns.
    ///
    /// If any relation, the merge or the destination write fails, every
    /// relation's pending messages are restored and the destination is left
    /// as it was.
    fn multi_dispatch(
        &self,
        dst: NodeTypeId,
        relations: Vec<(EdgeTypeId, RelationAdapter, Program)>,
        touched: NodeSet,
        cross_reducer: CrossReducer,
        apply: Option<&NodeFn>,
    ) -> Result<(), GraphError> {
        let pending: Vec<(SharedIndicator, Vec<bool>)> = relations
            .iter()
            .map(|(_, adapter, _)| -> Result<_, GraphError> {
                let indicator = adapter.indicator()?;
                let snapshot = indicator.borrow().clone();
                Ok((indicator.clone(), snapshot))
            })
            .collect::<Result<_, _>>()?;
        if let Err(err) = self.merge_relations(dst, &relations, &touched, cross_reducer) {
            log::debug!("restoring pending messages of {} relations", pending.len());
            for (indicator, snapshot) in pending {
                *indicator.borrow_mut() = snapshot;
            }
            return Err(err);
        }
        if let Some(apply) = apply {
            let adapter = self.node_adapter(dst);
            self.execute(&schedule::apply_nodes(&touched, apply), &adapter)?;
        }
        Ok(())
    }

    fn merge_relations(
        &self,
        dst: NodeTypeId,
        relations: &[(EdgeTypeId, RelationAdapter, Program)],
        touched: &NodeSet,
        cross_reducer: CrossReducer,
    ) -> Result<(), GraphError> {
        for (e, adapter, program) in relations {
            log::debug!("running {} into a side frame", self.types.canonical_etype(*e));
            self.execute(program, adapter)?;
        }
        if touched.is_empty() {
            return Ok(());
        }
        let rows = touched.selection();
        let merged = {
            let frames = relations
                .iter()
                .map(|(_, a, _)| a.frame(FrameSlot::Out).map(|f| f.borrow()))
                .collect::<Result<Vec<_>, _>>()?;
            let refs: Vec<_> = frames.iter().map(|f| &**f).collect();
            merge_frames(&refs, &rows, cross_reducer, &self.config.backend)?
        };
        self.node_frame(dst).borrow_mut().update(&rows, &merged)?;
        Ok(())
    }

    fn resolve_relations<'a, T>(
        &self,
        per_relation: &'a [(EdgeTypeKey, T)],
    ) -> Result<(NodeTypeId, Vec<(EdgeTypeId, &'a T)>), GraphError> {
        let resolved = per_relation
            .iter()
            .map(|(key, value)| Ok((self.etype_id(Some(key))?, value)))
            .collect::<Result<Vec<_>, GraphError>>()?;
        let etypes: Vec<EdgeTypeId> = resolved.iter().map(|(e, _)| *e).collect();
        Ok((self.common_destination(&etypes)?, resolved))
    }

    fn side_adapter(&self, e: EdgeTypeId, dst: NodeTypeId) -> RelationAdapter {
        let out = Rc::new(RefCell::new(self.node_frame(dst).borrow().frame_like()));
        self.relation_adapter(e).with_out(out)
    }

    pub fn multi_recv(
        &self,
        nodes: impl Into<Selection>,
        per_relation: &[(EdgeTypeKey, RecvFuncs)],
        cross_reducer: CrossReducer,
        apply: Option<&NodeFn>,
    ) -> Result<(), GraphError> {
        let (dst, resolved) = self.resolve_relations(per_relation)?;
        let nodes = self.resolve_nodes(dst, &nodes.into())?;
        let mut relations = Vec::with_capacity(resolved.len());
        for (e, funcs) in resolved {
            let adapter = self.side_adapter(e, dst);
            let program = schedule::recv(&adapter, &nodes, &funcs.reduce, funcs.apply.as_ref())?;
            relations.push((e, adapter, program));
        }
        self.multi_dispatch(dst, relations, nodes.deduplicated(), cross_reducer, apply)
    }

    pub fn multi_send_and_recv(
        &self,
        per_relation: &[(EdgeTypeKey, (EdgeSelection, RelationFuncs))],
        cross_reducer: CrossReducer,
        apply: Option<&NodeFn>,
    ) -> Result<(), GraphError> {
        let (dst, resolved) = self.resolve_relations(per_relation)?;
        let mut relations = Vec::with_capacity(resolved.len());
        let mut receivers = vec![];
        for (e, (edges, funcs)) in resolved {
            let edges: EdgeSet = self.resolve_edges(e, edges)?;
            receivers.extend_from_slice(&edges.dst);
            let adapter = self.side_adapter(e, dst);
            let program = schedule::send_and_recv(
                &adapter,
                &edges,
                &funcs.message,
                &funcs.reduce,
                funcs.apply.as_ref(),
            )?;
            relations.push((e, adapter, program));
        }
        let touched = NodeSet::ids(sorted_unique(&receivers));
        self.multi_dispatch(dst, relations, touched, cross_reducer, apply)
    }

    pub fn multi_pull(
        &self,
        nodes: impl Into<Selection>,
        per_relation: &[(EdgeTypeKey, RelationFuncs)],
        cross_reducer: CrossReducer,
        apply: Option<&NodeFn>,
    ) -> Result<(), GraphError> {
        let (dst, resolved) = self.resolve_relations(per_relation)?;
        let nodes = self.resolve_nodes(dst, &nodes.into())?;
        let mut relations = Vec::with_capacity(resolved.len());
        for (e, funcs) in resolved {
            let adapter = self.side_adapter(e, dst);
            let program = schedule::pull(
                &adapter,
                &nodes,
                &funcs.message,
                &funcs.reduce,
                funcs.apply.as_ref(),
            )?;
            relations.push((e, adapter, program));
        }
        self.multi_dispatch(dst, relations, nodes.deduplicated(), cross_reducer, apply)
    }

    pub fn multi_update_all(
        &self,
        per_relation: &[(EdgeTypeKey, RelationFuncs)],
        cross_reducer: CrossReducer,
        apply: Option<&NodeFn>,
    ) -> Result<(), GraphError> {
        let (dst, resolved) = self.resolve_relations(per_relation)?;
        let mut relations = Vec::with_capacity(resolved.len());
        for (e, funcs) in resolved {
            let adapter = self.side_adapter(e, dst);
            let program = schedule::update_all(
                &adapter,
                &funcs.message,
                &funcs.reduce,
                funcs.apply.as_ref(),
            )?;
            relations.push((e, adapter, program));
        }
        let touched = NodeSet::all_nodes(self.index.number_of_nodes(dst));
        self.multi_dispatch(dst, relations, touched, cross_reducer, apply)
    }

    /// Ids of the selected nodes for which `predicate` returns a non-zero entry.
    pub fn filter_nodes(
        &self,
        predicate: impl Fn(&NodeBatch) -> Result<NumericTensor, GraphError>,
        nodes: impl Into<Selection>,
        ntype: Option<&str>,
    ) -> Result<Vec<u64>, GraphError> {
        let t = self.ntype_id(ntype)?;
        let nodes = self.resolve_nodes(t, &nodes.into())?;
        if nodes.ids.is_empty() {
            return Ok(vec![]);
        }
        let batch = NodeBatch {
            data: self.node_frame(t).borrow().select_rows(&nodes.selection())?,
            nodes: nodes.ids,
            mailbox: None,
            ntype: self.types.node_type_name(t).to_string(),
            backend: self.config.backend,
        };
        let mask = predicate(&batch)?;
        check_mask(&mask, batch.len(), "node predicate")?;
        Ok(mask
            .nonzero_rows()?
            .into_iter()
            .map(|i| batch.nodes[i as usize])
            .collect())
    }

    pub fn filter_edges(
        &self,
        predicate: impl Fn(&EdgeBatch) -> Result<NumericTensor, GraphError>,
        edges: impl Into<EdgeSelection>,
        etype: Option<EdgeTypeKey>,
    ) -> Result<Vec<u64>, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let edges = self.resolve_edges(e, &edges.into())?;
        if edges.is_empty() {
            return Ok(vec![]);
        }
        let (s, d) = self.types.endpoints(e);
        let batch = EdgeBatch {
            src: self.node_frame(s).borrow().select_rows(&Selection::Ids(edges.src.clone()))?,
            edge: self.edge_frame(e).borrow().select_rows(&edges.selection())?,
            dst: self.node_frame(d).borrow().select_rows(&Selection::Ids(edges.dst.clone()))?,
            src_ids: edges.src,
            dst_ids: edges.dst,
            eids: edges.eids,
            canonical_etype: self.types.canonical_etype(e).clone(),
            backend: self.config.backend,
        };
        let mask = predicate(&batch)?;
        check_mask(&mask, batch.len(), "edge predicate")?;
        Ok(mask
            .nonzero_rows()?
            .into_iter()
            .map(|i| batch.eids[i as usize])
            .collect())
    }
}

fn check_mask(mask: &NumericTensor, expected: usize, origin: &str) -> Result<(), GraphError> {
    if mask.rank() != 1 || mask.num_rows() != expected {
        return Err(GraphError::ShapeMismatch {
            what: format!("mask of shape {:?} returned by {origin}", mask.shape()),
            expected,
            got: mask.num_rows(),
        });
    }
    Ok(())
}
