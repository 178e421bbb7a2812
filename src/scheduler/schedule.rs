//! Builders turning one message-passing call into a [`Program`].
//!
//! Builders read structure and the message indicator at build time; the
//! program they return is executed right away by the caller.

use super::adapter::{FrameSlot, RelationAdapter};
use super::ops::{
    push_message, target_slot, ClearMessages, DegreeBucketEdgeUdf, DegreeBucketReduce, EdgeRows,
    KernelReduce, NodeUdf, Overlay, ReadMessages, ReadRows, WriteMessages, WriteRows,
    ZeroDegreeFill,
};
use super::{Program, ProgramValueId};
use crate::error::GraphError;
use crate::function::{BuiltinMessage, BuiltinReduce, EdgeFn, MessageFunc, NodeFn, ReduceFunc};
use crate::graph_index::UnitGraph;
use crate::kernel::{KernelGraph, Reducer, TargetCode};
use crate::selection::{EdgeOrder, GroupBy, Selection};
use std::collections::HashSet;

/// Edges of one relation selected for a call, as parallel arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeSet {
    pub src: Vec<u64>,
    pub dst: Vec<u64>,
    pub eids: Vec<u64>,
    /// Every edge of the relation, in id order.
    pub all: bool,
}

impl EdgeSet {
    pub fn all_edges(graph: &UnitGraph) -> Self {
        let (src, dst, eids) = graph.edges(EdgeOrder::Eid);
        Self {
            src,
            dst,
            eids,
            all: true,
        }
    }

    pub fn len(&self) -> usize {
        self.eids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eids.is_empty()
    }

    pub fn selection(&self) -> Selection {
        if self.all {
            Selection::All
        } else {
            Selection::Ids(self.eids.clone())
        }
    }
}

/// Nodes of one type selected for a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet {
    pub ids: Vec<u64>,
    /// Every node of the type, in id order.
    pub all: bool,
}

impl NodeSet {
    pub fn all_nodes(count: u64) -> Self {
        Self {
            ids: (0..count).collect(),
            all: true,
        }
    }

    pub fn ids(ids: Vec<u64>) -> Self {
        Self { ids, all: false }
    }

    /// The same set with repeated ids dropped, first occurrence kept.
    pub fn deduplicated(&self) -> Self {
        Self {
            ids: unique_in_order(&self.ids),
            all: self.all,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn selection(&self) -> Selection {
        if self.all {
            Selection::All
        } else {
            Selection::Ids(self.ids.clone())
        }
    }
}

pub(crate) fn unique_in_order(ids: &[u64]) -> Vec<u64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|x| seen.insert(*x)).collect()
}

pub(crate) fn sorted_unique(ids: &[u64]) -> Vec<u64> {
    let mut out = ids.to_vec();
    out.sort_unstable();
    out.dedup();
    out
}

fn read_edge_rows(program: &mut Program, edges: &EdgeSet) -> EdgeRows {
    let src = ReadRows::push_new(program, FrameSlot::Src, Selection::Ids(edges.src.clone()));
    let edge = ReadRows::push_new(program, FrameSlot::Edge, edges.selection());
    let dst = ReadRows::push_new(program, FrameSlot::Dst, Selection::Ids(edges.dst.clone()));
    EdgeRows {
        src,
        edge,
        dst,
        src_ids: edges.src.clone(),
        dst_ids: edges.dst.clone(),
        eids: edges.eids.clone(),
    }
}

pub fn apply_nodes(nodes: &NodeSet, func: &NodeFn) -> Program {
    let mut program = Program::new();
    if nodes.ids.is_empty() {
        return program;
    }
    let data = ReadRows::push_new(&mut program, FrameSlot::Dst, nodes.selection());
    let out = NodeUdf::push_new(&mut program, func.clone(), data, nodes.ids.clone());
    WriteRows::push_new(&mut program, FrameSlot::Dst, nodes.selection(), out);
    program
}

pub fn apply_edges(edges: &EdgeSet, func: &MessageFunc) -> Program {
    let mut program = Program::new();
    if edges.is_empty() {
        return program;
    }
    let rows = read_edge_rows(&mut program, edges);
    let out = push_message(&mut program, func, rows);
    WriteRows::push_new(&mut program, FrameSlot::Edge, edges.selection(), out);
    program
}

pub fn group_apply_edges(
    adapter: &RelationAdapter,
    group_by: GroupBy,
    func: &EdgeFn,
) -> Result<Program, GraphError> {
    let mut program = Program::new();
    let edges = EdgeSet::all_edges(adapter.graph()?);
    if edges.is_empty() {
        return Ok(program);
    }
    let rows = read_edge_rows(&mut program, &edges);
    let out = DegreeBucketEdgeUdf::push_new(&mut program, func.clone(), rows, group_by);
    WriteRows::push_new(&mut program, FrameSlot::Edge, Selection::All, out);
    Ok(program)
}

pub fn send(edges: &EdgeSet, func: &MessageFunc) -> Program {
    let mut program = Program::new();
    if edges.is_empty() {
        return program;
    }
    let rows = read_edge_rows(&mut program, edges);
    let out = push_message(&mut program, func, rows);
    WriteMessages::push_new(&mut program, edges.eids.clone(), out);
    program
}

/// Writes reduced rows for `nodes`, filling zero-degree nodes and running
/// `apply` over the merged view first when given. When `nodes` covers the whole
/// type the written fields replace their columns, so a reduce or apply may
/// change a field's shape.
fn finish(
    program: &mut Program,
    adapter: &RelationAdapter,
    reduced: ProgramValueId,
    nodes: &NodeSet,
    with_messages: Vec<u64>,
    apply: Option<&NodeFn>,
) {
    let full = if with_messages.len() < nodes.ids.len() {
        ZeroDegreeFill::push_new(program, reduced, nodes.ids.clone(), with_messages)
    } else {
        reduced
    };
    let result = match apply {
        Some(func) => {
            let current = ReadRows::push_new(program, FrameSlot::Dst, nodes.selection());
            let merged = Overlay::push_new(program, current, full);
            let applied = NodeUdf::push_new(program, func.clone(), merged, nodes.ids.clone());
            Overlay::push_new(program, full, applied)
        }
        None => full,
    };
    WriteRows::push_new(program, adapter.write_slot(), nodes.selection(), result);
}

fn fallback_apply(adapter: &RelationAdapter, nodes: &NodeSet, apply: Option<&NodeFn>) -> Program {
    match apply {
        // Reduced rows are redirected elsewhere; the destination stays untouched.
        Some(_) if adapter.write_slot() == FrameSlot::Out => Program::new(),
        Some(func) => {
            log::debug!("no node received a message, running apply only");
            apply_nodes(nodes, func)
        }
        None => Program::new(),
    }
}

pub fn recv(
    adapter: &RelationAdapter,
    nodes: &NodeSet,
    reduce: &ReduceFunc,
    apply: Option<&NodeFn>,
) -> Result<Program, GraphError> {
    let nodes = nodes.deduplicated();
    if nodes.is_empty() {
        return Ok(Program::new());
    }
    let (_, dst, eids) = adapter.graph()?.in_edges(&nodes.ids)?;
    let (pending_dst, pending): (Vec<u64>, Vec<u64>) = {
        let indicator = adapter.indicator()?.borrow();
        dst.iter()
            .zip(&eids)
            .filter(|(_, e)| indicator[**e as usize])
            .map(|(d, e)| (*d, *e))
            .unzip()
    };
    if pending.is_empty() {
        return Ok(fallback_apply(adapter, &nodes, apply));
    }
    let receivers: HashSet<u64> = pending_dst.iter().copied().collect();
    let with_messages: Vec<u64> = nodes.ids.iter().copied().filter(|n| receivers.contains(n)).collect();

    let mut program = Program::new();
    let messages = ReadMessages::push_new(&mut program, pending.clone());
    let data = ReadRows::push_new(
        &mut program,
        FrameSlot::Dst,
        Selection::Ids(with_messages.clone()),
    );
    let reduced = DegreeBucketReduce::push_new(
        &mut program,
        reduce.clone(),
        messages,
        data,
        pending_dst,
        with_messages.clone(),
    );
    finish(&mut program, adapter, reduced, &nodes, with_messages, apply);
    ClearMessages::push_new(&mut program, pending);
    Ok(program)
}

fn kernel_graph(adapter: &RelationAdapter, edges: &EdgeSet) -> Result<KernelGraph, GraphError> {
    let graph = adapter.graph()?;
    if edges.all {
        return Ok(KernelGraph::from_unit_graph(graph));
    }
    Ok(KernelGraph::new(
        edges.src.clone(),
        edges.dst.clone(),
        graph.num_src() as usize,
        graph.num_dst() as usize,
    )?
    .with_edge_ids(edges.eids.clone())?)
}

/// Whether the pair can run as a single kernel call: both builtin, agreeing on
/// the message field, and every operand column present with a kernel dtype.
fn fusable<'a>(
    adapter: &RelationAdapter,
    message: &'a MessageFunc,
    reduce: &'a ReduceFunc,
) -> Option<(&'a BuiltinMessage, &'a BuiltinReduce)> {
    let (MessageFunc::Builtin(message), ReduceFunc::Builtin(reduce)) = (message, reduce) else {
        return None;
    };
    if reduce.reducer == Reducer::None || message.out_field() != reduce.msg_field {
        return None;
    }
    let operands: Vec<(TargetCode, &str)> = match message {
        BuiltinMessage::Copy { target, field, .. } => vec![(*target, field.as_str())],
        BuiltinMessage::Binary {
            lhs,
            lhs_field,
            rhs,
            rhs_field,
            ..
        } => vec![(*lhs, lhs_field.as_str()), (*rhs, rhs_field.as_str())],
    };
    let mut dtypes = Vec::with_capacity(operands.len());
    for (target, field) in operands {
        let frame = adapter.frame(target_slot(target)).ok()?.borrow();
        let column = frame.column(field)?;
        dtypes.push(column.scheme().dtype);
    }
    let backend = adapter.backend();
    let uniform = dtypes.windows(2).all(|w| w[0] == w[1]);
    (uniform && dtypes.iter().all(|d| backend.supports_kernel_dtype(*d)))
        .then_some((message, reduce))
}

/// Shared body of send_and_recv, pull, push and update_all: messages along
/// `edges` are reduced into `receivers`, which must contain every edge's
/// destination.
fn message_reduce(
    adapter: &RelationAdapter,
    edges: &EdgeSet,
    receivers: NodeSet,
    message: &MessageFunc,
    reduce: &ReduceFunc,
    apply: Option<&NodeFn>,
) -> Result<Program, GraphError> {
    if receivers.is_empty() {
        return Ok(Program::new());
    }
    let has_message: HashSet<u64> = edges.dst.iter().copied().collect();
    let with_messages: Vec<u64> = receivers
        .ids
        .iter()
        .copied()
        .filter(|n| has_message.contains(n))
        .collect();
    if with_messages.is_empty() {
        return Ok(fallback_apply(adapter, &receivers, apply));
    }

    let mut program = Program::new();
    let reduced = match fusable(adapter, message, reduce) {
        Some((builtin_message, builtin_reduce)) => KernelReduce::push_new(
            &mut program,
            builtin_message.clone(),
            builtin_reduce.clone(),
            kernel_graph(adapter, edges)?,
            with_messages.clone(),
        ),
        None => {
            let rows = read_edge_rows(&mut program, edges);
            let messages = push_message(&mut program, message, rows);
            let data = ReadRows::push_new(
                &mut program,
                FrameSlot::Dst,
                Selection::Ids(with_messages.clone()),
            );
            DegreeBucketReduce::push_new(
                &mut program,
                reduce.clone(),
                messages,
                data,
                edges.dst.clone(),
                with_messages.clone(),
            )
        }
    };
    finish(&mut program, adapter, reduced, &receivers, with_messages, apply);
    Ok(program)
}

pub fn send_and_recv(
    adapter: &RelationAdapter,
    edges: &EdgeSet,
    message: &MessageFunc,
    reduce: &ReduceFunc,
    apply: Option<&NodeFn>,
) -> Result<Program, GraphError> {
    let receivers = NodeSet::ids(sorted_unique(&edges.dst));
    message_reduce(adapter, edges, receivers, message, reduce, apply)
}

pub fn pull(
    adapter: &RelationAdapter,
    nodes: &NodeSet,
    message: &MessageFunc,
    reduce: &ReduceFunc,
    apply: Option<&NodeFn>,
) -> Result<Program, GraphError> {
    let receivers = nodes.deduplicated();
    let (src, dst, eids) = adapter.graph()?.in_edges(&receivers.ids)?;
    let edges = EdgeSet {
        src,
        dst,
        eids,
        all: false,
    };
    message_reduce(adapter, &edges, receivers, message, reduce, apply)
}

pub fn push(
    adapter: &RelationAdapter,
    nodes: &NodeSet,
    message: &MessageFunc,
    reduce: &ReduceFunc,
    apply: Option<&NodeFn>,
) -> Result<Program, GraphError> {
    let senders = unique_in_order(&nodes.ids);
    let (src, dst, eids) = adapter.graph()?.out_edges(&senders)?;
    let edges = EdgeSet {
        src,
        dst,
        eids,
        all: false,
    };
    send_and_recv(adapter, &edges, message, reduce, apply)
}

pub fn update_all(
    adapter: &RelationAdapter,
    message: &MessageFunc,
    reduce: &ReduceFunc,
    apply: Option<&NodeFn>,
) -> Result<Program, GraphError> {
    let graph = adapter.graph()?;
    let edges = EdgeSet::all_edges(graph);
    let receivers = NodeSet::all_nodes(graph.num_dst());
    message_reduce(adapter, &edges, receivers, message, reduce, apply)
}
