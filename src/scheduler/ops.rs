use crate::error::GraphError;
use crate::frame::FeatureMap;
use crate::function::{BuiltinMessage, BuiltinReduce, EdgeFn, MessageFunc, NodeFn, ReduceFunc};
use crate::kernel::{BinaryReduce, CopyReduce, KernelGraph, RowMaps, TargetCode};
use crate::numeric_tensor::NumericTensor;
use crate::scheduler::adapter::{FrameSlot, RelationAdapter};
use crate::scheduler::{Program, ProgramValueId};
use crate::selection::{GroupBy, Selection};
use crate::udf::{EdgeBatch, NodeBatch};
use std::collections::{BTreeMap, HashMap};

pub trait ProgramOp {
    fn inputs(&self) -> Vec<ProgramValueId>;

    fn output(&self) -> Option<ProgramValueId>;

    fn eval(
        &self,
        values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError>;

    fn get_name(&self) -> String;
}

fn value(
    values: &HashMap<ProgramValueId, FeatureMap>,
    id: ProgramValueId,
) -> Result<&FeatureMap, GraphError> {
    values
        .get(&id)
        .ok_or_else(|| GraphError::InvalidProgram(format!("value {id:?} read before assignment")))
}

fn check_rows(
    adapter: &RelationAdapter,
    features: &FeatureMap,
    expected: usize,
    origin: &str,
) -> Result<(), GraphError> {
    if !adapter.check_row_counts() {
        return Ok(());
    }
    for (name, tensor) in features {
        if tensor.rank() == 0 || tensor.num_rows() != expected {
            return Err(GraphError::ShapeMismatch {
                what: format!("field {name:?} returned by {origin}"),
                expected,
                got: if tensor.rank() == 0 { 0 } else { tensor.num_rows() },
            });
        }
    }
    Ok(())
}

/// `[a * b, ...]` to `[a, b, ...]`.
fn split_rows(tensor: &NumericTensor, a: usize, b: usize) -> Result<NumericTensor, GraphError> {
    let mut shape = vec![a, b];
    shape.extend_from_slice(tensor.row_shape());
    Ok(tensor.reshape(&shape)?)
}

/// `[a, b, ...]` to `[a * b, ...]`.
fn merge_rows(tensor: &NumericTensor, a: usize, b: usize, origin: &str) -> Result<NumericTensor, GraphError> {
    if tensor.rank() < 2 || tensor.shape()[0] != a || tensor.shape()[1] != b {
        return Err(GraphError::ShapeMismatch {
            what: format!("bucketed output of {origin} with shape {:?}", tensor.shape()),
            expected: a * b,
            got: tensor.shape().iter().take(2).product(),
        });
    }
    let mut shape = vec![a * b];
    shape.extend_from_slice(&tensor.shape()[2..]);
    Ok(tensor.reshape(&shape)?)
}

/// Concatenates per-bucket outputs and restores the original row order.
/// `order[k]` is the original position of concatenated row `k`.
fn unbucket(
    parts: Vec<FeatureMap>,
    order: &[usize],
) -> Result<FeatureMap, GraphError> {
    let mut inverse = vec![0u64; order.len()];
    for (k, &pos) in order.iter().enumerate() {
        inverse[pos] = k as u64;
    }
    let Some(first) = parts.first() else {
        return Ok(FeatureMap::new());
    };
    let mut out = FeatureMap::new();
    for name in first.keys() {
        let columns = parts
            .iter()
            .map(|p| {
                p.get(name)
                    .cloned()
                    .ok_or_else(|| GraphError::UnknownField(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let joined = NumericTensor::concat_rows(&columns)?;
        out.insert(name.clone(), joined.gather_rows(&inverse)?);
    }
    Ok(out)
}

fn gather_features(features: &FeatureMap, rows: &[u64]) -> Result<FeatureMap, GraphError> {
    features
        .iter()
        .map(|(k, v)| Ok((k.clone(), v.gather_rows(rows)?)))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ReadRows {
    output: ProgramValueId,
    slot: FrameSlot,
    rows: Selection,
}

impl ReadRows {
    pub fn push_new(program: &mut Program, slot: FrameSlot, rows: Selection) -> ProgramValueId {
        let output = program.get_new_value_id();
        program.push_op(AnyProgramOp::ReadRows(Self { output, slot, rows }));
        output
    }
}

impl ProgramOp for ReadRows {
    fn inputs(&self) -> Vec<ProgramValueId> {
        vec![]
    }

    fn output(&self) -> Option<ProgramValueId> {
        Some(self.output)
    }

    fn eval(
        &self,
        _values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError> {
        let frame = adapter.frame(self.slot)?.borrow();
        Ok(Some(frame.select_rows(&self.rows)?))
    }

    fn get_name(&self) -> String {
        format!("ReadRows({})", self.slot)
    }
}

/// Reads the pending messages of `eids` from the message buffer.
#[derive(Debug, Clone)]
pub struct ReadMessages {
    output: ProgramValueId,
    eids: Vec<u64>,
}

impl ReadMessages {
    pub fn push_new(program: &mut Program, eids: Vec<u64>) -> ProgramValueId {
        let output = program.get_new_value_id();
        program.push_op(AnyProgramOp::ReadMessages(Self { output, eids }));
        output
    }
}

impl ProgramOp for ReadMessages {
    fn inputs(&self) -> Vec<ProgramValueId> {
        vec![]
    }

    fn output(&self) -> Option<ProgramValueId> {
        Some(self.output)
    }

    fn eval(
        &self,
        _values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError> {
        let frame = adapter.frame(FrameSlot::Message)?.borrow();
        Ok(Some(frame.select_rows(&Selection::Ids(self.eids.clone()))?))
    }

    fn get_name(&self) -> String {
        "ReadMessages".to_string()
    }
}

/// Endpoint ids and per-edge feature rows shared by the edge-wise ops.
#[derive(Debug, Clone)]
pub struct EdgeRows {
    pub src: ProgramValueId,
    pub edge: ProgramValueId,
    pub dst: ProgramValueId,
    pub src_ids: Vec<u64>,
    pub dst_ids: Vec<u64>,
    pub eids: Vec<u64>,
}

impl EdgeRows {
    fn inputs(&self) -> Vec<ProgramValueId> {
        vec![self.src, self.edge, self.dst]
    }

    fn batch(
        &self,
        values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<EdgeBatch, GraphError> {
        Ok(EdgeBatch {
            src_ids: self.src_ids.clone(),
            dst_ids: self.dst_ids.clone(),
            eids: self.eids.clone(),
            src: value(values, self.src)?.clone(),
            edge: value(values, self.edge)?.clone(),
            dst: value(values, self.dst)?.clone(),
            canonical_etype: adapter.etype()?.clone(),
            backend: adapter.backend(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct EdgeUdf {
    output: ProgramValueId,
    func: EdgeFn,
    rows: EdgeRows,
}

impl EdgeUdf {
    pub fn push_new(program: &mut Program, func: EdgeFn, rows: EdgeRows) -> ProgramValueId {
        let output = program.get_new_value_id();
        program.push_op(AnyProgramOp::EdgeUdf(Self { output, func, rows }));
        output
    }
}

impl ProgramOp for EdgeUdf {
    fn inputs(&self) -> Vec<ProgramValueId> {
        self.rows.inputs()
    }

    fn output(&self) -> Option<ProgramValueId> {
        Some(self.output)
    }

    fn eval(
        &self,
        values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError> {
        let batch = self.rows.batch(values, adapter)?;
        let out = self.func.call(&batch)?;
        check_rows(adapter, &out, batch.len(), "edge function")?;
        Ok(Some(out))
    }

    fn get_name(&self) -> String {
        "EdgeUdf".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct BuiltinMessageOp {
    output: ProgramValueId,
    message: BuiltinMessage,
    rows: EdgeRows,
}

impl BuiltinMessageOp {
    pub fn push_new(program: &mut Program, message: BuiltinMessage, rows: EdgeRows) -> ProgramValueId {
        let output = program.get_new_value_id();
        program.push_op(AnyProgramOp::BuiltinMessage(Self {
            output,
            message,
            rows,
        }));
        output
    }
}

impl ProgramOp for BuiltinMessageOp {
    fn inputs(&self) -> Vec<ProgramValueId> {
        self.rows.inputs()
    }

    fn output(&self) -> Option<ProgramValueId> {
        Some(self.output)
    }

    fn eval(
        &self,
        values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError> {
        let batch = self.rows.batch(values, adapter)?;
        Ok(Some(self.message.compute(&batch)?))
    }

    fn get_name(&self) -> String {
        "BuiltinMessage".to_string()
    }
}

/// Pushes whichever message op `func` needs.
pub fn push_message(program: &mut Program, func: &MessageFunc, rows: EdgeRows) -> ProgramValueId {
    match func {
        MessageFunc::Builtin(message) => BuiltinMessageOp::push_new(program, message.clone(), rows),
        MessageFunc::Udf(f) => EdgeUdf::push_new(program, f.clone(), rows),
    }
}

/// Calls a user function on edges grouped by one endpoint. Groups of equal
/// size share a batch whose features are shaped `[groups, size, ...]`.
#[derive(Debug, Clone)]
pub struct DegreeBucketEdgeUdf {
    output: ProgramValueId,
    func: EdgeFn,
    rows: EdgeRows,
    group_by: GroupBy,
}

impl DegreeBucketEdgeUdf {
    pub fn push_new(
        program: &mut Program,
        func: EdgeFn,
        rows: EdgeRows,
        group_by: GroupBy,
    ) -> ProgramValueId {
        let output = program.get_new_value_id();
        program.push_op(AnyProgramOp::DegreeBucketEdgeUdf(Self {
            output,
            func,
            rows,
            group_by,
        }));
        output
    }
}

impl ProgramOp for DegreeBucketEdgeUdf {
    fn inputs(&self) -> Vec<ProgramValueId> {
        self.rows.inputs()
    }

    fn output(&self) -> Option<ProgramValueId> {
        Some(self.output)
    }

    fn eval(
        &self,
        values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError> {
        let full = self.rows.batch(values, adapter)?;
        let keys = match self.group_by {
            GroupBy::Src => &self.rows.src_ids,
            GroupBy::Dst => &self.rows.dst_ids,
        };
        let mut groups: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (pos, key) in keys.iter().enumerate() {
            groups.entry(*key).or_default().push(pos);
        }
        let mut buckets: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for members in groups.into_values() {
            buckets.entry(members.len()).or_default().extend(members);
        }

        let mut parts = Vec::with_capacity(buckets.len());
        let mut order = Vec::with_capacity(keys.len());
        for (degree, positions) in buckets {
            let num_groups = positions.len() / degree;
            log::trace!("edge bucket: {num_groups} groups of degree {degree}");
            let rows: Vec<u64> = positions.iter().map(|&p| p as u64).collect();
            let reshape = |features: &FeatureMap| -> Result<FeatureMap, GraphError> {
                gather_features(features, &rows)?
                    .into_iter()
                    .map(|(k, v)| Ok((k, split_rows(&v, num_groups, degree)?)))
                    .collect()
            };
            let batch = EdgeBatch {
                src_ids: positions.iter().map(|&p| full.src_ids[p]).collect(),
                dst_ids: positions.iter().map(|&p| full.dst_ids[p]).collect(),
                eids: positions.iter().map(|&p| full.eids[p]).collect(),
                src: reshape(&full.src)?,
                edge: reshape(&full.edge)?,
                dst: reshape(&full.dst)?,
                canonical_etype: full.canonical_etype.clone(),
                backend: full.backend,
            };
            let out = self.func.call(&batch)?;
            let flat = out
                .into_iter()
                .map(|(k, v)| Ok((k, merge_rows(&v, num_groups, degree, "grouped edge function")?)))
                .collect::<Result<FeatureMap, GraphError>>()?;
            parts.push(flat);
            order.extend(positions);
        }
        Ok(Some(unbucket(parts, &order)?))
    }

    fn get_name(&self) -> String {
        format!("DegreeBucketEdgeUdf({})", self.group_by)
    }
}

#[derive(Debug, Clone)]
pub struct NodeUdf {
    output: ProgramValueId,
    func: NodeFn,
    data: ProgramValueId,
    nodes: Vec<u64>,
}

impl NodeUdf {
    pub fn push_new(
        program: &mut Program,
        func: NodeFn,
        data: ProgramValueId,
        nodes: Vec<u64>,
    ) -> ProgramValueId {
        let output = program.get_new_value_id();
        program.push_op(AnyProgramOp::NodeUdf(Self {
            output,
            func,
            data,
            nodes,
        }));
        output
    }
}

impl ProgramOp for NodeUdf {
    fn inputs(&self) -> Vec<ProgramValueId> {
        vec![self.data]
    }

    fn output(&self) -> Option<ProgramValueId> {
        Some(self.output)
    }

    fn eval(
        &self,
        values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError> {
        let batch = NodeBatch {
            nodes: self.nodes.clone(),
            data: value(values, self.data)?.clone(),
            mailbox: None,
            ntype: adapter.ntype().to_string(),
            backend: adapter.backend(),
        };
        let out = self.func.call(&batch)?;
        check_rows(adapter, &out, self.nodes.len(), "node function")?;
        Ok(Some(out))
    }

    fn get_name(&self) -> String {
        "NodeUdf".to_string()
    }
}

/// Groups messages by destination and reduces nodes of equal in-degree
/// together. Output rows follow `nodes`; every node must have a message.
#[derive(Debug, Clone)]
pub struct DegreeBucketReduce {
    output: ProgramValueId,
    reduce: ReduceFunc,
    messages: ProgramValueId,
    node_data: ProgramValueId,
    message_dst: Vec<u64>,
    nodes: Vec<u64>,
}

impl DegreeBucketReduce {
    pub fn push_new(
        program: &mut Program,
        reduce: ReduceFunc,
        messages: ProgramValueId,
        node_data: ProgramValueId,
        message_dst: Vec<u64>,
        nodes: Vec<u64>,
    ) -> ProgramValueId {
        let output = program.get_new_value_id();
        program.push_op(AnyProgramOp::DegreeBucketReduce(Self {
            output,
            reduce,
            messages,
            node_data,
            message_dst,
            nodes,
        }));
        output
    }
}

impl ProgramOp for DegreeBucketReduce {
    fn inputs(&self) -> Vec<ProgramValueId> {
        vec![self.messages, self.node_data]
    }

    fn output(&self) -> Option<ProgramValueId> {
        Some(self.output)
    }

    fn eval(
        &self,
        values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError> {
        let messages = value(values, self.messages)?;
        let node_data = value(values, self.node_data)?;

        let mut inbox: HashMap<u64, Vec<u64>> = HashMap::new();
        for (row, dst) in self.message_dst.iter().enumerate() {
            inbox.entry(*dst).or_default().push(row as u64);
        }
        let mut buckets: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (pos, node) in self.nodes.iter().enumerate() {
            let degree = inbox.get(node).map_or(0, Vec::len);
            if degree == 0 {
                return Err(GraphError::InvalidProgram(format!(
                    "node {node} has no message to reduce"
                )));
            }
            buckets.entry(degree).or_default().push(pos);
        }

        let mut parts = Vec::with_capacity(buckets.len());
        let mut order = Vec::with_capacity(self.nodes.len());
        for (degree, positions) in buckets {
            log::trace!("node bucket: {} nodes of degree {degree}", positions.len());
            let message_rows: Vec<u64> = positions
                .iter()
                .flat_map(|&p| inbox[&self.nodes[p]].iter().copied())
                .collect();
            let mailbox = gather_features(messages, &message_rows)?
                .into_iter()
                .map(|(k, v)| Ok((k, split_rows(&v, positions.len(), degree)?)))
                .collect::<Result<FeatureMap, GraphError>>()?;
            let data_rows: Vec<u64> = positions.iter().map(|&p| p as u64).collect();
            let batch = NodeBatch {
                nodes: positions.iter().map(|&p| self.nodes[p]).collect(),
                data: gather_features(node_data, &data_rows)?,
                mailbox: Some(mailbox),
                ntype: adapter.ntype().to_string(),
                backend: adapter.backend(),
            };
            let out = self.reduce.compute(&batch)?;
            check_rows(adapter, &out, batch.len(), "reduce function")?;
            parts.push(out);
            order.extend(positions);
        }
        Ok(Some(unbucket(parts, &order)?))
    }

    fn get_name(&self) -> String {
        "DegreeBucketReduce".to_string()
    }
}

/// Builtin message and builtin reduce fused into one aggregation kernel call.
/// Output rows follow `nodes`.
#[derive(Debug, Clone)]
pub struct KernelReduce {
    output: ProgramValueId,
    message: BuiltinMessage,
    reduce: BuiltinReduce,
    graph: KernelGraph,
    nodes: Vec<u64>,
}

impl KernelReduce {
    pub fn push_new(
        program: &mut Program,
        message: BuiltinMessage,
        reduce: BuiltinReduce,
        graph: KernelGraph,
        nodes: Vec<u64>,
    ) -> ProgramValueId {
        let output = program.get_new_value_id();
        program.push_op(AnyProgramOp::KernelReduce(Self {
            output,
            message,
            reduce,
            graph,
            nodes,
        }));
        output
    }
}

pub(crate) fn target_slot(target: TargetCode) -> FrameSlot {
    match target {
        TargetCode::Src => FrameSlot::Src,
        TargetCode::Dst => FrameSlot::Dst,
        TargetCode::Edge => FrameSlot::Edge,
    }
}

impl ProgramOp for KernelReduce {
    fn inputs(&self) -> Vec<ProgramValueId> {
        vec![]
    }

    fn output(&self) -> Option<ProgramValueId> {
        Some(self.output)
    }

    fn eval(
        &self,
        _values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError> {
        if self.message.out_field() != self.reduce.msg_field {
            return Err(GraphError::UnknownField(self.reduce.msg_field.clone()));
        }
        let backend = adapter.backend();
        let column = |target: TargetCode, field: &str| -> Result<NumericTensor, GraphError> {
            Ok(adapter.frame(target_slot(target))?.borrow().get(field)?)
        };
        let maps = RowMaps {
            out: Some(RowMaps::compact(&self.nodes, self.graph.num_dst())?),
            ..RowMaps::default()
        };
        let out = match &self.message {
            BuiltinMessage::Copy { target, field, .. } => {
                let data = column(*target, field)?;
                let (out, _) = CopyReduce::forward(
                    self.reduce.reducer,
                    &self.graph,
                    *target,
                    &data,
                    self.nodes.len(),
                    &maps,
                    &backend,
                )?;
                out
            }
            BuiltinMessage::Binary {
                op,
                lhs,
                lhs_field,
                rhs,
                rhs_field,
                ..
            } => {
                let lhs_data = column(*lhs, lhs_field)?;
                let rhs_data = column(*rhs, rhs_field)?;
                let (out, _) = BinaryReduce::forward(
                    self.reduce.reducer,
                    *op,
                    &self.graph,
                    *lhs,
                    *rhs,
                    &lhs_data,
                    &rhs_data,
                    self.nodes.len(),
                    &maps,
                    &backend,
                )?;
                out
            }
        };
        Ok(Some(FeatureMap::from([(self.reduce.out.clone(), out)])))
    }

    fn get_name(&self) -> String {
        format!("KernelReduce({})", self.reduce.reducer)
    }
}

/// Extends reduced rows of `with_messages` to every node of `nodes`.
///
/// A node without messages takes, per field: the field's own initializer in
/// the written frame; else the field's current value there; else the default
/// initializer (or zeros).
#[derive(Debug, Clone)]
pub struct ZeroDegreeFill {
    output: ProgramValueId,
    reduced: ProgramValueId,
    nodes: Vec<u64>,
    with_messages: Vec<u64>,
}

impl ZeroDegreeFill {
    pub fn push_new(
        program: &mut Program,
        reduced: ProgramValueId,
        nodes: Vec<u64>,
        with_messages: Vec<u64>,
    ) -> ProgramValueId {
        let output = program.get_new_value_id();
        program.push_op(AnyProgramOp::ZeroDegreeFill(Self {
            output,
            reduced,
            nodes,
            with_messages,
        }));
        output
    }
}

impl ProgramOp for ZeroDegreeFill {
    fn inputs(&self) -> Vec<ProgramValueId> {
        vec![self.reduced]
    }

    fn output(&self) -> Option<ProgramValueId> {
        Some(self.output)
    }

    fn eval(
        &self,
        values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError> {
        let reduced = value(values, self.reduced)?;
        let position: HashMap<u64, usize> = self
            .with_messages
            .iter()
            .enumerate()
            .map(|(i, &n)| (n, i))
            .collect();
        let zero_degree: Vec<u64> = self
            .nodes
            .iter()
            .copied()
            .filter(|n| !position.contains_key(n))
            .collect();
        // Row k of `reduced ++ fill` for every node, in `nodes` order.
        let mut zero_seen = 0;
        let gather: Vec<u64> = self
            .nodes
            .iter()
            .map(|n| match position.get(n) {
                Some(&i) => i as u64,
                None => {
                    zero_seen += 1;
                    (self.with_messages.len() + zero_seen - 1) as u64
                }
            })
            .collect();

        let frame = adapter.frame(adapter.write_slot())?.borrow();
        let mut out = FeatureMap::new();
        for (name, rows) in reduced {
            let row_shape = rows.row_shape().to_vec();
            let dtype = rows.dtype();
            let fill = if frame.field_initializer(name).is_some() {
                frame.initialize_rows(name, &row_shape, dtype, &zero_degree)?
            } else if frame
                .column(name)
                .is_some_and(|c| c.scheme().shape == row_shape && c.scheme().dtype == dtype)
            {
                frame.get_rows(&Selection::Ids(zero_degree.clone()), name)?
            } else {
                frame.initialize_rows(name, &row_shape, dtype, &zero_degree)?
            };
            let joined = NumericTensor::concat_rows(&[rows.clone(), fill])?;
            out.insert(name.clone(), joined.gather_rows(&gather)?);
        }
        Ok(Some(out))
    }

    fn get_name(&self) -> String {
        "ZeroDegreeFill".to_string()
    }
}

/// `base` with every field of `top` written over it.
#[derive(Debug, Clone)]
pub struct Overlay {
    output: ProgramValueId,
    base: ProgramValueId,
    top: ProgramValueId,
}

impl Overlay {
    pub fn push_new(program: &mut Program, base: ProgramValueId, top: ProgramValueId) -> ProgramValueId {
        let output = program.get_new_value_id();
        program.push_op(AnyProgramOp::Overlay(Self { output, base, top }));
        output
    }
}

impl ProgramOp for Overlay {
    fn inputs(&self) -> Vec<ProgramValueId> {
        vec![self.base, self.top]
    }

    fn output(&self) -> Option<ProgramValueId> {
        Some(self.output)
    }

    fn eval(
        &self,
        values: &HashMap<ProgramValueId, FeatureMap>,
        _adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError> {
        let mut out = value(values, self.base)?.clone();
        out.extend(value(values, self.top)?.clone());
        Ok(Some(out))
    }

    fn get_name(&self) -> String {
        "Overlay".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct WriteRows {
    slot: FrameSlot,
    rows: Selection,
    input: ProgramValueId,
}

impl WriteRows {
    pub fn push_new(program: &mut Program, slot: FrameSlot, rows: Selection, input: ProgramValueId) {
        program.push_op(AnyProgramOp::WriteRows(Self { slot, rows, input }));
    }
}

impl ProgramOp for WriteRows {
    fn inputs(&self) -> Vec<ProgramValueId> {
        vec![self.input]
    }

    fn output(&self) -> Option<ProgramValueId> {
        None
    }

    fn eval(
        &self,
        values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError> {
        let features = value(values, self.input)?;
        adapter
            .frame(self.slot)?
            .borrow_mut()
            .update(&self.rows, features)?;
        Ok(None)
    }

    fn get_name(&self) -> String {
        format!("WriteRows({})", self.slot)
    }
}

/// Stores messages for `eids` and marks them pending.
#[derive(Debug, Clone)]
pub struct WriteMessages {
    eids: Vec<u64>,
    input: ProgramValueId,
}

impl WriteMessages {
    pub fn push_new(program: &mut Program, eids: Vec<u64>, input: ProgramValueId) {
        program.push_op(AnyProgramOp::WriteMessages(Self { eids, input }));
    }
}

impl ProgramOp for WriteMessages {
    fn inputs(&self) -> Vec<ProgramValueId> {
        vec![self.input]
    }

    fn output(&self) -> Option<ProgramValueId> {
        None
    }

    fn eval(
        &self,
        values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError> {
        let features = value(values, self.input)?;
        adapter
            .frame(FrameSlot::Message)?
            .borrow_mut()
            .update(&Selection::Ids(self.eids.clone()), features)?;
        let mut indicator = adapter.indicator()?.borrow_mut();
        for &e in &self.eids {
            indicator[e as usize] = true;
        }
        Ok(None)
    }

    fn get_name(&self) -> String {
        "WriteMessages".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct ClearMessages {
    eids: Vec<u64>,
}

impl ClearMessages {
    pub fn push_new(program: &mut Program, eids: Vec<u64>) {
        program.push_op(AnyProgramOp::ClearMessages(Self { eids }));
    }
}

impl ProgramOp for ClearMessages {
    fn inputs(&self) -> Vec<ProgramValueId> {
        vec![]
    }

    fn output(&self) -> Option<ProgramValueId> {
        None
    }

    fn eval(
        &self,
        _values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError> {
        let mut indicator = adapter.indicator()?.borrow_mut();
        for &e in &self.eids {
            indicator[e as usize] = false;
        }
        Ok(None)
    }

    fn get_name(&self) -> String {
        "ClearMessages".to_string()
    }
}

#[derive(Debug, Clone)]
pub enum AnyProgramOp {
    ReadRows(ReadRows),
    ReadMessages(ReadMessages),
    EdgeUdf(EdgeUdf),
    BuiltinMessage(BuiltinMessageOp),
    DegreeBucketEdgeUdf(DegreeBucketEdgeUdf),
    NodeUdf(NodeUdf),
    DegreeBucketReduce(DegreeBucketReduce),
    KernelReduce(KernelReduce),
    ZeroDegreeFill(ZeroDegreeFill),
    Overlay(Overlay),
    WriteRows(WriteRows),
    WriteMessages(WriteMessages),
    ClearMessages(ClearMessages),
}

macro_rules! delegate {
    ($self:ident, $op:ident => $body:expr) => {
        match $self {
            AnyProgramOp::ReadRows($op) => $body,
            AnyProgramOp::ReadMessages($op) => $body,
            AnyProgramOp::EdgeUdf($op) => $body,
            AnyProgramOp::BuiltinMessage($op) => $body,
            AnyProgramOp::DegreeBucketEdgeUdf($op) => $body,
            AnyProgramOp::NodeUdf($op) => $body,
            AnyProgramOp::DegreeBucketReduce($op) => $body,
            AnyProgramOp::KernelReduce($op) => $body,
            AnyProgramOp::ZeroDegreeFill($op) => $body,
            AnyProgramOp::Overlay($op) => $body,
            AnyProgramOp::WriteRows($op) => $body,
            AnyProgramOp::WriteMessages($op) => $body,
            AnyProgramOp::ClearMessages($op) => $body,
        }
    };
}

impl ProgramOp for AnyProgramOp {
    fn inputs(&self) -> Vec<ProgramValueId> {
        delegate!(self, op => op.inputs())
    }

    fn output(&self) -> Option<ProgramValueId> {
        delegate!(self, op => op.output())
    }

    fn eval(
        &self,
        values: &HashMap<ProgramValueId, FeatureMap>,
        adapter: &RelationAdapter,
    ) -> Result<Option<FeatureMap>, GraphError> {
        delegate!(self, op => op.eval(values, adapter))
    }

    fn get_name(&self) -> String {
        delegate!(self, op => op.get_name())
    }
}
