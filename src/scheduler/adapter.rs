use crate::backends::eval_backend::EvalBackend;
use crate::config::GraphConfig;
use crate::error::GraphError;
use crate::frame::Frame;
use crate::graph_index::UnitGraph;
use crate::type_resolver::CanonicalEdgeType;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

pub type SharedFrame = Rc<RefCell<Frame>>;

/// One flag per edge: does the edge hold an undelivered message.
pub type SharedIndicator = Rc<RefCell<Vec<bool>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FrameSlot {
    Src,
    Dst,
    Edge,
    Message,
    /// Side output that receives reduced rows instead of the destination frame.
    Out,
}

/// The frames a program reads and writes for one relation (or one node type).
#[derive(Clone)]
pub struct RelationAdapter {
    frames: HashMap<FrameSlot, SharedFrame>,
    indicator: Option<SharedIndicator>,
    graph: Option<Arc<UnitGraph>>,
    etype: Option<CanonicalEdgeType>,
    ntype: String,
    backend: EvalBackend,
    check_row_counts: bool,
}

impl core::fmt::Debug for RelationAdapter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut slots: Vec<_> = self.frames.keys().map(|s| s.to_string()).collect();
        slots.sort();
        f.debug_struct("RelationAdapter")
            .field("slots", &slots)
            .field("etype", &self.etype)
            .field("ntype", &self.ntype)
            .finish()
    }
}

impl RelationAdapter {
    /// Adapter over a single node type; the node frame serves as `Dst`.
    pub(crate) fn for_nodes(frame: SharedFrame, ntype: &str, config: &GraphConfig) -> Self {
        Self {
            frames: HashMap::from([(FrameSlot::Dst, frame)]),
            indicator: None,
            graph: None,
            etype: None,
            ntype: ntype.to_string(),
            backend: config.backend,
            check_row_counts: config.check_row_counts,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn for_relation(
        graph: Arc<UnitGraph>,
        etype: CanonicalEdgeType,
        src: SharedFrame,
        dst: SharedFrame,
        edge: SharedFrame,
        message: SharedFrame,
        indicator: SharedIndicator,
        config: &GraphConfig,
    ) -> Self {
        Self {
            frames: HashMap::from([
                (FrameSlot::Src, src),
                (FrameSlot::Dst, dst),
                (FrameSlot::Edge, edge),
                (FrameSlot::Message, message),
            ]),
            indicator: Some(indicator),
            graph: Some(graph),
            ntype: etype.dst_type.clone(),
            etype: Some(etype),
            backend: config.backend,
            check_row_counts: config.check_row_counts,
        }
    }

    /// Redirects reduced rows into `out`.
    pub(crate) fn with_out(mut self, out: SharedFrame) -> Self {
        self.frames.insert(FrameSlot::Out, out);
        self
    }

    pub(crate) fn frame(&self, slot: FrameSlot) -> Result<&SharedFrame, GraphError> {
        self.frames
            .get(&slot)
            .ok_or_else(|| GraphError::InvalidProgram(format!("no {slot} frame bound")))
    }

    /// Frame that receives reduce and apply results.
    pub(crate) fn write_slot(&self) -> FrameSlot {
        if self.frames.contains_key(&FrameSlot::Out) {
            FrameSlot::Out
        } else {
            FrameSlot::Dst
        }
    }

    pub(crate) fn indicator(&self) -> Result<&SharedIndicator, GraphError> {
        self.indicator
            .as_ref()
            .ok_or_else(|| GraphError::InvalidProgram("no message indicator bound".to_string()))
    }

    pub(crate) fn graph(&self) -> Result<&Arc<UnitGraph>, GraphError> {
        self.graph
            .as_ref()
            .ok_or_else(|| GraphError::InvalidProgram("no relation bound".to_string()))
    }

    pub(crate) fn etype(&self) -> Result<&CanonicalEdgeType, GraphError> {
        self.etype
            .as_ref()
            .ok_or_else(|| GraphError::InvalidProgram("no relation bound".to_string()))
    }

    pub(crate) fn ntype(&self) -> &str {
        &self.ntype
    }

    pub(crate) fn backend(&self) -> EvalBackend {
        self.backend
    }

    pub(crate) fn check_row_counts(&self) -> bool {
        self.check_row_counts
    }
}
