//! Message-passing calls compile to a short [`Program`] over a
//! [`RelationAdapter`], which the runtime executes immediately in op order.

pub mod adapter;
pub mod observer;
pub mod ops;
pub mod schedule;

pub use adapter::{FrameSlot, RelationAdapter, SharedFrame, SharedIndicator};
pub use observer::{OpNameRecorder, ProgramObserver};
pub use ops::{AnyProgramOp, ProgramOp};
pub use schedule::EdgeSet;

use crate::error::GraphError;
use crate::frame::FeatureMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProgramValueId {
    inner: usize,
}

#[derive(Debug, Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProgramOpId {
    inner: usize,
}

impl ProgramOpId {
    pub fn index(&self) -> usize {
        self.inner
    }
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    ops: Vec<(ProgramOpId, AnyProgramOp)>,
    next_value_id: usize,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_new_value_id(&mut self) -> ProgramValueId {
        let new_id = ProgramValueId {
            inner: self.next_value_id,
        };
        self.next_value_id += 1;
        new_id
    }

    pub fn push_op(&mut self, op: AnyProgramOp) -> ProgramOpId {
        let new_op_id = ProgramOpId {
            inner: self.ops.len(),
        };
        self.ops.push((new_op_id, op));
        new_op_id
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn op_names(&self) -> Vec<String> {
        self.ops.iter().map(|(_, op)| op.get_name()).collect()
    }

    pub fn eval<T: ProgramObserver + ?Sized>(
        &self,
        adapter: &RelationAdapter,
        observer: &mut T,
    ) -> Result<(), GraphError> {
        if self.ops.is_empty() {
            return Ok(());
        }
        log::debug!("running program [{}]", self.op_names().join(", "));

        let mut intermediate_values: HashMap<ProgramValueId, FeatureMap> = HashMap::new();
        for (op_id, op) in &self.ops {
            let start_instant = Instant::now();
            let out = op.eval(&intermediate_values, adapter)?;
            let end_instant = Instant::now();
            log::debug!(
                "{} finished in {:?}",
                op.get_name(),
                end_instant - start_instant
            );
            observer.on_op_executed(*op_id, &op.get_name(), start_instant, end_instant);
            if let (Some(value_id), Some(value)) = (op.output(), out) {
                observer.on_value_assigned(value_id, &value);
                intermediate_values.insert(value_id, value);
            }
        }
        adapter.backend().sync();
        Ok(())
    }
}
