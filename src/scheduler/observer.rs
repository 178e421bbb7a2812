use crate::frame::FeatureMap;
use crate::scheduler::{ProgramOpId, ProgramValueId};
use std::time::Instant;

pub trait ProgramObserver {
    fn on_value_assigned(&mut self, value: ProgramValueId, features: &FeatureMap);
    fn on_op_executed(&mut self, op: ProgramOpId, name: &str, start: Instant, end: Instant);
}

impl ProgramObserver for () {
    fn on_value_assigned(&mut self, _value: ProgramValueId, _features: &FeatureMap) {}
    fn on_op_executed(&mut self, _op: ProgramOpId, _name: &str, _start: Instant, _end: Instant) {}
}

/// Records the name of every executed op.
#[derive(Debug, Default)]
pub struct OpNameRecorder {
    pub names: Vec<String>,
}

impl ProgramObserver for OpNameRecorder {
    fn on_value_assigned(&mut self, _value: ProgramValueId, _features: &FeatureMap) {}

    fn on_op_executed(&mut self, _op: ProgramOpId, name: &str, _start: Instant, _end: Instant) {
        self.names.push(name.to_string());
    }
}
