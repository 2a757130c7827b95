// SPDX-License-Identifier: Apache-2.0

//! Parameter Recorder
//!
//! Keeps the ordered log of bind-parameter calls made on one statement,
//! split into one batch per add-to-batch cycle.

use qore_core::{ParameterKey, Value};
use serde::Serialize;

/// One recorded bind call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSetOperation {
    /// Name of the binding call (e.g. "set_parameter")
    pub method: &'static str,
    pub key: ParameterKey,
    pub value: Value,
}

/// Bind calls of one execution cycle, in call order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterSetOperationBatch {
    pub operations: Vec<ParameterSetOperation>,
}

impl ParameterSetOperationBatch {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Value bound last for `key` within this batch
    pub fn value_of(&self, key: &ParameterKey) -> Option<&Value> {
        self.operations
            .iter()
            .rev()
            .find(|op| &op.key == key)
            .map(|op| &op.value)
    }
}

/// A query together with the parameters it was executed with
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryInfo {
    pub query: String,
    pub parameter_batches: Vec<ParameterSetOperationBatch>,
}

impl QueryInfo {
    pub fn new(query: impl Into<String>, parameter_batches: Vec<ParameterSetOperationBatch>) -> Self {
        Self {
            query: query.into(),
            parameter_batches,
        }
    }
}

/// Per-statement recording state
///
/// Owned by a single statement proxy and only mutated through `&mut self`.
#[derive(Debug, Default)]
pub struct ParameterRecorder {
    current: ParameterSetOperationBatch,
    closed: Vec<ParameterSetOperationBatch>,
}

impl ParameterRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one bind call to the in-progress batch
    pub fn record(&mut self, key: ParameterKey, method: &'static str, value: Value) {
        self.current
            .operations
            .push(ParameterSetOperation { method, key, value });
    }

    /// Close the in-progress batch and open a fresh one (add-to-batch)
    pub fn start_new_batch(&mut self) {
        let finished = std::mem::take(&mut self.current);
        self.closed.push(finished);
    }

    /// Drop the in-progress bindings, keeping closed batches (clear-parameters)
    pub fn clear_current_batch(&mut self) {
        self.current.operations.clear();
    }

    /// Forget everything recorded so far (clear-batch)
    pub fn clear_all_batches(&mut self) {
        self.current.operations.clear();
        self.closed.clear();
    }

    /// Bindings that a non-batch execution runs with
    pub fn current_batch(&self) -> &ParameterSetOperationBatch {
        &self.current
    }

    /// Closed batches that a batch execution runs with
    pub fn batches(&self) -> &[ParameterSetOperationBatch] {
        &self.closed
    }

    /// Reset closed batches once the driver has executed them
    pub fn finish_batch_execution(&mut self) -> Vec<ParameterSetOperationBatch> {
        std::mem::take(&mut self.closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(recorder: &mut ParameterRecorder, index: usize, value: impl Into<Value>) {
        recorder.record(ParameterKey::Index(index), "set_parameter", value.into());
    }

    #[test]
    fn test_binds_then_add_batch_produce_one_batch_in_order() {
        let mut recorder = ParameterRecorder::new();
        for i in 1..=4 {
            bind(&mut recorder, i, format!("v{}", i));
        }
        recorder.start_new_batch();

        let batches = recorder.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 4);
        let keys: Vec<_> = batches[0].operations.iter().map(|op| op.key.clone()).collect();
        assert_eq!(keys, (1..=4).map(ParameterKey::Index).collect::<Vec<_>>());
        assert!(recorder.current_batch().is_empty());
    }

    #[test]
    fn test_clear_current_keeps_closed_batches() {
        let mut recorder = ParameterRecorder::new();
        bind(&mut recorder, 1, "foo");
        recorder.start_new_batch();
        bind(&mut recorder, 1, "bar");
        recorder.clear_current_batch();
        bind(&mut recorder, 1, "baz");
        recorder.start_new_batch();

        let batches = recorder.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].value_of(&ParameterKey::Index(1)), Some(&Value::from("foo")));
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[1].value_of(&ParameterKey::Index(1)), Some(&Value::from("baz")));
    }

    #[test]
    fn test_clear_all_removes_everything() {
        let mut recorder = ParameterRecorder::new();
        bind(&mut recorder, 1, "foo");
        recorder.start_new_batch();
        bind(&mut recorder, 2, 10);
        recorder.clear_all_batches();

        assert!(recorder.batches().is_empty());
        assert!(recorder.current_batch().is_empty());
    }

    #[test]
    fn test_clear_then_add_batch_yields_empty_batch() {
        let mut recorder = ParameterRecorder::new();
        bind(&mut recorder, 1, "foo");
        bind(&mut recorder, 2, 10);
        recorder.clear_current_batch();
        recorder.start_new_batch();

        assert_eq!(recorder.batches().len(), 1);
        assert!(recorder.batches()[0].is_empty());
    }

    #[test]
    fn test_finish_batch_execution_resets_closed() {
        let mut recorder = ParameterRecorder::new();
        bind(&mut recorder, 1, "foo");
        recorder.start_new_batch();

        let executed = recorder.finish_batch_execution();
        assert_eq!(executed.len(), 1);
        assert!(recorder.batches().is_empty());
    }

    #[test]
    fn test_named_parameters() {
        let mut recorder = ParameterRecorder::new();
        recorder.record(ParameterKey::from("id"), "set_parameter", Value::Int(3));
        assert_eq!(
            recorder.current_batch().value_of(&ParameterKey::from("id")),
            Some(&Value::Int(3))
        );
    }
}
