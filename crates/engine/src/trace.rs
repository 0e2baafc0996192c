//! Per-step execution trace.
//!
//! When a [`TraceSink`] is registered on the context chain the executor reports every
//! finished step to it, after outputs have been published.

use std::cell::RefCell;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// What happened when one step ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    /// Depth of the context the step ran in.
    pub depth: usize,
    pub step: String,
    pub action_ref: String,
    /// Inputs after binding and coercion. Empty when binding failed.
    pub inputs: IndexMap<String, Value>,
    /// Published output variables.
    pub outputs: IndexMap<String, Value>,
    pub success: bool,
    pub error: Option<String>,
}

pub trait TraceSink {
    fn record(&self, record: &TraceRecord);
}

/// Collects trace records in memory.
#[derive(Debug, Default)]
pub struct MemoryTrace {
    records: RefCell<Vec<TraceRecord>>,
}

impl MemoryTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.borrow().clone()
    }

    /// Names of the recorded steps in execution order.
    pub fn step_names(&self) -> Vec<String> {
        self.records.borrow().iter().map(|record| record.step.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}

impl TraceSink for MemoryTrace {
    fn record(&self, record: &TraceRecord) {
        self.records.borrow_mut().push(record.clone());
    }
}
