//! Logging collaborator
//!
//! Every state that exits hands a [`LogRecord`] to the experiment's
//! [`LogSink`]. Durable formats are up to the sink; the engine only guarantees
//! one record per exit (plus the extra records emitted by Log, Record and
//! KeyRecord states).

use crate::types::Value;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// One record handed to the log sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Name of the state that produced the record
    pub state: String,
    /// State kind, e.g. `"KeyPress"` or `"Serial"`
    pub kind: &'static str,
    /// Activation number of the state when the record was produced
    pub activation: u32,
    /// Clock time the record refers to
    pub time: f64,
    /// Attribute name → value
    pub values: BTreeMap<String, Value>,
}

impl LogRecord {
    /// Look up one logged value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// Receiver of log records
pub trait LogSink {
    fn record(&mut self, record: LogRecord);
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn record(&mut self, _record: LogRecord) {}
}

/// Sink that keeps records in memory
///
/// Clones share the same buffer, so a test can keep one handle while the
/// experiment owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Rc<RefCell<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all records received so far
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.borrow().clone()
    }

    /// Records produced by the state with the given name, in order
    pub fn for_state(&self, name: &str) -> Vec<LogRecord> {
        self.records
            .borrow()
            .iter()
            .filter(|record| record.state == name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}

impl LogSink for MemorySink {
    fn record(&mut self, record: LogRecord) {
        self.records.borrow_mut().push(record);
    }
}
