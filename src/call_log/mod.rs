// Call log
// Fire-and-forget sink for per-call outcome records

mod logger;
mod types;

use std::sync::Mutex;

pub use logger::JsonlCallLog;
pub use types::CallRecord;

/// Accepts call records without blocking or failing the caller.
pub trait CallLogSink: Send + Sync {
    fn record(&self, record: CallRecord);
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCallLog;

impl CallLogSink for NullCallLog {
    fn record(&self, _record: CallRecord) {}
}

/// Keeps records in memory; useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryCallLog {
    records: Mutex<Vec<CallRecord>>,
}

impl MemoryCallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl CallLogSink for MemoryCallLog {
    fn record(&self, record: CallRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}
