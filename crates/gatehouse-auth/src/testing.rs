//! Shared test fixtures.

use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use time::macros::datetime;

use crate::audit::{AuditEntry, AuditSink};
use crate::clock::ManualClock;

/// Fixed start time for deterministic tests.
pub const TEST_EPOCH: OffsetDateTime = datetime!(2024-01-01 00:00 UTC);

/// Manual clock starting at [`TEST_EPOCH`].
pub fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(TEST_EPOCH))
}

/// Audit sink that keeps every entry.
#[derive(Default)]
pub struct RecordingAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAuditSink {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, entry: AuditEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}
