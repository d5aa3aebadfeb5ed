//! Run-wide failure accounting.
//!
//! Every transport-level failure during a benchmark run lands here so the
//! final score can see the aggregate counts. The ledger is an explicit
//! handle created once per run and shared by every concurrent session,
//! rather than a process global, so tests can assert on failure counts in
//! isolation.

use std::sync::Mutex;

/// Transport failure classification. Timeouts are scored separately from
/// other network failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Transport,
}

/// One recorded failure.
#[derive(Debug, Clone)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

/// Shared, append-only log of transport failures for one benchmark run.
#[derive(Debug, Default)]
pub struct FailureLedger {
    entries: Mutex<Vec<Failure>>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one failure. Safe under any number of concurrent writers.
    pub fn record(&self, kind: FailureKind, message: impl Into<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(Failure {
                kind,
                message: message.into(),
            });
        }
    }

    /// Total failures recorded so far.
    pub fn total(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Failures recorded as timeouts.
    pub fn timeouts(&self) -> usize {
        self.entries
            .lock()
            .map(|e| e.iter().filter(|f| f.kind == FailureKind::Timeout).count())
            .unwrap_or(0)
    }

    /// Copy of every entry recorded so far.
    pub fn snapshot(&self) -> Vec<Failure> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}
