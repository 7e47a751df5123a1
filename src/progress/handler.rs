//! Progress handler trait and events

use crate::verifier::{RunSummary, Verdict, VerifierState};
use std::time::Duration;

/// Events emitted while processing a benchmark directory
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A run over a benchmark directory started
    RunStarted {
        benchmark_dir: String,
        records: usize,
    },

    /// Record already present in the ledger
    RecordSkipped { commit: String },

    /// Record file could not be decoded
    RecordMalformed { path: String, error: String },

    /// Verifier state machine advanced
    StateChanged {
        commit: String,
        state: VerifierState,
    },

    /// Reproduction verdict reached
    RecordFinished { commit: String, verdict: Verdict },

    /// Dependency tree diff stored
    DiffRecorded {
        commit: String,
        changes: usize,
        order_suspect: bool,
    },

    /// Run finished
    RunCompleted {
        summary: RunSummary,
        elapsed: Duration,
    },
}

/// Trait for handling progress events
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {
        // Intentionally empty
    }
}
