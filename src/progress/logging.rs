//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use crate::verifier::Verdict;
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted {
                benchmark_dir,
                records,
            } => {
                info!(benchmark = %benchmark_dir, records, "Starting run");
            }
            ProgressEvent::RecordSkipped { commit } => {
                debug!(commit = %commit, "Already in ledger, skipping");
            }
            ProgressEvent::RecordMalformed { path, error } => {
                warn!(path = %path, error = %error, "Skipping malformed record");
            }
            ProgressEvent::StateChanged { commit, state } => {
                debug!(commit = %commit, state = %state, "State changed");
            }
            ProgressEvent::RecordFinished { commit, verdict } => match verdict {
                Verdict::Reproducible => {
                    info!(commit = %commit, "Breaking update reproduced");
                }
                Verdict::NotReproducible { reason } => {
                    info!(commit = %commit, reason = %reason, "Breaking update not reproducible");
                }
                Verdict::Indeterminate { reason } => {
                    warn!(commit = %commit, reason = %reason, "Reproduction indeterminate, will retry on next run");
                }
            },
            ProgressEvent::DiffRecorded {
                commit,
                changes,
                order_suspect,
            } => {
                if *order_suspect {
                    warn!(commit = %commit, changes, "Dependency order changed; positional counts are unreliable");
                } else {
                    info!(commit = %commit, changes, "Dependency diff recorded");
                }
            }
            ProgressEvent::RunCompleted { summary, elapsed } => {
                info!(
                    records = summary.records,
                    recorded = summary.recorded,
                    reproducible = summary.reproducible,
                    not_reproducible = summary.not_reproducible,
                    skipped = summary.skipped,
                    malformed = summary.malformed.len(),
                    indeterminate = summary.indeterminate.len(),
                    elapsed_ms = elapsed.as_millis(),
                    "Run complete"
                );
                for commit in &summary.indeterminate {
                    warn!(commit = %commit, "Indeterminate record needs manual review");
                }
            }
        }
    }
}
