//! Reproduction verifier
//!
//! Drives one record at a time through
//! `Pending -> PreRunning -> PostRunning -> LogExtracted -> Classified` and
//! decides whether the recorded breaking update reproduces. Terminal verdicts
//! other than [`Verdict::Indeterminate`] are committed to the ledger before
//! the next record starts, which makes runs resumable.

use crate::config::ReproConfig;
use crate::extract::ArtifactExtractor;
use crate::ledger::{Ledger, LedgerError};
use crate::materialize::{BuildEvidence, MaterializeError, MaterializedResult, Materializer};
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::record::{list_record_files, BreakingUpdateRecord, RecordError};
use crate::runtime::{BuildOutcome, ContainerRuntime, ContainerSession, ImageRef};
use crate::taxonomy::{self, FailureCategory, FailureTaxonomy, TestFailureBreakdown};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Records(#[from] RecordError),

    #[error("Failed to prepare output directories: {0}")]
    Setup(#[source] MaterializeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerifierState {
    Pending,
    PreRunning,
    PostRunning,
    LogExtracted,
    Classified,
}

impl fmt::Display for VerifierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerifierState::Pending => "pending",
            VerifierState::PreRunning => "pre-running",
            VerifierState::PostRunning => "post-running",
            VerifierState::LogExtracted => "log-extracted",
            VerifierState::Classified => "classified",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Reproducible,
    NotReproducible { reason: String },
    /// Infrastructure failure; never persisted, retried on the next run
    Indeterminate { reason: String },
}

impl Verdict {
    fn not_reproducible(reason: impl Into<String>) -> Self {
        Verdict::NotReproducible {
            reason: reason.into(),
        }
    }

    fn indeterminate(reason: impl Into<String>) -> Self {
        Verdict::Indeterminate {
            reason: reason.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Reproducible => "REPRODUCIBLE",
            Verdict::NotReproducible { .. } => "NOT_REPRODUCIBLE",
            Verdict::Indeterminate { .. } => "INDETERMINATE",
        }
    }

    pub fn is_reproducible(&self) -> bool {
        matches!(self, Verdict::Reproducible)
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Verdict::Indeterminate { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Reproducible => None,
            Verdict::NotReproducible { reason } | Verdict::Indeterminate { reason } => Some(reason),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{} ({})", self.label(), reason),
            None => f.write_str(self.label()),
        }
    }
}

/// Persisted verdict; `Indeterminate` has no representation on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReproductionStatus {
    Reproducible,
    NotReproducible,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReproductionEntry {
    pub status: ReproductionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_category: Option<FailureCategory>,
    pub expected_category: FailureCategory,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_breakdown: Option<TestFailureBreakdown>,
}

impl ReproductionEntry {
    pub fn is_reproducible(&self) -> bool {
        self.status == ReproductionStatus::Reproducible
    }
}

/// Counts for one run over a benchmark directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub records: usize,
    /// Ledger entries written during this run
    pub recorded: usize,
    pub reproducible: usize,
    pub not_reproducible: usize,
    /// Already in the ledger
    pub skipped: usize,
    pub malformed: Vec<PathBuf>,
    /// Commits left out of the ledger because of infrastructure failures
    pub indeterminate: Vec<String>,
}

/// Result of the build-and-classify part of the state machine
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub evidence: BuildEvidence,
    pub test_breakdown: Option<TestFailureBreakdown>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Skipped,
    Finished {
        verdict: Verdict,
        materialized: MaterializedResult,
    },
}

pub struct Verifier {
    config: ReproConfig,
    session: ContainerSession,
    extractor: ArtifactExtractor,
    materializer: Materializer,
    taxonomy: FailureTaxonomy,
    ledger: Ledger<ReproductionEntry>,
    progress: Arc<dyn ProgressHandler>,
}

impl Verifier {
    /// Opens the ledger and creates output directories; failures here are
    /// fatal for the run.
    pub fn new(
        config: ReproConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, VerifierError> {
        let ledger = Ledger::open(config.reproduction_ledger_path())?;
        let materializer = Materializer::new(config.clone(), runtime.clone());
        materializer.prepare().map_err(VerifierError::Setup)?;

        Ok(Self {
            session: ContainerSession::new(runtime.clone()),
            extractor: ArtifactExtractor::new(runtime),
            materializer,
            taxonomy: FailureTaxonomy::builtin().clone(),
            ledger,
            progress: Arc::new(NoOpHandler),
            config,
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn ledger(&self) -> &Ledger<ReproductionEntry> {
        &self.ledger
    }

    fn transition(&self, commit: &str, state: VerifierState) {
        self.progress.on_progress(&ProgressEvent::StateChanged {
            commit: commit.to_string(),
            state,
        });
    }

    /// Processes every record file in `benchmark_dir`, in file name order
    pub async fn run(&mut self, benchmark_dir: &Path) -> Result<RunSummary, VerifierError> {
        let start = Instant::now();
        let files = list_record_files(benchmark_dir)?;
        self.progress.on_progress(&ProgressEvent::RunStarted {
            benchmark_dir: benchmark_dir.display().to_string(),
            records: files.len(),
        });

        let mut summary = RunSummary {
            records: files.len(),
            ..Default::default()
        };

        for path in files {
            let mut record = match BreakingUpdateRecord::load(&path) {
                Ok(record) => record,
                Err(e) => {
                    self.progress.on_progress(&ProgressEvent::RecordMalformed {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    });
                    summary.malformed.push(path);
                    continue;
                }
            };

            match self.verify_record(&path, &mut record).await? {
                RecordOutcome::Skipped => summary.skipped += 1,
                RecordOutcome::Finished { verdict, .. } => match verdict {
                    Verdict::Reproducible => {
                        summary.reproducible += 1;
                        summary.recorded += 1;
                    }
                    Verdict::NotReproducible { .. } => {
                        summary.not_reproducible += 1;
                        summary.recorded += 1;
                    }
                    Verdict::Indeterminate { .. } => {
                        summary.indeterminate.push(record.commit.clone());
                    }
                },
            }
        }

        self.progress.on_progress(&ProgressEvent::RunCompleted {
            summary: summary.clone(),
            elapsed: start.elapsed(),
        });
        Ok(summary)
    }

    /// Runs the full per-record state machine: skip check, builds,
    /// classification, materialization, ledger commit and cleanup.
    ///
    /// Only a ledger write failure is returned as an error.
    pub async fn verify_record(
        &mut self,
        record_path: &Path,
        record: &mut BreakingUpdateRecord,
    ) -> Result<RecordOutcome, VerifierError> {
        let commit = record.commit.clone();
        self.transition(&commit, VerifierState::Pending);

        if self.ledger.has(&commit) {
            self.progress
                .on_progress(&ProgressEvent::RecordSkipped { commit });
            return Ok(RecordOutcome::Skipped);
        }

        let evaluation = self.evaluate(record).await;
        let mut verdict = evaluation.verdict;

        let materialized = match self
            .materializer
            .store(record, record_path, &verdict, &evaluation.evidence)
            .await
        {
            Ok(materialized) => materialized,
            Err(e) => {
                warn!(commit = %commit, error = %e, "Failed to store result");
                verdict = Verdict::indeterminate(format!("failed to store result: {}", e));
                MaterializedResult::default()
            }
        };

        let status = match &verdict {
            Verdict::Reproducible => Some(ReproductionStatus::Reproducible),
            Verdict::NotReproducible { .. } => Some(ReproductionStatus::NotReproducible),
            Verdict::Indeterminate { .. } => None,
        };
        if let Some(status) = status {
            self.ledger.put(
                commit.clone(),
                ReproductionEntry {
                    status,
                    reason: verdict.reason().map(str::to_string),
                    derived_category: evaluation.evidence.derived_category,
                    expected_category: record.failure_category,
                    recorded_at: Utc::now(),
                    test_breakdown: evaluation.test_breakdown,
                },
            )?;
        }

        self.progress.on_progress(&ProgressEvent::RecordFinished {
            commit: commit.clone(),
            verdict: verdict.clone(),
        });

        let removed = self.session.cleanup().await;
        debug!(commit = %commit, removed, "Removed containers");
        if self.config.remove_images && !verdict.is_reproducible() {
            let images = [
                ImageRef::pre(&self.config.registry, &commit),
                ImageRef::post(&self.config.registry, &commit),
            ];
            self.session.remove_images(&images).await;
        }

        Ok(RecordOutcome::Finished {
            verdict,
            materialized,
        })
    }

    /// Builds both images and classifies the post-update log. Never touches
    /// the ledger or local storage.
    pub async fn evaluate(&mut self, record: &BreakingUpdateRecord) -> Evaluation {
        let commit = record.commit.as_str();
        let project_dir = record.project_dir();
        let command = self.config.build_shell_command();
        let mut evidence = BuildEvidence::default();

        self.transition(commit, VerifierState::PreRunning);
        let pre_image = ImageRef::pre(&self.config.registry, commit);
        let pre = self
            .session
            .resolve_and_run(&pre_image, &project_dir, &command)
            .await;
        evidence.pre_container = pre.container().map(str::to_string);

        match &pre {
            BuildOutcome::Indeterminate { reason } => {
                return self.finish(Verdict::indeterminate(reason.clone()), evidence, None);
            }
            BuildOutcome::Failed { container, exit_code } => {
                evidence.log = self.fetch_log(container, &project_dir).await;
                let verdict = Verdict::not_reproducible(format!(
                    "pre-update build failed with exit code {}",
                    exit_code
                ));
                return self.finish(verdict, evidence, None);
            }
            BuildOutcome::Succeeded { .. } => {}
        }

        self.transition(commit, VerifierState::PostRunning);
        let post_image = ImageRef::post(&self.config.registry, commit);
        let post = self
            .session
            .resolve_and_run(&post_image, &project_dir, &command)
            .await;
        evidence.post_container = post.container().map(str::to_string);

        let post_container = match &post {
            BuildOutcome::Indeterminate { reason } => {
                return self.finish(Verdict::indeterminate(reason.clone()), evidence, None);
            }
            BuildOutcome::Succeeded { container } => {
                evidence.log = self.fetch_log(container, &project_dir).await;
                let verdict = Verdict::not_reproducible("post-update build succeeded");
                return self.finish(verdict, evidence, None);
            }
            BuildOutcome::Failed { container, .. } => container.clone(),
        };

        let log_path = self.log_path(&project_dir);
        let log = match self.extractor.copy_path(&post_container, &log_path).await {
            Ok(log) => log,
            Err(e) => {
                warn!(commit, path = %log_path, error = %e, "Failed to extract build log");
                let verdict = Verdict::indeterminate(format!("log extraction failed: {}", e));
                return self.finish(verdict, evidence, None);
            }
        };
        self.transition(commit, VerifierState::LogExtracted);

        let text = taxonomy::decode_log(&log);
        let derived = self.taxonomy.classify(&text);
        evidence.log = Some(log);
        evidence.derived_category = Some(derived);
        self.transition(commit, VerifierState::Classified);

        let test_breakdown =
            (derived == FailureCategory::TestFailure).then(|| taxonomy::breakdown(&text));

        let verdict = if derived == record.failure_category {
            Verdict::Reproducible
        } else {
            Verdict::not_reproducible(format!(
                "expected {}, derived {}",
                record.failure_category, derived
            ))
        };
        self.finish(verdict, evidence, test_breakdown)
    }

    fn finish(
        &self,
        verdict: Verdict,
        evidence: BuildEvidence,
        test_breakdown: Option<TestFailureBreakdown>,
    ) -> Evaluation {
        info!(verdict = %verdict, "Evaluation finished");
        Evaluation {
            verdict,
            evidence,
            test_breakdown,
        }
    }

    fn log_path(&self, project_dir: &str) -> String {
        format!("{}/{}", project_dir, self.config.log_file_name)
    }

    /// Best-effort log retrieval for verdicts that do not depend on it
    async fn fetch_log(&self, container: &str, project_dir: &str) -> Option<Vec<u8>> {
        let path = self.log_path(project_dir);
        match self.extractor.copy_path(container, &path).await {
            Ok(log) => Some(log),
            Err(e) => {
                debug!(container, path = %path, error = %e, "No build log available");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_labels_and_display() {
        assert_eq!(Verdict::Reproducible.to_string(), "REPRODUCIBLE");
        let verdict = Verdict::not_reproducible("post-update build succeeded");
        assert_eq!(verdict.label(), "NOT_REPRODUCIBLE");
        assert_eq!(
            verdict.to_string(),
            "NOT_REPRODUCIBLE (post-update build succeeded)"
        );
        assert!(Verdict::indeterminate("x").is_indeterminate());
    }

    #[test]
    fn test_entry_serialization() {
        let entry = ReproductionEntry {
            status: ReproductionStatus::Reproducible,
            reason: None,
            derived_category: Some(FailureCategory::TestFailure),
            expected_category: FailureCategory::TestFailure,
            recorded_at: Utc::now(),
            test_breakdown: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "REPRODUCIBLE");
        assert_eq!(json["derivedCategory"], "TEST_FAILURE");
        assert!(json.get("reason").is_none());

        let back: ReproductionEntry = serde_json::from_value(json).unwrap();
        assert!(back.is_reproducible());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(VerifierState::LogExtracted.to_string(), "log-extracted");
    }
}
