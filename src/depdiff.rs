//! Dependency diff pipeline
//!
//! For every record not yet in the diff ledger, dumps the dependency tree in
//! the pre- and post-update images, stores both dumps plus a diff listing,
//! and records the change counts.

use crate::config::ReproConfig;
use crate::deptree::{self, DependencyTreeDiff};
use crate::extract::ArtifactExtractor;
use crate::ledger::{Ledger, LedgerError};
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::record::{list_record_files, BreakingUpdateRecord, RecordError};
use crate::runtime::{BuildOutcome, ContainerRuntime, ContainerSession, ImageRef, ImageState};
use crate::taxonomy::decode_log;
use crate::verifier::RunSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DepDiffError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Records(#[from] RecordError),

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Ledger value of the dependency diff pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyDiffCounts {
    pub artifact_changes: usize,
    pub version_changes: usize,
    pub scope_changes: usize,
    pub packaging_changes: usize,
    pub unclassified: usize,
    pub added_deps: usize,
    pub removed_deps: usize,
    pub order_suspect: bool,
    pub recorded_at: DateTime<Utc>,
}

impl From<&DependencyTreeDiff> for DependencyDiffCounts {
    fn from(diff: &DependencyTreeDiff) -> Self {
        Self {
            artifact_changes: diff.counts.artifact,
            version_changes: diff.counts.version,
            scope_changes: diff.counts.scope,
            packaging_changes: diff.counts.packaging,
            unclassified: diff.counts.unclassified,
            added_deps: diff.added,
            removed_deps: diff.removed,
            order_suspect: diff.is_order_suspect(),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    Skipped,
    Recorded(DependencyDiffCounts),
    /// Infrastructure failure; not persisted
    Indeterminate { reason: String },
}

pub struct DependencyDiffPipeline {
    config: ReproConfig,
    session: ContainerSession,
    extractor: ArtifactExtractor,
    ledger: Ledger<DependencyDiffCounts>,
    progress: Arc<dyn ProgressHandler>,
}

fn write(path: &Path, contents: &str) -> Result<(), DepDiffError> {
    fs::write(path, contents).map_err(|source| DepDiffError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl DependencyDiffPipeline {
    pub fn new(
        config: ReproConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, DepDiffError> {
        let ledger = Ledger::open(config.diff_ledger_path())?;
        fs::create_dir_all(&config.trees_dir).map_err(|source| DepDiffError::Io {
            path: config.trees_dir.clone(),
            source,
        })?;

        Ok(Self {
            session: ContainerSession::new(runtime.clone()),
            extractor: ArtifactExtractor::new(runtime),
            ledger,
            progress: Arc::new(NoOpHandler),
            config,
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn ledger(&self) -> &Ledger<DependencyDiffCounts> {
        &self.ledger
    }

    pub fn tree_path(&self, commit: &str, state: ImageState) -> PathBuf {
        self.config
            .trees_dir
            .join(format!("{}{}.txt", commit, state.suffix()))
    }

    pub fn diff_path(&self, commit: &str) -> PathBuf {
        self.config.trees_dir.join(format!("{}-diff.txt", commit))
    }

    pub async fn run(&mut self, benchmark_dir: &Path) -> Result<RunSummary, DepDiffError> {
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
            let record = match BreakingUpdateRecord::load(&path) {
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

            match self.diff_record(&record).await? {
                DiffOutcome::Skipped => summary.skipped += 1,
                DiffOutcome::Recorded(_) => summary.recorded += 1,
                DiffOutcome::Indeterminate { .. } => summary.indeterminate.push(record.commit),
            }
        }

        self.progress.on_progress(&ProgressEvent::RunCompleted {
            summary: summary.clone(),
            elapsed: start.elapsed(),
        });
        Ok(summary)
    }

    pub async fn diff_record(
        &mut self,
        record: &BreakingUpdateRecord,
    ) -> Result<DiffOutcome, DepDiffError> {
        let commit = record.commit.as_str();
        if self.ledger.has(commit) {
            self.progress.on_progress(&ProgressEvent::RecordSkipped {
                commit: commit.to_string(),
            });
            return Ok(DiffOutcome::Skipped);
        }

        let outcome = self.compute(record).await;
        self.session.cleanup().await;

        let (before, after) = match outcome? {
            Ok(trees) => trees,
            Err(reason) => {
                warn!(commit, reason = %reason, "Dependency diff indeterminate");
                return Ok(DiffOutcome::Indeterminate { reason });
            }
        };

        let diff = deptree::diff(&before, &after);
        write(&self.diff_path(commit), &diff.render())?;

        let counts = DependencyDiffCounts::from(&diff);
        self.ledger.put(commit, counts.clone())?;
        self.progress.on_progress(&ProgressEvent::DiffRecorded {
            commit: commit.to_string(),
            changes: diff.counts.total(),
            order_suspect: counts.order_suspect,
        });
        Ok(DiffOutcome::Recorded(counts))
    }

    /// Outer error is local I/O, inner error an infrastructure failure
    async fn compute(
        &mut self,
        record: &BreakingUpdateRecord,
    ) -> Result<Result<(Vec<String>, Vec<String>), String>, DepDiffError> {
        let before = match self.dump_tree(record, ImageState::Pre).await? {
            Ok(tree) => tree,
            Err(reason) => return Ok(Err(reason)),
        };
        let after = match self.dump_tree(record, ImageState::Post).await? {
            Ok(tree) => tree,
            Err(reason) => return Ok(Err(reason)),
        };
        Ok(Ok((before, after)))
    }

    async fn dump_tree(
        &mut self,
        record: &BreakingUpdateRecord,
        state: ImageState,
    ) -> Result<Result<Vec<String>, String>, DepDiffError> {
        let commit = record.commit.as_str();
        let project_dir = record.project_dir();
        let image = ImageRef::for_state(&self.config.registry, commit, state);
        let command = self.config.tree_shell_command();

        let container = match self
            .session
            .resolve_and_run(&image, &project_dir, &command)
            .await
        {
            BuildOutcome::Indeterminate { reason } => return Ok(Err(reason)),
            BuildOutcome::Failed {
                container,
                exit_code,
            } => {
                warn!(commit, image = %image, exit_code, "Tree command failed");
                container
            }
            BuildOutcome::Succeeded { container } => container,
        };

        if self.config.copy_project {
            let target = self
                .config
                .trees_dir
                .join(format!("{}{}", commit, state.suffix()));
            match self
                .extractor
                .copy_tree(&container, &project_dir, &target)
                .await
            {
                Ok(written) => info!(commit, state = %state, written, "Copied project"),
                Err(e) => warn!(commit, state = %state, error = %e, "Could not copy project"),
            }
        }

        let tree_file = format!("{}/{}", project_dir, self.config.tree_file_name);
        let raw = match self.extractor.copy_path(&container, &tree_file).await {
            Ok(raw) => raw,
            Err(e) => return Ok(Err(format!("no dependency tree for {}: {}", image, e))),
        };

        let lines = deptree::parse_tree(&decode_log(&raw));
        let path = self.tree_path(commit, state);
        write(&path, &lines.join("\n"))?;
        debug!(commit, state = %state, lines = lines.len(), "Stored dependency tree");
        Ok(Ok(lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_from_diff() {
        let before = vec!["a:b:jar:1:compile", "c:d:jar:1:test"];
        let after = vec!["a:b:jar:2:compile", "c:d:jar:1:test"];
        let counts = DependencyDiffCounts::from(&deptree::diff(&before, &after));

        assert_eq!(counts.version_changes, 1);
        assert_eq!(counts.artifact_changes, 0);
        assert_eq!(counts.added_deps, 1);
        assert_eq!(counts.removed_deps, 1);
        assert!(!counts.order_suspect);

        let json = serde_json::to_value(&counts).unwrap();
        assert_eq!(json["versionChanges"], 1);
        assert_eq!(json["addedDeps"], 1);
    }
}
