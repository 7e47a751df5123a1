//! Result materializer
//!
//! Persists what a verdict leaves behind: the build log, the old and new
//! dependency artifacts, the updated record file, and committed images.

use crate::config::ReproConfig;
use crate::extract::{ArtifactExtractor, ExtractError};
use crate::record::{BreakingUpdateRecord, RecordError};
use crate::runtime::{ContainerRuntime, ImageRef, RuntimeError};
use crate::taxonomy::FailureCategory;
use crate::verifier::Verdict;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const STATUS_SUCCESSFUL: &str = "successful";
const STATUS_UNREPRODUCIBLE: &str = "unreproducible";

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Jar,
    Pom,
}

impl ArtifactKind {
    /// Lookup order when extracting a dependency
    pub const PREFERENCE: [ArtifactKind; 2] = [ArtifactKind::Jar, ArtifactKind::Pom];

    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Jar => "jar",
            ArtifactKind::Pom => "pom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

/// What was gathered while verifying one record
#[derive(Debug, Clone, Default)]
pub struct BuildEvidence {
    pub pre_container: Option<String>,
    pub post_container: Option<String>,
    /// Raw build log of the container the verdict was decided on
    pub log: Option<Vec<u8>>,
    pub derived_category: Option<FailureCategory>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializedResult {
    pub log_path: Option<PathBuf>,
    pub old_artifact: Option<StoredArtifact>,
    pub new_artifact: Option<StoredArtifact>,
    pub record_updated: bool,
    pub images: Vec<ImageRef>,
}

pub struct Materializer {
    config: ReproConfig,
    runtime: Arc<dyn ContainerRuntime>,
    extractor: ArtifactExtractor,
}

fn create_dir(path: &Path) -> Result<(), MaterializeError> {
    fs::create_dir_all(path).map_err(|source| MaterializeError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl Materializer {
    pub fn new(config: ReproConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let extractor = ArtifactExtractor::new(runtime.clone());
        Self {
            config,
            runtime,
            extractor,
        }
    }

    /// Creates the output directories
    pub fn prepare(&self) -> Result<(), MaterializeError> {
        create_dir(&self.config.successful_logs_dir())?;
        create_dir(&self.config.unreproducible_logs_dir())?;
        create_dir(&self.config.artifacts_dir)
    }

    /// Location of a dependency inside the build image's local repository
    pub fn remote_artifact_path(
        &self,
        record: &BreakingUpdateRecord,
        version: &str,
        kind: ArtifactKind,
    ) -> String {
        let artifact = &record.dependency_artifact_id;
        format!(
            "{}/{}/{}/{}/{}-{}.{}",
            self.config.dependency_repo.trim_end_matches('/'),
            record.group_path(),
            artifact,
            version,
            artifact,
            version,
            kind.extension()
        )
    }

    pub fn local_artifact_path(
        &self,
        record: &BreakingUpdateRecord,
        version: &str,
        kind: ArtifactKind,
    ) -> PathBuf {
        self.config
            .artifacts_dir
            .join(record.group_path())
            .join(version)
            .join(format!(
                "{}-{}.{}",
                record.dependency_artifact_id,
                version,
                kind.extension()
            ))
    }

    pub async fn store(
        &self,
        record: &mut BreakingUpdateRecord,
        record_path: &Path,
        verdict: &Verdict,
        evidence: &BuildEvidence,
    ) -> Result<MaterializedResult, MaterializeError> {
        let mut result = MaterializedResult::default();

        let (logs_dir, status) = match verdict {
            Verdict::Reproducible => (self.config.successful_logs_dir(), STATUS_SUCCESSFUL),
            Verdict::NotReproducible { .. } => {
                (self.config.unreproducible_logs_dir(), STATUS_UNREPRODUCIBLE)
            }
            Verdict::Indeterminate { .. } => return Ok(result),
        };
        info!(commit = %record.commit, status, "Storing result");

        // Container work first; local files are only written once it succeeded
        if verdict == &Verdict::Reproducible {
            result.images = self.commit_images(record, evidence).await?;
            if let Some(pre) = &evidence.pre_container {
                let version = record.previous_version.clone();
                result.old_artifact = self.store_artifact(record, pre, &version).await?;
            }
            if let Some(post) = &evidence.post_container {
                let version = record.new_version.clone();
                result.new_artifact = self.store_artifact(record, post, &version).await?;
            }
        }

        if let Some(log) = &evidence.log {
            let path = logs_dir.join(format!("{}.log", record.commit));
            create_dir(&logs_dir)?;
            fs::write(&path, log).map_err(|source| MaterializeError::Io {
                path: path.clone(),
                source,
            })?;
            result.log_path = Some(path);
        }

        // The record rewrite is the commit point of a stored result
        if let Err(e) = self.update_record(record, record_path, status, evidence, &result) {
            if let Some(path) = &result.log_path {
                if let Err(remove_err) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %remove_err, "Failed to remove log");
                }
            }
            return Err(e);
        }
        result.record_updated = true;

        Ok(result)
    }

    /// Extracts the jar for `version`, falling back to the pom
    async fn store_artifact(
        &self,
        record: &BreakingUpdateRecord,
        container: &str,
        version: &str,
    ) -> Result<Option<StoredArtifact>, MaterializeError> {
        let candidates: Vec<String> = ArtifactKind::PREFERENCE
            .iter()
            .map(|kind| self.remote_artifact_path(record, version, *kind))
            .collect();

        let (found, contents) = match self.extractor.copy_first_of(container, &candidates).await {
            Ok(hit) => hit,
            Err(e) if e.is_not_found() => {
                warn!(commit = %record.commit, version, "No jar or pom found for dependency");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let kind = if found == candidates[0] {
            ArtifactKind::Jar
        } else {
            ArtifactKind::Pom
        };
        let path = self.local_artifact_path(record, version, kind);
        if let Some(parent) = path.parent() {
            create_dir(parent)?;
        }
        fs::write(&path, contents).map_err(|source| MaterializeError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(commit = %record.commit, path = %path.display(), "Stored dependency artifact");

        Ok(Some(StoredArtifact { kind, path }))
    }

    fn update_record(
        &self,
        record: &mut BreakingUpdateRecord,
        record_path: &Path,
        status: &str,
        evidence: &BuildEvidence,
        result: &MaterializedResult,
    ) -> Result<(), MaterializeError> {
        let labels: Vec<&str> = evidence
            .derived_category
            .iter()
            .map(FailureCategory::as_str)
            .collect();
        let log_location = result
            .log_path
            .as_ref()
            .map(|p| p.display().to_string());

        let mut updated = record.clone();
        updated.set_extra("reproductionStatus", json!(status));
        updated.set_extra(
            "analysis",
            json!({
                "labels": labels,
                "reproductionLogLocation": log_location,
            }),
        );
        updated.save(record_path)?;
        *record = updated;
        Ok(())
    }

    async fn commit_images(
        &self,
        record: &BreakingUpdateRecord,
        evidence: &BuildEvidence,
    ) -> Result<Vec<ImageRef>, MaterializeError> {
        let mut images = Vec::new();
        let pairs = [
            (
                evidence.pre_container.as_deref(),
                ImageRef::pre(&self.config.registry, &record.commit),
            ),
            (
                evidence.post_container.as_deref(),
                ImageRef::post(&self.config.registry, &record.commit),
            ),
        ];

        for (container, image) in pairs {
            let Some(container) = container else {
                continue;
            };
            self.runtime
                .commit_container(container, &image.registry, &image.tag)
                .await?;
            images.push(image);
        }
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ContainerSpec, MockImage, MockRuntime, RuntimeCall};
    use tempfile::TempDir;

    const RECORD: &str = r#"{
        "project": "app",
        "breakingCommit": "c1",
        "dependencyGroupID": "org.example",
        "dependencyArtifactID": "lib",
        "previousVersion": "1.0",
        "newVersion": "2.0",
        "failureCategory": "TEST_FAILURE"
    }"#;

    struct Fixture {
        _dir: TempDir,
        config: ReproConfig,
        record_path: PathBuf,
        runtime: Arc<MockRuntime>,
    }

    fn fixture(pre: MockImage, post: MockImage) -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = ReproConfig::default()
            .with_registry("registry.test/bu")
            .with_output_root(dir.path());
        let record_path = dir.path().join("c1.json");
        fs::write(&record_path, RECORD).unwrap();
        let runtime = Arc::new(
            MockRuntime::new()
                .with_image("registry.test/bu:c1-pre", pre)
                .with_image("registry.test/bu:c1-post", post),
        );
        Fixture {
            _dir: dir,
            config,
            record_path,
            runtime,
        }
    }

    async fn start(runtime: &MockRuntime, image: &str) -> String {
        runtime
            .create_container(&ContainerSpec {
                image: image.to_string(),
                working_dir: "/app".to_string(),
                command: vec![],
                network_disabled: true,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reproducible_stores_everything() {
        let fx = fixture(
            MockImage::exiting(0).with_file("/root/.m2/repository/org/example/lib/1.0/lib-1.0.jar", "old"),
            MockImage::exiting(1).with_file("/root/.m2/repository/org/example/lib/2.0/lib-2.0.pom", "new"),
        );
        let pre = start(&fx.runtime, "registry.test/bu:c1-pre").await;
        let post = start(&fx.runtime, "registry.test/bu:c1-post").await;
        let materializer = Materializer::new(fx.config.clone(), fx.runtime.clone());
        materializer.prepare().unwrap();

        let mut record = BreakingUpdateRecord::load(&fx.record_path).unwrap();
        let evidence = BuildEvidence {
            pre_container: Some(pre),
            post_container: Some(post),
            log: Some(b"Tests run: 1, Failures: 1".to_vec()),
            derived_category: Some(FailureCategory::TestFailure),
        };
        let result = materializer
            .store(&mut record, &fx.record_path, &Verdict::Reproducible, &evidence)
            .await
            .unwrap();

        let log_path = result.log_path.clone().unwrap();
        assert!(log_path.ends_with("reproductionLogs/successful/c1.log"));
        assert_eq!(fs::read(&log_path).unwrap(), b"Tests run: 1, Failures: 1");

        let old = result.old_artifact.unwrap();
        assert_eq!(old.kind, ArtifactKind::Jar);
        assert!(old.path.ends_with("dependencyArtifacts/org/example/1.0/lib-1.0.jar"));
        let new = result.new_artifact.unwrap();
        assert_eq!(new.kind, ArtifactKind::Pom);
        assert_eq!(fs::read_to_string(&new.path).unwrap(), "new");

        let saved = BreakingUpdateRecord::load(&fx.record_path).unwrap();
        assert_eq!(saved.extra["reproductionStatus"], "successful");
        assert_eq!(saved.extra["analysis"]["labels"][0], "TEST_FAILURE");

        assert_eq!(
            result.images.iter().map(|i| i.to_string()).collect::<Vec<_>>(),
            vec!["registry.test/bu:c1-pre", "registry.test/bu:c1-post"]
        );
        assert!(fx.runtime.calls().iter().any(|c| matches!(
            c,
            RuntimeCall::CommitContainer { image, .. } if image == "registry.test/bu:c1-post"
        )));
    }

    #[tokio::test]
    async fn test_missing_artifacts_do_not_abort() {
        let fx = fixture(MockImage::exiting(0), MockImage::exiting(1));
        let pre = start(&fx.runtime, "registry.test/bu:c1-pre").await;
        let post = start(&fx.runtime, "registry.test/bu:c1-post").await;
        let materializer = Materializer::new(fx.config.clone(), fx.runtime.clone());

        let mut record = BreakingUpdateRecord::load(&fx.record_path).unwrap();
        let evidence = BuildEvidence {
            pre_container: Some(pre),
            post_container: Some(post),
            log: None,
            derived_category: Some(FailureCategory::TestFailure),
        };
        let result = materializer
            .store(&mut record, &fx.record_path, &Verdict::Reproducible, &evidence)
            .await
            .unwrap();

        assert!(result.old_artifact.is_none());
        assert!(result.new_artifact.is_none());
        assert!(result.record_updated);
        assert_eq!(result.images.len(), 2);
    }

    #[tokio::test]
    async fn test_not_reproducible_stores_log_only() {
        let fx = fixture(MockImage::exiting(0), MockImage::exiting(0));
        let post = start(&fx.runtime, "registry.test/bu:c1-post").await;
        let materializer = Materializer::new(fx.config.clone(), fx.runtime.clone());

        let mut record = BreakingUpdateRecord::load(&fx.record_path).unwrap();
        let evidence = BuildEvidence {
            pre_container: None,
            post_container: Some(post),
            log: Some(b"BUILD SUCCESS".to_vec()),
            derived_category: None,
        };
        let verdict = Verdict::NotReproducible {
            reason: "post build succeeded".into(),
        };
        let result = materializer
            .store(&mut record, &fx.record_path, &verdict, &evidence)
            .await
            .unwrap();

        assert!(result
            .log_path
            .unwrap()
            .ends_with("reproductionLogs/unreproducible/c1.log"));
        assert!(result.images.is_empty());
        assert!(!fx
            .runtime
            .calls()
            .iter()
            .any(|c| matches!(c, RuntimeCall::CommitContainer { .. })));
        let saved = BreakingUpdateRecord::load(&fx.record_path).unwrap();
        assert_eq!(saved.extra["reproductionStatus"], "unreproducible");
    }

    #[tokio::test]
    async fn test_failed_image_commit_leaves_record_untouched() {
        let fx = fixture(
            MockImage::exiting(0).with_file("/root/.m2/repository/org/example/lib/1.0/lib-1.0.jar", "old"),
            MockImage::exiting(1).failing_commit("disk full"),
        );
        let pre = start(&fx.runtime, "registry.test/bu:c1-pre").await;
        let post = start(&fx.runtime, "registry.test/bu:c1-post").await;
        let materializer = Materializer::new(fx.config.clone(), fx.runtime.clone());
        materializer.prepare().unwrap();
        let before = fs::read_to_string(&fx.record_path).unwrap();

        let mut record = BreakingUpdateRecord::load(&fx.record_path).unwrap();
        let evidence = BuildEvidence {
            pre_container: Some(pre),
            post_container: Some(post),
            log: Some(b"Tests run: 1, Failures: 1".to_vec()),
            derived_category: Some(FailureCategory::TestFailure),
        };
        let err = materializer
            .store(&mut record, &fx.record_path, &Verdict::Reproducible, &evidence)
            .await
            .unwrap_err();

        assert!(matches!(err, MaterializeError::Runtime(_)));
        assert_eq!(fs::read_to_string(&fx.record_path).unwrap(), before);
        assert!(!record.extra.contains_key("reproductionStatus"));
        assert!(!fx.config.successful_logs_dir().join("c1.log").exists());
        assert!(!fx
            .config
            .artifacts_dir
            .join("org/example/1.0/lib-1.0.jar")
            .exists());
    }

    #[tokio::test]
    async fn test_failed_record_rewrite_removes_log() {
        let fx = fixture(MockImage::exiting(0), MockImage::exiting(0));
        let post = start(&fx.runtime, "registry.test/bu:c1-post").await;
        let materializer = Materializer::new(fx.config.clone(), fx.runtime.clone());
        materializer.prepare().unwrap();

        let mut record = BreakingUpdateRecord::load(&fx.record_path).unwrap();
        let evidence = BuildEvidence {
            pre_container: None,
            post_container: Some(post),
            log: Some(b"BUILD SUCCESS".to_vec()),
            derived_category: None,
        };
        let verdict = Verdict::NotReproducible {
            reason: "post build succeeded".into(),
        };
        let missing = fx.record_path.with_file_name("gone/c1.json");
        let err = materializer
            .store(&mut record, &missing, &verdict, &evidence)
            .await
            .unwrap_err();

        assert!(matches!(err, MaterializeError::Record(_)));
        assert!(!fx.config.unreproducible_logs_dir().join("c1.log").exists());
        assert!(!record.extra.contains_key("reproductionStatus"));
    }

    #[tokio::test]
    async fn test_indeterminate_writes_nothing() {
        let fx = fixture(MockImage::exiting(0), MockImage::exiting(1));
        let materializer = Materializer::new(fx.config.clone(), fx.runtime.clone());
        let before = fs::read_to_string(&fx.record_path).unwrap();

        let mut record = BreakingUpdateRecord::load(&fx.record_path).unwrap();
        let verdict = Verdict::Indeterminate {
            reason: "pull failed".into(),
        };
        let result = materializer
            .store(&mut record, &fx.record_path, &verdict, &BuildEvidence::default())
            .await
            .unwrap();

        assert_eq!(result, MaterializedResult::default());
        assert_eq!(fs::read_to_string(&fx.record_path).unwrap(), before);
    }

    #[test]
    fn test_artifact_paths() {
        let fx = fixture(MockImage::exiting(0), MockImage::exiting(0));
        let materializer = Materializer::new(fx.config.clone(), fx.runtime.clone());
        let record = BreakingUpdateRecord::load(&fx.record_path).unwrap();

        assert_eq!(
            materializer.remote_artifact_path(&record, "2.0", ArtifactKind::Jar),
            "/root/.m2/repository/org/example/lib/2.0/lib-2.0.jar"
        );
        assert!(materializer
            .local_artifact_path(&record, "1.0", ArtifactKind::Pom)
            .ends_with("org/example/1.0/lib-1.0.pom"));
    }
}
