//! Breaking update input records
//!
//! One JSON file per record in the benchmark directory. Records are decoded
//! directly into [`BreakingUpdateRecord`]; a missing field or an unknown
//! failure category is a decode error for that file only.

use crate::taxonomy::FailureCategory;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Failed to read record {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to list benchmark directory {}: {source}", path.display())]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Key the commit id was read under; rewrites use the same key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommitKey {
    #[default]
    BreakingCommit,
    Commit,
}

impl CommitKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitKey::BreakingCommit => "breakingCommit",
            CommitKey::Commit => "commit",
        }
    }
}

/// A recorded breaking dependency update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakingUpdateRecord {
    #[serde(rename = "breakingCommit", alias = "commit")]
    pub commit: String,
    pub project: String,
    #[serde(rename = "dependencyGroupID")]
    pub dependency_group_id: String,
    #[serde(rename = "dependencyArtifactID")]
    pub dependency_artifact_id: String,
    pub previous_version: String,
    pub new_version: String,
    pub failure_category: FailureCategory,
    /// Upstream metadata this crate does not interpret, kept for rewrites
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip)]
    pub commit_key: CommitKey,
}

impl BreakingUpdateRecord {
    /// Record identifier used as the ledger key
    pub fn id(&self) -> &str {
        &self.commit
    }

    /// Working directory of the project inside the build image
    pub fn project_dir(&self) -> String {
        format!("/{}", self.project)
    }

    /// Group id as a repository path, `org.foo` -> `org/foo`
    pub fn group_path(&self) -> String {
        self.dependency_group_id.replace('.', "/")
    }

    pub fn from_json(path: &Path, json: &str) -> Result<Self, RecordError> {
        let malformed = |source| RecordError::Malformed {
            path: path.to_path_buf(),
            source,
        };
        let value: Value = serde_json::from_str(json).map_err(malformed)?;
        let commit_key = match (value.get("breakingCommit"), value.get("commit")) {
            (None, Some(_)) => CommitKey::Commit,
            _ => CommitKey::BreakingCommit,
        };
        let mut record: Self = serde_json::from_value(value).map_err(malformed)?;
        record.commit_key = commit_key;
        Ok(record)
    }

    pub fn load(path: &Path) -> Result<Self, RecordError> {
        let json = fs::read_to_string(path).map_err(|source| RecordError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(path, &json)
    }

    /// Writes the record back under the commit key it was read with,
    /// including any extra upstream fields. The file is replaced atomically.
    pub fn save(&self, path: &Path) -> Result<(), RecordError> {
        let encode_err = |source| RecordError::Malformed {
            path: path.to_path_buf(),
            source,
        };
        let io_err = |source: std::io::Error| RecordError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut value = serde_json::to_value(self).map_err(encode_err)?;
        if self.commit_key != CommitKey::BreakingCommit {
            if let Value::Object(map) = &mut value {
                if let Some(commit) = map.remove(CommitKey::BreakingCommit.as_str()) {
                    map.insert(self.commit_key.as_str().to_string(), commit);
                }
            }
        }
        let json = serde_json::to_string_pretty(&value).map_err(encode_err)?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    /// Sets an upstream metadata field such as `reproductionStatus`
    pub fn set_extra(&mut self, key: &str, value: Value) {
        self.extra.insert(key.to_string(), value);
    }
}

/// Lists record files in a benchmark directory, sorted by file name
pub fn list_record_files(benchmark_dir: &Path) -> Result<Vec<PathBuf>, RecordError> {
    let entries = fs::read_dir(benchmark_dir).map_err(|source| RecordError::ListDir {
        path: benchmark_dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| RecordError::ListDir {
            path: benchmark_dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
