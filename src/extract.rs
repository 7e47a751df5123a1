//! Copies files and directories out of container filesystems
//!
//! The runtime hands back tar archives; this module unpacks them into local
//! storage.

use crate::runtime::{ContainerRuntime, RuntimeError};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tar::EntryType;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Path not found in container {container}: {path}")]
    NotFound { container: String, path: String },

    #[error(transparent)]
    Runtime(RuntimeError),

    #[error("Unreadable archive for {path}: {source}")]
    Archive {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive for {0} contains no regular file")]
    EmptyArchive(String),

    #[error("Refusing to unpack entry outside target directory: {0}")]
    UnsafeEntry(String),

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExtractError::NotFound { .. })
    }
}

impl From<RuntimeError> for ExtractError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::PathNotFound { container, path } => {
                ExtractError::NotFound { container, path }
            }
            other => ExtractError::Runtime(other),
        }
    }
}

pub struct ArtifactExtractor {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ArtifactExtractor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Contents of the single regular file at `remote_path`
    pub async fn copy_path(&self, container: &str, remote_path: &str) -> Result<Vec<u8>, ExtractError> {
        let archive = self.runtime.copy_from_container(container, remote_path).await?;
        first_regular_file(&archive, remote_path)
    }

    /// Tries each candidate in order and returns the first one present
    pub async fn copy_first_of(
        &self,
        container: &str,
        candidates: &[String],
    ) -> Result<(String, Vec<u8>), ExtractError> {
        for candidate in candidates {
            match self.copy_path(container, candidate).await {
                Ok(contents) => return Ok((candidate.clone(), contents)),
                Err(e) if e.is_not_found() => {
                    trace!(container, path = %candidate, "Candidate not present");
                }
                Err(e) => return Err(e),
            }
        }
        Err(ExtractError::NotFound {
            container: container.to_string(),
            path: candidates.join(", "),
        })
    }

    /// Unpacks the directory at `remote_path` into `local_dir`.
    ///
    /// Files that already exist locally are left untouched. Returns the
    /// number of files written.
    pub async fn copy_tree(
        &self,
        container: &str,
        remote_path: &str,
        local_dir: &Path,
    ) -> Result<usize, ExtractError> {
        let archive = self.runtime.copy_from_container(container, remote_path).await?;
        let written = unpack_tree(&archive, remote_path, local_dir)?;
        debug!(container, remote_path, written, "Copied directory");
        Ok(written)
    }
}

fn archive_error(path: &str) -> impl Fn(std::io::Error) -> ExtractError + '_ {
    move |source| ExtractError::Archive {
        path: path.to_string(),
        source,
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), ExtractError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ExtractError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, contents).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn first_regular_file(archive: &[u8], remote_path: &str) -> Result<Vec<u8>, ExtractError> {
    let mut archive = tar::Archive::new(archive);
    for entry in archive.entries().map_err(archive_error(remote_path))? {
        let mut entry = entry.map_err(archive_error(remote_path))?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut contents)
            .map_err(archive_error(remote_path))?;
        return Ok(contents);
    }
    Err(ExtractError::EmptyArchive(remote_path.to_string()))
}

/// Strips the archive root (the copied directory's own name) and checks
/// that what remains stays inside the target.
fn relative_target(entry_path: &Path) -> Result<Option<PathBuf>, ExtractError> {
    let mut components = entry_path.components();
    match components.next() {
        Some(Component::Normal(_)) => {}
        Some(Component::CurDir) => return relative_target(components.as_path()),
        None => return Ok(None),
        Some(_) => {
            return Err(ExtractError::UnsafeEntry(
                entry_path.display().to_string(),
            ))
        }
    }

    let mut relative = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ExtractError::UnsafeEntry(
                    entry_path.display().to_string(),
                ))
            }
        }
    }
    Ok((!relative.as_os_str().is_empty()).then_some(relative))
}

fn unpack_tree(archive: &[u8], remote_path: &str, local_dir: &Path) -> Result<usize, ExtractError> {
    fs::create_dir_all(local_dir).map_err(|source| ExtractError::Io {
        path: local_dir.to_path_buf(),
        source,
    })?;

    let mut archive = tar::Archive::new(archive);
    let mut written = 0;
    for entry in archive.entries().map_err(archive_error(remote_path))? {
        let mut entry = entry.map_err(archive_error(remote_path))?;
        let entry_path = entry.path().map_err(archive_error(remote_path))?.into_owned();
        let Some(relative) = relative_target(&entry_path)? else {
            continue;
        };
        let target = local_dir.join(relative);

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target).map_err(|source| ExtractError::Io {
                    path: target.clone(),
                    source,
                })?;
            }
            EntryType::Regular => {
                if target.exists() {
                    trace!(path = %target.display(), "Skipping existing file");
                    continue;
                }
                let mut contents = Vec::with_capacity(entry.size() as usize);
                entry
                    .read_to_end(&mut contents)
                    .map_err(archive_error(remote_path))?;
                write_file(&target, &contents)?;
                written += 1;
            }
            other => {
                trace!(path = %entry_path.display(), kind = ?other, "Skipping non-regular entry");
            }
        }
    }
    Ok(written)
}
