//! Container session manager
//!
//! [`ContainerRuntime`] is the boundary to the external container engine.
//! [`DockerRuntime`] talks to a local Docker daemon through `bollard`;
//! [`MockRuntime`] is a scripted in-memory engine for tests. The orchestrator
//! drives either through a [`ContainerSession`], which resolves images, runs
//! builds, and tracks the containers it created.

mod docker;
pub mod mock;
mod session;

pub use docker::DockerRuntime;
pub use mock::{MockImage, MockRuntime, RuntimeCall};
pub use session::ContainerSession;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Tag suffix of the image holding the state before the update
pub const PRE_SUFFIX: &str = "-pre";

/// Tag suffix of the image holding the state including the update
pub const POST_SUFFIX: &str = "-post";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Failed to pull image {image}: {message}")]
    PullFailed { image: String, message: String },

    #[error("No such container: {0}")]
    ContainerNotFound(String),

    #[error("No such path in container {container}: {path}")]
    PathNotFound { container: String, path: String },

    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("Container runtime error: {0}")]
    Api(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RuntimeError::ImageNotFound(_)
                | RuntimeError::ContainerNotFound(_)
                | RuntimeError::PathNotFound { .. }
        )
    }
}

/// Which side of the update an image captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageState {
    Pre,
    Post,
}

impl ImageState {
    pub fn suffix(&self) -> &'static str {
        match self {
            ImageState::Pre => PRE_SUFFIX,
            ImageState::Post => POST_SUFFIX,
        }
    }
}

impl fmt::Display for ImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageState::Pre => write!(f, "pre"),
            ImageState::Post => write!(f, "post"),
        }
    }
}

/// `<registry>:<commit><suffix>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub registry: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(registry: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            tag: tag.into(),
        }
    }

    pub fn for_state(registry: &str, commit: &str, state: ImageState) -> Self {
        Self::new(registry, format!("{}{}", commit, state.suffix()))
    }

    pub fn pre(registry: &str, commit: &str) -> Self {
        Self::for_state(registry, commit, ImageState::Pre)
    }

    pub fn post(registry: &str, commit: &str) -> Self {
        Self::for_state(registry, commit, ImageState::Post)
    }

    /// Full reference as understood by the container engine
    pub fn reference(&self) -> String {
        format!("{}:{}", self.registry, self.tag)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.registry, self.tag)
    }
}

/// What to run inside a fresh container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub working_dir: String,
    pub command: Vec<String>,
    pub network_disabled: bool,
}

/// Result of running one build container to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeeded { container: String },
    Failed { container: String, exit_code: i64 },
    /// Infrastructure problem; says nothing about the build itself
    Indeterminate { reason: String },
}

impl BuildOutcome {
    pub fn from_exit_code(container: String, exit_code: i64) -> Self {
        if exit_code == 0 {
            BuildOutcome::Succeeded { container }
        } else {
            BuildOutcome::Failed {
                container,
                exit_code,
            }
        }
    }

    pub fn container(&self) -> Option<&str> {
        match self {
            BuildOutcome::Succeeded { container } | BuildOutcome::Failed { container, .. } => {
                Some(container)
            }
            BuildOutcome::Indeterminate { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Succeeded { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, BuildOutcome::Failed { .. })
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self, BuildOutcome::Indeterminate { .. })
    }
}

/// Operations required from the container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Succeeds if the image exists locally, `ImageNotFound` otherwise
    async fn inspect_image(&self, image: &str) -> Result<(), RuntimeError>;

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Returns the new container id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, container: &str) -> Result<(), RuntimeError>;

    /// Blocks until the container stops and returns its exit code
    async fn wait_container(&self, container: &str) -> Result<i64, RuntimeError>;

    /// Returns a tar archive of `path`, `PathNotFound` if it does not exist
    async fn copy_from_container(&self, container: &str, path: &str)
        -> Result<Vec<u8>, RuntimeError>;

    async fn commit_container(
        &self,
        container: &str,
        repo: &str,
        tag: &str,
    ) -> Result<(), RuntimeError>;

    async fn remove_image(&self, image: &str, force: bool) -> Result<(), RuntimeError>;

    async fn remove_container(&self, container: &str, force: bool) -> Result<(), RuntimeError>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_refs_follow_naming_contract() {
        let registry = "ghcr.io/chains-project/breaking-updates";
        assert_eq!(
            ImageRef::pre(registry, "c1").reference(),
            "ghcr.io/chains-project/breaking-updates:c1-pre"
        );
        assert_eq!(
            ImageRef::post(registry, "c1").to_string(),
            "ghcr.io/chains-project/breaking-updates:c1-post"
        );
    }

    #[test]
    fn test_outcome_from_exit_code() {
        let ok = BuildOutcome::from_exit_code("abc".into(), 0);
        assert!(ok.is_success());
        assert_eq!(ok.container(), Some("abc"));

        let failed = BuildOutcome::from_exit_code("def".into(), 1);
        assert!(failed.is_failure());
        assert!(!failed.is_indeterminate());

        let infra = BuildOutcome::Indeterminate {
            reason: "pull failed".into(),
        };
        assert!(infra.is_indeterminate());
        assert!(!infra.is_failure());
        assert_eq!(infra.container(), None);
    }

    #[test]
    fn test_not_found_errors() {
        assert!(RuntimeError::ImageNotFound("x".into()).is_not_found());
        assert!(RuntimeError::PathNotFound {
            container: "c".into(),
            path: "/p".into()
        }
        .is_not_found());
        assert!(!RuntimeError::Api("boom".into()).is_not_found());
    }
}
