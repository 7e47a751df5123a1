use super::{BuildOutcome, ContainerRuntime, ContainerSpec, ImageRef, RuntimeError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tracks the containers created for one record.
///
/// Containers are never removed implicitly; callers copy what they need out
/// of them first and then call [`ContainerSession::cleanup`].
pub struct ContainerSession {
    runtime: Arc<dyn ContainerRuntime>,
    containers: Vec<String>,
}

impl ContainerSession {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            containers: Vec::new(),
        }
    }

    /// Containers created by this session and not yet cleaned up
    pub fn tracked(&self) -> &[String] {
        &self.containers
    }

    /// Makes the image available locally, pulling it on a miss
    pub async fn ensure_image(&self, image: &ImageRef) -> Result<(), RuntimeError> {
        let reference = image.reference();
        match self.runtime.inspect_image(&reference).await {
            Ok(()) => {
                debug!(image = %reference, "Image present locally");
                Ok(())
            }
            Err(RuntimeError::ImageNotFound(_)) => self.runtime.pull_image(&reference).await,
            Err(e) => Err(e),
        }
    }

    /// Runs `command` in a new, network-isolated container of `image`.
    ///
    /// Any runtime error before an exit code is known yields
    /// [`BuildOutcome::Indeterminate`]; it is never reported as a build
    /// failure.
    pub async fn resolve_and_run(
        &mut self,
        image: &ImageRef,
        working_dir: &str,
        command: &[String],
    ) -> BuildOutcome {
        if let Err(e) = self.ensure_image(image).await {
            warn!(image = %image, error = %e, "Image unavailable");
            return BuildOutcome::Indeterminate {
                reason: e.to_string(),
            };
        }

        let spec = ContainerSpec {
            image: image.reference(),
            working_dir: working_dir.to_string(),
            command: command.to_vec(),
            network_disabled: true,
        };

        let container = match self.runtime.create_container(&spec).await {
            Ok(id) => id,
            Err(e) => {
                warn!(image = %image, error = %e, "Failed to create container");
                return BuildOutcome::Indeterminate {
                    reason: e.to_string(),
                };
            }
        };
        self.containers.push(container.clone());

        if let Err(e) = self.runtime.start_container(&container).await {
            warn!(container = %container, error = %e, "Failed to start container");
            return BuildOutcome::Indeterminate {
                reason: e.to_string(),
            };
        }

        match self.runtime.wait_container(&container).await {
            Ok(exit_code) => {
                info!(image = %image, container = %container, exit_code, "Build finished");
                BuildOutcome::from_exit_code(container, exit_code)
            }
            Err(e) => {
                warn!(container = %container, error = %e, "Failed to wait for container");
                BuildOutcome::Indeterminate {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Removes every tracked container. Safe to call repeatedly.
    ///
    /// Returns the number of containers removed by this call.
    pub async fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        for container in std::mem::take(&mut self.containers) {
            match self.runtime.remove_container(&container, true).await {
                Ok(()) => removed += 1,
                Err(e) if e.is_not_found() => {
                    debug!(container = %container, "Container already gone");
                }
                Err(e) => warn!(container = %container, error = %e, "Failed to remove container"),
            }
        }
        removed
    }

    /// Force-removes images; missing images are skipped
    pub async fn remove_images(&self, images: &[ImageRef]) -> usize {
        let mut removed = 0;
        for image in images {
            match self.runtime.remove_image(&image.reference(), true).await {
                Ok(()) => {
                    info!(image = %image, "Removed image");
                    removed += 1;
                }
                Err(e) if e.is_not_found() => debug!(image = %image, "Image already absent"),
                Err(e) => warn!(image = %image, error = %e, "Failed to remove image"),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockImage, MockRuntime, RuntimeCall};

    const REGISTRY: &str = "registry.test/breaking";

    fn command() -> Vec<String> {
        vec!["sh".into(), "-c".into(), "mvn test".into()]
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let mock = Arc::new(
            MockRuntime::new()
                .with_image(ImageRef::pre(REGISTRY, "c1").reference(), MockImage::exiting(0))
                .with_image(ImageRef::post(REGISTRY, "c1").reference(), MockImage::exiting(1)),
        );
        let mut session = ContainerSession::new(mock.clone());

        let pre = session
            .resolve_and_run(&ImageRef::pre(REGISTRY, "c1"), "/app", &command())
            .await;
        let post = session
            .resolve_and_run(&ImageRef::post(REGISTRY, "c1"), "/app", &command())
            .await;

        assert!(pre.is_success());
        assert!(matches!(post, BuildOutcome::Failed { exit_code: 1, .. }));
        assert_eq!(session.tracked().len(), 2);
    }

    #[tokio::test]
    async fn test_containers_run_without_network() {
        let image = ImageRef::pre(REGISTRY, "c1");
        let mock = Arc::new(MockRuntime::new().with_image(image.reference(), MockImage::exiting(0)));
        let mut session = ContainerSession::new(mock.clone());

        session.resolve_and_run(&image, "/app", &command()).await;

        let created = mock
            .calls()
            .into_iter()
            .find_map(|call| match call {
                RuntimeCall::CreateContainer(spec) => Some(spec),
                _ => None,
            })
            .expect("container created");
        assert!(created.network_disabled);
        assert_eq!(created.working_dir, "/app");
    }

    #[tokio::test]
    async fn test_missing_local_image_is_pulled() {
        let image = ImageRef::post(REGISTRY, "c2");
        let mock = Arc::new(
            MockRuntime::new().with_image(image.reference(), MockImage::exiting(0).remote()),
        );
        let mut session = ContainerSession::new(mock.clone());

        let outcome = session.resolve_and_run(&image, "/app", &command()).await;

        assert!(outcome.is_success());
        assert!(mock
            .calls()
            .contains(&RuntimeCall::PullImage(image.reference())));
    }

    #[tokio::test]
    async fn test_unpullable_image_is_indeterminate() {
        let mock = Arc::new(MockRuntime::new());
        let mut session = ContainerSession::new(mock.clone());

        let outcome = session
            .resolve_and_run(&ImageRef::pre(REGISTRY, "missing"), "/app", &command())
            .await;

        assert!(outcome.is_indeterminate());
        assert!(session.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let image = ImageRef::pre(REGISTRY, "c1");
        let mock = Arc::new(MockRuntime::new().with_image(image.reference(), MockImage::exiting(0)));
        let mut session = ContainerSession::new(mock.clone());

        session.resolve_and_run(&image, "/app", &command()).await;
        session.resolve_and_run(&image, "/app", &command()).await;

        assert_eq!(session.cleanup().await, 2);
        assert_eq!(session.cleanup().await, 0);
        assert_eq!(mock.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_remove_images_skips_absent() {
        let present = ImageRef::pre(REGISTRY, "c1");
        let mock =
            Arc::new(MockRuntime::new().with_image(present.reference(), MockImage::exiting(0)));
        let session = ContainerSession::new(mock.clone());

        let removed = session
            .remove_images(&[present.clone(), ImageRef::post(REGISTRY, "c1")])
            .await;
        assert_eq!(removed, 1);
        assert_eq!(session.remove_images(&[present]).await, 0);
    }
}
