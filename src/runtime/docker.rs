use super::{ContainerRuntime, ContainerSpec, RuntimeError};
use async_trait::async_trait;
use bollard::container::{
    Config, DownloadFromContainerOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{CommitContainerOptions, CreateImageOptions, RemoveImageOptions};
use bollard::service::HostConfig;
use bollard::Docker;
use bytes::Bytes;
use futures_util::stream::{StreamExt, TryStreamExt};
use tracing::{debug, info};

const NOT_FOUND: u16 = 404;

/// Container runtime backed by the local Docker (or Podman) daemon
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using `DOCKER_HOST` or the platform default socket
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Checks that the daemon answers
    pub async fn ping(&self) -> Result<String, RuntimeError> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        let api_version = version.api_version.unwrap_or_else(|| "unknown".to_string());
        debug!("Docker API version: {}", api_version);
        Ok(api_version)
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: NOT_FOUND,
            ..
        }
    )
}

fn api_error(err: BollardError) -> RuntimeError {
    match err {
        BollardError::HyperResponseError { .. } | BollardError::IOError { .. } => {
            RuntimeError::Unavailable(err.to_string())
        }
        other => RuntimeError::Api(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn inspect_image(&self, image: &str) -> Result<(), RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Err(RuntimeError::ImageNotFound(image.to_string())),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        info!(image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .try_for_each(|progress| async move {
                if let Some(status) = progress.status {
                    debug!(status = %status, "pull progress");
                }
                Ok(())
            })
            .await
            .map_err(|e| RuntimeError::PullFailed {
                image: image.to_string(),
                message: e.to_string(),
            })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let host_config = spec.network_disabled.then(|| HostConfig {
            network_mode: Some("none".to_string()),
            ..Default::default()
        });

        let config = Config {
            image: Some(spec.image.clone()),
            working_dir: Some(spec.working_dir.clone()),
            cmd: Some(spec.command.clone()),
            network_disabled: Some(spec.network_disabled),
            host_config,
            ..Default::default()
        };

        let response = self
            .docker
            .create_container::<String, String>(None, config)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    RuntimeError::ImageNotFound(spec.image.clone())
                } else {
                    api_error(e)
                }
            })?;

        debug!(container = %response.id, image = %spec.image, "Created container");
        Ok(response.id)
    }

    async fn start_container(&self, container: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(container, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    RuntimeError::ContainerNotFound(container.to_string())
                } else {
                    api_error(e)
                }
            })
    }

    async fn wait_container(&self, container: &str) -> Result<i64, RuntimeError> {
        let stream = self.docker.wait_container(
            container,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        futures_util::pin_mut!(stream);

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) if is_not_found(&e) => {
                Err(RuntimeError::ContainerNotFound(container.to_string()))
            }
            Some(Err(e)) => Err(api_error(e)),
            None => Err(RuntimeError::Api(format!(
                "wait stream for {} ended without a status",
                container
            ))),
        }
    }

    async fn copy_from_container(
        &self,
        container: &str,
        path: &str,
    ) -> Result<Vec<u8>, RuntimeError> {
        let chunks: Vec<Bytes> = self
            .docker
            .download_from_container(container, Some(DownloadFromContainerOptions { path }))
            .try_collect()
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    RuntimeError::PathNotFound {
                        container: container.to_string(),
                        path: path.to_string(),
                    }
                } else {
                    api_error(e)
                }
            })?;

        let mut archive = Vec::with_capacity(chunks.iter().map(Bytes::len).sum());
        for chunk in chunks {
            archive.extend_from_slice(&chunk);
        }
        Ok(archive)
    }

    async fn commit_container(
        &self,
        container: &str,
        repo: &str,
        tag: &str,
    ) -> Result<(), RuntimeError> {
        let options = CommitContainerOptions {
            container,
            repo,
            tag,
            pause: true,
            ..Default::default()
        };

        self.docker
            .commit_container(options, Config::<String>::default())
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    RuntimeError::ContainerNotFound(container.to_string())
                } else {
                    api_error(e)
                }
            })?;

        info!(container, image = %format!("{}:{}", repo, tag), "Committed image");
        Ok(())
    }

    async fn remove_image(&self, image: &str, force: bool) -> Result<(), RuntimeError> {
        self.docker
            .remove_image(
                image,
                Some(RemoveImageOptions {
                    force,
                    ..Default::default()
                }),
                None,
            )
            .await
            .map(|_| ())
            .map_err(|e| {
                if is_not_found(&e) {
                    RuntimeError::ImageNotFound(image.to_string())
                } else {
                    api_error(e)
                }
            })
    }

    async fn remove_container(&self, container: &str, force: bool) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                container,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    RuntimeError::ContainerNotFound(container.to_string())
                } else {
                    api_error(e)
                }
            })
    }

    fn name(&self) -> &str {
        "docker"
    }
}
