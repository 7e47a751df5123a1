use super::{ContainerRuntime, ContainerSpec, RuntimeError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Scripted behavior of one image
#[derive(Debug, Clone, Default)]
pub struct MockImage {
    pub exit_code: i64,
    /// Absolute path inside the container -> file contents
    pub files: BTreeMap<String, Vec<u8>>,
    /// Present locally; otherwise it must be pulled first
    pub local: bool,
    /// `wait` fails instead of reporting an exit code
    pub wait_error: Option<String>,
    /// Committing a container of this image fails
    pub commit_error: Option<String>,
}

impl MockImage {
    pub fn exiting(exit_code: i64) -> Self {
        Self {
            exit_code,
            local: true,
            ..Default::default()
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    /// Only available from the registry
    pub fn remote(mut self) -> Self {
        self.local = false;
        self
    }

    pub fn crashing(mut self, message: impl Into<String>) -> Self {
        self.wait_error = Some(message.into());
        self
    }

    pub fn failing_commit(mut self, message: impl Into<String>) -> Self {
        self.commit_error = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    InspectImage(String),
    PullImage(String),
    CreateContainer(ContainerSpec),
    StartContainer(String),
    WaitContainer(String),
    CopyFromContainer { container: String, path: String },
    CommitContainer { container: String, image: String },
    RemoveImage(String),
    RemoveContainer(String),
}

#[derive(Default)]
struct MockState {
    images: HashMap<String, MockImage>,
    /// Container id -> image reference
    containers: HashMap<String, String>,
    next_id: usize,
    calls: Vec<RuntimeCall>,
}

/// In-memory container engine with scripted images
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_image(self, reference: impl Into<String>, image: MockImage) -> Self {
        self.add_image(reference, image);
        self
    }

    pub fn add_image(&self, reference: impl Into<String>, image: MockImage) {
        self.state
            .lock()
            .unwrap()
            .images
            .insert(reference.into(), image);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn has_image(&self, reference: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .images
            .get(reference)
            .map(|image| image.local)
            .unwrap_or(false)
    }

    pub fn live_containers(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    pub fn created_containers(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RuntimeCall::CreateContainer(_)))
            .count()
    }

    fn record(&self, call: RuntimeCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn image_of(&self, container: &str) -> Result<MockImage, RuntimeError> {
        let state = self.state.lock().unwrap();
        let reference = state
            .containers
            .get(container)
            .ok_or_else(|| RuntimeError::ContainerNotFound(container.to_string()))?;
        state
            .images
            .get(reference)
            .cloned()
            .ok_or_else(|| RuntimeError::ImageNotFound(reference.clone()))
    }
}

/// Packs the files under `path` the way the engine does: entries are named
/// relative to the parent of `path`.
fn archive(files: &BTreeMap<String, Vec<u8>>, path: &str) -> Option<Vec<u8>> {
    let path = path.trim_end_matches('/');
    let base = path.rsplit('/').next().unwrap_or(path);
    let dir_prefix = format!("{}/", path);

    let selected: Vec<(String, &Vec<u8>)> = files
        .iter()
        .filter_map(|(file, contents)| {
            if file == path {
                Some((base.to_string(), contents))
            } else {
                file.strip_prefix(&dir_prefix)
                    .map(|rel| (format!("{}/{}", base, rel), contents))
            }
        })
        .collect();
    if selected.is_empty() {
        return None;
    }

    let mut builder = tar::Builder::new(Vec::new());
    for (name, contents) in selected {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_slice())
            .ok()?;
    }
    builder.into_inner().ok()
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn inspect_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::InspectImage(image.to_string()));
        if self.has_image(image) {
            Ok(())
        } else {
            Err(RuntimeError::ImageNotFound(image.to_string()))
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::PullImage(image.to_string()));
        let mut state = self.state.lock().unwrap();
        match state.images.get_mut(image) {
            Some(scripted) => {
                scripted.local = true;
                Ok(())
            }
            None => Err(RuntimeError::PullFailed {
                image: image.to_string(),
                message: "manifest unknown".to_string(),
            }),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.record(RuntimeCall::CreateContainer(spec.clone()));
        if !self.has_image(&spec.image) {
            return Err(RuntimeError::ImageNotFound(spec.image.clone()));
        }
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("mock-{:04}", state.next_id);
        state.containers.insert(id.clone(), spec.image.clone());
        Ok(id)
    }

    async fn start_container(&self, container: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::StartContainer(container.to_string()));
        self.image_of(container).map(|_| ())
    }

    async fn wait_container(&self, container: &str) -> Result<i64, RuntimeError> {
        self.record(RuntimeCall::WaitContainer(container.to_string()));
        let image = self.image_of(container)?;
        match image.wait_error {
            Some(message) => Err(RuntimeError::Api(message)),
            None => Ok(image.exit_code),
        }
    }

    async fn copy_from_container(
        &self,
        container: &str,
        path: &str,
    ) -> Result<Vec<u8>, RuntimeError> {
        self.record(RuntimeCall::CopyFromContainer {
            container: container.to_string(),
            path: path.to_string(),
        });
        let image = self.image_of(container)?;
        archive(&image.files, path).ok_or_else(|| RuntimeError::PathNotFound {
            container: container.to_string(),
            path: path.to_string(),
        })
    }

    async fn commit_container(
        &self,
        container: &str,
        repo: &str,
        tag: &str,
    ) -> Result<(), RuntimeError> {
        let reference = format!("{}:{}", repo, tag);
        self.record(RuntimeCall::CommitContainer {
            container: container.to_string(),
            image: reference.clone(),
        });
        let mut snapshot = self.image_of(container)?;
        if let Some(message) = snapshot.commit_error.take() {
            return Err(RuntimeError::Api(message));
        }
        snapshot.local = true;
        self.state
            .lock()
            .unwrap()
            .images
            .insert(reference, snapshot);
        Ok(())
    }

    async fn remove_image(&self, image: &str, _force: bool) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::RemoveImage(image.to_string()));
        let mut state = self.state.lock().unwrap();
        match state.images.get_mut(image) {
            Some(scripted) if scripted.local => {
                scripted.local = false;
                Ok(())
            }
            _ => Err(RuntimeError::ImageNotFound(image.to_string())),
        }
    }

    async fn remove_container(&self, container: &str, _force: bool) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::RemoveContainer(container.to_string()));
        self.state
            .lock()
            .unwrap()
            .containers
            .remove(container)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::ContainerNotFound(container.to_string()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn entries(archive: &[u8]) -> Vec<(String, String)> {
        let mut archive = tar::Archive::new(archive);
        let mut out = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mut contents = String::new();
            entry.read_to_string(&mut contents).unwrap();
            out.push((name, contents));
        }
        out
    }

    #[test]
    fn test_archive_single_file() {
        let mut files = BTreeMap::new();
        files.insert("/app/output.log".to_string(), b"BUILD FAILURE".to_vec());

        let tar = archive(&files, "/app/output.log").unwrap();
        assert_eq!(
            entries(&tar),
            vec![("output.log".to_string(), "BUILD FAILURE".to_string())]
        );
    }

    #[test]
    fn test_archive_directory_keeps_base_name() {
        let mut files = BTreeMap::new();
        files.insert("/app/pom.xml".to_string(), b"<project/>".to_vec());
        files.insert("/app/src/Main.java".to_string(), b"class Main {}".to_vec());
        files.insert("/other/file".to_string(), b"x".to_vec());

        let tar = archive(&files, "/app/").unwrap();
        let names: Vec<String> = entries(&tar).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["app/pom.xml", "app/src/Main.java"]);
    }

    #[test]
    fn test_archive_missing_path() {
        let files = BTreeMap::new();
        assert!(archive(&files, "/nowhere").is_none());
    }

    #[tokio::test]
    async fn test_commit_snapshots_container_files() {
        let runtime = MockRuntime::new().with_image(
            "repo:c1-post",
            MockImage::exiting(1).with_file("/app/output.log", "log"),
        );
        let spec = ContainerSpec {
            image: "repo:c1-post".into(),
            working_dir: "/app".into(),
            command: vec![],
            network_disabled: true,
        };
        let id = runtime.create_container(&spec).await.unwrap();
        runtime.commit_container(&id, "repo", "c1-post-snapshot").await.unwrap();

        assert!(runtime.has_image("repo:c1-post-snapshot"));
        runtime.remove_image("repo:c1-post-snapshot", true).await.unwrap();
        assert!(!runtime.has_image("repo:c1-post-snapshot"));
    }
}
