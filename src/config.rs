//! Configuration management for breakage-repro
//!
//! Settings are loaded from environment variables with defaults matching the
//! breaking-updates benchmark layout.
//!
//! # Environment Variables
//!
//! - `REPRO_REGISTRY`: Image registry - default: "ghcr.io/chains-project/breaking-updates"
//! - `REPRO_BUILD_COMMAND`: Build tool invocation - default: "mvn clean test -B"
//! - `REPRO_LOG_FILE_NAME`: Build log written in the project dir - default: "output.log"
//! - `REPRO_RESULTS_DIR`: Ledger directory - default: "results"
//! - `REPRO_LOGS_DIR`: Stored build logs - default: "reproductionLogs"
//! - `REPRO_ARTIFACTS_DIR`: Stored dependency artifacts - default: "dependencyArtifacts"
//! - `REPRO_TREES_DIR`: Dependency tree dumps and diffs - default: "dependencyTrees"
//! - `REPRO_DEPENDENCY_REPO`: Local repository inside the image - default: "/root/.m2/repository"
//! - `REPRO_TREE_COMMAND`: Dependency tree invocation
//! - `REPRO_TREE_FILE_NAME`: File the tree command writes - default: "dependency-tree.txt"
//! - `REPRO_REMOVE_IMAGES`: Remove per-record images after processing - default: "false"
//! - `REPRO_COPY_PROJECT`: Copy project trees during dependency diff - default: "false"
//! - `REPRO_LOG_LEVEL`: Logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use breakage_repro::ReproConfig;
//!
//! let config = ReproConfig::from_env().expect("Invalid configuration");
//! println!("{}", config);
//! ```

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_REGISTRY: &str = "ghcr.io/chains-project/breaking-updates";
const DEFAULT_BUILD_COMMAND: &str = "mvn clean test -B";
const DEFAULT_LOG_FILE_NAME: &str = "output.log";
const DEFAULT_RESULTS_DIR: &str = "results";
const DEFAULT_LOGS_DIR: &str = "reproductionLogs";
const DEFAULT_ARTIFACTS_DIR: &str = "dependencyArtifacts";
const DEFAULT_TREES_DIR: &str = "dependencyTrees";
const DEFAULT_DEPENDENCY_REPO: &str = "/root/.m2/repository";
const DEFAULT_TREE_COMMAND: &str =
    "mvn dependency:tree -B -DoutputFile=dependency-tree.txt -DoutputType=text";
const DEFAULT_TREE_FILE_NAME: &str = "dependency-tree.txt";
const DEFAULT_LOG_LEVEL: &str = "info";

const REPRODUCTION_LEDGER: &str = "reproducibility-results.json";
const DIFF_LEDGER: &str = "dependency-diff-results.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

#[derive(Debug, Clone)]
pub struct ReproConfig {
    pub registry: String,
    pub build_command: String,
    pub log_file_name: String,
    pub results_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub trees_dir: PathBuf,
    /// Dependency repository path inside the build image
    pub dependency_repo: String,
    pub tree_command: String,
    pub tree_file_name: String,
    pub remove_images: bool,
    pub copy_project: bool,
    pub log_level: String,
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::ParseError {
            field: field.to_string(),
            error: format!("expected a boolean, got '{}'", other),
        }),
    }
}

fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    env::var(key).ok().map(|v| parse_bool(key, &v)).transpose()
}

impl Default for ReproConfig {
    /// Loads from `REPRO_*` environment variables; unparseable values fall
    /// back to their defaults. Use [`ReproConfig::from_env`] to reject them.
    fn default() -> Self {
        let var = |key: &str, default: &str| env::var(key).unwrap_or_else(|_| default.to_string());

        Self {
            registry: var("REPRO_REGISTRY", DEFAULT_REGISTRY),
            build_command: var("REPRO_BUILD_COMMAND", DEFAULT_BUILD_COMMAND),
            log_file_name: var("REPRO_LOG_FILE_NAME", DEFAULT_LOG_FILE_NAME),
            results_dir: PathBuf::from(var("REPRO_RESULTS_DIR", DEFAULT_RESULTS_DIR)),
            logs_dir: PathBuf::from(var("REPRO_LOGS_DIR", DEFAULT_LOGS_DIR)),
            artifacts_dir: PathBuf::from(var("REPRO_ARTIFACTS_DIR", DEFAULT_ARTIFACTS_DIR)),
            trees_dir: PathBuf::from(var("REPRO_TREES_DIR", DEFAULT_TREES_DIR)),
            dependency_repo: var("REPRO_DEPENDENCY_REPO", DEFAULT_DEPENDENCY_REPO),
            tree_command: var("REPRO_TREE_COMMAND", DEFAULT_TREE_COMMAND),
            tree_file_name: var("REPRO_TREE_FILE_NAME", DEFAULT_TREE_FILE_NAME),
            remove_images: env_bool("REPRO_REMOVE_IMAGES")
                .ok()
                .flatten()
                .unwrap_or(false),
            copy_project: env_bool("REPRO_COPY_PROJECT")
                .ok()
                .flatten()
                .unwrap_or(false),
            log_level: var("REPRO_LOG_LEVEL", DEFAULT_LOG_LEVEL).to_lowercase(),
        }
    }
}

impl ReproConfig {
    /// Loads from the environment, rejecting malformed values
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = env_bool("REPRO_REMOVE_IMAGES")? {
            config.remove_images = v;
        }
        if let Some(v) = env_bool("REPRO_COPY_PROJECT")? {
            config.copy_project = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Places every output directory under `root`
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.results_dir = root.join(DEFAULT_RESULTS_DIR);
        self.logs_dir = root.join(DEFAULT_LOGS_DIR);
        self.artifacts_dir = root.join(DEFAULT_ARTIFACTS_DIR);
        self.trees_dir = root.join(DEFAULT_TREES_DIR);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.trim().is_empty() || self.registry.contains(char::is_whitespace) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid registry: '{}'",
                self.registry
            )));
        }

        if self.build_command.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Build command cannot be empty".to_string(),
            ));
        }
        if self.tree_command.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Tree command cannot be empty".to_string(),
            ));
        }

        for (field, name) in [
            ("log file name", &self.log_file_name),
            ("tree file name", &self.tree_file_name),
        ] {
            if name.is_empty() || name.contains('/') {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid {}: '{}' must be a plain file name",
                    field, name
                )));
            }
        }

        if !self.dependency_repo.starts_with('/') {
            return Err(ConfigError::ValidationFailed(format!(
                "Dependency repository must be an absolute path: {}",
                self.dependency_repo
            )));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn reproduction_ledger_path(&self) -> PathBuf {
        self.results_dir.join(REPRODUCTION_LEDGER)
    }

    pub fn diff_ledger_path(&self) -> PathBuf {
        self.results_dir.join(DIFF_LEDGER)
    }

    pub fn successful_logs_dir(&self) -> PathBuf {
        self.logs_dir.join("successful")
    }

    pub fn unreproducible_logs_dir(&self) -> PathBuf {
        self.logs_dir.join("unreproducible")
    }

    /// `sh -c` invocation that runs the build and tees its output into the
    /// log file while keeping the build's exit status
    pub fn build_shell_command(&self) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "set -o pipefail && ({} 2>&1 | tee -ai {})",
                self.build_command, self.log_file_name
            ),
        ]
    }

    pub fn tree_shell_command(&self) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            self.tree_command.clone(),
        ]
    }

    pub fn to_display_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();

        map.insert("registry".to_string(), self.registry.clone());
        map.insert("build_command".to_string(), self.build_command.clone());
        map.insert("log_file_name".to_string(), self.log_file_name.clone());
        map.insert(
            "results_dir".to_string(),
            self.results_dir.display().to_string(),
        );
        map.insert("logs_dir".to_string(), self.logs_dir.display().to_string());
        map.insert(
            "artifacts_dir".to_string(),
            self.artifacts_dir.display().to_string(),
        );
        map.insert("trees_dir".to_string(), self.trees_dir.display().to_string());
        map.insert("dependency_repo".to_string(), self.dependency_repo.clone());
        map.insert("tree_command".to_string(), self.tree_command.clone());
        map.insert("tree_file_name".to_string(), self.tree_file_name.clone());
        map.insert("remove_images".to_string(), self.remove_images.to_string());
        map.insert("copy_project".to_string(), self.copy_project.to_string());
        map.insert("log_level".to_string(), self.log_level.clone());

        map
    }
}

impl fmt::Display for ReproConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reproduction Configuration:")?;
        writeln!(f, "  Registry: {}", self.registry)?;
        writeln!(f, "  Build Command: {}", self.build_command)?;
        writeln!(f, "  Log File: {}", self.log_file_name)?;
        writeln!(f, "  Results Dir: {}", self.results_dir.display())?;
        writeln!(f, "  Logs Dir: {}", self.logs_dir.display())?;
        writeln!(f, "  Artifacts Dir: {}", self.artifacts_dir.display())?;
        writeln!(f, "  Trees Dir: {}", self.trees_dir.display())?;
        writeln!(f, "  Dependency Repo: {}", self.dependency_repo)?;
        writeln!(f, "  Tree Command: {}", self.tree_command)?;
        writeln!(f, "  Remove Images: {}", self.remove_images)?;
        writeln!(f, "  Copy Project: {}", self.copy_project)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}
