//! Shared fixtures for the integration tests

#![allow(dead_code)]

use breakage_repro::ReproConfig;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const REGISTRY: &str = "localhost:5000/breaking-updates";

/// Benchmark and output directories for one test
pub struct Workspace {
    pub bench: TempDir,
    pub out: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            bench: TempDir::new().unwrap(),
            out: TempDir::new().unwrap(),
        }
    }

    pub fn bench_dir(&self) -> &Path {
        self.bench.path()
    }

    pub fn config(&self) -> ReproConfig {
        ReproConfig::default()
            .with_registry(REGISTRY)
            .with_output_root(self.out.path())
    }

    pub fn record_path(&self, commit: &str) -> PathBuf {
        self.bench.path().join(format!("{}.json", commit))
    }

    /// Writes a record for project `demo` bumping `org.example:lib` 1.0 -> 2.0
    pub fn write_record(&self, commit: &str, category: &str) -> PathBuf {
        let path = self.record_path(commit);
        let record = json!({
            "breakingCommit": commit,
            "project": "demo",
            "projectOrganisation": "example",
            "dependencyGroupID": "org.example",
            "dependencyArtifactID": "lib",
            "previousVersion": "1.0",
            "newVersion": "2.0",
            "failureCategory": category,
        });
        fs::write(&path, serde_json::to_string_pretty(&record).unwrap()).unwrap();
        path
    }

    pub fn read_json(&self, path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }
}

pub fn image(commit: &str, suffix: &str) -> String {
    format!("{}:{}{}", REGISTRY, commit, suffix)
}

pub fn artifact_path(version: &str, extension: &str) -> String {
    format!(
        "/root/.m2/repository/org/example/lib/{}/lib-{}.{}",
        version, version, extension
    )
}

pub const TEST_FAILURE_LOG: &str = "[INFO] Running org.example.AppTest\n\
[ERROR] Tests run: 10, Failures: 2, Errors: 0, Skipped: 0\n\
[INFO] BUILD FAILURE\n";

pub const COMPILATION_FAILURE_LOG: &str = "[ERROR] COMPILATION ERROR : \n\
[ERROR] /demo/src/main/java/App.java:[3,8] cannot find symbol\n";
