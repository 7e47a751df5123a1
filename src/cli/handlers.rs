//! Subcommand handlers
//!
//! Each `handle_*` function loads configuration, connects to the local Docker
//! daemon and returns the process exit code. The `run_*` functions hold the
//! actual work against any [`ContainerRuntime`] and return the rendered summary.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::commands::{BenchmarkArgs, ConfigArgs};
use super::output::{CleanupReport, OutputFormat, OutputFormatter};
use crate::config::ReproConfig;
use crate::depdiff::DependencyDiffPipeline;
use crate::progress::LoggingHandler;
use crate::record::{list_record_files, BreakingUpdateRecord};
use crate::runtime::{ContainerRuntime, ContainerSession, DockerRuntime, ImageRef};
use crate::verifier::Verifier;

fn load_config(registry: Option<&str>) -> Result<ReproConfig> {
    let config = ReproConfig::from_env().context("Invalid configuration")?;
    let config = match registry {
        Some(registry) => config.with_registry(registry),
        None => config,
    };
    config.validate().context("Invalid configuration")?;
    debug!("{}", config);
    Ok(config)
}

async fn connect() -> Result<Arc<dyn ContainerRuntime>> {
    let docker = DockerRuntime::connect().context("Failed to connect to the Docker daemon")?;
    let api_version = docker
        .ping()
        .await
        .context("Docker daemon is not responding")?;
    info!(api_version = %api_version, "Connected to Docker");
    Ok(Arc::new(docker))
}

async fn prepare(registry: Option<&str>) -> Result<(ReproConfig, Arc<dyn ContainerRuntime>)> {
    let config = load_config(registry)?;
    let runtime = connect().await?;
    Ok((config, runtime))
}

fn finish(result: Result<String>) -> i32 {
    match result {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

pub async fn run_check_reproducibility(
    config: ReproConfig,
    runtime: Arc<dyn ContainerRuntime>,
    benchmark_dir: &Path,
    format: OutputFormat,
) -> Result<String> {
    let mut verifier = Verifier::new(config, runtime)
        .context("Failed to open reproduction ledger")?
        .with_progress(Arc::new(LoggingHandler));

    let summary = verifier
        .run(benchmark_dir)
        .await
        .with_context(|| format!("Reproduction run over {} failed", benchmark_dir.display()))?;

    OutputFormatter::new(format).format_summary("Reproduction", &summary)
}

pub async fn run_dependency_diff(
    config: ReproConfig,
    runtime: Arc<dyn ContainerRuntime>,
    benchmark_dir: &Path,
    format: OutputFormat,
) -> Result<String> {
    let mut pipeline = DependencyDiffPipeline::new(config, runtime)
        .context("Failed to open dependency diff ledger")?
        .with_progress(Arc::new(LoggingHandler));

    let summary = pipeline.run(benchmark_dir).await.with_context(|| {
        format!("Dependency diff run over {} failed", benchmark_dir.display())
    })?;

    OutputFormatter::new(format).format_summary("Dependency diff", &summary)
}

/// Removes both images of every record; absent images count as done
pub async fn run_cleanup(
    config: ReproConfig,
    runtime: Arc<dyn ContainerRuntime>,
    benchmark_dir: &Path,
    format: OutputFormat,
) -> Result<String> {
    let files = list_record_files(benchmark_dir)
        .with_context(|| format!("Failed to list records in {}", benchmark_dir.display()))?;
    let session = ContainerSession::new(runtime);

    let mut report = CleanupReport {
        records: files.len(),
        ..Default::default()
    };

    for path in files {
        let record = match BreakingUpdateRecord::load(&path) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping malformed record");
                report.malformed.push(path);
                continue;
            }
        };

        let images = [
            ImageRef::pre(&config.registry, record.id()),
            ImageRef::post(&config.registry, record.id()),
        ];
        let removed = session.remove_images(&images).await;
        debug!(commit = %record.id(), removed, "Cleaned up images");
        report.removed_images += removed;
    }

    info!(
        records = report.records,
        removed = report.removed_images,
        "Cleanup complete"
    );
    OutputFormatter::new(format).format_cleanup(&report)
}

/// Resolves and validates the configuration without touching Docker
pub fn run_config(registry: Option<&str>, format: OutputFormat) -> Result<String> {
    let config = load_config(registry)?;
    OutputFormatter::new(format).format_config(&config)
}

pub fn handle_config(args: &ConfigArgs, registry: Option<&str>) -> i32 {
    finish(run_config(registry, args.format.into()))
}

pub async fn handle_check_reproducibility(args: &BenchmarkArgs, registry: Option<&str>) -> i32 {
    finish(check_reproducibility(args, registry).await)
}

pub async fn handle_dependency_diff(args: &BenchmarkArgs, registry: Option<&str>) -> i32 {
    finish(dependency_diff(args, registry).await)
}

pub async fn handle_cleanup(args: &BenchmarkArgs, registry: Option<&str>) -> i32 {
    finish(cleanup(args, registry).await)
}

async fn check_reproducibility(args: &BenchmarkArgs, registry: Option<&str>) -> Result<String> {
    let (config, runtime) = prepare(registry).await?;
    run_check_reproducibility(config, runtime, &args.benchmark_dir, args.format.into()).await
}

async fn dependency_diff(args: &BenchmarkArgs, registry: Option<&str>) -> Result<String> {
    let (config, runtime) = prepare(registry).await?;
    run_dependency_diff(config, runtime, &args.benchmark_dir, args.format.into()).await
}

async fn cleanup(args: &BenchmarkArgs, registry: Option<&str>) -> Result<String> {
    let (config, runtime) = prepare(registry).await?;
    run_cleanup(config, runtime, &args.benchmark_dir, args.format.into()).await
}
