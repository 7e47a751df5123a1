//! breakage-repro - reproduction verifier for breaking dependency updates
//!
//! Each input record describes a dependency bump that broke a project's build.
//! The verifier rebuilds the project in its pre- and post-update container
//! images, classifies the post-update failure from the build log, and records
//! whether the recorded failure category was reproduced.
//!
//! # Core Concepts
//!
//! - **Container runtime**: [`runtime::ContainerRuntime`] is the boundary to
//!   the container engine; [`runtime::DockerRuntime`] talks to a local Docker
//!   daemon and [`runtime::MockRuntime`] scripts builds for tests
//! - **Taxonomy**: an ordered table of log patterns, first match wins
//! - **Ledger**: a JSON file keyed by commit that makes runs resumable
//! - **Materialization**: logs, dependency artifacts and committed images for
//!   confirmed reproductions
//!
//! # Example Usage
//!
//! ```no_run
//! use breakage_repro::{DockerRuntime, ReproConfig, Verifier};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ReproConfig::from_env()?;
//! let runtime = Arc::new(DockerRuntime::connect()?);
//! let mut verifier = Verifier::new(config, runtime)?;
//! let summary = verifier.run(Path::new("benchmark/data")).await?;
//! println!("{} reproducible", summary.reproducible);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod depdiff;
pub mod deptree;
pub mod extract;
pub mod ledger;
pub mod materialize;
pub mod progress;
pub mod record;
pub mod runtime;
pub mod taxonomy;
pub mod util;
pub mod verifier;

pub use config::{ConfigError, ReproConfig};
pub use depdiff::{DepDiffError, DependencyDiffCounts, DependencyDiffPipeline, DiffOutcome};
pub use deptree::DependencyTreeDiff;
pub use extract::{ArtifactExtractor, ExtractError};
pub use ledger::{Ledger, LedgerError};
pub use materialize::{MaterializeError, Materializer};
pub use progress::{LoggingHandler, NoOpHandler, ProgressEvent, ProgressHandler};
pub use record::{BreakingUpdateRecord, RecordError};
pub use runtime::{
    BuildOutcome, ContainerRuntime, ContainerSession, DockerRuntime, ImageRef, MockRuntime,
    RuntimeError,
};
pub use taxonomy::{classify, FailureCategory, FailureTaxonomy, TestFailureBreakdown};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};
pub use verifier::{ReproductionEntry, RunSummary, Verdict, Verifier, VerifierError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
