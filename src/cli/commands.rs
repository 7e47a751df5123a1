use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Verifies recorded breaking dependency updates by rebuilding them in containers
#[derive(Parser, Debug)]
#[command(
    name = "breakage-repro",
    about = "Verify breaking dependency updates by rebuilding them in containers",
    version,
    author,
    long_about = "breakage-repro rebuilds each recorded breaking dependency update in its \
                  pre- and post-update container images, classifies the failure from the \
                  build log, and keeps resumable result ledgers. Records already in a \
                  ledger are skipped, so an interrupted run can simply be started again."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        value_name = "REGISTRY",
        help = "Image registry to resolve <commit>-pre/-post tags against (overrides REPRO_REGISTRY)"
    )]
    pub registry: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Check whether recorded breaking updates reproduce",
        long_about = "Runs the build command in the pre- and post-update image of every record, \
                      classifies the post-update failure and compares it with the recorded \
                      failure category. Reproduced updates get their logs, dependency \
                      artifacts and committed images stored.\n\n\
                      Examples:\n  \
                      breakage-repro check-reproducibility -b benchmark/data\n  \
                      breakage-repro --registry localhost:5000/bu check-reproducibility -b data"
    )]
    CheckReproducibility(BenchmarkArgs),

    #[command(
        about = "Diff the dependency trees of the pre- and post-update images",
        long_about = "Dumps the dependency tree inside both images of every record, stores the \
                      trees and a diff listing, and records the change counts.\n\n\
                      Examples:\n  \
                      breakage-repro dependency-diff -b benchmark/data\n  \
                      breakage-repro dependency-diff -b benchmark/data --format json"
    )]
    DependencyDiff(BenchmarkArgs),

    #[command(
        about = "Remove the local pre- and post-update images of every record",
        long_about = "Force-removes <registry>:<commit>-pre and <registry>:<commit>-post for \
                      every record in the benchmark directory. Images that are already gone \
                      are not an error, so the command can be repeated safely.\n\n\
                      Examples:\n  \
                      breakage-repro cleanup -b benchmark/data"
    )]
    Cleanup(BenchmarkArgs),

    #[command(
        about = "Show the effective configuration",
        long_about = "Prints the configuration resolved from REPRO_* environment variables \
                      and command line overrides, after validation.\n\n\
                      Examples:\n  \
                      breakage-repro config\n  \
                      breakage-repro --registry localhost:5000/bu config --format json"
    )]
    Config(ConfigArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct BenchmarkArgs {
    #[arg(
        short = 'b',
        long,
        value_name = "DIR",
        help = "Directory containing one JSON record per breaking update"
    )]
    pub benchmark_dir: PathBuf,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Summary output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

impl Commands {
    pub fn benchmark_args(&self) -> Option<&BenchmarkArgs> {
        match self {
            Commands::CheckReproducibility(args)
            | Commands::DependencyDiff(args)
            | Commands::Cleanup(args) => Some(args),
            Commands::Config(_) => None,
        }
    }
}
