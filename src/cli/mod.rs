pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{BenchmarkArgs, CliArgs, Commands, ConfigArgs, OutputFormatArg};
pub use output::{CleanupReport, OutputFormat, OutputFormatter};
