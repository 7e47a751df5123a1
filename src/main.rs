use breakage_repro::cli::commands::{CliArgs, Commands};
use breakage_repro::cli::handlers::{
    handle_check_reproducibility, handle_cleanup, handle_config, handle_dependency_diff,
};
use breakage_repro::util::logging::{init_logging, parse_level, LoggingConfig};
use breakage_repro::{NAME, VERSION};

use clap::Parser;
use std::env;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("{} v{} starting", NAME, VERSION);
    debug!("Arguments: {:?}", args);

    let registry = args.registry.as_deref();
    let exit_code = match &args.command {
        Commands::CheckReproducibility(bench) => {
            handle_check_reproducibility(bench, registry).await
        }
        Commands::DependencyDiff(bench) => handle_dependency_diff(bench, registry).await,
        Commands::Cleanup(bench) => handle_cleanup(bench, registry).await,
        Commands::Config(config) => handle_config(config, registry),
    };

    std::process::exit(exit_code);
}

/// Flags win over `REPRO_LOG_LEVEL`; `REPRO_LOG_JSON=true` switches to JSON lines
fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        let level_str = env::var("REPRO_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        parse_level(&level_str)
    };

    let use_json = env::var("REPRO_LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    let config = if use_json {
        LoggingConfig {
            level,
            ..LoggingConfig::production()
        }
    } else {
        LoggingConfig::with_level(level)
    };
    init_logging(config);
}
