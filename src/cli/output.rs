//! Summary formatting for the CLI
//!
//! Renders run summaries either as pretty JSON for scripting or as a short
//! human-readable report.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::config::ReproConfig;
use crate::verifier::RunSummary;

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Human,
}

/// What the `cleanup` subcommand did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub records: usize,
    /// Images that existed locally and were removed
    pub removed_images: usize,
    pub malformed: Vec<PathBuf>,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_summary(&self, title: &str, summary: &RunSummary) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(summary)
                .context("Failed to serialize run summary to JSON"),
            OutputFormat::Human => Ok(self.format_summary_human(title, summary)),
        }
    }

    pub fn format_cleanup(&self, report: &CleanupReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report)
                .context("Failed to serialize cleanup report to JSON"),
            OutputFormat::Human => {
                let mut output = String::new();
                output.push_str("Cleanup\n");
                output.push_str(RULE);
                output.push_str("\n\n");
                output.push_str(&format!("  Records:        {}\n", report.records));
                output.push_str(&format!("  Images removed: {}\n", report.removed_images));
                push_paths(&mut output, "Malformed records", &report.malformed);
                Ok(output)
            }
        }
    }

    pub fn format_config(&self, config: &ReproConfig) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&config.to_display_map())
                .context("Failed to serialize config to JSON"),
            OutputFormat::Human => Ok(config.to_string()),
        }
    }

    fn format_summary_human(&self, title: &str, summary: &RunSummary) -> String {
        let mut output = String::new();
        output.push_str(title);
        output.push('\n');
        output.push_str(RULE);
        output.push_str("\n\n");

        output.push_str(&format!("  Records:          {}\n", summary.records));
        output.push_str(&format!("  Recorded:         {}\n", summary.recorded));
        if summary.reproducible + summary.not_reproducible > 0 {
            output.push_str(&format!("  \u{2713} Reproducible:   {}\n", summary.reproducible));
            output.push_str(&format!(
                "  \u{2717} Unreproducible: {}\n",
                summary.not_reproducible
            ));
        }
        output.push_str(&format!("  Already in ledger: {}\n", summary.skipped));

        push_paths(&mut output, "Malformed records", &summary.malformed);

        if !summary.indeterminate.is_empty() {
            output.push_str(&format!(
                "\nIndeterminate ({}), retried on next run:\n",
                summary.indeterminate.len()
            ));
            for commit in &summary.indeterminate {
                output.push_str(&format!("  - {}\n", commit));
            }
        }

        output
    }
}

fn push_paths(output: &mut String, heading: &str, paths: &[PathBuf]) {
    if paths.is_empty() {
        return;
    }
    output.push_str(&format!("\n{} ({}):\n", heading, paths.len()));
    for path in paths {
        output.push_str(&format!("  - {}\n", path.display()));
    }
}
