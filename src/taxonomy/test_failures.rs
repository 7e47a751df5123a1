//! Test failure breakdown for logs classified as `TEST_FAILURE`

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// What kind of test failure a log shows, with counts where available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TestFailureBreakdown {
    /// The forked surefire VM died before reporting
    VmCrashed,
    /// Surefire itself failed to load (classloader clash)
    SurefirePluginError,
    /// JUnit platform version mismatch
    JUnitError,
    /// Counts taken from the last test summary line in the log
    #[serde(rename_all = "camelCase")]
    Counts {
        total_tests: u32,
        failures: u32,
        errors: u32,
        randomized_failures: u32,
        skipped: u32,
    },
}

impl TestFailureBreakdown {
    /// True when a `Counts` breakdown reports no failing test at all
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            TestFailureBreakdown::Counts {
                failures: 0,
                errors: 0,
                randomized_failures: 0,
                ..
            }
        )
    }
}

struct Patterns {
    surefire: Regex,
    randomized: Regex,
    vm_crash: Regex,
    foreign_imports: Regex,
    junit_ancestors: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        surefire: Regex::new(r"Tests run: (\d+), Failures: (\d+), Errors: (\d+), Skipped: (\d+)")
            .expect("valid regex"),
        randomized: Regex::new(r"Tests summary: \d+ suites, (\d+) tests, (\d+) failur.*?, (\d+) ignored")
            .expect("valid regex"),
        vm_crash: Regex::new(
            r"The forked VM terminated without properly saying goodbye\. VM crash or System\.exit called\?",
        )
        .expect("valid regex"),
        foreign_imports: Regex::new(r"\[ERROR\] Number of foreign imports: 1").expect("valid regex"),
        junit_ancestors: Regex::new(
            r"\[ERROR\] .java\.util\.Set org\.junit\.platform\.engine\.TestDescriptor\.getAncestors",
        )
        .expect("valid regex"),
    })
}

fn number(caps: &regex::Captures<'_>, idx: usize) -> u32 {
    caps.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Scans a test-failure log line by line.
///
/// Summary lines overwrite earlier ones, so the result reflects the last
/// module that reported. Crash markers end the scan immediately.
pub fn breakdown(log_text: &str) -> TestFailureBreakdown {
    let p = patterns();

    let mut total_tests = 0;
    let mut failures = 0;
    let mut errors = 0;
    let mut randomized_failures = 0;
    let mut skipped = 0;

    for line in log_text.lines() {
        if let Some(caps) = p.surefire.captures(line) {
            total_tests = number(&caps, 1);
            failures = number(&caps, 2);
            errors = number(&caps, 3);
            skipped = number(&caps, 4);
        }
        if let Some(caps) = p.randomized.captures(line) {
            total_tests = number(&caps, 1);
            randomized_failures = number(&caps, 2);
            skipped = number(&caps, 3);
        }
        if p.vm_crash.is_match(line) {
            return TestFailureBreakdown::VmCrashed;
        }
        if p.foreign_imports.is_match(line) {
            return TestFailureBreakdown::SurefirePluginError;
        }
        if p.junit_ancestors.is_match(line) {
            return TestFailureBreakdown::JUnitError;
        }
    }

    TestFailureBreakdown::Counts {
        total_tests,
        failures,
        errors,
        randomized_failures,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_summary_line_wins() {
        let log = "\
[INFO] Tests run: 3, Failures: 0, Errors: 0, Skipped: 0
[ERROR] Tests run: 10, Failures: 2, Errors: 1, Skipped: 3
[INFO] BUILD FAILURE";

        assert_eq!(
            breakdown(log),
            TestFailureBreakdown::Counts {
                total_tests: 10,
                failures: 2,
                errors: 1,
                randomized_failures: 0,
                skipped: 3,
            }
        );
    }

    #[test]
    fn test_randomized_summary() {
        let log = "[ERROR] Tests summary: 4 suites, 120 tests, 3 failures, 7 ignored";
        assert_eq!(
            breakdown(log),
            TestFailureBreakdown::Counts {
                total_tests: 120,
                failures: 0,
                errors: 0,
                randomized_failures: 3,
                skipped: 7,
            }
        );
    }

    #[test]
    fn test_vm_crash_short_circuits() {
        let log = "\
[ERROR] Tests run: 10, Failures: 2, Errors: 0, Skipped: 0
[ERROR] The forked VM terminated without properly saying goodbye. VM crash or System.exit called?
[ERROR] Tests run: 99, Failures: 9, Errors: 0, Skipped: 0";
        assert_eq!(breakdown(log), TestFailureBreakdown::VmCrashed);
    }

    #[test]
    fn test_surefire_and_junit_markers() {
        assert_eq!(
            breakdown("[ERROR] Number of foreign imports: 1"),
            TestFailureBreakdown::SurefirePluginError
        );
        assert_eq!(
            breakdown("[ERROR] 'java.util.Set org.junit.platform.engine.TestDescriptor.getAncestors()'"),
            TestFailureBreakdown::JUnitError
        );
    }

    #[test]
    fn test_log_without_failures_is_clean() {
        let result = breakdown("[INFO] Tests run: 5, Failures: 0, Errors: 0, Skipped: 0");
        assert!(result.is_clean());
        assert!(!TestFailureBreakdown::VmCrashed.is_clean());
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let json = serde_json::to_value(TestFailureBreakdown::Counts {
            total_tests: 1,
            failures: 1,
            errors: 0,
            randomized_failures: 0,
            skipped: 0,
        })
        .unwrap();
        assert_eq!(json["kind"], "counts");
        assert_eq!(json["totalTests"], 1);

        let crashed = serde_json::to_value(TestFailureBreakdown::VmCrashed).unwrap();
        assert_eq!(crashed["kind"], "vmCrashed");
    }
}
