//! Failure pattern taxonomy
//!
//! Maps unstructured build-log text to a [`FailureCategory`] by walking an
//! ordered table of `(pattern, category)` bindings. The first pattern that
//! matches anywhere in the log wins, so plugin-specific patterns are listed
//! before the generic compilation and test patterns they could overlap with.
//!
//! The table is plain data: extending the taxonomy means adding a row to
//! [`FAILURE_PATTERNS`], not touching [`FailureTaxonomy::classify`].

pub mod test_failures;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

pub use test_failures::{breakdown, TestFailureBreakdown};

/// Closed set of failure classifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCategory {
    CompilationFailure,
    TestFailure,
    DependencyResolutionFailure,
    DependencyLockFailure,
    JenkinsPluginFailure,
    JaxbFailure,
    ScmCheckoutFailure,
    CheckstyleFailure,
    MavenEnforcerFailure,
    UnknownFailure,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::CompilationFailure => "COMPILATION_FAILURE",
            FailureCategory::TestFailure => "TEST_FAILURE",
            FailureCategory::DependencyResolutionFailure => "DEPENDENCY_RESOLUTION_FAILURE",
            FailureCategory::DependencyLockFailure => "DEPENDENCY_LOCK_FAILURE",
            FailureCategory::JenkinsPluginFailure => "JENKINS_PLUGIN_FAILURE",
            FailureCategory::JaxbFailure => "JAXB_FAILURE",
            FailureCategory::ScmCheckoutFailure => "SCM_CHECKOUT_FAILURE",
            FailureCategory::CheckstyleFailure => "CHECKSTYLE_FAILURE",
            FailureCategory::MavenEnforcerFailure => "MAVEN_ENFORCER_FAILURE",
            FailureCategory::UnknownFailure => "UNKNOWN_FAILURE",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered pattern table, most specific first. Matching is case-insensitive.
pub const FAILURE_PATTERNS: &[(&str, FailureCategory)] = &[
    (
        r"Failed to execute goal org\.jenkins-ci\.tools:maven-hpi-plugin",
        FailureCategory::JenkinsPluginFailure,
    ),
    (
        r"Failed to execute goal org\.jvnet\.jaxb2\.maven2:maven-jaxb2-plugin",
        FailureCategory::JaxbFailure,
    ),
    (
        r"Failed to execute goal org\.apache\.maven\.plugins:maven-scm-plugin:.*?:checkout",
        FailureCategory::ScmCheckoutFailure,
    ),
    (
        r"Failed to execute goal org\.apache\.maven\.plugins:maven-checkstyle-plugin:.*?:check",
        FailureCategory::CheckstyleFailure,
    ),
    (
        r"Failed to execute goal org\.apache\.maven\.plugins:maven-enforcer-plugin",
        FailureCategory::MavenEnforcerFailure,
    ),
    (
        r"Failed to execute goal se\.vandmo:dependency-lock-maven-plugin:.*?:check",
        FailureCategory::DependencyLockFailure,
    ),
    (
        r"Could not resolve dependencies|\[ERROR\] Some problems were encountered while processing the POMs|\[ERROR\] .*?The following artifacts could not be resolved",
        FailureCategory::DependencyResolutionFailure,
    ),
    (
        r"COMPILATION ERROR|Failed to execute goal io\.takari\.maven\.plugins:takari-lifecycle-plugin.*?:compile",
        FailureCategory::CompilationFailure,
    ),
    (
        r"\[ERROR\] Tests run:|There are test failures|There were test failures|Failed to execute goal org\.apache\.maven\.plugins:maven-surefire-plugin|Tests run: \d+, Failures: [1-9]|Tests run: \d+, Failures: \d+, Errors: [1-9]",
        FailureCategory::TestFailure,
    ),
];

/// Compiled, ordered set of failure patterns
#[derive(Debug, Clone)]
pub struct FailureTaxonomy {
    rules: Vec<(Regex, FailureCategory)>,
}

impl FailureTaxonomy {
    /// Compiles a taxonomy from an ordered table. Row order is precedence.
    pub fn from_table(table: &[(&str, FailureCategory)]) -> Result<Self, regex::Error> {
        let rules = table
            .iter()
            .map(|(pattern, category)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (re, *category))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    /// The built-in Maven taxonomy, compiled once per process
    pub fn builtin() -> &'static FailureTaxonomy {
        static BUILTIN: OnceLock<FailureTaxonomy> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            FailureTaxonomy::from_table(FAILURE_PATTERNS).expect("valid regex")
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the category of the first matching pattern, or
    /// [`FailureCategory::UnknownFailure`] when nothing matches.
    pub fn classify(&self, log_text: &str) -> FailureCategory {
        for (pattern, category) in &self.rules {
            if pattern.is_match(log_text) {
                debug!(category = %category, "Failure category found");
                return *category;
            }
        }

        debug!("No failure pattern matched");
        FailureCategory::UnknownFailure
    }
}

/// Classifies a log with the built-in taxonomy
pub fn classify(log_text: &str) -> FailureCategory {
    FailureTaxonomy::builtin().classify(log_text)
}

/// Decodes raw log bytes as ISO-8859-1.
///
/// Every byte maps to exactly one char, so decoding cannot fail on logs that
/// contain stray non-UTF-8 output from the build tool.
pub fn decode_log(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
