//! Positional dependency tree differ
//!
//! Compares two dependency tree dumps line by line. Lines are aligned by
//! index only, up to the length of the shorter dump, so the counts are only
//! meaningful when the build tool enumerates dependencies in a stable order.
//! [`DependencyTreeDiff::is_order_suspect`] flags the case where both dumps
//! contain the same dependencies in a different order.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Field delimiter of a dependency line: `group:artifact:type:version:scope`
pub const FIELD_DELIMITER: char = ':';

/// Number of positional fields a classifiable line carries
pub const EXPECTED_FIELDS: usize = 5;

const GROUP: usize = 0;
const ARTIFACT: usize = 1;
const TYPE: usize = 2;
const VERSION: usize = 3;
const SCOPE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Artifact,
    Version,
    Scope,
    /// Same coordinates with a different type, such as `jar` -> `pom`
    Packaging,
}

/// One differing line pair at the same index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDiff {
    pub index: usize,
    pub before: String,
    pub after: String,
    /// `None` when either line does not have the expected field count
    pub kind: Option<ChangeKind>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub artifact: usize,
    pub version: usize,
    pub scope: usize,
    pub packaging: usize,
    pub unclassified: usize,
}

impl ChangeCounts {
    pub fn total(&self) -> usize {
        self.artifact + self.version + self.scope + self.packaging + self.unclassified
    }

    fn record(&mut self, kind: Option<ChangeKind>) {
        match kind {
            Some(ChangeKind::Artifact) => self.artifact += 1,
            Some(ChangeKind::Version) => self.version += 1,
            Some(ChangeKind::Scope) => self.scope += 1,
            Some(ChangeKind::Packaging) => self.packaging += 1,
            None => self.unclassified += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyTreeDiff {
    pub lines: Vec<LineDiff>,
    pub counts: ChangeCounts,
    /// Number of line pairs compared (the overlapping prefix)
    pub compared: usize,
    pub len_before: usize,
    pub len_after: usize,
    /// Dependencies present only in the second dump (set difference)
    pub added: usize,
    /// Dependencies present only in the first dump (set difference)
    pub removed: usize,
    order_suspect: bool,
}

impl DependencyTreeDiff {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// True when the dumps differ positionally but hold the same lines,
    /// which means the positional counts reflect ordering noise.
    pub fn is_order_suspect(&self) -> bool {
        self.order_suspect
    }

    /// Human-readable listing, written next to the tree dumps
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Compared {} of {}/{} lines: {} artifact, {} version, {} scope, {} packaging, {} unclassified",
            self.compared,
            self.len_before,
            self.len_after,
            self.counts.artifact,
            self.counts.version,
            self.counts.scope,
            self.counts.packaging,
            self.counts.unclassified
        );
        let _ = writeln!(out, "Added: {}, Removed: {}", self.added, self.removed);
        if self.order_suspect {
            let _ = writeln!(out, "WARNING: same dependencies in a different order");
        }
        for line in &self.lines {
            let label = match line.kind {
                Some(ChangeKind::Artifact) => "artifact",
                Some(ChangeKind::Version) => "version",
                Some(ChangeKind::Scope) => "scope",
                Some(ChangeKind::Packaging) => "packaging",
                None => "unclassified",
            };
            let _ = writeln!(out, "[{}] {}", line.index, label);
            let _ = writeln!(out, "  - {}", line.before);
            let _ = writeln!(out, "  + {}", line.after);
        }
        out
    }
}

/// Strips log prefixes and tree-drawing characters from a dump line
pub fn normalize_line(line: &str) -> &str {
    let line = line.trim();
    let line = line.strip_prefix("[INFO]").unwrap_or(line);
    line.trim_start_matches(|c: char| matches!(c, ' ' | '|' | '+' | '-' | '\\'))
        .trim_end()
}

/// Splits a dump into normalized, non-empty lines
pub fn parse_tree(text: &str) -> Vec<String> {
    text.lines()
        .map(normalize_line)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Classifies a differing pair; first differing field wins.
pub fn classify_change(before: &str, after: &str) -> Option<ChangeKind> {
    let a: Vec<&str> = before.split(FIELD_DELIMITER).collect();
    let b: Vec<&str> = after.split(FIELD_DELIMITER).collect();
    if a.len() != EXPECTED_FIELDS || b.len() != EXPECTED_FIELDS {
        return None;
    }

    let identity_a = format!("{}{}", a[GROUP], a[ARTIFACT]);
    let identity_b = format!("{}{}", b[GROUP], b[ARTIFACT]);
    if identity_a != identity_b {
        Some(ChangeKind::Artifact)
    } else if a[VERSION] != b[VERSION] {
        Some(ChangeKind::Version)
    } else if a[SCOPE] != b[SCOPE] {
        Some(ChangeKind::Scope)
    } else if a[TYPE] != b[TYPE] {
        Some(ChangeKind::Packaging)
    } else {
        // Identical lines
        None
    }
}

/// Positional diff of two dependency tree dumps
pub fn diff<S: AsRef<str>>(before: &[S], after: &[S]) -> DependencyTreeDiff {
    let compared = before.len().min(after.len());
    let mut lines = Vec::new();
    let mut counts = ChangeCounts::default();

    for (index, (a, b)) in before.iter().zip(after.iter()).enumerate() {
        let (a, b) = (a.as_ref(), b.as_ref());
        if a == b {
            continue;
        }
        let kind = classify_change(a, b);
        counts.record(kind);
        lines.push(LineDiff {
            index,
            before: a.to_string(),
            after: b.to_string(),
            kind,
        });
    }

    let set_before: HashSet<&str> = before.iter().map(AsRef::as_ref).collect();
    let set_after: HashSet<&str> = after.iter().map(AsRef::as_ref).collect();
    let added = set_after.difference(&set_before).count();
    let removed = set_before.difference(&set_after).count();

    let order_suspect = !lines.is_empty() && before.len() == after.len() && {
        let mut sorted_before: Vec<&str> = before.iter().map(AsRef::as_ref).collect();
        let mut sorted_after: Vec<&str> = after.iter().map(AsRef::as_ref).collect();
        sorted_before.sort_unstable();
        sorted_after.sort_unstable();
        sorted_before == sorted_after
    };

    DependencyTreeDiff {
        lines,
        counts,
        compared,
        len_before: before.len(),
        len_after: after.len(),
        added,
        removed,
        order_suspect,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Vec<&'static str> {
        vec![
            "com.example:app:jar:1.0.0:compile",
            "com.google.guava:guava:jar:31.1-jre:compile",
            "org.slf4j:slf4j-api:jar:1.7.36:compile",
            "junit:junit:jar:4.13.2:test",
        ]
    }

    #[test]
    fn test_identical_trees_have_no_changes() {
        let result = diff(&tree(), &tree());
        assert!(result.is_empty());
        assert_eq!(result.counts, ChangeCounts::default());
        assert_eq!(result.compared, 4);
        assert_eq!(result.added, 0);
        assert_eq!(result.removed, 0);
        assert!(!result.is_order_suspect());
    }

    #[test]
    fn test_single_version_change() {
        let mut after = tree();
        after[1] = "com.google.guava:guava:jar:32.0.0-jre:compile";

        let result = diff(&tree(), &after);
        assert_eq!(result.counts.version, 1);
        assert_eq!(result.counts.artifact, 0);
        assert_eq!(result.counts.scope, 0);
        assert_eq!(result.counts.unclassified, 0);
        assert_eq!(result.lines.len(), 1);
        assert_eq!(result.lines[0].index, 1);
        assert_eq!(result.added, 1);
        assert_eq!(result.removed, 1);
    }

    #[test]
    fn test_artifact_change_takes_priority() {
        // Version and scope also differ, but identity is checked first
        let kind = classify_change(
            "org.slf4j:slf4j-api:jar:1.7.36:compile",
            "org.slf4j:slf4j-simple:jar:2.0.0:runtime",
        );
        assert_eq!(kind, Some(ChangeKind::Artifact));
    }

    #[test]
    fn test_scope_change() {
        let kind = classify_change("junit:junit:jar:4.13.2:test", "junit:junit:jar:4.13.2:compile");
        assert_eq!(kind, Some(ChangeKind::Scope));
    }

    #[test]
    fn test_type_only_change_is_packaging() {
        let before = vec!["org.example:bom:jar:1.0:import"];
        let after = vec!["org.example:bom:pom:1.0:import"];

        let result = diff(&before, &after);
        assert_eq!(result.lines[0].kind, Some(ChangeKind::Packaging));
        assert_eq!(result.counts.packaging, 1);
        assert_eq!(result.counts.unclassified, 0);
        assert!(result.render().contains("[0] packaging"));
    }

    #[test]
    fn test_wrong_field_count_is_recorded_but_unclassified() {
        let before = vec!["io.netty:netty-transport-native-epoll:jar:linux-x86_64:4.1.90:compile"];
        let after = vec!["io.netty:netty-transport-native-epoll:jar:linux-x86_64:4.1.94:compile"];

        let result = diff(&before, &after);
        assert_eq!(result.lines.len(), 1);
        assert_eq!(result.lines[0].kind, None);
        assert_eq!(result.counts.unclassified, 1);
        assert_eq!(result.counts.total(), 1);
    }

    #[test]
    fn test_only_overlapping_prefix_is_compared() {
        let before = tree();
        let mut after = tree();
        after.truncate(2);

        let result = diff(&before, &after);
        assert_eq!(result.compared, 2);
        assert!(result.is_empty());
        assert_eq!(result.removed, 2);
        assert_eq!(result.len_before, 4);
        assert_eq!(result.len_after, 2);
    }

    #[test]
    fn test_reordered_trees_are_order_suspect() {
        let before = tree();
        let mut after = tree();
        after.swap(2, 3);

        let result = diff(&before, &after);
        assert!(result.is_order_suspect());
        assert_eq!(result.counts.artifact, 2);
        assert_eq!(result.added, 0);
        assert_eq!(result.removed, 0);
    }

    #[test]
    fn test_normalize_strips_tree_prefixes() {
        assert_eq!(
            normalize_line("[INFO] +- com.google.guava:guava:jar:31.1-jre:compile"),
            "com.google.guava:guava:jar:31.1-jre:compile"
        );
        assert_eq!(
            normalize_line("|  \\- org.checkerframework:checker-qual:jar:3.12.0:compile"),
            "org.checkerframework:checker-qual:jar:3.12.0:compile"
        );
        assert_eq!(normalize_line("   "), "");
    }

    #[test]
    fn test_parse_tree_drops_blank_lines() {
        let text = "com.example:app:jar:1.0.0\n\n+- junit:junit:jar:4.13.2:test\n";
        assert_eq!(
            parse_tree(text),
            vec!["com.example:app:jar:1.0.0", "junit:junit:jar:4.13.2:test"]
        );
    }

    #[test]
    fn test_render_lists_each_change() {
        let mut after = tree();
        after[3] = "junit:junit:jar:4.13.2:compile";
        let rendered = diff(&tree(), &after).render();
        assert!(rendered.contains("[3] scope"));
        assert!(rendered.contains("  - junit:junit:jar:4.13.2:test"));
        assert!(rendered.contains("  + junit:junit:jar:4.13.2:compile"));
    }
}
