//! Routing table construction and path resolution.
//!
//! A [`RoutingTable`] is rebuilt wholesale from a registry snapshot and never mutated
//! afterwards. Entries are ordered by ascending [`specificity`] and resolution returns the
//! *first* full match in that order. Broad patterns are therefore tried before narrow
//! ones and can shadow them: `^/.*$` wins over `^/users$` for `/users`. The heuristic is
//! kept as-is because existing deployments depend on it; do not flip it to
//! longest-match without a migration plan.
use regex::Regex;

use crate::core::service::{ServiceRecord, ServiceTarget};

const REGEX_METACHARACTERS: &str = r".\[]()*?+";

/// Count of characters in `pattern` that are not regex metacharacters.
///
/// Literal-heavy patterns score higher and are assumed to be narrower.
pub fn specificity(pattern: &str) -> usize {
    pattern
        .chars()
        .filter(|c| !REGEX_METACHARACTERS.contains(*c))
        .count()
}

/// One compiled pattern and the service it routes to.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    matcher: Regex,
    pattern: String,
    specificity: usize,
    target: ServiceTarget,
}

impl RouteEntry {
    /// Compile `pattern` as a matcher anchored at both ends.
    pub fn new(pattern: &str, target: ServiceTarget) -> Result<Self, regex::Error> {
        let matcher = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(Self {
            matcher,
            pattern: pattern.to_string(),
            specificity: specificity(pattern),
            target,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn specificity(&self) -> usize {
        self.specificity
    }

    pub fn target(&self) -> &ServiceTarget {
        &self.target
    }
}

/// Ordered list of routes, ascending specificity.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    entries: Vec<RouteEntry>,
}

impl RoutingTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from a registry snapshot.
    ///
    /// Blocked records are dropped. A record whose pattern does not compile is skipped with
    /// a warning rather than failing the whole build. Ties keep snapshot order.
    pub fn build(snapshot: &[ServiceRecord]) -> Self {
        let mut entries: Vec<RouteEntry> = snapshot
            .iter()
            .filter(|record| !record.blocked)
            .filter_map(|record| match RouteEntry::new(&record.path, record.target()) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(
                        service = %record.name,
                        pattern = %record.path,
                        "Skipping service with uncompilable path pattern: {}",
                        e
                    );
                    None
                }
            })
            .collect();

        // sort_by_key is stable
        entries.sort_by_key(RouteEntry::specificity);

        Self { entries }
    }

    /// First entry whose matcher fully matches `path`.
    pub fn resolve(&self, path: &str) -> Option<&ServiceTarget> {
        self.entries
            .iter()
            .find(|entry| entry.matches(path))
            .map(RouteEntry::target)
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{backend::BackendUrl, service::Credential};

    fn record(id: u64, name: &str, path: &str, blocked: bool) -> ServiceRecord {
        ServiceRecord {
            id,
            name: name.to_string(),
            url: BackendUrl::new(&format!("http://{name}")).unwrap(),
            path: path.to_string(),
            blocked,
            credential: Credential::new(format!("key-{name}")),
        }
    }

    #[test]
    fn test_specificity_counts_literals() {
        assert_eq!(specificity("^/a$"), 4);
        assert_eq!(specificity("^/.*$"), 3);
        assert!(specificity("^/a$") > specificity("^/.*$"));
        assert_eq!(specificity(r".\[]()*?+"), 0);
        assert_eq!(specificity(""), 0);
    }

    #[test]
    fn test_build_drops_blocked_and_sorts_ascending() {
        let snapshot = vec![
            record(1, "users", "^/users/profile$", false),
            record(2, "catchall", "^/.*", false),
            record(3, "hidden", "^/hidden", true),
            record(4, "orders", "^/orders.*", false),
        ];

        let table = RoutingTable::build(&snapshot);
        assert_eq!(table.len(), 3);

        let scores: Vec<usize> = table.entries().iter().map(|e| e.specificity()).collect();
        assert!(scores.windows(2).all(|w| w[0] <= w[1]));
        assert!(table.entries().iter().all(|e| e.target().name != "hidden"));
    }

    #[test]
    fn test_ties_keep_snapshot_order() {
        let snapshot = vec![
            record(1, "first", "^/ab", false),
            record(2, "second", "^/cd", false),
        ];
        let table = RoutingTable::build(&snapshot);
        assert_eq!(table.entries()[0].target().name, "first");
        assert_eq!(table.entries()[1].target().name, "second");
    }

    #[test]
    fn test_uncompilable_pattern_is_skipped() {
        let snapshot = vec![
            record(1, "broken", "^/(", false),
            record(2, "fine", "^/fine", false),
        ];
        let table = RoutingTable::build(&snapshot);
        assert_eq!(table.len(), 1);
        assert_eq!(table.entries()[0].target().name, "fine");
    }

    #[test]
    fn test_empty_snapshot_resolves_nothing() {
        let table = RoutingTable::build(&[]);
        assert!(table.is_empty());
        assert!(table.resolve("/").is_none());
    }

    #[test]
    fn test_resolution_requires_full_match() {
        let table = RoutingTable::build(&[record(1, "users", "/users", false)]);
        assert!(table.resolve("/users").is_some());
        assert!(table.resolve("/users/1").is_none());
        assert!(table.resolve("/api/users").is_none());
    }

    #[test]
    fn test_alternation_is_anchored_as_a_whole() {
        let table = RoutingTable::build(&[record(1, "alt", "/a|/b", false)]);
        assert!(table.resolve("/a").is_some());
        assert!(table.resolve("/b").is_some());
        assert!(table.resolve("/a/more").is_none());
        assert!(table.resolve("x/b").is_none());
    }

    #[test]
    fn test_broad_pattern_shadows_narrow_one() {
        // "^/.*$" scores 3, "^/users$" scores 8: the broad route sorts first and wins.
        let snapshot = vec![
            record(1, "users", "^/users$", false),
            record(2, "catchall", "^/.*$", false),
        ];
        let table = RoutingTable::build(&snapshot);

        let target = table.resolve("/users").unwrap();
        assert_eq!(target.name, "catchall");
    }
}
