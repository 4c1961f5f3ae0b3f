use std::collections::{HashMap, HashSet};

/// A node in the prefix trie, keyed by byte rather than `char` — paths are
/// ASCII-dominated and indexing by byte avoids char-boundary bookkeeping.
#[derive(Default)]
struct TrieNode {
    children: HashMap<u8, TrieNode>,
    is_end: bool,
}

/// Prefix trie over path segments.
///
/// Entries are inserted with their trailing `*` stripped, so a configured
/// rule of `/api/*` marks the node reached after `/api/` as a match point;
/// any request path that passes through it is considered a prefix match.
struct Trie {
    root: TrieNode,
}

impl Trie {
    fn new() -> Self {
        Self {
            root: TrieNode::default(),
        }
    }

    fn insert(&mut self, prefix: &str) {
        let mut node = &mut self.root;
        for byte in prefix.bytes() {
            node = node.children.entry(byte).or_default();
        }
        node.is_end = true;
    }

    /// True if `path` passes through any inserted prefix's end node.
    fn matches(&self, path: &str) -> bool {
        let mut node = &self.root;
        for byte in path.bytes() {
            node = match node.children.get(&byte) {
                Some(next) => next,
                None => return false,
            };
            if node.is_end {
                return true;
            }
        }
        node.is_end
    }
}

/// Combines an exact-match set with a prefix trie for the `url-path-map`
/// path-check feature: a path is allowed if it is in the exact set, or if
/// some `<prefix>*` rule's prefix is a prefix of it.
pub struct PathMatcher {
    exact: HashSet<String>,
    prefixes: Trie,
}

impl PathMatcher {
    /// Builds a matcher from the raw configured entries (as read from the
    /// config file's path map). Entries ending in `*` populate the prefix
    /// trie (with the star stripped); all entries also populate the exact
    /// set, matching the source's behavior of loading the same map into
    /// both structures.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exact = HashSet::new();
        let mut prefixes = Trie::new();
        for entry in entries {
            let entry = entry.as_ref();
            exact.insert(entry.to_string());
            if let Some(prefix) = entry.strip_suffix('*') {
                prefixes.insert(prefix);
            }
        }
        Self { exact, prefixes }
    }

    pub fn empty() -> Self {
        Self {
            exact: HashSet::new(),
            prefixes: Trie::new(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.exact.contains(path) || self.prefixes.matches(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        let matcher = PathMatcher::from_entries(["/health"]);
        assert!(matcher.matches("/health"));
        assert!(!matcher.matches("/healthy"));
    }

    #[test]
    fn prefix_match() {
        let matcher = PathMatcher::from_entries(["/api/*"]);
        assert!(matcher.matches("/api/users"));
        assert!(matcher.matches("/api/"));
        assert!(!matcher.matches("/apiary"));
        assert!(!matcher.matches("/other"));
    }

    #[test]
    fn empty_matcher_matches_nothing() {
        let matcher = PathMatcher::empty();
        assert!(!matcher.matches("/anything"));
    }

    #[test]
    fn mixed_exact_and_prefix() {
        let matcher = PathMatcher::from_entries(["/status", "/api/*"]);
        assert!(matcher.matches("/status"));
        assert!(matcher.matches("/api/v1/widgets"));
        assert!(!matcher.matches("/admin"));
    }
}
