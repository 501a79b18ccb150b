//! Repository name filtering with a deliberately small glob dialect.
//!
//! Only four pattern shapes exist: `*`, `prefix*`, `*suffix` and a literal
//! name. Anything else (`?`, `[..]`, a `*` in the middle) is compared
//! literally.

/// Match a single pattern against a repository name
pub fn matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix('*') {
        return name.starts_with(prefix);
    }

    if let Some(suffix) = pattern.strip_prefix('*') {
        return name.ends_with(suffix);
    }

    pattern == name
}

/// Include/exclude pattern pair applied to every remote repository name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl RepoFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// Included (no include patterns means everything is) and not excluded.
    /// Exclusion always wins.
    pub fn should_sync(&self, name: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|pattern| matches(pattern, name));

        included && !self.is_excluded(name)
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|pattern| matches(pattern, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn filter(include: &[&str], exclude: &[&str]) -> RepoFilter {
        RepoFilter::new(
            include.iter().map(|s| s.to_string()).collect(),
            exclude.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_pattern_shapes() {
        assert!(matches("*", "anything"));
        assert!(matches("*", ""));

        assert!(matches("proj-*", "proj-a"));
        assert!(matches("proj-*", "proj-"));
        assert!(!matches("proj-*", "my-proj-a"));

        assert!(matches("*-cli", "tool-cli"));
        assert!(!matches("*-cli", "tool-cli-old"));

        assert!(matches("dotfiles", "dotfiles"));
        assert!(!matches("dotfiles", "dotfiles2"));
    }

    #[test]
    fn test_unsupported_wildcards_are_literal() {
        assert!(!matches("pro?", "proj"));
        assert!(!matches("[ab]c", "ac"));
        assert!(matches("pro?", "pro?"));
    }

    #[test]
    fn test_include_and_exclude() {
        let f = filter(&["proj-*"], &["proj-old"]);
        assert!(f.should_sync("proj-a"));
        assert!(!f.should_sync("proj-old"));
        assert!(!f.should_sync("misc"));
    }

    #[test]
    fn test_empty_filter_accepts_everything() {
        let f = RepoFilter::default();
        assert!(f.should_sync("anything"));
        assert!(!f.is_excluded("anything"));
    }

    #[test]
    fn test_excludes_only() {
        let f = filter(&[], &["*-archive", "scratch"]);
        assert!(f.should_sync("service"));
        assert!(!f.should_sync("logs-archive"));
        assert!(!f.should_sync("scratch"));
    }

    #[quickcheck]
    fn prop_exclude_always_wins(name: String, include: Vec<String>) -> bool {
        let f = RepoFilter::new(include, vec![name.clone()]);
        !f.should_sync(&name)
    }

    #[quickcheck]
    fn prop_empty_include_means_not_excluded(name: String, exclude: Vec<String>) -> bool {
        let f = RepoFilter::new(Vec::new(), exclude);
        f.should_sync(&name) == !f.is_excluded(&name)
    }

    #[quickcheck]
    fn prop_star_matches_all(name: String) -> bool {
        matches("*", &name)
    }
}
