//! Deterministic test selection by group and name filters.

use crate::core::options::RunOptions;

/// True if `filter` is unset or occurs as a substring of `name`.
pub fn matches_filter(filter: Option<&str>, name: &str) -> bool {
    match filter {
        None => true,
        Some(filter) => name.contains(filter),
    }
}

/// A test runs only if both the group filter and the name filter match.
pub fn is_selected(options: &RunOptions, group: &str, name: &str) -> bool {
    matches_filter(options.group_filter.as_deref(), group)
        && matches_filter(options.name_filter.as_deref(), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(group: Option<&str>, name: Option<&str>) -> RunOptions {
        RunOptions {
            group_filter: group.map(str::to_string),
            name_filter: name.map(str::to_string),
            ..RunOptions::default()
        }
    }

    #[test]
    fn unset_filters_select_everything() {
        let opts = options(None, None);
        assert!(is_selected(&opts, "G1", "a"));
        assert!(is_selected(&opts, "", ""));
    }

    #[test]
    fn group_filter_is_a_substring_match() {
        let opts = options(Some("G1"), None);
        assert!(is_selected(&opts, "G1", "a"));
        assert!(is_selected(&opts, "XG1Y", "b"));
        assert!(!is_selected(&opts, "G2", "a"));
    }

    #[test]
    fn both_filters_must_match() {
        let opts = options(Some("G1"), Some("a"));
        assert!(is_selected(&opts, "G1", "a"));
        assert!(!is_selected(&opts, "G1", "b"));
        assert!(!is_selected(&opts, "G2", "a"));
    }

    #[test]
    fn empty_filter_matches_all_names() {
        assert!(matches_filter(Some(""), "anything"));
    }
}
