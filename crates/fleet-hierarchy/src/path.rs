//! Materialized path codec
//!
//! A hierarchy path is a dot-separated list of sibling indices, one segment
//! per ancestor including the node itself: `"1"` is the first root of a
//! tenant, `"1.3"` its third child, `"1.3.2"` that child's second child.
//!
//! Everything here is pure string manipulation; no function touches the store.

use std::collections::HashSet;

/// Segment separator.
pub const SEPARATOR: char = '.';

/// Compute the next free sibling index from the paths of existing siblings.
///
/// The trailing segment of each path is parsed as an integer. Segments that do
/// not parse count as `0` rather than failing, so a single corrupt sibling
/// cannot block inserts under its parent.
///
/// # Examples
///
/// ```
/// use fleet_hierarchy::path::next_sibling_index;
///
/// assert_eq!(next_sibling_index::<&str>(&[]), 1);
/// assert_eq!(next_sibling_index(&["1.1", "1.4", "1.2"]), 5);
/// assert_eq!(next_sibling_index(&["1.x"]), 1);
/// ```
pub fn next_sibling_index<S: AsRef<str>>(existing_sibling_paths: &[S]) -> u32 {
    existing_sibling_paths
        .iter()
        .map(|p| last_segment(p.as_ref()))
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

/// First index at or after `start` that no existing sibling uses as its
/// trailing segment.
///
/// # Examples
///
/// ```
/// use fleet_hierarchy::path::first_unused_index;
///
/// // Two siblings left after "1.1" was deleted: 3 is free, 2 is not
/// assert_eq!(first_unused_index(3, &["1.2", "1.3"]), 4);
/// assert_eq!(first_unused_index(2, &["1.1", "1.3"]), 2);
/// ```
pub fn first_unused_index<S: AsRef<str>>(start: u32, existing_sibling_paths: &[S]) -> u32 {
    let taken: HashSet<u32> = existing_sibling_paths
        .iter()
        .map(|p| last_segment(p.as_ref()))
        .collect();
    let mut index = start.max(1);
    while taken.contains(&index) && index < u32::MAX {
        index += 1;
    }
    index
}

/// Build a child path from its parent's path and its sibling index.
///
/// An empty parent path yields a top-level path.
///
/// # Examples
///
/// ```
/// use fleet_hierarchy::path::child_path;
///
/// assert_eq!(child_path("1.2", 3), "1.2.3");
/// assert_eq!(child_path("", 4), "4");
/// ```
pub fn child_path(parent_path: &str, index: u32) -> String {
    if parent_path.is_empty() {
        index.to_string()
    } else {
        format!("{}{}{}", parent_path, SEPARATOR, index)
    }
}

/// Replace the leading `old_prefix` of `path` with `new_prefix`.
///
/// Paths that do not start with `old_prefix` are returned unchanged.
///
/// # Examples
///
/// ```
/// use fleet_hierarchy::path::rewrite_prefix;
///
/// assert_eq!(rewrite_prefix("1.1.1", "1.1", "2"), "2.1");
/// assert_eq!(rewrite_prefix("3.1", "1.1", "2"), "3.1");
/// ```
pub fn rewrite_prefix(path: &str, old_prefix: &str, new_prefix: &str) -> String {
    match path.strip_prefix(old_prefix) {
        Some(rest) => format!("{}{}", new_prefix, rest),
        None => path.to_string(),
    }
}

/// Number of segments in a path (`0` for the empty path).
pub fn segment_count(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split(SEPARATOR).count()
    }
}

/// Path of the parent, or `None` for a top-level path.
pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind(SEPARATOR).map(|idx| &path[..idx])
}

/// Prefix shared by every strict descendant of `path`.
pub fn descendant_prefix(path: &str) -> String {
    format!("{}{}", path, SEPARATOR)
}

/// Whether `path` lies strictly below `ancestor_path`.
///
/// Unlike a bare string prefix test, `"10.2"` is not below `"1"`.
pub fn is_descendant_path(path: &str, ancestor_path: &str) -> bool {
    path.len() > ancestor_path.len() + 1
        && path.starts_with(ancestor_path)
        && path[ancestor_path.len()..].starts_with(SEPARATOR)
}

fn last_segment(path: &str) -> u32 {
    path.rsplit(SEPARATOR)
        .next()
        .and_then(|segment| segment.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_sibling_index_empty() {
        let none: [String; 0] = [];
        assert_eq!(next_sibling_index(&none), 1);
    }

    #[test]
    fn test_next_sibling_index_uses_max_not_count() {
        // A gap left by a deleted sibling is not reused
        assert_eq!(next_sibling_index(&["2.1", "2.3"]), 4);
    }

    #[test]
    fn test_next_sibling_index_tolerates_garbage() {
        assert_eq!(next_sibling_index(&["1.abc", "1.2", ""]), 3);
        assert_eq!(next_sibling_index(&["abc"]), 1);
    }

    #[test]
    fn test_first_unused_index_skips_taken_segments() {
        assert_eq!(first_unused_index::<&str>(1, &[]), 1);
        assert_eq!(first_unused_index(2, &["1.2", "1.3", "1.5"]), 4);
        assert_eq!(first_unused_index(0, &["7"]), 1);
        assert_eq!(first_unused_index(1, &["1", "2"]), 3);
    }

    #[test]
    fn test_child_path() {
        assert_eq!(child_path("", 1), "1");
        assert_eq!(child_path("1", 1), "1.1");
        assert_eq!(child_path("1.1.1.1", 12), "1.1.1.1.12");
    }

    #[test]
    fn test_rewrite_prefix_only_leading() {
        assert_eq!(rewrite_prefix("1.1.1", "1.1", "2"), "2.1");
        assert_eq!(rewrite_prefix("1.1", "1.1", "3.4"), "3.4");
        // Only the leading occurrence is replaced
        assert_eq!(rewrite_prefix("1.1.1.1", "1.1", "9"), "9.1.1");
        assert_eq!(rewrite_prefix("2.1.1", "1.1", "9"), "2.1.1");
    }

    #[test]
    fn test_segment_count() {
        assert_eq!(segment_count(""), 0);
        assert_eq!(segment_count("4"), 1);
        assert_eq!(segment_count("4.1.2"), 3);
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("1"), None);
        assert_eq!(parent_path("1.2"), Some("1"));
        assert_eq!(parent_path("1.2.3"), Some("1.2"));
    }

    #[test]
    fn test_is_descendant_path() {
        assert!(is_descendant_path("1.2", "1"));
        assert!(is_descendant_path("1.2.5", "1"));
        assert!(!is_descendant_path("1", "1"));
        assert!(!is_descendant_path("10.2", "1"));
        assert!(!is_descendant_path("1.", "1"));
        assert_eq!(descendant_prefix("1.2"), "1.2.");
    }
}
