//! Entity selection: include/exclude set algebra plus the resume window.
//!
//! Selection is pure and deterministic: the same definition and universe
//! always yield the same ordered list, which is what makes the resume
//! cursor meaningful across process restarts.

use std::collections::BTreeSet;

/// Include-list wildcard: select the whole universe.
pub const INCLUDE_ALL: &str = "*";

/// Apply a definition's include/exclude sets to the source's entity
/// universe. Rules:
/// - empty include list, or one containing `"*"`, selects everything
/// - otherwise only entities named in the include list are selected
/// - exclusion always wins over inclusion
/// - empty-string members are ignored
///
/// The result is sorted and deduplicated.
pub fn select(include: &[String], exclude: &[String], universe: &[String]) -> Vec<String> {
    let include_set: BTreeSet<&str> = include
        .iter()
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .collect();
    let exclude_set: BTreeSet<&str> = exclude
        .iter()
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .collect();
    let include_all = include_set.is_empty() || include_set.contains(INCLUDE_ALL);

    let mut selected: Vec<String> = universe
        .iter()
        .filter(|entity| !entity.is_empty())
        .filter(|entity| include_all || include_set.contains(entity.as_str()))
        .filter(|entity| !exclude_set.contains(entity.as_str()))
        .cloned()
        .collect();
    selected.sort();
    selected.dedup();
    selected
}

/// Cut the selected list down to what a resumed job still has to do:
/// everything strictly after the cursor entity. A cursor that no longer
/// appears in the list (the definition changed, or the entity vanished)
/// fails open to the full list rather than silently skipping work.
pub fn resume_window(selected: &[String], cursor: Option<&str>) -> Vec<String> {
    match cursor {
        None => selected.to_vec(),
        Some(cursor) => match selected.iter().position(|entity| entity == cursor) {
            Some(index) => selected[index + 1..].to_vec(),
            None => selected.to_vec(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_include_selects_whole_universe() {
        let universe = strings(&["b", "a", "c"]);
        assert_eq!(select(&[], &[], &universe), strings(&["a", "b", "c"]));
    }

    #[test]
    fn wildcard_include_selects_whole_universe() {
        let universe = strings(&["b", "a"]);
        let include = strings(&["*"]);
        assert_eq!(select(&include, &[], &universe), strings(&["a", "b"]));
    }

    #[test]
    fn explicit_include_narrows_selection() {
        let universe = strings(&["a", "b", "c"]);
        let include = strings(&["c", "a"]);
        assert_eq!(select(&include, &[], &universe), strings(&["a", "c"]));
    }

    #[test]
    fn include_outside_universe_is_ignored() {
        let universe = strings(&["a"]);
        let include = strings(&["a", "ghost"]);
        assert_eq!(select(&include, &[], &universe), strings(&["a"]));
    }

    #[test]
    fn exclusion_wins_over_inclusion() {
        let universe = strings(&["a", "b", "c"]);
        let include = strings(&["a", "b"]);
        let exclude = strings(&["b"]);
        assert_eq!(select(&include, &exclude, &universe), strings(&["a"]));
    }

    #[test]
    fn exclusion_applies_under_wildcard() {
        let universe = strings(&["a", "b", "c"]);
        let exclude = strings(&["b"]);
        assert_eq!(select(&[], &exclude, &universe), strings(&["a", "c"]));
    }

    #[test]
    fn empty_strings_are_ignored_everywhere() {
        let universe = strings(&["a", "", "b"]);
        let include = strings(&["", "a", "b"]);
        let exclude = strings(&[""]);
        assert_eq!(select(&include, &exclude, &universe), strings(&["a", "b"]));
    }

    #[test]
    fn selection_is_deterministic_and_deduplicated() {
        let universe = strings(&["c", "a", "b", "a"]);
        let first = select(&[], &[], &universe);
        let second = select(&[], &[], &universe);
        assert_eq!(first, second);
        assert_eq!(first, strings(&["a", "b", "c"]));
    }

    #[test]
    fn resume_window_without_cursor_keeps_everything() {
        let selected = strings(&["a", "b", "c"]);
        assert_eq!(resume_window(&selected, None), selected);
    }

    #[test]
    fn resume_window_skips_through_cursor() {
        let selected = strings(&["a", "b", "c", "d"]);
        assert_eq!(resume_window(&selected, Some("b")), strings(&["c", "d"]));
    }

    #[test]
    fn resume_window_after_last_entity_is_empty() {
        let selected = strings(&["a", "b"]);
        assert!(resume_window(&selected, Some("b")).is_empty());
    }

    #[test]
    fn resume_window_fails_open_on_unknown_cursor() {
        let selected = strings(&["a", "b"]);
        assert_eq!(resume_window(&selected, Some("zz")), selected);
    }
}
