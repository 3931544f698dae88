//! Search and zen filtering over the entry forest
//!
//! Filtering never touches the input forest; survivors are cloned with
//! their children replaced by the filtered result.

use crate::domain::{EntryView, MatchText, ViewType};

/// Keeps entries satisfying `pred`, plus every ancestor of a kept entry
pub fn filter_entries<F>(list: &[EntryView], pred: &F) -> Vec<EntryView>
where
    F: Fn(&EntryView) -> bool,
{
    list.iter()
        .filter_map(|view| {
            let children = filter_entries(&view.children, pred);
            if children.is_empty() && !pred(view) {
                return None;
            }
            let mut kept = view.clone();
            kept.children = children;
            Some(kept)
        })
        .collect()
}

/// Case-insensitive substring search annotating `match_texts`
///
/// Group rows only survive through their members.
pub fn filter_entries_query(list: &[EntryView], query: &str) -> Vec<EntryView> {
    let query = query.trim();
    if query.is_empty() {
        return list.to_vec();
    }

    fn walk(list: &[EntryView], query: &str) -> Vec<EntryView> {
        list.iter()
            .filter_map(|view| {
                let children = walk(&view.children, query);
                let segments = if view.kind == ViewType::Log {
                    match_segments(&view.data.text, query)
                } else {
                    None
                };
                if children.is_empty() && segments.is_none() {
                    return None;
                }
                let mut kept = view.clone();
                kept.children = children;
                kept.match_texts = segments.unwrap_or_default();
                Some(kept)
            })
            .collect()
    }

    walk(list, query)
}

/// Zen mode: highlighted and not done
pub fn is_zen(view: &EntryView) -> bool {
    view.kind == ViewType::Log && view.data.highlight_level > 0 && !view.data.done
}

/// Splits `text` into segments tagged by whether they match `query`
///
/// Returns `None` when nothing matches. Matching is per character after
/// lowercasing, so offsets always refer to the original text.
pub fn match_segments(text: &str, query: &str) -> Option<Vec<MatchText>> {
    let fold = |c: char| c.to_lowercase().next().unwrap_or(c);
    let chars: Vec<char> = text.chars().collect();
    let needle: Vec<char> = query.chars().map(fold).collect();
    if needle.is_empty() || needle.len() > chars.len() {
        return None;
    }

    let mut segments = Vec::new();
    let mut plain_start = 0;
    let mut i = 0;
    while i + needle.len() <= chars.len() {
        let hit = chars[i..i + needle.len()]
            .iter()
            .zip(&needle)
            .all(|(c, n)| fold(*c) == *n);
        if hit {
            if plain_start < i {
                segments.push(MatchText::new(chars[plain_start..i].iter().collect::<String>(), false));
            }
            let end = i + needle.len();
            segments.push(MatchText::new(chars[i..end].iter().collect::<String>(), true));
            plain_start = end;
            i = end;
        } else {
            i += 1;
        }
    }

    if plain_start == 0 && segments.is_empty() {
        return None;
    }
    if plain_start < chars.len() {
        segments.push(MatchText::new(chars[plain_start..].iter().collect::<String>(), false));
    }
    Some(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{tree, Entry};
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn forest(items: &[(i64, i64, &str)]) -> Vec<EntryView> {
        let entries = items
            .iter()
            .map(|(id, parent_id, text)| {
                let mut e = Entry::child_of(*parent_id, *text);
                e.id = *id;
                e
            })
            .collect();
        tree::build_forest(entries, HashMap::new())
    }

    fn has_match(view: &EntryView) -> bool {
        view.is_search_match() || view.children.iter().any(has_match)
    }

    #[test]
    fn test_match_regions() {
        let segments = match_segments("Buy milk", "mi").unwrap();
        assert_eq!(
            segments,
            vec![
                MatchText::new("Buy ", false),
                MatchText::new("mi", true),
                MatchText::new("lk", false),
            ]
        );
    }

    #[test]
    fn match_is_case_insensitive() {
        let segments = match_segments("Call MOM", "mom").unwrap();
        assert_eq!(segments[1], MatchText::new("MOM", true));
        assert!(match_segments("Call mom", "milk").is_none());
    }

    #[test]
    fn every_occurrence_is_tagged() {
        let segments = match_segments("abab", "ab").unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.matched));
    }

    #[test]
    fn query_keeps_ancestors_of_matches() {
        let list = forest(&[(1, 0, "project"), (2, 1, "buy milk"), (3, 0, "Call mom")]);
        let filtered = filter_entries_query(&list, "MI");

        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].data.text, "project");
        assert!(!filtered[0].is_search_match());
        assert!(filtered[0].children[0].is_search_match());
    }

    #[test]
    fn filtering_does_not_touch_input() {
        let list = forest(&[(1, 0, "a"), (2, 1, "b")]);
        let before = list.clone();
        let _ = filter_entries_query(&list, "b");
        assert_eq!(list, before);
    }

    #[test]
    fn zen_keeps_highlighted_open_entries() {
        let mut list = forest(&[(1, 0, "parent"), (2, 1, "hot"), (3, 0, "cold")]);
        list[0].children[0].data.highlight_level = 2;
        let filtered = filter_entries(&list, &is_zen);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].children[0].data.text, "hot");

        list[0].children[0].data.done = true;
        assert!(filter_entries(&list, &is_zen).is_empty());
    }

    proptest! {
        #[test]
        fn every_result_has_a_match_below(
            texts in proptest::collection::vec("[a-c]{1,4}", 1..12),
            query in "[a-c]{1,2}",
        ) {
            // Chain each entry under an earlier one.
            let items: Vec<(i64, i64, String)> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| (i as i64 + 1, (i as i64) / 2, t.clone()))
                .collect();
            let refs: Vec<(i64, i64, &str)> = items.iter().map(|(a, b, t)| (*a, *b, t.as_str())).collect();
            let list = forest(&refs);

            for view in filter_entries_query(&list, &query) {
                prop_assert!(has_match(&view));
            }
        }

        #[test]
        fn segments_rebuild_original(text in "[a-zA-Z ]{0,16}", query in "[a-z]{1,3}") {
            if let Some(segments) = match_segments(&text, &query) {
                let joined: String = segments.iter().map(|s| s.text.as_str()).collect();
                prop_assert_eq!(joined, text);
            }
        }
    }
}
