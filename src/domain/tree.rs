//! Forest helpers over [`EntryView`]
//!
//! Views own their children by value and never point back at their parent.
//! Everything that needs an ancestor goes through id lookups here.
//!
//! ## Display order
//!
//! Siblings are ordered oldest first. Entries with an `adjusted_top_time`
//! (promoted entries) come after all others, ordered by that timestamp, so
//! the most recently promoted entry sits closest to the input line.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::entry::{Entry, Note};
use super::view::{DetailState, EntryView, NoteView};

/// Builds the view forest from flat entries and their notes
///
/// Entries whose parent is not part of `entries` are dropped, as are any
/// entries not reachable from a root.
pub fn build_forest(entries: Vec<Entry>, mut notes: HashMap<i64, Vec<Note>>) -> Vec<EntryView> {
    let mut by_parent: HashMap<i64, Vec<Entry>> = HashMap::new();
    for entry in entries {
        by_parent.entry(entry.parent_id).or_default().push(entry);
    }

    fn attach(
        parent_id: i64,
        by_parent: &mut HashMap<i64, Vec<Entry>>,
        notes: &mut HashMap<i64, Vec<Note>>,
    ) -> Vec<EntryView> {
        let Some(children) = by_parent.remove(&parent_id) else {
            return Vec::new();
        };
        children
            .into_iter()
            .map(|entry| {
                let id = entry.id;
                let mut view = EntryView::new(entry);
                view.notes = notes
                    .remove(&id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(NoteView::new)
                    .collect();
                view.children = attach(id, by_parent, notes);
                view
            })
            .collect()
    }

    let mut forest = attach(0, &mut by_parent, &mut notes);
    sort_forest(&mut forest);
    forest
}

/// Display ordering between two siblings
pub fn compare_display(a: &Entry, b: &Entry) -> Ordering {
    match (a.adjusted_top_time, b.adjusted_top_time) {
        (0, 0) => a.create_time.cmp(&b.create_time),
        (0, _) => Ordering::Less,
        (_, 0) => Ordering::Greater,
        (x, y) => x.cmp(&y),
    }
    .then_with(|| a.id.cmp(&b.id))
}

/// Sorts every sibling list in display order
pub fn sort_forest(forest: &mut [EntryView]) {
    forest.sort_by(|a, b| compare_display(&a.data, &b.data));
    for view in forest.iter_mut() {
        sort_forest(&mut view.children);
    }
}

/// Recursive lookup by id
pub fn find(forest: &[EntryView], id: i64) -> Option<&EntryView> {
    for view in forest {
        if view.data.id == id {
            return Some(view);
        }
        if let Some(found) = find(&view.children, id) {
            return Some(found);
        }
    }
    None
}

pub fn find_mut(forest: &mut [EntryView], id: i64) -> Option<&mut EntryView> {
    for view in forest.iter_mut() {
        if view.data.id == id {
            return Some(view);
        }
        if let Some(found) = find_mut(&mut view.children, id) {
            return Some(found);
        }
    }
    None
}

/// Detaches the view with `id` (and its subtree) from the forest
pub fn remove(forest: &mut Vec<EntryView>, id: i64) -> Option<EntryView> {
    if let Some(pos) = forest.iter().position(|v| v.data.id == id) {
        return Some(forest.remove(pos));
    }
    forest
        .iter_mut()
        .find_map(|view| remove(&mut view.children, id))
}

/// Inserts a view under its `parent_id` (or at the root) keeping display order
///
/// Returns the view back if the parent is not in the forest.
pub fn insert(forest: &mut Vec<EntryView>, view: EntryView) -> Result<(), EntryView> {
    let siblings = if view.data.parent_id == 0 {
        forest
    } else {
        match find_mut(forest, view.data.parent_id) {
            Some(parent) => &mut parent.children,
            None => return Err(view),
        }
    };
    let pos = siblings
        .iter()
        .position(|s| compare_display(&view.data, &s.data) == Ordering::Less)
        .unwrap_or(siblings.len());
    siblings.insert(pos, view);
    Ok(())
}

/// Returns true if `id` lies strictly inside the subtree rooted at `ancestor_id`
pub fn is_descendant(forest: &[EntryView], ancestor_id: i64, id: i64) -> bool {
    match find(forest, ancestor_id) {
        Some(ancestor) => find(&ancestor.children, id).is_some(),
        None => false,
    }
}

/// Depth-first (pre-order) ids of the whole forest
pub fn flatten_ids(forest: &[EntryView]) -> Vec<i64> {
    fn walk(forest: &[EntryView], out: &mut Vec<i64>) {
        for view in forest {
            out.push(view.data.id);
            walk(&view.children, out);
        }
    }
    let mut out = Vec::new();
    walk(forest, &mut out);
    out
}

/// Total number of descendants below `view`
pub fn count_descendants(view: &EntryView) -> usize {
    view.children
        .iter()
        .map(|c| 1 + count_descendants(c))
        .sum()
}

/// The id after `id` in `order`; the last id when `id` is last or missing
pub fn next_or_last<T: Copy + PartialEq>(order: &[T], id: T) -> Option<T> {
    match order.iter().position(|&x| x == id) {
        Some(pos) if pos + 1 < order.len() => Some(order[pos + 1]),
        _ => order.last().copied(),
    }
}

/// The id before `id` in `order`; the first id when `id` is first or missing
pub fn prev_or_first<T: Copy + PartialEq>(order: &[T], id: T) -> Option<T> {
    match order.iter().position(|&x| x == id) {
        Some(pos) if pos > 0 => Some(order[pos - 1]),
        _ => order.first().copied(),
    }
}

/// Per-entry UI state that survives a reload
#[derive(Debug, Clone, Default)]
struct CarriedState {
    detail: DetailState,
    collapsed: bool,
}

/// Copies collapsed flags and detail-page sub-state from `old` onto `new` by id
pub fn carry_view_state(old: &[EntryView], new: &mut [EntryView]) {
    fn collect(forest: &[EntryView], out: &mut HashMap<i64, CarriedState>) {
        for view in forest {
            if view.collapsed || view.detail != DetailState::default() {
                out.insert(
                    view.data.id,
                    CarriedState {
                        detail: view.detail.clone(),
                        collapsed: view.collapsed,
                    },
                );
            }
            collect(&view.children, out);
        }
    }

    fn apply(forest: &mut [EntryView], carried: &mut HashMap<i64, CarriedState>) {
        for view in forest.iter_mut() {
            if let Some(state) = carried.remove(&view.data.id) {
                view.detail = state.detail;
                view.collapsed = state.collapsed;
            }
            apply(&mut view.children, carried);
        }
    }

    let mut carried = HashMap::new();
    collect(old, &mut carried);
    if !carried.is_empty() {
        apply(new, &mut carried);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(id: i64, parent_id: i64, created: i64) -> Entry {
        let mut e = Entry::new(format!("e{}", id));
        e.id = id;
        e.parent_id = parent_id;
        e.create_time = Utc.timestamp_opt(created, 0).unwrap();
        e
    }

    fn sample() -> Vec<EntryView> {
        // 1 ─┬─ 2 ── 4
        //    └─ 3
        // 5
        build_forest(
            vec![
                entry(1, 0, 10),
                entry(2, 1, 20),
                entry(3, 1, 30),
                entry(4, 2, 40),
                entry(5, 0, 50),
            ],
            HashMap::new(),
        )
    }

    #[test]
    fn build_attaches_children_and_notes() {
        let mut notes = HashMap::new();
        let mut note = Note::new("n");
        note.entry_id = 2;
        notes.insert(2, vec![note]);

        let forest = build_forest(vec![entry(1, 0, 1), entry(2, 1, 2)], notes);

        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].children[0].data.id, 2);
        assert_eq!(forest[0].children[0].notes.len(), 1);
    }

    #[test]
    fn build_drops_orphans() {
        let forest = build_forest(vec![entry(1, 0, 1), entry(2, 99, 2)], HashMap::new());
        assert_eq!(flatten_ids(&forest), vec![1]);
    }

    #[test]
    fn promoted_entries_sort_last() {
        let mut promoted = entry(1, 0, 10);
        promoted.adjusted_top_time = 1;
        let forest = build_forest(vec![promoted, entry(2, 0, 20), entry(3, 0, 5)], HashMap::new());
        assert_eq!(flatten_ids(&forest), vec![3, 2, 1]);
    }

    #[test]
    fn flatten_is_preorder() {
        assert_eq!(flatten_ids(&sample()), vec![1, 2, 4, 3, 5]);
    }

    #[test]
    fn find_is_recursive() {
        let forest = sample();
        assert_eq!(find(&forest, 4).map(|v| v.data.id), Some(4));
        assert!(find(&forest, 42).is_none());
    }

    #[test]
    fn descendant_checks() {
        let forest = sample();
        assert!(is_descendant(&forest, 1, 4));
        assert!(is_descendant(&forest, 2, 4));
        assert!(!is_descendant(&forest, 4, 1));
        assert!(!is_descendant(&forest, 1, 1));
        assert!(!is_descendant(&forest, 3, 4));
    }

    #[test]
    fn remove_detaches_subtree() {
        let mut forest = sample();
        let removed = remove(&mut forest, 2).unwrap();
        assert_eq!(removed.children.len(), 1);
        assert_eq!(flatten_ids(&forest), vec![1, 3, 5]);
    }

    #[test]
    fn insert_under_parent_keeps_order() {
        let mut forest = sample();
        insert(&mut forest, EntryView::new(entry(6, 1, 25))).unwrap();
        assert_eq!(flatten_ids(&forest), vec![1, 2, 4, 6, 3, 5]);
    }

    #[test]
    fn insert_under_missing_parent_fails() {
        let mut forest = sample();
        assert!(insert(&mut forest, EntryView::new(entry(6, 77, 1))).is_err());
    }

    #[test]
    fn count_descendants_counts_all_levels() {
        let forest = sample();
        assert_eq!(count_descendants(&forest[0]), 3);
    }

    #[test]
    fn navigation_wraps_to_endpoints() {
        let order = [1, 2, 3];
        assert_eq!(next_or_last(&order, 1), Some(2));
        assert_eq!(next_or_last(&order, 3), Some(3));
        assert_eq!(next_or_last(&order, 9), Some(3));
        assert_eq!(prev_or_first(&order, 3), Some(2));
        assert_eq!(prev_or_first(&order, 1), Some(1));
        assert_eq!(prev_or_first(&order, 9), Some(1));
        assert_eq!(next_or_last::<i64>(&[], 1), None);
    }

    #[test]
    fn single_entry_navigation_stays() {
        assert_eq!(next_or_last(&[7], 7), Some(7));
        assert_eq!(prev_or_first(&[7], 7), Some(7));
    }

    #[test]
    fn carry_preserves_collapsed_and_detail() {
        let mut old = sample();
        find_mut(&mut old, 2).unwrap().collapsed = true;
        find_mut(&mut old, 3).unwrap().detail.input.set("draft");

        let mut new = sample();
        carry_view_state(&old, &mut new);

        assert!(find(&new, 2).unwrap().collapsed);
        assert_eq!(find(&new, 3).unwrap().detail.input.value, "draft");
        assert!(!find(&new, 1).unwrap().collapsed);
    }
}
