//! Tree flattening and the viewport slice window

use crate::domain::{tree, EntryView};

/// A forest node placed in display order
#[derive(Debug, Clone, PartialEq)]
pub struct FlatItem<'a> {
    pub view: &'a EntryView,
    pub depth: usize,
    /// `ancestor_is_last[k]`: the path node at depth `k` is its parent's last child
    pub ancestor_is_last: Vec<bool>,
    pub is_last: bool,
}

impl FlatItem<'_> {
    /// Box-drawing connector prefix; roots get none
    pub fn prefix(&self) -> String {
        if self.depth == 0 {
            return String::new();
        }
        // Roots are not joined by a rail, so column 0 is always blank.
        let mut prefix = String::from("  ");
        for &last in self.ancestor_is_last.iter().take(self.depth).skip(1) {
            prefix.push_str(if last { "  " } else { "│ " });
        }
        prefix.push_str(if self.is_last { "└─" } else { "├─" });
        prefix
    }

    /// Trailing glyph
    pub fn glyph(&self) -> &'static str {
        if self.view.data.done {
            "✓"
        } else {
            "•"
        }
    }
}

/// Depth-first walk; collapsed nodes hide their children unless `expand_all`
pub fn flatten(forest: &[EntryView], expand_all: bool) -> Vec<FlatItem<'_>> {
    fn walk<'a>(
        forest: &'a [EntryView],
        depth: usize,
        path: &mut Vec<bool>,
        expand_all: bool,
        out: &mut Vec<FlatItem<'a>>,
    ) {
        for (i, view) in forest.iter().enumerate() {
            let is_last = i + 1 == forest.len();
            path.push(is_last);
            out.push(FlatItem {
                view,
                depth,
                ancestor_is_last: path.clone(),
                is_last,
            });
            if expand_all || !view.collapsed {
                walk(&view.children, depth + 1, path, expand_all, out);
            }
            path.pop();
        }
    }

    let mut out = Vec::new();
    walk(forest, 0, &mut Vec::new(), expand_all, &mut out);
    out
}

/// Records the hidden descendant count on every collapsed view
pub fn mark_collapsed(forest: &mut [EntryView]) {
    for view in forest.iter_mut() {
        view.collapsed_count = if view.collapsed {
            tree::count_descendants(view)
        } else {
            0
        };
        mark_collapsed(&mut view.children);
    }
}

/// The visible slice of a flattened list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
    pub above: usize,
    pub below: usize,
}

/// Scroll state of the entry list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub slice_start: usize,
    pub max_entries: usize,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            slice_start: 0,
            max_entries: 20,
        }
    }
}

impl Viewport {
    pub fn new(max_entries: usize) -> Self {
        Self {
            slice_start: 0,
            max_entries,
        }
    }

    fn clamped_start(&self, total: usize) -> usize {
        self.slice_start
            .min(total.saturating_sub(self.max_entries))
    }

    /// Window over `total` items
    pub fn window(&self, total: usize) -> Window {
        let start = self.clamped_start(total);
        let end = total.min(start + self.max_entries);
        Window {
            start,
            end,
            above: start,
            below: total - end,
        }
    }

    /// Shifts the window minimally so `selected` is visible
    pub fn follow(&mut self, selected: Option<usize>, total: usize) {
        self.slice_start = self.clamped_start(total);
        let Some(selected) = selected else {
            return;
        };
        if self.max_entries == 0 {
            return;
        }
        if selected < self.slice_start {
            self.slice_start = selected;
        } else if selected >= self.slice_start + self.max_entries {
            self.slice_start = selected + 1 - self.max_entries;
        }
    }
}

/// Truncates to `max_len` characters, ending with "..." when cut
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Entry;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn view(id: i64, parent_id: i64, text: &str, done: bool) -> Entry {
        let mut e = Entry::child_of(parent_id, text);
        e.id = id;
        e.done = done;
        e.create_time = chrono::DateTime::from_timestamp(id, 0).unwrap_or_default();
        e
    }

    fn sample() -> Vec<EntryView> {
        tree::build_forest(
            vec![
                view(1, 0, "Parent Item", false),
                view(2, 1, "Some Content", false),
                view(3, 2, "First Feature", true),
                view(4, 3, "Change the API implementation", false),
                view(5, 3, "Update the configuration", false),
                view(6, 2, "Second Feature", true),
                view(7, 6, "Fix test case implementation", false),
                view(8, 1, "Another Section", false),
            ],
            HashMap::new(),
        )
    }

    fn render(forest: &[EntryView]) -> String {
        flatten(forest, false)
            .iter()
            .map(|item| format!("{}{} {}\n", item.prefix(), item.glyph(), item.view.data.text))
            .collect()
    }

    // ==========================================================================
    // Prefixes
    // ==========================================================================

    #[test]
    fn test_connectors_for_nested_tree() {
        let expected = "\
• Parent Item
  ├─• Some Content
  │ ├─✓ First Feature
  │ │ ├─• Change the API implementation
  │ │ └─• Update the configuration
  │ └─✓ Second Feature
  │   └─• Fix test case implementation
  └─• Another Section
";
        assert_eq!(render(&sample()), expected);
    }

    #[test]
    fn collapsed_nodes_hide_children() {
        let mut forest = sample();
        forest[0].children[0].collapsed = true;
        mark_collapsed(&mut forest);

        assert_eq!(forest[0].children[0].collapsed_count, 5);
        let ids: Vec<i64> = flatten(&forest, false).iter().map(|i| i.view.id()).collect();
        assert_eq!(ids, vec![1, 2, 8]);
        assert_eq!(flatten(&forest, true).len(), 8);
    }

    // ==========================================================================
    // Viewport
    // ==========================================================================

    #[test]
    fn window_reports_hidden_rows() {
        let vp = Viewport {
            slice_start: 3,
            max_entries: 4,
        };
        assert_eq!(
            vp.window(10),
            Window {
                start: 3,
                end: 7,
                above: 3,
                below: 3
            }
        );
    }

    #[test]
    fn window_clamps_start() {
        let vp = Viewport {
            slice_start: 9,
            max_entries: 4,
        };
        assert_eq!(vp.window(6).start, 2);
        assert_eq!(vp.window(3).start, 0);
    }

    #[test]
    fn follow_moves_minimally() {
        let mut vp = Viewport::new(3);
        vp.follow(Some(4), 10);
        assert_eq!(vp.slice_start, 2);
        vp.follow(Some(3), 10);
        assert_eq!(vp.slice_start, 2);
        vp.follow(Some(0), 10);
        assert_eq!(vp.slice_start, 0);
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate_str("hello world", 8), "hello...");
        assert_eq!(truncate_str("hi", 3), "hi");
    }

    proptest! {
        #[test]
        fn window_stays_in_bounds(start in 0usize..200, max in 1usize..50, total in 0usize..200) {
            let w = Viewport { slice_start: start, max_entries: max }.window(total);
            prop_assert!(w.start <= w.end);
            prop_assert!(w.end <= total);
            prop_assert!(w.end - w.start <= max);
            prop_assert_eq!(w.above + (w.end - w.start) + w.below, total);
        }

        #[test]
        fn follow_keeps_selection_visible(start in 0usize..100, max in 1usize..30, total in 1usize..100, sel in 0usize..100) {
            let sel = sel % total;
            let mut vp = Viewport { slice_start: start, max_entries: max };
            vp.follow(Some(sel), total);
            let w = vp.window(total);
            prop_assert!(w.start <= sel && sel < w.end);
        }
    }
}
