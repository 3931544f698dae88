//! The entry forest cache
//!
//! Every mutation calls the service first and only touches the local
//! forest after the backend acknowledged it. On error the forest is left
//! exactly as it was.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{
    tree, Entry, EntryListOptions, EntryPatch, EntryView, Note, NotePatch, NoteView,
};
use crate::storage::{EntryService, NoteService, Result, Services, StorageError};

/// Highest highlight tier
pub const MAX_HIGHLIGHT: i32 = 5;

/// In-memory entry forest backed by the entry and note services
pub struct LogManager {
    entries: Arc<dyn EntryService>,
    notes: Arc<dyn NoteService>,
    forest: Vec<EntryView>,
    include_history: bool,
}

impl LogManager {
    pub fn new(services: &Services) -> Self {
        Self {
            entries: services.entries.clone(),
            notes: services.notes.clone(),
            forest: Vec::new(),
            include_history: false,
        }
    }

    /// (Re)loads the forest, keeping collapsed flags and detail input by id
    pub fn init(&mut self, include_history: bool) -> Result<()> {
        let forest = self.load(include_history)?;
        let old = std::mem::replace(&mut self.forest, forest);
        tree::carry_view_state(&old, &mut self.forest);
        self.include_history = include_history;
        tracing::debug!(
            include_history,
            roots = self.forest.len(),
            "log manager loaded"
        );
        Ok(())
    }

    fn load(&self, include_history: bool) -> Result<Vec<EntryView>> {
        let (entries, _) = self.entries.list(&EntryListOptions::all(include_history))?;
        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        let notes = self.notes.list_for_entries(&ids)?;
        Ok(tree::build_forest(entries, notes))
    }

    pub fn entries(&self) -> &[EntryView] {
        &self.forest
    }

    pub fn include_history(&self) -> bool {
        self.include_history
    }

    /// Recursive lookup
    pub fn get(&self, id: i64) -> Result<&EntryView> {
        tree::find(&self.forest, id).ok_or_else(|| StorageError::not_found("entry", id))
    }

    fn get_mut(&mut self, id: i64) -> Result<&mut EntryView> {
        tree::find_mut(&mut self.forest, id).ok_or_else(|| StorageError::not_found("entry", id))
    }

    /// Returns true if `id` lies strictly below `ancestor_id`
    pub fn is_descendant(&self, ancestor_id: i64, id: i64) -> bool {
        tree::is_descendant(&self.forest, ancestor_id, id)
    }

    /// Next id in flattened order; the last id when `id` is last or unknown
    pub fn find_next_or_last(&self, id: i64) -> Option<i64> {
        tree::next_or_last(&tree::flatten_ids(&self.forest), id)
    }

    /// Previous id in flattened order; the first id when `id` is first or unknown
    pub fn find_prev_or_first(&self, id: i64) -> Option<i64> {
        tree::prev_or_first(&tree::flatten_ids(&self.forest), id)
    }

    /// Adds an entry and returns its new id
    pub fn add(&mut self, mut entry: Entry) -> Result<i64> {
        entry.stamp_defaults(Utc::now());
        if entry.parent_id != 0 && tree::find(&self.forest, entry.parent_id).is_none() {
            return Err(StorageError::Invalid(format!(
                "parent entry {} does not exist",
                entry.parent_id
            )));
        }

        let id = self.entries.add(entry.clone())?;
        entry.id = id;
        if let Err(view) = tree::insert(&mut self.forest, EntryView::new(entry)) {
            tracing::warn!(id = view.id(), "added entry has no visible parent");
        }
        Ok(id)
    }

    /// Applies `patch` to the entry
    pub fn update(&mut self, id: i64, patch: EntryPatch) -> Result<()> {
        let old_parent = self.get(id)?.data.parent_id;
        if let Some(parent_id) = patch.parent_id {
            if parent_id != old_parent {
                self.check_move(id, parent_id)?;
            }
        }

        self.entries.update(id, &patch)?;

        let now = Utc::now();
        let view = self.get_mut(id)?;
        patch.apply(&mut view.data, now);

        if patch.parent_id.is_some_and(|p| p != old_parent) {
            self.reattach(id);
        } else if patch.affects_order() {
            tree::sort_forest(&mut self.forest);
        }
        Ok(())
    }

    /// Deletes the entry with its subtree and notes
    pub fn delete(&mut self, id: i64) -> Result<()> {
        self.entries.delete(id)?;
        tree::remove(&mut self.forest, id);
        Ok(())
    }

    fn check_move(&self, id: i64, new_parent_id: i64) -> Result<()> {
        if new_parent_id == id {
            return Err(StorageError::Invalid(format!(
                "cannot move entry {} under itself",
                id
            )));
        }
        if self.is_descendant(id, new_parent_id) {
            return Err(StorageError::Invalid(format!(
                "cannot move entry {} under its descendant {}",
                id, new_parent_id
            )));
        }
        if new_parent_id != 0 {
            self.get(new_parent_id)?;
        }
        Ok(())
    }

    /// Re-parents `id`; rejects itself and its descendants as the target
    pub fn move_entry(&mut self, id: i64, new_parent_id: i64) -> Result<()> {
        self.get(id)?;
        self.check_move(id, new_parent_id)?;

        self.entries.move_entry(id, new_parent_id)?;

        let now = Utc::now();
        let view = self.get_mut(id)?;
        view.data.parent_id = new_parent_id;
        view.data.update_time = now.max(view.data.update_time);
        self.reattach(id);
        Ok(())
    }

    /// Moves the view of `id` under its (new) `parent_id`
    fn reattach(&mut self, id: i64) {
        let Some(view) = tree::remove(&mut self.forest, id) else {
            return;
        };
        if let Err(view) = tree::insert(&mut self.forest, view) {
            tracing::warn!(id = view.id(), parent_id = view.data.parent_id, "moved entry has no visible parent");
        }
    }

    /// Flips done, stamping or clearing `done_time`; returns the new state
    pub fn toggle(&mut self, id: i64) -> Result<bool> {
        let done = !self.get(id)?.data.done;
        self.update(id, EntryPatch::done(done, Utc::now()))?;
        Ok(done)
    }

    /// Moves the entry to the end of its siblings
    pub fn promote(&mut self, id: i64) -> Result<()> {
        self.update(id, EntryPatch::adjusted_top_time(Utc::now().timestamp_millis()))
    }

    pub fn update_highlight(&mut self, id: i64, level: i32) -> Result<()> {
        if !(0..=MAX_HIGHLIGHT).contains(&level) {
            return Err(StorageError::Invalid(format!(
                "highlight level {} out of range",
                level
            )));
        }
        self.update(id, EntryPatch::highlight_level(level))
    }

    /// Flips the local collapsed flag; returns the new state
    pub fn toggle_collapsed(&mut self, id: i64) -> Result<bool> {
        let view = self.get_mut(id)?;
        view.collapsed = !view.collapsed;
        Ok(view.collapsed)
    }

    /// Reloads the subtree of `id` with or without history children
    pub fn toggle_history(&mut self, id: i64) -> Result<bool> {
        let include = !self.get(id)?.include_history;
        let entries = self.entries.get_tree(id, include || self.include_history)?;
        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        let notes = self.notes.list_for_entries(&ids)?;

        let rebased = entries.into_iter().map(|mut e| {
            if e.id == id {
                e.parent_id = 0;
            }
            e
        });
        let mut loaded = tree::build_forest(rebased.collect(), notes);
        let Some(mut fresh) = loaded.pop() else {
            return Err(StorageError::not_found("entry", id));
        };

        let view = self.get_mut(id)?;
        tree::carry_view_state(&view.children, &mut fresh.children);
        view.children = fresh.children;
        view.notes = fresh.notes;
        view.include_history = include;
        Ok(include)
    }

    pub fn add_note(&mut self, entry_id: i64, text: &str) -> Result<i64> {
        self.get(entry_id)?;
        let mut note = Note::new(text);
        note.entry_id = entry_id;

        let id = self.notes.add(entry_id, note.clone())?;
        note.id = id;
        self.get_mut(entry_id)?.notes.push(NoteView::new(note));
        Ok(id)
    }

    pub fn update_note(&mut self, entry_id: i64, note_id: i64, text: &str) -> Result<()> {
        self.get(entry_id)?;
        let patch = NotePatch::text(text);
        self.notes.update(entry_id, note_id, &patch)?;

        let now = Utc::now();
        if let Some(note) = self
            .get_mut(entry_id)?
            .notes
            .iter_mut()
            .find(|n| n.data.id == note_id)
        {
            patch.apply(&mut note.data, now);
        }
        Ok(())
    }

    pub fn delete_note(&mut self, entry_id: i64, note_id: i64) -> Result<()> {
        self.get(entry_id)?;
        self.notes.delete(entry_id, note_id)?;
        self.get_mut(entry_id)?
            .notes
            .retain(|n| n.data.id != note_id);
        Ok(())
    }

    /// Loads `root_id` with all its descendants (history included) as one view
    pub fn get_tree(&self, root_id: i64) -> Result<EntryView> {
        let mut entries = self.entries.get_tree(root_id, true)?;
        for e in entries.iter_mut() {
            if e.id == root_id {
                e.parent_id = 0;
            }
        }
        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        let notes = self.notes.list_for_entries(&ids)?;
        tree::build_forest(entries, notes)
            .pop()
            .ok_or_else(|| StorageError::not_found("entry", root_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use chrono::Duration;
    use std::collections::HashMap;

    fn manager() -> LogManager {
        let services = Services::from_backend(Arc::new(SqliteStore::open_in_memory().unwrap()));
        let mut m = LogManager::new(&services);
        m.init(false).unwrap();
        m
    }

    fn texts(m: &LogManager) -> Vec<String> {
        tree::flatten_ids(m.entries())
            .into_iter()
            .map(|id| m.get(id).unwrap().data.text.clone())
            .collect()
    }

    /// An entry service whose writes always fail
    struct Offline;

    impl EntryService for Offline {
        fn list(&self, _: &EntryListOptions) -> Result<(Vec<Entry>, u64)> {
            let mut e = Entry::new("cached");
            e.id = 1;
            Ok((vec![e], 1))
        }
        fn add(&self, _: Entry) -> Result<i64> {
            Err(StorageError::Transport("offline".into()))
        }
        fn update(&self, _: i64, _: &EntryPatch) -> Result<()> {
            Err(StorageError::Transport("offline".into()))
        }
        fn delete(&self, _: i64) -> Result<()> {
            Err(StorageError::Transport("offline".into()))
        }
        fn move_entry(&self, _: i64, _: i64) -> Result<()> {
            Err(StorageError::Transport("offline".into()))
        }
        fn get_tree(&self, _: i64, _: bool) -> Result<Vec<Entry>> {
            Err(StorageError::Transport("offline".into()))
        }
    }

    impl NoteService for Offline {
        fn list(&self, _: i64, _: &crate::domain::NoteListOptions) -> Result<(Vec<Note>, u64)> {
            Ok((Vec::new(), 0))
        }
        fn list_for_entries(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<Note>>> {
            Ok(ids.iter().map(|id| (*id, Vec::new())).collect())
        }
        fn add(&self, _: i64, _: Note) -> Result<i64> {
            Err(StorageError::Transport("offline".into()))
        }
        fn update(&self, _: i64, _: i64, _: &NotePatch) -> Result<()> {
            Err(StorageError::Transport("offline".into()))
        }
        fn delete(&self, _: i64, _: i64) -> Result<()> {
            Err(StorageError::Transport("offline".into()))
        }
    }

    #[test]
    fn add_toggle_delete() {
        let mut m = manager();
        let id = m.add(Entry::new("buy milk")).unwrap();
        assert_eq!(texts(&m), vec!["buy milk"]);

        assert!(m.toggle(id).unwrap());
        let entry = &m.get(id).unwrap().data;
        assert!(entry.done);
        assert!(entry.done_time.is_some());

        m.delete(id).unwrap();
        assert!(m.entries().is_empty());
    }

    #[test]
    fn add_child_and_paste_move() {
        let mut m = manager();
        let project = m.add(Entry::new("project")).unwrap();
        let phase = m.add(Entry::new("phase-1")).unwrap();
        let task = m.add(Entry::child_of(phase, "task")).unwrap();

        m.move_entry(phase, project).unwrap();

        assert_eq!(m.get(phase).unwrap().data.parent_id, project);
        assert_eq!(m.get(task).unwrap().data.parent_id, phase);
        assert_eq!(texts(&m), vec!["project", "phase-1", "task"]);

        m.init(false).unwrap();
        assert_eq!(texts(&m), vec!["project", "phase-1", "task"]);
    }

    #[test]
    fn move_cycle_guard_leaves_state_untouched() {
        let mut m = manager();
        let p = m.add(Entry::new("p")).unwrap();
        let c = m.add(Entry::child_of(p, "c")).unwrap();
        let g = m.add(Entry::child_of(c, "g")).unwrap();

        let err = m.move_entry(p, g).unwrap_err();
        assert!(matches!(err, StorageError::Invalid(_)));
        assert!(matches!(m.move_entry(p, p).unwrap_err(), StorageError::Invalid(_)));
        assert_eq!(m.get(p).unwrap().data.parent_id, 0);
        assert!(!m.is_descendant(p, p));

        m.init(false).unwrap();
        assert_eq!(m.get(g).unwrap().data.parent_id, c);
    }

    #[test]
    fn add_under_unknown_parent_is_invalid() {
        let mut m = manager();
        assert!(matches!(
            m.add(Entry::child_of(77, "x")).unwrap_err(),
            StorageError::Invalid(_)
        ));
    }

    #[test]
    fn promote_moves_entry_last() {
        let mut m = manager();
        let a = m.add(Entry::new("a")).unwrap();
        m.add(Entry::new("b")).unwrap();
        m.promote(a).unwrap();
        assert_eq!(texts(&m), vec!["b", "a"]);
    }

    #[test]
    fn highlight_range_checked() {
        let mut m = manager();
        let a = m.add(Entry::new("a")).unwrap();
        m.update_highlight(a, 3).unwrap();
        assert_eq!(m.get(a).unwrap().data.highlight_level, 3);
        assert!(m.update_highlight(a, 6).is_err());
    }

    #[test]
    fn notes_follow_their_entry() {
        let mut m = manager();
        let a = m.add(Entry::new("a")).unwrap();
        let n = m.add_note(a, "first").unwrap();
        m.update_note(a, n, "edited").unwrap();
        assert_eq!(m.get(a).unwrap().notes[0].data.text, "edited");

        m.init(false).unwrap();
        assert_eq!(m.get(a).unwrap().notes.len(), 1);

        m.delete_note(a, n).unwrap();
        assert!(m.get(a).unwrap().notes.is_empty());
    }

    #[test]
    fn navigation_wraps_and_handles_single_entry() {
        let mut m = manager();
        assert_eq!(m.find_next_or_last(1), None);

        let only = m.add(Entry::new("only")).unwrap();
        assert_eq!(m.find_next_or_last(only), Some(only));
        assert_eq!(m.find_prev_or_first(only), Some(only));

        let second = m.add(Entry::new("second")).unwrap();
        assert_eq!(m.find_next_or_last(only), Some(second));
        assert_eq!(m.find_next_or_last(999), Some(second));
        assert_eq!(m.find_prev_or_first(999), Some(only));
    }

    #[test]
    fn reload_keeps_collapsed_and_detail_input() {
        let mut m = manager();
        let a = m.add(Entry::new("a")).unwrap();
        m.add(Entry::child_of(a, "child")).unwrap();
        m.toggle_collapsed(a).unwrap();

        m.init(false).unwrap();
        assert!(m.get(a).unwrap().collapsed);
    }

    #[test]
    fn toggle_history_loads_done_children() {
        let mut m = manager();
        let p = m.add(Entry::new("p")).unwrap();
        let mut old = Entry::child_of(p, "old");
        old.done = true;
        old.done_time = Some(Utc::now() - Duration::hours(30));
        m.add(old).unwrap();

        m.init(false).unwrap();
        assert!(m.get(p).unwrap().children.is_empty());

        assert!(m.toggle_history(p).unwrap());
        assert_eq!(m.get(p).unwrap().children.len(), 1);
        assert!(!m.toggle_history(p).unwrap());
        assert!(m.get(p).unwrap().children.is_empty());
    }

    #[test]
    fn get_tree_includes_history() {
        let mut m = manager();
        let p = m.add(Entry::new("p")).unwrap();
        let mut old = Entry::child_of(p, "old");
        old.done = true;
        old.done_time = Some(Utc::now() - Duration::days(3));
        m.add(old).unwrap();

        let view = m.get_tree(p).unwrap();
        assert_eq!(view.children.len(), 1);
    }

    #[test]
    fn failed_writes_leave_cache_untouched() {
        let backend = Arc::new(Offline);
        let services = Services {
            entries: backend.clone(),
            notes: backend.clone(),
            happenings: Arc::new(SqliteStore::open_in_memory().unwrap()),
            states: Arc::new(SqliteStore::open_in_memory().unwrap()),
        };
        let mut m = LogManager::new(&services);
        m.init(false).unwrap();

        assert!(m.add(Entry::new("new")).is_err());
        assert!(m.toggle(1).is_err());
        assert!(m.delete(1).is_err());
        assert!(m.add_note(1, "n").is_err());

        assert_eq!(texts(&m), vec!["cached"]);
        assert!(!m.get(1).unwrap().data.done);
        assert!(m.get(1).unwrap().notes.is_empty());
    }
}
