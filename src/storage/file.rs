//! JSON-file backend
//!
//! The whole store is a single document in `lifelog.json`:
//!
//! ```json
//! {"entries": [...], "notes": [...], "next_id": 12, "happenings": [...], ...}
//! ```
//!
//! The document is loaded on open and kept in memory. Mutations mark it
//! dirty; a ticker thread writes it back (temp file + rename) on the next
//! tick. [`EntryService::flush`] performs the final write on shutdown.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{
    write_atomic, EntryService, HappeningService, NoteService, Result, StateService,
    StorageError,
};
use crate::domain::{
    history_cutoff, Entry, EntryListOptions, EntryPatch, Happening, HappeningListOptions,
    HappeningPatch, Note, NoteListOptions, NotePatch, StateEvent, StateRecord,
};

/// On-disk document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Document {
    entries: Vec<Entry>,
    notes: Vec<Note>,
    next_id: i64,
    happenings: Vec<Happening>,
    states: Vec<StateRecord>,
    state_events: Vec<StateEvent>,
}

impl Document {
    /// Hands out the next id; ids are unique across all record kinds
    fn allocate_id(&mut self) -> i64 {
        self.next_id = self.next_id.max(1);
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Raises `next_id` above every id already present
    fn normalize(&mut self) {
        let max_id = self
            .entries
            .iter()
            .map(|e| e.id)
            .chain(self.notes.iter().map(|n| n.id))
            .chain(self.happenings.iter().map(|h| h.id))
            .chain(self.states.iter().map(|s| s.id))
            .chain(self.state_events.iter().map(|e| e.id))
            .max()
            .unwrap_or(0);
        self.next_id = self.next_id.max(max_id + 1);
    }

    fn entry(&self, id: i64) -> Result<&Entry> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| StorageError::not_found("entry", id))
    }

    fn entry_mut(&mut self, id: i64) -> Result<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StorageError::not_found("entry", id))
    }

    fn has_entry(&self, id: i64) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// `root_id` followed by all its transitive descendants
    fn subtree_ids(&self, root_id: i64) -> Vec<i64> {
        let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
        for entry in &self.entries {
            children.entry(entry.parent_id).or_default().push(entry.id);
        }

        let mut out = Vec::new();
        if !self.has_entry(root_id) {
            return out;
        }
        let mut stack = vec![root_id];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(kids) = children.get(&id) {
                stack.extend(kids.iter().rev());
            }
        }
        out
    }

    fn check_parent(&self, id: i64, new_parent_id: i64) -> Result<()> {
        if new_parent_id == 0 {
            return Ok(());
        }
        if new_parent_id == id {
            return Err(StorageError::Invalid(format!(
                "entry {} cannot be its own parent",
                id
            )));
        }
        if !self.has_entry(new_parent_id) {
            return Err(StorageError::Invalid(format!(
                "parent entry {} does not exist",
                new_parent_id
            )));
        }
        if id != 0 && self.subtree_ids(id).contains(&new_parent_id) {
            return Err(StorageError::Invalid(format!(
                "entry {} is a descendant of {}",
                new_parent_id, id
            )));
        }
        Ok(())
    }
}

struct Inner {
    doc: Document,
    dirty: bool,
}

/// JSON-file implementation of every service
pub struct FileStore {
    path: PathBuf,
    fsync: bool,
    inner: Mutex<Inner>,
}

impl FileStore {
    /// Loads `path` (missing or empty means an empty store) and starts the flush ticker
    pub fn open(path: &Path, flush_interval: Duration, fsync: bool) -> Result<Arc<Self>> {
        let doc = Self::read_document(path)?;
        tracing::debug!(
            path = %path.display(),
            entries = doc.entries.len(),
            "file store loaded"
        );

        let store = Arc::new(Self {
            path: path.to_path_buf(),
            fsync,
            inner: Mutex::new(Inner { doc, dirty: false }),
        });
        spawn_ticker(Arc::downgrade(&store), flush_interval)?;
        Ok(store)
    }

    fn read_document(path: &Path) -> Result<Document> {
        if !path.exists() {
            return Ok(Document::default());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Document::default());
        }
        let mut doc: Document = serde_json::from_str(&content)?;
        doc.normalize();
        Ok(doc)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Internal("file store lock poisoned".into()))
    }

    /// Runs `f` against the document and marks it dirty if it succeeds
    fn mutate<T>(&self, f: impl FnOnce(&mut Document) -> Result<T>) -> Result<T> {
        let mut inner = self.lock()?;
        let value = f(&mut inner.doc)?;
        inner.dirty = true;
        Ok(value)
    }

    fn read<T>(&self, f: impl FnOnce(&Document) -> Result<T>) -> Result<T> {
        let inner = self.lock()?;
        f(&inner.doc)
    }

    /// Writes the document if it changed since the last write
    fn flush_if_dirty(&self) -> Result<bool> {
        let mut inner = self.lock()?;
        if !inner.dirty {
            return Ok(false);
        }
        let bytes = serde_json::to_vec_pretty(&inner.doc)?;
        write_atomic(&self.path, &bytes, self.fsync)?;
        inner.dirty = false;
        Ok(true)
    }

    #[cfg(test)]
    fn is_dirty(&self) -> bool {
        self.inner.lock().map(|i| i.dirty).unwrap_or(false)
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Err(err) = self.flush_if_dirty() {
            tracing::error!(path = %self.path.display(), error = %err, "final flush failed");
        }
    }
}

/// Flushes the store every `interval` until it is dropped
fn spawn_ticker(store: Weak<FileStore>, interval: Duration) -> Result<()> {
    thread::Builder::new()
        .name("lifelog-file-flush".into())
        .spawn(move || loop {
            thread::sleep(interval);
            let Some(store) = store.upgrade() else {
                break;
            };
            match store.flush_if_dirty() {
                Ok(true) => tracing::trace!("file store flushed"),
                Ok(false) => {}
                Err(err) => tracing::warn!(error = %err, "file store flush failed"),
            }
        })?;
    Ok(())
}

fn paginate<T>(items: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    let iter = items.into_iter().skip(offset);
    if limit == 0 {
        iter.collect()
    } else {
        iter.take(limit).collect()
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    needle.is_empty() || haystack.to_lowercase().contains(&needle.to_lowercase())
}

// ============================================================================
// EntryService
// ============================================================================

impl EntryService for FileStore {
    fn list(&self, opts: &EntryListOptions) -> Result<(Vec<Entry>, u64)> {
        let cutoff = history_cutoff();
        self.read(|doc| {
            let mut entries: Vec<Entry> = doc
                .entries
                .iter()
                .filter(|e| e.matches_filter(&opts.filter))
                .filter(|e| opts.include_history || !e.is_history(cutoff))
                .cloned()
                .collect();
            entries.sort_by(|a, b| opts.sort_order.apply(opts.sort_by.compare(a, b)));

            let total = entries.len() as u64;
            Ok((paginate(entries, opts.offset, opts.limit), total))
        })
    }

    fn add(&self, mut entry: Entry) -> Result<i64> {
        self.mutate(|doc| {
            doc.check_parent(0, entry.parent_id)?;
            entry.stamp_defaults(Utc::now());
            entry.id = doc.allocate_id();
            let id = entry.id;
            doc.entries.push(entry);
            Ok(id)
        })
    }

    fn update(&self, id: i64, patch: &EntryPatch) -> Result<()> {
        self.mutate(|doc| {
            let current_parent = doc.entry(id)?.parent_id;
            if let Some(parent_id) = patch.parent_id {
                if parent_id != current_parent {
                    doc.check_parent(id, parent_id)?;
                }
            }
            patch.apply(doc.entry_mut(id)?, Utc::now());
            Ok(())
        })
    }

    fn delete(&self, id: i64) -> Result<()> {
        self.mutate(|doc| {
            let ids: HashSet<i64> = doc.subtree_ids(id).into_iter().collect();
            if ids.is_empty() {
                return Err(StorageError::not_found("entry", id));
            }
            doc.entries.retain(|e| !ids.contains(&e.id));
            doc.notes.retain(|n| !ids.contains(&n.entry_id));
            Ok(())
        })
    }

    fn move_entry(&self, id: i64, new_parent_id: i64) -> Result<()> {
        self.mutate(|doc| {
            doc.entry(id)?;
            doc.check_parent(id, new_parent_id)?;
            let entry = doc.entry_mut(id)?;
            entry.parent_id = new_parent_id;
            entry.update_time = Utc::now().max(entry.update_time);
            Ok(())
        })
    }

    fn get_tree(&self, root_id: i64, include_history: bool) -> Result<Vec<Entry>> {
        let cutoff = history_cutoff();
        self.read(|doc| {
            let ids: HashSet<i64> = doc.subtree_ids(root_id).into_iter().collect();
            if ids.is_empty() {
                return Err(StorageError::not_found("entry", root_id));
            }
            let mut entries: Vec<Entry> = doc
                .entries
                .iter()
                .filter(|e| ids.contains(&e.id))
                .filter(|e| include_history || !e.is_history(cutoff))
                .cloned()
                .collect();
            entries.sort_by_key(|e| e.id);
            Ok(entries)
        })
    }

    fn flush(&self) -> Result<()> {
        self.flush_if_dirty().map(|_| ())
    }
}

// ============================================================================
// NoteService
// ============================================================================

impl NoteService for FileStore {
    fn list(&self, entry_id: i64, opts: &NoteListOptions) -> Result<(Vec<Note>, u64)> {
        self.read(|doc| {
            let mut notes: Vec<Note> = doc
                .notes
                .iter()
                .filter(|n| n.entry_id == entry_id && contains_ci(&n.text, &opts.filter))
                .cloned()
                .collect();
            notes.sort_by(|a, b| opts.sort_order.apply(opts.sort_by.compare(a, b)));
            let total = notes.len() as u64;
            Ok((paginate(notes, opts.offset, opts.limit), total))
        })
    }

    fn list_for_entries(&self, entry_ids: &[i64]) -> Result<HashMap<i64, Vec<Note>>> {
        self.read(|doc| {
            let mut result: HashMap<i64, Vec<Note>> =
                entry_ids.iter().map(|id| (*id, Vec::new())).collect();
            for note in &doc.notes {
                if let Some(notes) = result.get_mut(&note.entry_id) {
                    notes.push(note.clone());
                }
            }
            for notes in result.values_mut() {
                notes.sort_by_key(|n| n.id);
            }
            Ok(result)
        })
    }

    fn add(&self, entry_id: i64, mut note: Note) -> Result<i64> {
        self.mutate(|doc| {
            doc.entry(entry_id)?;
            note.stamp_defaults(Utc::now());
            note.id = doc.allocate_id();
            note.entry_id = entry_id;
            let id = note.id;
            doc.notes.push(note);
            Ok(id)
        })
    }

    fn update(&self, entry_id: i64, note_id: i64, patch: &NotePatch) -> Result<()> {
        self.mutate(|doc| {
            let note = doc
                .notes
                .iter_mut()
                .find(|n| n.id == note_id && n.entry_id == entry_id)
                .ok_or_else(|| StorageError::not_found("note", note_id))?;
            patch.apply(note, Utc::now());
            Ok(())
        })
    }

    fn delete(&self, entry_id: i64, note_id: i64) -> Result<()> {
        self.mutate(|doc| {
            let before = doc.notes.len();
            doc.notes
                .retain(|n| !(n.id == note_id && n.entry_id == entry_id));
            if doc.notes.len() == before {
                return Err(StorageError::not_found("note", note_id));
            }
            Ok(())
        })
    }
}

// ============================================================================
// HappeningService
// ============================================================================

impl HappeningService for FileStore {
    /// Newest first
    fn list(&self, opts: &HappeningListOptions) -> Result<(Vec<Happening>, u64)> {
        self.read(|doc| {
            let mut happenings: Vec<Happening> = doc
                .happenings
                .iter()
                .filter(|h| contains_ci(&h.content, &opts.filter))
                .cloned()
                .collect();
            happenings.sort_by(|a, b| {
                b.create_time
                    .cmp(&a.create_time)
                    .then_with(|| b.id.cmp(&a.id))
            });
            let total = happenings.len() as u64;
            Ok((paginate(happenings, opts.offset, opts.limit), total))
        })
    }

    fn add(&self, mut happening: Happening) -> Result<Happening> {
        self.mutate(|doc| {
            let now = Utc::now();
            if happening.create_time.timestamp() == 0 {
                happening.create_time = now;
            }
            happening.update_time = now.max(happening.create_time);
            happening.id = doc.allocate_id();
            doc.happenings.push(happening.clone());
            Ok(happening)
        })
    }

    fn update(&self, id: i64, patch: &HappeningPatch) -> Result<Happening> {
        self.mutate(|doc| {
            let happening = doc
                .happenings
                .iter_mut()
                .find(|h| h.id == id)
                .ok_or_else(|| StorageError::not_found("happening", id))?;
            patch.apply(happening, Utc::now());
            Ok(happening.clone())
        })
    }

    fn delete(&self, id: i64) -> Result<()> {
        self.mutate(|doc| {
            let before = doc.happenings.len();
            doc.happenings.retain(|h| h.id != id);
            if doc.happenings.len() == before {
                return Err(StorageError::not_found("happening", id));
            }
            Ok(())
        })
    }
}

// ============================================================================
// StateService
// ============================================================================

impl StateService for FileStore {
    fn get_state(&self, name: &str) -> Result<StateRecord> {
        self.read(|doc| {
            doc.states
                .iter()
                .find(|s| s.name == name)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(format!("state {}", name)))
        })
    }

    fn create_state(&self, mut state: StateRecord) -> Result<StateRecord> {
        self.mutate(|doc| {
            if doc.states.iter().any(|s| s.name == state.name) {
                return Err(StorageError::Conflict(format!(
                    "state {} already exists",
                    state.name
                )));
            }
            let now = Utc::now();
            state.id = doc.allocate_id();
            state.create_time = now;
            state.update_time = now;
            doc.states.push(state.clone());
            Ok(state)
        })
    }

    fn list_states(&self, scope: &str) -> Result<Vec<StateRecord>> {
        self.read(|doc| {
            Ok(doc
                .states
                .iter()
                .filter(|s| scope.is_empty() || s.scope == scope)
                .cloned()
                .collect())
        })
    }

    fn record_event(&self, name: &str, delta: f64) -> Result<()> {
        self.mutate(|doc| {
            let now = Utc::now();
            let id = doc.allocate_id();
            let state = doc
                .states
                .iter_mut()
                .find(|s| s.name == name)
                .ok_or_else(|| StorageError::NotFound(format!("state {}", name)))?;
            state.score += delta;
            state.update_time = now;
            let event = StateEvent {
                id,
                state_id: state.id,
                delta_score: delta,
                scope: state.scope.clone(),
                create_time: now,
            };
            doc.state_events.push(event);
            Ok(())
        })
    }

    fn events(&self, state_id: i64, limit: usize) -> Result<Vec<StateEvent>> {
        self.read(|doc| {
            let events: Vec<StateEvent> = doc
                .state_events
                .iter()
                .rev()
                .filter(|e| e.state_id == state_id)
                .cloned()
                .collect();
            Ok(paginate(events, 0, limit))
        })
    }
}
