//! Embedded relational backend
//!
//! One SQLite file (`lifelog.db`) holds every service's tables. Notes
//! reference entries with `ON DELETE CASCADE`, so removing an entry
//! removes its notes inside the same statement.
//!
//! Timestamps are stored as `YYYY-MM-DD HH:MM:SS.sss` text in UTC, which
//! sorts lexically. Rows written by other tools in `YYYY-MM-DDTHH:MM:SSZ`
//! form are read as well.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{
    EntryService, HappeningService, NoteService, Result, StateService, StorageError,
};
use crate::domain::{
    history_cutoff, Entry, EntryListOptions, EntryPatch, Happening, HappeningListOptions,
    HappeningPatch, Note, NoteListOptions, NotePatch, NoteSortBy, SortBy, StateEvent,
    StateRecord,
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const ENTRY_COLUMNS: &str = "id, text, done, done_time, create_time, update_time, \
                             adjusted_top_time, highlight_level, parent_id";

const NOTE_COLUMNS: &str = "id, entry_id, text, create_time, update_time";

/// SQLite-backed implementation of every service
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Schema version - bump when the schema changes
    const SCHEMA_VERSION: i32 = 1;

    /// Opens (creating if needed) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Internal("database lock poisoned".into()))
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version == Self::SCHEMA_VERSION {
            return Ok(());
        }

        tracing::debug!(from = version, to = Self::SCHEMA_VERSION, "creating sqlite schema");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                done INTEGER NOT NULL DEFAULT 0,
                done_time TEXT,
                create_time TEXT NOT NULL,
                update_time TEXT NOT NULL,
                adjusted_top_time INTEGER NOT NULL DEFAULT 0,
                highlight_level INTEGER NOT NULL DEFAULT 0,
                parent_id INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
                text TEXT NOT NULL,
                create_time TEXT NOT NULL,
                update_time TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS happenings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                create_time TEXT NOT NULL,
                update_time TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS states (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                score REAL NOT NULL DEFAULT 0,
                scope TEXT NOT NULL DEFAULT '',
                create_time TEXT NOT NULL,
                update_time TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS state_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                state_id INTEGER NOT NULL REFERENCES states(id) ON DELETE CASCADE,
                delta_score REAL NOT NULL,
                scope TEXT NOT NULL DEFAULT '',
                create_time TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entries_parent ON entries(parent_id);
            CREATE INDEX IF NOT EXISTS idx_notes_entry ON notes(entry_id);
            CREATE INDEX IF NOT EXISTS idx_events_state ON state_events(state_id);
            ",
        )?;
        conn.execute(
            &format!("PRAGMA user_version = {}", Self::SCHEMA_VERSION),
            [],
        )?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn format_time(t: &DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parses both `YYYY-MM-DD HH:MM:SS[.fff]` and `YYYY-MM-DDTHH:MM:SS[.fff]Z`
pub(crate) fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {}", raw).into(),
        )
    })
}

fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(_) => time_at(row, idx).map(Some),
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: row.get(0)?,
        text: row.get(1)?,
        done: row.get(2)?,
        done_time: opt_time_at(row, 3)?,
        create_time: time_at(row, 4)?,
        update_time: time_at(row, 5)?,
        adjusted_top_time: row.get(6)?,
        highlight_level: row.get(7)?,
        parent_id: row.get(8)?,
    })
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        entry_id: row.get(1)?,
        text: row.get(2)?,
        create_time: time_at(row, 3)?,
        update_time: time_at(row, 4)?,
    })
}

fn happening_from_row(row: &Row<'_>) -> rusqlite::Result<Happening> {
    Ok(Happening {
        id: row.get(0)?,
        content: row.get(1)?,
        create_time: time_at(row, 2)?,
        update_time: time_at(row, 3)?,
    })
}

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<StateRecord> {
    Ok(StateRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        score: row.get(3)?,
        scope: row.get(4)?,
        create_time: time_at(row, 5)?,
        update_time: time_at(row, 6)?,
    })
}

fn entry_order_sql(sort_by: SortBy) -> &'static str {
    match sort_by {
        SortBy::Id => "id",
        SortBy::Text => "text",
        SortBy::Done => "done",
        SortBy::CreateTime => {
            "CASE WHEN adjusted_top_time != 0 THEN adjusted_top_time \
             ELSE CAST(ROUND((julianday(create_time) - 2440587.5) * 86400000) AS INTEGER) END"
        }
        SortBy::UpdateTime => "update_time",
    }
}

fn note_order_sql(sort_by: NoteSortBy) -> &'static str {
    match sort_by {
        NoteSortBy::Id => "id",
        NoteSortBy::Text => "text",
        NoteSortBy::CreateTime => "create_time",
        NoteSortBy::UpdateTime => "update_time",
    }
}

/// SQLite treats a negative LIMIT as unlimited
fn sql_limit(limit: usize) -> i64 {
    if limit == 0 {
        -1
    } else {
        limit as i64
    }
}

fn entry_exists(conn: &Connection, id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM entries WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn load_entry(conn: &Connection, id: i64) -> Result<Entry> {
    conn.query_row(
        &format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS),
        params![id],
        entry_from_row,
    )
    .optional()?
    .ok_or_else(|| StorageError::not_found("entry", id))
}

/// Ids of `root_id` and every transitive descendant
fn subtree_ids(conn: &Connection, root_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE tree(id) AS (
             SELECT id FROM entries WHERE id = ?1
             UNION ALL
             SELECT e.id FROM entries e JOIN tree t ON e.parent_id = t.id
         )
         SELECT id FROM tree",
    )?;
    let ids = stmt
        .query_map(params![root_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

fn check_parent(conn: &Connection, id: i64, new_parent_id: i64) -> Result<()> {
    if new_parent_id == 0 {
        return Ok(());
    }
    if new_parent_id == id {
        return Err(StorageError::Invalid(format!(
            "entry {} cannot be its own parent",
            id
        )));
    }
    if !entry_exists(conn, new_parent_id)? {
        return Err(StorageError::Invalid(format!(
            "parent entry {} does not exist",
            new_parent_id
        )));
    }
    if id != 0 && subtree_ids(conn, id)?.contains(&new_parent_id) {
        return Err(StorageError::Invalid(format!(
            "entry {} is a descendant of {}",
            new_parent_id, id
        )));
    }
    Ok(())
}

fn write_entry(conn: &Connection, entry: &Entry) -> Result<()> {
    conn.execute(
        "UPDATE entries SET text = ?2, done = ?3, done_time = ?4, create_time = ?5,
             update_time = ?6, adjusted_top_time = ?7, highlight_level = ?8, parent_id = ?9
         WHERE id = ?1",
        params![
            entry.id,
            entry.text,
            entry.done,
            entry.done_time.as_ref().map(format_time),
            format_time(&entry.create_time),
            format_time(&entry.update_time),
            entry.adjusted_top_time,
            entry.highlight_level,
            entry.parent_id,
        ],
    )?;
    Ok(())
}

// ============================================================================
// EntryService
// ============================================================================

impl EntryService for SqliteStore {
    fn list(&self, opts: &EntryListOptions) -> Result<(Vec<Entry>, u64)> {
        let conn = self.lock()?;

        let cutoff = format_time(&history_cutoff());
        let where_sql = "text LIKE '%' || ?1 || '%' AND (?3 OR NOT (done = 1 AND done_time IS NOT NULL AND done_time < ?2))";

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM entries WHERE {}", where_sql),
            params![opts.filter, cutoff, opts.include_history],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM entries WHERE {} ORDER BY {} {}, id {} LIMIT {} OFFSET {}",
            ENTRY_COLUMNS,
            where_sql,
            entry_order_sql(opts.sort_by),
            opts.sort_order.as_sql(),
            opts.sort_order.as_sql(),
            sql_limit(opts.limit),
            opts.offset,
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(
                params![opts.filter, cutoff, opts.include_history],
                entry_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((entries, total as u64))
    }

    fn add(&self, mut entry: Entry) -> Result<i64> {
        let conn = self.lock()?;
        check_parent(&conn, 0, entry.parent_id)?;
        entry.stamp_defaults(Utc::now());

        conn.execute(
            "INSERT INTO entries (text, done, done_time, create_time, update_time,
                 adjusted_top_time, highlight_level, parent_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.text,
                entry.done,
                entry.done_time.as_ref().map(format_time),
                format_time(&entry.create_time),
                format_time(&entry.update_time),
                entry.adjusted_top_time,
                entry.highlight_level,
                entry.parent_id,
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(id, parent_id = entry.parent_id, "sqlite: entry added");
        Ok(id)
    }

    fn update(&self, id: i64, patch: &EntryPatch) -> Result<()> {
        let conn = self.lock()?;
        let mut entry = load_entry(&conn, id)?;
        if let Some(parent_id) = patch.parent_id {
            if parent_id != entry.parent_id {
                check_parent(&conn, id, parent_id)?;
            }
        }
        patch.apply(&mut entry, Utc::now());
        write_entry(&conn, &entry)
    }

    fn delete(&self, id: i64) -> Result<()> {
        let mut conn = self.lock()?;
        let ids = subtree_ids(&conn, id)?;
        if ids.is_empty() {
            return Err(StorageError::not_found("entry", id));
        }

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM entries WHERE id = ?1")?;
            for entry_id in ids.iter().rev() {
                stmt.execute(params![entry_id])?;
            }
        }
        tx.commit()?;
        tracing::debug!(id, removed = ids.len(), "sqlite: entry deleted");
        Ok(())
    }

    fn move_entry(&self, id: i64, new_parent_id: i64) -> Result<()> {
        let conn = self.lock()?;
        let mut entry = load_entry(&conn, id)?;
        check_parent(&conn, id, new_parent_id)?;

        entry.parent_id = new_parent_id;
        entry.update_time = Utc::now().max(entry.update_time);
        write_entry(&conn, &entry)
    }

    fn get_tree(&self, root_id: i64, include_history: bool) -> Result<Vec<Entry>> {
        let conn = self.lock()?;
        if !entry_exists(&conn, root_id)? {
            return Err(StorageError::not_found("entry", root_id));
        }

        let sql = format!(
            "WITH RECURSIVE tree(id) AS (
                 SELECT id FROM entries WHERE id = ?1
                 UNION ALL
                 SELECT e.id FROM entries e JOIN tree t ON e.parent_id = t.id
             )
             SELECT {} FROM entries
             WHERE id IN (SELECT id FROM tree)
               AND (?3 OR NOT (done = 1 AND done_time IS NOT NULL AND done_time < ?2))
             ORDER BY id",
            ENTRY_COLUMNS
        );
        let cutoff = format_time(&history_cutoff());
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![root_id, cutoff, include_history], entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

// ============================================================================
// NoteService
// ============================================================================

impl NoteService for SqliteStore {
    fn list(&self, entry_id: i64, opts: &NoteListOptions) -> Result<(Vec<Note>, u64)> {
        let conn = self.lock()?;

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notes WHERE entry_id = ?1 AND text LIKE '%' || ?2 || '%'",
            params![entry_id, opts.filter],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM notes WHERE entry_id = ?1 AND text LIKE '%' || ?2 || '%'
             ORDER BY {} {}, id {} LIMIT {} OFFSET {}",
            NOTE_COLUMNS,
            note_order_sql(opts.sort_by),
            opts.sort_order.as_sql(),
            opts.sort_order.as_sql(),
            sql_limit(opts.limit),
            opts.offset,
        );
        let mut stmt = conn.prepare(&sql)?;
        let notes = stmt
            .query_map(params![entry_id, opts.filter], note_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((notes, total as u64))
    }

    fn list_for_entries(&self, entry_ids: &[i64]) -> Result<HashMap<i64, Vec<Note>>> {
        let mut result: HashMap<i64, Vec<Note>> =
            entry_ids.iter().map(|id| (*id, Vec::new())).collect();
        if entry_ids.is_empty() {
            return Ok(result);
        }

        let conn = self.lock()?;
        let placeholders = vec!["?"; entry_ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM notes WHERE entry_id IN ({}) ORDER BY id",
            NOTE_COLUMNS, placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let notes = stmt
            .query_map(params_from_iter(entry_ids.iter()), note_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for note in notes {
            result.entry(note.entry_id).or_default().push(note);
        }
        Ok(result)
    }

    fn add(&self, entry_id: i64, mut note: Note) -> Result<i64> {
        let conn = self.lock()?;
        if !entry_exists(&conn, entry_id)? {
            return Err(StorageError::not_found("entry", entry_id));
        }
        note.stamp_defaults(Utc::now());

        conn.execute(
            "INSERT INTO notes (entry_id, text, create_time, update_time) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry_id,
                note.text,
                format_time(&note.create_time),
                format_time(&note.update_time),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update(&self, entry_id: i64, note_id: i64, patch: &NotePatch) -> Result<()> {
        let conn = self.lock()?;
        let mut note = conn
            .query_row(
                &format!(
                    "SELECT {} FROM notes WHERE id = ?1 AND entry_id = ?2",
                    NOTE_COLUMNS
                ),
                params![note_id, entry_id],
                note_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::not_found("note", note_id))?;

        patch.apply(&mut note, Utc::now());
        conn.execute(
            "UPDATE notes SET text = ?2, update_time = ?3 WHERE id = ?1",
            params![note.id, note.text, format_time(&note.update_time)],
        )?;
        Ok(())
    }

    fn delete(&self, entry_id: i64, note_id: i64) -> Result<()> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM notes WHERE id = ?1 AND entry_id = ?2",
            params![note_id, entry_id],
        )?;
        if removed == 0 {
            return Err(StorageError::not_found("note", note_id));
        }
        Ok(())
    }
}

// ============================================================================
// HappeningService
// ============================================================================

fn load_happening(conn: &Connection, id: i64) -> Result<Happening> {
    conn.query_row(
        "SELECT id, content, create_time, update_time FROM happenings WHERE id = ?1",
        params![id],
        happening_from_row,
    )
    .optional()?
    .ok_or_else(|| StorageError::not_found("happening", id))
}

impl HappeningService for SqliteStore {
    /// Newest first
    fn list(&self, opts: &HappeningListOptions) -> Result<(Vec<Happening>, u64)> {
        let conn = self.lock()?;
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM happenings WHERE content LIKE '%' || ?1 || '%'",
            params![opts.filter],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT id, content, create_time, update_time FROM happenings
             WHERE content LIKE '%' || ?1 || '%'
             ORDER BY create_time DESC, id DESC LIMIT {} OFFSET {}",
            sql_limit(opts.limit),
            opts.offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let happenings = stmt
            .query_map(params![opts.filter], happening_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((happenings, total as u64))
    }

    fn add(&self, mut happening: Happening) -> Result<Happening> {
        let conn = self.lock()?;
        let now = Utc::now();
        if happening.create_time.timestamp() == 0 {
            happening.create_time = now;
        }
        happening.update_time = now.max(happening.create_time);

        conn.execute(
            "INSERT INTO happenings (content, create_time, update_time) VALUES (?1, ?2, ?3)",
            params![
                happening.content,
                format_time(&happening.create_time),
                format_time(&happening.update_time),
            ],
        )?;
        load_happening(&conn, conn.last_insert_rowid())
    }

    fn update(&self, id: i64, patch: &HappeningPatch) -> Result<Happening> {
        let conn = self.lock()?;
        let mut happening = load_happening(&conn, id)?;
        patch.apply(&mut happening, Utc::now());
        conn.execute(
            "UPDATE happenings SET content = ?2, create_time = ?3, update_time = ?4 WHERE id = ?1",
            params![
                id,
                happening.content,
                format_time(&happening.create_time),
                format_time(&happening.update_time),
            ],
        )?;
        load_happening(&conn, id)
    }

    fn delete(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        if conn.execute("DELETE FROM happenings WHERE id = ?1", params![id])? == 0 {
            return Err(StorageError::not_found("happening", id));
        }
        Ok(())
    }
}

// ============================================================================
// StateService
// ============================================================================

const STATE_COLUMNS: &str = "id, name, description, score, scope, create_time, update_time";

fn load_state(conn: &Connection, name: &str) -> Result<StateRecord> {
    conn.query_row(
        &format!("SELECT {} FROM states WHERE name = ?1", STATE_COLUMNS),
        params![name],
        state_from_row,
    )
    .optional()?
    .ok_or_else(|| StorageError::NotFound(format!("state {}", name)))
}

impl StateService for SqliteStore {
    fn get_state(&self, name: &str) -> Result<StateRecord> {
        let conn = self.lock()?;
        load_state(&conn, name)
    }

    fn create_state(&self, state: StateRecord) -> Result<StateRecord> {
        let conn = self.lock()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO states (name, description, score, scope, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                state.name,
                state.description,
                state.score,
                state.scope,
                format_time(&now),
            ],
        )
        .map_err(|err| match StorageError::from(err) {
            StorageError::Conflict(_) => {
                StorageError::Conflict(format!("state {} already exists", state.name))
            }
            other => other,
        })?;
        load_state(&conn, &state.name)
    }

    fn list_states(&self, scope: &str) -> Result<Vec<StateRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM states WHERE ?1 = '' OR scope = ?1 ORDER BY id",
            STATE_COLUMNS
        ))?;
        let states = stmt
            .query_map(params![scope], state_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(states)
    }

    fn record_event(&self, name: &str, delta: f64) -> Result<()> {
        let mut conn = self.lock()?;
        let state = load_state(&conn, name)?;
        let now = format_time(&Utc::now());

        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE states SET score = score + ?2, update_time = ?3 WHERE id = ?1",
            params![state.id, delta, now],
        )?;
        tx.execute(
            "INSERT INTO state_events (state_id, delta_score, scope, create_time)
             VALUES (?1, ?2, ?3, ?4)",
            params![state.id, delta, state.scope, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn events(&self, state_id: i64, limit: usize) -> Result<Vec<StateEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, state_id, delta_score, scope, create_time FROM state_events
             WHERE state_id = ?1 ORDER BY id DESC LIMIT {}",
            sql_limit(limit)
        ))?;
        let events = stmt
            .query_map(params![state_id], |row| {
                Ok(StateEvent {
                    id: row.get(0)?,
                    state_id: row.get(1)?,
                    delta_score: row.get(2)?,
                    scope: row.get(3)?,
                    create_time: time_at(row, 4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn add(store: &SqliteStore, text: &str, parent_id: i64) -> i64 {
        EntryService::add(store, Entry::child_of(parent_id, text)).unwrap()
    }

    fn texts(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(|e| e.text.as_str()).collect()
    }

    #[test]
    fn test_schema_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lifelog.db");
        SqliteStore::open(&path).unwrap();

        let conn = Connection::open(&path).unwrap();
        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SqliteStore::SCHEMA_VERSION);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lifelog.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            add(&store, "persisted", 0);
        }
        let store = SqliteStore::open(&path).unwrap();
        let (entries, total) = EntryService::list(&store, &EntryListOptions::all(true)).unwrap();
        assert_eq!(total, 1);
        assert_eq!(texts(&entries), vec!["persisted"]);
    }

    #[test]
    fn empty_store_lists_nothing() {
        let (entries, total) = EntryService::list(&store(), &EntryListOptions::default()).unwrap();
        assert!(entries.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn add_assigns_ids_and_timestamps() {
        let store = store();
        let a = add(&store, "a", 0);
        let b = add(&store, "b", 0);
        assert_ne!(a, b);

        let entry = load_entry(&store.lock().unwrap(), a).unwrap();
        assert!(entry.update_time >= entry.create_time);
    }

    #[test]
    fn add_under_missing_parent_is_invalid() {
        let err = EntryService::add(&store(), Entry::child_of(99, "x")).unwrap_err();
        assert!(matches!(err, StorageError::Invalid(_)));
    }

    #[test]
    fn update_overrides_only_patch_fields() {
        let store = store();
        let id = add(&store, "old", 0);
        EntryService::update(&store, id, &EntryPatch::highlight_level(3)).unwrap();
        EntryService::update(&store, id, &EntryPatch::text("new")).unwrap();

        let entry = load_entry(&store.lock().unwrap(), id).unwrap();
        assert_eq!(entry.text, "new");
        assert_eq!(entry.highlight_level, 3);
    }

    #[test]
    fn update_missing_is_not_found() {
        let err = EntryService::update(&store(), 5, &EntryPatch::text("x")).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn delete_cascades_to_notes_and_children() {
        let store = store();
        let parent = add(&store, "parent", 0);
        let child = add(&store, "child", parent);
        NoteService::add(&store, parent, Note::new("n1")).unwrap();
        NoteService::add(&store, child, Note::new("n2")).unwrap();

        EntryService::delete(&store, parent).unwrap();

        let (entries, _) = EntryService::list(&store, &EntryListOptions::all(true)).unwrap();
        assert!(entries.is_empty());
        let notes = store.list_for_entries(&[parent, child]).unwrap();
        assert!(notes.values().all(|n| n.is_empty()));
    }

    #[test]
    fn move_rejects_self_and_descendants() {
        let store = store();
        let p = add(&store, "p", 0);
        let c = add(&store, "c", p);
        let g = add(&store, "g", c);

        assert!(matches!(
            store.move_entry(p, g).unwrap_err(),
            StorageError::Invalid(_)
        ));
        assert!(matches!(
            store.move_entry(p, p).unwrap_err(),
            StorageError::Invalid(_)
        ));

        store.move_entry(g, 0).unwrap();
        let entry = load_entry(&store.lock().unwrap(), g).unwrap();
        assert_eq!(entry.parent_id, 0);
    }

    #[test]
    fn get_tree_returns_root_and_descendants() {
        let store = store();
        let p = add(&store, "p", 0);
        let c = add(&store, "c", p);
        add(&store, "g", c);
        add(&store, "other", 0);

        let tree = store.get_tree(p, true).unwrap();
        assert_eq!(texts(&tree), vec!["p", "c", "g"]);
    }

    #[test]
    fn history_is_excluded_unless_requested() {
        let store = store();
        let mut old = Entry::new("A");
        old.done = true;
        old.done_time = Some(Utc::now() - Duration::hours(25));
        EntryService::add(&store, old).unwrap();
        add(&store, "B", 0);

        let opts = EntryListOptions {
            sort_by: SortBy::Id,
            ..EntryListOptions::default()
        };
        let (current, _) = EntryService::list(&store, &opts).unwrap();
        assert_eq!(texts(&current), vec!["B"]);

        let (all, _) = EntryService::list(&store, &EntryListOptions::all(true)).unwrap();
        assert_eq!(texts(&all), vec!["A", "B"]);
    }

    #[test]
    fn create_time_sort_uses_adjusted_top_time() {
        let store = store();
        let a = add(&store, "a", 0);
        add(&store, "b", 0);
        let later = (Utc::now() + Duration::hours(1)).timestamp_millis();
        EntryService::update(&store, a, &EntryPatch::adjusted_top_time(later)).unwrap();

        let opts = EntryListOptions {
            sort_by: SortBy::CreateTime,
            include_history: true,
            ..EntryListOptions::default()
        };
        let (entries, _) = EntryService::list(&store, &opts).unwrap();
        assert_eq!(texts(&entries), vec!["b", "a"]);
    }

    #[test]
    fn filter_and_pagination() {
        let store = store();
        for text in ["milk", "Milkshake", "bread", "oat milk"] {
            add(&store, text, 0);
        }
        let opts = EntryListOptions {
            filter: "milk".into(),
            limit: 2,
            offset: 1,
            ..EntryListOptions::default()
        };
        let (entries, total) = EntryService::list(&store, &opts).unwrap();
        assert_eq!(total, 3);
        assert_eq!(texts(&entries), vec!["Milkshake", "oat milk"]);
    }

    #[test]
    fn note_add_requires_entry() {
        let err = NoteService::add(&store(), 7, Note::new("x")).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn note_update_checks_owner() {
        let store = store();
        let a = add(&store, "a", 0);
        let b = add(&store, "b", 0);
        let note = NoteService::add(&store, a, Note::new("n")).unwrap();

        assert!(NoteService::update(&store, b, note, &NotePatch::text("x")).is_err());
        NoteService::update(&store, a, note, &NotePatch::text("edited")).unwrap();

        let (notes, total) = NoteService::list(&store, a, &NoteListOptions::default()).unwrap();
        assert_eq!(total, 1);
        assert_eq!(notes[0].text, "edited");
    }

    #[test]
    fn list_for_entries_includes_every_id() {
        let store = store();
        let a = add(&store, "a", 0);
        NoteService::add(&store, a, Note::new("n")).unwrap();

        let map = store.list_for_entries(&[a, 42]).unwrap();
        assert_eq!(map[&a].len(), 1);
        assert!(map[&42].is_empty());
    }

    #[test]
    fn parses_both_timestamp_forms() {
        let a = parse_time("2024-03-01 10:20:30").unwrap();
        let b = parse_time("2024-03-01T10:20:30Z").unwrap();
        assert_eq!(a, b);
        assert!(parse_time("2024-03-01 10:20:30.125").is_some());
        assert!(parse_time("yesterday").is_none());
    }

    #[test]
    fn happenings_crud() {
        let store = store();
        let h = HappeningService::add(&store, Happening::new("ran 5k")).unwrap();
        assert!(h.id > 0);

        let updated =
            HappeningService::update(&store, h.id, &HappeningPatch::content("ran 10k")).unwrap();
        assert_eq!(updated.content, "ran 10k");

        let (list, total) = HappeningService::list(&store, &HappeningListOptions::default()).unwrap();
        assert_eq!(total, 1);
        assert_eq!(list[0].content, "ran 10k");

        HappeningService::delete(&store, h.id).unwrap();
        assert!(HappeningService::delete(&store, h.id).is_err());
    }

    #[test]
    fn states_record_events() {
        let store = store();
        let state = store.create_state(StateRecord::new("energy")).unwrap();
        assert!(matches!(
            store.create_state(StateRecord::new("energy")).unwrap_err(),
            StorageError::Conflict(_)
        ));

        store.record_event("energy", 2.5).unwrap();
        store.record_event("energy", -1.0).unwrap();

        assert_eq!(store.get_state("energy").unwrap().score, 1.5);
        let events = store.events(state.id, 0).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].delta_score, -1.0);
        assert!(store.record_event("missing", 1.0).is_err());
        assert_eq!(store.list_states("").unwrap().len(), 1);
    }
}
