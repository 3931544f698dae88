//! # Storage Layer
//!
//! Service contracts and their interchangeable backends.
//!
//! ## Backends
//!
//! | Backend | Type | Location |
//! |---------|------|----------|
//! | `sqlite` | embedded relational file | `{config_dir}/lifelog.db` |
//! | `file` | single JSON document, batched saves | `{config_dir}/lifelog.json` |
//! | `server` | remote RPC (POST + JSON envelope) | `--server-addr` |
//!
//! ## Services
//!
//! - [`EntryService`] - entries and their forest
//! - [`NoteService`] - notes owned by entries
//! - [`HappeningService`] - free-text event log
//! - [`StateService`] - named scores receiving delta events
//!
//! Every backend maps its own failures into [`StorageError`].
//!
//! ## Concurrency Safety
//!
//! - Services are `Send + Sync`; the UI thread and background refreshes
//!   may call them concurrently
//! - The JSON backend marks itself dirty under its data lock and a ticker
//!   thread flushes it; [`Services::close`] performs the final flush
//! - All file writes are atomic (temp file + rename)

mod config;
mod file;
mod groups;
mod remote;
mod sqlite;

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result as AnyResult};
use fs2::FileExt;
use thiserror::Error;

use crate::domain::{
    Entry, EntryListOptions, EntryPatch, Happening, HappeningListOptions, HappeningPatch, Note,
    NoteListOptions, NotePatch, StateEvent, StateRecord,
};

pub use config::{Config, ConfigDir, StorageConfig, StorageKind, StorageOverrides};
pub use file::FileStore;
pub use groups::{group_forest, GroupStore, GROUP_NAMES, GROUP_OTHER_ID};
pub use remote::{RemoteClient, RemoteStore};
pub use sqlite::SqliteStore;

/// Error taxonomy shared by every backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("cancelled")]
    Cancelled,
}

impl StorageError {
    pub fn not_found(what: &str, id: i64) -> Self {
        StorageError::NotFound(format!("{} {}", what, id))
    }

    /// Short kind label, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::NotFound(_) => "not_found",
            StorageError::Conflict(_) => "conflict",
            StorageError::Invalid(_) => "invalid",
            StorageError::Transport(_) => "transport",
            StorageError::Internal(_) => "internal",
            StorageError::Cancelled => "cancelled",
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::QueryReturnedNoRows => StorageError::NotFound(err.to_string()),
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::Conflict(err.to_string())
            }
            _ => StorageError::Internal(err.to_string()),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Invalid(err.to_string())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StorageError::Transport(format!("request timed out: {}", err))
        } else if err.is_decode() {
            StorageError::Invalid(err.to_string())
        } else {
            StorageError::Transport(err.to_string())
        }
    }
}

/// Result type for service operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Entries and their forest
pub trait EntryService: Send + Sync {
    /// Lists entries matching `opts`, returning the page and the unpaged total
    fn list(&self, opts: &EntryListOptions) -> Result<(Vec<Entry>, u64)>;

    /// Persists a new entry and returns its id
    fn add(&self, entry: Entry) -> Result<i64>;

    fn update(&self, id: i64, patch: &EntryPatch) -> Result<()>;

    /// Deletes the entry and its notes
    fn delete(&self, id: i64) -> Result<()>;

    /// Re-parents `id`; rejects `id` itself or any of its descendants
    fn move_entry(&self, id: i64, new_parent_id: i64) -> Result<()>;

    /// Returns `root_id` plus all transitive descendants
    fn get_tree(&self, root_id: i64, include_history: bool) -> Result<Vec<Entry>>;

    /// Persists pending writes; called once on shutdown
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Notes owned by entries
pub trait NoteService: Send + Sync {
    fn list(&self, entry_id: i64, opts: &NoteListOptions) -> Result<(Vec<Note>, u64)>;

    /// Batch fetch; every requested id is present in the result
    fn list_for_entries(&self, entry_ids: &[i64]) -> Result<HashMap<i64, Vec<Note>>>;

    /// Fails when `entry_id` does not exist
    fn add(&self, entry_id: i64, note: Note) -> Result<i64>;

    fn update(&self, entry_id: i64, note_id: i64, patch: &NotePatch) -> Result<()>;

    fn delete(&self, entry_id: i64, note_id: i64) -> Result<()>;
}

/// Free-text event log
pub trait HappeningService: Send + Sync {
    fn list(&self, opts: &HappeningListOptions) -> Result<(Vec<Happening>, u64)>;

    fn add(&self, happening: Happening) -> Result<Happening>;

    fn update(&self, id: i64, patch: &HappeningPatch) -> Result<Happening>;

    fn delete(&self, id: i64) -> Result<()>;
}

/// Named scores receiving delta events
pub trait StateService: Send + Sync {
    fn get_state(&self, name: &str) -> Result<StateRecord>;

    /// Fails with `Conflict` when the name is taken
    fn create_state(&self, state: StateRecord) -> Result<StateRecord>;

    fn list_states(&self, scope: &str) -> Result<Vec<StateRecord>>;

    /// Adds `delta` to the named state's score and records the event
    fn record_event(&self, name: &str, delta: f64) -> Result<()>;

    fn events(&self, state_id: i64, limit: usize) -> Result<Vec<StateEvent>>;
}

/// The four services of one backend
#[derive(Clone)]
pub struct Services {
    pub entries: Arc<dyn EntryService>,
    pub notes: Arc<dyn NoteService>,
    pub happenings: Arc<dyn HappeningService>,
    pub states: Arc<dyn StateService>,
}

impl Services {
    /// Bundles a backend that implements every service
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: EntryService + NoteService + HappeningService + StateService + 'static,
    {
        Self {
            entries: backend.clone(),
            notes: backend.clone(),
            happenings: backend.clone(),
            states: backend,
        }
    }

    /// Opens the backend described by `config`
    pub fn open(config: &StorageConfig) -> AnyResult<Self> {
        tracing::debug!(storage = config.label(), "opening storage");
        match config {
            StorageConfig::Sqlite { path } => {
                let store = SqliteStore::open(path)
                    .with_context(|| format!("Failed to open database: {}", path.display()))?;
                Ok(Self::from_backend(Arc::new(store)))
            }
            StorageConfig::File {
                path,
                flush_interval,
                fsync,
            } => {
                let store = FileStore::open(path, *flush_interval, *fsync)
                    .with_context(|| format!("Failed to open record file: {}", path.display()))?;
                Ok(Self::from_backend(store))
            }
            StorageConfig::Server { addr, token } => {
                let client = RemoteClient::new(addr, token)
                    .with_context(|| format!("Failed to create client for {}", addr))?;
                Ok(Self::from_backend(Arc::new(RemoteStore::new(client))))
            }
        }
    }

    /// Flushes pending writes
    pub fn close(&self) -> Result<()> {
        self.entries.flush()
    }
}

/// Writes `bytes` to `path` through a locked temp file and a rename
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], fsync: bool) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = std::path::PathBuf::from(temp_name);

    {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        file.lock_exclusive()?;

        let mut writer = BufWriter::new(&file);
        writer.write_all(bytes)?;
        writer.flush()?;
        drop(writer);

        if fsync {
            file.sync_all()?;
        }
    }

    fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("data.json");

        write_atomic(&path, b"{}", true).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        assert!(!dir.path().join("nested").join("data.json.tmp").exists());
    }

    #[test]
    fn sqlite_no_rows_maps_to_not_found() {
        let err: StorageError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn io_error_maps_to_transport() {
        let err: StorageError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, StorageError::Transport(_)));
    }
}
