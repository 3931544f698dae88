//! Remote RPC backend
//!
//! Every operation is a single `POST {server_addr}{path}` with a JSON body.
//! Responses are wrapped in an envelope:
//!
//! ```json
//! {"code": 0, "msg": "", "data": {...}}
//! ```
//!
//! A non-zero `code` becomes [`StorageError::Internal`] carrying `msg`.
//! The bearer token header is only sent when a token is configured.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::{header, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    EntryService, HappeningService, NoteService, Result, StateService, StorageError,
};
use crate::domain::{
    Entry, EntryListOptions, EntryPatch, Happening, HappeningListOptions, HappeningPatch, Note,
    NoteListOptions, NotePatch, StateEvent, StateRecord,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Response envelope shared by every endpoint
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

/// Blocking HTTP client for the lifelog server
#[derive(Debug, Clone)]
pub struct RemoteClient {
    base_url: String,
    client: Client,
}

impl RemoteClient {
    /// Builds a client; an empty `token` sends no `Authorization` header
    pub fn new(addr: &str, token: &str) -> Result<Self> {
        Self::with_timeout(addr, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(addr: &str, token: &str, timeout: Duration) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        if !token.is_empty() {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| StorageError::Invalid(format!("invalid server token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            base_url: addr.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Posts `body` to `path` and decodes the envelope's `data`
    pub fn call<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "rpc request");

        let response = self.client.post(&url).json(body).send()?;
        let data = self.handle_response(path, response)?;
        serde_json::from_value(data).map_err(|e| {
            StorageError::Invalid(format!("failed to decode {} response: {}", path, e))
        })
    }

    /// Like [`call`](Self::call) but ignores the payload
    pub fn call_unit<B>(&self, path: &str, body: &B) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "rpc request");

        let response = self.client.post(&url).json(body).send()?;
        self.handle_response(path, response).map(|_| ())
    }

    fn handle_response(&self, path: &str, response: Response) -> Result<Value> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(format!("endpoint {}", path)));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StorageError::Internal(format!(
                "{} returned HTTP {}: {}",
                path,
                status.as_u16(),
                body
            )));
        }

        let envelope: Envelope = response.json()?;
        if envelope.code != 0 {
            tracing::warn!(path, code = envelope.code, msg = %envelope.msg, "rpc error");
            return Err(StorageError::Internal(format!(
                "server error (code {}): {}",
                envelope.code, envelope.msg
            )));
        }
        Ok(envelope.data)
    }
}

/// Service implementations over [`RemoteClient`]
pub struct RemoteStore {
    client: RemoteClient,
}

impl RemoteStore {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct EntriesPage {
    #[serde(default)]
    entries: Vec<Entry>,
    #[serde(default)]
    total: u64,
}

#[derive(Deserialize)]
struct EntriesOnly {
    #[serde(default)]
    entries: Vec<Entry>,
}

#[derive(Deserialize)]
struct NotesPage {
    #[serde(default)]
    notes: Vec<Note>,
    #[serde(default)]
    total: u64,
}

#[derive(Deserialize)]
struct NotesMap {
    #[serde(default)]
    notes_map: HashMap<i64, Vec<Note>>,
}

#[derive(Deserialize)]
struct Created {
    id: i64,
}

#[derive(Deserialize)]
struct HappeningsPage {
    #[serde(default)]
    happenings: Vec<Happening>,
    #[serde(default)]
    total: u64,
}

#[derive(Deserialize)]
struct OneHappening {
    happening: Happening,
}

#[derive(Deserialize)]
struct OneState {
    state: StateRecord,
}

#[derive(Deserialize)]
struct States {
    #[serde(default)]
    states: Vec<StateRecord>,
}

#[derive(Deserialize)]
struct Events {
    #[serde(default)]
    events: Vec<StateEvent>,
}

impl EntryService for RemoteStore {
    fn list(&self, opts: &EntryListOptions) -> Result<(Vec<Entry>, u64)> {
        let page: EntriesPage = self.client.call("/entries/list", opts)?;
        Ok((page.entries, page.total))
    }

    fn add(&self, entry: Entry) -> Result<i64> {
        let created: Created = self.client.call("/entries/add", &entry)?;
        Ok(created.id)
    }

    fn update(&self, id: i64, patch: &EntryPatch) -> Result<()> {
        self.client
            .call_unit("/entries/update", &json!({ "id": id, "update": patch }))
    }

    fn delete(&self, id: i64) -> Result<()> {
        self.client.call_unit("/entries/delete", &json!({ "id": id }))
    }

    fn move_entry(&self, id: i64, new_parent_id: i64) -> Result<()> {
        self.client.call_unit(
            "/entries/move",
            &json!({ "id": id, "new_parent_id": new_parent_id }),
        )
    }

    fn get_tree(&self, root_id: i64, include_history: bool) -> Result<Vec<Entry>> {
        let tree: EntriesOnly = self.client.call(
            "/entries/getTree",
            &json!({ "id": root_id, "include_history": include_history }),
        )?;
        Ok(tree.entries)
    }
}

impl NoteService for RemoteStore {
    fn list(&self, entry_id: i64, opts: &NoteListOptions) -> Result<(Vec<Note>, u64)> {
        let page: NotesPage = self
            .client
            .call("/notes/list", &json!({ "entry_id": entry_id, "options": opts }))?;
        Ok((page.notes, page.total))
    }

    fn list_for_entries(&self, entry_ids: &[i64]) -> Result<HashMap<i64, Vec<Note>>> {
        let mut result: HashMap<i64, Vec<Note>> =
            entry_ids.iter().map(|id| (*id, Vec::new())).collect();
        if entry_ids.is_empty() {
            return Ok(result);
        }

        let map: NotesMap = self
            .client
            .call("/notes/listForEntries", &json!({ "entry_ids": entry_ids }))?;
        result.extend(map.notes_map);
        Ok(result)
    }

    fn add(&self, entry_id: i64, note: Note) -> Result<i64> {
        let created: Created = self
            .client
            .call("/notes/add", &json!({ "entry_id": entry_id, "note": note }))?;
        Ok(created.id)
    }

    fn update(&self, entry_id: i64, note_id: i64, patch: &NotePatch) -> Result<()> {
        self.client.call_unit(
            "/notes/update",
            &json!({ "entry_id": entry_id, "note_id": note_id, "update": patch }),
        )
    }

    fn delete(&self, entry_id: i64, note_id: i64) -> Result<()> {
        self.client.call_unit(
            "/notes/delete",
            &json!({ "entry_id": entry_id, "note_id": note_id }),
        )
    }
}

impl HappeningService for RemoteStore {
    fn list(&self, opts: &HappeningListOptions) -> Result<(Vec<Happening>, u64)> {
        let page: HappeningsPage = self.client.call(
            "/happening/list",
            &json!({ "search": opts.filter, "offset": opts.offset, "limit": opts.limit }),
        )?;
        Ok((page.happenings, page.total))
    }

    fn add(&self, happening: Happening) -> Result<Happening> {
        let one: OneHappening = self.client.call(
            "/happening/add",
            &json!({ "content": happening.content, "scope": "" }),
        )?;
        Ok(one.happening)
    }

    fn update(&self, id: i64, patch: &HappeningPatch) -> Result<Happening> {
        let one: OneHappening = self
            .client
            .call("/happening/update", &json!({ "id": id, "data": patch }))?;
        Ok(one.happening)
    }

    fn delete(&self, id: i64) -> Result<()> {
        self.client.call_unit("/happening/delete", &json!({ "id": id }))
    }
}

impl StateService for RemoteStore {
    fn get_state(&self, name: &str) -> Result<StateRecord> {
        let one: OneState = self.client.call("/state/get", &json!({ "name": name }))?;
        Ok(one.state)
    }

    fn create_state(&self, state: StateRecord) -> Result<StateRecord> {
        let one: OneState = self
            .client
            .call("/state/create", &json!({ "state": state }))?;
        Ok(one.state)
    }

    fn list_states(&self, scope: &str) -> Result<Vec<StateRecord>> {
        let states: States = self.client.call("/state/list", &json!({ "scope": scope }))?;
        Ok(states.states)
    }

    fn record_event(&self, name: &str, delta: f64) -> Result<()> {
        self.client.call_unit(
            "/state/recordEvent",
            &json!({ "name": name, "delta_score": delta }),
        )
    }

    fn events(&self, state_id: i64, limit: usize) -> Result<Vec<StateEvent>> {
        let events: Events = self.client.call(
            "/state/events",
            &json!({ "state_id": state_id, "limit": limit }),
        )?;
        Ok(events.events)
    }
}
