//! Action queue
//!
//! A single worker thread owns the [`LogManager`] and executes queued
//! actions in order. Each finished action posts an [`ActionDone`] carrying
//! a fresh forest snapshot back to the UI thread. Panics inside an action
//! are caught, logged with a backtrace and reported as internal errors.

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context as _, Result};

use super::event::Event;
use super::submit::InputSlot;
use crate::data::{HappeningManager, LogManager};
use crate::domain::{Entry, EntryPatch, EntryView, Happening};
use crate::storage::{self, GroupStore, StorageError};

/// Cancellation signal shared by the queue and its actions
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deferred operations executed by the worker
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Add(Entry),
    Update { id: i64, text: String },
    Delete(i64),
    Toggle(i64),
    Promote(i64),
    UpdateHighlight { id: i64, level: i32 },
    Move { id: i64, new_parent_id: i64 },
    ToggleCollapsed(i64),
    ToggleHistory(i64),
    AddNote { entry_id: i64, text: String },
    UpdateNote { entry_id: i64, note_id: i64, text: String },
    DeleteNote { entry_id: i64, note_id: i64 },
    Refresh { include_history: bool },
    AssignGroup { log_id: i64, group_id: i64 },
    LoadHappenings { invalidate: bool },
    AddHappening(String),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Add(_) => "add",
            Action::Update { .. } => "update",
            Action::Delete(_) => "delete",
            Action::Toggle(_) => "toggle",
            Action::Promote(_) => "promote",
            Action::UpdateHighlight { .. } => "update_highlight",
            Action::Move { .. } => "move",
            Action::ToggleCollapsed(_) => "toggle_collapsed",
            Action::ToggleHistory(_) => "toggle_history",
            Action::AddNote { .. } => "add_note",
            Action::UpdateNote { .. } => "update_note",
            Action::DeleteNote { .. } => "delete_note",
            Action::Refresh { .. } => "refresh",
            Action::AssignGroup { .. } => "assign_group",
            Action::LoadHappenings { .. } => "load_happenings",
            Action::AddHappening(_) => "add_happening",
        }
    }
}

/// Extra data an action hands back to the UI
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    #[default]
    None,
    Happenings(Vec<Happening>),
    Groups(HashMap<i64, i64>),
}

/// Everything an action may touch
pub struct Context {
    pub log: LogManager,
    pub happenings: HappeningManager,
    pub groups: Option<Arc<GroupStore>>,
    pub cancel: CancelToken,
}

impl Context {
    pub fn new(log: LogManager, happenings: HappeningManager, groups: Option<Arc<GroupStore>>) -> Self {
        Self {
            log,
            happenings,
            groups,
            cancel: CancelToken::default(),
        }
    }

    /// Runs one action to completion
    pub fn apply(&mut self, action: &Action) -> storage::Result<Payload> {
        if self.cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        match action {
            Action::Add(entry) => {
                self.log.add(entry.clone())?;
            }
            Action::Update { id, text } => self.log.update(*id, EntryPatch::text(text.as_str()))?,
            Action::Delete(id) => self.log.delete(*id)?,
            Action::Toggle(id) => {
                self.log.toggle(*id)?;
            }
            Action::Promote(id) => self.log.promote(*id)?,
            Action::UpdateHighlight { id, level } => self.log.update_highlight(*id, *level)?,
            Action::Move { id, new_parent_id } => self.log.move_entry(*id, *new_parent_id)?,
            Action::ToggleCollapsed(id) => {
                self.log.toggle_collapsed(*id)?;
            }
            Action::ToggleHistory(id) => {
                self.log.toggle_history(*id)?;
            }
            Action::AddNote { entry_id, text } => {
                self.log.add_note(*entry_id, text)?;
            }
            Action::UpdateNote {
                entry_id,
                note_id,
                text,
            } => self.log.update_note(*entry_id, *note_id, text)?,
            Action::DeleteNote { entry_id, note_id } => {
                self.log.delete_note(*entry_id, *note_id)?
            }
            Action::Refresh { include_history } => self.log.init(*include_history)?,
            Action::AssignGroup { log_id, group_id } => {
                let groups = self
                    .groups
                    .as_ref()
                    .ok_or_else(|| StorageError::Internal("group store unavailable".into()))?;
                groups.assign(*log_id, *group_id)?;
                return Ok(Payload::Groups(groups.mapping()?));
            }
            Action::LoadHappenings { invalidate } => {
                if *invalidate {
                    self.happenings.invalidate_cache()?;
                }
                return Ok(Payload::Happenings(self.happenings.load()?));
            }
            Action::AddHappening(content) => {
                self.happenings.add(content)?;
                return Ok(Payload::Happenings(self.happenings.load()?));
            }
        }
        Ok(Payload::None)
    }
}

/// Result of one action, posted to the UI thread
#[derive(Debug, Clone)]
pub struct ActionDone {
    pub action: Action,
    pub slot: Option<InputSlot>,
    pub result: storage::Result<Payload>,
    pub snapshot: Vec<EntryView>,
    pub include_history: bool,
    /// Actions still queued behind this one
    pub remaining: usize,
}

struct Job {
    action: Action,
    slot: Option<InputSlot>,
}

/// FIFO of actions drained by one worker thread
pub struct ActionQueue {
    tx: Option<mpsc::Sender<Job>>,
    pending: Arc<AtomicUsize>,
    cancel: CancelToken,
    worker: Option<JoinHandle<Context>>,
}

impl ActionQueue {
    /// Spawns the worker; results are posted to `events`
    pub fn start(ctx: Context, events: mpsc::Sender<Event>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let cancel = ctx.cancel.clone();

        let worker_pending = pending.clone();
        let worker = thread::Builder::new()
            .name("lifelog-actions".into())
            .spawn(move || {
                let mut ctx = ctx;
                for job in rx {
                    let done = run_job(&mut ctx, job, &worker_pending);
                    if events.send(Event::ActionDone(Box::new(done))).is_err() {
                        break;
                    }
                }
                ctx
            })
            .context("Failed to spawn action worker")?;

        Ok(Self {
            tx: Some(tx),
            pending,
            cancel,
            worker: Some(worker),
        })
    }

    pub fn enqueue(&self, action: Action, slot: Option<InputSlot>) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow!("action queue is closed"))?;
        tracing::debug!(action = action.name(), "enqueue");
        self.pending.fetch_add(1, Ordering::SeqCst);
        if tx.send(Job { action, slot }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow!("action worker stopped"));
        }
        Ok(())
    }

    /// Queued plus running actions
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Cancels outstanding work and waits for the worker
    pub fn shutdown(mut self) -> Option<Context> {
        self.cancel.cancel();
        self.tx = None;
        let worker = self.worker.take()?;
        match worker.join() {
            Ok(ctx) => Some(ctx),
            Err(_) => {
                tracing::error!("action worker panicked during shutdown");
                None
            }
        }
    }
}

fn run_job(ctx: &mut Context, job: Job, pending: &AtomicUsize) -> ActionDone {
    let Job { action, slot } = job;
    let result = match panic::catch_unwind(AssertUnwindSafe(|| ctx.apply(&action))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(
                action = action.name(),
                backtrace = %Backtrace::force_capture(),
                "action panicked: {}",
                message
            );
            Err(StorageError::Internal(format!("{} panicked: {}", action.name(), message)))
        }
    };

    match &result {
        Ok(_) => tracing::debug!(action = action.name(), "action done"),
        Err(err) => tracing::warn!(action = action.name(), kind = err.kind(), error = %err, "action failed"),
    }

    let remaining = pending.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
    ActionDone {
        action,
        slot,
        result,
        snapshot: ctx.log.entries().to_vec(),
        include_history: ctx.log.include_history(),
        remaining,
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Services, SqliteStore};
    use std::time::Duration;

    fn context() -> Context {
        let services = Services::from_backend(Arc::new(SqliteStore::open_in_memory().unwrap()));
        let mut log = LogManager::new(&services);
        log.init(false).unwrap();
        Context::new(log, HappeningManager::new(services.happenings.clone()), None)
    }

    fn next_done(rx: &mpsc::Receiver<Event>) -> ActionDone {
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::ActionDone(done) => *done,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn actions_run_in_order_with_snapshots() {
        let (tx, rx) = mpsc::channel();
        let queue = ActionQueue::start(context(), tx).unwrap();

        queue.enqueue(Action::Add(Entry::new("first")), Some(InputSlot::Global)).unwrap();
        queue.enqueue(Action::Add(Entry::new("second")), None).unwrap();

        let first = next_done(&rx);
        assert_eq!(first.slot, Some(InputSlot::Global));
        assert_eq!(first.snapshot.len(), 1);
        let second = next_done(&rx);
        assert_eq!(second.snapshot.len(), 2);
        assert_eq!(second.remaining, 0);

        let ctx = queue.shutdown().unwrap();
        assert_eq!(ctx.log.entries().len(), 2);
    }

    #[test]
    fn failures_are_reported() {
        let (tx, rx) = mpsc::channel();
        let queue = ActionQueue::start(context(), tx).unwrap();
        queue.enqueue(Action::Toggle(42), None).unwrap();

        let done = next_done(&rx);
        assert!(matches!(done.result, Err(StorageError::NotFound(_))));
        queue.shutdown();
    }

    #[test]
    fn cancelled_context_rejects_actions() {
        let mut ctx = context();
        ctx.cancel.cancel();
        assert_eq!(
            ctx.apply(&Action::Add(Entry::new("late"))),
            Err(StorageError::Cancelled)
        );
    }

    #[test]
    fn group_assignment_without_store_fails() {
        let mut ctx = context();
        let result = ctx.apply(&Action::AssignGroup { log_id: 1, group_id: 2 });
        assert!(matches!(result, Err(StorageError::Internal(_))));
    }

    #[test]
    fn panic_message_extracts_strings() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
