//! TUI application runtime
//!
//! Owns the [`State`], forwards terminal keys through the reducer and
//! carries out the resulting [`Effect`]s: queueing actions, timers,
//! config writes and exports.

use std::time::Instant;

use anyhow::Result;

use super::binding::{self, Effect};
use super::dom::Key;
use super::event::{Event, EventHandler};
use super::queue::{Action, ActionDone, ActionQueue, Context};
use super::state::{State, ViewMode};
use super::submit::InputSlot;
use super::ui::{self, Terminal};
use crate::cli::transfer;
use crate::storage::{ConfigDir, StorageError};

/// Rows taken by everything except the entry list
const CHROME_ROWS: u16 = 6;

/// Entry rows that fit a terminal of `height` rows
pub fn list_rows(height: u16) -> usize {
    height.saturating_sub(CHROME_ROWS).max(1) as usize
}

pub struct App {
    state: State,
    queue: Option<ActionQueue>,
    dir: ConfigDir,
    should_quit: bool,
}

impl App {
    /// Starts the action worker over `ctx`
    pub fn new(state: State, ctx: Context, dir: ConfigDir, events: &EventHandler) -> Result<Self> {
        let queue = ActionQueue::start(ctx, events.sender())?;
        Ok(Self {
            state,
            queue: Some(queue),
            dir,
            should_quit: false,
        })
    }

    /// Run the main application loop
    pub fn run(&mut self, terminal: &mut Terminal, events: &EventHandler) -> Result<()> {
        let size = terminal.size()?;
        self.state.viewport.max_entries = list_rows(size.height);
        self.state.sync_viewport();

        loop {
            let root = binding::render(&self.state, Instant::now());
            terminal.draw(|frame| ui::draw(frame, &root))?;

            match events.next()? {
                Event::Key(key) => {
                    if let Some(key) = Key::from_event(key) {
                        let effects = binding::handle_key(&mut self.state, key, Instant::now());
                        self.apply_effects(effects, events);
                    }
                }
                Event::Resize(_, height) => {
                    self.state.viewport.max_entries = list_rows(height);
                    self.state.sync_viewport();
                }
                Event::Tick | Event::Refresh => {}
                Event::ActionDone(done) => binding::apply_done(&mut self.state, *done),
                Event::Happenings(list) => self.state.happenings = list,
            }

            if self.should_quit {
                break;
            }
        }
        Ok(())
    }

    fn apply_effects(&mut self, effects: Vec<Effect>, events: &EventHandler) {
        for effect in effects {
            match effect {
                Effect::Enqueue { action, slot } => self.enqueue(action, slot),
                Effect::Quit => self.should_quit = true,
                Effect::ScheduleRefresh(delay) => events.schedule_refresh(delay),
                Effect::SaveConfig {
                    storage,
                    server_addr,
                    server_token,
                } => {
                    let result = self.dir.update_config(|c| {
                        c.storage_type = Some(storage);
                        c.server_addr = server_addr;
                        c.server_token = server_token;
                    });
                    match result {
                        Ok(_) => {
                            tracing::info!(storage = storage.as_str(), "config saved");
                            self.state.status.info =
                                Some("config saved; restart lifelog to apply".into());
                        }
                        Err(err) => self.state.set_error(format!("{:#}", err)),
                    }
                }
                Effect::Export(path) => {
                    let forest = match self.state.view_mode {
                        ViewMode::Default => self.state.visible_entries(),
                        ViewMode::Group => self.state.entries.clone(),
                    };
                    match transfer::write_export(&path, &forest) {
                        Ok(n) => {
                            self.state.status.error = None;
                            self.state.status.info =
                                Some(format!("Exported {} entries to {}", n, path.display()));
                        }
                        Err(err) => self.state.set_error(format!("{:#}", err)),
                    }
                }
            }
        }
    }

    fn enqueue(&mut self, action: Action, slot: Option<InputSlot>) {
        let result = match &self.queue {
            Some(queue) => queue.enqueue(action.clone(), slot),
            None => Err(anyhow::anyhow!("action queue is closed")),
        };
        if let Err(err) = result {
            // Fold the failure back in so the submitted text is restored.
            let done = ActionDone {
                action,
                slot,
                result: Err(StorageError::Internal(format!("{:#}", err))),
                snapshot: self.state.entries.clone(),
                include_history: self.state.show_history,
                remaining: 0,
            };
            binding::apply_done(&mut self.state, done);
        }
    }

    /// Stops the worker, saves `last_input` and hands the context back
    pub fn shutdown(mut self) -> Option<Context> {
        let last_input = self.state.input.value.clone();
        if let Err(err) = self.dir.update_config(|c| c.last_input = last_input) {
            tracing::warn!(error = %err, "failed to save last input");
        }
        self.queue.take().and_then(ActionQueue::shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_rows_leaves_room_for_chrome() {
        assert_eq!(list_rows(30), 24);
        assert_eq!(list_rows(3), 1);
    }
}
