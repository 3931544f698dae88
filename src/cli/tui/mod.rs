//! Interactive terminal UI
//!
//! | Module | Role |
//! |--------|------|
//! | `state` | everything the UI shows and edits |
//! | `binding` | state → document projection and the key reducer |
//! | `dom` | document nodes, focus path, key dispatch |
//! | `queue` | serialized worker owning the log manager |
//! | `ui` | terminal setup and painting |

mod app;
mod binding;
mod dom;
mod event;
pub(crate) mod layout;
mod queue;
pub(crate) mod search;
mod state;
mod submit;
mod ui;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context as _, Result};

use super::Output;
use crate::data::{HappeningManager, LogManager};
use crate::domain::Happening;
use crate::storage::{ConfigDir, GroupStore, Services};
use app::App;
use event::{Event, EventHandler};
use queue::Context;
use state::{ConfigPage, State, ViewMode};

/// What the interactive UI starts with
pub struct Launch {
    pub dir: ConfigDir,
    pub services: Services,
    /// Storage label for the status bar
    pub storage: String,
    pub group_view: bool,
}

fn initial_state(launch: &Launch, log: &LogManager, groups: Option<&GroupStore>) -> Result<State> {
    let config = launch.dir.load_config()?;
    let mut state = State::new(launch.storage.clone());
    state.config_page = ConfigPage::from_config(&config);
    if launch.group_view {
        state.view_mode = ViewMode::Group;
    }
    if let Some(groups) = groups {
        state.group_mapping = groups.mapping()?;
    }
    state.set_entries(log.entries().to_vec());
    if !config.last_input.is_empty() {
        state.input.set(config.last_input);
        state.sync_search();
    }
    Ok(state)
}

/// Launch the TUI
pub fn run(output: &Output, launch: Launch) -> Result<()> {
    output.verbose_ctx("tui", "Initializing TUI application");

    let mut log = LogManager::new(&launch.services);
    log.init(false).context("Failed to load entries")?;

    let groups = match GroupStore::open(&launch.dir.group_file()) {
        Ok(store) => Some(Arc::new(store)),
        Err(err) => {
            tracing::warn!(error = %err, "group view disabled");
            None
        }
    };
    let state = initial_state(&launch, &log, groups.as_deref())?;

    let event_handler = EventHandler::new(250);
    let refresh_tx = Mutex::new(event_handler.sender());
    let happenings = HappeningManager::new(launch.services.happenings.clone()).with_notify(Arc::new(
        move |list: &[Happening]| {
            if let Ok(tx) = refresh_tx.lock() {
                // The loop may already be gone.
                let _ = tx.send(Event::Happenings(list.to_vec()));
            }
        },
    ));

    let ctx = Context::new(log, happenings, groups);
    let mut app = App::new(state, ctx, launch.dir.clone(), &event_handler)?;

    // Initialize terminal
    let mut terminal = ui::init_terminal()?;

    // Run the main loop with panic safety
    // This ensures terminal is restored even if the app panics
    let result = panic::catch_unwind(AssertUnwindSafe(|| app.run(&mut terminal, &event_handler)));

    // Always restore terminal, even on panic
    let restore_result = ui::restore_terminal();

    if app.shutdown().is_none() {
        tracing::warn!("action worker did not shut down cleanly");
    }
    if let Err(err) = launch.services.close() {
        tracing::error!(error = %err, "failed to flush storage");
        output.error(&format!("failed to flush storage: {}", err));
    }

    match result {
        Ok(inner_result) => {
            restore_result?;
            inner_result
        }
        Err(panic_payload) => {
            let _ = restore_result;
            let message = queue::panic_message(panic_payload.as_ref());
            tracing::error!("TUI panicked: {}", message);
            Err(anyhow!("TUI panicked: {}", message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Entry;
    use crate::storage::SqliteStore;
    use tempfile::TempDir;

    #[test]
    fn initial_state_restores_last_input_and_groups() {
        let temp = TempDir::new().unwrap();
        let dir = ConfigDir::new(temp.path());
        dir.update_config(|c| c.last_input = "?milk".into()).unwrap();

        let services = Services::from_backend(Arc::new(SqliteStore::open_in_memory().unwrap()));
        let id = services.entries.add(Entry::new("Buy milk")).unwrap();
        let groups = GroupStore::open(&dir.group_file()).unwrap();
        groups.assign(id, 2).unwrap();

        let mut log = LogManager::new(&services);
        log.init(false).unwrap();
        let launch = Launch {
            dir,
            services,
            storage: "sqlite".into(),
            group_view: true,
        };

        let state = initial_state(&launch, &log, Some(&groups)).unwrap();
        assert_eq!(state.input.value, "?milk");
        assert!(state.search_active);
        assert_eq!(state.view_mode, ViewMode::Group);
        assert_eq!(state.group_mapping.get(&id), Some(&2));
        assert_eq!(state.status.storage, "sqlite");
    }
}
