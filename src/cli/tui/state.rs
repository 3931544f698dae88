//! Application state owned by the UI thread

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::dom::ConfigField;
use super::layout::{self, Viewport};
use super::search;
use super::submit::SubmitState;
use crate::domain::{EntryIdentity, EntryView, Happening, InputState, ViewType};
use crate::storage::{group_forest, Config, StorageKind};

/// Window in which a second Ctrl-C quits
pub const CTRL_C_WINDOW: Duration = Duration::from_secs(1);

/// Window in which a second `g` jumps to the top
pub const GG_WINDOW: Duration = Duration::from_secs(5);

/// Visible page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Main,
    Detail(i64),
    Config,
    HappeningList,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    #[default]
    Default,
    Editing,
    ShowActions,
    DeleteConfirm,
    AddingChild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Default,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoteMode {
    #[default]
    Default,
    Editing,
    DeleteConfirm,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusBar {
    pub storage: String,
    pub error: Option<String>,
    pub info: Option<String>,
    pub requesting: bool,
}

/// Detail page sub-state; the add-note input lives on the entry view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailPage {
    pub selected_note: Option<i64>,
    pub mode: NoteMode,
    pub edit: InputState,
    pub button: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPage {
    pub storage: StorageKind,
    pub server_addr: InputState,
    pub server_token: InputState,
    pub field: ConfigField,
}

impl ConfigPage {
    pub fn from_config(config: &Config) -> Self {
        let mut page = Self {
            storage: config.storage_type.unwrap_or_default(),
            ..Self::default()
        };
        page.server_addr.set(config.server_addr.as_str());
        page.server_token.set(config.server_token.as_str());
        page
    }
}

/// Action menu entries, in display order
pub const MENU_ITEMS: [&str; 7] = [
    "Promote",
    "No Highlight",
    "Highlight-1",
    "Highlight-2",
    "Highlight-3",
    "Highlight-4",
    "Highlight-5",
];

pub struct State {
    /// Latest forest snapshot from the log manager
    pub entries: Vec<EntryView>,
    pub routes: Vec<Route>,

    pub selected: Option<EntryIdentity>,
    /// Restored when focus leaves the global input
    pub last_selected: Option<EntryIdentity>,
    pub mode: SelectionMode,

    pub input: InputState,
    pub edit_input: InputState,
    pub child_input: InputState,
    pub delete_button: usize,
    pub menu_index: usize,

    pub search_active: bool,
    pub search_query: String,
    pub zen: bool,
    pub show_history: bool,
    pub view_mode: ViewMode,
    pub cutting_id: i64,

    pub group_mapping: HashMap<i64, i64>,
    pub group_collapsed: HashMap<i64, bool>,

    pub status: StatusBar,
    pub submit: SubmitState,
    pub viewport: Viewport,

    pub last_ctrl_c: Option<Instant>,
    pub last_g: Option<Instant>,

    pub detail: DetailPage,
    pub config_page: ConfigPage,
    pub help_scroll: usize,
    pub happenings: Vec<Happening>,
    pub happening_input: InputState,
}

impl State {
    pub fn new(storage_label: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            routes: vec![Route::Main],
            selected: None,
            last_selected: None,
            mode: SelectionMode::Default,
            input: InputState::focused(),
            edit_input: InputState::default(),
            child_input: InputState::default(),
            delete_button: 0,
            menu_index: 0,
            search_active: false,
            search_query: String::new(),
            zen: false,
            show_history: false,
            view_mode: ViewMode::Default,
            cutting_id: 0,
            group_mapping: HashMap::new(),
            group_collapsed: HashMap::new(),
            status: StatusBar {
                storage: storage_label.into(),
                ..StatusBar::default()
            },
            submit: SubmitState::default(),
            viewport: Viewport::default(),
            last_ctrl_c: None,
            last_g: None,
            detail: DetailPage::default(),
            config_page: ConfigPage::default(),
            help_scroll: 0,
            happenings: Vec::new(),
            happening_input: InputState::focused(),
        }
    }

    // ==========================================================================
    // Routes
    // ==========================================================================

    pub fn route(&self) -> Route {
        self.routes.last().copied().unwrap_or(Route::Main)
    }

    pub fn push_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Pops the current page; the main page is never popped
    pub fn pop_route(&mut self) {
        if self.routes.len() > 1 {
            self.routes.pop();
        }
    }

    // ==========================================================================
    // Entries
    // ==========================================================================

    /// Adopts a snapshot, keeping detail-page input typed on the UI side
    pub fn set_entries(&mut self, mut snapshot: Vec<EntryView>) {
        fn collect(forest: &[EntryView], out: &mut HashMap<i64, InputState>) {
            for view in forest {
                if !view.detail.input.value.is_empty() {
                    out.insert(view.id(), view.detail.input.clone());
                }
                collect(&view.children, out);
            }
        }
        fn apply(forest: &mut [EntryView], inputs: &mut HashMap<i64, InputState>) {
            for view in forest.iter_mut() {
                if let Some(input) = inputs.remove(&view.id()) {
                    view.detail.input = input;
                }
                apply(&mut view.children, inputs);
            }
        }

        let mut inputs = HashMap::new();
        collect(&self.entries, &mut inputs);
        apply(&mut snapshot, &mut inputs);
        self.entries = snapshot;
        self.fix_selection();
    }

    pub fn entry(&self, id: i64) -> Option<&EntryView> {
        crate::domain::tree::find(&self.entries, id)
    }

    pub fn entry_mut(&mut self, id: i64) -> Option<&mut EntryView> {
        crate::domain::tree::find_mut(&mut self.entries, id)
    }

    /// The forest as shown: grouped, zen-filtered, then searched
    pub fn visible_entries(&self) -> Vec<EntryView> {
        let mut forest = match self.view_mode {
            ViewMode::Default => self.entries.clone(),
            ViewMode::Group => {
                group_forest(&self.entries, &self.group_mapping, &self.group_collapsed)
            }
        };
        if self.zen {
            forest = search::filter_entries(&forest, &search::is_zen);
        }
        if self.search_active && !self.search_query.trim().is_empty() {
            forest = search::filter_entries_query(&forest, &self.search_query);
        }
        layout::mark_collapsed(&mut forest);
        forest
    }

    /// Searching expands collapsed rows
    pub fn expand_all(&self) -> bool {
        self.search_active && !self.search_query.trim().is_empty()
    }

    /// Identities of the visible rows in display order
    pub fn visible_order(&self) -> Vec<EntryIdentity> {
        let forest = self.visible_entries();
        layout::flatten(&forest, self.expand_all())
            .iter()
            .map(|item| item.view.identity())
            .collect()
    }

    /// Id of the selected log row
    pub fn selected_log_id(&self) -> Option<i64> {
        self.selected
            .filter(|s| s.kind == ViewType::Log)
            .map(|s| s.id)
    }

    /// Moves focus to a row; `None` focuses the global input
    pub fn select(&mut self, identity: Option<EntryIdentity>) {
        self.selected = identity;
        self.input.focused = identity.is_none();
        self.mode = SelectionMode::Default;
        self.sync_viewport();
    }

    /// Focuses the global input, remembering the selected row
    pub fn focus_input(&mut self) {
        if self.selected.is_some() {
            self.last_selected = self.selected;
        }
        self.select(None);
    }

    /// Drops a selection that is no longer visible
    pub fn fix_selection(&mut self) {
        if let Some(selected) = self.selected {
            if !self.visible_order().contains(&selected) {
                self.selected = None;
                self.input.focused = true;
                self.mode = SelectionMode::Default;
            }
        }
        self.sync_viewport();
    }

    pub fn sync_viewport(&mut self) {
        let order = self.visible_order();
        let index = self
            .selected
            .and_then(|s| order.iter().position(|o| *o == s));
        self.viewport.follow(index, order.len());
    }

    // ==========================================================================
    // Search, flags and hints
    // ==========================================================================

    /// Derives search mode from the global input
    pub fn sync_search(&mut self) {
        match self.input.value.strip_prefix('?') {
            Some(query) => {
                self.search_active = true;
                self.search_query = query.to_string();
            }
            None => {
                self.search_active = false;
                self.search_query.clear();
            }
        }
        self.sync_viewport();
    }

    pub fn clear_search(&mut self) {
        if self.search_active {
            self.input.clear();
        }
        self.search_active = false;
        self.search_query.clear();
        self.sync_viewport();
    }

    pub fn ctrl_c_hint_visible(&self, now: Instant) -> bool {
        self.last_ctrl_c
            .is_some_and(|t| now.saturating_duration_since(t) < CTRL_C_WINDOW)
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.status.error = Some(message.into());
    }

    pub fn group_is_collapsed(&self, group_id: i64) -> bool {
        self.group_collapsed
            .get(&group_id)
            .copied()
            .unwrap_or(group_id == crate::storage::GROUP_OTHER_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{tree, Entry};

    fn state_with(texts: &[&str]) -> State {
        let entries = texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut e = Entry::new(*t);
                e.id = i as i64 + 1;
                e.create_time = chrono::DateTime::from_timestamp(i as i64, 0).unwrap_or_default();
                e
            })
            .collect();
        let mut state = State::new("sqlite");
        state.set_entries(tree::build_forest(entries, HashMap::new()));
        state
    }

    #[test]
    fn main_route_is_never_popped() {
        let mut state = State::new("file");
        state.push_route(Route::Help);
        state.pop_route();
        state.pop_route();
        assert_eq!(state.route(), Route::Main);
    }

    #[test]
    fn question_prefix_activates_search() {
        let mut state = state_with(&["Buy milk", "Call mom"]);
        state.input.set("?mi");
        state.sync_search();
        assert!(state.search_active);
        assert_eq!(state.search_query, "mi");
        assert_eq!(state.visible_order(), vec![EntryIdentity::log(1)]);

        state.input.set("mi");
        state.sync_search();
        assert!(!state.search_active);
    }

    #[test]
    fn detail_input_survives_snapshot() {
        let mut state = state_with(&["a"]);
        state.entry_mut(1).unwrap().detail.input.set("draft");
        let snapshot = tree::build_forest(
            vec![{
                let mut e = Entry::new("a");
                e.id = 1;
                e
            }],
            HashMap::new(),
        );
        state.set_entries(snapshot);
        assert_eq!(state.entry(1).unwrap().detail.input.value, "draft");
    }

    #[test]
    fn vanished_selection_returns_focus_to_input() {
        let mut state = state_with(&["a", "b"]);
        state.select(Some(EntryIdentity::log(2)));
        state.set_entries(Vec::new());
        assert_eq!(state.selected, None);
        assert!(state.input.focused);
    }

    #[test]
    fn group_view_lists_group_rows() {
        let mut state = state_with(&["a"]);
        state.view_mode = ViewMode::Group;
        let order = state.visible_order();
        assert_eq!(order.len(), 6);
        assert!(state.group_is_collapsed(crate::storage::GROUP_OTHER_ID));

        state.group_collapsed.insert(crate::storage::GROUP_OTHER_ID, false);
        assert_eq!(state.visible_order().len(), 7);
    }
}
