//! State → document projection and the key reducer
//!
//! [`render`] is pure: it builds the page for the current route from a
//! state snapshot. [`handle_key`] renders, routes the key along the focus
//! path and lets each [`Target`] update the state. Anything that needs
//! I/O comes back as an [`Effect`] for the runtime to carry out.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};
use ratatui::style::{Color, Modifier, Style};

use super::dom::{dispatch, focus_path, ConfigField, DomEvent, Key, Node, Target};
use super::layout::{self, FlatItem};
use super::queue::{Action, ActionDone, Payload};
use super::state::{NoteMode, Route, SelectionMode, State, ViewMode, CTRL_C_WINDOW, GG_WINDOW, MENU_ITEMS};
use super::submit::{restore_into, InputSlot};
use crate::domain::{tree, Entry, EntryIdentity, EntryView, InputState, NoteView, ViewType};
use crate::storage::StorageKind;

/// Work the reducer hands to the runtime
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Enqueue {
        action: Action,
        slot: Option<InputSlot>,
    },
    Quit,
    /// Redraw after the delay (hint retraction)
    ScheduleRefresh(Duration),
    SaveConfig {
        storage: StorageKind,
        server_addr: String,
        server_token: String,
    },
    /// Write the visible forest to a file
    Export(PathBuf),
}

const HELP_LINES: &[&str] = &[
    "Main page",
    "  j / k, ↓ / ↑    move selection",
    "  gg / G          first / last entry",
    "  enter           open entry details",
    "  space           toggle done",
    "  e               edit text",
    "  a               add child",
    "  d               delete",
    "  →               actions (promote, highlight)",
    "  x / p           cut / paste under selection",
    "  ,               collapse / expand",
    "  v               show done children of the entry",
    "  z               zen mode",
    "  /               focus input",
    "  ?               search",
    "  esc             clear search, leave zen",
    "",
    "Input",
    "  text + enter    add entry",
    "  ?text           search",
    "  /history        toggle done history",
    "  /reload         reload entries",
    "  /refresh        reload entries and happenings",
    "  /zen            toggle zen mode",
    "  /switch         toggle group view",
    "  /happening, /h  happenings",
    "  /config         storage settings",
    "  /export FILE    export visible entries",
    "  /help           this page",
    "  exit, quit, q   quit",
    "",
    "Detail page",
    "  j / k           move between notes",
    "  e / d           edit / delete note",
    "  esc             back",
    "",
    "ctrl-c twice      quit",
];

fn dim() -> Style {
    Style::default().fg(Color::DarkGray)
}

fn selected_style() -> Style {
    Style::default().add_modifier(Modifier::REVERSED)
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

// ==========================================================================
// Projection
// ==========================================================================

/// Builds the document for the current route
pub fn render(state: &State, now: Instant) -> Node {
    let page = match state.route() {
        Route::Main => main_page(state),
        Route::Detail(id) => detail_page(state, id),
        Route::Config => config_page(state),
        Route::HappeningList => happening_page(state),
        Route::Help => help_page(state),
    };
    Node::div(vec![status_bar(state, now), page]).with_target(Target::App)
}

fn status_bar(state: &State, now: Instant) -> Node {
    let mut spans = vec![
        Node::styled("• ", Style::default().fg(Color::Green)),
        Node::text(state.status.storage.clone()),
    ];
    if state.status.requesting {
        spans.push(Node::styled("  Request...", Style::default().fg(Color::Yellow)));
    }
    if let Some(err) = &state.status.error {
        spans.push(Node::styled(
            format!("  {}", err),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }
    if let Some(info) = &state.status.info {
        spans.push(Node::styled(format!("  {}", info), Style::default().fg(Color::Green)));
    }

    let mut flags = Vec::new();
    if state.zen {
        flags.push("zen".to_string());
    }
    if state.show_history {
        flags.push("history".to_string());
    }
    if state.view_mode == ViewMode::Group {
        flags.push("group".to_string());
    }
    if state.cutting_id != 0 {
        flags.push(format!("cut #{}", state.cutting_id));
    }
    if !flags.is_empty() {
        spans.push(Node::styled(format!("  [{}]", flags.join(" ")), Style::default().fg(Color::Cyan)));
    }

    let hint = if state.ctrl_c_hint_visible(now) {
        "press Ctrl-C again to exit"
    } else {
        "type 'exit','quit' or 'q' to exit"
    };
    spans.push(Node::styled(format!("  {}", hint), dim()));
    Node::div(spans)
}

fn main_page(state: &State) -> Node {
    let forest = state.visible_entries();
    let items = layout::flatten(&forest, state.expand_all());
    let window = state.viewport.window(items.len());

    let mut children = Vec::new();
    if items.is_empty() {
        let hint = if state.search_active {
            "No matching entries"
        } else {
            "No entries yet. Type below and press enter to add one."
        };
        children.push(Node::div(vec![Node::styled(hint, dim())]));
    } else {
        if window.above > 0 {
            children.push(Node::div(vec![Node::styled(
                format!("↑ {} more above", window.above),
                dim(),
            )]));
        }
        let rows = items[window.start..window.end]
            .iter()
            .map(|item| entry_row(state, item))
            .collect();
        children.push(Node::ul(rows));
        if window.below > 0 {
            children.push(Node::div(vec![Node::styled(
                format!("↓ {} more below", window.below),
                dim(),
            )]));
        }
    }

    children.push(Node::br());
    children.push(Node::div(vec![
        Node::text("> "),
        Node::input(
            &state.input.value,
            state.input.cursor,
            state.input.focused,
            Target::GlobalInput,
        )
        .with_placeholder("type to add, ? to search, /help for commands"),
    ]));
    Node::div(children).with_target(Target::MainPage)
}

fn entry_label(state: &State, view: &EntryView, glyph: &str) -> Vec<Node> {
    let mut nodes = vec![Node::text(format!("{} ", glyph))];

    if view.kind == ViewType::Group {
        nodes.push(Node::styled(
            view.data.text.clone(),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ));
        if view.collapsed && view.collapsed_count > 0 {
            nodes.push(Node::styled(format!(" (+{})", view.collapsed_count), dim()));
        }
        return nodes;
    }

    let mut base = match view.data.highlight_level {
        1 => Style::default().fg(Color::Yellow),
        2 => Style::default().fg(Color::Green),
        3 => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        4 => Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
        5 => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        _ => Style::default(),
    };
    if view.data.done {
        base = base.add_modifier(Modifier::CROSSED_OUT | Modifier::DIM);
    }

    if view.match_texts.is_empty() {
        nodes.push(Node::styled(view.data.text.clone(), base));
    } else {
        for segment in &view.match_texts {
            let style = if segment.matched {
                base.fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
            } else {
                base
            };
            nodes.push(Node::styled(segment.text.clone(), style));
        }
    }

    if view.collapsed && view.collapsed_count > 0 {
        nodes.push(Node::styled(format!(" (+{})", view.collapsed_count), dim()));
    }
    if view.include_history {
        nodes.push(Node::styled(" (*)", dim()));
    }
    if !view.notes.is_empty() {
        nodes.push(Node::styled(format!(" [{}]", view.notes.len()), dim()));
    }
    if state.cutting_id == view.id() {
        nodes.push(Node::styled(" ✂", Style::default().fg(Color::Yellow)));
    }
    nodes
}

fn entry_row(state: &State, item: &FlatItem<'_>) -> Node {
    let view = item.view;
    let identity = view.identity();
    let selected = state.selected == Some(identity) && !state.input.focused;
    let glyph = match view.kind {
        ViewType::Group if view.collapsed => "▸",
        ViewType::Group => "▾",
        ViewType::Log => item.glyph(),
    };

    let editing = selected && state.mode == SelectionMode::Editing && view.kind == ViewType::Log;
    let content = if editing {
        vec![
            Node::text(format!("{} ", glyph)),
            Node::input(
                &state.edit_input.value,
                state.edit_input.cursor,
                true,
                Target::EditInput(view.id()),
            ),
        ]
    } else {
        entry_label(state, view, glyph)
    };

    let mut row = Node::li(content)
        .with_prefix(item.prefix())
        .with_target(Target::Entry(identity))
        .focusable(selected && state.mode == SelectionMode::Default);
    if selected && !editing {
        row.props.style = selected_style();
    }
    if !selected {
        return row;
    }

    let indent = format!("{}  ", " ".repeat(item.prefix().chars().count()));
    match state.mode {
        SelectionMode::AddingChild => row.children.push(
            Node::div(vec![
                Node::text("└─• "),
                Node::input(
                    &state.child_input.value,
                    state.child_input.cursor,
                    true,
                    Target::ChildInput(view.id()),
                )
                .with_placeholder("child entry"),
            ])
            .with_prefix(indent),
        ),
        SelectionMode::DeleteConfirm => {
            let (prompt, confirm) = if state.view_mode == ViewMode::Group {
                ("Remove from group?", "[Remove]")
            } else {
                ("Delete this entry?", "[Delete]")
            };
            row.children.push(
                confirm_dialog(prompt, confirm, state.delete_button, Target::DeleteConfirm(identity))
                    .with_prefix(indent),
            );
        }
        SelectionMode::ShowActions => {
            row.children.push(action_menu(state.menu_index, view.id()).with_prefix(indent));
        }
        SelectionMode::Default | SelectionMode::Editing => {}
    }
    row
}

fn confirm_dialog(prompt: &str, confirm: &str, button: usize, target: Target) -> Node {
    let button_style = |index: usize| {
        if button == index {
            selected_style()
        } else {
            Style::default()
        }
    };
    Node::div(vec![
        Node::styled(format!("{} ", prompt), Style::default().fg(Color::Red)),
        Node::styled(confirm, button_style(0)),
        Node::text(" "),
        Node::styled("[Cancel]", button_style(1)),
    ])
    .with_target(target)
    .focusable(true)
}

fn action_menu(index: usize, id: i64) -> Node {
    let mut lines = vec![Node::div(vec![Node::styled("Actions", dim())])];
    for (i, item) in MENU_ITEMS.iter().enumerate() {
        let node = if i == index {
            Node::styled(format!("> {}", item), selected_style())
        } else {
            Node::text(format!("  {}", item))
        };
        lines.push(Node::div(vec![node]));
    }
    Node::div(lines).with_target(Target::ActionMenu(id)).focusable(true)
}

fn detail_page(state: &State, id: i64) -> Node {
    let Some(view) = state.entry(id) else {
        return Node::div(vec![
            Node::h1("Entry not found"),
            Node::div(vec![Node::styled("esc to go back", dim())]),
        ])
        .with_target(Target::DetailPage(id))
        .focusable(true);
    };

    let data = &view.data;
    let mut meta = format!(
        "created {}  updated {}",
        format_time(&data.create_time),
        format_time(&data.update_time)
    );
    if let Some(done_time) = &data.done_time {
        meta.push_str(&format!("  done {}", format_time(done_time)));
    }
    if data.highlight_level > 0 {
        meta.push_str(&format!("  highlight {}", data.highlight_level));
    }

    let mut children = vec![
        Node::h1(format!("{} {}", if data.done { "✓" } else { "•" }, data.text)),
        Node::div(vec![Node::styled(meta, dim())]),
        Node::br(),
    ];

    if view.notes.is_empty() {
        children.push(Node::div(vec![Node::styled("No notes yet", dim())]));
    } else {
        let rows = view.notes.iter().map(|note| note_row(state, id, note)).collect();
        children.push(Node::ul(rows));
    }

    let input_focused = state.detail.selected_note.is_none() && state.detail.mode == NoteMode::Default;
    children.push(Node::br());
    children.push(Node::div(vec![
        Node::text("+ "),
        Node::input(
            &view.detail.input.value,
            view.detail.input.cursor,
            input_focused,
            Target::AddNoteInput(id),
        )
        .with_placeholder("add a note"),
    ]));
    children.push(Node::div(vec![Node::styled(
        "↑/↓ j/k move  e edit  d delete  esc back",
        dim(),
    )]));

    Node::div(children).with_target(Target::DetailPage(id))
}

fn note_row(state: &State, entry_id: i64, note: &NoteView) -> Node {
    let note_id = note.data.id;
    let selected = state.detail.selected_note == Some(note_id);
    let editing = selected && state.detail.mode == NoteMode::Editing;

    let content = if editing {
        vec![
            Node::text("- "),
            Node::input(
                &state.detail.edit.value,
                state.detail.edit.cursor,
                true,
                Target::NoteEditInput { entry_id, note_id },
            ),
        ]
    } else {
        vec![Node::text(format!("- {}", note.data.text))]
    };

    let mut row = Node::li(content)
        .with_target(Target::Note { entry_id, note_id })
        .focusable(selected && state.detail.mode == NoteMode::Default);
    if selected && !editing {
        row.props.style = selected_style();
    }
    if selected && state.detail.mode == NoteMode::DeleteConfirm {
        row.children.push(
            confirm_dialog(
                "Delete this note?",
                "[Delete]",
                state.detail.button,
                Target::NoteDeleteConfirm { entry_id, note_id },
            )
            .with_prefix("  "),
        );
    }
    row
}

fn config_page(state: &State) -> Node {
    let page = &state.config_page;
    let field_style = |field: ConfigField| {
        if page.field == field {
            selected_style()
        } else {
            Style::default()
        }
    };

    let kinds = [StorageKind::File, StorageKind::Sqlite, StorageKind::Server];
    let mut storage = vec![Node::text("Storage:        ")];
    for kind in kinds {
        let label = if kind == page.storage {
            format!("({}) ", kind.as_str())
        } else {
            format!(" {}  ", kind.as_str())
        };
        let style = if kind == page.storage {
            field_style(ConfigField::Storage)
        } else {
            Style::default()
        };
        storage.push(Node::styled(label, style));
    }

    let masked: String = "*".repeat(page.server_token.value.chars().count());
    let rows = vec![
        Node::li(storage)
            .with_target(Target::ConfigField(ConfigField::Storage))
            .focusable(page.field == ConfigField::Storage),
        Node::li(vec![
            Node::text("Server address: "),
            Node::input(
                &page.server_addr.value,
                page.server_addr.cursor,
                page.field == ConfigField::ServerAddr,
                Target::ConfigField(ConfigField::ServerAddr),
            )
            .with_placeholder("http://host:port"),
        ]),
        Node::li(vec![
            Node::text("Server token:   "),
            Node::input(
                &masked,
                page.server_token.cursor,
                page.field == ConfigField::ServerToken,
                Target::ConfigField(ConfigField::ServerToken),
            ),
        ]),
        Node::li(vec![Node::styled("[Save]", field_style(ConfigField::Save))])
            .with_target(Target::ConfigField(ConfigField::Save))
            .focusable(page.field == ConfigField::Save),
    ];

    Node::div(vec![
        Node::h1("Config"),
        Node::ul(rows),
        Node::br(),
        Node::div(vec![Node::styled(
            "↑/↓ move  ←/→ storage  enter save  esc back  (applies on next launch)",
            dim(),
        )]),
    ])
    .with_target(Target::ConfigPage)
}

fn help_page(state: &State) -> Node {
    let lines = HELP_LINES
        .iter()
        .skip(state.help_scroll)
        .map(|line| Node::div(vec![Node::text(*line)]))
        .collect::<Vec<_>>();
    let mut children = vec![Node::h1("Help")];
    children.extend(lines);
    Node::div(children)
        .with_target(Target::HelpPage)
        .focusable(true)
}

fn happening_page(state: &State) -> Node {
    let mut children = vec![Node::h1("Happenings")];
    if state.happenings.is_empty() {
        children.push(Node::div(vec![Node::styled("Nothing happened yet", dim())]));
    } else {
        let rows = state
            .happenings
            .iter()
            .map(|h| {
                Node::li(vec![
                    Node::styled(
                        format!("{}  ", h.create_time.with_timezone(&Local).format("%m-%d %H:%M")),
                        dim(),
                    ),
                    Node::text(h.content.clone()),
                ])
            })
            .collect();
        children.push(Node::ul(rows));
    }
    children.push(Node::br());
    children.push(Node::div(vec![
        Node::text("> "),
        Node::input(
            &state.happening_input.value,
            state.happening_input.cursor,
            true,
            Target::HappeningInput,
        )
        .with_placeholder("what happened?"),
    ]));
    Node::div(children).with_target(Target::HappeningPage)
}

// ==========================================================================
// Reducer
// ==========================================================================

/// Routes `key` to the focused node and its ancestors
pub fn handle_key(state: &mut State, key: Key, now: Instant) -> Vec<Effect> {
    let path = focus_path(&render(state, now));
    let mut effects = Vec::new();
    let mut event = DomEvent::new(key);
    dispatch(&path, &mut event, |target, ev| {
        on_target(state, target, ev, now, &mut effects)
    });
    state.sync_viewport();
    effects
}

fn enqueue(state: &mut State, effects: &mut Vec<Effect>, action: Action, slot: Option<InputSlot>) {
    state.status.requesting = true;
    effects.push(Effect::Enqueue { action, slot });
}

/// Starts a guarded submission; false if another one is in flight
fn begin_submit(state: &mut State, slot: InputSlot, text: &str) -> bool {
    match state.submit.begin(slot, text) {
        Ok(()) => true,
        Err(message) => {
            state.set_error(message);
            false
        }
    }
}

/// Shared line-editing keys; returns true if the key was used
fn edit_text(input: &mut InputState, key: Key) -> bool {
    match key {
        Key::Char(c) => input.insert(c),
        Key::Backspace => {
            input.backspace();
        }
        Key::Delete => {
            input.delete();
        }
        Key::Left => input.move_left(),
        Key::Right => input.move_right(),
        Key::Home | Key::Ctrl('a') => input.home(),
        Key::End | Key::Ctrl('e') => input.end(),
        Key::Ctrl('u') => input.clear(),
        _ => return false,
    }
    true
}

fn on_target(state: &mut State, target: Target, ev: &mut DomEvent, now: Instant, effects: &mut Vec<Effect>) {
    match target {
        Target::App => on_app(state, ev, now, effects),
        Target::MainPage => {}
        Target::GlobalInput => on_global_input(state, ev, effects),
        Target::Entry(identity) => on_entry(state, identity, ev, now, effects),
        Target::EditInput(id) => on_edit_input(state, id, ev, effects),
        Target::ChildInput(parent_id) => on_child_input(state, parent_id, ev, effects),
        Target::DeleteConfirm(identity) => on_delete_confirm(state, identity, ev, effects),
        Target::ActionMenu(id) => on_action_menu(state, id, ev, effects),
        Target::DetailPage(_) => {
            if !ev.default_prevented() && ev.key == Key::Esc {
                state.pop_route();
                ev.consume();
            }
        }
        Target::Note { entry_id, note_id } => on_note(state, entry_id, note_id, ev),
        Target::NoteEditInput { entry_id, note_id } => {
            on_note_edit(state, entry_id, note_id, ev, effects)
        }
        Target::NoteDeleteConfirm { entry_id, note_id } => {
            on_note_delete(state, entry_id, note_id, ev, effects)
        }
        Target::AddNoteInput(entry_id) => on_add_note(state, entry_id, ev, effects),
        Target::ConfigPage => on_config_page(state, ev),
        Target::ConfigField(field) => on_config_field(state, field, ev, effects),
        Target::HelpPage => on_help(state, ev),
        Target::HappeningPage => {
            if !ev.default_prevented() && ev.key == Key::Esc {
                state.pop_route();
                ev.consume();
            }
        }
        Target::HappeningInput => on_happening_input(state, ev, effects),
    }
}

fn on_app(state: &mut State, ev: &mut DomEvent, now: Instant, effects: &mut Vec<Effect>) {
    if ev.key != Key::Ctrl('c') {
        return;
    }
    ev.consume();
    if state.ctrl_c_hint_visible(now) {
        effects.push(Effect::Quit);
    } else {
        state.last_ctrl_c = Some(now);
        effects.push(Effect::ScheduleRefresh(CTRL_C_WINDOW));
    }
}

fn on_global_input(state: &mut State, ev: &mut DomEvent, effects: &mut Vec<Effect>) {
    match ev.key {
        Key::Ctrl('c') => return,
        Key::Enter => submit_global(state, effects),
        Key::Esc => {
            if state.search_active {
                state.clear_search();
            } else if state.zen {
                state.zen = false;
                state.fix_selection();
            } else {
                state.input.clear();
            }
        }
        Key::Down | Key::Tab => {
            let order = state.visible_order();
            let target = state
                .last_selected
                .filter(|s| order.contains(s))
                .or_else(|| order.first().copied());
            if target.is_some() {
                state.select(target);
            }
        }
        Key::Up => {
            if let Some(last) = state.visible_order().last().copied() {
                state.select(Some(last));
            }
        }
        key => {
            if !edit_text(&mut state.input, key) {
                return;
            }
            state.sync_search();
        }
    }
    ev.consume();
}

fn submit_global(state: &mut State, effects: &mut Vec<Effect>) {
    let raw = state.input.value.trim().to_string();

    if state.search_active {
        let forest = state.visible_entries();
        let items = layout::flatten(&forest, true);
        let found = items
            .iter()
            .find(|item| item.view.is_search_match())
            .or_else(|| items.first())
            .map(|item| item.view.identity());
        state.clear_search();
        if found.is_some() {
            state.select(found);
        }
        return;
    }

    if raw.is_empty() {
        return;
    }
    if matches!(raw.as_str(), "exit" | "quit" | "q") {
        state.input.clear();
        effects.push(Effect::Quit);
        return;
    }
    if raw.starts_with('/') {
        state.input.clear();
        slash_command(state, &raw, effects);
        return;
    }

    if !begin_submit(state, InputSlot::Global, &raw) {
        return;
    }
    state.input.clear();
    enqueue(state, effects, Action::Add(Entry::new(raw)), Some(InputSlot::Global));
}

fn slash_command(state: &mut State, raw: &str, effects: &mut Vec<Effect>) {
    let (command, arg) = match raw.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (raw, ""),
    };
    match command {
        "/history" => {
            state.show_history = !state.show_history;
            let include_history = state.show_history;
            enqueue(state, effects, Action::Refresh { include_history }, None);
        }
        "/reload" => {
            let include_history = state.show_history;
            enqueue(state, effects, Action::Refresh { include_history }, None);
        }
        "/refresh" => {
            let include_history = state.show_history;
            enqueue(state, effects, Action::Refresh { include_history }, None);
            enqueue(state, effects, Action::LoadHappenings { invalidate: true }, None);
        }
        "/zen" => {
            state.zen = !state.zen;
            state.fix_selection();
        }
        "/config" => state.push_route(Route::Config),
        "/help" => {
            state.help_scroll = 0;
            state.push_route(Route::Help);
        }
        "/happening" | "/h" => {
            state.push_route(Route::HappeningList);
            enqueue(state, effects, Action::LoadHappenings { invalidate: false }, None);
        }
        "/switch" => {
            state.view_mode = match state.view_mode {
                ViewMode::Default => ViewMode::Group,
                ViewMode::Group => ViewMode::Default,
            };
            state.fix_selection();
        }
        "/export" => {
            if arg.is_empty() {
                state.set_error("usage: /export <file>");
            } else {
                effects.push(Effect::Export(PathBuf::from(arg)));
            }
        }
        _ => state.set_error(format!("unknown command: {}", command)),
    }
}

fn on_entry(
    state: &mut State,
    identity: EntryIdentity,
    ev: &mut DomEvent,
    now: Instant,
    effects: &mut Vec<Effect>,
) {
    if ev.default_prevented() {
        return;
    }
    let is_log = identity.kind == ViewType::Log;
    let id = identity.id;

    match ev.key {
        Key::Char('j') | Key::Down => {
            let next = tree::next_or_last(&state.visible_order(), identity);
            state.select(next.or(Some(identity)));
        }
        Key::Char('k') | Key::Up => {
            let prev = tree::prev_or_first(&state.visible_order(), identity);
            state.select(prev.or(Some(identity)));
        }
        Key::Char('g') => {
            if state.last_g.is_some_and(|t| now.saturating_duration_since(t) < GG_WINDOW) {
                state.last_g = None;
                if let Some(first) = state.visible_order().first().copied() {
                    state.select(Some(first));
                }
            } else {
                state.last_g = Some(now);
            }
        }
        Key::Char('G') => {
            if let Some(last) = state.visible_order().last().copied() {
                state.select(Some(last));
            }
        }
        Key::Char('e') if is_log => {
            let text = state.entry(id).map(|v| v.data.text.clone()).unwrap_or_default();
            state.edit_input.set(text);
            state.mode = SelectionMode::Editing;
        }
        Key::Char('d') if is_log => {
            state.delete_button = 0;
            state.mode = SelectionMode::DeleteConfirm;
        }
        Key::Char('a') if is_log => {
            state.child_input.clear();
            state.mode = SelectionMode::AddingChild;
        }
        Key::Char(' ') if is_log => enqueue(state, effects, Action::Toggle(id), None),
        Key::Right if is_log => {
            state.menu_index = 0;
            state.mode = SelectionMode::ShowActions;
        }
        Key::Enter => {
            if is_log {
                state.detail = Default::default();
                state.push_route(Route::Detail(id));
            } else {
                let collapsed = state.group_is_collapsed(id);
                state.group_collapsed.insert(id, !collapsed);
            }
        }
        Key::Char('x') if is_log => {
            state.cutting_id = if state.cutting_id == id { 0 } else { id };
        }
        Key::Char('p') => paste(state, identity, effects),
        Key::Char(',') => {
            if is_log {
                enqueue(state, effects, Action::ToggleCollapsed(id), None);
            } else {
                let collapsed = state.group_is_collapsed(id);
                state.group_collapsed.insert(id, !collapsed);
            }
        }
        Key::Char('v') if is_log => enqueue(state, effects, Action::ToggleHistory(id), None),
        Key::Char('z') => {
            state.zen = !state.zen;
            state.fix_selection();
        }
        Key::Char('/') | Key::Char('i') | Key::Tab => state.focus_input(),
        Key::Char('?') => {
            state.focus_input();
            state.input.set("?");
            state.sync_search();
        }
        Key::Esc => {
            if state.search_active {
                state.clear_search();
            } else if state.zen {
                state.zen = false;
                state.fix_selection();
            } else {
                state.focus_input();
            }
        }
        _ => return,
    }
    ev.consume();
}

fn paste(state: &mut State, target: EntryIdentity, effects: &mut Vec<Effect>) {
    let cutting = state.cutting_id;
    if cutting == 0 {
        return;
    }
    match target.kind {
        ViewType::Group => {
            enqueue(
                state,
                effects,
                Action::AssignGroup {
                    log_id: cutting,
                    group_id: target.id,
                },
                None,
            );
        }
        ViewType::Log => {
            if target.id == cutting || tree::is_descendant(&state.entries, cutting, target.id) {
                state.set_error("cannot move an entry under itself or its descendant");
                return;
            }
            enqueue(
                state,
                effects,
                Action::Move {
                    id: cutting,
                    new_parent_id: target.id,
                },
                None,
            );
        }
    }
    state.cutting_id = 0;
}

fn on_edit_input(state: &mut State, id: i64, ev: &mut DomEvent, effects: &mut Vec<Effect>) {
    match ev.key {
        Key::Ctrl('c') => return,
        Key::Enter => {
            let text = state.edit_input.value.trim().to_string();
            let unchanged = state.entry(id).is_some_and(|v| v.data.text == text);
            if text.is_empty() || unchanged {
                state.mode = SelectionMode::Default;
            } else if begin_submit(state, InputSlot::Edit(id), &text) {
                state.mode = SelectionMode::Default;
                enqueue(state, effects, Action::Update { id, text }, Some(InputSlot::Edit(id)));
            }
        }
        Key::Esc => state.mode = SelectionMode::Default,
        key => {
            edit_text(&mut state.edit_input, key);
        }
    }
    ev.consume();
}

fn on_child_input(state: &mut State, parent_id: i64, ev: &mut DomEvent, effects: &mut Vec<Effect>) {
    match ev.key {
        Key::Ctrl('c') => return,
        Key::Enter => {
            let text = state.child_input.value.trim().to_string();
            if text.is_empty() {
                state.mode = SelectionMode::Default;
            } else if begin_submit(state, InputSlot::Child(parent_id), &text) {
                state.child_input.clear();
                state.mode = SelectionMode::Default;
                enqueue(
                    state,
                    effects,
                    Action::Add(Entry::child_of(parent_id, text)),
                    Some(InputSlot::Child(parent_id)),
                );
            }
        }
        Key::Esc => state.mode = SelectionMode::Default,
        key => {
            edit_text(&mut state.child_input, key);
        }
    }
    ev.consume();
}

/// The row to select once `identity` is gone
fn neighbor(order: &[EntryIdentity], identity: EntryIdentity) -> Option<EntryIdentity> {
    match tree::next_or_last(order, identity) {
        Some(next) if next != identity => Some(next),
        _ => tree::prev_or_first(order, identity).filter(|prev| *prev != identity),
    }
}

fn on_delete_confirm(
    state: &mut State,
    identity: EntryIdentity,
    ev: &mut DomEvent,
    effects: &mut Vec<Effect>,
) {
    match ev.key {
        Key::Ctrl('c') => return,
        Key::Left | Key::Right | Key::Tab | Key::Char('h') | Key::Char('l') => {
            state.delete_button ^= 1;
        }
        Key::Enter => {
            if state.delete_button != 0 {
                state.mode = SelectionMode::Default;
            } else if state.view_mode == ViewMode::Group {
                state.mode = SelectionMode::Default;
                enqueue(
                    state,
                    effects,
                    Action::AssignGroup {
                        log_id: identity.id,
                        group_id: 0,
                    },
                    None,
                );
            } else {
                let next = neighbor(&state.visible_order(), identity);
                if next.is_some() {
                    state.select(next);
                } else {
                    state.focus_input();
                }
                if state.cutting_id == identity.id {
                    state.cutting_id = 0;
                }
                enqueue(state, effects, Action::Delete(identity.id), None);
            }
        }
        Key::Esc => state.mode = SelectionMode::Default,
        _ => {}
    }
    ev.consume();
}

fn on_action_menu(state: &mut State, id: i64, ev: &mut DomEvent, effects: &mut Vec<Effect>) {
    let len = MENU_ITEMS.len();
    match ev.key {
        Key::Ctrl('c') => return,
        Key::Up | Key::Char('k') => state.menu_index = (state.menu_index + len - 1) % len,
        Key::Down | Key::Char('j') => state.menu_index = (state.menu_index + 1) % len,
        Key::Enter => {
            let action = match state.menu_index {
                0 => Action::Promote(id),
                n => Action::UpdateHighlight {
                    id,
                    level: n as i32 - 1,
                },
            };
            state.mode = SelectionMode::Default;
            enqueue(state, effects, action, None);
        }
        Key::Esc | Key::Left => state.mode = SelectionMode::Default,
        _ => {}
    }
    ev.consume();
}

fn note_ids(state: &State, entry_id: i64) -> Vec<i64> {
    state
        .entry(entry_id)
        .map(|v| v.notes.iter().map(|n| n.data.id).collect())
        .unwrap_or_default()
}

fn on_note(state: &mut State, entry_id: i64, note_id: i64, ev: &mut DomEvent) {
    if ev.default_prevented() {
        return;
    }
    let ids = note_ids(state, entry_id);
    let pos = ids.iter().position(|id| *id == note_id);
    match ev.key {
        Key::Char('j') | Key::Down => {
            state.detail.selected_note = match pos {
                Some(p) if p + 1 < ids.len() => Some(ids[p + 1]),
                // Past the last note: the add-note input.
                _ => None,
            };
        }
        Key::Char('k') | Key::Up => {
            if let Some(p) = pos.filter(|p| *p > 0) {
                state.detail.selected_note = Some(ids[p - 1]);
            }
        }
        Key::Char('e') | Key::Enter => {
            let text = state
                .entry(entry_id)
                .and_then(|v| v.notes.iter().find(|n| n.data.id == note_id))
                .map(|n| n.data.text.clone())
                .unwrap_or_default();
            state.detail.edit.set(text);
            state.detail.mode = NoteMode::Editing;
        }
        Key::Char('d') => {
            state.detail.button = 0;
            state.detail.mode = NoteMode::DeleteConfirm;
        }
        _ => return,
    }
    ev.consume();
}

fn on_note_edit(
    state: &mut State,
    entry_id: i64,
    note_id: i64,
    ev: &mut DomEvent,
    effects: &mut Vec<Effect>,
) {
    match ev.key {
        Key::Ctrl('c') => return,
        Key::Enter => {
            let text = state.detail.edit.value.trim().to_string();
            let slot = InputSlot::EditNote { entry_id, note_id };
            if text.is_empty() {
                state.detail.mode = NoteMode::Default;
            } else if begin_submit(state, slot, &text) {
                state.detail.mode = NoteMode::Default;
                enqueue(
                    state,
                    effects,
                    Action::UpdateNote {
                        entry_id,
                        note_id,
                        text,
                    },
                    Some(slot),
                );
            }
        }
        Key::Esc => state.detail.mode = NoteMode::Default,
        key => {
            edit_text(&mut state.detail.edit, key);
        }
    }
    ev.consume();
}

fn on_note_delete(
    state: &mut State,
    entry_id: i64,
    note_id: i64,
    ev: &mut DomEvent,
    effects: &mut Vec<Effect>,
) {
    match ev.key {
        Key::Ctrl('c') => return,
        Key::Left | Key::Right | Key::Tab | Key::Char('h') | Key::Char('l') => {
            state.detail.button ^= 1;
        }
        Key::Enter => {
            state.detail.mode = NoteMode::Default;
            if state.detail.button == 0 {
                let ids = note_ids(state, entry_id);
                state.detail.selected_note = tree::next_or_last(&ids, note_id)
                    .filter(|id| *id != note_id)
                    .or_else(|| tree::prev_or_first(&ids, note_id).filter(|id| *id != note_id));
                enqueue(state, effects, Action::DeleteNote { entry_id, note_id }, None);
            }
        }
        Key::Esc => state.detail.mode = NoteMode::Default,
        _ => {}
    }
    ev.consume();
}

fn on_add_note(state: &mut State, entry_id: i64, ev: &mut DomEvent, effects: &mut Vec<Effect>) {
    match ev.key {
        Key::Ctrl('c') | Key::Esc => return,
        Key::Enter => {
            let text = state
                .entry(entry_id)
                .map(|v| v.detail.input.value.trim().to_string())
                .unwrap_or_default();
            if !text.is_empty() && begin_submit(state, InputSlot::AddNote(entry_id), &text) {
                if let Some(view) = state.entry_mut(entry_id) {
                    view.detail.input.clear();
                }
                enqueue(
                    state,
                    effects,
                    Action::AddNote { entry_id, text },
                    Some(InputSlot::AddNote(entry_id)),
                );
            }
        }
        Key::Up => {
            if let Some(last) = note_ids(state, entry_id).last().copied() {
                state.detail.selected_note = Some(last);
            }
        }
        key => {
            let Some(view) = state.entry_mut(entry_id) else {
                return;
            };
            if !edit_text(&mut view.detail.input, key) {
                return;
            }
        }
    }
    ev.consume();
}

fn on_config_page(state: &mut State, ev: &mut DomEvent) {
    if ev.default_prevented() {
        return;
    }
    let order = [
        ConfigField::Storage,
        ConfigField::ServerAddr,
        ConfigField::ServerToken,
        ConfigField::Save,
    ];
    let pos = order
        .iter()
        .position(|f| *f == state.config_page.field)
        .unwrap_or(0);
    match ev.key {
        Key::Down | Key::Tab => state.config_page.field = order[(pos + 1) % order.len()],
        Key::Up | Key::BackTab => {
            state.config_page.field = order[(pos + order.len() - 1) % order.len()]
        }
        Key::Esc => state.pop_route(),
        _ => return,
    }
    ev.consume();
}

fn on_config_field(state: &mut State, field: ConfigField, ev: &mut DomEvent, effects: &mut Vec<Effect>) {
    let kinds = [StorageKind::File, StorageKind::Sqlite, StorageKind::Server];
    let page = &mut state.config_page;
    match (field, ev.key) {
        (_, Key::Ctrl('c')) => return,
        (ConfigField::Storage, Key::Left | Key::Right | Key::Char('h') | Key::Char('l') | Key::Char(' ')) => {
            let pos = kinds.iter().position(|k| *k == page.storage).unwrap_or(0);
            let step = if matches!(ev.key, Key::Left | Key::Char('h')) {
                kinds.len() - 1
            } else {
                1
            };
            page.storage = kinds[(pos + step) % kinds.len()];
        }
        (ConfigField::Save, Key::Enter) => {
            effects.push(Effect::SaveConfig {
                storage: page.storage,
                server_addr: page.server_addr.value.trim().to_string(),
                server_token: page.server_token.value.trim().to_string(),
            });
            state.pop_route();
        }
        (ConfigField::ServerAddr, key) if edit_text(&mut page.server_addr, key) => {}
        (ConfigField::ServerToken, key) if edit_text(&mut page.server_token, key) => {}
        (_, Key::Enter) => {
            // Enter on a field moves on, like Tab.
            let next = match field {
                ConfigField::Storage => ConfigField::ServerAddr,
                ConfigField::ServerAddr => ConfigField::ServerToken,
                _ => ConfigField::Save,
            };
            page.field = next;
        }
        _ => return,
    }
    ev.consume();
}

fn on_help(state: &mut State, ev: &mut DomEvent) {
    match ev.key {
        Key::Char('j') | Key::Down => {
            state.help_scroll = (state.help_scroll + 1).min(HELP_LINES.len().saturating_sub(1));
        }
        Key::Char('k') | Key::Up => state.help_scroll = state.help_scroll.saturating_sub(1),
        Key::Esc | Key::Char('q') => state.pop_route(),
        _ => return,
    }
    ev.consume();
}

fn on_happening_input(state: &mut State, ev: &mut DomEvent, effects: &mut Vec<Effect>) {
    match ev.key {
        Key::Ctrl('c') | Key::Esc => return,
        Key::Enter => {
            let text = state.happening_input.value.trim().to_string();
            if !text.is_empty() && begin_submit(state, InputSlot::Happening, &text) {
                state.happening_input.clear();
                enqueue(state, effects, Action::AddHappening(text), Some(InputSlot::Happening));
            }
        }
        key => {
            if !edit_text(&mut state.happening_input, key) {
                return;
            }
        }
    }
    ev.consume();
}

// ==========================================================================
// Action results
// ==========================================================================

/// Folds a finished action into the state
pub fn apply_done(state: &mut State, done: ActionDone) {
    state.status.requesting = done.remaining > 0;

    if done.slot.is_some() {
        if let Some((slot, pending)) = state.submit.finish(done.result.is_ok()) {
            restore(state, slot, &pending);
        }
    }

    match done.result {
        Ok(payload) => {
            state.status.error = None;
            match payload {
                Payload::None => {}
                Payload::Happenings(list) => state.happenings = list,
                Payload::Groups(mapping) => state.group_mapping = mapping,
            }
        }
        Err(err) => state.set_error(err.to_string()),
    }

    state.show_history = done.include_history;
    state.set_entries(done.snapshot);

    if let Route::Detail(id) = state.route() {
        let ids = note_ids(state, id);
        if state
            .detail
            .selected_note
            .is_some_and(|note_id| !ids.contains(&note_id))
        {
            state.detail.selected_note = None;
            state.detail.mode = NoteMode::Default;
        }
    }
}

/// Puts failed submission text back where it was typed
fn restore(state: &mut State, slot: InputSlot, pending: &str) {
    match slot {
        InputSlot::Global => {
            restore_into(&mut state.input, pending);
            state.sync_search();
        }
        InputSlot::Edit(id) => {
            if state.entry(id).is_some() && state.route() == Route::Main {
                state.select(Some(EntryIdentity::log(id)));
                state.edit_input.set(pending);
                state.mode = SelectionMode::Editing;
            }
        }
        InputSlot::Child(parent_id) => {
            if state.entry(parent_id).is_some() && state.route() == Route::Main {
                state.select(Some(EntryIdentity::log(parent_id)));
                restore_into(&mut state.child_input, pending);
                state.mode = SelectionMode::AddingChild;
            }
        }
        InputSlot::AddNote(entry_id) => {
            if let Some(view) = state.entry_mut(entry_id) {
                restore_into(&mut view.detail.input, pending);
            }
        }
        InputSlot::EditNote { note_id, .. } => {
            if state.detail.selected_note == Some(note_id) {
                state.detail.edit.set(pending);
                state.detail.mode = NoteMode::Editing;
            }
        }
        InputSlot::Happening => restore_into(&mut state.happening_input, pending),
    }
}
