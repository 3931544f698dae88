//! Virtual document
//!
//! Pages are projected into a tree of [`Node`]s. Interactive nodes carry a
//! typed [`Target`] instead of a closure; key events are routed to the
//! focused node first and then bubble to its ancestors.
//!
//! | Call | Effect |
//! |------|--------|
//! | [`DomEvent::prevent_default`] | ancestors skip their default handling |
//! | [`DomEvent::stop_propagation`] | no further ancestor sees the event |

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::style::Style;

use crate::domain::EntryIdentity;

/// Kind of a document node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Div,
    Span,
    Text,
    Li,
    Ul,
    Input,
    H1,
    Br,
    Fragment,
}

/// Fields of the config page, in focus order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigField {
    #[default]
    Storage,
    ServerAddr,
    ServerToken,
    Save,
}

/// Handler identity attached to an interactive node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    App,
    MainPage,
    GlobalInput,
    Entry(EntryIdentity),
    EditInput(i64),
    ChildInput(i64),
    DeleteConfirm(EntryIdentity),
    ActionMenu(i64),
    DetailPage(i64),
    Note { entry_id: i64, note_id: i64 },
    NoteEditInput { entry_id: i64, note_id: i64 },
    NoteDeleteConfirm { entry_id: i64, note_id: i64 },
    AddNoteInput(i64),
    ConfigPage,
    ConfigField(ConfigField),
    HelpPage,
    HappeningPage,
    HappeningInput,
}

/// Declarative node properties
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Props {
    pub style: Style,
    pub focused: bool,
    pub focusable: bool,
    /// Prefix painted before a list item (tree connectors)
    pub item_prefix: Option<String>,
    pub target: Option<Target>,
    /// Input cursor, in codepoints
    pub cursor: Option<usize>,
    pub placeholder: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub props: Props,
    pub text: String,
    pub children: Vec<Node>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            props: Props::default(),
            text: String::new(),
            children: Vec::new(),
        }
    }

    pub fn div(children: Vec<Node>) -> Self {
        Self::new(NodeKind::Div).with_children(children)
    }

    pub fn ul(children: Vec<Node>) -> Self {
        Self::new(NodeKind::Ul).with_children(children)
    }

    pub fn li(children: Vec<Node>) -> Self {
        Self::new(NodeKind::Li).with_children(children)
    }

    pub fn fragment(children: Vec<Node>) -> Self {
        Self::new(NodeKind::Fragment).with_children(children)
    }

    pub fn span(children: Vec<Node>) -> Self {
        Self::new(NodeKind::Span).with_children(children)
    }

    pub fn text(text: impl Into<String>) -> Self {
        let mut node = Self::new(NodeKind::Text);
        node.text = text.into();
        node
    }

    pub fn styled(text: impl Into<String>, style: Style) -> Self {
        Self::text(text).with_style(style)
    }

    pub fn h1(text: impl Into<String>) -> Self {
        let mut node = Self::new(NodeKind::H1);
        node.text = text.into();
        node
    }

    pub fn br() -> Self {
        Self::new(NodeKind::Br)
    }

    /// A text input showing `value` with the cursor at `cursor`
    pub fn input(value: &str, cursor: usize, focused: bool, target: Target) -> Self {
        let mut node = Self::new(NodeKind::Input);
        node.text = value.to_string();
        node.props.cursor = Some(cursor);
        node.props.focusable = true;
        node.props.focused = focused;
        node.props.target = Some(target);
        node
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.props.style = style;
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.props.target = Some(target);
        self
    }

    pub fn focusable(mut self, focused: bool) -> Self {
        self.props.focusable = true;
        self.props.focused = focused;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.props.item_prefix = Some(prefix.into());
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.props.placeholder = Some(placeholder.into());
        self
    }

    /// Concatenated text of the subtree, lines separated by `\n`
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// The focused node, depth-first
    pub fn focused(&self) -> Option<&Node> {
        if self.props.focused {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.focused())
    }
}

fn collect_text(node: &Node, out: &mut String) {
    if let Some(prefix) = &node.props.item_prefix {
        out.push_str(prefix);
    }
    out.push_str(&node.text);
    for child in &node.children {
        collect_text(child, out);
    }
    if matches!(
        node.kind,
        NodeKind::Li | NodeKind::Div | NodeKind::H1 | NodeKind::Br | NodeKind::Input
    ) && !out.ends_with('\n')
    {
        out.push('\n');
    }
}

/// Targets from the focused node up to the root, innermost first
pub fn focus_path(root: &Node) -> Vec<Target> {
    fn walk(node: &Node, path: &mut Vec<Target>) -> bool {
        if let Some(target) = node.props.target {
            path.push(target);
        }
        if node.props.focused || node.children.iter().any(|c| walk(c, path)) {
            return true;
        }
        if node.props.target.is_some() {
            path.pop();
        }
        false
    }

    let mut path = Vec::new();
    if walk(root, &mut path) {
        path.reverse();
    } else {
        // Nothing focused: only the root handles the key.
        path = root.props.target.into_iter().collect();
    }
    path
}

/// Key abstraction used by the reducer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Ctrl(char),
    Enter,
    Esc,
    Backspace,
    Delete,
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    Tab,
    BackTab,
}

impl Key {
    /// Converts a terminal key press; unsupported keys yield `None`
    pub fn from_event(event: KeyEvent) -> Option<Self> {
        let ctrl = event.modifiers.contains(KeyModifiers::CONTROL);
        Some(match event.code {
            KeyCode::Char(c) if ctrl => Key::Ctrl(c.to_ascii_lowercase()),
            KeyCode::Char(c) => Key::Char(c),
            KeyCode::Enter => Key::Enter,
            KeyCode::Esc => Key::Esc,
            KeyCode::Backspace => Key::Backspace,
            KeyCode::Delete => Key::Delete,
            KeyCode::Left => Key::Left,
            KeyCode::Right => Key::Right,
            KeyCode::Up => Key::Up,
            KeyCode::Down => Key::Down,
            KeyCode::Home => Key::Home,
            KeyCode::End => Key::End,
            KeyCode::Tab => Key::Tab,
            KeyCode::BackTab => Key::BackTab,
            _ => return None,
        })
    }
}

/// A key event travelling along the focus path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomEvent {
    pub key: Key,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl DomEvent {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            default_prevented: false,
            propagation_stopped: false,
        }
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Marks the event fully handled
    pub fn consume(&mut self) {
        self.prevent_default();
        self.stop_propagation();
    }
}

/// Delivers `event` along `path` until a handler stops propagation
pub fn dispatch<F>(path: &[Target], event: &mut DomEvent, mut handler: F)
where
    F: FnMut(Target, &mut DomEvent),
{
    for target in path {
        handler(*target, event);
        if event.propagation_stopped {
            break;
        }
    }
}
