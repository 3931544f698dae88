//! Transient view projections used for rendering
//!
//! Views are rebuilt on every load/refresh. Per-entry UI sub-state
//! (collapsed flag, detail-page input) is carried across refreshes by id.

use serde::Serialize;

use super::entry::{Entry, Note};

/// Kind of row a view stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViewType {
    #[default]
    Log,
    /// Pseudo entry heading a group in group view
    Group,
}

/// Identity of a selectable row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryIdentity {
    pub kind: ViewType,
    pub id: i64,
}

impl EntryIdentity {
    pub fn log(id: i64) -> Self {
        Self {
            kind: ViewType::Log,
            id,
        }
    }

    pub fn group(id: i64) -> Self {
        Self {
            kind: ViewType::Group,
            id,
        }
    }
}

/// One segment of a search-annotated text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchText {
    pub text: String,
    #[serde(rename = "match")]
    pub matched: bool,
}

impl MatchText {
    pub fn new(text: impl Into<String>, matched: bool) -> Self {
        Self {
            text: text.into(),
            matched,
        }
    }
}

/// A text edit buffer with a codepoint cursor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputState {
    pub value: String,
    pub focused: bool,
    /// Cursor position in codepoints
    pub cursor: usize,
}

impl InputState {
    pub fn focused() -> Self {
        Self {
            focused: true,
            ..Self::default()
        }
    }

    fn len(&self) -> usize {
        self.value.chars().count()
    }

    fn byte_offset(&self, cursor: usize) -> usize {
        self.value
            .char_indices()
            .nth(cursor)
            .map(|(i, _)| i)
            .unwrap_or(self.value.len())
    }

    /// Replaces the value and moves the cursor to the end
    pub fn set(&mut self, value: impl Into<String>) {
        self.value = value.into();
        self.cursor = self.len();
    }

    pub fn clear(&mut self) {
        self.value.clear();
        self.cursor = 0;
    }

    /// Appends text at the end (used to restore failed submissions)
    pub fn append(&mut self, text: &str) {
        self.value.push_str(text);
        self.cursor = self.len();
    }

    /// Takes the value out, leaving the buffer empty
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.value)
    }

    pub fn insert(&mut self, c: char) {
        let at = self.byte_offset(self.cursor);
        self.value.insert(at, c);
        self.cursor += 1;
    }

    pub fn insert_str(&mut self, s: &str) {
        let at = self.byte_offset(self.cursor);
        self.value.insert_str(at, s);
        self.cursor += s.chars().count();
    }

    /// Deletes the codepoint before the cursor
    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let at = self.byte_offset(self.cursor - 1);
        self.value.remove(at);
        self.cursor -= 1;
        true
    }

    /// Deletes the codepoint under the cursor
    pub fn delete(&mut self) -> bool {
        if self.cursor >= self.len() {
            return false;
        }
        let at = self.byte_offset(self.cursor);
        self.value.remove(at);
        true
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.len());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.len();
    }

    /// Splits the value at the cursor, for rendering
    pub fn split_at_cursor(&self) -> (&str, &str) {
        self.value.split_at(self.byte_offset(self.cursor))
    }
}

/// Detail-page sub-state kept per entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailState {
    /// The "add note" input
    pub input: InputState,
}

/// Projection of a note for rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteView {
    pub data: Note,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub match_texts: Vec<MatchText>,
}

impl NoteView {
    pub fn new(data: Note) -> Self {
        Self {
            data,
            match_texts: Vec::new(),
        }
    }
}

/// Projection of an entry with its children and notes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryView {
    pub data: Entry,

    #[serde(skip)]
    pub kind: ViewType,

    pub children: Vec<EntryView>,

    pub notes: Vec<NoteView>,

    #[serde(skip)]
    pub detail: DetailState,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub match_texts: Vec<MatchText>,

    #[serde(skip)]
    pub collapsed: bool,

    /// Number of descendants hidden by collapsing
    #[serde(skip)]
    pub collapsed_count: usize,

    /// Children were loaded including history
    #[serde(skip)]
    pub include_history: bool,
}

impl EntryView {
    pub fn new(data: Entry) -> Self {
        Self {
            data,
            kind: ViewType::Log,
            children: Vec::new(),
            notes: Vec::new(),
            detail: DetailState::default(),
            match_texts: Vec::new(),
            collapsed: false,
            collapsed_count: 0,
            include_history: false,
        }
    }

    /// Creates a group heading row
    pub fn group(id: i64, name: &str, collapsed: bool) -> Self {
        let mut entry = Entry::new(name);
        entry.id = id;
        Self {
            kind: ViewType::Group,
            collapsed,
            ..Self::new(entry)
        }
    }

    pub fn id(&self) -> i64 {
        self.data.id
    }

    pub fn identity(&self) -> EntryIdentity {
        EntryIdentity {
            kind: self.kind,
            id: self.data.id,
        }
    }

    /// Returns true if a search annotated this entry with a match
    pub fn is_search_match(&self) -> bool {
        self.match_texts.iter().any(|m| m.matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_insert_and_backspace_unicode() {
        let mut input = InputState::default();
        for c in "héllo".chars() {
            input.insert(c);
        }
        assert_eq!(input.cursor, 5);
        input.move_left();
        input.move_left();
        input.insert('✓');
        assert_eq!(input.value, "hél✓lo");
        assert!(input.backspace());
        assert_eq!(input.value, "héllo");
        assert_eq!(input.cursor, 3);
    }

    #[test]
    fn input_delete_at_end_is_noop() {
        let mut input = InputState::default();
        input.set("ab");
        assert!(!input.delete());
        input.home();
        assert!(input.delete());
        assert_eq!(input.value, "b");
    }

    #[test]
    fn input_append_moves_cursor_to_end() {
        let mut input = InputState::default();
        input.set("x");
        input.home();
        input.append("yz");
        assert_eq!(input.value, "xyz");
        assert_eq!(input.cursor, 3);
    }

    #[test]
    fn input_take_empties_buffer() {
        let mut input = InputState::default();
        input.set("buy milk");
        assert_eq!(input.take(), "buy milk");
        assert!(input.value.is_empty());
        assert_eq!(input.cursor, 0);
    }

    #[test]
    fn split_at_cursor() {
        let mut input = InputState::default();
        input.set("abc");
        input.move_left();
        assert_eq!(input.split_at_cursor(), ("ab", "c"));
    }

    #[test]
    fn match_text_serializes_match_key() {
        let json = serde_json::to_string(&MatchText::new("mi", true)).unwrap();
        assert_eq!(json, r#"{"text":"mi","match":true}"#);
    }
}
