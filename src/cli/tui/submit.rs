//! Guard for text submissions
//!
//! While a submission is in flight its text is held here. If the action
//! fails the text goes back into the input it came from so the user can
//! retry.

use crate::domain::InputState;

/// Input a submission originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSlot {
    Global,
    Edit(i64),
    Child(i64),
    AddNote(i64),
    EditNote { entry_id: i64, note_id: i64 },
    Happening,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SubmitState {
    #[default]
    Idle,
    Submitting { slot: InputSlot, pending: String },
}

/// Rejection message for a second submission
pub const BUSY_MESSAGE: &str = "submission in progress, please wait...";

impl SubmitState {
    pub fn is_submitting(&self) -> bool {
        matches!(self, SubmitState::Submitting { .. })
    }

    /// Starts a submission of `text` from `slot`
    pub fn begin(&mut self, slot: InputSlot, text: impl Into<String>) -> Result<(), &'static str> {
        if self.is_submitting() {
            return Err(BUSY_MESSAGE);
        }
        *self = SubmitState::Submitting {
            slot,
            pending: text.into(),
        };
        Ok(())
    }

    /// Ends the submission; on failure returns the text to restore
    pub fn finish(&mut self, ok: bool) -> Option<(InputSlot, String)> {
        match std::mem::take(self) {
            SubmitState::Submitting { slot, pending } if !ok => Some((slot, pending)),
            _ => None,
        }
    }
}

/// Puts `pending` back into `input`, keeping anything typed meanwhile
pub fn restore_into(input: &mut InputState, pending: &str) {
    if input.value.is_empty() {
        input.set(pending);
    } else if !input.value.starts_with(pending) {
        let typed = std::mem::take(&mut input.value);
        input.set(format!("{}{}", pending, typed));
    }
}
