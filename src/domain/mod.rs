//! Domain models for lifelog
//!
//! Contains the entry/note model, view projections and tree helpers
//! without any I/O concerns.

mod entry;
mod happening;
mod view;
pub mod tree;

pub use entry::{
    effective_time_ms, history_cutoff, Entry, EntryListOptions, EntryPatch, Note, NoteListOptions,
    NotePatch, NoteSortBy, SortBy, SortOrder,
};
pub use happening::{Happening, HappeningListOptions, HappeningPatch, StateEvent, StateRecord};
pub use view::{
    DetailState, EntryIdentity, EntryView, InputState, MatchText, NoteView, ViewType,
};
