//! lifelog - a tree-structured personal to-do list
//!
//! Entries form a forest; each entry may carry notes. Three interchangeable
//! backends (SQLite, a JSON file, a remote RPC server) sit behind the same
//! service traits. An in-memory [`data::LogManager`] mirrors the forest for
//! the interactive terminal UI in [`cli`].

pub mod domain;
pub mod storage;
pub mod data;
pub mod cli;

pub use domain::{Entry, EntryView, Note};
pub use storage::{Services, StorageError};
