//! # Command-Line Interface
//!
//! User-facing commands and output formatting.
//!
//! ## Commands
//!
//! | Command | Purpose |
//! |---------|---------|
//! | (none) | interactive UI |
//! | `list` | print the entry tree |
//! | `export FILE` | dump entries and notes as JSON |
//! | `import FILE` | load entries and notes, skipping duplicates |
//! | `config` | show or change storage settings |
//!
//! ## Output Formats
//!
//! Commands support the `--format` flag:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! ## Verbose Mode
//!
//! Use `--verbose` (or `-v`) for debug output:
//! ```bash
//! lifelog --verbose list
//! ```
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod config_cmd;
mod list;
mod logging;
mod output;
mod process;
mod transfer;
mod tui;

pub use app::{run, Cli, Commands, StorageArgs};
pub use output::{Output, OutputFormat};
pub use process::is_process_running;
pub use transfer::{export_file, import_file, ImportSummary};
