//! In-memory managers between the services and the UI
//!
//! - [`LogManager`] owns the entry forest and keeps it in step with the
//!   entry and note services
//! - [`HappeningManager`] caches the happening list behind a reader/writer
//!   lock with background refresh

mod happening_manager;
mod log_manager;

pub use happening_manager::HappeningManager;
pub use log_manager::LogManager;
