//! Tracing setup
//!
//! | Mode | Sink | Default level |
//! |------|------|---------------|
//! | `--debug-log FILE` | FILE (append, no ANSI) | `debug` |
//! | subcommand | stderr | `warn` |
//! | interactive UI | none | - |
//!
//! `LIFELOG_LOG` overrides the level with an env-filter directive.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive
pub const LOG_ENV: &str = "LIFELOG_LOG";

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default))
}

/// Installs the global subscriber
///
/// The interactive UI passes `stderr = false` so nothing is written over
/// the alternate screen unless a debug log file is given.
pub fn init(debug_log: Option<&Path>, stderr: bool) -> Result<()> {
    let result = match debug_log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open debug log: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter("debug"))
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_thread_names(true)
                .try_init()
        }
        None if stderr => tracing_subscriber::fmt()
            .with_env_filter(filter("warn"))
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init(),
        None => return Ok(()),
    };

    // A subscriber may already be installed (tests); keep it.
    if let Err(err) = result {
        tracing::debug!(error = %err, "tracing subscriber already set");
    }
    Ok(())
}
