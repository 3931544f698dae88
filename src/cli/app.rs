//! Main CLI application structure

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use super::output::{Output, OutputFormat};
use super::process::PidGuard;
use super::tui::{self, Launch};
use super::{config_cmd, list, logging, transfer};
use crate::storage::{ConfigDir, Services, StorageConfig, StorageKind, StorageOverrides};

#[derive(Parser)]
#[command(name = "lifelog")]
#[command(author, version, about = "A tree-structured to-do list for the terminal")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Enable verbose output for debugging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Configuration directory (defaults to the platform config dir)
    #[arg(long, global = true, env = "LIFELOG_CONFIG_DIR", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(flatten)]
    pub storage: StorageArgs,

    /// Write debug logs to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub debug_log: Option<PathBuf>,

    /// Print the configuration directory and exit
    #[arg(long)]
    pub show_path: bool,

    /// Start the interactive UI in group view
    #[arg(long)]
    pub group: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Storage selection shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct StorageArgs {
    /// Storage backend
    #[arg(long, global = true, value_enum)]
    pub storage: Option<StorageKind>,

    /// Server address for --storage=server
    #[arg(long, global = true, value_name = "URL")]
    pub server_addr: Option<String>,

    /// Bearer token for --storage=server
    #[arg(long, global = true, value_name = "TOKEN")]
    pub server_token: Option<String>,
}

impl StorageArgs {
    pub fn overrides(&self) -> StorageOverrides {
        StorageOverrides {
            kind: self.storage,
            server_addr: self.server_addr.clone(),
            server_token: self.server_token.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_none() && self.server_addr.is_none() && self.server_token.is_none()
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print entries as a tree
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Keep sub-trees with an entry containing this text
        #[arg(long, value_name = "PATTERN")]
        include: Option<String>,

        /// Show done history under this entry
        #[arg(long, value_name = "ID")]
        toggle: Option<i64>,

        /// Prefix entries with their id
        #[arg(long)]
        show_id: bool,
    },

    /// Export all entries and notes to a JSON file
    Export {
        /// Target file
        file: PathBuf,
    },

    /// Import entries and notes from a JSON file
    Import {
        /// Source file
        file: PathBuf,
    },

    /// Show or update the persisted storage settings
    Config {
        /// Print the settings
        #[arg(long)]
        show: bool,
    },
}

/// Resolves and opens the configured backend
fn open_services(output: &Output, dir: &ConfigDir, args: &StorageArgs) -> Result<(Services, StorageConfig)> {
    let config = dir.load_config()?;
    let storage = StorageConfig::resolve(dir, &config, &args.overrides())?;
    output.verbose_ctx("storage", &format!("Using {} storage", storage.label()));
    let services = Services::open(&storage)?;
    Ok((services, storage))
}

/// Runs `f` against the backend and flushes it afterwards
fn with_services<F>(output: &Output, dir: &ConfigDir, args: &StorageArgs, f: F) -> Result<()>
where
    F: FnOnce(&Services) -> Result<()>,
{
    let (services, _) = open_services(output, dir, args)?;
    let result = f(&services);
    services.close().context("Failed to flush storage")?;
    result
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(cli.format, cli.verbose);

    output.verbose("lifelog starting");

    let dir = ConfigDir::resolve(cli.config_dir.clone())?;
    if cli.show_path {
        println!("{}", dir.path().display());
        return Ok(());
    }

    logging::init(cli.debug_log.as_deref(), cli.command.is_some())?;
    dir.ensure()?;
    output.verbose_ctx("config", &format!("Config directory: {}", dir.path().display()));

    match cli.command {
        None => {
            let _guard = PidGuard::acquire(&dir)?;
            let (services, storage) = open_services(&output, &dir, &cli.storage)?;
            tracing::info!(storage = storage.label(), "starting interactive UI");
            tui::run(
                &output,
                Launch {
                    dir: dir.clone(),
                    services,
                    storage: storage.label().to_string(),
                    group_view: cli.group,
                },
            )?
        }

        Some(Commands::List {
            json,
            include,
            toggle,
            show_id,
        }) => {
            let output = if json {
                Output::new(OutputFormat::Json, cli.verbose)
            } else {
                output
            };
            let opts = list::ListOptions {
                include,
                toggle,
                show_id,
            };
            with_services(&output, &dir, &cli.storage, |services| {
                list::run(&output, services, &opts)
            })?
        }

        Some(Commands::Export { file }) => with_services(&output, &dir, &cli.storage, |services| {
            transfer::run_export(&output, services, &file)
        })?,

        Some(Commands::Import { file }) => with_services(&output, &dir, &cli.storage, |services| {
            transfer::run_import(&output, services, &file)
        })?,

        Some(Commands::Config { show }) => config_cmd::run(&output, &dir, &cli.storage, show)?,
    }

    tracing::debug!("command completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn storage_flags_apply_to_subcommands() {
        let cli = Cli::try_parse_from([
            "lifelog",
            "list",
            "--storage",
            "server",
            "--server-addr",
            "http://localhost:1",
        ])
        .unwrap();
        assert_eq!(cli.storage.storage, Some(StorageKind::Server));
        assert_eq!(cli.storage.server_addr.as_deref(), Some("http://localhost:1"));
        assert!(matches!(cli.command, Some(Commands::List { .. })));
    }

    #[test]
    fn no_subcommand_launches_ui() {
        let cli = Cli::try_parse_from(["lifelog", "--group"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.group);
        assert!(cli.storage.is_empty());
    }
}
