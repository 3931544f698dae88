//! `lifelog config`: persisted storage settings

use anyhow::Result;
use serde::Serialize;

use super::app::StorageArgs;
use super::output::Output;
use crate::storage::{Config, ConfigDir};

#[derive(Debug, Serialize, PartialEq)]
struct Settings {
    storage_type: String,
    server_addr: String,
    /// Masked
    server_token: String,
    path: String,
}

fn settings(dir: &ConfigDir, config: &Config) -> Settings {
    Settings {
        storage_type: config.storage_type.unwrap_or_default().as_str().to_string(),
        server_addr: config.server_addr.clone(),
        server_token: if config.server_token.is_empty() {
            String::new()
        } else {
            "********".to_string()
        },
        path: dir.config_file().display().to_string(),
    }
}

/// Applies the given flags to `config.json`
pub fn apply(dir: &ConfigDir, args: &StorageArgs) -> Result<Config> {
    dir.update_config(|c| {
        if let Some(kind) = args.storage {
            c.storage_type = Some(kind);
        }
        if let Some(addr) = &args.server_addr {
            c.server_addr = addr.trim().to_string();
        }
        if let Some(token) = &args.server_token {
            c.server_token = token.trim().to_string();
        }
    })
}

pub fn run(output: &Output, dir: &ConfigDir, args: &StorageArgs, show: bool) -> Result<()> {
    let config = if args.is_empty() {
        dir.load_config()?
    } else {
        output.verbose_ctx("config", &format!("Updating {}", dir.config_file().display()));
        let config = apply(dir, args)?;
        tracing::info!(storage = ?config.storage_type, "config updated");
        if !show {
            output.success(&format!("Saved settings to {}", dir.config_file().display()));
            return Ok(());
        }
        config
    };

    let settings = settings(dir, &config);
    if output.is_json() {
        output.data(&settings);
    } else {
        println!("storage:      {}", settings.storage_type);
        println!("server addr:  {}", settings.server_addr);
        println!("server token: {}", settings.server_token);
        println!("config file:  {}", settings.path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageKind;
    use tempfile::TempDir;

    #[test]
    fn apply_updates_only_given_fields() {
        let temp = TempDir::new().unwrap();
        let dir = ConfigDir::new(temp.path());
        dir.update_config(|c| c.last_input = "keep me".into()).unwrap();

        let args = StorageArgs {
            storage: Some(StorageKind::Server),
            server_addr: Some(" http://h:1 ".into()),
            server_token: None,
        };
        let config = apply(&dir, &args).unwrap();
        assert_eq!(config.storage_type, Some(StorageKind::Server));
        assert_eq!(config.server_addr, "http://h:1");
        assert_eq!(config.last_input, "keep me");
    }

    #[test]
    fn token_is_masked() {
        let temp = TempDir::new().unwrap();
        let dir = ConfigDir::new(temp.path());
        let config = Config {
            server_token: "secret".into(),
            ..Config::default()
        };
        let shown = settings(&dir, &config);
        assert_eq!(shown.storage_type, "sqlite");
        assert_eq!(shown.server_token, "********");
    }
}
