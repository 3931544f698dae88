//! Configuration handling for lifelog
//!
//! Configuration lives in the user config directory (e.g.
//! `~/.config/lifelog/config.json`) next to the data files of the local
//! backends.
//!
//! | File | Contents |
//! |------|----------|
//! | `config.json` | last input, running PID, storage settings |
//! | `lifelog.json` | JSON-file backend data |
//! | `lifelog.db` | SQLite backend data |
//! | `log_group.json` | group-view assignments |

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use super::write_atomic;

const CONFIG_FILE: &str = "config.json";
const RECORD_FILE: &str = "lifelog.json";
const SQLITE_FILE: &str = "lifelog.db";
const GROUP_FILE: &str = "log_group.json";

/// Default period of the JSON-file flush ticker
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 500;

/// Storage backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    File,
    #[default]
    Sqlite,
    Server,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::File => "file",
            StorageKind::Sqlite => "sqlite",
            StorageKind::Server => "server",
        }
    }
}

/// The persisted `config.json` document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub last_input: String,

    pub running_pid: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<StorageKind>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub server_addr: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub server_token: String,

    /// Period of the JSON-file flush ticker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_flush_interval_ms: Option<u64>,

    /// fsync the JSON-file backend on every flush
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_fsync: Option<bool>,
}

/// Command-line values that take precedence over `config.json`
#[derive(Debug, Clone, Default)]
pub struct StorageOverrides {
    pub kind: Option<StorageKind>,
    pub server_addr: Option<String>,
    pub server_token: Option<String>,
}

/// Typed settings for the selected backend
#[derive(Debug, Clone, PartialEq)]
pub enum StorageConfig {
    Sqlite {
        path: PathBuf,
    },
    File {
        path: PathBuf,
        flush_interval: Duration,
        fsync: bool,
    },
    Server {
        addr: String,
        token: String,
    },
}

impl StorageConfig {
    /// Resolves flags, then `config.json`, then the `sqlite` default
    pub fn resolve(dir: &ConfigDir, config: &Config, overrides: &StorageOverrides) -> Result<Self> {
        let kind = overrides
            .kind
            .or(config.storage_type)
            .unwrap_or_default();

        let pick = |flag: &Option<String>, saved: &str| {
            flag.clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| saved.to_string())
        };

        match kind {
            StorageKind::Sqlite => Ok(StorageConfig::Sqlite {
                path: dir.sqlite_file(),
            }),
            StorageKind::File => Ok(StorageConfig::File {
                path: dir.record_file(),
                flush_interval: Duration::from_millis(
                    config
                        .file_flush_interval_ms
                        .unwrap_or(DEFAULT_FLUSH_INTERVAL_MS)
                        .max(1),
                ),
                fsync: config.file_fsync.unwrap_or(false),
            }),
            StorageKind::Server => {
                let addr = pick(&overrides.server_addr, &config.server_addr);
                if addr.is_empty() {
                    bail!("--server-addr is required when --storage=server");
                }
                Ok(StorageConfig::Server {
                    addr,
                    token: pick(&overrides.server_token, &config.server_token),
                })
            }
        }
    }

    /// Label shown in the status bar
    pub fn label(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn kind(&self) -> StorageKind {
        match self {
            StorageConfig::Sqlite { .. } => StorageKind::Sqlite,
            StorageConfig::File { .. } => StorageKind::File,
            StorageConfig::Server { .. } => StorageKind::Server,
        }
    }
}

/// The lifelog configuration directory
#[derive(Debug, Clone)]
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    /// Uses `dir` when given, else the platform config directory
    pub fn resolve(dir: Option<PathBuf>) -> Result<Self> {
        let root = match dir {
            Some(dir) => dir,
            None => ProjectDirs::from("", "", "lifelog")
                .map(|dirs| dirs.config_dir().to_path_buf())
                .ok_or_else(|| anyhow!("Could not determine config directory"))?,
        };
        Ok(Self { root })
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Creates the directory if needed
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root).with_context(|| {
            format!("Failed to create config directory: {}", self.root.display())
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn record_file(&self) -> PathBuf {
        self.root.join(RECORD_FILE)
    }

    pub fn sqlite_file(&self) -> PathBuf {
        self.root.join(SQLITE_FILE)
    }

    pub fn group_file(&self) -> PathBuf {
        self.root.join(GROUP_FILE)
    }

    /// Loads `config.json`; a missing or empty file yields defaults
    pub fn load_config(&self) -> Result<Config> {
        let path = self.config_file();
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Config::default());
        }

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Saves `config.json` atomically
    pub fn save_config(&self, config: &Config) -> Result<()> {
        let path = self.config_file();
        let content = serde_json::to_vec_pretty(config).context("Failed to serialize config")?;
        write_atomic(&path, &content, false)
            .with_context(|| format!("Failed to write config: {}", path.display()))
    }

    /// Loads, mutates and saves `config.json`
    pub fn update_config(&self, f: impl FnOnce(&mut Config)) -> Result<Config> {
        let mut config = self.load_config()?;
        f(&mut config);
        self.save_config(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dir() -> (TempDir, ConfigDir) {
        let tmp = TempDir::new().unwrap();
        let dir = ConfigDir::new(tmp.path());
        (tmp, dir)
    }

    #[test]
    fn missing_config_is_default() {
        let (_tmp, dir) = dir();
        assert_eq!(dir.load_config().unwrap(), Config::default());
    }

    #[test]
    fn empty_config_is_default() {
        let (_tmp, dir) = dir();
        fs::write(dir.config_file(), "  ").unwrap();
        assert_eq!(dir.load_config().unwrap(), Config::default());
    }

    #[test]
    fn config_roundtrip_keeps_fields() {
        let (_tmp, dir) = dir();
        let config = Config {
            last_input: "half typed".into(),
            running_pid: 42,
            storage_type: Some(StorageKind::Server),
            server_addr: "http://localhost:8080".into(),
            server_token: "abc".into(),
            file_flush_interval_ms: None,
            file_fsync: Some(true),
        };
        dir.save_config(&config).unwrap();
        assert_eq!(dir.load_config().unwrap(), config);
    }

    #[test]
    fn parses_documented_schema() {
        let json = r#"{"last_input":"x","running_pid":7,"storage_type":"file","server_addr":"","server_token":""}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.storage_type, Some(StorageKind::File));
        assert_eq!(config.running_pid, 7);
    }

    #[test]
    fn storage_defaults_to_sqlite() {
        let (_tmp, dir) = dir();
        let resolved =
            StorageConfig::resolve(&dir, &Config::default(), &StorageOverrides::default()).unwrap();
        assert_eq!(
            resolved,
            StorageConfig::Sqlite {
                path: dir.sqlite_file()
            }
        );
    }

    #[test]
    fn flag_overrides_saved_storage() {
        let (_tmp, dir) = dir();
        let saved = Config {
            storage_type: Some(StorageKind::Sqlite),
            ..Config::default()
        };
        let overrides = StorageOverrides {
            kind: Some(StorageKind::File),
            ..StorageOverrides::default()
        };
        let resolved = StorageConfig::resolve(&dir, &saved, &overrides).unwrap();
        assert_eq!(resolved.kind(), StorageKind::File);
        if let StorageConfig::File { flush_interval, fsync, .. } = resolved {
            assert_eq!(flush_interval, Duration::from_millis(500));
            assert!(!fsync);
        }
    }

    #[test]
    fn server_requires_address() {
        let (_tmp, dir) = dir();
        let overrides = StorageOverrides {
            kind: Some(StorageKind::Server),
            ..StorageOverrides::default()
        };
        let err = StorageConfig::resolve(&dir, &Config::default(), &overrides).unwrap_err();
        assert!(err.to_string().contains("--server-addr"));
    }

    #[test]
    fn server_uses_saved_address_and_token() {
        let (_tmp, dir) = dir();
        let saved = Config {
            storage_type: Some(StorageKind::Server),
            server_addr: "http://saved".into(),
            server_token: "tok".into(),
            ..Config::default()
        };
        let resolved = StorageConfig::resolve(&dir, &saved, &StorageOverrides::default()).unwrap();
        assert_eq!(
            resolved,
            StorageConfig::Server {
                addr: "http://saved".into(),
                token: "tok".into()
            }
        );
    }

    #[test]
    fn update_config_preserves_other_fields() {
        let (_tmp, dir) = dir();
        dir.save_config(&Config {
            server_addr: "http://keep".into(),
            ..Config::default()
        })
        .unwrap();

        dir.update_config(|c| c.running_pid = 99).unwrap();

        let loaded = dir.load_config().unwrap();
        assert_eq!(loaded.running_pid, 99);
        assert_eq!(loaded.server_addr, "http://keep");
    }
}
