//! Configuration management for Brook.
//!
//! Configuration is read from `~/.config/brook/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use crate::fetcher::parallel::DEFAULT_WORKERS;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub update: UpdateConfig,
}

/// Store preferences.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Id of the folder every feed descends from.
    pub home_folder: String,
    /// Move old entries to the trash.
    pub expire_entries: bool,
    /// Age in days after which entries expire.
    pub entry_expiration_age: u32,
    /// Keep at most `max_stored_entries` entries per feed.
    pub limit_stored_entries: bool,
    pub max_stored_entries: u32,
    /// Days a hidden feed and its entries are kept before being purged.
    pub hidden_feed_retention: u32,
    /// Default for feeds without their own setting.
    pub mark_modified_entries_unread: bool,
    /// Flat-file mirrors of the feed list. Empty means next to the database.
    pub backup_paths: Vec<PathBuf>,
    /// Location of a database left behind by an older installation.
    pub legacy_path: Option<PathBuf>,
    pub migration_batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            home_folder: "0".to_string(),
            expire_entries: false,
            entry_expiration_age: 60,
            limit_stored_entries: false,
            max_stored_entries: 100,
            hidden_feed_retention: 30,
            mark_modified_entries_unread: true,
            backup_paths: Vec::new(),
            legacy_path: None,
            migration_batch_size: 200,
        }
    }
}

/// Feed update preferences.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Number of feeds fetched concurrently.
    pub workers: usize,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path,
            source: e,
        })?;

        Ok(config)
    }

    /// Get the default config file path: `~/.config/brook/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("brook").join("config.toml"))
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# Brook Configuration

[database]
# Folder id at the root of the feed tree
home_folder = "0"

# Move entries older than entry_expiration_age days to the trash
expire_entries = false
entry_expiration_age = 60

# Keep at most max_stored_entries entries per feed (starred entries are kept)
limit_stored_entries = false
max_stored_entries = 100

# Days an unsubscribed feed is kept before it and its entries are purged
hidden_feed_retention = 30

# Mark entries unread again when the publisher updates them
mark_modified_entries_unread = true

# Feed list backups; leave empty to keep them next to the database
# backup_paths = ["/path/to/feeds-backup.json", "/other/path/feeds-backup.json"]

# Database left behind by an older installation, migrated on startup
# legacy_path = "/path/to/legacy.db"

# Entries copied per legacy migration transaction
migration_batch_size = 200

[update]
# Number of feeds fetched concurrently
workers = 10
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
