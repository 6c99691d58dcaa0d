use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrookError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Schema migration error: {0}")]
    Schema(String),

    #[error("Database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: u32, supported: u32 },

    #[error("Legacy migration error: {0}")]
    Migration(String),

    #[error("Refusing to migrate legacy database at version {version} (newest safe version is {max})")]
    MigrationRefused { version: u32, max: u32 },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} lock poisoned by a panicking thread")]
    LockPoisoned(&'static str),

    #[error("Cannot move folder {feed} into its own subfolder {parent}")]
    FolderCycle { feed: String, parent: String },

    #[error("Feed not found: {0}")]
    FeedNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<rusqlite_migration::Error> for BrookError {
    fn from(e: rusqlite_migration::Error) -> Self {
        BrookError::Schema(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BrookError>;
