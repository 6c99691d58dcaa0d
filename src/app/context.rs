use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app::error::{BrookError, Result};
use crate::config::{Config, DatabaseConfig};
use crate::domain::Feed;
use crate::fetcher::http_fetcher::HttpFetcher;
use crate::fetcher::parallel::ParallelFetcher;
use crate::fetcher::Fetcher;
use crate::ingest::IngestOutcome;
use crate::normalizer::Normalizer;
use crate::store::{Database, LegacyMigration, MigrationDescriptor};

const BACKUP_FILE: &str = "feeds-backup.json";

pub struct AppContext {
    pub db: Arc<Database>,
    pub fetcher: Arc<dyn Fetcher + Send + Sync>,
    pub parallel_fetcher: ParallelFetcher,
    pub normalizer: Normalizer,
    pub config: Config,
}

impl AppContext {
    /// Open the database at `db_path`, or the default location under the
    /// user's data directory.
    pub fn new(db_path: Option<PathBuf>, config: Config) -> Result<Self> {
        let db_path = match db_path {
            Some(p) => p,
            None => Self::default_db_path()?,
        };

        let settings = Self::resolve_settings(&config.database, &db_path);
        let db = Database::open(&db_path, settings)?;
        tracing::debug!("Opened {} (schema version {})", db_path.display(), db.found_version());
        Self::assemble(db, config)
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let db = Database::in_memory(config.database.clone())?;
        Self::assemble(db, config)
    }

    fn assemble(db: Database, config: Config) -> Result<Self> {
        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::new()?);
        let parallel_fetcher = ParallelFetcher::with_workers(fetcher.clone(), config.update.workers);

        Ok(Self {
            db: Arc::new(db),
            fetcher,
            parallel_fetcher,
            normalizer: Normalizer::new(),
            config,
        })
    }

    /// Backups default to a file next to the database.
    fn resolve_settings(settings: &DatabaseConfig, db_path: &Path) -> DatabaseConfig {
        let mut settings = settings.clone();
        if settings.backup_paths.is_empty() {
            if let Some(dir) = db_path.parent() {
                settings.backup_paths.push(dir.join(BACKUP_FILE));
            }
        }
        settings
    }

    /// Fetch the given feeds, or every visible feed when `feed_ids` is
    /// empty, and push the results into the store.
    pub async fn update_feeds(&self, feed_ids: &[String]) -> Result<Vec<(String, Result<IngestOutcome>)>> {
        let feeds: Vec<Feed> = self
            .db
            .feeds()?
            .into_iter()
            .filter(|f| !f.is_folder && !f.is_hidden() && f.feed_url.is_some())
            .filter(|f| feed_ids.is_empty() || feed_ids.contains(&f.feed_id))
            .collect();

        Ok(self
            .parallel_fetcher
            .fetch_all(feeds, self.db.clone(), &self.normalizer)
            .await)
    }

    /// Copy a legacy database into this one. `None` when there is no legacy
    /// file or it was already migrated.
    pub async fn migrate_legacy(&self, path: Option<&Path>) -> Result<Option<MigrationDescriptor>> {
        let path = match path.or(self.config.database.legacy_path.as_deref()) {
            Some(p) => p,
            None => return Ok(None),
        };

        match LegacyMigration::prepare(self.db.clone(), path)? {
            Some(migration) => Ok(Some(migration.run().await?)),
            None => Ok(None),
        }
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| BrookError::Config("Could not find data directory".into()))?;
        let brook_dir = data_dir.join("brook");
        std::fs::create_dir_all(&brook_dir)?;
        Ok(brook_dir.join("brook.db"))
    }
}
