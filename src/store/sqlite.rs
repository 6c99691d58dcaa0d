use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::app::{BrookError, Result};
use crate::config::DatabaseConfig;
use crate::domain::{Feed, StoreEvent};
use crate::registry::{backup, FeedRegistry};
use crate::store::engine::Txn;
use crate::store::schema;

const EVENT_CAPACITY: usize = 256;

/// The store context: owns the connection, the feed-list snapshot and the
/// change notification channel. Every store operation is a method on it.
pub struct Database {
    conn: Mutex<Connection>,
    registry: RwLock<FeedRegistry>,
    events: broadcast::Sender<StoreEvent>,
    settings: DatabaseConfig,
    path: Option<PathBuf>,
    found_version: u32,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P, settings: DatabaseConfig) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn, settings, Some(path.as_ref().to_path_buf()))
    }

    pub fn in_memory(settings: DatabaseConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, settings, None)
    }

    fn from_connection(
        mut conn: Connection,
        settings: DatabaseConfig,
        path: Option<PathBuf>,
    ) -> Result<Self> {
        let found_version = schema::open_schema(&mut conn)?;

        let registry = {
            let txn = Txn::open(&conn)?;
            let mut stored = txn.load_feeds()?;
            let mut restored = false;
            if stored.is_empty() {
                if let Some(feeds) = backup::read_first(&settings.backup_paths) {
                    tracing::info!("Restoring {} feeds from backup", feeds.len());
                    stored = feeds;
                    restored = true;
                }
            }
            // Stored order is by feed id; the registry restores tree order.
            stored.sort_by_key(|f| f.row_index);

            let registry = FeedRegistry::new(&settings.home_folder, stored.clone());
            if restored || registry.feeds() != stored.as_slice() {
                txn.save_feeds(registry.feeds())?;
            }
            registry
        };

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            conn: Mutex::new(conn),
            registry: RwLock::new(registry),
            events,
            settings,
            path,
            found_version,
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BrookError::LockPoisoned("database connection"))
    }

    pub(crate) fn registry(&self) -> Result<RwLockReadGuard<'_, FeedRegistry>> {
        self.registry
            .read()
            .map_err(|_| BrookError::LockPoisoned("feed registry"))
    }

    pub(crate) fn registry_mut(&self) -> Result<RwLockWriteGuard<'_, FeedRegistry>> {
        self.registry
            .write()
            .map_err(|_| BrookError::LockPoisoned("feed registry"))
    }

    /// Run `f` in one write transaction, committing only if it succeeds.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut Txn<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = {
            let mut txn = Txn::open(&tx)?;
            f(&mut txn)?
        };
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` against the store without opening a write transaction.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Txn<'_>) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        let txn = Txn::open(&conn)?;
        f(&txn)
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        // Sending fails only when nobody is subscribed.
        let _ = self.events.send(event);
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &DatabaseConfig {
        &self.settings
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Schema version found on disk when the database was opened.
    pub fn found_version(&self) -> u32 {
        self.found_version
    }

    /// Snapshot of the feed list in tree order.
    pub fn feeds(&self) -> Result<Vec<Feed>> {
        Ok(self.registry()?.feeds().to_vec())
    }

    pub fn get_feed(&self, feed_id: &str) -> Result<Option<Feed>> {
        Ok(self.registry()?.get(feed_id).cloned())
    }

    pub fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        Ok(self.registry()?.by_url(url).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewFeed;

    fn settings_with_backups(dir: &Path) -> DatabaseConfig {
        DatabaseConfig {
            backup_paths: vec![dir.join("a/feeds.json"), dir.join("b/feeds.json")],
            ..Default::default()
        }
    }

    #[test]
    fn test_open_file_database_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brook.db");

        let db = Database::open(&path, DatabaseConfig::default()).unwrap();
        assert_eq!(db.found_version(), 0);
        db.add_feeds(vec![NewFeed::feed("https://example.com/feed.xml")])
            .unwrap();
        drop(db);

        let db = Database::open(&path, DatabaseConfig::default()).unwrap();
        assert_eq!(db.found_version(), schema::DB_VERSION);
        assert_eq!(db.feeds().unwrap().len(), 1);
        assert_eq!(db.path(), Some(path.as_path()));
    }

    #[test]
    fn test_empty_store_bootstraps_from_backup() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_with_backups(dir.path());

        let db = Database::in_memory(settings.clone()).unwrap();
        db.add_feeds(vec![
            NewFeed::folder("News"),
            NewFeed::feed("https://example.com/feed.xml"),
        ])
        .unwrap();
        assert!(dir.path().join("a/feeds.json").exists());
        assert!(dir.path().join("b/feeds.json").exists());
        let expected = db.feeds().unwrap();
        drop(db);

        // A fresh, empty store picks the feed list up from the mirrors
        let restored = Database::in_memory(settings).unwrap();
        assert_eq!(restored.feeds().unwrap(), expected);
    }

    #[test]
    fn test_subscribe_receives_feed_list_updates() {
        let db = Database::in_memory(DatabaseConfig::default()).unwrap();
        let mut rx = db.subscribe();

        db.add_feeds(vec![NewFeed::feed("https://example.com/feed.xml")])
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::FeedListUpdated);
    }

    #[test]
    fn test_write_rolls_back_on_error() {
        let db = Database::in_memory(DatabaseConfig::default()).unwrap();

        let result: Result<()> = db.write(|txn| {
            txn.meta_set("marker", 1)?;
            Err(BrookError::Other("boom".into()))
        });
        assert!(result.is_err());

        let marker = db.read(|txn| txn.meta_get("marker")).unwrap();
        assert_eq!(marker, None);
    }

    #[test]
    fn test_poisoned_connection_is_reported() {
        let db = Database::in_memory(DatabaseConfig::default()).unwrap();

        std::thread::scope(|s| {
            let worker = s.spawn(|| {
                let _conn = db.lock().unwrap();
                panic!("worker died holding the connection");
            });
            assert!(worker.join().is_err());
        });

        assert!(matches!(
            db.read(|txn| txn.meta_get("marker")),
            Err(BrookError::LockPoisoned("database connection"))
        ));
    }
}
