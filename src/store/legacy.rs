//! Copying a database left behind by an older installation.
//!
//! The legacy file is first brought to the current layout by the same
//! schema ladder used at startup. Its feeds are merged into the feed list
//! and a [`MigrationDescriptor`] is stored in the `migrations` store. Entries
//! are then copied in batches of ascending legacy id, each batch committed
//! together with the updated descriptor, so an interrupted run resumes where
//! the last committed batch ended. Copied ids are shifted by fixed offsets
//! into a range reserved up front, so entries created while the migration is
//! pending never collide with copied ones.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::app::{BrookError, Result};
use crate::domain::{Entry, EntryChange, StoreEvent};
use crate::store::engine::{ObjectStore, Txn};
use crate::store::keycode::KeyPart;
use crate::store::schema::{self, DB_VERSION};
use crate::store::upgrade::upgrade_entry;
use crate::store::Database;

/// Newest legacy schema this build knows how to read.
pub const LEGACY_MAX_SAFE_VERSION: u32 = DB_VERSION;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationCounts {
    pub entries: u64,
    pub revisions: u64,
    pub feeds: u64,
}

/// Progress of one legacy migration, persisted after every batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationDescriptor {
    pub name: String,
    pub count: MigrationCounts,
    pub processed_entries: u64,
    pub last_transferred_entry: i64,
    pub entry_offset: i64,
    pub revision_offset: i64,
    pub range_top: i64,
    pub completed: bool,
}

impl MigrationDescriptor {
    fn key(&self) -> KeyPart {
        KeyPart::Str(self.name.clone())
    }
}

fn load_descriptor(txn: &Txn<'_>, name: &str) -> Result<Option<MigrationDescriptor>> {
    txn.get(ObjectStore::Migrations, &KeyPart::Str(name.to_string()))
}

/// Schema version of a legacy file, without modifying it.
fn legacy_version(conn: &Connection) -> Result<u32> {
    let has_meta = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
            [],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !has_meta {
        return Err(BrookError::Migration(
            "legacy file is not a feed database".into(),
        ));
    }

    let version: Option<i64> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            [schema::SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.unwrap_or(0) as u32)
}

pub struct LegacyMigration {
    db: Arc<Database>,
    source: Connection,
    path: PathBuf,
    descriptor: MigrationDescriptor,
    batch_size: usize,
}

impl LegacyMigration {
    /// Open the legacy database at `path` and set up (or resume) its
    /// migration. Returns `None` when there is nothing to migrate.
    pub fn prepare(db: Arc<Database>, path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let mut source = Connection::open(path)?;
        let version = legacy_version(&source)?;
        if version > LEGACY_MAX_SAFE_VERSION {
            return Err(BrookError::MigrationRefused {
                version,
                max: LEGACY_MAX_SAFE_VERSION,
            });
        }
        schema::open_schema(&mut source)?;

        let name = path.display().to_string();
        let existing = db.read(|txn| load_descriptor(txn, &name))?;

        let descriptor = match existing {
            Some(descriptor) if descriptor.completed => {
                tracing::info!("Legacy database {} was already migrated", name);
                drop(source);
                remove_legacy_file(path);
                return Ok(None);
            }
            Some(descriptor) => {
                tracing::info!(
                    "Resuming migration of {} at {}/{} entries",
                    name,
                    descriptor.processed_entries,
                    descriptor.count.entries
                );
                descriptor
            }
            None => Self::begin(&db, &source, name)?,
        };

        let batch_size = db.settings().migration_batch_size.max(1);
        Ok(Some(Self {
            db,
            source,
            path: path.to_path_buf(),
            descriptor,
            batch_size,
        }))
    }

    /// Merge the legacy feed list, reserve the id ranges and store a fresh
    /// descriptor, all in one transaction.
    fn begin(db: &Database, source: &Connection, name: String) -> Result<MigrationDescriptor> {
        let legacy = Txn::open(source)?;
        let count = MigrationCounts {
            entries: legacy.count(ObjectStore::Entries)?,
            revisions: legacy.count(ObjectStore::Revisions)?,
            feeds: legacy.count(ObjectStore::Feeds)?,
        };
        let legacy_entry_top = legacy.max_int_key(ObjectStore::Entries)?.unwrap_or(0);
        let legacy_revision_top = legacy.max_int_key(ObjectStore::Revisions)?.unwrap_or(0);

        let mut legacy_feeds = legacy.load_feeds()?;
        legacy_feeds.sort_by_key(|f| f.row_index);

        let mut registry = db.registry_mut()?;
        let mut feeds = registry.feeds().to_vec();
        let mut merged = 0;
        for mut feed in legacy_feeds {
            if feed.feed_id == registry.home() || feeds.iter().any(|f| f.feed_id == feed.feed_id) {
                continue;
            }
            feed.row_index = feeds.len() as i64 + 1;
            feeds.push(feed);
            merged += 1;
        }

        let descriptor = db.save_feed_list(&mut registry, feeds, |txn| {
            let entry_offset = txn.id_high_water(ObjectStore::Entries)?.max(0);
            let revision_offset = txn.id_high_water(ObjectStore::Revisions)?.max(0);
            let descriptor = MigrationDescriptor {
                name,
                count,
                processed_entries: 0,
                last_transferred_entry: 0,
                entry_offset,
                revision_offset,
                range_top: entry_offset + legacy_entry_top,
                completed: false,
            };

            txn.reserve_ids_through(ObjectStore::Entries, descriptor.range_top)?;
            txn.reserve_ids_through(ObjectStore::Revisions, revision_offset + legacy_revision_top)?;
            txn.put(ObjectStore::Migrations, &descriptor.key(), &descriptor)?;
            Ok(descriptor)
        })?;

        tracing::info!(
            "Migrating {} entries and {} feeds ({} new) from {}",
            count.entries,
            count.feeds,
            merged,
            descriptor.name
        );
        Ok(descriptor)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn descriptor(&self) -> &MigrationDescriptor {
        &self.descriptor
    }

    pub fn is_done(&self) -> bool {
        self.descriptor.completed || self.descriptor.processed_entries >= self.descriptor.count.entries
    }

    /// Copy the next batch. Returns `false` once every entry is copied.
    pub fn step(&mut self) -> Result<bool> {
        if self.is_done() {
            return Ok(false);
        }

        let legacy = Txn::open(&self.source)?;
        let after = KeyPart::Int(self.descriptor.last_transferred_entry);
        let batch = legacy.scan_raw(ObjectStore::Entries, Some(&after), Some(self.batch_size))?;

        let Some((KeyPart::Int(last), _)) = batch.last() else {
            return Err(BrookError::Migration(format!(
                "legacy database ran out of entries at {}/{}",
                self.descriptor.processed_entries, self.descriptor.count.entries
            )));
        };
        let last = *last;

        let mut copies = Vec::with_capacity(batch.len());
        for (_, raw) in batch {
            let mut entry: Entry = serde_json::from_value(upgrade_entry(raw))?;
            let mut revisions = Vec::with_capacity(entry.revisions.len());
            for id in &entry.revisions {
                let mut revision = legacy.revision(*id)?.ok_or_else(|| {
                    BrookError::Migration(format!(
                        "legacy entry {} references missing revision {}",
                        entry.id, id
                    ))
                })?;
                revision.id += self.descriptor.revision_offset;
                revisions.push(revision);
            }

            entry.id += self.descriptor.entry_offset;
            entry.revisions = revisions.iter().map(|r| r.id).collect();
            copies.push((entry, revisions));
        }

        let mut next = self.descriptor.clone();
        next.processed_entries += copies.len() as u64;
        next.last_transferred_entry = last;

        self.db.write(|txn| {
            for (entry, revisions) in &copies {
                for revision in revisions {
                    txn.put_revision(revision)?;
                }
                txn.put_entry(entry)?;
            }
            txn.put(ObjectStore::Migrations, &next.key(), &next)
        })?;
        self.descriptor = next;

        let mut feeds: Vec<String> = copies.iter().map(|(e, _)| e.feed_id.clone()).collect();
        feeds.sort();
        feeds.dedup();
        self.db.emit(StoreEvent::EntriesUpdated {
            feeds,
            entries: copies.iter().map(|(e, _)| e.id).collect(),
            change: EntryChange::Content,
        });

        tracing::debug!(
            "Migrated {}/{} entries",
            self.descriptor.processed_entries,
            self.descriptor.count.entries
        );
        Ok(!self.is_done())
    }

    /// Mark the migration complete and remove the legacy file.
    fn finish(mut self) -> Result<MigrationDescriptor> {
        self.descriptor.completed = true;
        let descriptor = self.descriptor.clone();
        self.db
            .write(|txn| txn.put(ObjectStore::Migrations, &descriptor.key(), &descriptor))?;

        tracing::info!(
            "Migration of {} complete: {} entries",
            descriptor.name,
            descriptor.processed_entries
        );
        drop(self.source);
        remove_legacy_file(&self.path);
        Ok(descriptor)
    }

    /// Copy every remaining batch, then finish.
    pub fn run_blocking(mut self) -> Result<MigrationDescriptor> {
        while self.step()? {}
        self.finish()
    }

    /// [`run_blocking`](Self::run_blocking) on the blocking thread pool.
    pub async fn run(self) -> Result<MigrationDescriptor> {
        tokio::task::spawn_blocking(move || self.run_blocking())
            .await
            .map_err(|e| BrookError::Migration(format!("migration task failed: {}", e)))?
    }
}

fn remove_legacy_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!("Could not remove legacy database {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::domain::{NewFeed, ParsedItem};
    use crate::query::Filter;

    /// A legacy file holding two feeds and `n` entries.
    fn legacy_file(dir: &Path, n: usize) -> PathBuf {
        let path = dir.join("legacy.db");
        let db = Database::open(&path, DatabaseConfig::default()).unwrap();
        let feeds = db
            .add_feeds(vec![
                NewFeed::feed("https://a.example.com/feed"),
                NewFeed::feed("https://b.example.com/feed"),
            ])
            .unwrap();

        for (i, feed) in feeds.iter().enumerate() {
            let items: Vec<ParsedItem> = (0..n / 2)
                .map(|j| ParsedItem {
                    id: Some(format!("{}-{}", i, j)),
                    title: Some(format!("Item {} of feed {}", j, i)),
                    published: Some(1_000 + j as i64),
                    ..Default::default()
                })
                .collect();
            db.push_feed_entries(&feed.feed_id, &items).unwrap();
        }
        path
    }

    /// Destination already holding one feed and one entry.
    fn destination() -> Arc<Database> {
        let db = Database::in_memory(DatabaseConfig::default()).unwrap();
        let feed = db
            .add_feeds(vec![NewFeed::feed("https://local.example.com/feed")])
            .unwrap()
            .remove(0);
        db.push_feed_entries(
            &feed.feed_id,
            &[ParsedItem {
                id: Some("local".into()),
                published: Some(5),
                ..Default::default()
            }],
        )
        .unwrap();
        Arc::new(db)
    }

    fn contents(db: &Database) -> Vec<(i64, String, String, Vec<i64>)> {
        let mut all: Vec<_> = db
            .entries(&Filter::new().include_hidden().include_excluded())
            .unwrap()
            .into_iter()
            .map(|f| (f.entry.id, f.entry.feed_id, f.revision.title, f.entry.revisions))
            .collect();
        all.sort();
        all
    }

    #[test]
    fn test_full_migration_copies_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = legacy_file(dir.path(), 10);
        let db = destination();

        let migration = LegacyMigration::prepare(db.clone(), &path)
            .unwrap()
            .unwrap()
            .with_batch_size(3);
        assert_eq!(migration.descriptor().count.entries, 10);
        assert_eq!(migration.descriptor().entry_offset, 1);

        let done = migration.run_blocking().unwrap();
        assert!(done.completed);
        assert_eq!(done.processed_entries, 10);
        assert!(!path.exists());

        assert_eq!(db.feeds().unwrap().len(), 3);
        let all = contents(&db);
        assert_eq!(all.len(), 11);
        // Copied ids sit above the destination's own
        assert_eq!(all.first().map(|e| e.0), Some(1));
        assert_eq!(all.last().map(|e| e.0), Some(11));

        // New entries are allocated past the reserved range
        let next = db.write(|txn| txn.next_id(ObjectStore::Entries)).unwrap();
        assert!(next > done.range_top);
    }

    #[test]
    fn test_interrupted_migration_resumes_to_same_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = legacy_file(dir.path(), 12);
        let copy = dir.path().join("legacy-copy.db");
        std::fs::copy(&path, &copy).unwrap();

        // Uninterrupted
        let straight = destination();
        LegacyMigration::prepare(straight.clone(), &copy)
            .unwrap()
            .unwrap()
            .with_batch_size(5)
            .run_blocking()
            .unwrap();

        // Interrupted after one batch, then resumed from the stored descriptor
        let resumed = destination();
        let mut first = LegacyMigration::prepare(resumed.clone(), &path)
            .unwrap()
            .unwrap()
            .with_batch_size(5);
        assert!(first.step().unwrap());
        assert_eq!(first.descriptor().processed_entries, 5);
        drop(first);

        let second = LegacyMigration::prepare(resumed.clone(), &path)
            .unwrap()
            .unwrap()
            .with_batch_size(5);
        assert_eq!(second.descriptor().processed_entries, 5);
        second.run_blocking().unwrap();

        assert_eq!(contents(&resumed), contents(&straight));
        let tree = |db: &Database| -> Vec<(String, String, i64)> {
            db.feeds()
                .unwrap()
                .into_iter()
                .map(|f| (f.feed_id, f.parent, f.row_index))
                .collect()
        };
        assert_eq!(tree(&resumed), tree(&straight));
    }

    #[test]
    fn test_short_legacy_source_fails_and_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = legacy_file(dir.path(), 10);
        let db = destination();

        let migration = LegacyMigration::prepare(db.clone(), &path)
            .unwrap()
            .unwrap()
            .with_batch_size(3);
        assert_eq!(migration.descriptor().count.entries, 10);
        {
            let conn = Connection::open(&path).unwrap();
            let legacy = Txn::open(&conn).unwrap();
            for id in 7..=10 {
                assert!(legacy.delete(ObjectStore::Entries, &KeyPart::Int(id)).unwrap());
            }
        }

        match migration.run_blocking() {
            Err(BrookError::Migration(_)) => {}
            other => panic!("expected migration error, got {:?}", other.map(|d| d.completed)),
        }
        assert!(path.exists());

        // Committed batches stay, and the next run resumes from them
        assert_eq!(contents(&db).len(), 7);
        let resumed = LegacyMigration::prepare(db.clone(), &path).unwrap().unwrap();
        assert!(!resumed.descriptor().completed);
        assert_eq!(resumed.descriptor().processed_entries, 6);
    }

    #[test]
    fn test_newer_legacy_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = legacy_file(dir.path(), 2);
        {
            let conn = Connection::open(&path).unwrap();
            Txn::open(&conn)
                .unwrap()
                .meta_set(schema::SCHEMA_VERSION_KEY, i64::from(LEGACY_MAX_SAFE_VERSION) + 1)
                .unwrap();
        }

        match LegacyMigration::prepare(destination(), &path) {
            Err(BrookError::MigrationRefused { version, max }) => {
                assert_eq!(version, LEGACY_MAX_SAFE_VERSION + 1);
                assert_eq!(max, LEGACY_MAX_SAFE_VERSION);
            }
            other => panic!("expected refusal, got {:?}", other.map(|m| m.is_some())),
        }
        assert!(path.exists());
    }

    #[test]
    fn test_missing_legacy_file_is_nothing_to_do() {
        let dir = tempfile::tempdir().unwrap();
        let prepared = LegacyMigration::prepare(destination(), &dir.path().join("absent.db")).unwrap();
        assert!(prepared.is_none());
    }

    #[tokio::test]
    async fn test_async_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = legacy_file(dir.path(), 4);
        let db = destination();

        let migration = LegacyMigration::prepare(db.clone(), &path).unwrap().unwrap();
        let done = migration.run().await.unwrap();
        assert_eq!(done.processed_entries, 4);
        assert_eq!(contents(&db).len(), 5);
    }
}
