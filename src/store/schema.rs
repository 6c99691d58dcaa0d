//! Logical schema: object stores, indexes, and the upgrade ladder.
//!
//! The physical tables (`objects`, `index_keys`, `catalog`, `meta`) are
//! created by `rusqlite_migration`. On top of them the logical schema is
//! versioned separately: every version above the stored one is applied in
//! order, so a database left at any historical version reaches the current
//! shape in one pass.

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::app::{BrookError, Result};
use crate::store::engine::{IndexDef, ObjectStore, Txn};
use crate::store::upgrade;

pub const SCHEMA_VERSION_KEY: &str = "schema_version";

pub static ENTRY_DATE: IndexDef = IndexDef {
    name: "date",
    store: ObjectStore::Entries,
    key_path: &["date"],
    multi_entry: false,
};

pub static FEED_DATE: IndexDef = IndexDef {
    name: "feedID_date",
    store: ObjectStore::Entries,
    key_path: &["feed_id", "date"],
    multi_entry: false,
};

pub static ENTRY_FLAGS: IndexDef = IndexDef {
    name: "deleted_starred_read_feedID_date",
    store: ObjectStore::Entries,
    key_path: &["deleted", "starred", "read", "feed_id", "date"],
    multi_entry: false,
};

pub static PRIMARY_KEY: IndexDef = IndexDef {
    name: "primaryKey",
    store: ObjectStore::Entries,
    key_path: &["feed_id", "provided_id", "entry_url"],
    multi_entry: false,
};

pub static ENTRY_URL: IndexDef = IndexDef {
    name: "entryURL",
    store: ObjectStore::Entries,
    key_path: &["entry_url"],
    multi_entry: false,
};

pub static BOOKMARK_ID: IndexDef = IndexDef {
    name: "bookmarkID",
    store: ObjectStore::Entries,
    key_path: &["bookmark_id"],
    multi_entry: false,
};

pub static TAG_NAME: IndexDef = IndexDef {
    name: "tagName",
    store: ObjectStore::Entries,
    key_path: &["tags"],
    multi_entry: true,
};

/// Hash-based identity index used before publisher ids were stored.
pub static PRIMARY_HASH: IndexDef = IndexDef {
    name: "primaryHash",
    store: ObjectStore::Entries,
    key_path: &["primary_hash"],
    multi_entry: false,
};

static KNOWN_INDEXES: [&IndexDef; 8] = [
    &ENTRY_DATE,
    &FEED_DATE,
    &ENTRY_FLAGS,
    &PRIMARY_KEY,
    &ENTRY_URL,
    &BOOKMARK_ID,
    &TAG_NAME,
    &PRIMARY_HASH,
];

pub fn index_def(name: &str) -> Option<&'static IndexDef> {
    KNOWN_INDEXES.iter().copied().find(|def| def.name == name)
}

pub fn engine_migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!(
        "../../migrations/001-engine/up.sql"
    ))])
}

/// Versions of the logical schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchemaVersion {
    /// Nothing created yet.
    Empty = 0,
    /// Entry, revision and feed stores with their first indexes.
    Initial = 1,
    /// Store for legacy migration descriptors.
    MigrationDescriptors = 2,
    /// Identity lookups by `[feed_id, provided_id, entry_url]` replace the
    /// hash index.
    ProvidedIdKey = 3,
    /// Every stored entry rewritten through the record upgrade.
    RecordUpgrade = 4,
}

impl SchemaVersion {
    pub const CURRENT: SchemaVersion = SchemaVersion::RecordUpgrade;

    pub fn from_number(n: u32) -> Option<Self> {
        match n {
            0 => Some(SchemaVersion::Empty),
            1 => Some(SchemaVersion::Initial),
            2 => Some(SchemaVersion::MigrationDescriptors),
            3 => Some(SchemaVersion::ProvidedIdKey),
            4 => Some(SchemaVersion::RecordUpgrade),
            _ => None,
        }
    }

    pub const fn number(self) -> u32 {
        self as u32
    }

    pub fn next(self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }
}

pub const DB_VERSION: u32 = SchemaVersion::CURRENT.number();

/// Apply one rung of the ladder. Every rung is additive and idempotent.
fn apply_rung(txn: &mut Txn<'_>, version: SchemaVersion) -> Result<()> {
    match version {
        SchemaVersion::Empty => {}
        SchemaVersion::Initial => {
            txn.create_store(ObjectStore::Entries)?;
            txn.create_store(ObjectStore::Revisions)?;
            txn.create_store(ObjectStore::Feeds)?;
            for def in [
                &ENTRY_DATE,
                &FEED_DATE,
                &ENTRY_FLAGS,
                &ENTRY_URL,
                &BOOKMARK_ID,
                &TAG_NAME,
                &PRIMARY_HASH,
            ] {
                txn.create_index(def)?;
            }
        }
        SchemaVersion::MigrationDescriptors => {
            txn.create_store(ObjectStore::Migrations)?;
        }
        SchemaVersion::ProvidedIdKey => {
            txn.drop_index(PRIMARY_HASH.name)?;
            txn.create_index(&PRIMARY_KEY)?;
        }
        SchemaVersion::RecordUpgrade => {
            let rewritten = upgrade::upgrade_all_entries(txn)?;
            tracing::info!("Upgraded {} stored entries", rewritten);
        }
    }
    Ok(())
}

/// Bring the logical schema from `from` up to the current version.
pub fn upgrade_schema(txn: &mut Txn<'_>, from: SchemaVersion) -> Result<()> {
    let mut version = from;
    while let Some(next) = version.next() {
        tracing::debug!("Applying schema version {}", next.number());
        apply_rung(txn, next)?;
        version = next;
    }
    txn.meta_set(SCHEMA_VERSION_KEY, i64::from(SchemaVersion::CURRENT.number()))
}

pub fn stored_version(txn: &Txn<'_>) -> Result<u32> {
    Ok(txn.meta_get(SCHEMA_VERSION_KEY)?.unwrap_or(0) as u32)
}

/// Create or upgrade the schema of an opened connection. Returns the version
/// found on disk.
pub fn open_schema(conn: &mut Connection) -> Result<u32> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    engine_migrations().to_latest(conn)?;

    let tx = conn.transaction()?;
    let found = {
        let mut txn = Txn::open(&tx)?;
        let found = stored_version(&txn)?;

        let Some(version) = SchemaVersion::from_number(found) else {
            return Err(BrookError::SchemaTooNew {
                found,
                supported: DB_VERSION,
            });
        };

        if version == SchemaVersion::Empty {
            tracing::info!("No database found, creating schema version {}", DB_VERSION);
        } else if version < SchemaVersion::CURRENT {
            tracing::info!(
                "Upgrading database from version {} to {}",
                found,
                DB_VERSION
            );
        }

        upgrade_schema(&mut txn, version)?;
        found
    };
    tx.commit()?;

    Ok(found)
}
