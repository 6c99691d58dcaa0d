//! Object stores and secondary indexes on top of SQLite.
//!
//! Records are JSON documents addressed by an encoded primary key. Every
//! active index on a store is maintained on each `put`/`delete`: its key
//! tuple is read from the record fields named by the index key path and
//! stored, encoded, next to the record's primary key. Records missing a key
//! path field (or holding a value that cannot be a key, such as a boolean)
//! are simply absent from that index.

use std::collections::BTreeSet;
use std::fmt;

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::app::{BrookError, Result};
use crate::store::cursor::KeyRange;
use crate::store::keycode::{self, KeyPart};
use crate::store::schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectStore {
    Entries,
    Revisions,
    Feeds,
    Migrations,
}

impl ObjectStore {
    pub const ALL: [ObjectStore; 4] = [
        ObjectStore::Entries,
        ObjectStore::Revisions,
        ObjectStore::Feeds,
        ObjectStore::Migrations,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ObjectStore::Entries => "entries",
            ObjectStore::Revisions => "revisions",
            ObjectStore::Feeds => "feeds",
            ObjectStore::Migrations => "migrations",
        }
    }
}

impl fmt::Display for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A secondary index definition.
#[derive(Debug, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub store: ObjectStore,
    pub key_path: &'static [&'static str],
    /// Emit one key per element of the (single) array field.
    pub multi_entry: bool,
}

impl IndexDef {
    /// Encoded keys this record contributes to the index.
    pub fn keys_for(&self, record: &Value) -> Vec<Vec<u8>> {
        if self.multi_entry {
            let Some(Value::Array(values)) = self.key_path.first().and_then(|f| record.get(*f))
            else {
                return Vec::new();
            };
            let unique: BTreeSet<Vec<u8>> = values
                .iter()
                .filter_map(KeyPart::from_json)
                .map(|part| keycode::encode(&[part]))
                .collect();
            return unique.into_iter().collect();
        }

        let parts: Option<Vec<KeyPart>> = self
            .key_path
            .iter()
            .map(|field| record.get(*field).and_then(KeyPart::from_json))
            .collect();

        match parts {
            Some(parts) => vec![keycode::encode(&parts)],
            None => Vec::new(),
        }
    }

    /// Position of a field within the key path.
    pub fn position(&self, field: &str) -> Option<usize> {
        self.key_path.iter().position(|f| *f == field)
    }
}

/// Typed access to the object stores through one connection or transaction.
///
/// The set of active indexes is read from the catalog when the handle is
/// created and kept current by `create_index`/`drop_index`.
pub struct Txn<'c> {
    conn: &'c Connection,
    indexes: Vec<&'static IndexDef>,
}

impl<'c> Txn<'c> {
    pub fn open(conn: &'c Connection) -> Result<Self> {
        let mut stmt = conn.prepare_cached("SELECT name FROM catalog WHERE kind = 'index'")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut indexes = Vec::with_capacity(names.len());
        for name in names {
            match schema::index_def(&name) {
                Some(def) => indexes.push(def),
                None => tracing::warn!("Ignoring unknown index {} in catalog", name),
            }
        }

        Ok(Self { conn, indexes })
    }

    pub fn conn(&self) -> &'c Connection {
        self.conn
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.iter().any(|def| def.name == name)
    }

    fn store_indexes(&self, store: ObjectStore) -> impl Iterator<Item = &&'static IndexDef> {
        self.indexes.iter().filter(move |def| def.store == store)
    }

    // Catalog

    pub fn has_store(&self, store: ObjectStore) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM catalog WHERE name = ?1 AND kind = 'store'",
                params![store.name()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn create_store(&self, store: ObjectStore) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO catalog (name, kind) VALUES (?1, 'store')",
            params![store.name()],
        )?;
        Ok(())
    }

    /// Create an index and backfill it from existing records.
    pub fn create_index(&mut self, def: &'static IndexDef) -> Result<()> {
        if self.has_index(def.name) {
            return Ok(());
        }
        if !self.has_store(def.store)? {
            return Err(BrookError::Schema(format!(
                "cannot create index {} on missing store {}",
                def.name, def.store
            )));
        }

        self.conn.execute(
            "INSERT OR IGNORE INTO catalog (name, kind) VALUES (?1, 'index')",
            params![def.name],
        )?;

        let mut backfilled = 0;
        for (pk, record) in self.all_raw(def.store)? {
            let pk = keycode::encode(&[pk]);
            for key in def.keys_for(&record) {
                self.insert_index_row(def.name, &key, &pk)?;
                backfilled += 1;
            }
        }

        tracing::debug!("Created index {} ({} keys)", def.name, backfilled);
        self.indexes.push(def);
        Ok(())
    }

    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM index_keys WHERE idx = ?1", params![name])?;
        self.conn.execute(
            "DELETE FROM catalog WHERE name = ?1 AND kind = 'index'",
            params![name],
        )?;
        self.indexes.retain(|def| def.name != name);
        Ok(())
    }

    // Meta values: schema version and id allocators

    pub fn meta_get(&self, key: &str) -> Result<Option<i64>> {
        let value = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn meta_set(&self, key: &str, value: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    /// Allocate the next integer primary key for a store.
    pub fn next_id(&self, store: ObjectStore) -> Result<i64> {
        let key = format!("{}.next_id", store.name());
        let next = match self.meta_get(&key)? {
            Some(next) => next,
            None => self.max_int_key(store)?.unwrap_or(0) + 1,
        };
        self.meta_set(&key, next + 1)?;
        Ok(next)
    }

    /// Make sure ids allocated from now on are greater than `floor`.
    pub fn reserve_ids_through(&self, store: ObjectStore, floor: i64) -> Result<()> {
        let key = format!("{}.next_id", store.name());
        let current = match self.meta_get(&key)? {
            Some(next) => next,
            None => self.max_int_key(store)?.unwrap_or(0) + 1,
        };
        self.meta_set(&key, current.max(floor + 1))
    }

    /// Highest id ever handed out or stored, whichever is larger.
    pub fn id_high_water(&self, store: ObjectStore) -> Result<i64> {
        let stored = self.max_int_key(store)?.unwrap_or(0);
        let allocated = self
            .meta_get(&format!("{}.next_id", store.name()))?
            .map(|next| next - 1)
            .unwrap_or(0);
        Ok(stored.max(allocated))
    }

    pub fn max_int_key(&self, store: ObjectStore) -> Result<Option<i64>> {
        // Integer keys sort before string keys, so the largest integer key is
        // the last key below the string type prefix.
        let upper = keycode::encode_one("");
        let pk: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT pk FROM objects WHERE store = ?1 AND pk < ?2 ORDER BY pk DESC LIMIT 1",
                params![store.name(), upper],
                |row| row.get(0),
            )
            .optional()?;

        match pk {
            Some(pk) => Ok(keycode::decode(&pk)?.first().and_then(KeyPart::as_int)),
            None => Ok(None),
        }
    }

    // Records

    pub fn get_raw(&self, store: ObjectStore, pk: &KeyPart) -> Result<Option<Value>> {
        let pk = keycode::encode(std::slice::from_ref(pk));
        self.get_raw_encoded(store, &pk)
    }

    pub fn get_raw_encoded(&self, store: ObjectStore, pk: &[u8]) -> Result<Option<Value>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT data FROM objects WHERE store = ?1 AND pk = ?2")?;
        let data: Option<String> = stmt
            .query_row(params![store.name(), pk], |row| row.get(0))
            .optional()?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, store: ObjectStore, pk: &KeyPart) -> Result<Option<T>> {
        match self.get_raw(store, pk)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a record, keeping every index of the store current.
    pub fn put_raw(&self, store: ObjectStore, pk: &KeyPart, record: &Value) -> Result<()> {
        let pk = keycode::encode(std::slice::from_ref(pk));

        for def in self.store_indexes(store) {
            self.delete_index_rows(def.name, &pk)?;
            for key in def.keys_for(record) {
                self.insert_index_row(def.name, &key, &pk)?;
            }
        }

        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO objects (store, pk, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(store, pk) DO UPDATE SET data = ?3",
        )?;
        stmt.execute(params![store.name(), pk, serde_json::to_string(record)?])?;
        Ok(())
    }

    pub fn put<T: Serialize>(&self, store: ObjectStore, pk: &KeyPart, record: &T) -> Result<()> {
        self.put_raw(store, pk, &serde_json::to_value(record)?)
    }

    pub fn delete(&self, store: ObjectStore, pk: &KeyPart) -> Result<bool> {
        let pk = keycode::encode(std::slice::from_ref(pk));
        for def in self.store_indexes(store) {
            self.delete_index_rows(def.name, &pk)?;
        }
        let removed = self.conn.execute(
            "DELETE FROM objects WHERE store = ?1 AND pk = ?2",
            params![store.name(), pk],
        )?;
        Ok(removed > 0)
    }

    pub fn clear(&self, store: ObjectStore) -> Result<()> {
        for def in self.store_indexes(store) {
            self.conn
                .execute("DELETE FROM index_keys WHERE idx = ?1", params![def.name])?;
        }
        self.conn
            .execute("DELETE FROM objects WHERE store = ?1", params![store.name()])?;
        Ok(())
    }

    pub fn count(&self, store: ObjectStore) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE store = ?1",
            params![store.name()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn all_raw(&self, store: ObjectStore) -> Result<Vec<(KeyPart, Value)>> {
        self.scan_raw(store, None, None)
    }

    /// Records in primary key order, starting after `after`.
    pub fn scan_raw(
        &self,
        store: ObjectStore,
        after: Option<&KeyPart>,
        limit: Option<usize>,
    ) -> Result<Vec<(KeyPart, Value)>> {
        let after = after.map(|pk| keycode::encode(std::slice::from_ref(pk)));
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let mut stmt = self.conn.prepare_cached(
            "SELECT pk, data FROM objects
             WHERE store = ?1 AND (?2 IS NULL OR pk > ?2)
             ORDER BY pk LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![store.name(), after, limit], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(pk, data)| {
                let pk = keycode::decode(&pk)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| BrookError::Other("empty primary key".into()))?;
                Ok((pk, serde_json::from_str(&data)?))
            })
            .collect()
    }

    // Index access

    /// Number of index rows within a range.
    pub fn count_range(&self, index: &str, range: &KeyRange) -> Result<u64> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT COUNT(*) FROM index_keys WHERE idx = ?1 AND key >= ?2 AND key <= ?3",
        )?;
        let count: i64 =
            stmt.query_row(params![index, range.lower, range.upper], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn insert_index_row(&self, index: &str, key: &[u8], pk: &[u8]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT OR IGNORE INTO index_keys (idx, key, pk) VALUES (?1, ?2, ?3)")?;
        stmt.execute(params![index, key, pk])?;
        Ok(())
    }

    fn delete_index_rows(&self, index: &str, pk: &[u8]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM index_keys WHERE idx = ?1 AND pk = ?2")?;
        stmt.execute(params![index, pk])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::cursor::{IndexCursor, KeyCursor};
    use crate::store::schema::{self, ENTRY_DATE, TAG_NAME};
    use serde_json::json;

    fn engine() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::engine_migrations().to_latest(&mut conn).unwrap();
        conn
    }

    fn with_entry_indexes(conn: &Connection) -> Txn<'_> {
        let mut txn = Txn::open(conn).unwrap();
        txn.create_store(ObjectStore::Entries).unwrap();
        txn.create_index(&ENTRY_DATE).unwrap();
        txn.create_index(&TAG_NAME).unwrap();
        txn
    }

    #[test]
    fn test_put_and_get_round_trip() {
        let conn = engine();
        let txn = with_entry_indexes(&conn);

        let record = json!({"id": 1, "date": 100, "tags": []});
        txn.put_raw(ObjectStore::Entries, &KeyPart::Int(1), &record)
            .unwrap();

        let stored = txn
            .get_raw(ObjectStore::Entries, &KeyPart::Int(1))
            .unwrap()
            .unwrap();
        assert_eq!(stored, record);
        assert!(txn
            .get_raw(ObjectStore::Entries, &KeyPart::Int(2))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_put_replaces_index_rows() {
        let conn = engine();
        let txn = with_entry_indexes(&conn);

        txn.put_raw(ObjectStore::Entries, &KeyPart::Int(1), &json!({"date": 100}))
            .unwrap();
        txn.put_raw(ObjectStore::Entries, &KeyPart::Int(1), &json!({"date": 200}))
            .unwrap();

        let all = KeyRange::all();
        assert_eq!(txn.count_range(ENTRY_DATE.name, &all).unwrap(), 1);

        let mut cursor = IndexCursor::new(&conn, ENTRY_DATE.name, all, Default::default());
        let row = cursor.advance().unwrap().unwrap();
        assert_eq!(keycode::decode(&row.key).unwrap(), vec![KeyPart::Int(200)]);
    }

    #[test]
    fn test_unindexable_values_are_skipped() {
        let conn = engine();
        let txn = with_entry_indexes(&conn);

        txn.put_raw(ObjectStore::Entries, &KeyPart::Int(1), &json!({"date": true}))
            .unwrap();
        txn.put_raw(ObjectStore::Entries, &KeyPart::Int(2), &json!({}))
            .unwrap();

        assert_eq!(txn.count_range(ENTRY_DATE.name, &KeyRange::all()).unwrap(), 0);
        assert_eq!(txn.count(ObjectStore::Entries).unwrap(), 2);
    }

    #[test]
    fn test_multi_entry_index_emits_one_key_per_element() {
        let conn = engine();
        let txn = with_entry_indexes(&conn);

        txn.put_raw(
            ObjectStore::Entries,
            &KeyPart::Int(1),
            &json!({"date": 1, "tags": ["rust", "db", "rust"]}),
        )
        .unwrap();

        assert_eq!(txn.count_range(TAG_NAME.name, &KeyRange::all()).unwrap(), 2);
        let rust = KeyRange::prefix(&keycode::encode_one("rust"));
        assert_eq!(txn.count_range(TAG_NAME.name, &rust).unwrap(), 1);
    }

    #[test]
    fn test_create_index_backfills_existing_records() {
        let conn = engine();
        let mut txn = Txn::open(&conn).unwrap();
        txn.create_store(ObjectStore::Entries).unwrap();

        for id in 1..=3 {
            txn.put_raw(ObjectStore::Entries, &KeyPart::Int(id), &json!({"date": id * 10}))
                .unwrap();
        }
        txn.create_index(&ENTRY_DATE).unwrap();

        assert_eq!(txn.count_range(ENTRY_DATE.name, &KeyRange::all()).unwrap(), 3);

        // The catalog is persisted for later handles
        let reopened = Txn::open(&conn).unwrap();
        assert!(reopened.has_index(ENTRY_DATE.name));
    }

    #[test]
    fn test_create_index_requires_store() {
        let conn = engine();
        let mut txn = Txn::open(&conn).unwrap();
        assert!(txn.create_index(&ENTRY_DATE).is_err());
    }

    #[test]
    fn test_delete_removes_index_rows() {
        let conn = engine();
        let txn = with_entry_indexes(&conn);

        txn.put_raw(ObjectStore::Entries, &KeyPart::Int(1), &json!({"date": 5}))
            .unwrap();
        assert!(txn.delete(ObjectStore::Entries, &KeyPart::Int(1)).unwrap());
        assert!(!txn.delete(ObjectStore::Entries, &KeyPart::Int(1)).unwrap());
        assert_eq!(txn.count_range(ENTRY_DATE.name, &KeyRange::all()).unwrap(), 0);
    }

    #[test]
    fn test_next_id_continues_after_existing_records() {
        let conn = engine();
        let txn = with_entry_indexes(&conn);

        txn.put_raw(ObjectStore::Entries, &KeyPart::Int(41), &json!({}))
            .unwrap();
        assert_eq!(txn.next_id(ObjectStore::Entries).unwrap(), 42);
        assert_eq!(txn.next_id(ObjectStore::Entries).unwrap(), 43);

        txn.reserve_ids_through(ObjectStore::Entries, 100).unwrap();
        assert_eq!(txn.next_id(ObjectStore::Entries).unwrap(), 101);
        assert_eq!(txn.id_high_water(ObjectStore::Entries).unwrap(), 101);
    }

    #[test]
    fn test_max_int_key_ignores_string_keys() {
        let conn = engine();
        let txn = Txn::open(&conn).unwrap();
        txn.create_store(ObjectStore::Feeds).unwrap();

        txn.put_raw(ObjectStore::Feeds, &KeyPart::Str("abc".into()), &json!({}))
            .unwrap();
        assert_eq!(txn.max_int_key(ObjectStore::Feeds).unwrap(), None);

        txn.put_raw(ObjectStore::Feeds, &KeyPart::Int(7), &json!({}))
            .unwrap();
        assert_eq!(txn.max_int_key(ObjectStore::Feeds).unwrap(), Some(7));
    }

    #[test]
    fn test_scan_raw_pages_in_key_order() {
        let conn = engine();
        let txn = with_entry_indexes(&conn);
        for id in [3, 1, 2, 5, 4] {
            txn.put_raw(ObjectStore::Entries, &KeyPart::Int(id), &json!({"id": id}))
                .unwrap();
        }

        let first = txn.scan_raw(ObjectStore::Entries, None, Some(2)).unwrap();
        let ids: Vec<_> = first.iter().map(|(pk, _)| pk.clone()).collect();
        assert_eq!(ids, vec![KeyPart::Int(1), KeyPart::Int(2)]);

        let rest = txn
            .scan_raw(ObjectStore::Entries, Some(&KeyPart::Int(2)), None)
            .unwrap();
        assert_eq!(rest.len(), 3);
    }
}
