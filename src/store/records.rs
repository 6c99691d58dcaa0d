//! Typed record access for entries, revisions and feeds.

use std::collections::HashSet;

use crate::app::{BrookError, Result};
use crate::domain::{Entry, Feed, FullEntry, Revision};
use crate::store::cursor::{Direction, IndexCursor, KeyCursor, KeyRange};
use crate::store::engine::{ObjectStore, Txn};
use crate::store::keycode::{self, KeyPart};
use crate::store::schema::PRIMARY_KEY;
use crate::store::upgrade::upgrade_entry;

impl Txn<'_> {
    pub fn entry(&self, id: i64) -> Result<Option<Entry>> {
        self.entry_by_pk(&keycode::encode_one(id))
    }

    /// Read an entry by encoded primary key, upgrading old layouts on the fly.
    pub fn entry_by_pk(&self, pk: &[u8]) -> Result<Option<Entry>> {
        match self.get_raw_encoded(ObjectStore::Entries, pk)? {
            Some(raw) => Ok(Some(serde_json::from_value(upgrade_entry(raw))?)),
            None => Ok(None),
        }
    }

    /// Look an entry up through the `[feed_id, provided_id, entry_url]`
    /// identity index, skipping entries already in `claimed`. Without a URL
    /// the first unclaimed entry with that publisher id is returned.
    pub fn find_by_identity(
        &self,
        feed_id: &str,
        provided_id: &str,
        entry_url: Option<&str>,
        claimed: &HashSet<i64>,
    ) -> Result<Option<Entry>> {
        let mut parts = vec![KeyPart::from(feed_id), KeyPart::from(provided_id)];
        if let Some(url) = entry_url {
            parts.push(KeyPart::from(url));
        }
        let range = KeyRange::prefix(&keycode::encode(&parts));
        let mut cursor = IndexCursor::new(self.conn(), PRIMARY_KEY.name, range, Direction::Next)
            .with_page_size(claimed.len() + 1);

        while let Some(row) = cursor.advance()? {
            let id = row.primary_key()?.and_then(|pk| pk.as_int());
            if id.is_some_and(|id| claimed.contains(&id)) {
                continue;
            }
            return self.entry_by_pk(&row.pk);
        }
        Ok(None)
    }

    pub fn put_entry(&self, entry: &Entry) -> Result<()> {
        self.put(ObjectStore::Entries, &KeyPart::Int(entry.id), entry)
    }

    pub fn revision(&self, id: i64) -> Result<Option<Revision>> {
        self.get(ObjectStore::Revisions, &KeyPart::Int(id))
    }

    pub fn put_revision(&self, revision: &Revision) -> Result<()> {
        self.put(ObjectStore::Revisions, &KeyPart::Int(revision.id), revision)
    }

    /// The entry's current revision. An entry without one is corrupt.
    pub fn current_revision(&self, entry: &Entry) -> Result<Revision> {
        let id = entry.current_revision().ok_or_else(|| {
            BrookError::Other(format!("entry {} has no revision", entry.id))
        })?;
        self.revision(id)?.ok_or_else(|| {
            BrookError::Other(format!("revision {} of entry {} is missing", id, entry.id))
        })
    }

    pub fn full_entry(&self, entry: Entry) -> Result<FullEntry> {
        let revision = self.current_revision(&entry)?;
        Ok(FullEntry { entry, revision })
    }

    /// Remove an entry together with its revisions.
    pub fn delete_entry(&self, entry: &Entry) -> Result<()> {
        for revision in &entry.revisions {
            self.delete(ObjectStore::Revisions, &KeyPart::Int(*revision))?;
        }
        self.delete(ObjectStore::Entries, &KeyPart::Int(entry.id))?;
        Ok(())
    }

    pub fn load_feeds(&self) -> Result<Vec<Feed>> {
        self.all_raw(ObjectStore::Feeds)?
            .into_iter()
            .map(|(_, raw)| Ok(serde_json::from_value(raw)?))
            .collect()
    }

    /// Replace the stored feed list.
    pub fn save_feeds(&self, feeds: &[Feed]) -> Result<()> {
        self.clear(ObjectStore::Feeds)?;
        for feed in feeds {
            self.put(ObjectStore::Feeds, &KeyPart::Str(feed.feed_id.clone()), feed)?;
        }
        Ok(())
    }
}
