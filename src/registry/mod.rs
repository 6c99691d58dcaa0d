//! The feed list: an ordered tree of feeds and folders under one home folder.
//!
//! [`FeedRegistry`] is the in-memory snapshot every query consults for feed
//! membership. Changes go through the feed operations on
//! [`Database`](crate::store::Database), which reindex the list, persist it
//! in one transaction, mirror it to the backup files and notify observers.
//!
//! Lock order: the registry lock is always taken before the connection lock.

pub mod backup;
pub mod reindex;

use std::collections::{HashMap, HashSet};

use crate::app::{BrookError, Result};
use crate::domain::{now_millis, DeletedState, EntryChange, Feed, FeedUpdate, NewFeed, StoreEvent};
use crate::store::cursor::{Direction, IndexCursor, KeyCursor, KeyRange};
use crate::store::engine::Txn;
use crate::store::keycode;
use crate::store::schema::FEED_DATE;
use crate::store::Database;

pub use reindex::reindex;

pub struct FeedRegistry {
    home: String,
    feeds: Vec<Feed>,
}

impl FeedRegistry {
    pub fn new(home: &str, feeds: Vec<Feed>) -> Self {
        Self {
            home: home.to_string(),
            feeds: reindex(feeds, home),
        }
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    /// Feeds and folders in tree order.
    pub fn feeds(&self) -> &[Feed] {
        &self.feeds
    }

    pub fn get(&self, feed_id: &str) -> Option<&Feed> {
        self.feeds.iter().find(|f| f.feed_id == feed_id)
    }

    pub fn by_url(&self, url: &str) -> Option<&Feed> {
        self.feeds
            .iter()
            .find(|f| !f.is_folder && f.feed_url.as_deref() == Some(url))
    }

    pub fn is_folder(&self, feed_id: &str) -> bool {
        feed_id == self.home || self.get(feed_id).is_some_and(|f| f.is_folder)
    }

    /// Everything below `feed_id`, in tree order. The home folder's
    /// descendants are the whole list.
    pub fn descendants(&self, feed_id: &str) -> Vec<&Feed> {
        if feed_id == self.home {
            return self.feeds.iter().collect();
        }

        let mut inside: HashSet<&str> = HashSet::from([feed_id]);
        // Pre-order puts every descendant after its ancestor.
        let mut found = Vec::new();
        for feed in &self.feeds {
            if inside.contains(feed.parent.as_str()) {
                inside.insert(feed.feed_id.as_str());
                found.push(feed);
            }
        }
        found
    }

    /// Ids of the feeds a query may return entries from when it names no
    /// feed explicitly.
    pub fn active_feed_ids(&self, include_hidden: bool, include_excluded: bool) -> Vec<String> {
        self.feeds
            .iter()
            .filter(|f| !f.is_folder)
            .filter(|f| include_hidden || !f.is_hidden())
            .filter(|f| include_excluded || !f.omit_in_unread)
            .map(|f| f.feed_id.clone())
            .collect()
    }

    /// Feed ids below each of the given folders.
    pub fn feeds_in_folders<'a>(&self, folders: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        for folder in folders {
            for feed in self.descendants(folder) {
                if !feed.is_folder && seen.insert(feed.feed_id.clone()) {
                    ids.push(feed.feed_id.clone());
                }
            }
        }
        ids
    }

    fn next_folder_id(&self) -> String {
        next_folder_id(&self.home, &self.feeds)
    }

    pub(crate) fn replace(&mut self, feeds: Vec<Feed>) {
        self.feeds = feeds;
    }
}

impl Database {
    /// Reindex `feeds`, store them together with whatever `also` writes in
    /// one transaction, then refresh the snapshot and the backups.
    pub(crate) fn save_feed_list<T>(
        &self,
        registry: &mut FeedRegistry,
        feeds: Vec<Feed>,
        also: impl FnOnce(&mut Txn<'_>) -> Result<T>,
    ) -> Result<T> {
        let feeds = reindex(feeds, registry.home());
        let value = self.write(|txn| {
            let value = also(txn)?;
            txn.save_feeds(&feeds)?;
            Ok(value)
        })?;

        backup::write_all(&self.settings().backup_paths, &feeds);
        registry.replace(feeds);
        self.emit(StoreEvent::FeedListUpdated);
        Ok(value)
    }

    /// Subscribe to feeds and create folders. Returns the stored records in
    /// request order.
    pub fn add_feeds(&self, requests: Vec<NewFeed>) -> Result<Vec<Feed>> {
        let mut registry = self.registry_mut()?;
        let mut feeds = registry.feeds().to_vec();
        let mut added_ids = Vec::with_capacity(requests.len());

        for request in requests {
            let parent = request
                .parent
                .clone()
                .unwrap_or_else(|| registry.home().to_string());
            let parent_known = parent == registry.home()
                || feeds.iter().any(|f| f.is_folder && f.feed_id == parent);
            if !parent_known {
                return Err(BrookError::FeedNotFound(parent));
            }
            let row_index = feeds.len() as i64 + 1;

            if request.is_folder {
                let title = request.title.unwrap_or_else(|| "New folder".to_string());
                let id = next_folder_id(registry.home(), &feeds);
                let mut folder = Feed::new_folder(id.clone(), &title, &parent);
                folder.row_index = row_index;
                folder.date_modified = now_millis();
                tracing::info!("Created folder {} ({})", title, id);
                feeds.push(folder);
                added_ids.push(id);
                continue;
            }

            let url = request
                .url
                .ok_or_else(|| BrookError::Other("feed subscription without a URL".into()))?;
            url::Url::parse(&url)?;

            let existing = feeds
                .iter_mut()
                .find(|f| !f.is_folder && f.feed_url.as_deref() == Some(url.as_str()));
            match existing {
                Some(feed) if feed.is_hidden() => {
                    tracing::info!("Resubscribing to hidden feed {}", url);
                    feed.hidden = 0;
                    feed.parent = parent;
                    feed.row_index = row_index;
                    feed.date_modified = now_millis();
                    added_ids.push(feed.feed_id.clone());
                }
                Some(feed) => {
                    tracing::debug!("Already subscribed to {}", url);
                    added_ids.push(feed.feed_id.clone());
                }
                None => {
                    let mut feed = Feed::new_feed(&url, &parent);
                    if let Some(title) = request.title {
                        feed.title = title;
                    }
                    feed.row_index = row_index;
                    feed.date_modified = now_millis();
                    tracing::info!("Subscribed to {}", url);
                    added_ids.push(feed.feed_id.clone());
                    feeds.push(feed);
                }
            }
        }

        self.save_feed_list(&mut registry, feeds, |_| Ok(()))?;

        added_ids
            .iter()
            .map(|id| {
                registry
                    .get(id)
                    .cloned()
                    .ok_or_else(|| BrookError::FeedNotFound(id.clone()))
            })
            .collect()
    }

    pub fn modify_feed(&self, feed_id: &str, update: FeedUpdate) -> Result<Feed> {
        let mut registry = self.registry_mut()?;
        let mut feeds = registry.feeds().to_vec();

        if let Some(ref parent) = update.parent {
            if parent == feed_id || !registry.is_folder(parent) {
                return Err(BrookError::FeedNotFound(parent.clone()));
            }
            if registry.descendants(feed_id).iter().any(|f| &f.feed_id == parent) {
                return Err(BrookError::FolderCycle {
                    feed: feed_id.to_string(),
                    parent: parent.clone(),
                });
            }
        }
        if update.row_index.is_some() {
            // Leave odd slots free so the moved feed lands before the feed
            // currently holding the requested position.
            for feed in feeds.iter_mut() {
                feed.row_index *= 2;
            }
        }

        let feed = feeds
            .iter_mut()
            .find(|f| f.feed_id == feed_id)
            .ok_or_else(|| BrookError::FeedNotFound(feed_id.to_string()))?;
        update.apply(feed);
        if let Some(row_index) = update.row_index {
            feed.row_index = row_index.max(1) * 2 - 1;
        }
        feed.date_modified = now_millis();

        self.save_feed_list(&mut registry, feeds, |_| Ok(()))?;
        registry
            .get(feed_id)
            .cloned()
            .ok_or_else(|| BrookError::FeedNotFound(feed_id.to_string()))
    }

    /// Unsubscribe from a feed or remove a folder. Feeds are only hidden so
    /// their entries survive until the retention window runs out; folders
    /// are removed outright, and everything below them goes the same way.
    pub fn delete_feed(&self, feed_id: &str) -> Result<()> {
        let mut registry = self.registry_mut()?;
        let target = registry
            .get(feed_id)
            .ok_or_else(|| BrookError::FeedNotFound(feed_id.to_string()))?;

        let mut affected: HashSet<String> = HashSet::from([target.feed_id.clone()]);
        affected.extend(registry.descendants(feed_id).iter().map(|f| f.feed_id.clone()));

        let home = registry.home().to_string();
        let now = now_millis();
        let mut feeds = Vec::with_capacity(registry.feeds().len());
        for feed in registry.feeds() {
            if !affected.contains(&feed.feed_id) {
                feeds.push(feed.clone());
                continue;
            }
            if feed.is_folder {
                tracing::info!("Removing folder {}", feed.display_title());
                continue;
            }
            let mut feed = feed.clone();
            if !feed.is_hidden() {
                tracing::info!("Hiding feed {}", feed.display_title());
                feed.hidden = now;
            }
            if affected.contains(&feed.parent) {
                feed.parent = home.clone();
            }
            feeds.push(feed);
        }

        self.save_feed_list(&mut registry, feeds, |_| Ok(()))
    }

    /// Remove a feed together with all of its entries and revisions.
    pub fn purge_feed(&self, feed_id: &str) -> Result<()> {
        let mut registry = self.registry_mut()?;
        if registry.get(feed_id).is_none() {
            return Err(BrookError::FeedNotFound(feed_id.to_string()));
        }
        let feeds: Vec<Feed> = registry
            .feeds()
            .iter()
            .filter(|f| f.feed_id != feed_id)
            .cloned()
            .collect();

        let removed = self.save_feed_list(&mut registry, feeds, |txn| {
            let range = KeyRange::prefix(&keycode::encode_one(feed_id));
            let mut cursor = IndexCursor::new(txn.conn(), FEED_DATE.name, range, Direction::Next);
            let mut pks = Vec::new();
            while let Some(row) = cursor.advance()? {
                pks.push(row.pk);
            }

            let mut removed = Vec::with_capacity(pks.len());
            for pk in pks {
                if let Some(entry) = txn.entry_by_pk(&pk)? {
                    txn.delete_entry(&entry)?;
                    removed.push(entry.id);
                }
            }
            Ok(removed)
        })?;

        tracing::info!("Purged feed {} and {} entries", feed_id, removed.len());
        if !removed.is_empty() {
            self.emit(StoreEvent::EntriesUpdated {
                feeds: vec![feed_id.to_string()],
                entries: removed,
                change: EntryChange::Deleted(DeletedState::Deleted),
            });
        }
        Ok(())
    }

    /// Feed records keyed by id, for callers that resolve many ids at once.
    pub fn feed_map(&self) -> Result<HashMap<String, Feed>> {
        Ok(self
            .registry()?
            .feeds()
            .iter()
            .map(|f| (f.feed_id.clone(), f.clone()))
            .collect())
    }
}

/// Folder ids are small integers, one above the highest in use.
fn next_folder_id(home: &str, feeds: &[Feed]) -> String {
    let highest = feeds
        .iter()
        .filter(|f| f.is_folder)
        .map(|f| f.feed_id.as_str())
        .chain(std::iter::once(home))
        .filter_map(|id| id.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    (highest + 1).to_string()
}
