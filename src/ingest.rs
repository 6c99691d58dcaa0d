//! Merging freshly parsed feed items into the store.
//!
//! Items are matched against stored entries of the same feed, first by
//! publisher id and then, for whatever is left, by URL among entries that
//! never had a publisher id. Matched entries are updated only when the item
//! reports a strictly newer modification time; everything unmatched becomes
//! a new entry.

use std::collections::HashSet;

use crate::app::{BrookError, Result};
use crate::domain::{
    now_millis, Entry, EntryChange, ParsedFeed, ParsedItem, Revision, StoreEvent,
};
use crate::store::engine::{ObjectStore, Txn};
use crate::store::Database;

/// Entry ids touched by one ingest, in item order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// The entry each accepted item ended up as.
    pub all_entries: Vec<i64>,
    pub new_entries: Vec<i64>,
    /// Existing entries whose content or identity changed.
    pub updated_entries: Vec<i64>,
}

impl IngestOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.new_entries.is_empty() && self.updated_entries.is_empty()
    }

    fn changed_ids(&self) -> Vec<i64> {
        let mut ids = self.new_entries.clone();
        ids.extend(&self.updated_entries);
        ids.sort_unstable();
        ids
    }
}

/// Drop later items repeating a publisher id; repeated URLs are only noted.
fn accepted_items<'a>(feed_id: &str, items: &'a [ParsedItem]) -> Vec<&'a ParsedItem> {
    let mut ids = HashSet::new();
    let mut urls = HashSet::new();
    let mut accepted = Vec::with_capacity(items.len());

    for item in items {
        let id = item.provided_id();
        if !id.is_empty() && !ids.insert(id) {
            tracing::warn!("Feed {} repeats item id {:?}, dropping duplicate", feed_id, id);
            continue;
        }
        let url = item.entry_url();
        if !url.is_empty() && !urls.insert(url) {
            tracing::debug!("Feed {} repeats item URL {}", feed_id, url);
        }
        accepted.push(item);
    }
    accepted
}

fn ingest(
    txn: &Txn<'_>,
    feed_id: &str,
    items: &[ParsedItem],
    mark_unread: bool,
) -> Result<IngestOutcome> {
    let items = accepted_items(feed_id, items);
    let mut matches: Vec<Option<Entry>> = vec![None; items.len()];
    let mut claimed = HashSet::new();

    // Pass 1: publisher ids.
    for (slot, item) in matches.iter_mut().zip(&items) {
        let id = item.provided_id();
        if id.is_empty() {
            continue;
        }
        if let Some(entry) = txn.find_by_identity(feed_id, id, None, &claimed)? {
            claimed.insert(entry.id);
            *slot = Some(entry);
        }
    }

    // Pass 2: URLs, among entries stored without a publisher id.
    for (slot, item) in matches.iter_mut().zip(&items) {
        let url = item.entry_url();
        if slot.is_some() || url.is_empty() {
            continue;
        }
        if let Some(entry) = txn.find_by_identity(feed_id, "", Some(url), &claimed)? {
            claimed.insert(entry.id);
            *slot = Some(entry);
        }
    }

    let mut outcome = IngestOutcome::default();
    let now = now_millis();

    for (matched, item) in matches.into_iter().zip(items) {
        match matched {
            Some(entry) => {
                let id = entry.id;
                if update_entry(txn, entry, item, mark_unread)? {
                    outcome.updated_entries.push(id);
                }
                outcome.all_entries.push(id);
            }
            None => {
                let id = insert_entry(txn, feed_id, item, now)?;
                outcome.new_entries.push(id);
                outcome.all_entries.push(id);
            }
        }
    }

    Ok(outcome)
}

fn update_entry(txn: &Txn<'_>, mut entry: Entry, item: &ParsedItem, mark_unread: bool) -> Result<bool> {
    let mut entry_changed = false;

    if entry.provided_id.is_empty() && !item.provided_id().is_empty() {
        entry.provided_id = item.provided_id().to_string();
        entry_changed = true;
    }

    let mut revision = txn.current_revision(&entry)?;
    let newer = item
        .modified()
        .filter(|modified| *modified > revision.updated);

    if let Some(modified) = newer {
        tracing::debug!("Entry {} was updated by its publisher", entry.id);
        revision.title = item.title.clone().unwrap_or_default();
        revision.content = item.body().to_string();
        revision.authors = item.authors.clone();
        revision.updated = modified;
        txn.put_revision(&revision)?;

        if mark_unread && entry.read {
            entry.read = false;
            entry.marked_unread_on_update = true;
            entry_changed = true;
        }
    }

    if entry_changed {
        txn.put_entry(&entry)?;
    }
    Ok(entry_changed || newer.is_some())
}

fn insert_entry(txn: &Txn<'_>, feed_id: &str, item: &ParsedItem, now: i64) -> Result<i64> {
    let id = txn.next_id(ObjectStore::Entries)?;
    let revision_id = txn.next_id(ObjectStore::Revisions)?;
    let date = item.published.or(item.updated).unwrap_or(now);

    let mut entry = Entry::new(id, feed_id, revision_id);
    entry.provided_id = item.provided_id().to_string();
    entry.entry_url = item.entry_url().to_string();
    entry.date = date;

    let revision = Revision {
        id: revision_id,
        title: item.title.clone().unwrap_or_default(),
        content: item.body().to_string(),
        authors: item.authors.clone(),
        updated: item.modified().unwrap_or(date),
    };

    txn.put_revision(&revision)?;
    txn.put_entry(&entry)?;
    Ok(id)
}

impl Database {
    fn mark_unread_setting(&self, feed_id: &str) -> Result<bool> {
        let registry = self.registry()?;
        let feed = registry
            .get(feed_id)
            .ok_or_else(|| BrookError::FeedNotFound(feed_id.to_string()))?;
        Ok(feed
            .mark_modified_entries_unread
            .unwrap_or(self.settings().mark_modified_entries_unread))
    }

    fn announce(&self, feed_id: &str, outcome: &IngestOutcome) {
        if outcome.is_unchanged() {
            return;
        }
        self.emit(StoreEvent::EntriesUpdated {
            feeds: vec![feed_id.to_string()],
            entries: outcome.changed_ids(),
            change: EntryChange::Content,
        });
    }

    /// Store a batch of items for one feed in a single transaction.
    pub fn push_feed_entries(&self, feed_id: &str, items: &[ParsedItem]) -> Result<IngestOutcome> {
        let mark_unread = self.mark_unread_setting(feed_id)?;
        let outcome = self.write(|txn| ingest(txn, feed_id, items, mark_unread))?;

        tracing::debug!(
            "Ingested {} items for {}: {} new, {} updated",
            items.len(),
            feed_id,
            outcome.new_entries.len(),
            outcome.updated_entries.len()
        );
        self.announce(feed_id, &outcome);
        Ok(outcome)
    }

    /// Store a freshly fetched feed: its items, and its metadata on the
    /// feed record, in one transaction.
    pub fn push_updated_feed(&self, feed_id: &str, parsed: ParsedFeed) -> Result<IngestOutcome> {
        let mut registry = self.registry_mut()?;
        let mut feeds = registry.feeds().to_vec();
        let feed = feeds
            .iter_mut()
            .find(|f| f.feed_id == feed_id && !f.is_folder)
            .ok_or_else(|| BrookError::FeedNotFound(feed_id.to_string()))?;

        let mark_unread = feed
            .mark_modified_entries_unread
            .unwrap_or(self.settings().mark_modified_entries_unread);

        let now = now_millis();
        let placeholder = feed.title.is_empty() || feed.feed_url.as_deref() == Some(feed.title.as_str());
        if let Some(title) = parsed.title.as_ref().filter(|t| !t.is_empty()) {
            if placeholder {
                feed.title = title.clone();
            }
        }
        if parsed.subtitle.is_some() {
            feed.subtitle = parsed.subtitle.clone();
        }
        if parsed.website_url.is_some() {
            feed.website_url = parsed.website_url.clone();
        }
        if parsed.language.is_some() {
            feed.language = parsed.language.clone();
        }
        if let Some(oldest) = parsed
            .items
            .iter()
            .filter_map(|item| item.published.or(item.updated))
            .min()
        {
            feed.oldest_entry_date = Some(oldest);
        }
        feed.last_updated = now;
        feed.date_modified = now;

        let outcome = self.save_feed_list(&mut registry, feeds, |txn| {
            ingest(txn, feed_id, &parsed.items, mark_unread)
        })?;
        drop(registry);

        tracing::info!(
            "Updated feed {}: {} new, {} updated",
            feed_id,
            outcome.new_entries.len(),
            outcome.updated_entries.len()
        );
        self.announce(feed_id, &outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::domain::{Feed, NewFeed};
    use crate::query::Filter;

    const URL: &str = "https://example.com/feed.xml";

    fn db_with_feed(settings: DatabaseConfig) -> (Database, String) {
        let db = Database::in_memory(settings).unwrap();
        db.add_feeds(vec![NewFeed::feed(URL)]).unwrap();
        (db, Feed::generate_id(URL))
    }

    fn item(id: Option<&str>, link: &str, title: &str, updated: i64) -> ParsedItem {
        ParsedItem {
            id: id.map(str::to_string),
            link: Some(link.to_string()),
            title: Some(title.to_string()),
            content: Some(format!("{} body", title)),
            published: Some(1_000),
            updated: Some(updated),
            ..Default::default()
        }
    }

    fn snapshot(db: &Database) -> Vec<(Entry, Revision)> {
        db.entries(&Filter::new().include_hidden())
            .unwrap()
            .into_iter()
            .map(|f| (f.entry, f.revision))
            .collect()
    }

    #[test]
    fn test_double_ingest_is_a_noop() {
        let (db, feed) = db_with_feed(DatabaseConfig::default());
        let items = vec![
            item(Some("a"), "https://example.com/a", "A", 2_000),
            item(None, "https://example.com/b", "B", 2_000),
        ];

        let first = db.push_feed_entries(&feed, &items).unwrap();
        assert_eq!(first.new_entries.len(), 2);
        let before = snapshot(&db);

        let mut rx = db.subscribe();
        let second = db.push_feed_entries(&feed, &items).unwrap();
        assert!(second.is_unchanged());
        assert_eq!(second.all_entries, first.all_entries);
        assert_eq!(snapshot(&db), before);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_regressing_update_time_changes_nothing() {
        let (db, feed) = db_with_feed(DatabaseConfig::default());
        db.push_feed_entries(&feed, &[item(Some("a"), "https://example.com/a", "New", 5_000)])
            .unwrap();

        let outcome = db
            .push_feed_entries(&feed, &[item(Some("a"), "https://example.com/a", "Old", 4_000)])
            .unwrap();
        assert!(outcome.is_unchanged());

        let (_, revision) = snapshot(&db).remove(0);
        assert_eq!(revision.title, "New");
        assert_eq!(revision.updated, 5_000);
    }

    #[test]
    fn test_newer_update_rewrites_revision_and_marks_unread() {
        let (db, feed) = db_with_feed(DatabaseConfig::default());
        let first = db
            .push_feed_entries(&feed, &[item(Some("a"), "https://example.com/a", "One", 2_000)])
            .unwrap();
        db.mark_read(&Filter::new().entries(first.all_entries.clone()), true)
            .unwrap();

        let second = db
            .push_feed_entries(&feed, &[item(Some("a"), "https://example.com/a", "Two", 3_000)])
            .unwrap();
        assert_eq!(second.updated_entries, first.all_entries);

        let (entry, revision) = snapshot(&db).remove(0);
        assert_eq!(revision.title, "Two");
        assert!(!entry.read);
        assert!(entry.marked_unread_on_update);
    }

    #[test]
    fn test_feed_override_keeps_entries_read() {
        let (db, feed) = db_with_feed(DatabaseConfig::default());
        db.modify_feed(
            &feed,
            crate::domain::FeedUpdate {
                mark_modified_entries_unread: Some(Some(false)),
                ..Default::default()
            },
        )
        .unwrap();

        let first = db
            .push_feed_entries(&feed, &[item(Some("a"), "https://example.com/a", "One", 2_000)])
            .unwrap();
        db.mark_read(&Filter::new().entries(first.all_entries), true)
            .unwrap();
        db.push_feed_entries(&feed, &[item(Some("a"), "https://example.com/a", "Two", 3_000)])
            .unwrap();

        let (entry, revision) = snapshot(&db).remove(0);
        assert_eq!(revision.title, "Two");
        assert!(entry.read);
    }

    #[test]
    fn test_url_match_backfills_provided_id() {
        let (db, feed) = db_with_feed(DatabaseConfig::default());
        let first = db
            .push_feed_entries(&feed, &[item(None, "https://example.com/a", "A", 2_000)])
            .unwrap();

        let second = db
            .push_feed_entries(&feed, &[item(Some("guid-a"), "https://example.com/a", "A", 2_000)])
            .unwrap();
        assert!(second.new_entries.is_empty());
        assert_eq!(second.all_entries, first.all_entries);

        let (entry, _) = snapshot(&db).remove(0);
        assert_eq!(entry.provided_id, "guid-a");

        // From now on the publisher id alone identifies it
        let third = db
            .push_feed_entries(&feed, &[item(Some("guid-a"), "https://example.com/moved", "A", 2_000)])
            .unwrap();
        assert_eq!(third.all_entries, first.all_entries);
    }

    #[test]
    fn test_duplicate_ids_in_batch_are_dropped() {
        let (db, feed) = db_with_feed(DatabaseConfig::default());
        let outcome = db
            .push_feed_entries(
                &feed,
                &[
                    item(Some("a"), "https://example.com/a", "First", 2_000),
                    item(Some("a"), "https://example.com/a2", "Second", 2_000),
                    item(None, "https://example.com/b", "B", 2_000),
                    item(None, "https://example.com/b", "B again", 2_000),
                ],
            )
            .unwrap();

        // The repeated id is dropped; the repeated URL is kept
        assert_eq!(outcome.new_entries.len(), 3);
        let titles: Vec<String> = snapshot(&db).into_iter().map(|(_, r)| r.title).collect();
        assert!(titles.contains(&"First".to_string()));
        assert!(!titles.contains(&"Second".to_string()));
    }

    #[test]
    fn test_repeated_url_without_id_is_stable_across_ingests() {
        let (db, feed) = db_with_feed(DatabaseConfig::default());
        let items = vec![
            item(None, "https://example.com/b", "B", 2_000),
            item(None, "https://example.com/b", "B again", 2_000),
        ];

        let first = db.push_feed_entries(&feed, &items).unwrap();
        assert_eq!(first.new_entries.len(), 2);

        for _ in 0..3 {
            let again = db.push_feed_entries(&feed, &items).unwrap();
            assert!(again.new_entries.is_empty());
            assert!(again.updated_entries.is_empty());
            assert_eq!(again.all_entries, first.all_entries);
        }
        assert_eq!(snapshot(&db).len(), 2);
    }

    #[test]
    fn test_entry_date_falls_back_to_update_then_now() {
        let (db, feed) = db_with_feed(DatabaseConfig::default());
        let undated = ParsedItem {
            id: Some("x".into()),
            ..Default::default()
        };
        let updated_only = ParsedItem {
            id: Some("y".into()),
            updated: Some(42),
            ..Default::default()
        };
        let before = now_millis();
        db.push_feed_entries(&feed, &[undated, updated_only]).unwrap();

        let entries = snapshot(&db);
        let x = entries.iter().find(|(e, _)| e.provided_id == "x").unwrap();
        let y = entries.iter().find(|(e, _)| e.provided_id == "y").unwrap();
        assert!(x.0.date >= before);
        assert_eq!(y.0.date, 42);
    }

    #[test]
    fn test_push_updated_feed_updates_metadata() {
        let (db, feed) = db_with_feed(DatabaseConfig::default());
        let mut rx = db.subscribe();

        let parsed = ParsedFeed {
            title: Some("Example".into()),
            website_url: Some("https://example.com/".into()),
            items: vec![
                item(Some("a"), "https://example.com/a", "A", 2_000),
                ParsedItem {
                    published: Some(500),
                    ..item(Some("b"), "https://example.com/b", "B", 600)
                },
            ],
            ..Default::default()
        };
        let outcome = db.push_updated_feed(&feed, parsed).unwrap();
        assert_eq!(outcome.new_entries.len(), 2);

        let stored = db.get_feed(&feed).unwrap().unwrap();
        assert_eq!(stored.title, "Example");
        assert_eq!(stored.website_url.as_deref(), Some("https://example.com/"));
        assert_eq!(stored.oldest_entry_date, Some(500));
        assert!(stored.last_updated > 0);

        assert_eq!(rx.try_recv().unwrap(), StoreEvent::FeedListUpdated);
        match rx.try_recv().unwrap() {
            StoreEvent::EntriesUpdated { change, entries, .. } => {
                assert_eq!(change, EntryChange::Content);
                assert_eq!(entries.len(), 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_feed_is_rejected() {
        let db = Database::in_memory(DatabaseConfig::default()).unwrap();
        assert!(matches!(
            db.push_feed_entries("nope", &[]),
            Err(BrookError::FeedNotFound(_))
        ));
    }
}
