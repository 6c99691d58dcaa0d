//! Housekeeping: trashing old entries, trimming long feeds, and purging
//! unsubscribed feeds once their retention window has passed.

use crate::app::Result;
use crate::domain::{now_millis, DeletedState, Feed};
use crate::query::{Filter, SortDirection};
use crate::store::Database;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    /// Entries trashed for being older than the age limit.
    pub aged_out: usize,
    /// Entries trashed for exceeding the per-feed entry limit.
    pub over_limit: usize,
    pub purged_feeds: usize,
    pub purged_entries: usize,
}

impl Database {
    /// Age limit of a feed in days, if entries of it expire at all.
    fn age_limit(&self, feed: &Feed) -> Option<u32> {
        let settings = self.settings();
        match feed.entry_age_limit {
            Some(days) if days > 0 => Some(days),
            Some(_) => None,
            None => settings.expire_entries.then_some(settings.entry_expiration_age),
        }
    }

    fn entry_limit(&self, feed: &Feed) -> Option<u32> {
        let settings = self.settings();
        match feed.max_entries {
            Some(max) if max > 0 => Some(max),
            Some(_) => None,
            None => settings.limit_stored_entries.then_some(settings.max_stored_entries),
        }
    }

    /// Run every expiry rule once. Starred entries never expire.
    pub fn expire_entries(&self) -> Result<ExpiryReport> {
        let mut report = ExpiryReport::default();
        let now = now_millis();

        for feed in self.feeds()? {
            if feed.is_folder {
                continue;
            }

            if feed.is_hidden() {
                let retention = i64::from(self.settings().hidden_feed_retention) * DAY_MS;
                if feed.hidden + retention <= now {
                    tracing::info!("Purging unsubscribed feed {}", feed.display_title());
                    let entries = self.count(
                        &Filter::new()
                            .feeds([feed.feed_id.clone()])
                            .include_hidden()
                            .include_excluded(),
                    )?;
                    self.purge_feed(&feed.feed_id)?;
                    report.purged_feeds += 1;
                    report.purged_entries += entries as usize;
                }
                continue;
            }

            let live = || {
                Filter::new()
                    .feeds([feed.feed_id.clone()])
                    .deleted(DeletedState::No)
                    .starred(false)
                    .include_excluded()
            };

            if let Some(days) = self.age_limit(&feed) {
                let cutoff = now - i64::from(days) * DAY_MS;
                let old = live().between(None, Some(cutoff - 1));
                report.aged_out += self.mark_deleted(&old, DeletedState::Trashed)?;
            }

            if let Some(max) = self.entry_limit(&feed) {
                let surplus = live().sorted(SortDirection::Desc).offset(max as usize);
                report.over_limit += self.trash_page(&surplus)?;
            }
        }

        report.purged_entries += self.purge_deleted()?;

        tracing::info!(
            "Expiry: {} aged out, {} over limit, {} feeds and {} entries purged",
            report.aged_out,
            report.over_limit,
            report.purged_feeds,
            report.purged_entries
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::domain::{FeedUpdate, NewFeed, ParsedItem};

    fn items(dates: &[i64]) -> Vec<ParsedItem> {
        dates
            .iter()
            .enumerate()
            .map(|(i, date)| ParsedItem {
                id: Some(format!("item-{}", i)),
                published: Some(*date),
                ..Default::default()
            })
            .collect()
    }

    fn setup(settings: DatabaseConfig) -> (Database, String) {
        let db = Database::in_memory(settings).unwrap();
        let feed = db
            .add_feeds(vec![NewFeed::feed("https://example.com/feed.xml")])
            .unwrap()
            .remove(0);
        (db, feed.feed_id)
    }

    #[test]
    fn test_old_entries_are_trashed_but_starred_kept() {
        let settings = DatabaseConfig {
            expire_entries: true,
            entry_expiration_age: 10,
            ..Default::default()
        };
        let (db, feed) = setup(settings);
        let now = now_millis();
        let outcome = db
            .push_feed_entries(&feed, &items(&[now - 20 * DAY_MS, now - 15 * DAY_MS, now]))
            .unwrap();
        db.mark_starred(&Filter::new().entries([outcome.all_entries[0]]), true)
            .unwrap();

        let report = db.expire_entries().unwrap();
        assert_eq!(report.aged_out, 1);

        let trashed = db
            .ids(&Filter::new().deleted(DeletedState::Trashed))
            .unwrap();
        assert_eq!(trashed, vec![outcome.all_entries[1]]);
    }

    #[test]
    fn test_entry_limit_keeps_newest() {
        let (db, feed) = setup(DatabaseConfig::default());
        db.modify_feed(
            &feed,
            FeedUpdate {
                max_entries: Some(Some(2)),
                ..Default::default()
            },
        )
        .unwrap();
        let outcome = db
            .push_feed_entries(&feed, &items(&[100, 400, 300, 200]))
            .unwrap();

        let report = db.expire_entries().unwrap();
        assert_eq!(report.over_limit, 2);

        let mut kept = db
            .ids(&Filter::new().deleted(DeletedState::No))
            .unwrap();
        kept.sort_unstable();
        let mut expected = vec![outcome.all_entries[1], outcome.all_entries[2]];
        expected.sort_unstable();
        assert_eq!(kept, expected);
    }

    #[test]
    fn test_hidden_feed_purged_after_retention() {
        let settings = DatabaseConfig {
            hidden_feed_retention: 0,
            ..Default::default()
        };
        let (db, feed) = setup(settings);
        db.push_feed_entries(&feed, &items(&[1, 2])).unwrap();
        db.delete_feed(&feed).unwrap();

        let report = db.expire_entries().unwrap();
        assert_eq!(report.purged_feeds, 1);
        assert_eq!(report.purged_entries, 2);
        assert!(db.feeds().unwrap().is_empty());
    }

    #[test]
    fn test_nothing_expires_by_default() {
        let (db, feed) = setup(DatabaseConfig::default());
        db.push_feed_entries(&feed, &items(&[1, 2, 3])).unwrap();
        assert_eq!(db.expire_entries().unwrap(), ExpiryReport::default());
    }

    #[test]
    fn test_deleted_entries_are_purged() {
        let (db, feed) = setup(DatabaseConfig::default());
        let outcome = db.push_feed_entries(&feed, &items(&[1, 2])).unwrap();
        db.mark_deleted(
            &Filter::new().entries([outcome.all_entries[0]]),
            DeletedState::Deleted,
        )
        .unwrap();

        let report = db.expire_entries().unwrap();
        assert_eq!(report.purged_entries, 1);
        assert_eq!(db.count(&Filter::new()).unwrap(), 1);
    }
}
