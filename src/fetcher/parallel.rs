use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use crate::app::{BrookError, Result};
use crate::domain::Feed;
use crate::fetcher::{FetchResult, Fetcher, Validators};
use crate::ingest::IngestOutcome;
use crate::normalizer::Normalizer;
use crate::store::Database;

pub const DEFAULT_WORKERS: usize = 10;

type ValidatorCache = Arc<Mutex<HashMap<String, Validators>>>;

/// Fetches feeds concurrently and pushes them into the store. Validators
/// from each successful fetch are remembered for the next round.
pub struct ParallelFetcher {
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    semaphore: Arc<Semaphore>,
    validators: ValidatorCache,
}

impl ParallelFetcher {
    pub fn new(fetcher: Arc<dyn Fetcher + Send + Sync>) -> Self {
        Self::with_workers(fetcher, DEFAULT_WORKERS)
    }

    pub fn with_workers(fetcher: Arc<dyn Fetcher + Send + Sync>, workers: usize) -> Self {
        Self {
            fetcher,
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            validators: Arc::default(),
        }
    }

    pub async fn fetch_all(
        &self,
        feeds: Vec<Feed>,
        db: Arc<Database>,
        normalizer: &Normalizer,
    ) -> Vec<(String, Result<IngestOutcome>)> {
        let mut handles = Vec::new();

        for feed in feeds {
            let fetcher = self.fetcher.clone();
            let semaphore = self.semaphore.clone();
            let validators = self.validators.clone();
            let db = db.clone();
            let normalizer = normalizer.clone();

            let handle = tokio::spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        fetch_single_feed(&fetcher, &feed, db, &normalizer, &validators).await
                    }
                    Err(e) => Err(BrookError::Other(e.to_string())),
                };
                (feed.feed_id, result)
            });

            handles.push(handle);
        }

        futures::future::join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(result) => Some(result),
                Err(e) => {
                    tracing::error!("Task join error: {}", e);
                    None
                }
            })
            .collect()
    }
}

fn cached(cache: &ValidatorCache, url: &str) -> Validators {
    let guard = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.get(url).cloned().unwrap_or_default()
}

async fn fetch_single_feed(
    fetcher: &Arc<dyn Fetcher + Send + Sync>,
    feed: &Feed,
    db: Arc<Database>,
    normalizer: &Normalizer,
    cache: &ValidatorCache,
) -> Result<IngestOutcome> {
    let url = feed
        .feed_url
        .as_deref()
        .ok_or_else(|| BrookError::Other(format!("{} has no feed URL", feed.display_title())))?;

    match fetcher.fetch(url, &cached(cache, url)).await? {
        FetchResult::NotModified => {
            tracing::debug!("Feed {} not modified", url);
            Ok(IngestOutcome::default())
        }
        FetchResult::Content { body, validators } => {
            let parsed = normalizer.normalize(&body)?;
            let feed_id = feed.feed_id.clone();

            let outcome =
                tokio::task::spawn_blocking(move || db.push_updated_feed(&feed_id, parsed))
                    .await
                    .map_err(|e| BrookError::Other(e.to_string()))??;

            cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(url.to_string(), validators);

            tracing::info!("Added {} new entries from {}", outcome.new_entries.len(), url);
            Ok(outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::domain::NewFeed;
    use async_trait::async_trait;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Stub Feed</title>
    <item><title>One</title><link>https://example.com/1</link><guid>1</guid></item>
    <item><title>Two</title><link>https://example.com/2</link><guid>2</guid></item>
  </channel>
</rss>"#;

    /// Serves `RSS` once, then answers 304 to requests carrying its etag.
    struct StubFetcher {
        seen: Mutex<Vec<Validators>>,
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, _url: &str, validators: &Validators) -> Result<FetchResult> {
            self.seen.lock().unwrap().push(validators.clone());
            if validators.etag.as_deref() == Some("\"v1\"") {
                return Ok(FetchResult::NotModified);
            }
            Ok(FetchResult::Content {
                body: RSS.as_bytes().to_vec(),
                validators: Validators {
                    etag: Some("\"v1\"".into()),
                    last_modified: None,
                },
            })
        }
    }

    #[test]
    fn test_fetch_all_ingests_then_uses_validators() {
        let db = Arc::new(Database::in_memory(DatabaseConfig::default()).unwrap());
        let feeds = db
            .add_feeds(vec![NewFeed::feed("https://example.com/feed.xml")])
            .unwrap();
        let stub = Arc::new(StubFetcher {
            seen: Mutex::new(Vec::new()),
        });
        let parallel = ParallelFetcher::with_workers(stub.clone(), 2);
        let normalizer = Normalizer::new();

        let first = tokio_test::block_on(parallel.fetch_all(feeds.clone(), db.clone(), &normalizer));
        assert_eq!(first.len(), 1);
        let outcome = first[0].1.as_ref().unwrap();
        assert_eq!(outcome.new_entries.len(), 2);
        assert_eq!(db.get_feed(&feeds[0].feed_id).unwrap().unwrap().title, "Stub Feed");

        let second = tokio_test::block_on(parallel.fetch_all(feeds, db.clone(), &normalizer));
        assert!(second[0].1.as_ref().unwrap().is_unchanged());

        let seen = stub.seen.lock().unwrap();
        assert_eq!(seen[0], Validators::default());
        assert_eq!(seen[1].etag.as_deref(), Some("\"v1\""));
    }

    #[test]
    fn test_folder_without_url_is_an_error() {
        let db = Arc::new(Database::in_memory(DatabaseConfig::default()).unwrap());
        let folder = db.add_feeds(vec![NewFeed::folder("News")]).unwrap();
        let stub = Arc::new(StubFetcher {
            seen: Mutex::new(Vec::new()),
        });
        let parallel = ParallelFetcher::new(stub);

        let results = tokio_test::block_on(parallel.fetch_all(folder, db, &Normalizer::new()));
        assert!(results[0].1.is_err());
    }
}
