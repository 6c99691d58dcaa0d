pub mod http_fetcher;
pub mod parallel;

use async_trait::async_trait;

use crate::app::Result;

#[derive(Debug)]
pub enum FetchResult {
    /// New content fetched successfully
    Content {
        body: Vec<u8>,
        validators: Validators,
    },
    /// Content not modified (HTTP 304)
    NotModified,
}

/// Conditional-GET validators returned by the last successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[async_trait]
pub trait Fetcher {
    async fn fetch(&self, url: &str, validators: &Validators) -> Result<FetchResult>;
}
