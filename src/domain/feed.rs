use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How entries of a feed are presented by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Full,
    Headlines,
}

/// A subscribed feed or a folder. Both live in the same list and are told
/// apart by `is_folder`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Feed {
    pub feed_id: String,
    pub feed_url: Option<String>,
    pub website_url: Option<String>,
    pub title: String,
    pub subtitle: Option<String>,
    pub language: Option<String>,
    pub parent: String,
    pub is_folder: bool,
    /// 1-based position in the flattened tree.
    pub row_index: i64,
    /// 0 when visible, otherwise the time (ms) it was hidden.
    pub hidden: i64,
    /// Days after which entries expire, overriding the global setting.
    pub entry_age_limit: Option<u32>,
    pub max_entries: Option<u32>,
    /// Seconds between updates.
    pub update_interval: Option<u32>,
    pub mark_modified_entries_unread: Option<bool>,
    pub omit_in_unread: bool,
    pub view_mode: ViewMode,
    pub favicon: Option<String>,
    pub last_favicon_refresh: i64,
    pub date_modified: i64,
    pub last_updated: i64,
    pub oldest_entry_date: Option<i64>,
}

impl Feed {
    pub fn new_feed(url: &str, parent: &str) -> Self {
        Self {
            feed_id: Self::generate_id(url),
            feed_url: Some(url.to_string()),
            title: url.to_string(),
            parent: parent.to_string(),
            ..Default::default()
        }
    }

    pub fn new_folder(feed_id: String, title: &str, parent: &str) -> Self {
        Self {
            feed_id,
            title: title.to_string(),
            parent: parent.to_string(),
            is_folder: true,
            ..Default::default()
        }
    }

    /// Derive a stable feed id from the feed URL.
    pub fn generate_id(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden != 0
    }

    pub fn display_title(&self) -> &str {
        if !self.title.is_empty() {
            &self.title
        } else {
            self.feed_url.as_deref().unwrap_or(&self.feed_id)
        }
    }
}

/// Request to subscribe to a feed or create a folder.
#[derive(Debug, Clone, Default)]
pub struct NewFeed {
    pub url: Option<String>,
    pub title: Option<String>,
    pub parent: Option<String>,
    pub is_folder: bool,
}

impl NewFeed {
    pub fn feed(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn folder(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            is_folder: true,
            ..Default::default()
        }
    }

    pub fn in_folder(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

/// Changes applied by `modify_feed`. `None` leaves a field untouched; the
/// nested options on per-feed overrides distinguish "clear" from "keep".
#[derive(Debug, Clone, Default)]
pub struct FeedUpdate {
    pub title: Option<String>,
    pub parent: Option<String>,
    pub row_index: Option<i64>,
    pub entry_age_limit: Option<Option<u32>>,
    pub max_entries: Option<Option<u32>>,
    pub update_interval: Option<Option<u32>>,
    pub mark_modified_entries_unread: Option<Option<bool>>,
    pub omit_in_unread: Option<bool>,
    pub view_mode: Option<ViewMode>,
    pub favicon: Option<String>,
}

impl FeedUpdate {
    pub fn apply(&self, feed: &mut Feed) {
        if let Some(ref title) = self.title {
            feed.title = title.clone();
        }
        if let Some(ref parent) = self.parent {
            feed.parent = parent.clone();
        }
        if let Some(row_index) = self.row_index {
            feed.row_index = row_index;
        }
        if let Some(limit) = self.entry_age_limit {
            feed.entry_age_limit = limit;
        }
        if let Some(max) = self.max_entries {
            feed.max_entries = max;
        }
        if let Some(interval) = self.update_interval {
            feed.update_interval = interval;
        }
        if let Some(flag) = self.mark_modified_entries_unread {
            feed.mark_modified_entries_unread = flag;
        }
        if let Some(omit) = self.omit_in_unread {
            feed.omit_in_unread = omit;
        }
        if let Some(mode) = self.view_mode {
            feed.view_mode = mode;
        }
        if let Some(ref favicon) = self.favicon {
            feed.favicon = Some(favicon.clone());
        }
    }
}
