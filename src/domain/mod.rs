pub mod entry;
pub mod event;
pub mod feed;
pub mod parsed;

pub use entry::{DeletedState, Entry, FullEntry, Revision, ENTRY_RECORD_VERSION};
pub use event::{EntryChange, StoreEvent};
pub use feed::{Feed, FeedUpdate, NewFeed, ViewMode};
pub use parsed::{ParsedFeed, ParsedItem};

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
