use crate::domain::DeletedState;

/// What a bulk entry mutation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryChange {
    Content,
    Read(bool),
    Starred(bool),
    Deleted(DeletedState),
    Tags,
}

/// Broadcast to observers after every committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    FeedListUpdated,
    EntriesUpdated {
        feeds: Vec<String>,
        entries: Vec<i64>,
        change: EntryChange,
    },
}
