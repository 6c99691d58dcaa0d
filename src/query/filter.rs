use std::fmt;
use std::str::FromStr;

use crate::app::{BrookError, Result};
use crate::domain::DeletedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Date,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(format!("invalid sort direction {:?}", other)),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "asc"),
            SortDirection::Desc => write!(f, "desc"),
        }
    }
}

/// Which entries a query or bulk mutation applies to.
///
/// Every field is optional; unset fields do not constrain the result. Feed
/// membership defaults to the visible feeds that take part in global views.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub entries: Option<Vec<i64>>,
    pub feeds: Option<Vec<String>>,
    pub folders: Option<Vec<String>>,
    /// Matches entries carrying any of these tags.
    pub tags: Option<Vec<String>>,
    pub read: Option<bool>,
    pub starred: Option<bool>,
    pub deleted: Option<DeletedState>,
    pub provided_id: Option<Vec<String>>,
    pub entry_url: Option<Vec<String>>,
    /// Case-insensitive substring of the title or content.
    pub search_string: Option<String>,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub sort_order: Option<SortOrder>,
    pub sort_direction: SortDirection,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub include_hidden_feeds: bool,
    pub include_feeds_excluded_from_global_views: bool,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.entries = Some(ids.into_iter().collect());
        self
    }

    pub fn feeds<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.feeds = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn folders<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.folders = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = Some(read);
        self
    }

    pub fn starred(mut self, starred: bool) -> Self {
        self.starred = Some(starred);
        self
    }

    pub fn deleted(mut self, deleted: DeletedState) -> Self {
        self.deleted = Some(deleted);
        self
    }

    pub fn provided_ids<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.provided_id = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn entry_urls<S: Into<String>>(mut self, urls: impl IntoIterator<Item = S>) -> Self {
        self.entry_url = Some(urls.into_iter().map(Into::into).collect());
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search_string = Some(text.into());
        self
    }

    pub fn between(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn sorted(mut self, direction: SortDirection) -> Self {
        self.sort_order = Some(SortOrder::Date);
        self.sort_direction = direction;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn include_hidden(mut self) -> Self {
        self.include_hidden_feeds = true;
        self
    }

    pub fn include_excluded(mut self) -> Self {
        self.include_feeds_excluded_from_global_views = true;
        self
    }

    pub fn is_paginated(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(BrookError::InvalidQuery(format!(
                    "start date {} is after end date {}",
                    start, end
                )));
            }
        }
        if self.search_string.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(BrookError::InvalidQuery("empty search string".into()));
        }
        Ok(())
    }

    /// Reject pagination for operations that apply to the whole match set.
    pub(crate) fn require_unpaginated(&self, operation: &str) -> Result<()> {
        if self.is_paginated() {
            return Err(BrookError::InvalidQuery(format!(
                "{} does not accept limit or offset",
                operation
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_fields() {
        let filter = Filter::new()
            .feeds(["a", "b"])
            .read(false)
            .sorted(SortDirection::Asc)
            .limit(10);

        assert_eq!(filter.feeds, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(filter.read, Some(false));
        assert_eq!(filter.sort_order, Some(SortOrder::Date));
        assert_eq!(filter.sort_direction, SortDirection::Asc);
        assert!(filter.is_paginated());
    }

    #[test]
    fn test_inverted_dates_are_rejected() {
        let filter = Filter::new().between(Some(10), Some(5));
        assert!(matches!(filter.validate(), Err(BrookError::InvalidQuery(_))));
        assert!(Filter::new().between(Some(5), Some(5)).validate().is_ok());
    }

    #[test]
    fn test_unpaginated_requirement() {
        assert!(Filter::new().require_unpaginated("count").is_ok());
        assert!(Filter::new().offset(3).require_unpaginated("count").is_err());
    }

    #[test]
    fn test_sort_direction_parses() {
        assert_eq!("ASC".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        assert_eq!(SortDirection::default(), SortDirection::Desc);
        assert!("sideways".parse::<SortDirection>().is_err());
    }
}
