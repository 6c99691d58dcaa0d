//! Parsed feed objects handed to the ingestion engine by the feed parser.

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub website_url: Option<String>,
    pub language: Option<String>,
    pub items: Vec<ParsedItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedItem {
    /// Publisher GUID, if any.
    pub id: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub authors: Vec<String>,
    pub published: Option<i64>,
    pub updated: Option<i64>,
}

impl ParsedItem {
    pub fn provided_id(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    pub fn entry_url(&self) -> &str {
        self.link.as_deref().unwrap_or("")
    }

    /// Best available body, preferring full content over the summary.
    pub fn body(&self) -> &str {
        self.content
            .as_deref()
            .or(self.summary.as_deref())
            .unwrap_or("")
    }

    /// Timestamp compared against the stored revision on re-ingest.
    pub fn modified(&self) -> Option<i64> {
        self.updated.or(self.published)
    }
}
