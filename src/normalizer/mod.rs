use feed_rs::model::Text;
use feed_rs::parser;
use html_escape::decode_html_entities;

use crate::app::{BrookError, Result};
use crate::domain::{ParsedFeed, ParsedItem};

/// Turns raw RSS/Atom/JSON Feed bytes into the parsed objects the ingestion
/// engine consumes. Timestamps come out as epoch milliseconds.
#[derive(Clone, Default)]
pub struct Normalizer;

fn text(value: Option<Text>) -> Option<String> {
    value
        .map(|t| decode_html_entities(t.content.trim()).to_string())
        .filter(|s| !s.is_empty())
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, body: &[u8]) -> Result<ParsedFeed> {
        let feed = parser::parse(body).map_err(|e| BrookError::FeedParse(e.to_string()))?;

        let website_url = feed
            .links
            .iter()
            .find(|l| l.rel.as_deref() != Some("self"))
            .map(|l| l.href.clone());

        let items = feed
            .entries
            .into_iter()
            .map(|entry| {
                let link = entry
                    .links
                    .iter()
                    .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
                    .or(entry.links.first())
                    .map(|l| l.href.clone());

                ParsedItem {
                    id: Some(entry.id).filter(|id| !id.is_empty()),
                    link,
                    title: text(entry.title),
                    summary: text(entry.summary),
                    content: entry
                        .content
                        .and_then(|c| c.body)
                        .map(|b| decode_html_entities(&b).to_string()),
                    authors: entry
                        .authors
                        .into_iter()
                        .map(|a| a.name)
                        .filter(|name| !name.is_empty())
                        .collect(),
                    published: entry.published.map(|dt| dt.timestamp_millis()),
                    updated: entry.updated.map(|dt| dt.timestamp_millis()),
                }
            })
            .collect();

        Ok(ParsedFeed {
            title: text(feed.title),
            subtitle: text(feed.description),
            website_url,
            language: feed.language,
            items,
        })
    }
}
