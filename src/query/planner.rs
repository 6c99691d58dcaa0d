//! Turning a [`Filter`] into index ranges plus a residual predicate.
//!
//! The planner picks one index, then walks its key path from the left. Each
//! component that is constrained, or whose domain is small and known
//! (deletion state, the read and starred flags, the set of feeds), multiplies
//! the list of key prefixes. A trailing date component becomes a bounded
//! range under every prefix. Anything the ranges cannot express is left to
//! the residual predicate, checked against each loaded entry.

use std::collections::HashSet;

use crate::app::{BrookError, Result};
use crate::domain::{DeletedState, Entry, Revision};
use crate::query::filter::{Filter, SortDirection};
use crate::registry::FeedRegistry;
use crate::store::cursor::{Direction, KeyRange};
use crate::store::engine::IndexDef;
use crate::store::keycode::{self, KeyPart};
use crate::store::schema::{ENTRY_FLAGS, ENTRY_URL, PRIMARY_KEY};

/// How candidate entries are found.
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    /// Direct lookups by entry id.
    PrimaryKeys(Vec<i64>),
    /// One cursor per range over a secondary index.
    Index {
        index: &'static IndexDef,
        ranges: Vec<KeyRange>,
    },
}

/// Conditions checked against loaded entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Residual {
    pub feeds: Option<HashSet<String>>,
    pub read: Option<bool>,
    pub starred: Option<bool>,
    pub deleted: Option<DeletedState>,
    pub provided_ids: Option<HashSet<String>>,
    pub entry_urls: Option<HashSet<String>>,
    pub tags: Option<Vec<String>>,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    /// Lowercased search text.
    pub search: Option<String>,
}

impl Residual {
    pub fn is_empty(&self) -> bool {
        *self == Residual::default()
    }

    /// Whether checking needs the entry's revision loaded.
    pub fn needs_revision(&self) -> bool {
        self.search.is_some()
    }

    pub fn matches(&self, entry: &Entry, revision: Option<&Revision>) -> bool {
        if let Some(ref feeds) = self.feeds {
            if !feeds.contains(&entry.feed_id) {
                return false;
            }
        }
        if self.read.is_some_and(|read| entry.read != read) {
            return false;
        }
        if self.starred.is_some_and(|starred| entry.starred != starred) {
            return false;
        }
        if self.deleted.is_some_and(|deleted| entry.deleted != deleted) {
            return false;
        }
        if let Some(ref ids) = self.provided_ids {
            if !ids.contains(&entry.provided_id) {
                return false;
            }
        }
        if let Some(ref urls) = self.entry_urls {
            if !urls.contains(&entry.entry_url) {
                return false;
            }
        }
        if let Some(ref tags) = self.tags {
            if !tags.iter().any(|tag| entry.tags.contains(tag)) {
                return false;
            }
        }
        if self.start_date.is_some_and(|start| entry.date < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| entry.date > end) {
            return false;
        }
        if let Some(ref search) = self.search {
            let Some(revision) = revision else {
                return false;
            };
            if !revision.title.to_lowercase().contains(search)
                && !revision.content.to_lowercase().contains(search)
            {
                return false;
            }
        }
        true
    }
}

/// An executable query.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub access: Access,
    pub residual: Residual,
    /// Merge the ranges by date; otherwise they are read one after another.
    pub sorted: bool,
    pub direction: Direction,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Plan {
    /// The plan matches nothing without touching the store.
    pub fn is_empty(&self) -> bool {
        match &self.access {
            Access::PrimaryKeys(ids) => ids.is_empty(),
            Access::Index { ranges, .. } => ranges.is_empty(),
        }
    }
}

fn deleted_key(state: DeletedState) -> KeyPart {
    match state {
        DeletedState::No => KeyPart::Int(0),
        DeletedState::Trashed => KeyPart::from("trashed"),
        DeletedState::Deleted => KeyPart::from("deleted"),
    }
}

fn flag_domain(flag: Option<bool>) -> Vec<KeyPart> {
    match flag {
        Some(value) => vec![KeyPart::Int(i64::from(value))],
        None => vec![KeyPart::Int(0), KeyPart::Int(1)],
    }
}

/// Multiply every prefix by every value of the next key component.
fn extend(prefixes: Vec<Vec<KeyPart>>, values: &[KeyPart]) -> Vec<Vec<KeyPart>> {
    let mut out = Vec::with_capacity(prefixes.len() * values.len());
    for prefix in &prefixes {
        for value in values {
            let mut next = prefix.clone();
            next.push(value.clone());
            out.push(next);
        }
    }
    out
}

fn prefix_ranges(prefixes: Vec<Vec<KeyPart>>) -> Vec<KeyRange> {
    prefixes
        .iter()
        .map(|parts| KeyRange::prefix(&keycode::encode(parts)))
        .collect()
}

pub struct Planner<'r> {
    registry: &'r FeedRegistry,
}

impl<'r> Planner<'r> {
    pub fn new(registry: &'r FeedRegistry) -> Self {
        Self { registry }
    }

    /// Feeds whose entries the filter may return, in registry order. `None`
    /// when only an id list restricts the query.
    fn feed_domain(&self, filter: &Filter) -> Option<Vec<String>> {
        if filter.feeds.is_none() && filter.folders.is_none() {
            if filter.entries.is_some() {
                return None;
            }
            return Some(self.registry.active_feed_ids(
                filter.include_hidden_feeds,
                filter.include_feeds_excluded_from_global_views,
            ));
        }

        let mut ids: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for id in filter.feeds.iter().flatten() {
            if seen.insert(id.clone()) {
                ids.push(id.clone());
            }
        }
        if let Some(ref folders) = filter.folders {
            for id in self.registry.feeds_in_folders(folders.iter().map(String::as_str)) {
                let visible = self
                    .registry
                    .get(&id)
                    .is_some_and(|f| filter.include_hidden_feeds || !f.is_hidden());
                if visible && seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        Some(ids)
    }

    pub fn plan(&self, filter: &Filter) -> Result<Plan> {
        filter.validate()?;

        let domain = self.feed_domain(filter);
        let sort_wanted = filter.sort_order.is_some();
        let direction = match filter.sort_direction {
            SortDirection::Asc => Direction::Next,
            SortDirection::Desc => Direction::Prev,
        };

        let mut residual = Residual {
            feeds: domain.as_ref().map(|ids| ids.iter().cloned().collect()),
            read: filter.read,
            starred: filter.starred,
            deleted: filter.deleted,
            provided_ids: filter
                .provided_id
                .as_ref()
                .map(|ids| ids.iter().cloned().collect()),
            entry_urls: filter
                .entry_url
                .as_ref()
                .map(|urls| urls.iter().cloned().collect()),
            tags: filter.tags.clone(),
            start_date: filter.start_date,
            end_date: filter.end_date,
            search: filter.search_string.as_ref().map(|s| s.to_lowercase()),
        };

        let single_feed = match domain.as_deref() {
            Some([only]) if filter.feeds.is_some() => Some(only.clone()),
            _ => None,
        };

        let (access, sort_index) = if let Some(ref ids) = filter.entries {
            let mut unique = Vec::with_capacity(ids.len());
            let mut seen = HashSet::new();
            for id in ids {
                if seen.insert(*id) {
                    unique.push(*id);
                }
            }
            (Access::PrimaryKeys(unique), None)
        } else if let (Some(feed), Some(ids)) = (single_feed, filter.provided_id.as_ref()) {
            let prefixes = ids
                .iter()
                .map(|id| vec![KeyPart::from(feed.as_str()), KeyPart::from(id.as_str())])
                .collect();
            residual.feeds = None;
            residual.provided_ids = None;
            let access = Access::Index {
                index: &PRIMARY_KEY,
                ranges: prefix_ranges(prefixes),
            };
            (access, Some(&PRIMARY_KEY))
        } else if let Some(ref urls) = filter.entry_url {
            let prefixes = urls.iter().map(|url| vec![KeyPart::from(url.as_str())]).collect();
            residual.entry_urls = None;
            let access = Access::Index {
                index: &ENTRY_URL,
                ranges: prefix_ranges(prefixes),
            };
            (access, Some(&ENTRY_URL))
        } else {
            let access = self.flag_ranges(filter, domain.unwrap_or_default());
            residual.feeds = None;
            residual.read = None;
            residual.starred = None;
            residual.deleted = None;
            residual.start_date = None;
            residual.end_date = None;
            (access, Some(&ENTRY_FLAGS))
        };

        if sort_wanted {
            let sortable = sort_index.is_some_and(|def| def.key_path.last() == Some(&"date"));
            if !sortable {
                let index = sort_index.map(|def| def.name).unwrap_or("primary key");
                return Err(BrookError::InvalidQuery(format!(
                    "cannot sort by date using {}",
                    index
                )));
            }
        }

        Ok(Plan {
            access,
            residual,
            sorted: sort_wanted,
            direction: if sort_wanted { direction } else { Direction::Next },
            offset: filter.offset.unwrap_or(0),
            limit: filter.limit,
        })
    }

    /// Ranges over `deleted_starred_read_feedID_date`.
    fn flag_ranges(&self, filter: &Filter, feeds: Vec<String>) -> Access {
        let deleted: Vec<KeyPart> = match filter.deleted {
            Some(state) => vec![deleted_key(state)],
            None => DeletedState::ALL.into_iter().map(deleted_key).collect(),
        };
        let feeds: Vec<KeyPart> = feeds.into_iter().map(KeyPart::Str).collect();

        let mut prefixes = vec![Vec::new()];
        prefixes = extend(prefixes, &deleted);
        prefixes = extend(prefixes, &flag_domain(filter.starred));
        prefixes = extend(prefixes, &flag_domain(filter.read));
        prefixes = extend(prefixes, &feeds);

        let lower = filter.start_date.map(KeyPart::Int);
        let upper = filter.end_date.map(KeyPart::Int);
        let ranges = prefixes
            .iter()
            .map(|parts| KeyRange::prefix_between(&keycode::encode(parts), lower.clone(), upper.clone()))
            .collect();

        Access::Index {
            index: &ENTRY_FLAGS,
            ranges,
        }
    }
}
