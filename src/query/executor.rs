//! Running plans: reads and bulk entry mutations.

use std::collections::BTreeSet;

use crate::app::Result;
use crate::domain::{DeletedState, Entry, EntryChange, FullEntry, Revision, StoreEvent};
use crate::query::filter::Filter;
use crate::query::merge::{ChainCursor, MergeCursor};
use crate::query::planner::{Access, Plan, Planner};
use crate::store::cursor::{IndexCursor, IndexRow, KeyCursor, ListCursor};
use crate::store::engine::Txn;
use crate::store::keycode;

/// Visits the entries matched by a plan, in plan order, honouring offset and
/// limit. The visitor receives the revision only when `with_revision` is set
/// or the residual predicate needed it.
fn walk(
    txn: &Txn<'_>,
    plan: &Plan,
    with_revision: bool,
    mut visit: impl FnMut(Entry, Option<Revision>) -> Result<()>,
) -> Result<()> {
    if plan.is_empty() || plan.limit == Some(0) {
        return Ok(());
    }

    let mut cursor = open_cursor(txn, plan);
    let mut skipped = 0;
    let mut taken = 0;

    while let Some(row) = cursor.advance()? {
        let Some(entry) = txn.entry_by_pk(&row.pk)? else {
            tracing::warn!("Index row points at a missing entry, skipping");
            continue;
        };

        let revision = if with_revision || plan.residual.needs_revision() {
            Some(txn.current_revision(&entry)?)
        } else {
            None
        };
        if !plan.residual.matches(&entry, revision.as_ref()) {
            continue;
        }

        if skipped < plan.offset {
            skipped += 1;
            continue;
        }
        visit(entry, revision)?;
        taken += 1;
        if plan.limit.is_some_and(|limit| taken >= limit) {
            break;
        }
    }
    Ok(())
}

fn open_cursor<'c>(txn: &Txn<'c>, plan: &Plan) -> Box<dyn KeyCursor + 'c> {
    match &plan.access {
        Access::PrimaryKeys(ids) => {
            let rows = ids.iter().map(|id| {
                let pk = keycode::encode_one(*id);
                IndexRow { key: pk.clone(), pk }
            });
            Box::new(ListCursor::new(rows))
        }
        Access::Index { index, ranges } => {
            let cursors: Vec<IndexCursor<'c>> = ranges
                .iter()
                .map(|range| IndexCursor::new(txn.conn(), index.name, range.clone(), plan.direction))
                .collect();
            if plan.sorted {
                Box::new(MergeCursor::new(cursors, plan.direction))
            } else {
                Box::new(ChainCursor::new(cursors))
            }
        }
    }
}

/// Entries changed by one mutation call, reported as a single event.
#[derive(Default)]
struct Changes {
    feeds: BTreeSet<String>,
    entries: Vec<i64>,
}

impl Changes {
    fn record(&mut self, entry: &Entry) {
        self.feeds.insert(entry.feed_id.clone());
        self.entries.push(entry.id);
    }

    fn into_event(self, change: EntryChange) -> Option<StoreEvent> {
        if self.entries.is_empty() {
            return None;
        }
        Some(StoreEvent::EntriesUpdated {
            feeds: self.feeds.into_iter().collect(),
            entries: self.entries,
            change,
        })
    }
}

impl crate::store::Database {
    pub(crate) fn plan(&self, filter: &Filter) -> Result<Plan> {
        let registry = self.registry()?;
        Planner::new(&registry).plan(filter)
    }

    pub fn count(&self, filter: &Filter) -> Result<u64> {
        filter.require_unpaginated("count")?;
        let plan = self.plan(filter)?;

        self.read(|txn| match &plan.access {
            Access::Index { index, ranges } if plan.residual.is_empty() => {
                let mut total = 0;
                for range in ranges {
                    total += txn.count_range(index.name, range)?;
                }
                Ok(total)
            }
            _ => {
                tracing::debug!("Counting by iteration, residual {:?}", plan.residual);
                let mut total = 0;
                walk(txn, &plan, false, |_, _| {
                    total += 1;
                    Ok(())
                })?;
                Ok(total)
            }
        })
    }

    pub fn ids(&self, filter: &Filter) -> Result<Vec<i64>> {
        let plan = self.plan(filter)?;
        self.read(|txn| {
            let mut ids = Vec::new();
            walk(txn, &plan, false, |entry, _| {
                ids.push(entry.id);
                Ok(())
            })?;
            Ok(ids)
        })
    }

    pub fn entries(&self, filter: &Filter) -> Result<Vec<FullEntry>> {
        let plan = self.plan(filter)?;
        self.read(|txn| {
            let mut found = Vec::new();
            walk(txn, &plan, true, |entry, revision| {
                let full = match revision {
                    Some(revision) => FullEntry { entry, revision },
                    None => txn.full_entry(entry)?,
                };
                found.push(full);
                Ok(())
            })?;
            Ok(found)
        })
    }

    /// Distinct feeds of the matching entries, in order of first appearance.
    pub fn feed_ids(&self, filter: &Filter) -> Result<Vec<String>> {
        let plan = self.plan(filter)?;
        self.read(|txn| {
            let mut seen = BTreeSet::new();
            let mut feeds = Vec::new();
            walk(txn, &plan, false, |entry, _| {
                if seen.insert(entry.feed_id.clone()) {
                    feeds.push(entry.feed_id);
                }
                Ok(())
            })?;
            Ok(feeds)
        })
    }

    /// Apply `change` to every matching entry in one transaction, storing
    /// only entries it reports as modified. Emits one event for the call.
    fn mutate(
        &self,
        operation: &str,
        filter: &Filter,
        event: EntryChange,
        change: impl FnMut(&mut Entry) -> bool,
    ) -> Result<usize> {
        filter.require_unpaginated(operation)?;
        self.apply_change(operation, filter, event, change)
    }

    /// Move a page of the matching entries to the trash. Offset and limit
    /// are applied inside the same transaction as the change.
    pub(crate) fn trash_page(&self, filter: &Filter) -> Result<usize> {
        let state = DeletedState::Trashed;
        self.apply_change("trash_page", filter, EntryChange::Deleted(state), |entry| {
            if entry.deleted == state {
                return false;
            }
            entry.deleted = state;
            true
        })
    }

    fn apply_change(
        &self,
        operation: &str,
        filter: &Filter,
        event: EntryChange,
        mut change: impl FnMut(&mut Entry) -> bool,
    ) -> Result<usize> {
        let plan = self.plan(filter)?;

        let changes = self.write(|txn| {
            let mut matched = Vec::new();
            walk(txn, &plan, false, |entry, _| {
                matched.push(entry);
                Ok(())
            })?;

            let mut changes = Changes::default();
            for mut entry in matched {
                if change(&mut entry) {
                    txn.put_entry(&entry)?;
                    changes.record(&entry);
                }
            }
            Ok(changes)
        })?;

        let count = changes.entries.len();
        tracing::debug!("{} changed {} entries", operation, count);
        if let Some(event) = changes.into_event(event) {
            self.emit(event);
        }
        Ok(count)
    }

    pub fn mark_read(&self, filter: &Filter, read: bool) -> Result<usize> {
        self.mutate("mark_read", filter, EntryChange::Read(read), |entry| {
            if entry.read == read {
                return false;
            }
            entry.read = read;
            if read {
                entry.marked_unread_on_update = false;
            }
            true
        })
    }

    pub fn mark_starred(&self, filter: &Filter, starred: bool) -> Result<usize> {
        self.mutate("mark_starred", filter, EntryChange::Starred(starred), |entry| {
            if entry.starred == starred {
                return false;
            }
            entry.starred = starred;
            true
        })
    }

    pub fn mark_deleted(&self, filter: &Filter, state: DeletedState) -> Result<usize> {
        self.mutate("mark_deleted", filter, EntryChange::Deleted(state), |entry| {
            if entry.deleted == state {
                return false;
            }
            entry.deleted = state;
            true
        })
    }

    pub fn tag(&self, filter: &Filter, name: &str) -> Result<usize> {
        self.mutate("tag", filter, EntryChange::Tags, |entry| {
            if entry.tags.iter().any(|t| t == name) {
                return false;
            }
            entry.tags.push(name.to_string());
            true
        })
    }

    pub fn untag(&self, filter: &Filter, name: &str) -> Result<usize> {
        self.mutate("untag", filter, EntryChange::Tags, |entry| {
            let before = entry.tags.len();
            entry.tags.retain(|t| t != name);
            entry.tags.len() != before
        })
    }

    /// Mirror a bookmark: entries with this URL are starred and linked to
    /// the bookmark, or unstarred and unlinked when it is gone.
    pub fn sync_bookmark(&self, url: &str, bookmark_id: Option<i64>) -> Result<usize> {
        let filter = Filter::new()
            .entry_urls([url])
            .include_hidden()
            .include_excluded();
        let starred = bookmark_id.is_some();

        self.mutate("sync_bookmark", &filter, EntryChange::Starred(starred), |entry| {
            if entry.starred == starred && entry.bookmark_id == bookmark_id {
                return false;
            }
            entry.starred = starred;
            entry.bookmark_id = bookmark_id;
            true
        })
    }

    /// Physically remove entries in the `deleted` state with their revisions.
    pub fn purge_deleted(&self) -> Result<usize> {
        let filter = Filter::new()
            .deleted(DeletedState::Deleted)
            .include_hidden()
            .include_excluded();
        let plan = self.plan(&filter)?;

        let changes = self.write(|txn| {
            let mut matched = Vec::new();
            walk(txn, &plan, false, |entry, _| {
                matched.push(entry);
                Ok(())
            })?;

            let mut changes = Changes::default();
            for entry in matched {
                txn.delete_entry(&entry)?;
                changes.record(&entry);
            }
            Ok(changes)
        })?;

        let count = changes.entries.len();
        if count > 0 {
            tracing::info!("Purged {} deleted entries", count);
        }
        if let Some(event) = changes.into_event(EntryChange::Deleted(DeletedState::Deleted)) {
            self.emit(event);
        }
        Ok(count)
    }
}
