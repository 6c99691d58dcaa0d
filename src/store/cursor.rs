//! Pull-based range cursors over an index.
//!
//! A cursor fetches index rows a page at a time and hands them out one by
//! one through [`KeyCursor::advance`]. Nothing is held open between pages, so
//! a cursor can be dropped at any point.

use std::collections::VecDeque;

use rusqlite::{params, Connection};

use crate::app::Result;
use crate::store::keycode::{self, KeyPart};

pub const DEFAULT_PAGE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Next,
    Prev,
}

/// Inclusive range of encoded keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub lower: Vec<u8>,
    pub upper: Vec<u8>,
}

impl KeyRange {
    pub fn all() -> Self {
        Self {
            lower: Vec::new(),
            upper: vec![keycode::PREFIX_END],
        }
    }

    /// Every key starting with `prefix`.
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            lower: prefix.to_vec(),
            upper: keycode::prefix_end(prefix),
        }
    }

    /// Keys starting with `prefix` whose next component lies within the
    /// inclusive bounds.
    pub fn prefix_between(prefix: &[u8], lower: Option<KeyPart>, upper: Option<KeyPart>) -> Self {
        let mut range = Self::prefix(prefix);
        if let Some(lower) = lower {
            range.lower.extend(keycode::encode(&[lower]));
        }
        if let Some(upper) = upper {
            let mut end = prefix.to_vec();
            end.extend(keycode::encode(&[upper]));
            range.upper = keycode::prefix_end(&end);
        }
        range
    }
}

/// One index row: the encoded index key and the record's encoded primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub key: Vec<u8>,
    pub pk: Vec<u8>,
}

impl IndexRow {
    /// Last component of the index key, as used for sorting.
    pub fn sort_value(&self) -> Result<Option<i64>> {
        Ok(keycode::decode(&self.key)?.last().and_then(KeyPart::as_int))
    }

    pub fn primary_key(&self) -> Result<Option<KeyPart>> {
        Ok(keycode::decode(&self.pk)?.into_iter().next())
    }
}

pub trait KeyCursor {
    /// Next row in cursor order, or `None` once the range is exhausted.
    fn advance(&mut self) -> Result<Option<IndexRow>>;
}

/// Cursor over a single key range of a stored index.
pub struct IndexCursor<'c> {
    conn: &'c Connection,
    index: String,
    range: KeyRange,
    direction: Direction,
    page: VecDeque<IndexRow>,
    position: Option<(Vec<u8>, Vec<u8>)>,
    page_size: usize,
    exhausted: bool,
}

impl<'c> IndexCursor<'c> {
    pub fn new(conn: &'c Connection, index: &str, range: KeyRange, direction: Direction) -> Self {
        Self {
            conn,
            index: index.to_string(),
            range,
            direction,
            page: VecDeque::new(),
            position: None,
            page_size: DEFAULT_PAGE_SIZE,
            exhausted: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn fetch_page(&mut self) -> Result<()> {
        let (order, after) = match self.direction {
            Direction::Next => ("ASC", ">"),
            Direction::Prev => ("DESC", "<"),
        };

        let sql = if self.position.is_some() {
            format!(
                "SELECT key, pk FROM index_keys
                 WHERE idx = ?1 AND key >= ?2 AND key <= ?3 AND (key, pk) {} (?5, ?6)
                 ORDER BY key {}, pk {} LIMIT ?4",
                after, order, order
            )
        } else {
            format!(
                "SELECT key, pk FROM index_keys
                 WHERE idx = ?1 AND key >= ?2 AND key <= ?3
                 ORDER BY key {}, pk {} LIMIT ?4",
                order, order
            )
        };

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(IndexRow {
                key: row.get(0)?,
                pk: row.get(1)?,
            })
        };

        let limit = self.page_size as i64;
        let rows = match &self.position {
            Some((key, pk)) => stmt
                .query_map(
                    params![self.index, self.range.lower, self.range.upper, limit, key, pk],
                    map_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(
                    params![self.index, self.range.lower, self.range.upper, limit],
                    map_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };

        if rows.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = rows.last() {
            self.position = Some((last.key.clone(), last.pk.clone()));
        }
        self.page.extend(rows);
        Ok(())
    }
}

impl KeyCursor for IndexCursor<'_> {
    fn advance(&mut self) -> Result<Option<IndexRow>> {
        if self.page.is_empty() && !self.exhausted {
            self.fetch_page()?;
        }
        Ok(self.page.pop_front())
    }
}

/// Cursor over rows already in memory, in the order given.
pub struct ListCursor {
    rows: VecDeque<IndexRow>,
}

impl ListCursor {
    pub fn new(rows: impl IntoIterator<Item = IndexRow>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
        }
    }
}

impl KeyCursor for ListCursor {
    fn advance(&mut self) -> Result<Option<IndexRow>> {
        Ok(self.rows.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::engine::{ObjectStore, Txn};
    use crate::store::schema::{self, FEED_DATE};
    use serde_json::json;

    fn populated() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::engine_migrations().to_latest(&mut conn).unwrap();
        {
            let mut txn = Txn::open(&conn).unwrap();
            txn.create_store(ObjectStore::Entries).unwrap();
            txn.create_index(&FEED_DATE).unwrap();
            for id in 1..=10 {
                let feed = if id % 2 == 0 { "even" } else { "odd" };
                txn.put_raw(
                    ObjectStore::Entries,
                    &KeyPart::Int(id),
                    &json!({"feed_id": feed, "date": id * 100}),
                )
                .unwrap();
            }
        }
        conn
    }

    fn drain(cursor: &mut impl KeyCursor) -> Vec<i64> {
        let mut dates = Vec::new();
        while let Some(row) = cursor.advance().unwrap() {
            dates.push(row.sort_value().unwrap().unwrap());
        }
        dates
    }

    #[test]
    fn test_prefix_range_forward_across_pages() {
        let conn = populated();
        let range = KeyRange::prefix(&keycode::encode_one("even"));
        let mut cursor =
            IndexCursor::new(&conn, FEED_DATE.name, range, Direction::Next).with_page_size(2);

        assert_eq!(drain(&mut cursor), vec![200, 400, 600, 800, 1000]);
    }

    #[test]
    fn test_prefix_range_backward() {
        let conn = populated();
        let range = KeyRange::prefix(&keycode::encode_one("odd"));
        let mut cursor =
            IndexCursor::new(&conn, FEED_DATE.name, range, Direction::Prev).with_page_size(3);

        assert_eq!(drain(&mut cursor), vec![900, 700, 500, 300, 100]);
    }

    #[test]
    fn test_bounded_range_is_inclusive() {
        let conn = populated();
        let range = KeyRange::prefix_between(
            &keycode::encode_one("even"),
            Some(KeyPart::Int(400)),
            Some(KeyPart::Int(800)),
        );
        let mut cursor = IndexCursor::new(&conn, FEED_DATE.name, range, Direction::Next);

        assert_eq!(drain(&mut cursor), vec![400, 600, 800]);
    }

    #[test]
    fn test_exhausted_cursor_keeps_returning_none() {
        let conn = populated();
        let range = KeyRange::prefix(&keycode::encode_one("missing"));
        let mut cursor = IndexCursor::new(&conn, FEED_DATE.name, range, Direction::Next);

        assert!(cursor.advance().unwrap().is_none());
        assert!(cursor.advance().unwrap().is_none());
    }

    #[test]
    fn test_primary_key_of_row() {
        let conn = populated();
        let mut cursor =
            IndexCursor::new(&conn, FEED_DATE.name, KeyRange::all(), Direction::Next);
        let row = cursor.advance().unwrap().unwrap();
        assert_eq!(row.primary_key().unwrap(), Some(KeyPart::Int(2)));
    }
}
