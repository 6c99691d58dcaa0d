//! Combining the cursors of a multi-range plan into one stream.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::app::Result;
use crate::store::cursor::{Direction, IndexRow, KeyCursor};

struct Head {
    date: i64,
    row: IndexRow,
    source: usize,
    direction: Direction,
}

impl Head {
    fn new(row: IndexRow, source: usize, direction: Direction) -> Result<Self> {
        let date = row.sort_value()?.unwrap_or(i64::MIN);
        Ok(Self {
            date,
            row,
            source,
            direction,
        })
    }
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        let order = (self.date, &self.row.pk).cmp(&(other.date, &other.row.pk));
        // The heap pops its greatest element first.
        match self.direction {
            Direction::Next => order.reverse(),
            Direction::Prev => order,
        }
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

/// K-way merge of cursors that are each ordered by `(date, primary key)`.
pub struct MergeCursor<C> {
    cursors: Vec<C>,
    heap: BinaryHeap<Head>,
    direction: Direction,
    primed: bool,
}

impl<C: KeyCursor> MergeCursor<C> {
    pub fn new(cursors: Vec<C>, direction: Direction) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(cursors.len()),
            cursors,
            direction,
            primed: false,
        }
    }

    fn pull(&mut self, source: usize) -> Result<()> {
        if let Some(row) = self.cursors[source].advance()? {
            self.heap.push(Head::new(row, source, self.direction)?);
        }
        Ok(())
    }
}

impl<C: KeyCursor> KeyCursor for MergeCursor<C> {
    fn advance(&mut self) -> Result<Option<IndexRow>> {
        if !self.primed {
            self.primed = true;
            for source in 0..self.cursors.len() {
                self.pull(source)?;
            }
        }

        let Some(head) = self.heap.pop() else {
            return Ok(None);
        };
        self.pull(head.source)?;
        Ok(Some(head.row))
    }
}

/// Cursors drained one after another.
pub struct ChainCursor<C> {
    cursors: std::collections::VecDeque<C>,
}

impl<C: KeyCursor> ChainCursor<C> {
    pub fn new(cursors: Vec<C>) -> Self {
        Self {
            cursors: cursors.into(),
        }
    }
}

impl<C: KeyCursor> KeyCursor for ChainCursor<C> {
    fn advance(&mut self) -> Result<Option<IndexRow>> {
        while let Some(cursor) = self.cursors.front_mut() {
            if let Some(row) = cursor.advance()? {
                return Ok(Some(row));
            }
            self.cursors.pop_front();
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::cursor::ListCursor;
    use crate::store::keycode::{self, KeyPart};

    fn row(prefix: &str, date: i64, id: i64) -> IndexRow {
        IndexRow {
            key: keycode::encode(&[KeyPart::from(prefix), KeyPart::Int(date)]),
            pk: keycode::encode_one(id),
        }
    }

    fn ids(cursor: &mut impl KeyCursor) -> Vec<i64> {
        let mut ids = Vec::new();
        while let Some(row) = cursor.advance().unwrap() {
            ids.push(row.primary_key().unwrap().and_then(|pk| pk.as_int()).unwrap());
        }
        ids
    }

    #[test]
    fn test_merge_ascending() {
        let a = ListCursor::new(vec![row("a", 1, 1), row("a", 4, 4), row("a", 9, 9)]);
        let b = ListCursor::new(vec![row("b", 2, 2), row("b", 3, 3)]);
        let c = ListCursor::new(vec![]);

        let mut merged = MergeCursor::new(vec![a, b, c], Direction::Next);
        assert_eq!(ids(&mut merged), vec![1, 2, 3, 4, 9]);
        assert!(merged.advance().unwrap().is_none());
    }

    #[test]
    fn test_merge_descending_breaks_ties_by_id() {
        let a = ListCursor::new(vec![row("a", 5, 8), row("a", 5, 1)]);
        let b = ListCursor::new(vec![row("b", 7, 3), row("b", 5, 4)]);

        let mut merged = MergeCursor::new(vec![a, b], Direction::Prev);
        assert_eq!(ids(&mut merged), vec![3, 8, 4, 1]);
    }

    #[test]
    fn test_chain_concatenates_in_order() {
        let a = ListCursor::new(vec![row("a", 9, 1)]);
        let b = ListCursor::new(vec![]);
        let c = ListCursor::new(vec![row("c", 1, 2), row("c", 2, 3)]);

        let mut chained = ChainCursor::new(vec![a, b, c]);
        assert_eq!(ids(&mut chained), vec![1, 2, 3]);
    }
}
