//! Repair and renumber the feed tree.

use std::collections::{HashMap, HashSet};

use crate::domain::Feed;

/// Turn an arbitrary feed list into a well-formed tree in pre-order.
///
/// Never fails: dangling parents and cycles are repaired by moving the
/// affected feeds under `home`. Applying it to its own output changes
/// nothing.
pub fn reindex(mut feeds: Vec<Feed>, home: &str) -> Vec<Feed> {
    for (position, feed) in feeds.iter_mut().enumerate() {
        if feed.row_index <= 0 {
            feed.row_index = position as i64 + 1;
        }
    }
    feeds.sort_by_key(|feed| feed.row_index);

    let mut seen = HashSet::new();
    feeds.retain(|feed| {
        if feed.feed_id == home {
            tracing::warn!("Dropping feed record that shadows the home folder {}", home);
            return false;
        }
        if !seen.insert(feed.feed_id.clone()) {
            tracing::warn!("Dropping duplicate feed {}", feed.feed_id);
            return false;
        }
        true
    });

    for feed in feeds.iter_mut() {
        if feed.parent != home && !seen.contains(&feed.parent) {
            tracing::warn!(
                "Feed {} has unknown parent {:?}, moving it to the top level",
                feed.feed_id,
                feed.parent
            );
            feed.parent = home.to_string();
        }
    }

    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, feed) in feeds.iter().enumerate() {
        children.entry(feed.parent.as_str()).or_default().push(i);
    }

    let mut visited = vec![false; feeds.len()];
    let mut order = Vec::with_capacity(feeds.len());
    let mut stack: Vec<usize> = children.get(home).into_iter().flatten().rev().copied().collect();

    while let Some(i) = stack.pop() {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        order.push(i);
        if let Some(kids) = children.get(feeds[i].feed_id.as_str()) {
            stack.extend(kids.iter().rev().copied());
        }
    }

    // Whatever the walk missed hangs off a parent cycle.
    order.extend((0..feeds.len()).filter(|&i| !visited[i]));

    let mut slots: Vec<Option<Feed>> = feeds.into_iter().map(Some).collect();
    let mut result = Vec::with_capacity(order.len());
    for i in order {
        let Some(mut feed) = slots[i].take() else {
            continue;
        };
        if !visited[i] {
            tracing::warn!(
                "Feed {} is unreachable from the home folder, moving it to the top level",
                feed.feed_id
            );
            feed.parent = home.to_string();
        }
        feed.row_index = result.len() as i64 + 1;
        result.push(feed);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, parent: &str, row_index: i64, is_folder: bool) -> Feed {
        Feed {
            feed_id: id.to_string(),
            title: id.to_string(),
            parent: parent.to_string(),
            row_index,
            is_folder,
            ..Default::default()
        }
    }

    fn ids(feeds: &[Feed]) -> Vec<&str> {
        feeds.iter().map(|f| f.feed_id.as_str()).collect()
    }

    #[test]
    fn test_preorder_and_row_numbers() {
        let feeds = vec![
            node("b", "0", 3, false),
            node("1", "0", 1, true),
            node("a", "1", 2, false),
            node("2", "1", 5, true),
            node("c", "2", 4, false),
        ];

        let result = reindex(feeds, "0");
        assert_eq!(ids(&result), vec!["1", "a", "2", "c", "b"]);
        let rows: Vec<i64> = result.iter().map(|f| f.row_index).collect();
        assert_eq!(rows, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_non_positive_row_index_takes_array_position() {
        let feeds = vec![node("a", "0", 0, false), node("b", "0", -4, false)];
        let result = reindex(feeds, "0");
        assert_eq!(ids(&result), vec!["a", "b"]);
    }

    #[test]
    fn test_dangling_parent_moves_to_home() {
        let feeds = vec![node("a", "missing", 1, false)];
        let result = reindex(feeds, "0");
        assert_eq!(result[0].parent, "0");
    }

    #[test]
    fn test_cycle_is_broken_and_every_feed_kept() {
        let feeds = vec![
            node("x", "0", 1, false),
            node("1", "2", 2, true),
            node("2", "1", 3, true),
            node("a", "1", 4, false),
        ];

        let result = reindex(feeds, "0");
        assert_eq!(result.len(), 4);
        assert_eq!(ids(&result), vec!["x", "1", "2", "a"]);
        for feed in &result[1..] {
            assert_eq!(feed.parent, "0", "{} should be at top level", feed.feed_id);
        }
    }

    #[test]
    fn test_self_parent_is_a_cycle() {
        let feeds = vec![node("1", "1", 1, true)];
        let result = reindex(feeds, "0");
        assert_eq!(result[0].parent, "0");
    }

    #[test]
    fn test_reindex_is_idempotent() {
        let feeds = vec![
            node("c", "2", 0, false),
            node("2", "0", 7, true),
            node("1", "2", 2, true),
            node("a", "1", 9, false),
            node("d", "nowhere", 1, false),
            node("5", "6", 4, true),
            node("6", "5", 3, true),
        ];

        let once = reindex(feeds, "0");
        let twice = reindex(once.clone(), "0");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let feeds = vec![node("a", "0", 1, false), node("a", "0", 2, false)];
        assert_eq!(reindex(feeds, "0").len(), 1);
    }
}
