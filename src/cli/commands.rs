use std::collections::HashMap;
use std::path::Path;

use chrono::{TimeZone, Utc};

use crate::app::{AppContext, BrookError, Result};
use crate::cli::{FilterArgs, MarkAction};
use crate::domain::{DeletedState, Feed, NewFeed};
use crate::query::Filter;

fn format_date(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "          ".to_string())
}

fn resolve_feed(ctx: &AppContext, feed: &str) -> Result<Feed> {
    if let Some(found) = ctx.db.get_feed(feed)? {
        return Ok(found);
    }
    ctx.db
        .get_feed_by_url(feed)?
        .ok_or_else(|| BrookError::FeedNotFound(feed.to_string()))
}

pub async fn add_feed(ctx: &AppContext, url: &str, folder: Option<String>, fetch: bool) -> Result<()> {
    let mut request = NewFeed::feed(url);
    request.parent = folder;

    let feed = ctx.db.add_feeds(vec![request])?.remove(0);
    println!("Added feed: {} ({})", url, feed.feed_id);

    if !fetch {
        return Ok(());
    }

    for (_, result) in ctx.update_feeds(&[feed.feed_id.clone()]).await? {
        let outcome = result?;
        if let Some(feed) = ctx.db.get_feed(&feed.feed_id)? {
            println!("Feed title: {}", feed.display_title());
        }
        println!("Fetched {} entries", outcome.new_entries.len());
    }

    Ok(())
}

pub fn add_folder(ctx: &AppContext, title: &str, parent: Option<String>) -> Result<()> {
    let mut request = NewFeed::folder(title);
    request.parent = parent;

    let folder = ctx.db.add_feeds(vec![request])?.remove(0);
    println!("Added folder: {} ({})", folder.title, folder.feed_id);
    Ok(())
}

pub fn remove_feed(ctx: &AppContext, feed: &str, purge: bool) -> Result<()> {
    let feed = resolve_feed(ctx, feed)?;

    if purge {
        ctx.db.purge_feed(&feed.feed_id)?;
        println!("Purged: {}", feed.display_title());
    } else {
        ctx.db.delete_feed(&feed.feed_id)?;
        println!("Removed: {}", feed.display_title());
    }
    Ok(())
}

pub fn list_feeds(ctx: &AppContext, hidden: bool) -> Result<()> {
    let feeds = ctx.db.feeds()?;
    let home = &ctx.db.settings().home_folder;

    if feeds.is_empty() {
        println!("No feeds");
        return Ok(());
    }

    // Depth follows from pre-order: a feed sits one level below its parent.
    let mut depth: HashMap<&str, usize> = HashMap::new();
    depth.insert(home.as_str(), 0);

    for feed in &feeds {
        let level = depth.get(feed.parent.as_str()).copied().unwrap_or(0) + 1;
        depth.insert(feed.feed_id.as_str(), level);

        if feed.is_hidden() && !hidden {
            continue;
        }
        let indent = "  ".repeat(level - 1);

        if feed.is_folder {
            println!("{}{}/ [{}]", indent, feed.title, feed.feed_id);
            continue;
        }

        let unread = ctx.db.count(
            &Filter::new()
                .feeds([feed.feed_id.clone()])
                .read(false)
                .deleted(DeletedState::No)
                .include_hidden()
                .include_excluded(),
        )?;
        let marker = if feed.is_hidden() { " (unsubscribed)" } else { "" };
        println!(
            "{}{} ({} unread){} [{}]",
            indent,
            feed.display_title(),
            unread,
            marker,
            feed.feed_id
        );
    }

    Ok(())
}

pub fn list_entries(ctx: &AppContext, args: &FilterArgs) -> Result<()> {
    let entries = ctx.db.entries(&args.to_filter())?;

    if entries.is_empty() {
        println!("No entries");
        return Ok(());
    }

    let feeds = ctx.db.feed_map()?;
    for full in entries {
        let entry = &full.entry;
        let read_marker = if entry.read { " " } else { "●" };
        let star = if entry.starred { "*" } else { " " };
        let source = feeds
            .get(&entry.feed_id)
            .map(|f| f.display_title())
            .unwrap_or(entry.feed_id.as_str());

        println!(
            "{}{} {:>6} {} [{}] {}",
            read_marker,
            star,
            entry.id,
            format_date(entry.date),
            source,
            full.revision.display_title()
        );
    }

    Ok(())
}

pub fn count_entries(ctx: &AppContext, args: &FilterArgs) -> Result<()> {
    println!("{}", ctx.db.count(&args.to_filter())?);
    Ok(())
}

pub async fn update_feeds(ctx: &AppContext, feed_ids: &[String]) -> Result<()> {
    let results = ctx.update_feeds(feed_ids).await?;

    if results.is_empty() {
        println!("No feeds to update");
        return Ok(());
    }

    println!("Updated {} feeds", results.len());

    let mut total_new = 0;
    let mut errors = 0;

    for (feed_id, result) in results {
        let title = ctx
            .db
            .get_feed(&feed_id)?
            .map(|f| f.display_title().to_string())
            .unwrap_or(feed_id);

        match result {
            Ok(outcome) => {
                total_new += outcome.new_entries.len();
                if !outcome.new_entries.is_empty() {
                    println!("  {} new entries from {}", outcome.new_entries.len(), title);
                }
            }
            Err(e) => {
                errors += 1;
                eprintln!("  Error updating {}: {}", title, e);
            }
        }
    }

    println!("Update complete: {} new entries, {} errors", total_new, errors);
    Ok(())
}

pub fn mark_entries(ctx: &AppContext, action: MarkAction, args: &FilterArgs) -> Result<()> {
    let filter = args.to_filter();
    let changed = match action {
        MarkAction::Read => ctx.db.mark_read(&filter, true)?,
        MarkAction::Unread => ctx.db.mark_read(&filter, false)?,
        MarkAction::Star => ctx.db.mark_starred(&filter, true)?,
        MarkAction::Unstar => ctx.db.mark_starred(&filter, false)?,
        MarkAction::Trash => ctx.db.mark_deleted(&filter, DeletedState::Trashed)?,
        MarkAction::Restore => ctx.db.mark_deleted(&filter, DeletedState::No)?,
        MarkAction::Delete => ctx.db.mark_deleted(&filter, DeletedState::Deleted)?,
    };
    println!("{} entries changed", changed);
    Ok(())
}

pub fn tag_entries(ctx: &AppContext, name: &str, remove: bool, args: &FilterArgs) -> Result<()> {
    let filter = args.to_filter();
    let changed = if remove {
        ctx.db.untag(&filter, name)?
    } else {
        ctx.db.tag(&filter, name)?
    };
    println!("{} entries changed", changed);
    Ok(())
}

pub fn expire(ctx: &AppContext) -> Result<()> {
    let report = ctx.db.expire_entries()?;
    println!(
        "Trashed {} old and {} surplus entries; purged {} feeds and {} entries",
        report.aged_out, report.over_limit, report.purged_feeds, report.purged_entries
    );
    Ok(())
}

pub async fn migrate(ctx: &AppContext, path: Option<&Path>) -> Result<()> {
    match ctx.migrate_legacy(path).await? {
        Some(descriptor) => println!(
            "Migrated {} entries from {}",
            descriptor.processed_entries, descriptor.name
        ),
        None => println!("Nothing to migrate"),
    }
    Ok(())
}
