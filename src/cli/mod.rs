pub mod commands;

use std::path::PathBuf;

use chrono::{Duration, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::domain::DeletedState;
use crate::query::{Filter, SortDirection};

#[derive(Parser)]
#[command(name = "brook")]
#[command(about = "A local feed reader store", long_about = None)]
pub struct Cli {
    /// Database file (default: data directory)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Number of parallel workers for fetching feeds
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Subscribe to a feed and fetch it
    Add {
        /// URL of the feed to add
        url: String,
        /// Folder id to place the feed in
        #[arg(long)]
        folder: Option<String>,
        /// Only subscribe, do not fetch
        #[arg(long)]
        no_fetch: bool,
    },
    /// Create a folder
    AddFolder {
        title: String,
        /// Parent folder id
        #[arg(long)]
        parent: Option<String>,
    },
    /// Unsubscribe from a feed or remove a folder
    Remove {
        /// Feed id or URL
        feed: String,
        /// Delete the feed and its entries immediately
        #[arg(long)]
        purge: bool,
    },
    /// Show the feed tree
    List {
        /// Include unsubscribed feeds
        #[arg(long)]
        hidden: bool,
    },
    /// List entries matching a filter
    Entries {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Count entries matching a filter
    Count {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Fetch feeds (all visible feeds when none are given)
    Update {
        feeds: Vec<String>,
    },
    /// Change the state of entries matching a filter
    Mark {
        #[arg(value_enum)]
        action: MarkAction,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Add or remove a tag on entries matching a filter
    Tag {
        name: String,
        #[arg(long)]
        remove: bool,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Apply expiry settings and purge deleted entries
    Expire,
    /// Import a database left behind by an older installation
    Migrate {
        /// Legacy database (default: `legacy_path` from the config)
        path: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MarkAction {
    Read,
    Unread,
    Star,
    Unstar,
    Trash,
    Restore,
    Delete,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Entry ids
    #[arg(long = "entry")]
    pub entries: Vec<i64>,
    /// Feed ids
    #[arg(long = "feed")]
    pub feeds: Vec<String>,
    /// Folder ids
    #[arg(long = "folder")]
    pub folders: Vec<String>,
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    #[arg(long, conflicts_with = "unread")]
    pub read: bool,
    #[arg(long)]
    pub unread: bool,
    #[arg(long, conflicts_with = "unstarred")]
    pub starred: bool,
    #[arg(long)]
    pub unstarred: bool,
    /// Deletion state (no, trashed or deleted)
    #[arg(long)]
    pub deleted: Option<DeletedState>,
    /// Entry URLs
    #[arg(long = "url")]
    pub urls: Vec<String>,
    /// Case-insensitive text in the title or content
    #[arg(long)]
    pub search: Option<String>,
    /// Earliest entry date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    pub since: Option<NaiveDate>,
    /// Latest entry date, inclusive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    pub until: Option<NaiveDate>,
    /// Sort by date (asc or desc)
    #[arg(long)]
    pub sort: Option<SortDirection>,
    #[arg(long)]
    pub limit: Option<usize>,
    #[arg(long)]
    pub offset: Option<usize>,
    /// Include unsubscribed feeds
    #[arg(long)]
    pub include_hidden: bool,
    /// Include feeds left out of global views
    #[arg(long)]
    pub include_excluded: bool,
}

fn parse_day(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("{}: {}", s, e))
}

fn day_start_millis(day: NaiveDate) -> i64 {
    day.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

impl FilterArgs {
    pub fn to_filter(&self) -> Filter {
        let mut filter = Filter::new();

        if !self.entries.is_empty() {
            filter = filter.entries(self.entries.iter().copied());
        }
        if !self.feeds.is_empty() {
            filter = filter.feeds(self.feeds.iter().cloned());
        }
        if !self.folders.is_empty() {
            filter = filter.folders(self.folders.iter().cloned());
        }
        if !self.tags.is_empty() {
            filter = filter.tags(self.tags.iter().cloned());
        }
        if !self.urls.is_empty() {
            filter = filter.entry_urls(self.urls.iter().cloned());
        }
        if self.read || self.unread {
            filter = filter.read(self.read);
        }
        if self.starred || self.unstarred {
            filter = filter.starred(self.starred);
        }
        if let Some(deleted) = self.deleted {
            filter = filter.deleted(deleted);
        }
        if let Some(ref text) = self.search {
            filter = filter.search(text.clone());
        }
        if self.since.is_some() || self.until.is_some() {
            let start = self.since.map(day_start_millis);
            let end = self
                .until
                .map(|day| day_start_millis(day + Duration::days(1)) - 1);
            filter = filter.between(start, end);
        }
        if let Some(direction) = self.sort {
            filter = filter.sorted(direction);
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        if let Some(offset) = self.offset {
            filter = filter.offset(offset);
        }
        if self.include_hidden {
            filter = filter.include_hidden();
        }
        if self.include_excluded {
            filter = filter.include_excluded();
        }
        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_flags_build_filter() {
        let cli = Cli::parse_from([
            "brook", "entries", "--feed", "a", "--feed", "b", "--unread", "--sort", "asc",
            "--limit", "20", "--since", "2024-01-01", "--until", "2024-01-01",
        ]);
        let Commands::Entries { filter } = cli.command else {
            panic!("expected entries command");
        };
        let filter = filter.to_filter();

        assert_eq!(filter.feeds, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(filter.read, Some(false));
        assert_eq!(filter.starred, None);
        assert_eq!(filter.sort_direction, SortDirection::Asc);
        assert_eq!(filter.limit, Some(20));
        assert_eq!(filter.start_date, Some(1_704_067_200_000));
        assert_eq!(filter.end_date, Some(1_704_067_200_000 + 86_400_000 - 1));
    }

    #[test]
    fn test_mark_parses_action_and_deleted_state() {
        let cli = Cli::parse_from(["brook", "mark", "trash", "--deleted", "no", "--starred"]);
        let Commands::Mark { action, filter } = cli.command else {
            panic!("expected mark command");
        };
        assert_eq!(action, MarkAction::Trash);

        let filter = filter.to_filter();
        assert_eq!(filter.deleted, Some(DeletedState::No));
        assert_eq!(filter.starred, Some(true));
    }

    #[test]
    fn test_read_and_unread_conflict() {
        assert!(Cli::try_parse_from(["brook", "count", "--read", "--unread"]).is_err());
    }

    #[test]
    fn test_empty_flags_mean_no_constraint() {
        assert_eq!(FilterArgs::default().to_filter(), Filter::new());
    }
}
