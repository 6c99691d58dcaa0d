//! # Brook
//!
//! An embedded local data store for a feed reader.
//!
//! ## Architecture
//!
//! ```text
//! Fetcher → Normalizer → Ingest → Store ← Query ← CLI
//!                                   ↑
//!                         Registry (feed tree)
//! ```
//!
//! Everything goes through one [`Database`](store::Database): it owns the
//! SQLite connection, the feed tree snapshot and the change notification
//! channel.
//!
//! ## Quick Start
//!
//! ```bash
//! # Subscribe and fetch
//! brook add https://blog.rust-lang.org/feed.xml
//!
//! # Unread entries, newest first
//! brook entries --unread --sort desc --limit 20
//!
//! # Update all feeds
//! brook update
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the database,
/// fetcher and normalizer.
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// Configuration loaded from `~/.config/brook/config.toml`.
pub mod config;

/// Feeds, entries, revisions, parsed feed input and store events.
pub mod domain;

/// Entry retention: age and count limits, purging unsubscribed feeds.
pub mod expiry;

/// HTTP fetching with conditional request support.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for feed fetching
/// - [`HttpFetcher`](fetcher::http_fetcher::HttpFetcher): reqwest-based implementation
/// - [`ParallelFetcher`](fetcher::parallel::ParallelFetcher): Concurrent fetching with semaphore
pub mod fetcher;

/// Merging parsed feed items into stored entries.
pub mod ingest;

/// Feed parsing and normalization.
///
/// Converts RSS 0.9x/1.0/2.0, Atom 0.3/1.0, and JSON Feed 1.0
/// into [`ParsedFeed`](domain::ParsedFeed).
pub mod normalizer;

/// Filtered, sorted, paginated entry queries and bulk mutations.
pub mod query;

/// The feed tree: ordering, folders, backups.
pub mod registry;

/// Object stores and indexes over SQLite, schema versions and legacy
/// migration.
pub mod store;
