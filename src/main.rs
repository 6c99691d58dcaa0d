use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use brook::app::AppContext;
use brook::cli::{commands, Cli, Commands};
use brook::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(workers) = cli.workers {
        config.update.workers = workers;
    }
    let ctx = AppContext::new(cli.db, config)?;

    // A configured legacy database is picked up on any run.
    if !matches!(cli.command, Commands::Migrate { .. }) {
        if let Some(descriptor) = ctx.migrate_legacy(None).await? {
            tracing::info!("Migrated legacy database {}", descriptor.name);
        }
    }

    match cli.command {
        Commands::Add { url, folder, no_fetch } => {
            commands::add_feed(&ctx, &url, folder, !no_fetch).await?;
        }
        Commands::AddFolder { title, parent } => {
            commands::add_folder(&ctx, &title, parent)?;
        }
        Commands::Remove { feed, purge } => {
            commands::remove_feed(&ctx, &feed, purge)?;
        }
        Commands::List { hidden } => {
            commands::list_feeds(&ctx, hidden)?;
        }
        Commands::Entries { filter } => {
            commands::list_entries(&ctx, &filter)?;
        }
        Commands::Count { filter } => {
            commands::count_entries(&ctx, &filter)?;
        }
        Commands::Update { feeds } => {
            commands::update_feeds(&ctx, &feeds).await?;
        }
        Commands::Mark { action, filter } => {
            commands::mark_entries(&ctx, action, &filter)?;
        }
        Commands::Tag { name, remove, filter } => {
            commands::tag_entries(&ctx, &name, remove, &filter)?;
        }
        Commands::Expire => {
            commands::expire(&ctx)?;
        }
        Commands::Migrate { path } => {
            commands::migrate(&ctx, path.as_deref()).await?;
        }
    }

    Ok(())
}
