use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use marquee_client::{ChromiumBrowser, FetchConfig, ReqwestImageFetcher};
use marquee_core::models::RunStatus;
use marquee_core::{
    ImageFiles, SyncConfig, SyncOutcome, SyncService, ThrottleConfig, ThrottledImageFetcher,
    TracingSyncReporter, VenueConfig, VenueExtractor, builtin_venues, find_venue, load_venues,
};
use marquee_db::{Database, DatabaseConfig, SqliteImageStore};

#[derive(Parser)]
#[command(name = "marquee", version, about = "Harvest event flyers from venue websites")]
struct Cli {
    #[command(flatten)]
    db: DbArgs,

    /// JSON venue table replacing the built-in one
    #[arg(long, global = true, env = "MARQUEE_VENUES")]
    venues_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DbArgs {
    /// SQLite database URL
    #[arg(
        long,
        global = true,
        env = "DATABASE_URL",
        default_value = marquee_db::config::DEFAULT_DATABASE_URL
    )]
    database_url: String,

    /// Connection pool size
    #[arg(long, global = true, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape venues and store any new flyers
    Sync(SyncArgs),

    /// List configured venues with their stored image counts
    Venues,

    /// Show recent sync runs
    Status {
        /// Number of runs to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show content hashes stored under more than one URL
    Duplicates {
        /// Number of hashes to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args)]
struct SyncArgs {
    /// Sync every configured venue
    #[arg(long, required_unless_present = "venue", conflicts_with = "venue")]
    all: bool,

    /// Sync a single venue by key (see `marquee venues`)
    #[arg(long)]
    venue: Option<String>,

    /// Directory image files are stored under
    #[arg(long, env = "MARQUEE_IMAGES_DIR", default_value = "images")]
    images_dir: PathBuf,

    /// Concurrent image downloads per venue
    #[arg(
        long,
        env = "MARQUEE_CONCURRENCY",
        default_value_t = 4,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    concurrency: u32,

    /// Venues scraped at the same time
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    parallel_venues: u32,

    /// Image request timeout in seconds
    #[arg(long, default_value_t = 30)]
    fetch_timeout: u64,

    /// Page operation timeout in seconds
    #[arg(long, default_value_t = 60)]
    page_timeout: u64,

    /// Minimum delay between image requests to one domain, in milliseconds
    #[arg(long, default_value_t = 200)]
    politeness_ms: u64,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("marquee=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let venues = match &cli.venues_file {
        Some(path) => load_venues(path)
            .with_context(|| format!("Failed to load venues from {}", path.display()))?,
        None => builtin_venues(),
    };

    match cli.command {
        Commands::Sync(args) => {
            let selected = select_venues(&venues, &args);
            let db = connect_db(&cli.db).await?;
            cmd_sync(selected, &args, db.image_store()).await
        }
        Commands::Venues => {
            let db = connect_db(&cli.db).await?;
            cmd_venues(&venues, &db.image_store()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { limit } => {
            let db = connect_db(&cli.db).await?;
            cmd_status(limit, &db.image_store()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Duplicates { limit } => {
            let db = connect_db(&cli.db).await?;
            cmd_duplicates(limit, &db.image_store()).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Open and migrate the database.
async fn connect_db(args: &DbArgs) -> Result<Database> {
    let config = DatabaseConfig::new(&args.database_url, args.max_connections)?;
    let db = Database::connect(&config)
        .await
        .context("Failed to open database")?;
    db.migrate().await?;
    Ok(db)
}

/// Resolve `--all` / `--venue` to extractors; an unknown key exits with a
/// usage error before anything is touched.
fn select_venues(venues: &[VenueConfig], args: &SyncArgs) -> Vec<VenueExtractor> {
    let configs: Vec<VenueConfig> = match &args.venue {
        Some(key) => match find_venue(venues, key) {
            Some(config) => vec![config.clone()],
            None => {
                let known: Vec<&str> = venues.iter().map(|v| v.key.as_str()).collect();
                Cli::command()
                    .error(
                        ErrorKind::InvalidValue,
                        format!("unknown venue '{key}' (known: {})", known.join(", ")),
                    )
                    .exit()
            }
        },
        _ => venues.to_vec(),
    };
    configs.into_iter().map(VenueExtractor::from_config).collect()
}

async fn cmd_sync(
    extractors: Vec<VenueExtractor>,
    args: &SyncArgs,
    store: SqliteImageStore,
) -> Result<ExitCode> {
    let fetch_config =
        FetchConfig::default().with_timeout(Duration::from_secs(args.fetch_timeout));
    let fetcher = ThrottledImageFetcher::new(
        ReqwestImageFetcher::new(fetch_config).context("Failed to create HTTP client")?,
        ThrottleConfig::new(Duration::from_millis(args.politeness_ms))
            .with_jitter(Duration::from_millis(args.politeness_ms / 2)),
    );

    let browser = ChromiumBrowser::launch(Duration::from_secs(args.page_timeout))
        .await
        .context("Failed to launch headless browser")?;

    let sync_config = SyncConfig::default()
        .with_download_concurrency(args.concurrency as usize)
        .with_venue_concurrency(args.parallel_venues as usize);
    let service = SyncService::new(
        browser,
        fetcher,
        store,
        ImageFiles::new(&args.images_dir),
        sync_config,
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling sync");
            on_signal.cancel();
        }
    });

    tracing::info!(venues = extractors.len(), "Starting sync");
    let outcomes = service
        .sync_all(&extractors, &cancel, &TracingSyncReporter)
        .await;
    service.into_browser().shutdown().await;

    for outcome in &outcomes {
        println!("{}", summary_line(outcome));
    }
    let skipped = extractors.len() - outcomes.len();
    println!("{}", total_line(&outcomes, skipped));

    if outcomes.iter().any(SyncOutcome::is_failed) || skipped > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn cmd_venues(venues: &[VenueConfig], store: &SqliteImageStore) -> Result<()> {
    let summaries = store.venue_summaries().await?;
    let by_name: HashMap<&str, _> = summaries
        .iter()
        .map(|s| (s.venue.name.as_str(), s))
        .collect();

    for venue in venues {
        let (count, last) = match by_name.get(venue.name.as_str()) {
            Some(s) => (
                s.image_count,
                s.venue
                    .last_scraped
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "never".to_string()),
            ),
            None => (0, "never".to_string()),
        };
        println!(
            "  {:<16} {:<26} {:>5} images  last scraped: {}",
            venue.key, venue.name, count, last
        );
        println!("  {:<16} {}", "", venue.events_url);
    }

    println!("\nTotal: {} venues", venues.len());
    Ok(())
}

async fn cmd_status(limit: usize, store: &SqliteImageStore) -> Result<()> {
    let history = store.recent_runs(limit).await?;
    if history.is_empty() {
        println!("No sync runs recorded yet");
        return Ok(());
    }

    for entry in &history {
        let run = &entry.run;
        println!(
            "  {:<9} {} {:<26} found {:>3}, new {:>3}{}",
            status_tag(run.status),
            run.completed_at.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.venue_name,
            run.images_found,
            run.images_new,
            run.error_message
                .as_deref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

async fn cmd_duplicates(limit: usize, store: &SqliteImageStore) -> Result<()> {
    let shared = store.shared_hashes(limit).await?;
    if shared.is_empty() {
        println!("No content stored under more than one URL");
        return Ok(());
    }

    for entry in &shared {
        let short = &entry.image_hash[..16.min(entry.image_hash.len())];
        println!("{short}... ({} URLs)", entry.copies);
        for image in store.images_by_hash(&entry.image_hash).await? {
            println!("    {} -> {}", image.source_url, image.local_path);
        }
    }
    Ok(())
}

fn status_tag(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Success => "[OK]",
        RunStatus::Partial => "[PARTIAL]",
        RunStatus::Failed => "[FAIL]",
    }
}

fn summary_line(outcome: &SyncOutcome) -> String {
    let mut line = format!(
        "{} {}: {} found, {} new",
        status_tag(outcome.status),
        outcome.venue_name,
        outcome.images_found,
        outcome.images_new
    );
    if outcome.images_rejected > 0 {
        line.push_str(&format!(", {} rejected", outcome.images_rejected));
    }
    if let Some(error) = &outcome.error {
        line.push_str(&format!(" ({error})"));
    }
    line
}

fn total_line(outcomes: &[SyncOutcome], skipped: usize) -> String {
    let found: u32 = outcomes.iter().map(|o| o.images_found).sum();
    let new: u32 = outcomes.iter().map(|o| o.images_new).sum();
    let failed = outcomes.iter().filter(|o| o.is_failed()).count();
    let mut line = format!(
        "Total: {} venues, {found} found, {new} new, {failed} failed",
        outcomes.len()
    );
    if skipped > 0 {
        line.push_str(&format!(", {skipped} skipped"));
    }
    line
}
