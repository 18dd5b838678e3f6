mod api;
mod blocklist;
mod cleanup;
mod config;
mod db;
mod declined;
mod mail;
mod media;
mod radarr;
mod report;
mod seerr;
mod tmdb;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::blocklist::{BlocklistManager, SyncReport};
use crate::config::Config;
use crate::media::MediaType;
use crate::radarr::RadarrClient;
use crate::report::ReportOutcome;
use crate::seerr::SeerrClient;
use crate::tmdb::TmdbClient;

#[derive(Parser)]
#[command(name = "listsync-ops", version, about = "Blocklist and housekeeping tools for list sync")]
struct Cli {
    /// JSON config file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `listsync_ops=debug`
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull Radarr import exclusions into the blocklist file
    SyncBlocklist,
    /// Merge the Seerr blacklist into the blocklist file
    ExportSeerrBlocklist,
    /// Show what the blocklist file currently holds
    BlocklistStats,
    /// Check whether a title would be blocked
    Check {
        tmdb_id: i64,
        #[arg(long, default_value = "movie")]
        media_type: MediaType,
    },
    /// Record declined Seerr requests locally
    SyncDeclined,
    /// Delete library movies that are on the Radarr exclusion list
    CleanupBlocked {
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Withdraw pending requests that only manual approval lists asked for
    CleanupManual {
        #[arg(long)]
        dry_run: bool,
    },
    /// Email the sync report
    Report {
        /// Send even if a report already went out today
        #[arg(long)]
        force: bool,
        /// Write the complete HTML report here instead of mailing it
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Per-list coverage breakdown
    Breakdown,
    /// Status counts and sample rows
    DbStatus,
    /// Create the database schema
    InitDb,
    /// Send a test email
    TestEmail,
}

fn init_logging(level: Option<&str>) {
    let filter = level
        .map(EnvFilter::new)
        .or_else(|| std::env::var("LOG_LEVEL").ok().map(EnvFilter::new))
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let mut config = config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    let ok = run(cli.command, &config).await?;
    if !ok {
        std::process::exit(1);
    }

    Ok(())
}

/// Returns false when the command ran but should exit non-zero.
async fn run(command: Command, config: &Config) -> Result<bool> {
    match command {
        Command::SyncBlocklist => {
            let report = blocklist::sync_radarr_blacklist(config).await?;
            Ok(print_sync(report.as_ref()))
        }
        Command::ExportSeerrBlocklist => {
            let report = blocklist::export_seerr_blocklist(config).await?;
            Ok(print_sync(report.as_ref()))
        }
        Command::BlocklistStats => {
            let mut manager = manager(config);
            manager.reload();
            println!("{}", serde_json::to_string_pretty(&manager.stats())?);
            println!("Age: {}", manager.age_str());
            Ok(true)
        }
        Command::Check { tmdb_id, media_type } => {
            let mut manager = manager(config);
            let blocked = manager.is_blocked(tmdb_id, media_type).await;
            println!(
                "{media_type} {tmdb_id}: {}",
                if blocked { "BLOCKED" } else { "allowed" }
            );

            let conn = db::open(&config.database_path)?;
            if db::is_request_declined(&conn, tmdb_id, media_type)? {
                println!("{media_type} {tmdb_id}: previously declined in Seerr");
            }
            Ok(true)
        }
        Command::SyncDeclined => {
            let Some(seerr) = seerr_client(config) else {
                return Ok(false);
            };
            let conn = db::open(&config.database_path)?;
            let added = declined::sync_declined_requests(&conn, &seerr).await?;
            println!(
                "Synced {added} new declined requests ({} total)",
                db::declined_count(&conn)?
            );
            Ok(true)
        }
        Command::CleanupBlocked { dry_run, yes } => {
            let Some(api_key) = config.radarr.api_key.as_deref() else {
                error!("RADARR_API_KEY not set");
                return Ok(false);
            };
            let radarr = RadarrClient::new(&config.radarr.url, api_key);

            let report = cleanup::cleanup_blocked_movies(&radarr, dry_run, cleanup::DELETE_PAUSE, |violations| {
                print!("{}", cleanup::describe_violations(violations));
                yes || confirm(&format!("Delete {} movies? (yes/no): ", violations.len()))
            })
            .await?;

            if dry_run && !report.violations.is_empty() {
                print!("{}", cleanup::describe_violations(&report.violations));
                println!("[DRY RUN] Would delete {} movies", report.violations.len());
            } else if !report.cancelled && !report.violations.is_empty() {
                println!(
                    "Deleted {} movies, {} failed, freed {:.2} GB",
                    report.deleted,
                    report.failed,
                    report.bytes_freed as f64 / 1024.0 / 1024.0 / 1024.0
                );
            }
            Ok(report.failed == 0)
        }
        Command::CleanupManual { dry_run } => {
            let Some(seerr) = seerr_client(config) else {
                return Ok(false);
            };
            let conn = db::open(&config.database_path)?;
            let report = cleanup::cleanup_manual_approval(&conn, &seerr, dry_run).await?;
            print!("{}", cleanup::manual_summary(&report)?);
            Ok(report.errors.is_empty())
        }
        Command::Report { force, output } => {
            let conn = db::open(&config.database_path)?;

            if let Some(output) = output {
                let seerr_url = Some(config.seerr.url.as_str()).filter(|u| !u.is_empty());
                let html = report::full_report(&conn, seerr_url)?;
                std::fs::write(&output, html)
                    .with_context(|| format!("writing {}", output.display()))?;
                info!("Report written to {}", output.display());
                return Ok(true);
            }

            match report::send_report(config, &conn, force).await? {
                ReportOutcome::Disabled => println!("Email reports are disabled"),
                ReportOutcome::AlreadySentToday => println!("Report already sent today (use --force)"),
                ReportOutcome::Delivered(delivery) => println!("Report delivery: {delivery:?}"),
            }
            Ok(true)
        }
        Command::Breakdown => {
            let conn = db::open(&config.database_path)?;
            print!("{}", report::render_text_breakdown(&conn)?);
            Ok(true)
        }
        Command::DbStatus => {
            let conn = db::open(&config.database_path)?;
            print!("{}", report::db_status_text(&conn)?);
            Ok(true)
        }
        Command::InitDb => {
            db::open(&config.database_path)?;
            println!("Database initialized at {}", config.database_path.display());
            Ok(true)
        }
        Command::TestEmail => {
            let body = format!(
                "This is a test email from list-sync.\n\nSent at {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
            );
            let delivery = mail::send_email(
                &config.mail,
                &config.outbox_dir(),
                "List-Sync Test Email",
                &body,
                false,
                None,
            )
            .await?;
            println!("Test email: {delivery:?}");
            Ok(delivery != mail::Delivery::Disabled)
        }
    }
}

fn manager(config: &Config) -> BlocklistManager<Option<TmdbClient>> {
    let tmdb = config.tmdb_key.as_deref().map(TmdbClient::new);
    if tmdb.is_none() && config.blocklist.block_documentaries {
        warn!("TMDB_KEY not set, documentary check disabled");
    }

    BlocklistManager::new(
        &config.blocklist.path,
        config.blocklist.enabled,
        config.blocklist.reload_hours,
        config.blocklist.block_documentaries,
        tmdb,
    )
}

fn seerr_client(config: &Config) -> Option<SeerrClient> {
    match config.seerr.api_key.as_deref() {
        Some(api_key) => Some(SeerrClient::new(&config.seerr.url, api_key)),
        None => {
            error!("OVERSEERR_API_KEY not set");
            None
        }
    }
}

fn print_sync(report: Option<&SyncReport>) -> bool {
    let Some(report) = report else {
        return false;
    };

    if report.recovered {
        println!("Previous blocklist was unreadable and has been replaced");
    }
    println!(
        "{}: {} movies (+{} -{}), {} tv (+{} -{})",
        report.source,
        report.movie_count,
        report.movies.added.len(),
        report.movies.removed.len(),
        report.tv_count,
        report.tv.added.len(),
        report.tv.removed.len(),
    );
    true
}

fn confirm(prompt: &str) -> bool {
    print!("{prompt}");
    if io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim().eq_ignore_ascii_case("yes")
}
