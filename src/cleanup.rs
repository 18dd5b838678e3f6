//! One-off repair jobs: purge excluded movies that slipped into the Radarr
//! library, and withdraw still-pending Seerr requests that only manual
//! approval lists asked for.

use anyhow::Result;
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::db::{self, ListRef};
use crate::radarr::{Exclusion, Movie, RadarrClient};
use crate::seerr::{MediaStatus, SeerrClient};

pub const DELETE_PAUSE: Duration = Duration::from_millis(500);

pub trait RadarrLibrary {
    fn exclusions(&self) -> impl Future<Output = Result<Vec<Exclusion>>> + Send;
    fn movies(&self) -> impl Future<Output = Result<Vec<Movie>>> + Send;
    fn delete_movie(&self, movie_id: i64) -> impl Future<Output = Result<()>> + Send;
}

impl RadarrLibrary for RadarrClient {
    async fn exclusions(&self) -> Result<Vec<Exclusion>> {
        self.fetch_exclusions().await
    }

    async fn movies(&self) -> Result<Vec<Movie>> {
        self.fetch_movies().await
    }

    async fn delete_movie(&self, movie_id: i64) -> Result<()> {
        RadarrClient::delete_movie(self, movie_id).await
    }
}

pub trait RequestService {
    fn media_status(&self, tmdb_id: i64) -> impl Future<Output = Result<MediaStatus>> + Send;
    fn delete_request(&self, request_id: i64) -> impl Future<Output = Result<bool>> + Send;
}

impl RequestService for SeerrClient {
    async fn media_status(&self, tmdb_id: i64) -> Result<MediaStatus> {
        SeerrClient::media_status(self, tmdb_id).await
    }

    async fn delete_request(&self, request_id: i64) -> Result<bool> {
        SeerrClient::delete_request(self, request_id).await
    }
}

// === Blocked movies in the Radarr library ===

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub movie_id: i64,
    pub title: String,
    pub year: Option<i32>,
    pub tmdb_id: i64,
    pub size_bytes: u64,
}

#[derive(Debug, Default)]
pub struct BlockedCleanupReport {
    pub violations: Vec<Violation>,
    pub deleted: usize,
    pub failed: usize,
    pub bytes_freed: u64,
    pub cancelled: bool,
}

pub fn find_violations(exclusions: &[Exclusion], movies: &[Movie]) -> Vec<Violation> {
    let excluded: BTreeSet<i64> = exclusions.iter().filter_map(|e| e.tmdb_id).collect();

    movies
        .iter()
        .filter_map(|m| {
            let tmdb_id = m.tmdb_id.filter(|id| excluded.contains(id))?;
            Some(Violation {
                movie_id: m.id,
                title: m.title.clone(),
                year: m.year,
                tmdb_id,
                size_bytes: m.size_bytes(),
            })
        })
        .collect()
}

/// `confirm` sees the violations before anything is deleted and must return true.
pub async fn cleanup_blocked_movies<R, F>(
    radarr: &R,
    dry_run: bool,
    pause: Duration,
    confirm: F,
) -> Result<BlockedCleanupReport>
where
    R: RadarrLibrary,
    F: FnOnce(&[Violation]) -> bool,
{
    let exclusions = radarr.exclusions().await?;
    info!("Found {} exclusions in Radarr", exclusions.len());

    let movies = radarr.movies().await?;
    info!("Found {} movies in Radarr library", movies.len());

    let mut report = BlockedCleanupReport {
        violations: find_violations(&exclusions, &movies),
        ..Default::default()
    };

    if report.violations.is_empty() {
        info!("No violations found, library is clean");
        return Ok(report);
    }

    warn!(
        "Found {} movies that are on the exclusion list",
        report.violations.len()
    );

    if dry_run {
        info!("[DRY RUN] Nothing deleted");
        return Ok(report);
    }

    if !confirm(&report.violations) {
        info!("Cancelled");
        report.cancelled = true;
        return Ok(report);
    }

    for (i, violation) in report.violations.iter().enumerate() {
        if i > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        match radarr.delete_movie(violation.movie_id).await {
            Ok(()) => {
                info!(
                    "Deleted: {} (TMDB: {}, Radarr ID: {})",
                    violation.title, violation.tmdb_id, violation.movie_id
                );
                report.deleted += 1;
                report.bytes_freed += violation.size_bytes;
            }
            Err(e) => {
                error!("Failed to delete {}: {e}", violation.title);
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

pub fn describe_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| {
            let year = v.year.map(|y| y.to_string()).unwrap_or_else(|| "N/A".into());
            format!(
                "  - {} ({year}) - TMDB: {} - Size: {:.1} MB\n",
                v.title,
                v.tmdb_id,
                v.size_bytes as f64 / 1024.0 / 1024.0
            )
        })
        .collect()
}

// === Manual approval lists ===

#[derive(Debug, Clone, PartialEq)]
pub struct ManualMovie {
    pub tmdb_id: i64,
    pub title: String,
    pub year: Option<i32>,
    pub status_text: String,
    pub request_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanupFailure {
    pub tmdb_id: i64,
    pub title: String,
    pub year: Option<i32>,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ManualCleanupReport {
    pub manual_lists: Vec<ListRef>,
    pub auto_lists: Vec<ListRef>,
    pub movies_manual_only: Vec<ManualMovie>,
    pub movies_also_in_auto: Vec<i64>,
    pub unrequested: Vec<ManualMovie>,
    pub already_downloaded: Vec<ManualMovie>,
    pub not_requested: Vec<ManualMovie>,
    pub errors: Vec<CleanupFailure>,
    pub dry_run: bool,
}

pub async fn cleanup_manual_approval<S: RequestService>(
    conn: &Connection,
    seerr: &S,
    dry_run: bool,
) -> Result<ManualCleanupReport> {
    let mut report = ManualCleanupReport {
        dry_run,
        ..Default::default()
    };

    report.manual_lists = db::manual_lists(conn)?;
    if report.manual_lists.is_empty() {
        warn!("No manual approval lists found (lists need a user_id other than '1')");
        return Ok(report);
    }
    report.auto_lists = db::auto_lists(conn)?;

    let manual = db::movie_ids_for_lists(conn, &report.manual_lists)?;
    let auto = db::movie_ids_for_lists(conn, &report.auto_lists)?;
    info!(
        "Movies in manual approval lists: {}, in auto-approval lists: {}",
        manual.len(),
        auto.len()
    );

    let unique: Vec<i64> = manual.difference(&auto).copied().collect();
    report.movies_also_in_auto = manual.intersection(&auto).copied().collect();
    info!("Movies unique to manual approval lists: {}", unique.len());

    for tmdb_id in unique {
        let Some(details) = db::movie_details(conn, tmdb_id)? else {
            warn!("Could not find details for TMDB ID {tmdb_id}");
            continue;
        };

        info!("Processing: {} ({:?}) [TMDB: {tmdb_id}]", details.title, details.year);

        let failure = |error: &str| CleanupFailure {
            tmdb_id,
            title: details.title.clone(),
            year: details.year,
            error: error.to_string(),
        };

        let status = match seerr.media_status(tmdb_id).await {
            Ok(status) => status,
            Err(e) => {
                error!("Could not get status from Seerr: {e}");
                report.errors.push(failure("Could not get status from Seerr"));
                continue;
            }
        };

        let (state, request_id) = match &status {
            MediaStatus::Known { state, request_id } => (Some(*state), *request_id),
            MediaStatus::NotInSeerr => (None, None),
        };

        let movie = ManualMovie {
            tmdb_id,
            title: details.title.clone(),
            year: details.year,
            status_text: status.label(),
            request_id,
        };
        info!("  Status: {}", movie.status_text);

        match state {
            Some(state) if state.is_pending() => match request_id {
                Some(request_id) if dry_run => {
                    info!("  [DRY RUN] Would delete request ID {request_id}");
                    report.unrequested.push(movie.clone());
                }
                Some(request_id) => match seerr.delete_request(request_id).await {
                    Ok(true) => {
                        info!("  Deleted request ID {request_id}");
                        report.unrequested.push(movie.clone());
                    }
                    Ok(false) => report.errors.push(failure("Failed to delete request")),
                    Err(e) => {
                        error!("  Error deleting request ID {request_id}: {e}");
                        report.errors.push(failure("Failed to delete request"));
                    }
                },
                None => {
                    warn!("  No request ID found, cannot unrequest");
                    report.errors.push(failure("No request ID found"));
                }
            },
            Some(state) if state.is_downloaded() => {
                report.already_downloaded.push(movie.clone());
            }
            _ => report.not_requested.push(movie.clone()),
        }

        report.movies_manual_only.push(movie);
    }

    Ok(report)
}

pub fn manual_summary(report: &ManualCleanupReport) -> Result<String> {
    let rule = "=".repeat(80);
    let mut out = String::new();

    writeln!(out, "{rule}\nCLEANUP SUMMARY\n{rule}")?;
    writeln!(out, "\nLists:")?;
    writeln!(out, "  - Manual approval lists: {}", report.manual_lists.len())?;
    for list in &report.manual_lists {
        writeln!(out, "    * {}:{}", list.list_type, list.list_id)?;
    }
    writeln!(out, "  - Auto-approval lists: {}", report.auto_lists.len())?;

    writeln!(out, "\nMovies:")?;
    writeln!(out, "  - Unique to manual lists: {}", report.movies_manual_only.len())?;
    writeln!(out, "  - Also in auto lists: {}", report.movies_also_in_auto.len())?;

    writeln!(out, "\nActions:")?;
    writeln!(out, "  - Unrequested: {}", report.unrequested.len())?;
    writeln!(
        out,
        "  - Already downloaded (skipped): {}",
        report.already_downloaded.len()
    )?;
    writeln!(out, "  - Not requested (skipped): {}", report.not_requested.len())?;
    writeln!(out, "  - Errors: {}", report.errors.len())?;

    if !report.unrequested.is_empty() {
        writeln!(out, "\nUnrequested Movies:")?;
        for movie in &report.unrequested {
            writeln!(out, "  * {} - {}", movie.title, movie.status_text)?;
        }
    }

    if !report.errors.is_empty() {
        writeln!(out, "\nErrors:")?;
        for failure in &report.errors {
            writeln!(out, "  * {}: {}", failure.title, failure.error)?;
        }
    }

    if report.dry_run {
        writeln!(out, "\nDRY RUN MODE - No actual changes were made")?;
    }

    Ok(out)
}
