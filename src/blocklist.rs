//! On-disk TMDB blocklist: sync from a remote exclusion source, atomic
//! replacement of the JSON file, and the in-memory manager consulted before
//! anything is requested.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::media::MediaType;
use crate::radarr::RadarrClient;
use crate::seerr::SeerrClient;

pub const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum BlocklistError {
    #[error("blocklist {path} is unreadable: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

fn unknown() -> String {
    "unknown".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlocklistFile {
    #[serde(default = "unknown")]
    pub version: String,
    #[serde(default = "unknown")]
    pub exported_at: String,
    #[serde(default = "unknown")]
    pub source: String,
    #[serde(default)]
    pub movies: Vec<i64>,
    #[serde(default)]
    pub tv: Vec<i64>,
    #[serde(default)]
    pub total_count: usize,
}

impl BlocklistFile {
    pub fn movie_set(&self) -> BTreeSet<i64> {
        self.movies.iter().copied().collect()
    }

    pub fn tv_set(&self) -> BTreeSet<i64> {
        self.tv.iter().copied().collect()
    }
}

/// IDs reported by a remote exclusion source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteExclusions {
    pub movies: BTreeSet<i64>,
    pub tv: BTreeSet<i64>,
}

/// Media types a source is authoritative for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub movies: bool,
    pub tv: bool,
}

impl Scope {
    pub const MOVIES: Scope = Scope {
        movies: true,
        tv: false,
    };
    pub const ALL: Scope = Scope {
        movies: true,
        tv: true,
    };
}

pub trait ExclusionSource {
    fn name(&self) -> &'static str;

    fn scope(&self) -> Scope;

    fn fetch_remote(&self) -> impl Future<Output = Result<RemoteExclusions>> + Send;
}

pub trait GenreLookup {
    fn is_documentary(
        &self,
        tmdb_id: i64,
        media_type: MediaType,
    ) -> impl Future<Output = bool> + Send;
}

impl<G: GenreLookup + Sync> GenreLookup for Option<G> {
    async fn is_documentary(&self, tmdb_id: i64, media_type: MediaType) -> bool {
        match self {
            Some(lookup) => lookup.is_documentary(tmdb_id, media_type).await,
            None => {
                debug!("TMDB_KEY not configured, cannot check documentary genre");
                false
            }
        }
    }
}

// === File IO ===

/// `Ok(None)` when the file does not exist.
pub fn read_blocklist(path: &Path) -> Result<Option<BlocklistFile>> {
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(path)?;
    let corrupt = |reason: String| BlocklistError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;

    if !value.is_object() {
        return Err(corrupt("expected a JSON object".into()).into());
    }

    let data = serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))?;
    Ok(Some(data))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "blocklist".into());
    name.push(".tmp");
    path.with_file_name(name)
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "blocklist".into());
    name.push(".corrupt");
    path.with_file_name(name)
}

/// Replace `path` with `data` via a synced sibling temp file and a rename.
/// On any failure the previous file is left as it was.
pub fn write_atomic(path: &Path, data: &BlocklistFile) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);

    let result = (|| -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        let mut file = File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    if result.is_err() && tmp.exists() {
        if let Err(e) = fs::remove_file(&tmp) {
            warn!("Could not remove temp file {}: {e}", tmp.display());
        }
    }

    result
}

// === Merge ===

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlocklistDelta {
    pub added: Vec<i64>,
    pub removed: Vec<i64>,
    pub unchanged: usize,
}

pub fn compute_delta(existing: &BTreeSet<i64>, remote: &BTreeSet<i64>) -> BlocklistDelta {
    BlocklistDelta {
        added: remote.difference(existing).copied().collect(),
        removed: existing.difference(remote).copied().collect(),
        unchanged: existing.intersection(remote).count(),
    }
}

/// The remote set replaces every media type in `scope`; the rest is carried over.
pub fn merge(
    existing: Option<&BlocklistFile>,
    remote: &RemoteExclusions,
    scope: Scope,
    source: &str,
    now: DateTime<Utc>,
) -> BlocklistFile {
    let kept_movies = existing.map(BlocklistFile::movie_set).unwrap_or_default();
    let kept_tv = existing.map(BlocklistFile::tv_set).unwrap_or_default();

    let movies: Vec<i64> = if scope.movies {
        remote.movies.iter().copied().collect()
    } else {
        kept_movies.into_iter().collect()
    };
    let tv: Vec<i64> = if scope.tv {
        remote.tv.iter().copied().collect()
    } else {
        kept_tv.into_iter().collect()
    };

    BlocklistFile {
        version: FORMAT_VERSION.into(),
        exported_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        source: source.into(),
        total_count: movies.len() + tv.len(),
        movies,
        tv,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub source: String,
    pub movies: BlocklistDelta,
    pub tv: BlocklistDelta,
    pub movie_count: usize,
    pub tv_count: usize,
    /// The previous file could not be parsed and was set aside.
    pub recovered: bool,
}

pub async fn sync_blocklist<S: ExclusionSource>(source: &S, path: &Path) -> Result<SyncReport> {
    info!("Syncing {} exclusions into {}", source.name(), path.display());

    // Nothing on disk changes if the fetch fails.
    let remote = source.fetch_remote().await?;

    let mut recovered = false;
    let existing = match read_blocklist(path) {
        Ok(existing) => existing,
        Err(e) if e.downcast_ref::<BlocklistError>().is_some() => {
            error!("{e}");
            let backup = corrupt_path(path);
            match fs::copy(path, &backup) {
                Ok(_) => warn!("Saved unreadable blocklist to {}", backup.display()),
                Err(copy_err) => warn!("Could not back up unreadable blocklist: {copy_err}"),
            }
            recovered = true;
            None
        }
        Err(e) => return Err(e),
    };

    let old_movies = existing.as_ref().map(BlocklistFile::movie_set).unwrap_or_default();
    let old_tv = existing.as_ref().map(BlocklistFile::tv_set).unwrap_or_default();

    let merged = merge(
        existing.as_ref(),
        &remote,
        source.scope(),
        source.name(),
        Utc::now(),
    );

    let movies = compute_delta(&old_movies, &merged.movie_set());
    let tv = compute_delta(&old_tv, &merged.tv_set());

    write_atomic(path, &merged)?;

    info!(
        "Saved {} movie / {} tv exclusions to {} (+{} -{} movies, +{} -{} tv)",
        merged.movies.len(),
        merged.tv.len(),
        path.display(),
        movies.added.len(),
        movies.removed.len(),
        tv.added.len(),
        tv.removed.len(),
    );

    Ok(SyncReport {
        source: source.name().into(),
        movie_count: merged.movies.len(),
        tv_count: merged.tv.len(),
        movies,
        tv,
        recovered,
    })
}

/// `Ok(None)` when Radarr is not configured.
pub async fn sync_radarr_blacklist(config: &Config) -> Result<Option<SyncReport>> {
    let Some(api_key) = config.radarr.api_key.as_deref() else {
        warn!("RADARR_API_KEY not set - cannot sync Radarr exclusions");
        return Ok(None);
    };

    let client = RadarrClient::new(&config.radarr.url, api_key);
    sync_blocklist(&client, &config.blocklist.path).await.map(Some)
}

pub async fn export_seerr_blocklist(config: &Config) -> Result<Option<SyncReport>> {
    let Some(api_key) = config.seerr.api_key.as_deref() else {
        warn!("SEERR_API_KEY not set - cannot export Seerr blacklist");
        return Ok(None);
    };

    let client = SeerrClient::new(&config.seerr.url, api_key);
    sync_blocklist(&client, &config.blocklist.path).await.map(Some)
}

// === Manager ===

#[derive(Debug, Clone, Serialize)]
pub struct BlocklistStats {
    pub enabled: bool,
    pub loaded: bool,
    pub loaded_at: Option<String>,
    pub age_hours: Option<f64>,
    pub file_path: String,
    pub file_exists: bool,
    pub version: Option<String>,
    pub source: Option<String>,
    pub movie_count: usize,
    pub tv_count: usize,
    pub total_count: usize,
    pub reload_hours: u64,
    pub should_reload: bool,
}

pub struct BlocklistManager<G> {
    path: PathBuf,
    enabled: bool,
    reload_hours: u64,
    block_documentaries: bool,
    genres: G,
    movies: HashSet<i64>,
    tv: HashSet<i64>,
    loaded_at: Option<DateTime<Utc>>,
    version: Option<String>,
    source: Option<String>,
    total_count: usize,
}

impl<G: GenreLookup> BlocklistManager<G> {
    pub fn new(
        path: impl Into<PathBuf>,
        enabled: bool,
        reload_hours: u64,
        block_documentaries: bool,
        genres: G,
    ) -> Self {
        let path = path.into();
        info!(
            "BlocklistManager initialized (enabled={enabled}, path={})",
            path.display()
        );

        Self {
            path,
            enabled,
            reload_hours,
            block_documentaries,
            genres,
            movies: HashSet::new(),
            tv: HashSet::new(),
            loaded_at: None,
            version: None,
            source: None,
            total_count: 0,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded_at.is_some()
    }

    /// Missing or unreadable files never fail the caller: the manager keeps
    /// whatever it had and reports `false`.
    pub fn load(&mut self, force: bool) -> bool {
        if !self.enabled {
            info!("Blocklist is disabled, skipping load");
            return false;
        }

        if !force && self.loaded_at.is_some() && !self.should_reload() {
            debug!("Blocklist still fresh (loaded {} ago)", self.age_str());
            return true;
        }

        let data = match read_blocklist(&self.path) {
            Ok(Some(data)) => data,
            Ok(None) => {
                warn!("Blocklist file not found: {}", self.path.display());
                warn!("Continuing without blocklist - all items will be processed");
                return false;
            }
            Err(e) => {
                error!("Failed to load blocklist: {e}");
                warn!("Continuing without blocklist - all items will be processed");
                return false;
            }
        };

        self.movies = data.movies.iter().copied().collect();
        self.tv = data.tv.iter().copied().collect();
        self.loaded_at = Some(Utc::now());
        self.total_count = self.movies.len() + self.tv.len();

        info!("Loaded blocklist from {}", self.path.display());
        info!(
            "  Version: {}, Source: {}, Exported: {}",
            data.version, data.source, data.exported_at
        );
        info!(
            "  Movies: {}, TV: {}, Total: {}",
            self.movies.len(),
            self.tv.len(),
            self.total_count
        );

        self.version = Some(data.version);
        self.source = Some(data.source);

        true
    }

    pub fn reload(&mut self) -> bool {
        self.load(true)
    }

    pub fn should_reload(&self) -> bool {
        match self.loaded_at {
            None => true,
            Some(_) => self.age_hours() > self.reload_hours as f64,
        }
    }

    pub async fn is_blocked(&mut self, tmdb_id: i64, media_type: MediaType) -> bool {
        if !self.enabled {
            return false;
        }

        if self.loaded_at.is_none() {
            self.load(false);
            if self.loaded_at.is_none() {
                return self.documentary(tmdb_id, media_type).await;
            }
        }

        if self.should_reload() {
            info!("Blocklist is stale, reloading...");
            self.load(true);
        }

        let listed = match media_type {
            MediaType::Movie => self.movies.contains(&tmdb_id),
            MediaType::Tv => self.tv.contains(&tmdb_id),
        };

        listed || self.documentary(tmdb_id, media_type).await
    }

    async fn documentary(&self, tmdb_id: i64, media_type: MediaType) -> bool {
        if !self.block_documentaries {
            return false;
        }

        let is_doc = self.genres.is_documentary(tmdb_id, media_type).await;
        if is_doc {
            info!("Documentary detected (TMDB: {tmdb_id})");
        }
        is_doc
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        info!("Blocklist enabled");
        if self.loaded_at.is_none() {
            self.load(false);
        }
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        info!("Blocklist disabled");
    }

    pub fn stats(&self) -> BlocklistStats {
        BlocklistStats {
            enabled: self.enabled,
            loaded: self.loaded_at.is_some(),
            loaded_at: self.loaded_at.map(|t| t.to_rfc3339()),
            age_hours: self
                .loaded_at
                .map(|_| (self.age_hours() * 100.0).round() / 100.0),
            file_path: self.path.display().to_string(),
            file_exists: self.path.exists(),
            version: self.version.clone(),
            source: self.source.clone(),
            movie_count: self.movies.len(),
            tv_count: self.tv.len(),
            total_count: self.total_count,
            reload_hours: self.reload_hours,
            should_reload: self.should_reload(),
        }
    }

    fn age_hours(&self) -> f64 {
        match self.loaded_at {
            Some(at) => (Utc::now() - at).num_seconds() as f64 / 3600.0,
            None => 0.0,
        }
    }

    pub fn age_str(&self) -> String {
        if self.loaded_at.is_none() {
            return "never loaded".into();
        }

        let hours = self.age_hours();
        if hours < 1.0 {
            format!("{} min", (hours * 60.0) as i64)
        } else if hours < 24.0 {
            format!("{} hours", hours as i64)
        } else {
            format!("{} days", (hours / 24.0) as i64)
        }
    }

    #[cfg(test)]
    fn backdate(&mut self, hours: i64) {
        self.loaded_at = Some(Utc::now() - chrono::Duration::hours(hours));
    }
}
