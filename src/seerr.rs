use anyhow::Result;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};

use crate::api::{self, ApiClient, LONG_TIMEOUT, SHORT_TIMEOUT};
use crate::blocklist::{ExclusionSource, RemoteExclusions, Scope};
use crate::media::MediaType;

const REQUEST_STATUS_DECLINED: i64 = 3;

/// `mediaInfo.status` as reported by Overseerr/Jellyseerr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    NotRequested,
    PendingApproval,
    Approved,
    Downloading,
    PartiallyAvailable,
    Available,
    Unknown(i64),
}

impl MediaState {
    pub fn from_code(code: Option<i64>) -> Self {
        match code {
            None | Some(0) => MediaState::NotRequested,
            Some(1) => MediaState::PendingApproval,
            Some(2) => MediaState::Approved,
            Some(3) => MediaState::Downloading,
            Some(4) => MediaState::PartiallyAvailable,
            Some(5) => MediaState::Available,
            Some(other) => MediaState::Unknown(other),
        }
    }

    pub fn label(&self) -> String {
        match self {
            MediaState::NotRequested => "Not Requested".into(),
            MediaState::PendingApproval => "Pending Approval".into(),
            MediaState::Approved => "Approved (Waiting Download)".into(),
            MediaState::Downloading => "Downloading".into(),
            MediaState::PartiallyAvailable => "Partially Available".into(),
            MediaState::Available => "Available".into(),
            MediaState::Unknown(code) => format!("Unknown ({code})"),
        }
    }

    /// Requested but nothing downloaded yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, MediaState::PendingApproval | MediaState::Approved)
    }

    pub fn is_downloaded(&self) -> bool {
        matches!(
            self,
            MediaState::Downloading | MediaState::PartiallyAvailable | MediaState::Available
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaStatus {
    NotInSeerr,
    Known {
        state: MediaState,
        request_id: Option<i64>,
    },
}

impl MediaStatus {
    pub fn label(&self) -> String {
        match self {
            MediaStatus::NotInSeerr => "Not in Seerr".into(),
            MediaStatus::Known { state, .. } => state.label(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistEntry {
    pub tmdb_id: Option<i64>,
    pub media_type: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaDetails {
    media_info: Option<MediaInfo>,
}

#[derive(Debug, Deserialize)]
struct MediaInfo {
    status: Option<i64>,
    #[serde(default)]
    requests: Vec<RequestRef>,
}

#[derive(Debug, Deserialize)]
struct RequestRef {
    id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaRequest {
    status: Option<i64>,
    media: Option<RequestMedia>,
    requested_by: Option<RequestUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestMedia {
    tmdb_id: Option<i64>,
    media_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequestUser {
    id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclinedRequest {
    pub tmdb_id: Option<i64>,
    pub media_type: MediaType,
    pub requested_by_id: Option<i64>,
}

fn parse_media_type(value: Option<&str>) -> MediaType {
    value
        .and_then(|v| v.parse().ok())
        .unwrap_or(MediaType::Movie)
}

pub fn blacklist_ids(entries: &[BlacklistEntry]) -> RemoteExclusions {
    let mut remote = RemoteExclusions::default();

    for entry in entries {
        let Some(tmdb_id) = entry.tmdb_id else {
            continue;
        };
        match entry.media_type.as_deref() {
            Some("movie") => {
                remote.movies.insert(tmdb_id);
            }
            Some("tv") => {
                remote.tv.insert(tmdb_id);
            }
            _ => {}
        }
    }

    remote
}

fn media_status(details: MediaDetails) -> MediaStatus {
    let (code, request_id) = match details.media_info {
        Some(info) => (
            info.status,
            info.requests.first().and_then(|r| r.id),
        ),
        None => (None, None),
    };

    MediaStatus::Known {
        state: MediaState::from_code(code),
        request_id,
    }
}

fn declined(requests: Vec<MediaRequest>) -> Vec<DeclinedRequest> {
    requests
        .into_iter()
        .filter(|r| r.status == Some(REQUEST_STATUS_DECLINED))
        .map(|r| {
            let media = r.media.unwrap_or(RequestMedia {
                tmdb_id: None,
                media_type: None,
            });
            DeclinedRequest {
                tmdb_id: media.tmdb_id,
                media_type: parse_media_type(media.media_type.as_deref()),
                requested_by_id: r.requested_by.and_then(|u| u.id),
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct SeerrClient {
    api: ApiClient,
}

impl SeerrClient {
    pub fn new(url: &str, api_key: &str) -> Self {
        Self {
            api: ApiClient::new(url, api_key),
        }
    }

    pub fn base_url(&self) -> &str {
        self.api.base_url()
    }

    pub async fn fetch_blacklist(&self) -> Result<Vec<BlacklistEntry>> {
        info!("Fetching blacklist from {}", self.api.base_url());
        let page: Page<BlacklistEntry> = self
            .api
            .get_json("/api/v1/blacklist", &[("take", "10000".into())], LONG_TIMEOUT)
            .await?;
        Ok(page.results)
    }

    pub async fn media_status(&self, tmdb_id: i64) -> Result<MediaStatus> {
        let result = self
            .api
            .get_json::<MediaDetails>(&format!("/api/v1/movie/{tmdb_id}"), &[], SHORT_TIMEOUT)
            .await;

        match result {
            Ok(details) => Ok(media_status(details)),
            Err(e) if api::http_status(&e) == Some(StatusCode::NOT_FOUND) => {
                Ok(MediaStatus::NotInSeerr)
            }
            Err(e) => Err(e),
        }
    }

    /// `Ok(false)` when the request is already gone.
    pub async fn delete_request(&self, request_id: i64) -> Result<bool> {
        let result = self
            .api
            .delete(&format!("/api/v1/request/{request_id}"), &[], SHORT_TIMEOUT)
            .await;

        match result {
            Ok(()) => Ok(true),
            Err(e) if api::http_status(&e) == Some(StatusCode::NOT_FOUND) => {
                warn!("Request ID {request_id} not found (already deleted?)");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn declined_requests(&self, limit: usize) -> Result<Vec<DeclinedRequest>> {
        let page: Page<MediaRequest> = self
            .api
            .get_json(
                "/api/v1/request",
                &[
                    ("take", limit.to_string()),
                    ("filter", "all".into()),
                    ("sort", "modified".into()),
                ],
                LONG_TIMEOUT,
            )
            .await?;

        Ok(declined(page.results))
    }
}

impl ExclusionSource for SeerrClient {
    fn name(&self) -> &'static str {
        "seerr"
    }

    fn scope(&self) -> Scope {
        Scope::ALL
    }

    async fn fetch_remote(&self) -> Result<RemoteExclusions> {
        let entries = self.fetch_blacklist().await?;
        let remote = blacklist_ids(&entries);

        info!(
            "Found {} blacklist entries: {} movies, {} TV shows",
            entries.len(),
            remote.movies.len(),
            remote.tv.len()
        );

        Ok(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklist_is_split_by_media_type() {
        let page: Page<BlacklistEntry> = serde_json::from_str(
            r#"{"pageInfo": {"pages": 1}, "results": [
                {"tmdbId": 1, "mediaType": "movie", "title": "A"},
                {"tmdbId": 2, "mediaType": "tv"},
                {"tmdbId": 1, "mediaType": "movie"},
                {"mediaType": "movie"},
                {"tmdbId": 9, "mediaType": "collection"}
            ]}"#,
        )
        .unwrap();

        let remote = blacklist_ids(&page.results);
        assert_eq!(remote.movies.into_iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(remote.tv.into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn media_status_reads_first_request() {
        let details: MediaDetails = serde_json::from_str(
            r#"{"id": 603, "mediaInfo": {"status": 2, "requests": [{"id": 41}, {"id": 42}]}}"#,
        )
        .unwrap();
        assert_eq!(
            media_status(details),
            MediaStatus::Known {
                state: MediaState::Approved,
                request_id: Some(41)
            }
        );

        let bare: MediaDetails = serde_json::from_str(r#"{"id": 603}"#).unwrap();
        assert_eq!(
            media_status(bare),
            MediaStatus::Known {
                state: MediaState::NotRequested,
                request_id: None
            }
        );
    }

    #[test]
    fn state_classification() {
        assert!(MediaState::from_code(Some(1)).is_pending());
        assert!(MediaState::from_code(Some(2)).is_pending());
        assert!(MediaState::from_code(Some(5)).is_downloaded());
        assert!(!MediaState::from_code(None).is_pending());
        assert_eq!(MediaState::from_code(Some(9)).label(), "Unknown (9)");
        assert_eq!(MediaStatus::NotInSeerr.label(), "Not in Seerr");
    }

    #[test]
    fn only_declined_requests_are_kept() {
        let page: Page<MediaRequest> = serde_json::from_str(
            r#"{"results": [
                {"id": 1, "status": 3, "media": {"tmdbId": 10, "mediaType": "movie"}, "requestedBy": {"id": 4}},
                {"id": 2, "status": 2, "media": {"tmdbId": 11, "mediaType": "movie"}},
                {"id": 3, "status": 3, "media": {"tmdbId": 12, "mediaType": "tv"}},
                {"id": 4, "status": 3}
            ]}"#,
        )
        .unwrap();

        let declined = declined(page.results);
        assert_eq!(declined.len(), 3);
        assert_eq!(declined[0].tmdb_id, Some(10));
        assert_eq!(declined[0].requested_by_id, Some(4));
        assert_eq!(declined[1].media_type, MediaType::Tv);
        assert_eq!(declined[2].tmdb_id, None);
    }
}
