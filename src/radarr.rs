use anyhow::Result;
use serde::Deserialize;
use tracing::info;

use crate::api::{ApiClient, LONG_TIMEOUT, SHORT_TIMEOUT};
use crate::blocklist::{ExclusionSource, RemoteExclusions, Scope};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exclusion {
    pub id: Option<i64>,
    pub tmdb_id: Option<i64>,
    pub movie_title: Option<String>,
    pub movie_year: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub year: Option<i32>,
    pub tmdb_id: Option<i64>,
    pub movie_file: Option<MovieFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MovieFile {
    #[serde(default)]
    pub size: u64,
}

impl Movie {
    pub fn size_bytes(&self) -> u64 {
        self.movie_file.as_ref().map(|f| f.size).unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct RadarrClient {
    api: ApiClient,
}

impl RadarrClient {
    pub fn new(url: &str, api_key: &str) -> Self {
        Self {
            api: ApiClient::new(url, api_key),
        }
    }

    pub async fn fetch_exclusions(&self) -> Result<Vec<Exclusion>> {
        info!("Fetching exclusions from {}", self.api.base_url());
        self.api
            .get_json("/api/v3/exclusions", &[], SHORT_TIMEOUT)
            .await
    }

    pub async fn fetch_movies(&self) -> Result<Vec<Movie>> {
        self.api.get_json("/api/v3/movie", &[], LONG_TIMEOUT).await
    }

    /// Removes the movie and its files without adding a new import exclusion.
    pub async fn delete_movie(&self, movie_id: i64) -> Result<()> {
        self.api
            .delete(
                &format!("/api/v3/movie/{movie_id}"),
                &[
                    ("deleteFiles", "true".to_string()),
                    ("addImportExclusion", "false".to_string()),
                ],
                LONG_TIMEOUT,
            )
            .await
    }
}

pub fn exclusion_ids(exclusions: &[Exclusion]) -> RemoteExclusions {
    RemoteExclusions {
        movies: exclusions.iter().filter_map(|e| e.tmdb_id).collect(),
        tv: Default::default(),
    }
}

impl ExclusionSource for RadarrClient {
    fn name(&self) -> &'static str {
        "radarr"
    }

    // Radarr only knows movies; TV entries in the file come from elsewhere.
    fn scope(&self) -> Scope {
        Scope::MOVIES
    }

    async fn fetch_remote(&self) -> Result<RemoteExclusions> {
        let exclusions = self.fetch_exclusions().await?;
        let remote = exclusion_ids(&exclusions);

        info!(
            "Found {} Radarr exclusions ({} with TMDb IDs)",
            exclusions.len(),
            remote.movies.len()
        );

        Ok(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_exclusions_and_skips_missing_ids() {
        let body = r#"[
            {"id": 1, "tmdbId": 603, "movieTitle": "The Matrix", "movieYear": 1999},
            {"id": 2, "movieTitle": "Orphan"},
            {"id": 3, "tmdbId": 603},
            {"id": 4, "tmdbId": 27205}
        ]"#;

        let exclusions: Vec<Exclusion> = serde_json::from_str(body).unwrap();
        assert_eq!(exclusions.len(), 4);

        let remote = exclusion_ids(&exclusions);
        assert_eq!(remote.movies.into_iter().collect::<Vec<_>>(), vec![603, 27205]);
        assert!(remote.tv.is_empty());
    }

    #[test]
    fn movie_size_defaults_to_zero() {
        let body = r#"[
            {"id": 10, "title": "A", "year": 2001, "tmdbId": 1, "movieFile": {"size": 2048}},
            {"id": 11, "title": "B", "tmdbId": 2}
        ]"#;

        let movies: Vec<Movie> = serde_json::from_str(body).unwrap();
        assert_eq!(movies[0].size_bytes(), 2048);
        assert_eq!(movies[1].size_bytes(), 0);
        assert_eq!(movies[1].year, None);
    }
}
