use anyhow::Result;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::api::check_status;
use crate::blocklist::GenreLookup;
use crate::media::MediaType;

const BASE_URL: &str = "https://api.themoviedb.org/3";
const DOCUMENTARY_GENRE: i64 = 99;
const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct Details {
    #[serde(default)]
    genres: Vec<Genre>,
}

#[derive(Debug, Deserialize)]
struct Genre {
    id: i64,
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl TmdbClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: BASE_URL.into(),
            api_key: api_key.into(),
        }
    }

    pub async fn genre_ids(&self, tmdb_id: i64, media_type: MediaType) -> Result<Vec<i64>> {
        let url = url::Url::parse(&format!("{}/{media_type}/{tmdb_id}", self.base_url))?;

        let response = self
            .http
            .get(url.clone())
            .query(&[("api_key", &self.api_key)])
            .timeout(TIMEOUT)
            .send()
            .await?;

        let details: Details = check_status(response, &url)?.json().await?;
        Ok(details.genres.into_iter().map(|g| g.id).collect())
    }
}

impl GenreLookup for TmdbClient {
    async fn is_documentary(&self, tmdb_id: i64, media_type: MediaType) -> bool {
        match self.genre_ids(tmdb_id, media_type).await {
            Ok(genres) => genres.contains(&DOCUMENTARY_GENRE),
            Err(e) => {
                debug!("Error checking documentary genre for {tmdb_id}: {e}");
                false
            }
        }
    }
}
