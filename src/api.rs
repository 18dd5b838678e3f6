use anyhow::Result;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Single-item calls.
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(10);
/// Whole-collection fetches and deletes.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP status error: {status} {url}")]
    HttpStatus { status: StatusCode, url: String },
    #[error("invalid base URL: {0}")]
    BaseUrl(String),
}

/// Status code of a failed call, if the failure was a non-2xx response.
pub fn http_status(err: &anyhow::Error) -> Option<StatusCode> {
    match err.downcast_ref::<ApiError>() {
        Some(ApiError::HttpStatus { status, .. }) => Some(*status),
        _ => None,
    }
}

pub fn endpoint(base: &str, path: &str) -> Result<Url> {
    let mut url = Url::parse(base.trim()).map_err(|_| ApiError::BaseUrl(base.to_string()))?;

    if !url.path().ends_with('/') {
        let with_slash = format!("{}/", url.path());
        url.set_path(&with_slash);
    }

    Ok(url.join(path.trim_start_matches('/'))?)
}

/// Thin wrapper for the *arr-style APIs that authenticate with `X-Api-Key`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<T> {
        let url = endpoint(&self.base_url, path)?;

        let response = self
            .http
            .get(url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .query(query)
            .timeout(timeout)
            .send()
            .await?;

        let body = check_status(response, &url)?.json::<T>().await?;
        Ok(body)
    }

    pub async fn delete(
        &self,
        path: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<()> {
        let url = endpoint(&self.base_url, path)?;

        let response = self
            .http
            .delete(url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .query(query)
            .timeout(timeout)
            .send()
            .await?;

        check_status(response, &url)?;
        Ok(())
    }
}

pub fn check_status(response: Response, url: &Url) -> Result<Response> {
    if !response.status().is_success() {
        return Err(ApiError::HttpStatus {
            status: response.status(),
            url: url.to_string(),
        }
        .into());
    }

    Ok(response)
}
