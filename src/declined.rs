use anyhow::Result;
use rusqlite::Connection;
use std::future::Future;
use tracing::{debug, info};

use crate::db::{self, DeclinedEntry};
use crate::seerr::{DeclinedRequest, SeerrClient};

const FETCH_LIMIT: usize = 500;
const REASON: &str = "Declined in Seerr";

pub trait DeclinedSource {
    fn declined_requests(&self, limit: usize) -> impl Future<Output = Result<Vec<DeclinedRequest>>> + Send;
}

impl DeclinedSource for SeerrClient {
    async fn declined_requests(&self, limit: usize) -> Result<Vec<DeclinedRequest>> {
        SeerrClient::declined_requests(self, limit).await
    }
}

/// Record every declined Seerr request locally so later syncs skip the title.
/// Returns how many were not already recorded.
pub async fn sync_declined_requests<S: DeclinedSource>(conn: &Connection, seerr: &S) -> Result<usize> {
    db::init_declined_table(conn)?;

    let requests = seerr.declined_requests(FETCH_LIMIT).await?;
    info!("Found {} declined requests in Seerr", requests.len());

    let mut new_count = 0;
    for request in &requests {
        let Some(tmdb_id) = request.tmdb_id else {
            debug!("Skipping declined request without a TMDB id");
            continue;
        };

        // Seerr requests carry no title; use what the last list sync stored.
        let known = db::item_title(conn, tmdb_id, request.media_type)?;
        let (title, year) = match &known {
            Some((title, year)) => (Some(title.as_str()), *year),
            None => (None, None),
        };

        let entry = DeclinedEntry {
            tmdb_id,
            media_type: request.media_type,
            title,
            year,
            declined_by_user_id: request.requested_by_id,
            reason: REASON,
        };

        if db::mark_request_declined(conn, &entry)? {
            new_count += 1;
            info!(
                "Marked as declined: {} ({})",
                title.unwrap_or("unknown title"),
                year.map(|y| y.to_string()).unwrap_or_else(|| "N/A".into())
            );
        }
    }

    info!("Synced {new_count} new declined requests");
    Ok(new_count)
}
