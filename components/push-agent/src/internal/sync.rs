/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The recurring "sync-notifications" task.
//!
//! Failures are returned, never swallowed: an error from the handler is how the host knows to
//! reschedule the task with its own backoff.

use crate::error::{info, warn, Error, Result};
use crate::internal::config::{AgentConfiguration, SYNC_TASK_NAME};
use crate::internal::http::{Fetcher, Request};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Not a task we registered for.
    Ignored,
    Synced { count: usize },
}

pub fn handle_sync<F: Fetcher + ?Sized>(
    config: &AgentConfiguration,
    fetcher: &F,
    tag: &str,
) -> Result<SyncOutcome> {
    if tag != SYNC_TASK_NAME {
        return Ok(SyncOutcome::Ignored);
    }
    sync_notifications(config, fetcher).map_err(|e| {
        warn!("background sync failed, leaving it to the host to retry: {}", e);
        e
    })
}

fn sync_notifications<F: Fetcher + ?Sized>(
    config: &AgentConfiguration,
    fetcher: &F,
) -> Result<SyncOutcome> {
    let url = config.api_url(&format!(
        "notifications?page=1&limit={}",
        config.sync_page_size
    ))?;
    let request = Request::get(url).header("accept", "application/json");
    let response = fetcher.fetch(&request)?;
    if !response.is_success() {
        return Err(Error::UnexpectedStatus(
            response.status,
            request.url.to_string(),
        ));
    }
    // The backend may wrap the page as `{"notifications": [...]}` or hand back a bare list.
    // Only the count is logged, so a body we can't read doesn't fail the task.
    let count = response
        .json::<serde_json::Value>()
        .ok()
        .and_then(|body| {
            body.get("notifications")
                .unwrap_or(&body)
                .as_array()
                .map(Vec::len)
        })
        .unwrap_or(0);
    info!("synced {} notifications", count);
    Ok(SyncOutcome::Synced { count })
}
