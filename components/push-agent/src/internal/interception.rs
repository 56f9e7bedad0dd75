/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Network interception: cache-first for GETs, write-through on a miss, and the cached
//! application shell when the network is gone.
//!
//! Anything that isn't a GET, and anything under an excluded prefix, is handed straight back to
//! the host. API calls must fail loudly rather than be answered from a stale cache.

use crate::error::{debug, warn, Result};
use crate::internal::config::AgentConfiguration;
use crate::internal::http::{Fetcher, Method, Request, RequestKey, Response};
use crate::internal::storage::CacheStorage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResponse {
    /// Not intercepted. The host performs the request itself.
    Passthrough,
    Cache(Response),
    Network(Response),
    /// The network failed and this is the cached shell.
    Fallback(Response),
}

impl FetchResponse {
    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchResponse::Passthrough => None,
            FetchResponse::Cache(r) | FetchResponse::Network(r) | FetchResponse::Fallback(r) => {
                Some(r)
            }
        }
    }
}

pub fn handle_fetch<S, F>(
    config: &AgentConfiguration,
    storage: &S,
    fetcher: &F,
    request: &Request,
) -> Result<FetchResponse>
where
    S: CacheStorage + ?Sized,
    F: Fetcher + ?Sized,
{
    if request.method != Method::Get || config.is_excluded(&request.url) {
        debug!("not intercepting {} {}", request.method, request.url);
        return Ok(FetchResponse::Passthrough);
    }
    let key = request.cache_key();
    match storage.match_request(&config.cache_version, &key) {
        Ok(Some(cached)) => return Ok(FetchResponse::Cache(cached)),
        Ok(None) => (),
        Err(e) => warn!("cache lookup for '{}' failed: {}", key.as_str(), e),
    }
    match fetcher.fetch(request) {
        Ok(response) => {
            if response.is_success() {
                if let Err(e) = storage.put_response(&config.cache_version, &key, &response) {
                    warn!("could not cache '{}': {}", key.as_str(), e);
                }
            }
            Ok(FetchResponse::Network(response))
        }
        Err(err) => {
            warn!("fetching {} failed, trying the cached shell: {}", request.url, err);
            match cached_shell(config, storage) {
                Some(shell) => Ok(FetchResponse::Fallback(shell)),
                None => Err(err),
            }
        }
    }
}

fn cached_shell<S: CacheStorage + ?Sized>(
    config: &AgentConfiguration,
    storage: &S,
) -> Option<Response> {
    let shell = match config.resolve(&config.shell_path) {
        Ok(url) => url,
        Err(e) => {
            warn!("bad shell path '{}': {}", config.shell_path, e);
            return None;
        }
    };
    storage
        .match_request(&config.cache_version, &RequestKey::from(&shell))
        .unwrap_or_else(|e| {
            warn!("shell lookup failed: {}", e);
            None
        })
}
