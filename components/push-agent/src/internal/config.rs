/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Provides configuration for the [NotificationAgent](`crate::NotificationAgent`) and the
//! [DeviceRegistrationService](`crate::DeviceRegistrationService`)
//!

use std::{fmt::Display, str::FromStr};

use url::Url;

use crate::error::{Error, Result};

/// The current cache snapshot. Bumping this is the only way to migrate cached content: every
/// snapshot with another name is deleted the next time an agent activates.
pub const CACHE_VERSION: &str = "notifications-v1";

/// The recurring background task the agent re-fetches pending notifications on.
pub const SYNC_TASK_NAME: &str = "sync-notifications";

pub const DEFAULT_SHELL_PATH: &str = "/index.html";
pub const DEFAULT_ICON: &str = "/icons/notification-icon.png";
pub const DEFAULT_BADGE: &str = "/icons/notification-badge.png";
pub const DEFAULT_AGENT_SCRIPT: &str = "/notification-agent.js";
pub const DEFAULT_SYNC_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Protocol {
    #[default]
    Https,
    Http,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Protocol::Http => "http",
                Protocol::Https => "https",
            }
        )
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            _ => return Err(Error::GeneralError("Invalid protocol".to_string())),
        })
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfiguration {
    /// Backend host name:port
    pub server_host: String,

    /// http protocol for the backend ("https" outside of local development)
    pub http_protocol: Protocol,

    /// Origin the storefront pages are served from. Relative asset and action
    /// URLs are resolved against this.
    pub app_origin: String,

    /// Name of the current cache snapshot
    pub cache_version: String,

    /// Paths pre-populated into the cache on install
    pub precache_manifest: Vec<String>,

    /// The application shell served when the network is unreachable
    pub shell_path: String,

    /// Path prefixes which are never intercepted. A request is excluded when its path
    /// contains one of these anywhere, so `/shop/api/...` is excluded as well.
    pub excluded_prefixes: Vec<String>,

    pub default_icon: String,

    pub default_badge: String,

    /// How many notifications the background sync asks for
    pub sync_page_size: u32,

    /// OS Path to the database
    pub database_path: String,

    /// Script the registrar installs as the background agent
    pub agent_script: String,
}

impl AgentConfiguration {
    pub fn new(server_host: &str, app_origin: &str, database_path: &str) -> Self {
        Self {
            server_host: server_host.to_string(),
            http_protocol: Protocol::Https,
            app_origin: app_origin.to_string(),
            cache_version: CACHE_VERSION.to_string(),
            precache_manifest: vec![
                "/".to_string(),
                DEFAULT_SHELL_PATH.to_string(),
                DEFAULT_ICON.to_string(),
                DEFAULT_BADGE.to_string(),
            ],
            shell_path: DEFAULT_SHELL_PATH.to_string(),
            excluded_prefixes: vec!["/api/".to_string()],
            default_icon: DEFAULT_ICON.to_string(),
            default_badge: DEFAULT_BADGE.to_string(),
            sync_page_size: DEFAULT_SYNC_PAGE_SIZE,
            database_path: database_path.to_string(),
            agent_script: DEFAULT_AGENT_SCRIPT.to_string(),
        }
    }

    pub fn origin(&self) -> Result<Url> {
        Ok(Url::parse(&self.app_origin)?)
    }

    /// Resolve a path (or absolute URL) against the application origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        Ok(self.origin()?.join(path)?)
    }

    /// Build a URL on the backend for the given API path.
    pub fn api_url(&self, path: &str) -> Result<Url> {
        Ok(Url::parse(&format!(
            "{}://{}/api/{}",
            self.http_protocol,
            self.server_host,
            path.trim_start_matches('/')
        ))?)
    }

    /// Whether requests to this URL must go straight to the network.
    pub fn is_excluded(&self, url: &Url) -> bool {
        let path = url.path();
        self.excluded_prefixes
            .iter()
            .any(|prefix| path.contains(prefix.as_str()))
    }
}

#[cfg(test)]
impl Default for AgentConfiguration {
    fn default() -> AgentConfiguration {
        AgentConfiguration::new("shop.example.com", "https://shop.example.com", "")
    }
}
