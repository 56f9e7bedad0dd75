/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Background agent lifecycle.
//!
//! `Parsed -> Installing -> Installed -> Activating -> Activated`, with `Redundant` reachable from
//! anywhere. Installing pre-populates the current cache snapshot; activating deletes every other
//! snapshot and claims the open pages.
//!
//! A page can ask the agent to take over without waiting for older pages to close
//! (skip-waiting). If that arrives while install is still running it's remembered and honoured as
//! soon as install completes.

use std::{fmt::Display, str::FromStr};

use crate::error::{info, warn, Error, Result};
use crate::internal::config::AgentConfiguration;
use crate::internal::host::ClientHost;
use crate::internal::http::{Fetcher, Request};
use crate::internal::storage::CacheStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Parsed, Installing)
                | (Installing, Installed)
                | (Installed, Activating)
                | (Activating, Activated)
                | (_, Redundant)
        )
    }

    pub fn can_intercept_fetch(self) -> bool {
        self == LifecycleState::Activated
    }
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                LifecycleState::Parsed => "parsed",
                LifecycleState::Installing => "installing",
                LifecycleState::Installed => "installed",
                LifecycleState::Activating => "activating",
                LifecycleState::Activated => "activated",
                LifecycleState::Redundant => "redundant",
            }
        )
    }
}

impl FromStr for LifecycleState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "parsed" => LifecycleState::Parsed,
            "installing" => LifecycleState::Installing,
            "installed" => LifecycleState::Installed,
            "activating" => LifecycleState::Activating,
            "activated" => LifecycleState::Activated,
            "redundant" => LifecycleState::Redundant,
            other => {
                return Err(Error::GeneralError(format!(
                    "Unknown lifecycle state {}",
                    other
                )))
            }
        })
    }
}

/// Which manifest entries made it into the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    /// Stale snapshots removed
    pub deleted: Vec<String>,
    /// False if the host refused to hand over the open pages
    pub claimed: bool,
}

pub struct LifecycleController {
    state: LifecycleState,
    skip_waiting: bool,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleController {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Parsed,
            skip_waiting: false,
        }
    }

    /// Pick up where a recycled agent left off. Only settled states can be resumed; anything
    /// else starts over from `Parsed`.
    pub fn resume(state: LifecycleState) -> Self {
        match state {
            LifecycleState::Installed | LifecycleState::Activated => Self {
                state,
                skip_waiting: false,
            },
            _ => Self::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn transition(&mut self, next: LifecycleState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        info!("background agent {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    pub fn install<S, F>(
        &mut self,
        config: &AgentConfiguration,
        storage: &S,
        fetcher: &F,
    ) -> Result<InstallReport>
    where
        S: CacheStorage + ?Sized,
        F: Fetcher + ?Sized,
    {
        self.transition(LifecycleState::Installing)?;
        if let Err(e) = storage.open_cache(&config.cache_version) {
            self.state = LifecycleState::Redundant;
            return Err(e);
        }
        let mut report = InstallReport::default();
        for path in &config.precache_manifest {
            match precache_one(config, storage, fetcher, path) {
                Ok(()) => report.cached.push(path.clone()),
                Err(e) => {
                    warn!("could not pre-cache '{}': {}", path, e);
                    report.failed.push(path.clone());
                }
            }
        }
        self.transition(LifecycleState::Installed)?;
        info!(
            "installed with {} of {} manifest entries cached",
            report.cached.len(),
            config.precache_manifest.len()
        );
        Ok(report)
    }

    /// Record a request to take over now. Returns whether activation can start immediately.
    pub fn request_skip_waiting(&mut self) -> bool {
        match self.state {
            LifecycleState::Parsed | LifecycleState::Installing => {
                self.skip_waiting = true;
                false
            }
            LifecycleState::Installed => true,
            _ => false,
        }
    }

    /// Whether a skip-waiting request is pending and install has finished.
    pub fn should_activate_now(&self) -> bool {
        self.skip_waiting && self.state == LifecycleState::Installed
    }

    /// Delete stale snapshots and claim the pages. Running it again on an activated agent only
    /// repeats the cleanup.
    pub fn activate<S, C>(
        &mut self,
        config: &AgentConfiguration,
        storage: &S,
        clients: &C,
    ) -> Result<ActivateReport>
    where
        S: CacheStorage + ?Sized,
        C: ClientHost + ?Sized,
    {
        match self.state {
            LifecycleState::Installed => self.transition(LifecycleState::Activating)?,
            // a retry after a failed cleanup, or a repeat.
            LifecycleState::Activating | LifecycleState::Activated => (),
            other => {
                return Err(Error::InvalidTransition {
                    from: other.to_string(),
                    to: LifecycleState::Activating.to_string(),
                })
            }
        }
        self.skip_waiting = false;

        let mut report = ActivateReport::default();
        for name in storage.cache_names()? {
            if name != config.cache_version && storage.delete_cache(&name)? {
                report.deleted.push(name);
            }
        }
        report.claimed = match clients.claim() {
            Ok(()) => true,
            Err(e) => {
                warn!("activated without claiming open pages: {}", e);
                false
            }
        };
        if self.state == LifecycleState::Activating {
            self.transition(LifecycleState::Activated)?;
        }
        Ok(report)
    }
}

fn precache_one<S, F>(
    config: &AgentConfiguration,
    storage: &S,
    fetcher: &F,
    path: &str,
) -> Result<()>
where
    S: CacheStorage + ?Sized,
    F: Fetcher + ?Sized,
{
    let request = Request::get(config.resolve(path)?);
    let response = fetcher.fetch(&request)?;
    if !response.is_success() {
        return Err(Error::UnexpectedStatus(
            response.status,
            request.url.to_string(),
        ));
    }
    storage.put_response(&config.cache_version, &request.cache_key(), &response)
}
