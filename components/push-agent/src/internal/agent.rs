/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The background agent: one handler per host event.
//!
//! Every handler holds a [`LifetimeExtension`] for as long as it runs, so the host keeps the
//! agent alive until cache writes, notification display and network calls are finished. The
//! guard is released on every exit path, errors included.
//!
//! The host may recycle the agent between events. The settled lifecycle state is kept in the
//! database, per cache version, so an agent woken for a push or a fetch on the same database
//! carries on as the one that was installed and activated.

use serde_json::Value;

use crate::error::{debug, info, warn, Result};
use crate::internal::config::AgentConfiguration;
use crate::internal::host::{AgentHost, AnalyticsHook, LifetimeExtension};
use crate::internal::http::{Fetcher, Request};
use crate::internal::interaction::{self, ClickOutcome, NotificationClick};
use crate::internal::interception::{self, FetchResponse};
use crate::internal::lifecycle::{
    ActivateReport, InstallReport, LifecycleController, LifecycleState,
};
use crate::internal::messages::{AgentMessage, PageMessage};
use crate::internal::push::{
    InboundPush, NotificationData, PushOutcome, PushReceptionHandler,
};
use crate::internal::storage::{CacheStorage, IdentityStorage};
use crate::internal::sync::{self, SyncOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Activated(ActivateReport),
    /// Skip-waiting arrived during install and will be honoured when it completes.
    ActivationDeferred,
    Replied,
    Ignored,
}

pub struct BackgroundAgent<S, F, H> {
    config: AgentConfiguration,
    storage: S,
    fetcher: F,
    host: H,
    lifecycle: LifecycleController,
    push: PushReceptionHandler,
    analytics: Option<Box<dyn AnalyticsHook + Send>>,
}

fn lifecycle_key(cache_version: &str) -> String {
    format!("lifecycle_state_{}", cache_version)
}

impl<S, F, H> BackgroundAgent<S, F, H>
where
    S: CacheStorage + IdentityStorage,
    F: Fetcher,
    H: AgentHost,
{
    pub fn new(config: AgentConfiguration, storage: S, fetcher: F, host: H) -> Self {
        let push = PushReceptionHandler::new(&config);
        let lifecycle = match storage.get_meta(&lifecycle_key(&config.cache_version)) {
            Ok(Some(saved)) => match saved.parse() {
                Ok(state) => {
                    info!("resuming background agent as {}", state);
                    LifecycleController::resume(state)
                }
                Err(e) => {
                    warn!("ignoring saved lifecycle state: {}", e);
                    LifecycleController::new()
                }
            },
            Ok(None) => LifecycleController::new(),
            Err(e) => {
                warn!("could not read saved lifecycle state: {}", e);
                LifecycleController::new()
            }
        };
        Self {
            config,
            storage,
            fetcher,
            host,
            lifecycle,
            push,
            analytics: None,
        }
    }

    fn save_state(&self) {
        let key = lifecycle_key(&self.config.cache_version);
        if let Err(e) = self
            .storage
            .set_meta(&key, &self.lifecycle.state().to_string())
        {
            warn!("could not save lifecycle state: {}", e);
        }
    }

    pub fn set_analytics_hook(&mut self, hook: Box<dyn AnalyticsHook + Send>) {
        self.analytics = Some(hook);
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn install(&mut self) -> Result<InstallReport> {
        let _pending = LifetimeExtension::new(&self.host, "install");
        let installed = self
            .lifecycle
            .install(&self.config, &self.storage, &self.fetcher);
        self.save_state();
        let report = installed?;
        if self.lifecycle.should_activate_now() {
            info!("honouring skip-waiting requested during install");
            // The install itself succeeded; a failed activation is retried by `activate()`.
            if let Err(e) = self
                .lifecycle
                .activate(&self.config, &self.storage, &self.host)
            {
                warn!("activation after install failed: {}", e);
            }
            self.save_state();
        }
        Ok(report)
    }

    pub fn activate(&mut self) -> Result<ActivateReport> {
        let _pending = LifetimeExtension::new(&self.host, "activate");
        let report = self
            .lifecycle
            .activate(&self.config, &self.storage, &self.host);
        self.save_state();
        report
    }

    pub fn fetch(&self, request: &Request) -> Result<FetchResponse> {
        let _pending = LifetimeExtension::new(&self.host, "fetch");
        if !self.lifecycle.state().can_intercept_fetch() {
            return Ok(FetchResponse::Passthrough);
        }
        interception::handle_fetch(&self.config, &self.storage, &self.fetcher, request)
    }

    pub fn push(&self, push: InboundPush) -> Result<PushOutcome> {
        let _pending = LifetimeExtension::new(&self.host, "push");
        if self.lifecycle.state() != LifecycleState::Activated {
            info!("dropping push received while {}", self.lifecycle.state());
            return Ok(PushOutcome::Dropped {
                reason: format!("agent is {}", self.lifecycle.state()),
            });
        }
        self.push.handle(push, &self.host)
    }

    /// A push from the managed transport, still in its wire form.
    pub fn push_managed(&self, payload: Value) -> Result<PushOutcome> {
        match InboundPush::managed(payload) {
            Ok(push) => self.push(push),
            Err(e) => {
                let _pending = LifetimeExtension::new(&self.host, "push");
                warn!("dropping push message: {}", e);
                Ok(PushOutcome::Dropped {
                    reason: e.to_string(),
                })
            }
        }
    }

    pub fn notification_click(&self, click: &NotificationClick) -> Result<ClickOutcome> {
        let _pending = LifetimeExtension::new(&self.host, "notificationclick");
        interaction::handle_click(&self.config, &self.host, click)
    }

    pub fn notification_close(&self, tag: &str, data: &NotificationData) {
        let _pending = LifetimeExtension::new(&self.host, "notificationclose");
        let hook = self
            .analytics
            .as_deref()
            .map(|hook| hook as &dyn AnalyticsHook);
        interaction::handle_close(hook, tag, data);
    }

    pub fn sync(&self, tag: &str) -> Result<SyncOutcome> {
        let _pending = LifetimeExtension::new(&self.host, "sync");
        sync::handle_sync(&self.config, &self.fetcher, tag)
    }

    /// A message from a page. `source` is the sending window, if the host knows it.
    pub fn message(
        &mut self,
        source: Option<&str>,
        message: &PageMessage,
    ) -> Result<MessageOutcome> {
        let _pending = LifetimeExtension::new(&self.host, "message");
        debug!("message {:?} from {:?}", message, source);
        match message {
            PageMessage::SkipWaiting => {
                if self.lifecycle.request_skip_waiting() {
                    let report = self
                        .lifecycle
                        .activate(&self.config, &self.storage, &self.host);
                    self.save_state();
                    Ok(MessageOutcome::Activated(report?))
                } else if self.lifecycle.state() == LifecycleState::Activated {
                    Ok(MessageOutcome::Ignored)
                } else {
                    Ok(MessageOutcome::ActivationDeferred)
                }
            }
            PageMessage::ClientReady => match source {
                Some(client_id) => {
                    self.host
                        .post_message(client_id, &AgentMessage::ServiceWorkerReady)?;
                    Ok(MessageOutcome::Replied)
                }
                None => Ok(MessageOutcome::Ignored),
            },
        }
    }
}
