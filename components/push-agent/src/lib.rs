/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

#![allow(unknown_lints)]
#![warn(rust_2018_idioms)]
//! # Push Agent
//!
//! Notification delivery for the storefront web app. Two halves, two objects:
//!
//! * [`NotificationAgent`] is the page-independent background agent. It caches the app shell so
//!   the storefront still renders offline, turns push messages into visible notifications, routes
//!   notification clicks back into the app and runs the recurring notification sync.
//! * [`DeviceRegistrationService`] lives in the page. It asks for notification permission, gets a
//!   push token and registers this device with the backend notification registry.
//!
//! The host platform (the browser, or whatever embeds this crate) is reached through traits:
//! [`AgentHost`] for notifications, windows and agent lifetime, [`RegistrarHost`] for the page's
//! view of the platform and [`TokenProvider`] for the push transport. Everything else, including
//! the local cache and the device identity, lives in one SQLite database at
//! [`AgentConfiguration::database_path`].
//!
//! ## Background agent
//!
//! The host calls one method per event:
//!
//! * `install` opens the current cache snapshot and pre-caches the app shell and notification
//!   icons. Pre-caching is best-effort; a missing icon doesn't fail the install.
//! * `activate` deletes every cache snapshot but the current one and takes over the open pages.
//!   Bumping [`AgentConfiguration::cache_version`] is how cached content gets migrated.
//! * `fetch` answers GETs cache-first, caches successful network responses, and falls back to the
//!   cached shell when the network is gone. Non-GETs and anything under `/api/` are never touched.
//! * `push` / `push_managed` normalize the payload and show a notification. A notification with
//!   the tag of a visible one replaces it. Malformed payloads are logged and dropped.
//! * `notification_click` closes the notification, then focuses an open window on `/` and hands
//!   it the notification data, or opens a new window at the notification's `actionUrl`.
//! * `sync` fetches the latest notifications on the `"sync-notifications"` task. Errors are
//!   returned so the host reschedules the task.
//!
//! ## Device registration
//!
//! ```text
//! init() -> request_permission() -> register() -> Registered
//! ```
//!
//! The device id is generated once and kept in the database; registering again with a new token
//! updates the same device in the registry. Unregistering doesn't revoke notification permission,
//! that's up to the user in the host.

mod error;
mod internal;

use parking_lot::Mutex;
use serde_json::Value;

pub use error::{ApiResult, Error, PushAgentApiError, Result};
pub use internal::agent::MessageOutcome;
pub use internal::communications::{DeviceRecord, Platform};
pub use internal::config::{AgentConfiguration, Protocol as AgentHttpProtocol};
pub use internal::host::{AgentHost, AnalyticsHook, ClientHost, NotificationHost, WindowClient};
pub use internal::http::{Method, Request, Response};
pub use internal::interaction::{ClickOutcome, NotificationClick};
pub use internal::interception::FetchResponse;
pub use internal::lifecycle::{ActivateReport, InstallReport, LifecycleState};
pub use internal::messages::{AgentMessage, PageMessage};
pub use internal::push::{NotificationAction, NotificationData, NotificationRequest, PushOutcome};
pub use internal::registrar::{
    PermissionState, PlatformCapabilities, RegistrarHost, RegistrationObserver,
    RegistrationState, TokenProvider,
};
pub use internal::sync::SyncOutcome;

use error::debug;
use internal::communications::ConnectHttp;
use internal::http::HttpFetcher;
use internal::push::InboundPush;
use internal::storage::PushAgentDb;

type Agent = internal::BackgroundAgent<PushAgentDb, HttpFetcher, Box<dyn AgentHost + Send>>;

/// The background agent.
///
/// Events are handled one at a time, the way the host delivers them. Handlers that go to the
/// network (`install`, `fetch` on a cache miss, `sync`) hold the agent for the whole request, so
/// a slow response delays the push, click and message events queued behind it. Hosts that can't
/// afford that should dispatch `fetch` and `sync` on their own schedule rather than inline with
/// notification events.
///
/// A recycled agent built on the same database resumes the lifecycle state it had reached, so
/// the host only needs to call `install` and `activate` when the cache version changes.
pub struct NotificationAgent {
    internal: Mutex<Agent>,
}

impl NotificationAgent {
    /// Creates a new [`NotificationAgent`] in the `Parsed` state.
    ///
    /// # Errors
    /// Returns an error if the database at `database_path` can't be opened.
    pub fn new(config: AgentConfiguration, host: Box<dyn AgentHost + Send>) -> ApiResult<Self> {
        debug!(
            "NotificationAgent app_origin: {}, cache: {}",
            config.app_origin, config.cache_version
        );
        let storage = PushAgentDb::open(&config.database_path)?;
        let fetcher = HttpFetcher::new()?;
        Ok(Self {
            internal: Mutex::new(internal::BackgroundAgent::new(
                config, storage, fetcher, host,
            )),
        })
    }

    pub fn set_analytics_hook(&self, hook: Box<dyn AnalyticsHook + Send>) {
        self.internal.lock().set_analytics_hook(hook)
    }

    pub fn state(&self) -> LifecycleState {
        self.internal.lock().state()
    }

    /// Pre-cache the offline manifest.
    ///
    /// # Errors
    /// Only if the cache snapshot itself can't be opened, in which case the agent is redundant.
    /// Individual manifest entries that fail are reported in [`InstallReport::failed`].
    pub fn install(&self) -> ApiResult<InstallReport> {
        Ok(self.internal.lock().install()?)
    }

    /// Delete stale cache snapshots and claim the open pages. Safe to repeat.
    pub fn activate(&self) -> ApiResult<ActivateReport> {
        Ok(self.internal.lock().activate()?)
    }

    /// Answer an intercepted request.
    ///
    /// # Errors
    /// Only when the network failed and there is no cached shell to fall back to.
    pub fn fetch(&self, request: &Request) -> ApiResult<FetchResponse> {
        Ok(self.internal.lock().fetch(request)?)
    }

    /// A raw push delivery, with its body if it had one.
    pub fn push(&self, payload: Option<Vec<u8>>) -> ApiResult<PushOutcome> {
        Ok(self.internal.lock().push(InboundPush::Raw(payload))?)
    }

    /// A push from the managed transport: `{"notification": {...}, "data": {...}}`.
    pub fn push_managed(&self, payload: Value) -> ApiResult<PushOutcome> {
        Ok(self.internal.lock().push_managed(payload)?)
    }

    pub fn notification_click(&self, click: &NotificationClick) -> ApiResult<ClickOutcome> {
        Ok(self.internal.lock().notification_click(click)?)
    }

    pub fn notification_close(&self, tag: &str, data: &NotificationData) {
        self.internal.lock().notification_close(tag, data)
    }

    /// Run a background sync task.
    ///
    /// # Errors
    /// Any failure is returned; the host should reschedule the task.
    pub fn sync(&self, tag: &str) -> ApiResult<SyncOutcome> {
        Ok(self.internal.lock().sync(tag)?)
    }

    pub fn message(
        &self,
        source: Option<&str>,
        message: &PageMessage,
    ) -> ApiResult<MessageOutcome> {
        Ok(self.internal.lock().message(source, message)?)
    }
}

type Registrar = internal::DeviceRegistrar<
    ConnectHttp,
    PushAgentDb,
    Box<dyn RegistrarHost + Send + Sync>,
    Box<dyn TokenProvider + Send + Sync>,
>;

/// Page-side device registration. Create one per page and share it; every method takes `&self`.
pub struct DeviceRegistrationService {
    internal: Registrar,
}

impl DeviceRegistrationService {
    /// # Arguments
    ///   - `config`: the same [`AgentConfiguration`] the agent uses
    ///   - `host`: the page's view of the platform
    ///   - `tokens`: the push transport
    ///   - `auth_token`: bearer token for the backend registry, if the user is signed in
    pub fn new(
        config: AgentConfiguration,
        host: Box<dyn RegistrarHost + Send + Sync>,
        tokens: Box<dyn TokenProvider + Send + Sync>,
        auth_token: Option<&str>,
    ) -> ApiResult<Self> {
        let store = PushAgentDb::open(&config.database_path)?;
        let mut connection = ConnectHttp::new(config.clone())?;
        if let Some(token) = auth_token {
            connection = connection.with_auth_token(token);
        }
        Ok(Self {
            internal: internal::DeviceRegistrar::new(config, connection, store, host, tokens),
        })
    }

    pub fn set_observer(&self, observer: Box<dyn RegistrationObserver>) {
        self.internal.set_observer(observer)
    }

    /// Probe the platform and install the background agent.
    ///
    /// Returns [`RegistrationState::Unsupported`] if the platform lacks a background agent, push
    /// or notifications. Every later call is then a no-op returning that state.
    pub fn init(&self) -> ApiResult<RegistrationState> {
        Ok(self.internal.init()?)
    }

    pub fn dispose(&self) {
        self.internal.dispose()
    }

    /// Show the permission prompt. Call from a user gesture.
    pub fn request_permission(&self) -> ApiResult<PermissionState> {
        Ok(self.internal.request_permission()?)
    }

    /// Register this device, asking for permission first if the user hasn't decided yet.
    ///
    /// # Errors
    /// Permission denied or dismissed, no push token, or the registry refused the call. None of
    /// these are retried; call again to retry.
    pub fn register(&self) -> ApiResult<RegistrationState> {
        Ok(self.internal.register()?)
    }

    /// The push transport issued a new token.
    pub fn refresh_token(&self, token: &str) -> ApiResult<RegistrationState> {
        Ok(self.internal.refresh_token(token)?)
    }

    /// Remove this device from the registry. Notification permission is unaffected.
    pub fn unregister(&self) -> ApiResult<RegistrationState> {
        Ok(self.internal.unregister()?)
    }

    /// Unpair: remove this device from the registry and delete its id. The next registration
    /// creates a new device.
    pub fn forget_device(&self) -> ApiResult<RegistrationState> {
        Ok(self.internal.forget_device()?)
    }

    pub fn device_id(&self) -> ApiResult<Option<String>> {
        Ok(self.internal.device_id()?)
    }

    pub fn state(&self) -> RegistrationState {
        self.internal.state()
    }
}
