/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Page-side device registration.
//!
//! ```text
//! Unregistered -> PermissionRequested -> Granted -> TokenAcquired -> Registered
//!                                     \-> Denied
//! ```
//!
//! A platform missing a background agent, push or notifications parks the registrar in
//! `Unsupported`, after which every call returns that state and does nothing else.
//!
//! The registrar is shared by whatever renders the page, so every method takes `&self`. A page
//! that mounts twice and calls [`DeviceRegistrar::register`] from both mounts gets one backend
//! call: the second caller sees the first one in flight and gets the current state back.
//! Nothing coordinates separate tabs; two tabs may both register, and the registry's
//! update-in-place keyed on the device id keeps that harmless.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Map;

use crate::error::{debug, info, warn, Error, Result};
use crate::internal::communications::{
    Connection, DeviceRegistrationRequest, PersistedRateLimiter, Platform,
};
use crate::internal::config::AgentConfiguration;
use crate::internal::messages::PageMessage;
use crate::internal::storage::IdentityStorage;

const REFRESH_WINDOW_SECS: u64 = 24 * 3600;
const MAX_REFRESHES_PER_WINDOW: u16 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unsupported,
    Unregistered,
    PermissionRequested,
    Granted,
    Denied,
    TokenAcquired,
    Registered,
}

impl Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                RegistrationState::Unsupported => "UNSUPPORTED",
                RegistrationState::Unregistered => "UNREGISTERED",
                RegistrationState::PermissionRequested => "PERMISSION_REQUESTED",
                RegistrationState::Granted => "GRANTED",
                RegistrationState::Denied => "DENIED",
                RegistrationState::TokenAcquired => "TOKEN_ACQUIRED",
                RegistrationState::Registered => "REGISTERED",
            }
        )
    }
}

/// Notification permission as the host reports it. Owned by the host; we only read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    #[default]
    Default,
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformCapabilities {
    pub background_agent: bool,
    pub push: bool,
    pub notifications: bool,
}

impl PlatformCapabilities {
    pub fn all() -> Self {
        Self {
            background_agent: true,
            push: true,
            notifications: true,
        }
    }

    fn missing(&self) -> Option<&'static str> {
        if !self.background_agent {
            Some("background agent")
        } else if !self.push {
            Some("push")
        } else if !self.notifications {
            Some("notifications")
        } else {
            None
        }
    }
}

/// The page's view of the host platform.
#[cfg_attr(test, mockall::automock)]
pub trait RegistrarHost {
    fn capabilities(&self) -> PlatformCapabilities;

    fn permission(&self) -> PermissionState;

    /// Show the permission prompt. Only valid from a user gesture. A dismissed prompt comes back
    /// as [`PermissionState::Default`].
    fn request_permission(&self) -> Result<PermissionState>;

    /// Install (or update) the background agent from `script_url`.
    fn install_agent(&self, script_url: &str) -> Result<()>;

    fn post_to_agent(&self, message: &PageMessage) -> Result<()>;

    fn device_name(&self) -> String;
}

/// Acquires a token from the push transport.
#[cfg_attr(test, mockall::automock)]
pub trait TokenProvider {
    fn acquire_token(&self) -> Result<String>;
}

/// Told about state changes and about failures the user should see.
pub trait RegistrationObserver: Send + Sync {
    fn state_changed(&self, state: RegistrationState);

    fn registration_failed(&self, error: &Error);
}

impl<T: RegistrarHost + ?Sized> RegistrarHost for Box<T> {
    fn capabilities(&self) -> PlatformCapabilities {
        (**self).capabilities()
    }

    fn permission(&self) -> PermissionState {
        (**self).permission()
    }

    fn request_permission(&self) -> Result<PermissionState> {
        (**self).request_permission()
    }

    fn install_agent(&self, script_url: &str) -> Result<()> {
        (**self).install_agent(script_url)
    }

    fn post_to_agent(&self, message: &PageMessage) -> Result<()> {
        (**self).post_to_agent(message)
    }

    fn device_name(&self) -> String {
        (**self).device_name()
    }
}

impl<T: TokenProvider + ?Sized> TokenProvider for Box<T> {
    fn acquire_token(&self) -> Result<String> {
        (**self).acquire_token()
    }
}

/// Cleared when dropped, so an error can't leave registration stuck "in flight".
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DeviceRegistrar<Co, S, H, T> {
    config: AgentConfiguration,
    connection: Co,
    store: Mutex<S>,
    host: H,
    tokens: T,
    observer: Mutex<Option<Box<dyn RegistrationObserver>>>,
    state: Mutex<RegistrationState>,
    permission: Mutex<PermissionState>,
    /// The token the backend has for us, as of this service lifetime.
    registered_token: Mutex<Option<String>>,
    initialized: AtomicBool,
    in_flight: AtomicBool,
    refresh_limiter: PersistedRateLimiter,
}

impl<Co, S, H, T> DeviceRegistrar<Co, S, H, T>
where
    Co: Connection,
    S: IdentityStorage,
    H: RegistrarHost,
    T: TokenProvider,
{
    pub fn new(config: AgentConfiguration, connection: Co, store: S, host: H, tokens: T) -> Self {
        Self {
            config,
            connection,
            store: Mutex::new(store),
            host,
            tokens,
            observer: Mutex::new(None),
            state: Mutex::new(RegistrationState::Unregistered),
            permission: Mutex::new(PermissionState::Default),
            registered_token: Mutex::new(None),
            initialized: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            refresh_limiter: PersistedRateLimiter::new(
                "refresh_token",
                REFRESH_WINDOW_SECS,
                MAX_REFRESHES_PER_WINDOW,
            ),
        }
    }

    pub fn set_observer(&self, observer: Box<dyn RegistrationObserver>) {
        *self.observer.lock() = Some(observer);
    }

    pub fn state(&self) -> RegistrationState {
        *self.state.lock()
    }

    pub fn permission(&self) -> PermissionState {
        *self.permission.lock()
    }

    fn set_state(&self, state: RegistrationState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            debug!("registrar {} -> {}", previous, state);
            if let Some(observer) = self.observer.lock().as_ref() {
                observer.state_changed(state);
            }
        }
    }

    fn fail<R>(&self, error: Error) -> Result<R> {
        if let Some(observer) = self.observer.lock().as_ref() {
            observer.registration_failed(&error);
        }
        Err(error)
    }

    fn unsupported(&self) -> bool {
        self.state() == RegistrationState::Unsupported
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Probe the platform, install the background agent and tell it we're here.
    pub fn init(&self) -> Result<RegistrationState> {
        if let Some(missing) = self.host.capabilities().missing() {
            info!("device registration unavailable: no {} support", missing);
            self.set_state(RegistrationState::Unsupported);
            self.initialized.store(true, Ordering::Release);
            return Ok(RegistrationState::Unsupported);
        }
        let script = self.config.resolve(&self.config.agent_script)?;
        self.host.install_agent(script.as_str())?;
        if let Err(e) = self.host.post_to_agent(&PageMessage::ClientReady) {
            warn!("could not reach the background agent: {}", e);
        }
        let permission = self.host.permission();
        *self.permission.lock() = permission;
        self.set_state(match permission {
            PermissionState::Granted => RegistrationState::Granted,
            PermissionState::Denied => RegistrationState::Denied,
            PermissionState::Default => RegistrationState::Unregistered,
        });
        self.initialized.store(true, Ordering::Release);
        info!("device registrar initialized ({})", self.state());
        Ok(self.state())
    }

    /// Drop the observer and the session state. The stored device identity stays.
    pub fn dispose(&self) {
        self.initialized.store(false, Ordering::Release);
        *self.observer.lock() = None;
        *self.registered_token.lock() = None;
        *self.state.lock() = RegistrationState::Unregistered;
    }

    /// Re-read the permission from the host, which owns it. The user may have changed it in the
    /// host's settings since we last looked.
    fn refresh_permission(&self) -> PermissionState {
        let current = self.host.permission();
        let previous = std::mem::replace(&mut *self.permission.lock(), current);
        if previous != current {
            info!("notification permission changed from {:?} to {:?}", previous, current);
            match (current, self.state()) {
                (PermissionState::Denied, _) => self.set_state(RegistrationState::Denied),
                (PermissionState::Granted, RegistrationState::Denied)
                | (PermissionState::Granted, RegistrationState::Unregistered) => {
                    self.set_state(RegistrationState::Granted)
                }
                (PermissionState::Default, RegistrationState::Denied) => {
                    self.set_state(RegistrationState::Unregistered)
                }
                _ => (),
            }
        }
        current
    }

    /// Ask the user for notification permission. Call from a user gesture only. Once the user
    /// has decided, the host's answer is returned without prompting again.
    pub fn request_permission(&self) -> Result<PermissionState> {
        self.ensure_initialized()?;
        if self.unsupported() {
            return Ok(self.permission());
        }
        let current = self.refresh_permission();
        if current != PermissionState::Default {
            return Ok(current);
        }
        let before = self.state();
        self.set_state(RegistrationState::PermissionRequested);
        let permission = match self.host.request_permission() {
            Ok(permission) => permission,
            Err(e) => {
                self.set_state(before);
                return Err(e);
            }
        };
        *self.permission.lock() = permission;
        self.set_state(match permission {
            PermissionState::Granted => RegistrationState::Granted,
            PermissionState::Denied => RegistrationState::Denied,
            PermissionState::Default => RegistrationState::Unregistered,
        });
        info!("notification permission is now {:?}", permission);
        Ok(permission)
    }

    /// Read-before-write against the identity store, so repeated calls on one device always
    /// agree on one id.
    pub fn resolve_device_id(&self) -> Result<String> {
        let store = self.store.lock();
        if let Some(identity) = store.get_device_identity()? {
            return Ok(identity.id);
        }
        let candidate = uuid::Uuid::new_v4().to_string();
        Ok(store.get_or_create_device_identity(&candidate)?.id)
    }

    /// The stored device id, if this device has ever had one.
    pub fn device_id(&self) -> Result<Option<String>> {
        Ok(self.store.lock().get_device_identity()?.map(|identity| identity.id))
    }

    pub fn register(&self) -> Result<RegistrationState> {
        self.ensure_initialized()?;
        if self.unsupported() {
            return Ok(RegistrationState::Unsupported);
        }
        let _guard = match InFlight::try_acquire(&self.in_flight) {
            Some(guard) => guard,
            None => {
                debug!("registration already in flight");
                return Ok(self.state());
            }
        };

        match self.refresh_permission() {
            PermissionState::Granted => (),
            PermissionState::Denied => {
                self.set_state(RegistrationState::Denied);
                return self.fail(Error::PermissionDenied);
            }
            PermissionState::Default => match self.request_permission()? {
                PermissionState::Granted => (),
                PermissionState::Denied => return self.fail(Error::PermissionDenied),
                PermissionState::Default => return self.fail(Error::PermissionDismissed),
            },
        }
        self.set_state(RegistrationState::Granted);

        let token = match self.tokens.acquire_token() {
            Ok(token) => token,
            Err(e) => {
                let e = match e {
                    Error::TokenAcquisition(_) => e,
                    other => Error::TokenAcquisition(other.to_string()),
                };
                return self.fail(e);
            }
        };
        if self.registered_token.lock().as_deref() == Some(token.as_str()) {
            debug!("already registered with this token");
            self.set_state(RegistrationState::Registered);
            return Ok(RegistrationState::Registered);
        }
        self.set_state(RegistrationState::TokenAcquired);

        let device_id = match self.resolve_device_id() {
            Ok(id) => id,
            Err(e) => return self.fail(e),
        };
        self.send_registration(&device_id, &token)
    }

    fn send_registration(&self, device_id: &str, token: &str) -> Result<RegistrationState> {
        let request = DeviceRegistrationRequest {
            token: token.to_string(),
            device_id: device_id.to_string(),
            device_name: self.host.device_name(),
            platform: Platform::Web,
            metadata: Map::new(),
        };
        let record = match self.connection.register_device(&request) {
            Ok(record) => record,
            Err(e) => return self.fail(e),
        };
        if record.device_id != device_id {
            warn!(
                "registry re-keyed device '{}' as '{}'",
                device_id, record.device_id
            );
        }
        *self.registered_token.lock() = Some(token.to_string());
        self.set_state(RegistrationState::Registered);
        info!("device '{}' registered", device_id);
        Ok(RegistrationState::Registered)
    }

    /// The push transport rotated our token. Re-register the same device with it.
    pub fn refresh_token(&self, token: &str) -> Result<RegistrationState> {
        self.ensure_initialized()?;
        if self.unsupported() {
            return Ok(RegistrationState::Unsupported);
        }
        if self.state() != RegistrationState::Registered {
            info!("not registered, nothing to refresh");
            return Ok(self.state());
        }
        if self.registered_token.lock().as_deref() == Some(token) {
            return Ok(RegistrationState::Registered);
        }
        let _guard = match InFlight::try_acquire(&self.in_flight) {
            Some(guard) => guard,
            None => return Ok(self.state()),
        };
        if !self.refresh_limiter.check(&*self.store.lock()) {
            return self.fail(Error::RateLimited("token refresh".into()));
        }
        let device_id = self.resolve_device_id()?;
        self.send_registration(&device_id, token)
    }

    /// Ask the backend to forget this device. Notification permission is the user's to revoke in
    /// the host; this doesn't touch it.
    pub fn unregister(&self) -> Result<RegistrationState> {
        self.ensure_initialized()?;
        if self.unsupported() {
            return Ok(RegistrationState::Unsupported);
        }
        let device_id = match self.device_id()? {
            Some(id) => id,
            None => {
                debug!("no device identity, nothing to unregister");
                return Ok(self.state());
            }
        };
        self.connection.unregister_device(&device_id)?;
        *self.registered_token.lock() = None;
        self.set_state(RegistrationState::Unregistered);
        info!("device '{}' unregistered", device_id);
        Ok(RegistrationState::Unregistered)
    }

    /// Unpair this device: unregister it, then delete its identity so the next registration
    /// starts over with a new id.
    pub fn forget_device(&self) -> Result<RegistrationState> {
        let state = self.unregister()?;
        if state == RegistrationState::Unsupported {
            return Ok(state);
        }
        let store = self.store.lock();
        if store.delete_device_identity()? {
            info!("device identity deleted");
        }
        // A new device gets a new refresh budget.
        self.refresh_limiter.reset(&*store);
        Ok(state)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::internal::communications::{DeviceRecord, MockConnection};
    use crate::internal::storage::PushAgentDb;
    use crate::internal::testing::{init_for_tests, FakeRegistry};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    type TestRegistrar<Co> = DeviceRegistrar<Co, PushAgentDb, MockRegistrarHost, MockTokenProvider>;

    /// A host whose permission starts at `permission`. The returned handle is what the host
    /// reports from then on; a prompt answered by the user updates it.
    fn host_with(
        permission: PermissionState,
    ) -> (MockRegistrarHost, Arc<Mutex<PermissionState>>) {
        let current = Arc::new(Mutex::new(permission));
        let mut host = MockRegistrarHost::new();
        host.expect_capabilities()
            .returning(PlatformCapabilities::all);
        let reported = Arc::clone(&current);
        host.expect_permission().returning(move || *reported.lock());
        host.expect_install_agent()
            .withf(|url| url == "https://shop.example.com/notification-agent.js")
            .returning(|_| Ok(()));
        host.expect_post_to_agent()
            .withf(|msg| *msg == PageMessage::ClientReady)
            .returning(|_| Ok(()));
        host.expect_device_name()
            .return_const("Firefox on Linux".to_string());
        (host, current)
    }

    fn answer_prompt(
        current: &Arc<Mutex<PermissionState>>,
        prompt: PermissionState,
    ) -> impl FnMut() -> Result<PermissionState> + Send + 'static {
        let current = Arc::clone(current);
        move || {
            *current.lock() = prompt;
            Ok(prompt)
        }
    }

    fn host(permission: PermissionState, prompt: PermissionState) -> MockRegistrarHost {
        let (mut host, current) = host_with(permission);
        host.expect_request_permission()
            .returning(answer_prompt(&current, prompt));
        host
    }

    fn tokens(values: &'static [&'static str]) -> MockTokenProvider {
        let mut tokens = MockTokenProvider::new();
        let mut next = 0;
        tokens.expect_acquire_token().returning(move || {
            let token = values[next.min(values.len() - 1)];
            next += 1;
            Ok(token.to_string())
        });
        tokens
    }

    fn registrar<Co: Connection>(
        connection: Co,
        host: MockRegistrarHost,
        tokens: MockTokenProvider,
    ) -> TestRegistrar<Co> {
        init_for_tests();
        DeviceRegistrar::new(
            AgentConfiguration::default(),
            connection,
            PushAgentDb::open_in_memory().unwrap(),
            host,
            tokens,
        )
    }

    #[test]
    fn test_device_id_idempotent() -> Result<()> {
        let registrar = registrar(
            MockConnection::new(),
            host(PermissionState::Default, PermissionState::Default),
            MockTokenProvider::new(),
        );
        assert_eq!(registrar.device_id()?, None);
        let first = registrar.resolve_device_id()?;
        for _ in 0..10 {
            assert_eq!(registrar.resolve_device_id()?, first);
        }
        let count: u32 = registrar.store.lock().query_row(
            "SELECT COUNT(*) FROM device_identity",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(count, 1);
        assert_eq!(registrar.device_id()?, Some(first));
        Ok(())
    }

    #[test]
    fn test_end_to_end_registration() -> Result<()> {
        let registry = FakeRegistry::default();
        let registrar = registrar(
            &registry,
            host(PermissionState::Default, PermissionState::Granted),
            tokens(&["t1", "t2"]),
        );
        registrar
            .store
            .lock()
            .get_or_create_device_identity("d1")?;

        assert_eq!(registrar.init()?, RegistrationState::Unregistered);
        assert_eq!(registrar.permission(), PermissionState::Default);
        assert_eq!(registrar.register()?, RegistrationState::Registered);
        assert_eq!(registrar.permission(), PermissionState::Granted);
        assert_eq!(registry.devices(), vec![("d1".to_string(), "t1".to_string())]);

        // The transport hands out a new token: same device, new token.
        assert_eq!(registrar.register()?, RegistrationState::Registered);
        assert_eq!(registry.devices(), vec![("d1".to_string(), "t2".to_string())]);
        assert_eq!(registry.register_calls(), 2);
        Ok(())
    }

    #[test]
    fn test_same_token_not_sent_twice() -> Result<()> {
        let mut connection = MockConnection::new();
        connection.expect_register_device().times(1).returning(|req| {
            Ok(DeviceRecord {
                device_id: req.device_id.clone(),
                token: req.token.clone(),
                device_name: None,
                platform: Some(Platform::Web),
            })
        });
        let registrar = registrar(
            connection,
            host(PermissionState::Granted, PermissionState::Granted),
            tokens(&["t1"]),
        );
        assert_eq!(registrar.init()?, RegistrationState::Granted);
        assert_eq!(registrar.register()?, RegistrationState::Registered);
        assert_eq!(registrar.register()?, RegistrationState::Registered);
        assert_eq!(registrar.refresh_token("t1")?, RegistrationState::Registered);
        Ok(())
    }

    #[test]
    fn test_refresh_token_updates_in_place() -> Result<()> {
        let registry = FakeRegistry::default();
        let registrar = registrar(
            &registry,
            host(PermissionState::Granted, PermissionState::Granted),
            tokens(&["t1"]),
        );
        registrar.init()?;
        // nothing to refresh yet.
        assert_eq!(registrar.refresh_token("t0")?, RegistrationState::Granted);
        assert_eq!(registry.register_calls(), 0);

        registrar.register()?;
        let id = registrar.device_id()?.unwrap();
        assert_eq!(registrar.refresh_token("t9")?, RegistrationState::Registered);
        assert_eq!(registry.devices(), vec![(id, "t9".to_string())]);
        Ok(())
    }

    #[test]
    fn test_refresh_rate_limited() -> Result<()> {
        let registry = FakeRegistry::default();
        let registrar = registrar(
            &registry,
            host(PermissionState::Granted, PermissionState::Granted),
            tokens(&["t1"]),
        );
        registrar.init()?;
        registrar.register()?;
        {
            let store = registrar.store.lock();
            for _ in 0..MAX_REFRESHES_PER_WINDOW {
                registrar.refresh_limiter.check(&*store);
            }
        }
        let err = registrar.refresh_token("t2").unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)));
        assert_eq!(registry.register_calls(), 1);
        Ok(())
    }

    #[test]
    fn test_permission_denied() -> Result<()> {
        let mut connection = MockConnection::new();
        connection.expect_register_device().never();
        let (mut host, current) = host_with(PermissionState::Default);
        host.expect_request_permission()
            .times(1)
            .returning(answer_prompt(&current, PermissionState::Denied));
        let registrar = registrar(connection, host, MockTokenProvider::new());
        registrar.init()?;
        let err = registrar.register().unwrap_err();
        assert!(matches!(err, Error::PermissionDenied));
        assert_eq!(registrar.state(), RegistrationState::Denied);
        // already denied: no second prompt.
        assert!(matches!(registrar.register(), Err(Error::PermissionDenied)));
        Ok(())
    }

    #[test]
    fn test_permission_dismissed() -> Result<()> {
        let registrar = registrar(
            MockConnection::new(),
            host(PermissionState::Default, PermissionState::Default),
            MockTokenProvider::new(),
        );
        registrar.init()?;
        assert!(matches!(
            registrar.register(),
            Err(Error::PermissionDismissed)
        ));
        assert_eq!(registrar.state(), RegistrationState::Unregistered);
        Ok(())
    }

    #[test]
    fn test_token_failure_stays_granted() -> Result<()> {
        let mut connection = MockConnection::new();
        connection.expect_register_device().never();
        let mut tokens = MockTokenProvider::new();
        tokens
            .expect_acquire_token()
            .returning(|| Err(Error::HostError("transport offline".into())));
        let registrar = registrar(
            connection,
            host(PermissionState::Granted, PermissionState::Granted),
            tokens,
        );
        registrar.init()?;
        assert!(matches!(
            registrar.register(),
            Err(Error::TokenAcquisition(_))
        ));
        assert_eq!(registrar.state(), RegistrationState::Granted);
        assert_eq!(registrar.device_id()?, None);
        Ok(())
    }

    #[test]
    fn test_backend_failure_not_registered() -> Result<()> {
        let mut connection = MockConnection::new();
        connection.expect_register_device().returning(|_| {
            Err(Error::CommunicationServerError {
                status: 500,
                message: "boom".into(),
            })
        });
        let registrar = registrar(
            connection,
            host(PermissionState::Granted, PermissionState::Granted),
            tokens(&["t1"]),
        );
        registrar.init()?;
        assert!(registrar.register().is_err());
        assert_eq!(registrar.state(), RegistrationState::TokenAcquired);
        Ok(())
    }

    #[test]
    fn test_unsupported_is_a_guarded_noop() -> Result<()> {
        let mut host = MockRegistrarHost::new();
        host.expect_capabilities().returning(|| PlatformCapabilities {
            background_agent: true,
            push: false,
            notifications: true,
        });
        host.expect_install_agent().never();
        host.expect_request_permission().never();
        let mut connection = MockConnection::new();
        connection.expect_register_device().never();
        connection.expect_unregister_device().never();
        let registrar = registrar(connection, host, MockTokenProvider::new());

        assert_eq!(registrar.init()?, RegistrationState::Unsupported);
        assert_eq!(registrar.register()?, RegistrationState::Unsupported);
        assert_eq!(registrar.request_permission()?, PermissionState::Default);
        assert_eq!(registrar.refresh_token("t1")?, RegistrationState::Unsupported);
        assert_eq!(registrar.unregister()?, RegistrationState::Unsupported);
        Ok(())
    }

    #[test]
    fn test_requires_init() {
        let registrar = registrar(
            MockConnection::new(),
            host(PermissionState::Granted, PermissionState::Granted),
            MockTokenProvider::new(),
        );
        assert!(matches!(registrar.register(), Err(Error::NotInitialized)));
        registrar.init().unwrap();
        registrar.dispose();
        assert!(matches!(registrar.register(), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_unregister_keeps_identity_and_permission() -> Result<()> {
        let registry = FakeRegistry::default();
        let registrar = registrar(
            &registry,
            host(PermissionState::Granted, PermissionState::Granted),
            tokens(&["t1"]),
        );
        registrar.init()?;
        // unregistering a device that never registered is a no-op.
        assert_eq!(registrar.unregister()?, RegistrationState::Granted);

        registrar.register()?;
        let id = registrar.device_id()?.unwrap();
        assert_eq!(registrar.unregister()?, RegistrationState::Unregistered);
        assert!(registry.devices().is_empty());
        assert_eq!(registrar.device_id()?, Some(id));
        assert_eq!(registrar.permission(), PermissionState::Granted);
        Ok(())
    }

    #[test]
    fn test_forget_device() -> Result<()> {
        let registry = FakeRegistry::default();
        let registrar = registrar(
            &registry,
            host(PermissionState::Granted, PermissionState::Granted),
            tokens(&["t1"]),
        );
        registrar.init()?;
        registrar.register()?;
        let old = registrar.device_id()?.unwrap();
        assert_eq!(registrar.forget_device()?, RegistrationState::Unregistered);
        assert_eq!(registrar.device_id()?, None);

        registrar.register()?;
        let new = registrar.device_id()?.unwrap();
        assert_ne!(old, new);
        assert_eq!(registry.devices(), vec![(new, "t1".to_string())]);
        Ok(())
    }

    #[test]
    fn test_permission_changed_in_host_settings() -> Result<()> {
        let registry = FakeRegistry::default();
        let (mut host, current) = host_with(PermissionState::Denied);
        host.expect_request_permission().never();
        let registrar = registrar(&registry, host, tokens(&["t1"]));
        assert_eq!(registrar.init()?, RegistrationState::Denied);
        assert!(matches!(registrar.register(), Err(Error::PermissionDenied)));

        // The user allows notifications in the host's settings.
        *current.lock() = PermissionState::Granted;
        assert_eq!(registrar.register()?, RegistrationState::Registered);
        assert_eq!(registrar.permission(), PermissionState::Granted);
        assert_eq!(registry.register_calls(), 1);

        // ...and revokes them again.
        *current.lock() = PermissionState::Denied;
        assert_eq!(registrar.request_permission()?, PermissionState::Denied);
        assert_eq!(registrar.state(), RegistrationState::Denied);
        Ok(())
    }

    #[test]
    fn test_registry_rekey_keeps_local_id() -> Result<()> {
        let mut connection = MockConnection::new();
        connection.expect_register_device().times(1).returning(|req| {
            Ok(DeviceRecord {
                device_id: "server-side-id".to_string(),
                token: req.token.clone(),
                device_name: None,
                platform: Some(Platform::Web),
            })
        });
        let registrar = registrar(
            connection,
            host(PermissionState::Granted, PermissionState::Granted),
            tokens(&["t1"]),
        );
        registrar.init()?;
        let id = registrar.resolve_device_id()?;
        assert_eq!(registrar.register()?, RegistrationState::Registered);
        assert_eq!(registrar.device_id()?, Some(id));
        Ok(())
    }

    struct BlockingRegistry {
        release: parking_lot::Mutex<mpsc::Receiver<()>>,
        inner: FakeRegistry,
    }

    impl Connection for BlockingRegistry {
        fn register_device(&self, request: &DeviceRegistrationRequest) -> Result<DeviceRecord> {
            let _ = self.release.lock().recv_timeout(Duration::from_secs(5));
            self.inner.register_device(request)
        }

        fn unregister_device(&self, device_id: &str) -> Result<()> {
            self.inner.unregister_device(device_id)
        }
    }

    #[test]
    fn test_concurrent_register_single_backend_call() -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let registry = BlockingRegistry {
            release: parking_lot::Mutex::new(rx),
            inner: FakeRegistry::default(),
        };
        let registrar = registrar(
            registry,
            host(PermissionState::Granted, PermissionState::Granted),
            tokens(&["t1"]),
        );
        registrar.init()?;

        std::thread::scope(|s| {
            let first = s.spawn(|| registrar.register());
            while registrar.state() != RegistrationState::TokenAcquired {
                std::thread::sleep(Duration::from_millis(1));
            }
            // A second mount while the first call is outstanding.
            assert_eq!(
                registrar.register().unwrap(),
                RegistrationState::TokenAcquired
            );
            tx.send(()).unwrap();
            assert_eq!(
                first.join().unwrap().unwrap(),
                RegistrationState::Registered
            );
        });
        assert_eq!(registrar.connection.inner.register_calls(), 1);
        Ok(())
    }
}
