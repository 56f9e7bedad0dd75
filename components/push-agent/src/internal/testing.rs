/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Test helpers: logging init and in-memory stand-ins for the host and the backend registry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::internal::communications::{Connection, DeviceRecord, DeviceRegistrationRequest};
use crate::internal::host::{AgentHost, ClientHost, NotificationHost, WindowClient};
use crate::internal::messages::AgentMessage;
use crate::internal::push::NotificationRequest;

/// Init logging for tests. Safe to call more than once.
pub fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    Show(String),
    Close(String),
    Focus(String),
    Post(String, AgentMessage),
    Open(String),
    Claim,
}

/// A host that remembers everything it was asked to do.
#[derive(Default)]
pub struct FakeHost {
    visible: Mutex<Vec<NotificationRequest>>,
    windows: Mutex<Vec<WindowClient>>,
    calls: Mutex<Vec<HostCall>>,
    claim_fails: AtomicBool,
    extended: AtomicUsize,
    released: AtomicUsize,
}

impl FakeHost {
    pub fn visible_notifications(&self) -> Vec<NotificationRequest> {
        self.visible.lock().clone()
    }

    pub fn add_window(&self, window: WindowClient) {
        self.windows.lock().push(window);
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().clone()
    }

    pub fn claims(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| **c == HostCall::Claim)
            .count()
    }

    pub fn fail_claim(&self) {
        self.claim_fails.store(true, Ordering::SeqCst);
    }

    /// (extended, released) lifetime counts.
    pub fn lifetimes(&self) -> (usize, usize) {
        (
            self.extended.load(Ordering::SeqCst),
            self.released.load(Ordering::SeqCst),
        )
    }
}

impl NotificationHost for FakeHost {
    fn show_notification(&self, notification: &NotificationRequest) -> Result<()> {
        self.calls.lock().push(HostCall::Show(notification.tag.clone()));
        let mut visible = self.visible.lock();
        match visible.iter_mut().find(|n| n.tag == notification.tag) {
            Some(existing) => *existing = notification.clone(),
            None => visible.push(notification.clone()),
        }
        Ok(())
    }

    fn close_notification(&self, tag: &str) -> Result<()> {
        self.calls.lock().push(HostCall::Close(tag.to_string()));
        self.visible.lock().retain(|n| n.tag != tag);
        Ok(())
    }
}

impl ClientHost for FakeHost {
    fn match_all_windows(&self, _include_uncontrolled: bool) -> Result<Vec<WindowClient>> {
        Ok(self.windows.lock().clone())
    }

    fn focus(&self, client_id: &str) -> Result<()> {
        self.calls.lock().push(HostCall::Focus(client_id.to_string()));
        Ok(())
    }

    fn post_message(&self, client_id: &str, message: &AgentMessage) -> Result<()> {
        self.calls
            .lock()
            .push(HostCall::Post(client_id.to_string(), message.clone()));
        Ok(())
    }

    fn open_window(&self, url: &str) -> Result<()> {
        self.calls.lock().push(HostCall::Open(url.to_string()));
        Ok(())
    }

    fn claim(&self) -> Result<()> {
        self.calls.lock().push(HostCall::Claim);
        if self.claim_fails.load(Ordering::SeqCst) {
            return Err(Error::HostError("claim refused".into()));
        }
        Ok(())
    }
}

impl AgentHost for FakeHost {
    fn extend_lifetime(&self, _event: &'static str) {
        self.extended.fetch_add(1, Ordering::SeqCst);
    }

    fn release_lifetime(&self, _event: &'static str) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A registry that keys devices by id, like the real one.
#[derive(Default)]
pub struct FakeRegistry {
    devices: Mutex<BTreeMap<String, String>>,
    register_calls: AtomicUsize,
}

impl FakeRegistry {
    /// (device id, token) pairs.
    pub fn devices(&self) -> Vec<(String, String)> {
        self.devices
            .lock()
            .iter()
            .map(|(id, token)| (id.clone(), token.clone()))
            .collect()
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }
}

impl Connection for FakeRegistry {
    fn register_device(&self, request: &DeviceRegistrationRequest) -> Result<DeviceRecord> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.devices
            .lock()
            .insert(request.device_id.clone(), request.token.clone());
        Ok(DeviceRecord {
            device_id: request.device_id.clone(),
            token: request.token.clone(),
            device_name: Some(request.device_name.clone()),
            platform: Some(request.platform),
        })
    }

    fn unregister_device(&self, device_id: &str) -> Result<()> {
        match self.devices.lock().remove(device_id) {
            Some(_) => Ok(()),
            None => Err(Error::CommunicationError(format!(
                "unknown device {}",
                device_id
            ))),
        }
    }
}
