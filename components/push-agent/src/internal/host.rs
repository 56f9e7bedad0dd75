/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The parts of the host platform the background agent talks to.
//!
//! The embedding runtime implements these; everything the agent decides on its own stays in this
//! crate.

use crate::error::Result;
use crate::internal::messages::AgentMessage;
use crate::internal::push::{NotificationData, NotificationRequest};

/// Renders user-visible notifications.
pub trait NotificationHost {
    /// Show a notification. Showing one with the tag of a visible notification replaces it.
    fn show_notification(&self, notification: &NotificationRequest) -> Result<()>;

    fn close_notification(&self, tag: &str) -> Result<()>;
}

/// An application window the agent can see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
    pub id: String,
    pub url: String,
    pub focused: bool,
}

/// The application windows and the agent's control over them.
pub trait ClientHost {
    /// Every open window, including those controlled by another agent instance when
    /// `include_uncontrolled` is set.
    fn match_all_windows(&self, include_uncontrolled: bool) -> Result<Vec<WindowClient>>;

    fn focus(&self, client_id: &str) -> Result<()>;

    fn post_message(&self, client_id: &str, message: &AgentMessage) -> Result<()>;

    fn open_window(&self, url: &str) -> Result<()>;

    /// Take control of every open page without waiting for a reload.
    fn claim(&self) -> Result<()>;
}

/// Everything the agent needs from the platform. The host must keep the agent alive between an
/// `extend_lifetime` and its matching `release_lifetime`.
pub trait AgentHost: NotificationHost + ClientHost {
    fn extend_lifetime(&self, event: &'static str);

    fn release_lifetime(&self, event: &'static str);
}

/// Optional analytics for notifications closed without a click.
pub trait AnalyticsHook {
    fn notification_dismissed(&self, tag: &str, data: &NotificationData) -> Result<()>;
}

impl<T: NotificationHost + ?Sized> NotificationHost for Box<T> {
    fn show_notification(&self, notification: &NotificationRequest) -> Result<()> {
        (**self).show_notification(notification)
    }

    fn close_notification(&self, tag: &str) -> Result<()> {
        (**self).close_notification(tag)
    }
}

impl<T: ClientHost + ?Sized> ClientHost for Box<T> {
    fn match_all_windows(&self, include_uncontrolled: bool) -> Result<Vec<WindowClient>> {
        (**self).match_all_windows(include_uncontrolled)
    }

    fn focus(&self, client_id: &str) -> Result<()> {
        (**self).focus(client_id)
    }

    fn post_message(&self, client_id: &str, message: &AgentMessage) -> Result<()> {
        (**self).post_message(client_id, message)
    }

    fn open_window(&self, url: &str) -> Result<()> {
        (**self).open_window(url)
    }

    fn claim(&self) -> Result<()> {
        (**self).claim()
    }
}

impl<T: AgentHost + ?Sized> AgentHost for Box<T> {
    fn extend_lifetime(&self, event: &'static str) {
        (**self).extend_lifetime(event)
    }

    fn release_lifetime(&self, event: &'static str) {
        (**self).release_lifetime(event)
    }
}

impl<T: NotificationHost + ?Sized> NotificationHost for &T {
    fn show_notification(&self, notification: &NotificationRequest) -> Result<()> {
        (**self).show_notification(notification)
    }

    fn close_notification(&self, tag: &str) -> Result<()> {
        (**self).close_notification(tag)
    }
}

impl<T: ClientHost + ?Sized> ClientHost for &T {
    fn match_all_windows(&self, include_uncontrolled: bool) -> Result<Vec<WindowClient>> {
        (**self).match_all_windows(include_uncontrolled)
    }

    fn focus(&self, client_id: &str) -> Result<()> {
        (**self).focus(client_id)
    }

    fn post_message(&self, client_id: &str, message: &AgentMessage) -> Result<()> {
        (**self).post_message(client_id, message)
    }

    fn open_window(&self, url: &str) -> Result<()> {
        (**self).open_window(url)
    }

    fn claim(&self) -> Result<()> {
        (**self).claim()
    }
}

impl<T: AgentHost + ?Sized> AgentHost for &T {
    fn extend_lifetime(&self, event: &'static str) {
        (**self).extend_lifetime(event)
    }

    fn release_lifetime(&self, event: &'static str) {
        (**self).release_lifetime(event)
    }
}

/// Keeps the agent alive for as long as it is held; released on every exit path.
pub struct LifetimeExtension<'a, H: AgentHost + ?Sized> {
    host: &'a H,
    event: &'static str,
}

impl<'a, H: AgentHost + ?Sized> LifetimeExtension<'a, H> {
    pub fn new(host: &'a H, event: &'static str) -> Self {
        host.extend_lifetime(event);
        Self { host, event }
    }
}

impl<H: AgentHost + ?Sized> Drop for LifetimeExtension<'_, H> {
    fn drop(&mut self) {
        self.host.release_lifetime(self.event);
    }
}
