/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Push reception.
//!
//! Push transports aren't uniform. A managed transport hands us a structured object shaped like
//! `{"notification": {...}, "data": {...}}`, while a raw delivery only has an optional body which
//! should be JSON shaped like `{"title", "body", "icon", "badge", "tag", "data"}`. Both are parsed
//! once, at the boundary, into [`InboundPush`] and normalized straight into a [`PushPayload`] so
//! that nothing after this point has to care where a message came from.
//!
//! A payload we can't make sense of is dropped and logged. Retrying would just deliver the same
//! bytes again.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{debug, info, warn, Error, Result};
use crate::internal::config::AgentConfiguration;
use crate::internal::host::NotificationHost;

pub const DEFAULT_TITLE: &str = "New Notification";
pub const DEFAULT_BODY: &str = "You have a new notification";
pub const DEFAULT_TAG: &str = "notification";

pub const OPEN_ACTION: &str = "open";
pub const DISMISS_ACTION: &str = "dismiss";

/// The `data` block that travels with a notification and is handed back to the page on click.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(rename = "actionUrl", default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationFields {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub tag: Option<String>,
}

/// Payload as delivered by the managed push-messaging transport.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManagedPushPayload {
    #[serde(default)]
    pub notification: Option<NotificationFields>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

/// JSON body of a raw Push API delivery.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub tag: Option<String>,
    #[serde(default)]
    pub data: Option<NotificationData>,
}

#[derive(Debug, Clone)]
pub enum InboundPush {
    Managed(ManagedPushPayload),
    /// The raw body, if the delivery had one at all.
    Raw(Option<Vec<u8>>),
}

impl InboundPush {
    /// Parse the structured object a managed transport delivered.
    pub fn managed(payload: Value) -> Result<Self> {
        serde_json::from_value(payload)
            .map(InboundPush::Managed)
            .map_err(|e| Error::InvalidPayload(format!("managed payload: {}", e)))
    }
}

/// The one payload shape handlers work with.
#[derive(Debug, Clone, PartialEq)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub data: NotificationData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// What we ask the host to render.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

impl From<PushPayload> for NotificationRequest {
    fn from(payload: PushPayload) -> Self {
        NotificationRequest {
            title: payload.title,
            body: payload.body,
            icon: payload.icon,
            badge: payload.badge,
            tag: payload.tag,
            data: payload.data,
            actions: vec![
                NotificationAction {
                    action: OPEN_ACTION.to_string(),
                    title: "View".to_string(),
                },
                NotificationAction {
                    action: DISMISS_ACTION.to_string(),
                    title: "Dismiss".to_string(),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Displayed { tag: String },
    Dropped { reason: String },
}

pub struct PushReceptionHandler {
    default_icon: String,
    default_badge: String,
}

impl PushReceptionHandler {
    pub fn new(config: &AgentConfiguration) -> Self {
        Self {
            default_icon: config.default_icon.clone(),
            default_badge: config.default_badge.clone(),
        }
    }

    pub fn normalize(&self, push: InboundPush) -> Result<PushPayload> {
        let (fields, data) = match push {
            InboundPush::Managed(managed) => {
                let data = managed.data.unwrap_or_default();
                let fields = managed.notification.unwrap_or_else(|| {
                    // Data-only messages carry the display fields inside `data`.
                    let field = |name: &str| {
                        data.get(name).and_then(Value::as_str).map(String::from)
                    };
                    NotificationFields {
                        title: field("title"),
                        body: field("body"),
                        icon: field("icon"),
                        badge: field("badge"),
                        tag: field("tag"),
                    }
                });
                let data: NotificationData = serde_json::from_value(Value::Object(data))
                    .map_err(|e| Error::InvalidPayload(format!("notification data: {}", e)))?;
                (fields, data)
            }
            InboundPush::Raw(None) => {
                return Err(Error::InvalidPayload("push event has no payload".into()))
            }
            InboundPush::Raw(Some(bytes)) => {
                let raw: RawPushPayload = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::InvalidPayload(format!("raw payload: {}", e)))?;
                (
                    NotificationFields {
                        title: raw.title,
                        body: raw.body,
                        icon: raw.icon,
                        badge: raw.badge,
                        tag: raw.tag,
                    },
                    raw.data.unwrap_or_default(),
                )
            }
        };
        let tag = fields
            .tag
            .or_else(|| data.kind.clone())
            .unwrap_or_else(|| DEFAULT_TAG.to_string());
        Ok(PushPayload {
            title: fields.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: fields.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
            icon: fields.icon.unwrap_or_else(|| self.default_icon.clone()),
            badge: fields.badge.unwrap_or_else(|| self.default_badge.clone()),
            tag,
            data,
        })
    }

    /// Normalize and render one push. Rendering is the last thing that happens; a render
    /// failure is the host's and is returned, a bad payload is dropped.
    pub fn handle<N: NotificationHost + ?Sized>(
        &self,
        push: InboundPush,
        host: &N,
    ) -> Result<PushOutcome> {
        let payload = match self.normalize(push) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("dropping push message: {}", e);
                return Ok(PushOutcome::Dropped {
                    reason: e.to_string(),
                });
            }
        };
        debug!("rendering push notification {:?}", payload);
        let tag = payload.tag.clone();
        host.show_notification(&payload.into())?;
        info!("displayed notification with tag '{}'", tag);
        Ok(PushOutcome::Displayed { tag })
    }
}
