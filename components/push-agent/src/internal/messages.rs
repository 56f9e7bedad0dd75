/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Messages exchanged between the agent and application pages.

use serde::{Deserialize, Serialize};

use crate::internal::push::NotificationData;

/// Sent from the agent to a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMessage {
    /// A notification was clicked; the page routes to `data` itself.
    NotificationClicked { data: NotificationData },
    /// Answer to [`PageMessage::ClientReady`].
    ServiceWorkerReady,
}

/// Sent from a page to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    SkipWaiting,
    ClientReady,
}
