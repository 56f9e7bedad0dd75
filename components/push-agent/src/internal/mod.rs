/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

pub mod agent;
pub mod communications;
pub mod config;
pub mod host;
pub mod http;
pub mod interaction;
pub mod interception;
pub mod lifecycle;
pub mod messages;
pub mod push;
pub mod registrar;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub mod testing;

pub use agent::BackgroundAgent;
pub use config::AgentConfiguration;
pub use registrar::DeviceRegistrar;
