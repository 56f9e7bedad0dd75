/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Handles agent and registrar storage
//!
//! Two traits sit over one SQLite database, [`PushAgentDb`]:
//!
//! - [`CacheStorage`] is the local cache store: named, versioned snapshots of HTTP responses keyed
//!   by request. Snapshots are only ever evicted as a whole.
//! - [`IdentityStorage`] is the device identity store: exactly one durable device id, plus a small
//!   key/value meta table used by the persisted rate limiter.
//!
//! Every write is a single statement or a single transaction, so concurrent users of the same file
//! never see a half-made snapshot or two identities.

mod db;
mod record;
mod schema;

pub use self::{
    db::{CacheStorage, IdentityStorage, PushAgentDb},
    record::{DeviceIdentity, Timestamp, PRIMARY_IDENTITY},
};
