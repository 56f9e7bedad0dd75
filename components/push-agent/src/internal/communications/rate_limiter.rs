/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::error::{debug, info, warn};
use crate::internal::storage::{IdentityStorage, Timestamp};

/// A fixed-window call counter kept in the `meta_data` table, so restarting the page doesn't
/// hand out a fresh budget.
pub struct PersistedRateLimiter {
    op_name: String,
    window_secs: u64,
    max_calls: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Counters {
    pub window_start: u64,
    pub count: u16,
}

impl PersistedRateLimiter {
    pub fn new(op_name: &str, window_secs: u64, max_calls: u16) -> Self {
        Self {
            op_name: op_name.to_owned(),
            window_secs,
            max_calls,
        }
    }

    /// Count one call and say whether it may go ahead.
    pub fn check<S: IdentityStorage + ?Sized>(&self, store: &S) -> bool {
        let now = now_secs();
        let mut counters = self.load(store);
        if now.saturating_sub(counters.window_start) >= self.window_secs {
            debug!("new rate limit window for {}", self.op_name);
            counters = Counters {
                window_start: now,
                count: 0,
            };
        }
        counters.count = counters.count.saturating_add(1);
        self.save(store, counters);

        if counters.count > self.max_calls {
            info!(
                "{} rate limited: {} calls in the current window (max {})",
                self.op_name, counters.count, self.max_calls
            );
            return false;
        }
        true
    }

    pub fn reset<S: IdentityStorage + ?Sized>(&self, store: &S) {
        self.save(
            store,
            Counters {
                window_start: now_secs(),
                count: 0,
            },
        )
    }

    fn keys(&self) -> (String, String) {
        (
            format!("ratelimit_{}_timestamp", self.op_name),
            format!("ratelimit_{}_count", self.op_name),
        )
    }

    pub(crate) fn load<S: IdentityStorage + ?Sized>(&self, store: &S) -> Counters {
        let (window_key, count_key) = self.keys();
        // Unreadable counters start a fresh window.
        let read = |key: &str| store.get_meta(key).ok().flatten();
        Counters {
            window_start: read(&window_key)
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            count: read(&count_key)
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }

    pub(crate) fn save<S: IdentityStorage + ?Sized>(&self, store: &S, counters: Counters) {
        let (window_key, count_key) = self.keys();
        let saved = store
            .set_meta(&window_key, &counters.window_start.to_string())
            .and_then(|_| store.set_meta(&count_key, &counters.count.to_string()));
        if let Err(e) = saved {
            warn!("could not persist rate limit for {}: {}", self.op_name, e);
        }
    }
}

fn now_secs() -> u64 {
    Timestamp::now().0 / 1000
}
