// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexSpaces.
//
// PlexSpaces is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexSpaces is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexSpaces. If not, see <https://www.gnu.org/licenses/>.

//! Cooperative expiration renewal.
//!
//! ## Purpose
//! A holder that acquired with scheduling gets a background task that
//! refreshes the lock's TTL at a third of the expiry, so two renewal
//! attempts fit before the TTL lapses even under lost packets. A
//! process-wide registry keyed by `field` guarantees at most one renewer per
//! live handle; re-entrant acquisitions find the existing entry and leave it
//! alone.
//!
//! ## Termination
//! The task exits when the release path cancels it, when a renewal reports
//! the lock is gone, or when the store becomes unreachable. Renewal failures
//! stay in the background: they are logged and never escalate. On every exit
//! path the task removes its own registry entry; the removal is id-guarded
//! so a cancelled task cannot evict a successor that re-registered the same
//! field.

use crate::store::LockStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use ulid::Ulid;

static RENEWERS: Lazy<DashMap<String, RenewerHandle>> = Lazy::new(DashMap::new);

struct RenewerHandle {
    id: Ulid,
    cancel: CancellationToken,
}

/// Start a renewer for `field` unless one is already registered.
pub(crate) fn schedule(
    store: Arc<dyn LockStore>,
    lock_name: String,
    field: String,
    expiry: Duration,
) {
    let id = Ulid::new();
    let token = CancellationToken::new();
    match RENEWERS.entry(field.clone()) {
        Entry::Occupied(_) => return,
        Entry::Vacant(slot) => {
            slot.insert(RenewerHandle {
                id,
                cancel: token.clone(),
            });
        }
    }
    tokio::spawn(renew_loop(store, lock_name, field, expiry, id, token));
}

/// Cancel and deregister the renewer bound to `field`, if any.
pub(crate) fn cancel(field: &str) {
    if let Some((_, handle)) = RENEWERS.remove(field) {
        handle.cancel.cancel();
        debug!(field = %field, "renewer cancelled");
    }
}

#[cfg(test)]
pub(crate) fn is_scheduled(field: &str) -> bool {
    RENEWERS.contains_key(field)
}

async fn renew_loop(
    store: Arc<dyn LockStore>,
    lock_name: String,
    field: String,
    expiry: Duration,
    id: Ulid,
    token: CancellationToken,
) {
    let interval = expiry / 3;
    let ttl_ms = expiry.as_millis() as i64;
    let mut renewals = 0u64;
    debug!(field = %field, lock = %lock_name, interval_ms = interval.as_millis() as u64, "renewer started");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(field = %field, renewals, "renewer stopped");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                match store.renew(&lock_name, ttl_ms, &field).await {
                    Ok(true) => {
                        renewals += 1;
                        metrics::counter!("plexspaces_redis_lock_renewals_total").increment(1);
                        debug!(field = %field, renewals, "lease renewed");
                    }
                    Ok(false) => {
                        debug!(field = %field, renewals, "lock no longer held, renewer exiting");
                        break;
                    }
                    Err(e) => {
                        warn!(field = %field, error = %e, "renewal failed, renewer exiting");
                        break;
                    }
                }
            }
        }
    }

    RENEWERS.remove_if(&field, |_, handle| handle.id == id);
}
