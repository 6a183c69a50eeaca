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

//! Single round-trip acquire attempt.

use crate::error::LockResult;
use crate::renewer;
use crate::store::LockStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Invoke the atomic acquire script once.
///
/// ## Returns
/// The raw TTL reply: `0` means held (fresh or re-entered); a positive value
/// is the current holder's remaining TTL in milliseconds. On a grant with
/// `schedule_renewal` set, the expiration renewer for this `field` is
/// started unless one is already running.
pub(crate) async fn try_acquire(
    store: &Arc<dyn LockStore>,
    lock_name: &str,
    field: &str,
    expiry: Duration,
    schedule_renewal: bool,
) -> LockResult<i64> {
    let ttl = store
        .acquire(lock_name, expiry.as_millis() as i64, field)
        .await?;

    if ttl == 0 {
        metrics::counter!("plexspaces_redis_lock_acquired_total").increment(1);
        if schedule_renewal {
            renewer::schedule(
                Arc::clone(store),
                lock_name.to_string(),
                field.to_string(),
                expiry,
            );
        }
    } else {
        debug!(lock = %lock_name, ttl_ms = ttl, "lock held elsewhere");
    }
    Ok(ttl)
}
