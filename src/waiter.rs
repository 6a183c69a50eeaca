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

//! Subscribe-phase waiter.
//!
//! ## Purpose
//! Enrols a blocked caller in the waiter queue, subscribes to the lock's
//! wake-up channel, and retries the acquire whenever this caller reaches the
//! queue head: on every received publish and, because the channel is
//! at-most-once with no buffering, on a defensive ticker as well. The ticker
//! is not an optimization: without it a waiter whose wake-up was dropped
//! would stall for the whole budget.
//!
//! ## Teardown
//! Every exit path removes the caller from the queue and drops the
//! subscription. An abandoned waiter (future dropped mid-await) leaves its
//! queue entry behind; the score-based prune in the enqueue script reclaims
//! it once its deadline passes.

use crate::acquire;
use crate::config::LockConfig;
use crate::error::{LockError, LockResult};
use crate::lock::LockKeys;
use crate::store::{LockStore, WakeStream};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, instrument, warn};

/// What the subscribe phase observed on acquisition, for the caller's
/// diagnostic trail.
#[derive(Debug)]
pub(crate) struct WaitOutcome {
    /// Head checks performed (ticker fires plus channel wake-ups).
    pub checks: u32,
    /// How many of those were driven by a received publish.
    pub channel_wakes: u32,
}

/// Block on the waiter queue until acquired or the subscribe budget lapses.
///
/// ## Returns
/// - `Ok(outcome)`: the lock was acquired
/// - `Err(LockError::Timeout)`: the budget lapsed; carries this phase's
///   trail segment (`subscribe-<checks>-<wakes>`) for the facade to fold
///   into its diagnostic
#[instrument(skip_all, fields(lock = %keys.lock, field = %field))]
pub(crate) async fn subscribe_wait(
    store: &Arc<dyn LockStore>,
    keys: &LockKeys,
    field: &str,
    config: &LockConfig,
    schedule_renewal: bool,
) -> LockResult<WaitOutcome> {
    let budget = config.subscribe_budget();
    if budget.is_zero() {
        return Err(LockError::Timeout("subscribe-0-0".to_string()));
    }

    let now_micros = Utc::now().timestamp_micros();
    let deadline_score = now_micros + budget.as_micros() as i64;
    store
        .enqueue_waiter(&keys.zset, deadline_score, field, now_micros)
        .await
        .map_err(|e| e.with_phase("subscribe enqueue"))?;

    let wake = match store.subscribe(&keys.publish).await {
        Ok(stream) => stream,
        Err(e) => {
            dequeue_quietly(store, keys, field).await;
            return Err(e.with_phase("subscribe open"));
        }
    };

    let result = wait_loop(store, keys, field, config, schedule_renewal, budget, wake).await;
    dequeue_quietly(store, keys, field).await;
    result
}

async fn wait_loop(
    store: &Arc<dyn LockStore>,
    keys: &LockKeys,
    field: &str,
    config: &LockConfig,
    schedule_renewal: bool,
    budget: Duration,
    mut wake: WakeStream,
) -> LockResult<WaitOutcome> {
    let expired = tokio::time::sleep_until(Instant::now() + budget);
    tokio::pin!(expired);

    // First tick fires immediately, covering a release that happened between
    // the failed acquire and the subscription going live.
    let mut ticker = interval(config.subscribe_sleep);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut checks = 0u32;
    let mut channel_wakes = 0u32;
    let mut wake_closed = false;

    loop {
        tokio::select! {
            _ = &mut expired => {
                debug!(checks, channel_wakes, "subscribe budget exhausted");
                return Err(LockError::Timeout(format!(
                    "subscribe-{checks}-{channel_wakes}"
                )));
            }
            message = wake.next(), if !wake_closed => {
                match message {
                    Some(()) => {
                        channel_wakes += 1;
                        checks += 1;
                        if check_head(store, keys, field, config, schedule_renewal).await? {
                            return Ok(WaitOutcome { checks, channel_wakes });
                        }
                    }
                    None => {
                        warn!(lock = %keys.lock, "wake channel closed, continuing on timer alone");
                        wake_closed = true;
                    }
                }
            }
            _ = ticker.tick() => {
                checks += 1;
                if check_head(store, keys, field, config, schedule_renewal).await? {
                    return Ok(WaitOutcome { checks, channel_wakes });
                }
            }
        }
    }
}

/// Retry the acquire if this caller is first in line.
async fn check_head(
    store: &Arc<dyn LockStore>,
    keys: &LockKeys,
    field: &str,
    config: &LockConfig,
    schedule_renewal: bool,
) -> LockResult<bool> {
    let head = store
        .queue_head(&keys.zset)
        .await
        .map_err(|e| e.with_phase("subscribe head"))?;
    if head.as_deref() != Some(field) {
        return Ok(false);
    }
    let ttl = acquire::try_acquire(store, &keys.lock, field, config.expiry, schedule_renewal)
        .await
        .map_err(|e| e.with_phase("subscribe acquire"))?;
    Ok(ttl == 0)
}

/// Best-effort dequeue; a leftover entry is pruned by its score later.
async fn dequeue_quietly(store: &Arc<dyn LockStore>, keys: &LockKeys, field: &str) {
    if let Err(e) = store.remove_waiter(&keys.zset, field).await {
        warn!(zset = %keys.zset, field = %field, error = %e, "failed to dequeue waiter");
    }
}
