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

//! Polling compensator for the subscribe phase.
//!
//! The wake-up channel is at-most-once and the waiter queue is best-effort,
//! so a subscriber can come up empty-handed even though the lock turned
//! free. This loop retries the acquire at a fixed cadence, ignoring queue
//! position on purpose, until it wins or its share of the wait budget
//! lapses.

use crate::acquire;
use crate::config::LockConfig;
use crate::error::{LockError, LockResult};
use crate::lock::LockKeys;
use crate::store::LockStore;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// What the polling phase observed on acquisition, for the caller's
/// diagnostic trail.
#[derive(Debug)]
pub(crate) struct CasOutcome {
    pub iterations: u32,
}

/// Poll the acquire until it succeeds or the cas budget lapses.
///
/// ## Returns
/// - `Ok(outcome)`: the lock was acquired
/// - `Err(LockError::Timeout)`: the budget lapsed; carries this phase's
///   trail segment (`cas-<iterations>`) for the facade to fold into its
///   diagnostic
#[instrument(skip_all, fields(lock = %keys.lock, field = %field))]
pub(crate) async fn cas_wait(
    store: &Arc<dyn LockStore>,
    keys: &LockKeys,
    field: &str,
    config: &LockConfig,
    schedule_renewal: bool,
) -> LockResult<CasOutcome> {
    let deadline = Instant::now() + config.cas_budget();
    let mut iterations = 0u32;

    loop {
        iterations += 1;
        let ttl = acquire::try_acquire(store, &keys.lock, field, config.expiry, schedule_renewal)
            .await
            .map_err(|e| e.with_phase("cas acquire"))?;
        if ttl == 0 {
            debug!(iterations, "acquired during cas phase");
            return Ok(CasOutcome { iterations });
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(config.cas_sleep.min(deadline - now)).await;
        if Instant::now() >= deadline {
            break;
        }
    }

    debug!(iterations, "cas budget exhausted");
    Err(LockError::Timeout(format!("cas-{iterations}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLockStore;
    use std::time::Duration;

    fn config(wait_ms: u64) -> LockConfig {
        LockConfig {
            expiry: Duration::from_secs(5),
            wait: Duration::from_millis(wait_ms),
            subscribe_sleep: Duration::from_millis(50),
            cas_sleep: Duration::from_millis(20),
            // All of the wait budget goes to the polling phase.
            subscribe_ratio: 0,
            cas_ratio: 1,
        }
    }

    fn keys(name: &str) -> LockKeys {
        LockKeys::derive("GoDistRL", name)
    }

    #[tokio::test]
    async fn test_cas_acquires_free_lock_immediately() {
        let store: Arc<dyn LockStore> = Arc::new(MemoryLockStore::new());
        let keys = keys("cas-free");

        let outcome = cas_wait(&store, &keys, "f1", &config(500), false).await.unwrap();
        assert_eq!(outcome.iterations, 1);
    }

    #[tokio::test]
    async fn test_cas_acquires_after_release() {
        let mem = Arc::new(MemoryLockStore::new());
        let store: Arc<dyn LockStore> = mem.clone();
        let keys = keys("cas-retry");

        store.acquire(&keys.lock, 30_000, "holder").await.unwrap();

        let release_store: Arc<dyn LockStore> = mem.clone();
        let release_keys = keys.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            release_store
                .release(&release_keys.lock, &release_keys.publish, 30_000, "holder")
                .await
                .unwrap();
        });

        let outcome = cas_wait(&store, &keys, "f2", &config(1_000), false).await.unwrap();
        assert!(outcome.iterations > 1);
    }

    #[tokio::test]
    async fn test_cas_times_out_within_budget() {
        let store: Arc<dyn LockStore> = Arc::new(MemoryLockStore::new());
        let keys = keys("cas-timeout");

        store.acquire(&keys.lock, 30_000, "holder").await.unwrap();

        let started = std::time::Instant::now();
        let err = cas_wait(&store, &keys, "f3", &config(200), false).await.unwrap_err();
        let elapsed = started.elapsed();

        let trail = match &err {
            LockError::Timeout(trail) => trail.clone(),
            other => panic!("expected timeout, got {other:?}"),
        };
        let iterations: u32 = trail
            .strip_prefix("cas-")
            .and_then(|n| n.parse().ok())
            .unwrap();
        assert!(iterations >= 5, "trail = {trail}");
        assert!(elapsed >= Duration::from_millis(180));
        assert!(elapsed < Duration::from_millis(600), "elapsed = {elapsed:?}");
    }
}
