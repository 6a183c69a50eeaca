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

//! The public lock facade.

use crate::acquire;
use crate::cas;
use crate::config::{LockConfig, DEFAULT_LOCK_KEY_PREFIX, PUBLISH_POSTFIX, ZSET_POSTFIX};
use crate::error::{LockError, LockResult};
use crate::renewer;
use crate::store::LockStore;
use crate::waiter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use ulid::Ulid;

/// Store-side key names derived from the prefix and lock name.
#[derive(Debug, Clone)]
pub(crate) struct LockKeys {
    /// Undecorated lock name as given by the caller.
    pub name: String,
    /// Hash key holding the holder field and reentrancy depth.
    pub lock: String,
    /// Sorted set of enrolled waiters.
    pub zset: String,
    /// Channel that release broadcasts wake-ups on.
    pub publish: String,
}

impl LockKeys {
    pub(crate) fn derive(prefix: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            lock: format!("{prefix}:{name}"),
            zset: format!("{prefix}:{name}{ZSET_POSTFIX}"),
            publish: format!("{prefix}:{name}{PUBLISH_POSTFIX}"),
        }
    }
}

/// Fallback per-handle discriminator for callers outside a task context.
static FIELD_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Mint a holder identity: a fresh ULID plus a task discriminator, so
/// re-entry from the same handle is recognised while unrelated handles can
/// never collide. Stable for the handle's lifetime.
fn mint_field() -> String {
    let task = tokio::task::try_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| FIELD_SEQUENCE.fetch_add(1, Ordering::Relaxed).to_string());
    format!("{}-{}", Ulid::new(), task)
}

/// A handle on one named distributed lock.
///
/// ## Purpose
/// Coordinates mutual exclusion across processes and hosts through shared
/// store state. At most one holder identity owns a given name at any
/// instant; the same handle may re-enter the lock, and each successful
/// acquisition must be paired with a [`release`](DistributedLock::release).
///
/// ## Acquisition paths
/// - [`lock`](DistributedLock::lock): one atomic attempt, no waiting.
/// - [`try_lock`](DistributedLock::try_lock): attempt, then wait on the
///   wake-up channel, then fall back to bounded polling, all within the
///   configured `wait` budget.
/// - [`try_lock_with_schedule`](DistributedLock::try_lock_with_schedule):
///   as `try_lock`, plus a background renewer that keeps the lock alive for
///   long critical sections.
///
/// ## Example
/// ```rust,no_run
/// use plexspaces_redis_lock::{DistributedLock, RedisLockStore};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(RedisLockStore::connect("redis://127.0.0.1/").await?);
/// let lock = DistributedLock::new(store, "inventory:refill")?;
///
/// let (acquired, trail) = lock.try_lock().await?;
/// if acquired {
///     // critical section
///     lock.release().await?;
/// } else {
///     eprintln!("lost the race: {trail}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    keys: LockKeys,
    field: String,
    config: LockConfig,
}

impl DistributedLock {
    /// Create a handle with the default configuration.
    pub fn new(store: Arc<dyn LockStore>, name: impl Into<String>) -> LockResult<Self> {
        Self::with_config(store, name, LockConfig::default())
    }

    /// Create a handle with an explicit configuration.
    ///
    /// ## Errors
    /// [`LockError::Config`](crate::LockError::Config) when the ratios sum
    /// to zero or any duration is zero.
    pub fn with_config(
        store: Arc<dyn LockStore>,
        name: impl Into<String>,
        config: LockConfig,
    ) -> LockResult<Self> {
        config.validate()?;
        let name = name.into();
        Ok(Self {
            store,
            keys: LockKeys::derive(DEFAULT_LOCK_KEY_PREFIX, &name),
            field: mint_field(),
            config,
        })
    }

    /// One atomic acquisition attempt, without queueing or renewal.
    ///
    /// ## Returns
    /// `Ok(true)` iff the lock was acquired (or re-entered). Under
    /// contention this fails fast; use [`try_lock`](Self::try_lock) for a
    /// waiting acquisition.
    pub async fn lock(&self) -> LockResult<bool> {
        let ttl = acquire::try_acquire(
            &self.store,
            &self.keys.lock,
            &self.field,
            self.config.expiry,
            false,
        )
        .await?;
        Ok(ttl == 0)
    }

    /// Waiting acquisition: attempt, subscribe, then poll.
    ///
    /// ## Returns
    /// `(acquired, trail)`. The trail is a human-readable record of the path
    /// taken (`"Acquire"`, `"subscribe-<checks>-<wakes>"`,
    /// `"cas-<iters>, subscribe-<checks>-<wakes>"`) intended for logs; its
    /// exact shape is not a stable contract. Budget exhaustion reports
    /// `(false, trail)` rather than an error.
    pub async fn try_lock(&self) -> LockResult<(bool, String)> {
        self.try_lock_inner(false).await
    }

    /// As [`try_lock`](Self::try_lock), but every successful acquisition
    /// also starts the expiration renewer.
    ///
    /// The lock no longer times out on its own while the renewer runs: the
    /// caller **must** call [`release`](Self::release), otherwise the lock
    /// is held forever and every other contender deadlocks.
    pub async fn try_lock_with_schedule(&self) -> LockResult<(bool, String)> {
        self.try_lock_inner(true).await
    }

    async fn try_lock_inner(&self, schedule_renewal: bool) -> LockResult<(bool, String)> {
        let ttl = acquire::try_acquire(
            &self.store,
            &self.keys.lock,
            &self.field,
            self.config.expiry,
            schedule_renewal,
        )
        .await?;
        if ttl == 0 {
            return Ok((true, "Acquire".to_string()));
        }

        // Each phase signals budget exhaustion as a timeout carrying its
        // trail segment; only the facade turns that into an outcome.
        let subscribe_trail = match waiter::subscribe_wait(
            &self.store,
            &self.keys,
            &self.field,
            &self.config,
            schedule_renewal,
        )
        .await
        {
            Ok(wait) => {
                return Ok((
                    true,
                    format!("subscribe-{}-{}", wait.checks, wait.channel_wakes),
                ));
            }
            Err(LockError::Timeout(trail)) => trail,
            Err(other) => return Err(other),
        };

        match cas::cas_wait(
            &self.store,
            &self.keys,
            &self.field,
            &self.config,
            schedule_renewal,
        )
        .await
        {
            Ok(cas) => Ok((
                true,
                format!("cas-{}, {}", cas.iterations, subscribe_trail),
            )),
            Err(LockError::Timeout(cas_trail)) => {
                Ok((false, format!("{cas_trail}, {subscribe_trail}")))
            }
            Err(other) => Err(other),
        }
    }

    /// Leave the critical section.
    ///
    /// ## Behavior
    /// Decrements the reentrancy depth; on reaching zero the store entry is
    /// deleted, waiters are woken, and this handle's renewer (if any) is
    /// cancelled. Releasing a lock this handle does not hold is a tolerated
    /// no-op that still wakes the queue.
    pub async fn release(&self) -> LockResult<bool> {
        let depth = self
            .store
            .release(
                &self.keys.lock,
                &self.keys.publish,
                self.config.expiry_ms(),
                &self.field,
            )
            .await?;
        if depth > 0 {
            debug!(field = %self.field, depth, "lock still re-entered");
        } else {
            renewer::cancel(&self.field);
        }
        Ok(true)
    }

    /// Change the expiration used by subsequent acquisitions and renewals.
    ///
    /// Effects are undefined while the lock is held.
    pub fn set_expiry(&mut self, expiry: Duration) {
        self.config.expiry = expiry;
    }

    /// Change the key prefix and re-derive all store-side key names.
    ///
    /// Effects are undefined while the lock is held.
    pub fn set_lock_key_prefix(&mut self, prefix: &str) {
        self.keys = LockKeys::derive(prefix, &self.keys.name);
    }

    /// This handle's holder identity, as written into the store hash.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// The derived hash key, `<prefix>:<name>`.
    pub fn lock_name(&self) -> &str {
        &self.keys.lock
    }
}
