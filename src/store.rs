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

//! Store seam: the command surface the coordination engine consumes.
//!
//! ## Purpose
//! Everything the lock engine needs from the backing store fits in one small
//! trait: run the four atomic scripts, subscribe to a wake-up channel, read
//! the head of the waiter queue, and remove a queue member. Keeping the seam
//! this narrow lets the engine run unchanged against Redis in production and
//! against [`MemoryLockStore`](crate::memory::MemoryLockStore) in tests.

use crate::error::{LockError, LockResult};
use crate::scripts::SCRIPTS;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

/// Async stream of wake-up signals from a lock's publish channel.
///
/// One item per received publish; payloads are not meaningful. Dropping the
/// stream tears the subscription down.
pub type WakeStream = BoxStream<'static, ()>;

/// Store operations consumed by the lock coordination engine.
///
/// ## Behavior
/// The first four methods mirror the atomic server-side scripts; the store
/// must execute each one as an indivisible transaction. The remaining three
/// expose the waiter queue and the wake-up channel.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Acquire or re-enter the lock.
    ///
    /// ## Returns
    /// - `Ok(0)`: held (fresh or re-entered), expiration refreshed to `ttl_ms`
    /// - `Ok(n)` with `n > 0`: held by another; retry no sooner than `n` ms
    async fn acquire(&self, lock_name: &str, ttl_ms: i64, field: &str) -> LockResult<i64>;

    /// Refresh the holder's expiration.
    ///
    /// ## Returns
    /// - `Ok(true)`: expiration pushed to `ttl_ms` from now
    /// - `Ok(false)`: the caller no longer holds this lock
    async fn renew(&self, lock_name: &str, ttl_ms: i64, field: &str) -> LockResult<bool>;

    /// Leave a critical section, waking waiters on full release.
    ///
    /// ## Returns
    /// The remaining reentrancy depth. `Ok(0)` means fully released, or a
    /// tolerated ghost release of a lock the caller did not hold; waiters
    /// are notified in both cases.
    async fn release(
        &self,
        lock_name: &str,
        publish_name: &str,
        ttl_ms: i64,
        field: &str,
    ) -> LockResult<i64>;

    /// Enrol `field` in the waiter queue with its deadline as score, and
    /// prune members whose score is at or below `prune_below`.
    async fn enqueue_waiter(
        &self,
        zset_name: &str,
        expire_score: i64,
        field: &str,
        prune_below: i64,
    ) -> LockResult<()>;

    /// Remove `field` from the waiter queue.
    async fn remove_waiter(&self, zset_name: &str, field: &str) -> LockResult<()>;

    /// The waiter that is next in line: the lowest-scored member.
    async fn queue_head(&self, zset_name: &str) -> LockResult<Option<String>>;

    /// Subscribe to the wake-up channel.
    async fn subscribe(&self, publish_name: &str) -> LockResult<WakeStream>;
}

/// Redis-backed [`LockStore`].
///
/// ## Design
/// Commands and scripts run over a shared [`ConnectionManager`] (reconnects
/// transparently, cheap to clone). Subscriptions cannot be multiplexed onto
/// it, so each waiter opens a dedicated pub/sub connection that lives as
/// long as its [`WakeStream`].
#[derive(Clone)]
pub struct RedisLockStore {
    client: Client,
    conn: ConnectionManager,
}

impl RedisLockStore {
    /// Connect to Redis with the given URL.
    ///
    /// Example URLs:
    /// - `redis://127.0.0.1/`
    /// - `redis+tls://host:6379/`
    pub async fn connect(redis_url: &str) -> LockResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| LockError::Transport(format!("failed to create redis client: {e}")))?;
        Self::new(client).await
    }

    /// Wrap an existing Redis client.
    pub async fn new(client: Client) -> LockResult<Self> {
        let conn = client
            .get_tokio_connection_manager()
            .await
            .map_err(|e| LockError::Transport(format!("failed to connect redis: {e}")))?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn acquire(&self, lock_name: &str, ttl_ms: i64, field: &str) -> LockResult<i64> {
        let mut conn = self.conn.clone();
        let ttl: i64 = SCRIPTS
            .acquire
            .key(lock_name)
            .arg(ttl_ms)
            .arg(field)
            .invoke_async(&mut conn)
            .await?;
        Ok(ttl)
    }

    async fn renew(&self, lock_name: &str, ttl_ms: i64, field: &str) -> LockResult<bool> {
        let mut conn = self.conn.clone();
        let renewed: i64 = SCRIPTS
            .renew
            .key(lock_name)
            .arg(ttl_ms)
            .arg(field)
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn release(
        &self,
        lock_name: &str,
        publish_name: &str,
        ttl_ms: i64,
        field: &str,
    ) -> LockResult<i64> {
        let mut conn = self.conn.clone();
        let depth: i64 = SCRIPTS
            .release
            .key(lock_name)
            .key(publish_name)
            .arg(ttl_ms)
            .arg(field)
            .invoke_async(&mut conn)
            .await?;
        Ok(depth)
    }

    async fn enqueue_waiter(
        &self,
        zset_name: &str,
        expire_score: i64,
        field: &str,
        prune_below: i64,
    ) -> LockResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = SCRIPTS
            .enqueue
            .key(zset_name)
            .arg(expire_score)
            .arg(field)
            .arg(prune_below)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove_waiter(&self, zset_name: &str, field: &str) -> LockResult<()> {
        let mut conn = self.conn.clone();
        let _removed: i64 = conn.zrem(zset_name, field).await?;
        Ok(())
    }

    async fn queue_head(&self, zset_name: &str) -> LockResult<Option<String>> {
        let mut conn = self.conn.clone();
        let head: Vec<String> = conn.zrange(zset_name, 0, 0).await?;
        Ok(head.into_iter().next())
    }

    async fn subscribe(&self, publish_name: &str) -> LockResult<WakeStream> {
        let conn = self.client.get_async_connection().await.map_err(|e| {
            LockError::Transport(format!("failed to open subscriber connection: {e}"))
        })?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(publish_name)
            .await
            .map_err(|e| LockError::Transport(format!("failed to subscribe: {e}")))?;

        let stream = async_stream::stream! {
            let mut pubsub = pubsub;
            let mut messages = pubsub.on_message();
            while let Some(_msg) = messages.next().await {
                yield ();
            }
        };
        Ok(Box::pin(stream))
    }
}
