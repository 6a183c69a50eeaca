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

//! In-memory store implementation (for testing and single-process use).
//!
//! ## Purpose
//! Implements the full [`LockStore`] contract (reentrancy counting, lazy
//! expiration, waiter queue with score-based pruning, wake-up broadcast)
//! without a Redis server. The test suite runs the whole coordination
//! engine against it, including wake-up-loss scenarios via
//! [`set_drop_publishes`](MemoryLockStore::set_drop_publishes).
//!
//! ## Limitations
//! - Not distributed (single process only)
//! - No background TTL cleanup (expired entries are dropped on access)

use crate::error::LockResult;
use crate::store::{LockStore, WakeStream};
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};

/// One lock hash: single holder field with its reentrancy depth.
struct HashEntry {
    field: String,
    depth: i64,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    hashes: HashMap<String, HashEntry>,
    queues: HashMap<String, HashMap<String, i64>>,
    channels: HashMap<String, broadcast::Sender<()>>,
}

/// In-process [`LockStore`] with the same observable semantics as the
/// server-side scripts.
pub struct MemoryLockStore {
    inner: Mutex<Inner>,
    drop_publishes: AtomicBool,
}

impl MemoryLockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            drop_publishes: AtomicBool::new(false),
        }
    }

    /// When enabled, release no longer broadcasts wake-ups. Simulates the
    /// at-most-once nature of the publish channel for tests that exercise
    /// the ticker and polling compensation paths.
    pub fn set_drop_publishes(&self, drop: bool) {
        self.drop_publishes.store(drop, Ordering::Relaxed);
    }

    /// Reentrancy depth of `field` on `lock_name`, if it currently holds it.
    pub async fn holder_depth(&self, lock_name: &str, field: &str) -> Option<i64> {
        let inner = self.inner.lock().await;
        let entry = inner.hashes.get(lock_name)?;
        if entry.field == field && entry.expires_at > Instant::now() {
            Some(entry.depth)
        } else {
            None
        }
    }

    /// Remaining TTL of the lock hash, if it exists and has not lapsed.
    pub async fn remaining_ttl(&self, lock_name: &str) -> Option<Duration> {
        let inner = self.inner.lock().await;
        let entry = inner.hashes.get(lock_name)?;
        entry.expires_at.checked_duration_since(Instant::now())
    }

    /// Number of waiters currently enrolled in the queue.
    pub async fn waiter_count(&self, zset_name: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.queues.get(zset_name).map(HashMap::len).unwrap_or(0)
    }

    /// Drop a hash entry whose expiration has lapsed.
    fn evict_expired(inner: &mut Inner, lock_name: &str, now: Instant) {
        let lapsed = inner
            .hashes
            .get(lock_name)
            .map_or(false, |entry| entry.expires_at <= now);
        if lapsed {
            inner.hashes.remove(lock_name);
        }
    }

    fn wake_waiters(&self, inner: &Inner, publish_name: &str) {
        if self.drop_publishes.load(Ordering::Relaxed) {
            return;
        }
        if let Some(tx) = inner.channels.get(publish_name) {
            // No receivers is fine: the publish is simply lost.
            let _ = tx.send(());
        }
    }
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire(&self, lock_name: &str, ttl_ms: i64, field: &str) -> LockResult<i64> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        Self::evict_expired(&mut inner, lock_name, now);

        let ttl = Duration::from_millis(ttl_ms.max(0) as u64);
        match inner.hashes.entry(lock_name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(HashEntry {
                    field: field.to_string(),
                    depth: 1,
                    expires_at: now + ttl,
                });
                Ok(0)
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if entry.field == field {
                    entry.depth += 1;
                    entry.expires_at = now + ttl;
                    Ok(0)
                } else {
                    let remaining =
                        entry.expires_at.saturating_duration_since(now).as_millis() as i64;
                    Ok(remaining.max(1))
                }
            }
        }
    }

    async fn renew(&self, lock_name: &str, ttl_ms: i64, field: &str) -> LockResult<bool> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        Self::evict_expired(&mut inner, lock_name, now);

        match inner.hashes.get_mut(lock_name) {
            Some(entry) if entry.field == field => {
                entry.expires_at = now + Duration::from_millis(ttl_ms.max(0) as u64);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(
        &self,
        lock_name: &str,
        publish_name: &str,
        ttl_ms: i64,
        field: &str,
    ) -> LockResult<i64> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        Self::evict_expired(&mut inner, lock_name, now);

        let depth_after = match inner.hashes.get_mut(lock_name) {
            Some(entry) if entry.field == field => {
                entry.depth -= 1;
                if entry.depth > 0 {
                    entry.expires_at = now + Duration::from_millis(ttl_ms.max(0) as u64);
                }
                Some(entry.depth)
            }
            _ => None,
        };

        match depth_after {
            Some(depth) if depth > 0 => Ok(depth),
            Some(_) => {
                inner.hashes.remove(lock_name);
                self.wake_waiters(&inner, publish_name);
                Ok(0)
            }
            // Ghost release: nothing held, but waiters are still notified.
            None => {
                self.wake_waiters(&inner, publish_name);
                Ok(0)
            }
        }
    }

    async fn enqueue_waiter(
        &self,
        zset_name: &str,
        expire_score: i64,
        field: &str,
        prune_below: i64,
    ) -> LockResult<()> {
        let mut inner = self.inner.lock().await;
        let queue = inner.queues.entry(zset_name.to_string()).or_default();
        queue.insert(field.to_string(), expire_score);
        queue.retain(|_, score| *score > prune_below);
        Ok(())
    }

    async fn remove_waiter(&self, zset_name: &str, field: &str) -> LockResult<()> {
        let mut inner = self.inner.lock().await;
        let now_empty = match inner.queues.get_mut(zset_name) {
            Some(queue) => {
                queue.remove(field);
                queue.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.queues.remove(zset_name);
        }
        Ok(())
    }

    async fn queue_head(&self, zset_name: &str) -> LockResult<Option<String>> {
        let inner = self.inner.lock().await;
        let head = inner.queues.get(zset_name).and_then(|queue| {
            queue
                .iter()
                .min_by(|(ma, sa), (mb, sb)| sa.cmp(sb).then(ma.cmp(mb)))
                .map(|(member, _)| member.clone())
        });
        Ok(head)
    }

    async fn subscribe(&self, publish_name: &str) -> LockResult<WakeStream> {
        let mut inner = self.inner.lock().await;
        let tx = inner
            .channels
            .entry(publish_name.to_string())
            .or_insert_with(|| broadcast::channel(16).0);
        let rx = tx.subscribe();
        drop(inner);

        let stream = async_stream::stream! {
            let mut rx = rx;
            loop {
                match rx.recv().await {
                    Ok(()) => yield (),
                    // A lagged receiver missed wake-ups; one wake now is enough.
                    Err(broadcast::error::RecvError::Lagged(_)) => yield (),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    const TTL: i64 = 30_000;

    #[tokio::test]
    async fn test_fresh_acquire_and_reenter() {
        let store = MemoryLockStore::new();
        assert_eq!(store.acquire("L", TTL, "a").await.unwrap(), 0);
        assert_eq!(store.acquire("L", TTL, "a").await.unwrap(), 0);
        assert_eq!(store.holder_depth("L", "a").await, Some(2));
    }

    #[tokio::test]
    async fn test_contender_sees_remaining_ttl() {
        let store = MemoryLockStore::new();
        assert_eq!(store.acquire("L", TTL, "a").await.unwrap(), 0);
        let ttl = store.acquire("L", TTL, "b").await.unwrap();
        assert!(ttl > 0 && ttl <= TTL);
        assert_eq!(store.holder_depth("L", "b").await, None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_reacquirable() {
        let store = MemoryLockStore::new();
        assert_eq!(store.acquire("L", 20, "a").await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.acquire("L", TTL, "b").await.unwrap(), 0);
        assert_eq!(store.holder_depth("L", "b").await, Some(1));
    }

    #[tokio::test]
    async fn test_renew_only_for_holder() {
        let store = MemoryLockStore::new();
        assert_eq!(store.acquire("L", TTL, "a").await.unwrap(), 0);
        assert!(store.renew("L", TTL, "a").await.unwrap());
        assert!(!store.renew("L", TTL, "b").await.unwrap());
        assert!(!store.renew("missing", TTL, "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_counts_down_and_deletes() {
        let store = MemoryLockStore::new();
        store.acquire("L", TTL, "a").await.unwrap();
        store.acquire("L", TTL, "a").await.unwrap();

        assert_eq!(store.release("L", "L-pub", TTL, "a").await.unwrap(), 1);
        assert_eq!(store.holder_depth("L", "a").await, Some(1));

        assert_eq!(store.release("L", "L-pub", TTL, "a").await.unwrap(), 0);
        assert_eq!(store.holder_depth("L", "a").await, None);
        assert!(store.remaining_ttl("L").await.is_none());
    }

    #[tokio::test]
    async fn test_ghost_release_publishes_wake() {
        let store = MemoryLockStore::new();
        let mut wake = store.subscribe("L-pub").await.unwrap();

        assert_eq!(store.release("L", "L-pub", TTL, "nobody").await.unwrap(), 0);

        let woken = tokio::time::timeout(Duration::from_millis(200), wake.next()).await;
        assert!(matches!(woken, Ok(Some(()))));
    }

    #[tokio::test]
    async fn test_dropped_publishes_are_silent() {
        let store = MemoryLockStore::new();
        store.set_drop_publishes(true);
        let mut wake = store.subscribe("L-pub").await.unwrap();

        store.release("L", "L-pub", TTL, "nobody").await.unwrap();

        let woken = tokio::time::timeout(Duration::from_millis(100), wake.next()).await;
        assert!(woken.is_err());
    }

    #[tokio::test]
    async fn test_enqueue_prunes_stale_waiters() {
        let store = MemoryLockStore::new();
        store.enqueue_waiter("Q", 100, "stale", 0).await.unwrap();
        store.enqueue_waiter("Q", 900, "live", 100).await.unwrap();

        assert_eq!(store.waiter_count("Q").await, 1);
        assert_eq!(store.queue_head("Q").await.unwrap().as_deref(), Some("live"));
    }

    #[tokio::test]
    async fn test_queue_head_is_lowest_score() {
        let store = MemoryLockStore::new();
        store.enqueue_waiter("Q", 300, "late", 0).await.unwrap();
        store.enqueue_waiter("Q", 100, "early", 0).await.unwrap();
        store.enqueue_waiter("Q", 200, "middle", 0).await.unwrap();

        assert_eq!(store.queue_head("Q").await.unwrap().as_deref(), Some("early"));

        store.remove_waiter("Q", "early").await.unwrap();
        assert_eq!(store.queue_head("Q").await.unwrap().as_deref(), Some("middle"));
    }
}
