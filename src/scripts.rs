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

//! Server-side Lua scripts.
//!
//! All state on shared keys is mutated through these four scripts, each of
//! which Redis executes as an indivisible transaction. `redis::Script` runs
//! them via EVALSHA and transparently reloads the source on a cache miss.

use once_cell::sync::Lazy;
use redis::Script;

/// Acquire or re-enter a lock.
///
/// KEYS[1] = lock hash, ARGV[1] = ttl millis, ARGV[2] = holder field.
/// Returns 0 when the caller holds the lock (fresh or re-entered), else the
/// remaining TTL of the current holder in milliseconds.
pub(crate) const ACQUIRE_SCRIPT: &str = r#"if redis.call('exists', KEYS[1]) == 0 then
    redis.call('hset', KEYS[1], ARGV[2], 1)
    redis.call('pexpire', KEYS[1], ARGV[1])
    return 0
end
if redis.call('hexists', KEYS[1], ARGV[2]) == 1 then
    redis.call('hincrby', KEYS[1], ARGV[2], 1)
    redis.call('pexpire', KEYS[1], ARGV[1])
    return 0
end
return redis.call('pttl', KEYS[1])"#;

/// Push the holder's expiration further into the future.
///
/// KEYS[1] = lock hash, ARGV[1] = ttl millis, ARGV[2] = holder field.
/// Returns 1 on success, 0 when the caller no longer holds the lock.
pub(crate) const RENEW_SCRIPT: &str = r#"if redis.call('hexists', KEYS[1], ARGV[2]) == 1 then
    return redis.call('pexpire', KEYS[1], ARGV[1])
end
return 0"#;

/// Leave a critical section.
///
/// KEYS[1] = lock hash, KEYS[2] = wake-up channel, ARGV[1] = ttl millis,
/// ARGV[2] = holder field. Returns the remaining reentrancy depth; 0 means
/// fully released (or never held), and waiters were notified either way.
pub(crate) const RELEASE_SCRIPT: &str = r#"if redis.call('hexists', KEYS[1], ARGV[2]) == 0 then
    redis.call('publish', KEYS[2], 'next')
    return 0
end
local counter = redis.call('hincrby', KEYS[1], ARGV[2], -1)
if counter > 0 then
    redis.call('pexpire', KEYS[1], ARGV[1])
    return counter
end
redis.call('del', KEYS[1])
redis.call('publish', KEYS[2], 'next')
return 0"#;

/// Enrol a waiter and prune abandoned entries.
///
/// KEYS[1] = waiter zset, ARGV[1] = waiter deadline (score), ARGV[2] = field,
/// ARGV[3] = prune threshold: members whose deadline is already past go away.
pub(crate) const ENQUEUE_SCRIPT: &str = r#"redis.call('zadd', KEYS[1], ARGV[1], ARGV[2])
redis.call('zremrangebyscore', KEYS[1], 0, ARGV[3])
return 0"#;

/// The four scripts, compiled once per process.
pub(crate) struct LockScripts {
    pub acquire: Script,
    pub renew: Script,
    pub release: Script,
    pub enqueue: Script,
}

pub(crate) static SCRIPTS: Lazy<LockScripts> = Lazy::new(|| LockScripts {
    acquire: Script::new(ACQUIRE_SCRIPT),
    renew: Script::new(RENEW_SCRIPT),
    release: Script::new(RELEASE_SCRIPT),
    enqueue: Script::new(ENQUEUE_SCRIPT),
});
