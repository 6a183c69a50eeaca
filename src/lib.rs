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

//! # PlexSpaces Distributed Redis Lock
//!
//! ## Purpose
//! A distributed **reentrant** mutex whose state lives in Redis. Callers
//! across hosts and processes contend for named critical sections; at any
//! instant at most one holder identity owns a given name, while the same
//! handle may re-enter the lock before releasing.
//!
//! ## Architecture Context
//! All shared state is mutated through four server-side Lua scripts, so the
//! store is the single point of atomicity. Around that core:
//! - **Waiter queue + wake-up channel**: blocked callers enrol in a sorted
//!   set and sleep on a pub/sub channel that release broadcasts on.
//! - **Defensive ticker + polling compensation**: Redis pub/sub is
//!   at-most-once with no buffering, so the subscribe phase re-checks on a
//!   timer and a bounded polling phase backstops the whole wait.
//! - **Expiration renewer**: an optional background task that keeps a held
//!   lock alive across critical sections longer than its TTL.
//!
//! ## Design Decisions
//! - **Narrow store seam**: the engine consumes a small [`LockStore`] trait;
//!   [`RedisLockStore`] is the production backend and [`MemoryLockStore`]
//!   runs the identical protocol in-process for tests.
//! - **Best-effort fairness**: waiters are woken in enrolment order (lowest
//!   deadline first), but the polling phase deliberately ignores queue
//!   position, so ordering under contention is a hint, not a guarantee.
//! - **Timeouts are outcomes, not errors**: a waiting acquisition that
//!   exhausts its budget reports `(false, trail)`; only transport and
//!   configuration failures are `Err`.
//!
//! ## Examples
//! ```rust,no_run
//! use plexspaces_redis_lock::{DistributedLock, LockConfig, RedisLockStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RedisLockStore::connect("redis://127.0.0.1/").await?);
//!
//! let config = LockConfig {
//!     expiry: Duration::from_secs(10),
//!     wait: Duration::from_secs(5),
//!     ..Default::default()
//! };
//! let lock = DistributedLock::with_config(store, "reports:nightly", config)?;
//!
//! // Long critical section: let the renewer keep the lock alive, and
//! // release when done (mandatory with scheduling).
//! let (acquired, _trail) = lock.try_lock_with_schedule().await?;
//! if acquired {
//!     // ... work ...
//!     lock.release().await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod lock;
pub mod memory;
pub mod store;

mod acquire;
mod cas;
mod renewer;
mod scripts;
mod waiter;

pub use config::{LockConfig, DEFAULT_LOCK_KEY_PREFIX};
pub use error::{LockError, LockResult};
pub use lock::DistributedLock;
pub use memory::MemoryLockStore;
pub use store::{LockStore, RedisLockStore, WakeStream};
