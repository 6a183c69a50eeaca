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

//! Error types for distributed lock operations.

use thiserror::Error;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors that can occur during lock operations.
///
/// Budget exhaustion while waiting for a contended lock is *not* an error
/// at the facade: the subscribe and polling phases raise `Timeout` with
/// their trail segment, and `try_lock` folds it into `(false, diagnostic)`.
#[derive(Error, Debug)]
pub enum LockError {
    /// Store I/O failed or a reply decoded badly
    #[error("Transport error: {0}")]
    Transport(String),

    /// A phase's wait budget elapsed before the lock was acquired; carries
    /// that phase's diagnostic trail segment
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Rejected configuration (zero ratios or zero durations)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LockError {
    /// Prefix transport errors with the phase they occurred in.
    pub(crate) fn with_phase(self, phase: &str) -> LockError {
        match self {
            LockError::Transport(msg) => LockError::Transport(format!("{phase}: {msg}")),
            other => other,
        }
    }
}

impl From<redis::RedisError> for LockError {
    fn from(err: redis::RedisError) -> Self {
        LockError::Transport(format!("Redis error: {}", err))
    }
}
