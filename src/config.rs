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

//! Lock handle configuration: expiration, wait budget, and retry cadences.

use crate::error::{LockError, LockResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default prefix prepended to every store-side key.
pub const DEFAULT_LOCK_KEY_PREFIX: &str = "GoDistRL";

/// Postfix of the sorted set that holds enrolled waiters.
pub(crate) const ZSET_POSTFIX: &str = "-zset";

/// Postfix of the channel that release broadcasts wake-ups on.
pub(crate) const PUBLISH_POSTFIX: &str = "-pub";

/// Tuning knobs for a [`DistributedLock`](crate::DistributedLock) handle.
///
/// ## Purpose
/// Partitions a blocking acquisition into two phases: a subscribe phase that
/// waits on the wake-up channel (with a defensive re-check ticker), and a
/// polling ("cas") phase that compensates for missed wake-ups. The ratios
/// split the total `wait` budget between the two phases.
///
/// ## Invariants
/// - `subscribe_ratio + cas_ratio > 0`
/// - all durations are positive
///
/// Ratios are expected to be small integers (the default split is 4:1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// TTL stamped on the lock hash on every acquire and renew.
    pub expiry: Duration,
    /// Total wall-time budget a blocking acquisition may consume.
    pub wait: Duration,
    /// Ceiling between defensive head re-checks in the subscribe phase.
    pub subscribe_sleep: Duration,
    /// Cadence of the polling phase.
    pub cas_sleep: Duration,
    /// Share of `wait` spent in the subscribe phase.
    pub subscribe_ratio: u32,
    /// Share of `wait` spent in the polling phase.
    pub cas_ratio: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            expiry: Duration::from_secs(30),
            wait: Duration::from_secs(30),
            subscribe_sleep: Duration::from_millis(500),
            cas_sleep: Duration::from_millis(100),
            subscribe_ratio: 4,
            cas_ratio: 1,
        }
    }
}

impl LockConfig {
    /// Reject configurations that cannot drive the wait machinery.
    pub(crate) fn validate(&self) -> LockResult<()> {
        if self.total_ratio() == 0 {
            return Err(LockError::Config(
                "subscribe_ratio + cas_ratio must be positive".to_string(),
            ));
        }
        if self.expiry.is_zero() || self.wait.is_zero() {
            return Err(LockError::Config(
                "expiry and wait must be positive durations".to_string(),
            ));
        }
        if self.subscribe_sleep.is_zero() || self.cas_sleep.is_zero() {
            return Err(LockError::Config(
                "subscribe_sleep and cas_sleep must be positive durations".to_string(),
            ));
        }
        Ok(())
    }

    fn total_ratio(&self) -> u32 {
        self.subscribe_ratio + self.cas_ratio
    }

    /// Wall-time share of `wait` granted to the subscribe phase.
    pub(crate) fn subscribe_budget(&self) -> Duration {
        self.wait * self.subscribe_ratio / self.total_ratio()
    }

    /// Wall-time share of `wait` granted to the polling phase.
    pub(crate) fn cas_budget(&self) -> Duration {
        self.wait * self.cas_ratio / self.total_ratio()
    }

    /// Expiration in milliseconds, as the scripts expect it.
    pub(crate) fn expiry_ms(&self) -> i64 {
        self.expiry.as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LockConfig::default();
        assert_eq!(config.expiry, Duration::from_secs(30));
        assert_eq!(config.wait, Duration::from_secs(30));
        assert_eq!(config.subscribe_sleep, Duration::from_millis(500));
        assert_eq!(config.cas_sleep, Duration::from_millis(100));
        assert_eq!(config.subscribe_ratio, 4);
        assert_eq!(config.cas_ratio, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_budget_split() {
        let config = LockConfig {
            wait: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(config.subscribe_budget(), Duration::from_secs(4));
        assert_eq!(config.cas_budget(), Duration::from_secs(1));
    }

    #[test]
    fn test_budgets_cover_wait() {
        let config = LockConfig {
            wait: Duration::from_millis(900),
            subscribe_ratio: 2,
            cas_ratio: 1,
            ..Default::default()
        };
        assert_eq!(
            config.subscribe_budget() + config.cas_budget(),
            Duration::from_millis(900)
        );
    }

    #[test]
    fn test_rejects_zero_ratios() {
        let config = LockConfig {
            subscribe_ratio: 0,
            cas_ratio: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LockError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_durations() {
        let config = LockConfig {
            expiry: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LockError::Config(_))));

        let config = LockConfig {
            cas_sleep: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LockError::Config(_))));
    }

    #[test]
    fn test_single_phase_split() {
        // A pure-polling configuration is legal: the subscribe phase just
        // gets a zero budget and the waiter returns immediately.
        let config = LockConfig {
            wait: Duration::from_secs(10),
            subscribe_ratio: 0,
            cas_ratio: 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.subscribe_budget(), Duration::ZERO);
        assert_eq!(config.cas_budget(), Duration::from_secs(10));
    }

    #[test]
    fn test_serde_round_trip() {
        let config = LockConfig {
            wait: Duration::from_secs(5),
            subscribe_ratio: 3,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: LockConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.wait, config.wait);
        assert_eq!(parsed.subscribe_ratio, 3);
    }
}
