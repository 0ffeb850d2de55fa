// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Exponential backoff for failed reconciliations.
//!
//! The controllers' error policy asks [`BackoffTracker`] how long to wait before
//! retrying a resource. Each consecutive failure for the same key doubles the
//! delay (with jitter) up to a ceiling; a successful reconcile resets the key.

use crate::constants::{
    ERROR_BACKOFF_INITIAL_SECS, ERROR_BACKOFF_JITTER, ERROR_BACKOFF_MAX_SECS,
    ERROR_BACKOFF_MULTIPLIER,
};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) to prevent thundering herd.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    /// Initial interval duration
    pub initial_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
}

impl ExponentialBackoff {
    /// Un-jittered interval for the given attempt (1-based).
    #[must_use]
    pub fn base_interval(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let secs = self.initial_interval.as_secs_f64()
            * self.multiplier.powi(i32::try_from(exponent).unwrap_or(i32::MAX));
        let capped = secs.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Jittered interval for the given attempt (1-based).
    #[must_use]
    pub fn interval_for(&self, attempt: u32) -> Duration {
        self.apply_jitter(self.base_interval(attempt))
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = secs - delta;
        let max = secs + delta;

        let mut rng = rand::thread_rng();
        let jittered = rng.gen_range(min..=max);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Create the backoff configuration used for reconcile errors.
///
/// # Configuration
///
/// - **Initial interval**: 1 second
/// - **Max interval**: 5 minutes
/// - **Multiplier**: 2.0 (exponential growth)
/// - **Randomization**: ±10% (prevents thundering herd)
///
/// # Retry Schedule
///
/// 1s, 2s, 4s, 8s, ... 256s, then 300s for every further consecutive failure.
#[must_use]
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_secs(ERROR_BACKOFF_INITIAL_SECS),
        max_interval: Duration::from_secs(ERROR_BACKOFF_MAX_SECS),
        multiplier: ERROR_BACKOFF_MULTIPLIER,
        randomization_factor: ERROR_BACKOFF_JITTER,
    }
}

/// Consecutive-failure counter per reconcile key.
///
/// Keys are `"<kind>/<namespace>/<name>"`.
#[derive(Debug)]
pub struct BackoffTracker {
    backoff: ExponentialBackoff,
    failures: Mutex<HashMap<String, u32>>,
}

impl Default for BackoffTracker {
    fn default() -> Self {
        Self::new(default_backoff())
    }
}

impl BackoffTracker {
    #[must_use]
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            backoff,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Build the tracking key for a resource.
    #[must_use]
    pub fn key(kind: &str, namespace: &str, name: &str) -> String {
        format!("{kind}/{namespace}/{name}")
    }

    /// Record a failure for `key` and return how long to wait before retrying.
    pub fn next_delay(&self, key: &str) -> Duration {
        let attempt = {
            let mut failures = self
                .failures
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let count = failures.entry(key.to_string()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        let delay = self.backoff.interval_for(attempt);
        debug!(key = %key, attempt = attempt, delay = ?delay, "Computed error backoff");
        delay
    }

    /// Forget all failures recorded for `key`.
    pub fn reset(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
    }

    /// Number of consecutive failures currently recorded for `key`.
    #[must_use]
    pub fn failures(&self, key: &str) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
