// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::constants::{DEFAULT_BACKOFF_BASE_MS, DEFAULT_MAX_ATTEMPTS};

/// How many times to try a delivery and how long to wait in between.
///
/// The first field of every variant is the total number of attempts,
/// first try included. Configuration rejects zero; `max_attempts` still
/// never reports less than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    Immediate(u32),
    /// attempts, delay in ms
    LinearBackoff(u32, u64),
    /// attempts, base delay in ms; doubles after every failed attempt
    ExponentialBackoff(u32, u64),
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::ExponentialBackoff(DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF_BASE_MS)
    }
}

impl RetryStrategy {
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.attempts().max(1)
    }

    /// Attempt count as configured, zero included.
    pub(crate) fn attempts(&self) -> u32 {
        match self {
            RetryStrategy::Immediate(n)
            | RetryStrategy::LinearBackoff(n, _)
            | RetryStrategy::ExponentialBackoff(n, _) => *n,
        }
    }

    /// Delay to wait after `attempt` (1-based) failed, before the next one.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, delay_ms) => Duration::from_millis(*delay_ms),
            RetryStrategy::ExponentialBackoff(_, base_ms) => {
                let exponent = attempt.saturating_sub(1).min(16);
                Duration::from_millis(base_ms.saturating_mul(2_u64.pow(exponent)))
            }
        }
    }
}
