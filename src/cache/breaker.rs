//! Fail-open circuit breaker over the dispatch path.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{info, warn};

use crate::domain::RequestResult;

/// Snapshot of the breaker's only piece of state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CircuitBreakerState {
    pub consecutive_errors: u32,
}

/// Counts consecutive error results. Once the count exceeds the threshold the
/// engine stops intercepting until a non-error result resets it.
#[derive(Debug)]
pub struct HealthCircuitBreaker {
    threshold: u32,
    consecutive_errors: AtomicU32,
}

impl HealthCircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive_errors: AtomicU32::new(0),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_open(&self) -> bool {
        self.consecutive_errors.load(Ordering::Acquire) > self.threshold
    }

    pub fn state(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            consecutive_errors: self.consecutive_errors.load(Ordering::Acquire),
        }
    }

    /// Feeds one terminal result into the breaker and returns the new state.
    pub fn record(&self, result: &RequestResult) -> CircuitBreakerState {
        if result.is_error() {
            self.record_error()
        } else {
            self.record_success()
        }
    }

    fn record_error(&self) -> CircuitBreakerState {
        let previous = self
            .consecutive_errors
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_add(1))
            })
            .unwrap_or_else(|n| n);
        let current = previous.saturating_add(1);
        if previous <= self.threshold && current > self.threshold {
            warn!(
                consecutive_errors = current,
                threshold = self.threshold,
                "circuit breaker opened; bypassing cache strategies"
            );
        }
        CircuitBreakerState {
            consecutive_errors: current,
        }
    }

    fn record_success(&self) -> CircuitBreakerState {
        let previous = self.consecutive_errors.swap(0, Ordering::AcqRel);
        if previous > self.threshold {
            info!(
                after_errors = previous,
                "circuit breaker closed; interception resumed"
            );
        }
        CircuitBreakerState::default()
    }
}
