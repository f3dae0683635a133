//! Resilience primitives for side-effecting operations.
//!
//! This module provides:
//! - Retry logic with exponential backoff and jitter
//! - Error classification for retry decisions
//! - Circuit breaker pattern for failing dependencies
//! - Panic-to-error conversion at orchestration boundaries

mod circuit_breaker;
pub mod classify;
mod panic;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use panic::catch_panic;
pub use retry::{retry, retry_with_stats, RetryPolicy, RetryPredicate, RetryStats};
