//! FallbackManager - primary execution with priority-ordered degraded paths.

use crate::cancel::CancellationToken;
use crate::config::FallbackConfig;
use crate::error::{CovpagesError, Result};
use crate::fallback::metrics::FallbackMetrics;
use crate::fallback::{DynFallbackStrategy, Operation};
use crate::resilience::{catch_panic, classify};
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs operations and escalates failures to registered strategies.
///
/// Strategies are kept sorted by ascending priority; strategies with equal
/// priority keep their registration order. Safe to share across tasks.
pub struct FallbackManager {
    config: FallbackConfig,
    strategies: RwLock<Vec<DynFallbackStrategy>>,
    metrics: Mutex<FallbackMetrics>,
}

impl Default for FallbackManager {
    fn default() -> Self {
        Self::new(FallbackConfig::default())
    }
}

impl FallbackManager {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            config,
            strategies: RwLock::new(Vec::new()),
            metrics: Mutex::new(FallbackMetrics::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Register a strategy at its priority position.
    ///
    /// Fails if a strategy with the same name is already registered.
    pub fn register_strategy(&self, strategy: DynFallbackStrategy) -> Result<()> {
        let mut strategies = self
            .strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if strategies.iter().any(|s| s.name() == strategy.name()) {
            return Err(CovpagesError::Config {
                message: format!("fallback strategy '{}' already registered", strategy.name()),
            });
        }

        let priority = strategy.priority();
        let index = strategies.partition_point(|s| s.priority() <= priority);
        info!(
            strategy = strategy.name(),
            priority,
            position = index,
            "Registered fallback strategy"
        );
        strategies.insert(index, strategy);
        Ok(())
    }

    /// Names of registered strategies in execution order.
    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Snapshot of the current metrics.
    pub fn metrics(&self) -> FallbackMetrics {
        self.lock_metrics().clone()
    }

    /// Clear all metrics.
    pub fn reset_metrics(&self) {
        *self.lock_metrics() = FallbackMetrics::default();
    }

    fn lock_metrics(&self) -> MutexGuard<'_, FallbackMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `operation`, falling back to applicable strategies on failure.
    ///
    /// Panics inside the operation or a strategy are returned as
    /// [`CovpagesError::PanicRecovered`].
    pub async fn execute_with_fallback(
        &self,
        cancel: &CancellationToken,
        operation: &dyn Operation,
    ) -> Result<()> {
        if !self.config.enabled {
            return catch_panic(operation.execute(cancel)).await;
        }

        let op_type = operation.operation_type();
        let primary_err = match catch_panic(operation.execute(cancel)).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let started = Instant::now();
        warn!(operation = %op_type, error = %primary_err, "Primary operation failed, trying fallbacks");
        self.lock_metrics().record_attempt();

        let applicable: Vec<DynFallbackStrategy> = self
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.is_enabled() && handles(s, &primary_err))
            .cloned()
            .collect();

        if applicable.is_empty() {
            self.lock_metrics().record_failure();
            return Err(CovpagesError::NoFallbackAvailable {
                operation_type: op_type.to_string(),
                source: Box::new(primary_err),
            });
        }

        let mut last_err = None;
        for strategy in applicable {
            debug!(operation = %op_type, strategy = strategy.name(), "Trying fallback strategy");
            match self
                .run_strategy(cancel, &strategy, operation, &primary_err)
                .await
            {
                Ok(()) => {
                    let recovery = started.elapsed();
                    {
                        let mut metrics = self.lock_metrics();
                        metrics.record_strategy(strategy.name(), true);
                        metrics.record_success(recovery, self.config.max_recovery_samples);
                    }
                    info!(
                        operation = %op_type,
                        strategy = strategy.name(),
                        recovery_ms = recovery.as_millis() as u64,
                        "Fallback succeeded"
                    );
                    return Ok(());
                }
                Err(CovpagesError::Cancelled) => {
                    self.lock_metrics().record_failure();
                    return Err(CovpagesError::Cancelled);
                }
                Err(e) => {
                    self.lock_metrics().record_strategy(strategy.name(), false);
                    warn!(
                        operation = %op_type,
                        strategy = strategy.name(),
                        error = %e,
                        "Fallback strategy failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        self.lock_metrics().record_failure();
        Err(CovpagesError::AllFallbacksFailed {
            operation_type: op_type.to_string(),
            source: Box::new(last_err.unwrap_or(primary_err)),
        })
    }

    /// Linear-backoff sub-retry of one strategy. Only transient errors are
    /// re-attempted.
    async fn run_strategy(
        &self,
        cancel: &CancellationToken,
        strategy: &DynFallbackStrategy,
        operation: &dyn Operation,
        original: &CovpagesError,
    ) -> Result<()> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            cancel.check()?;

            let err = match catch_panic(strategy.execute(cancel, operation, original)).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if attempt >= max_attempts || !classify::is_retryable_error(&err) {
                return Err(err);
            }

            let delay = self.config.retry_delay * attempt;
            debug!(
                strategy = strategy.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying fallback strategy"
            );
            cancel.sleep(delay).await?;
        }
    }
}

/// A panicking `can_handle` counts as "not applicable".
fn handles(strategy: &DynFallbackStrategy, err: &CovpagesError) -> bool {
    match std::panic::catch_unwind(AssertUnwindSafe(|| strategy.can_handle(err))) {
        Ok(handles) => handles,
        Err(_) => {
            warn!(strategy = strategy.name(), "Fallback strategy panicked in can_handle, skipping");
            false
        }
    }
}
