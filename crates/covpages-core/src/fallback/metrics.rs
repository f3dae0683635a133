//! Fallback usage metrics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Usage of a single strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StrategyMetrics {
    /// Times the strategy was tried (once per failed primary, not per sub-attempt).
    pub usage_count: u64,
    pub success_count: u64,
    /// Running success rate in `[0, 1]`.
    pub success_rate: f64,
    pub last_used: Option<DateTime<Utc>>,
}

impl StrategyMetrics {
    /// Fold one outcome into the running rate.
    fn record(&mut self, success: bool) {
        self.usage_count += 1;
        if success {
            self.success_count += 1;
        }
        let n = self.usage_count as f64;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate += (outcome - self.success_rate) / n;
        self.last_used = Some(Utc::now());
    }
}

/// Aggregate fallback metrics. Cloning produces an independent snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FallbackMetrics {
    pub total_fallbacks: u64,
    pub successful_fallbacks: u64,
    pub failed_fallbacks: u64,
    pub strategies: HashMap<String, StrategyMetrics>,
    /// Most recent recovery times, oldest first.
    pub recovery_times: VecDeque<Duration>,
    pub last_fallback: Option<DateTime<Utc>>,
}

impl FallbackMetrics {
    pub(crate) fn record_attempt(&mut self) {
        self.total_fallbacks += 1;
        self.last_fallback = Some(Utc::now());
    }

    pub(crate) fn record_strategy(&mut self, name: &str, success: bool) {
        self.strategies
            .entry(name.to_string())
            .or_default()
            .record(success);
    }

    pub(crate) fn record_success(&mut self, recovery: Duration, max_samples: usize) {
        self.successful_fallbacks += 1;
        if max_samples == 0 {
            return;
        }
        while self.recovery_times.len() >= max_samples {
            self.recovery_times.pop_front();
        }
        self.recovery_times.push_back(recovery);
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed_fallbacks += 1;
    }

    /// Mean of the stored recovery samples.
    pub fn average_recovery_time(&self) -> Option<Duration> {
        if self.recovery_times.is_empty() {
            return None;
        }
        let total: Duration = self.recovery_times.iter().sum();
        Some(total / self.recovery_times.len() as u32)
    }

    /// Share of fallback attempts that recovered.
    pub fn success_rate(&self) -> f64 {
        if self.total_fallbacks == 0 {
            0.0
        } else {
            self.successful_fallbacks as f64 / self.total_fallbacks as f64
        }
    }
}
