//! Rolling per-provider success/latency bookkeeping
//!
//! Counters are atomics behind a sharded map, so concurrent `record` calls
//! never contend on a global lock. The tracker never disables a provider;
//! the cooldown window is a soft signal the selector may honour.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::models::HealthRecord;

/// Outcome of one attempt through a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Soft exclusion after repeated failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    /// Consecutive failures that start a cooldown; 0 disables the policy
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl CooldownPolicy {
    pub fn disabled() -> Self {
        Self {
            failure_threshold: 0,
            cooldown: Duration::ZERO,
        }
    }
}

const NEVER: i64 = i64::MIN;

#[derive(Debug)]
struct HealthCounters {
    success: AtomicU64,
    failure: AtomicU64,
    consecutive_failures: AtomicU32,
    last_latency_ms: AtomicU64,
    last_checked_at_ms: AtomicI64,
    cooldown_until_ms: AtomicI64,
}

impl HealthCounters {
    fn new() -> Self {
        Self {
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            last_latency_ms: AtomicU64::new(u64::MAX),
            last_checked_at_ms: AtomicI64::new(NEVER),
            cooldown_until_ms: AtomicI64::new(NEVER),
        }
    }

    fn snapshot(&self) -> HealthRecord {
        let latency = self.last_latency_ms.load(Ordering::Relaxed);
        let checked = self.last_checked_at_ms.load(Ordering::Relaxed);
        HealthRecord {
            success_count: self.success.load(Ordering::Relaxed),
            failure_count: self.failure.load(Ordering::Relaxed),
            last_latency_ms: (latency != u64::MAX).then_some(latency),
            last_checked_at: (checked != NEVER)
                .then(|| Utc.timestamp_millis_opt(checked).single())
                .flatten(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }
}

/// Per-provider health statistics
#[derive(Debug, Default)]
pub struct HealthTracker {
    records: DashMap<String, Arc<HealthCounters>>,
    policy: CooldownPolicy,
}

impl HealthTracker {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            records: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> CooldownPolicy {
        self.policy
    }

    fn counters(&self, provider: &str) -> Arc<HealthCounters> {
        if let Some(existing) = self.records.get(provider) {
            return existing.clone();
        }
        self.records
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(HealthCounters::new()))
            .clone()
    }

    pub fn record(&self, provider: &str, outcome: Outcome, latency_ms: u64) {
        self.record_at(provider, outcome, latency_ms, Utc::now());
    }

    pub fn record_at(&self, provider: &str, outcome: Outcome, latency_ms: u64, now: DateTime<Utc>) {
        let counters = self.counters(provider);
        let now_ms = now.timestamp_millis();

        counters.last_latency_ms.store(latency_ms, Ordering::Relaxed);
        counters.last_checked_at_ms.store(now_ms, Ordering::Relaxed);

        match outcome {
            Outcome::Success => {
                counters.success.fetch_add(1, Ordering::Relaxed);
                counters.consecutive_failures.store(0, Ordering::Relaxed);
                counters.cooldown_until_ms.store(NEVER, Ordering::Relaxed);
            }
            Outcome::Failure => {
                counters.failure.fetch_add(1, Ordering::Relaxed);
                let streak = counters.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

                if self.policy.failure_threshold > 0 && streak >= self.policy.failure_threshold {
                    let cooldown_ms = self.policy.cooldown.as_millis() as i64;
                    counters
                        .cooldown_until_ms
                        .store(now_ms.saturating_add(cooldown_ms), Ordering::Relaxed);
                    warn!(
                        provider = %provider,
                        consecutive_failures = streak,
                        cooldown_secs = self.policy.cooldown.as_secs(),
                        "Provider entering cooldown"
                    );
                } else {
                    debug!(provider = %provider, consecutive_failures = streak, "Provider failure recorded");
                }
            }
        }
    }

    /// Success ratio in [0, 1]; 1.0 with no data
    pub fn score(&self, provider: &str) -> f64 {
        self.snapshot(provider).score()
    }

    pub fn snapshot(&self, provider: &str) -> HealthRecord {
        self.records
            .get(provider)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    pub fn is_cooling_down(&self, provider: &str) -> bool {
        self.is_cooling_down_at(provider, Utc::now())
    }

    pub fn is_cooling_down_at(&self, provider: &str, now: DateTime<Utc>) -> bool {
        self.records
            .get(provider)
            .map(|c| c.cooldown_until_ms.load(Ordering::Relaxed) > now.timestamp_millis())
            .unwrap_or(false)
    }

    /// Forget everything about a provider
    pub fn reset(&self, provider: &str) {
        self.records.remove(provider);
    }
}
