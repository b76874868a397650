use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time health counters for one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthRecord {
    pub success_count: u64,
    pub failure_count: u64,
    pub last_latency_ms: Option<u64>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl HealthRecord {
    /// Success ratio in [0, 1]; 1.0 when nothing has been recorded yet
    pub fn score(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }
}

/// Per-provider row of `get_stats()`
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStats {
    pub name: String,
    pub enabled: bool,
    pub priority: i32,
    pub cost_per_gb: f64,
    #[serde(flatten)]
    pub health: HealthRecord,
    pub score: f64,
    pub cooling_down: bool,
    pub active_sessions: usize,
}

/// Aggregate view returned by `get_stats()`
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub total_providers: usize,
    pub enabled_providers: usize,
    pub routing_rules: usize,
    pub active_sessions: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub providers: Vec<ProviderStats>,
}
