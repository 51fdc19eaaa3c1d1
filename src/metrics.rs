use crate::outcome::{CallOutcome, RetryReason};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Counters for one rate scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeMetrics {
    pub attempts: u64,
    pub successes: u64,
    pub not_found: u64,
    pub retries: u64,
    pub rate_limited: u64,
    pub terminal_failures: u64,
    pub permits: u64,
    /// Total time spent waiting for permits
    #[serde(with = "humantime_serde")]
    pub gate_wait: Duration,
    /// Total time spent on the wire
    #[serde(with = "humantime_serde")]
    pub network_time: Duration,
}

impl ScopeMetrics {
    fn merge(&mut self, other: &ScopeMetrics) {
        self.attempts += other.attempts;
        self.successes += other.successes;
        self.not_found += other.not_found;
        self.retries += other.retries;
        self.rate_limited += other.rate_limited;
        self.terminal_failures += other.terminal_failures;
        self.permits += other.permits;
        self.gate_wait += other.gate_wait;
        self.network_time += other.network_time;
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    scopes: Arc<RwLock<HashMap<String, ScopeMetrics>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_permit(&self, scope_key: &str, waited: Duration) {
        let mut scopes = self.scopes.write().await;
        let metrics = scopes.entry(scope_key.to_string()).or_default();
        metrics.permits += 1;
        metrics.gate_wait += waited;
    }

    pub async fn record_attempt<T>(&self, scope_key: &str, outcome: &CallOutcome<T>, latency: Duration) {
        let mut scopes = self.scopes.write().await;
        let metrics = scopes.entry(scope_key.to_string()).or_default();

        metrics.attempts += 1;
        metrics.network_time += latency;
        match outcome {
            CallOutcome::Success(_) => metrics.successes += 1,
            CallOutcome::NotFound => metrics.not_found += 1,
            CallOutcome::TerminalFailure(_) => metrics.terminal_failures += 1,
            CallOutcome::RetryableFailure { reason, .. } => {
                metrics.retries += 1;
                if matches!(reason, RetryReason::RateLimited { .. }) {
                    metrics.rate_limited += 1;
                }
            }
        }
    }

    pub async fn scope_metrics(&self, scope_key: &str) -> Option<ScopeMetrics> {
        self.scopes.read().await.get(scope_key).cloned()
    }

    pub async fn all(&self) -> HashMap<String, ScopeMetrics> {
        self.scopes.read().await.clone()
    }

    pub async fn global(&self) -> ScopeMetrics {
        let scopes = self.scopes.read().await;
        let mut global = ScopeMetrics::default();
        for metrics in scopes.values() {
            global.merge(metrics);
        }
        global
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[tokio::test]
    async fn test_record_attempts() {
        let collector = MetricsCollector::new();
        let ok: CallOutcome<()> = CallOutcome::Success(());
        let limited: CallOutcome<()> = CallOutcome::RetryableFailure {
            reason: RetryReason::RateLimited { rate_limit_count: None },
            retry_after: Some(Duration::from_secs(1)),
        };
        let unavailable: CallOutcome<()> = CallOutcome::RetryableFailure {
            reason: RetryReason::Status(StatusCode::SERVICE_UNAVAILABLE),
            retry_after: None,
        };

        collector.record_attempt("euw1", &limited, Duration::from_millis(40)).await;
        collector.record_attempt("euw1", &unavailable, Duration::from_millis(40)).await;
        collector.record_attempt("euw1", &ok, Duration::from_millis(20)).await;
        collector.record_attempt("kr", &CallOutcome::<()>::NotFound, Duration::from_millis(10)).await;

        let euw = collector.scope_metrics("euw1").await.unwrap();
        assert_eq!(euw.attempts, 3);
        assert_eq!(euw.retries, 2);
        assert_eq!(euw.rate_limited, 1);
        assert_eq!(euw.successes, 1);
        assert_eq!(euw.network_time, Duration::from_millis(100));

        let global = collector.global().await;
        assert_eq!(global.attempts, 4);
        assert_eq!(global.not_found, 1);
        assert_eq!(collector.all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_record_permit() {
        let collector = MetricsCollector::new();
        collector.record_permit("na1", Duration::from_millis(250)).await;
        collector.record_permit("na1", Duration::from_millis(250)).await;

        let na = collector.scope_metrics("na1").await.unwrap();
        assert_eq!(na.permits, 2);
        assert_eq!(na.gate_wait, Duration::from_millis(500));
        assert!(collector.scope_metrics("euw1").await.is_none());
    }

    #[test]
    fn test_serializes_durations_readably() {
        let metrics = ScopeMetrics {
            gate_wait: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["gate_wait"], "1s 500ms");
    }
}
