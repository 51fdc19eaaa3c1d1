//! Resilient request executor.
//!
//! One logical GET runs as a loop over [`CallOutcome`]: acquire a permit,
//! perform the exchange, release the permit, classify. Success, not-found and
//! terminal outcomes end the loop; retryable ones go round again with a fresh
//! permit until the caller's cancellation token fires.

use crate::decode::{self, DecodeError};
use crate::endpoint::{Endpoint, EndpointCategory};
use crate::error::{ClientError, Result};
use crate::gate::{cancellable_sleep, PermitGuard, ThrottleGate};
use crate::metrics::MetricsCollector;
use crate::outcome::{CallOutcome, Exchange, RetryReason};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const RIOT_TOKEN_HEADER: &str = "X-Riot-Token";

pub struct Executor {
    http: reqwest::Client,
    api_key: String,
    gate: Arc<dyn ThrottleGate>,
    exempt: Vec<EndpointCategory>,
    metrics: MetricsCollector,
}

impl Executor {
    /// Fails with `ClientError::Configuration` when `api_key` is blank
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, gate: Arc<dyn ThrottleGate>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ClientError::Configuration(
                "RIOT_API_KEY must be set to a non-empty value".to_string(),
            ));
        }

        Ok(Self {
            http,
            api_key,
            gate,
            exempt: vec![EndpointCategory::Static],
            metrics: MetricsCollector::new(),
        })
    }

    /// Endpoint categories that skip the gate
    pub fn with_exempt(mut self, categories: Vec<EndpointCategory>) -> Self {
        self.exempt = categories;
        self
    }

    pub fn gate(&self) -> &Arc<dyn ThrottleGate> {
        &self.gate
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Execute and decode into a generic JSON tree
    pub async fn execute(&self, endpoint: &Endpoint, cancel: &CancellationToken) -> Result<Option<Value>> {
        self.execute_with(endpoint, cancel, decode::json_tree).await
    }

    pub async fn execute_as<T>(&self, endpoint: &Endpoint, cancel: &CancellationToken) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.execute_with(endpoint, cancel, decode::typed::<T>).await
    }

    /// Execute and return the body text as received
    pub async fn execute_raw(&self, endpoint: &Endpoint, cancel: &CancellationToken) -> Result<Option<String>> {
        self.execute_with(endpoint, cancel, decode::raw).await
    }

    /// Run the retry loop with a custom decoder.
    ///
    /// Returns `Ok(None)` on 404. Retryable failures never surface: only a
    /// decode failure or cancellation ends the loop with an error.
    pub async fn execute_with<T, D>(
        &self,
        endpoint: &Endpoint,
        cancel: &CancellationToken,
        decode: D,
    ) -> Result<Option<T>>
    where
        T: Send,
        D: Fn(&str) -> std::result::Result<T, DecodeError> + Sync,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            match self.attempt(endpoint, cancel, &decode).await? {
                CallOutcome::Success(value) => return Ok(Some(value)),
                CallOutcome::NotFound => return Ok(None),
                CallOutcome::TerminalFailure(reason) => {
                    return Err(ClientError::Terminal {
                        endpoint: endpoint.url.clone(),
                        reason,
                    });
                }
                CallOutcome::RetryableFailure { retry_after, .. } => {
                    if let Some(delay) = retry_after {
                        cancellable_sleep(delay, cancel).await?;
                    }
                }
            }
        }
    }

    async fn attempt<T, D>(
        &self,
        endpoint: &Endpoint,
        cancel: &CancellationToken,
        decode: &D,
    ) -> Result<CallOutcome<T>>
    where
        T: Send,
        D: Fn(&str) -> std::result::Result<T, DecodeError> + Sync,
    {
        let guard = if self.exempt.contains(&endpoint.category) {
            None
        } else {
            let waiting = Instant::now();
            let permit = self.gate.acquire(&endpoint.scope_key, cancel).await?;
            self.metrics
                .record_permit(&endpoint.scope_key, waiting.elapsed())
                .await;
            Some(PermitGuard::new(Arc::clone(&self.gate), permit))
        };

        let started = Instant::now();
        let exchange = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.exchange(&endpoint.url) => Some(result),
        };
        let latency = started.elapsed();

        if let Some(guard) = guard {
            guard.release(latency).await;
        }

        let Some(result) = exchange else {
            return Err(ClientError::Cancelled);
        };

        let outcome = match result {
            Ok(exchange) => CallOutcome::classify(exchange, decode),
            Err(err) => CallOutcome::transport(err),
        };

        log_outcome(endpoint, &outcome, latency.as_millis() as u64);
        self.metrics
            .record_attempt(&endpoint.scope_key, &outcome, latency)
            .await;

        Ok(outcome)
    }

    async fn exchange(&self, url: &str) -> std::result::Result<Exchange, reqwest::Error> {
        let response = self
            .http
            .get(url)
            .header(RIOT_TOKEN_HEADER, &self.api_key)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(Exchange::new(status, &headers, body))
    }
}

fn log_outcome<T>(endpoint: &Endpoint, outcome: &CallOutcome<T>, latency_ms: u64) {
    match outcome {
        CallOutcome::Success(_) => {
            tracing::debug!(
                target: "riot_gate::executor",
                url = %endpoint.url,
                scope = %endpoint.scope_key,
                latency_ms,
                "Request succeeded"
            );
        }
        CallOutcome::NotFound => {
            tracing::debug!(
                target: "riot_gate::executor",
                url = %endpoint.url,
                latency_ms,
                "Resource not found"
            );
        }
        CallOutcome::RetryableFailure {
            reason: reason @ RetryReason::RateLimited { .. },
            retry_after,
        } => {
            tracing::warn!(
                target: "riot_gate::executor",
                url = %endpoint.url,
                scope = %endpoint.scope_key,
                retry_after_secs = retry_after.map(|d| d.as_secs()),
                "{}, retrying",
                reason
            );
        }
        CallOutcome::RetryableFailure { reason, .. } => {
            tracing::error!(
                target: "riot_gate::executor",
                url = %endpoint.url,
                scope = %endpoint.scope_key,
                latency_ms,
                "{}, retrying",
                reason
            );
        }
        CallOutcome::TerminalFailure(reason) => {
            tracing::error!(
                target: "riot_gate::executor",
                url = %endpoint.url,
                "Could not decode response: {}",
                reason
            );
        }
    }
}
