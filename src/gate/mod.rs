//! Throttle gates.
//!
//! A gate hands out permits against a rate budget. Two strategies implement
//! the same trait: [`InProcessGate`] owns every budget itself, while
//! [`CoordinatedGate`] keeps the bookkeeping in a store shared by every
//! process hitting the same region.

pub mod coordinated;
pub mod in_process;

pub use coordinated::{BudgetStore, CoordinatedGate, MemoryBudgetStore};
pub use in_process::InProcessGate;

use crate::config::Config;
use crate::error::{AcquireCancelled, ClientError, Result};
use crate::rate_budget::BudgetSnapshot;
use crate::redis::RedisBudgetStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Which bookkeeping issued a permit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitOrigin {
    Local,
    Shared,
}

/// A reserved slot in a rate budget.
///
/// Not `Clone`: releasing consumes it, so a permit can only be released once.
#[derive(Debug)]
pub struct Permit {
    id: Uuid,
    scope_key: String,
    origin: PermitOrigin,
}

impl Permit {
    pub(crate) fn new(scope_key: &str, id: Uuid, origin: PermitOrigin) -> Self {
        Self {
            id,
            scope_key: scope_key.to_string(),
            origin,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scope_key(&self) -> &str {
        &self.scope_key
    }

    pub fn origin(&self) -> PermitOrigin {
        self.origin
    }
}

/// Strategy selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    InProcess,
    Coordinated,
}

/// Trait for throttle gates
#[async_trait]
pub trait ThrottleGate: Send + Sync {
    /// Wait until a permit is available under `scope_key`'s budget.
    ///
    /// Returns `AcquireCancelled` without holding any slot if `cancel` fires
    /// first. Dropping the returned future is equally safe.
    async fn acquire(
        &self,
        scope_key: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<Permit, AcquireCancelled>;

    /// Return a permit's slot. `observed_latency` is the duration of the
    /// network exchange only, not the time spent waiting in `acquire`.
    async fn release(&self, permit: Permit, observed_latency: Duration);

    /// Current slot usage for a scope
    async fn snapshot(&self, scope_key: &str) -> BudgetSnapshot;

    fn kind(&self) -> GateKind;

    /// Release shared coordination resources
    async fn shutdown(&self) {}
}

/// Releases its permit exactly once: explicitly through [`PermitGuard::release`]
/// or, if the owning future is dropped first, from `Drop`.
pub struct PermitGuard {
    gate: Arc<dyn ThrottleGate>,
    permit: Option<Permit>,
}

impl PermitGuard {
    pub fn new(gate: Arc<dyn ThrottleGate>, permit: Permit) -> Self {
        Self {
            gate,
            permit: Some(permit),
        }
    }

    pub async fn release(mut self, observed_latency: Duration) {
        if let Some(permit) = self.permit.take() {
            self.gate.release(permit, observed_latency).await;
        }
    }
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };

        // No latency credit: the slot is stamped at the moment of the drop.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let gate = Arc::clone(&self.gate);
                handle.spawn(async move {
                    gate.release(permit, Duration::ZERO).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    target: "riot_gate::gate",
                    scope = %permit.scope_key(),
                    "Permit dropped outside a Tokio runtime; slot will not be returned"
                );
            }
        }
    }
}

/// Build the gate selected by `config`: coordinated through Redis when
/// `REDIS_URL` is set, in-process otherwise.
pub fn build_gate(config: &Config) -> Result<Arc<dyn ThrottleGate>> {
    if !config.uses_redis() {
        tracing::info!(
            target: "riot_gate::gate",
            capacity = config.rate_limit_capacity,
            window_ms = config.rate_limit_window_ms,
            "Using in-process throttle gate"
        );
        return Ok(Arc::new(
            InProcessGate::new(config.budget_table(), config.credit(), config.poll_interval())
                .with_lease(config.inflight_lease()),
        ));
    }

    let store = RedisBudgetStore::new(&config.redis_url, &config.redis_key_prefix)
        .map_err(|e| ClientError::Configuration(e.to_string()))?;
    let fallback = InProcessGate::new(
        config.degraded_budget_table(),
        config.credit(),
        config.poll_interval(),
    )
    .with_lease(config.inflight_lease());
    tracing::info!(
        target: "riot_gate::gate",
        redis_url = %config.redis_url,
        capacity = config.rate_limit_capacity,
        window_ms = config.rate_limit_window_ms,
        "Using Redis-coordinated throttle gate"
    );

    Ok(Arc::new(
        CoordinatedGate::new(Arc::new(store), config.budget_table(), fallback)
            .with_credit(config.credit())
            .with_poll_interval(config.poll_interval())
            .with_lease(config.inflight_lease()),
    ))
}

/// Sleep that gives up early when `cancel` fires
pub(crate) async fn cancellable_sleep(
    duration: Duration,
    cancel: &CancellationToken,
) -> std::result::Result<(), AcquireCancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AcquireCancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_budget::{BudgetTable, RoundTripCredit};

    fn gate(capacity: u32) -> Arc<dyn ThrottleGate> {
        Arc::new(InProcessGate::new(
            BudgetTable::new(capacity, Duration::from_millis(500)),
            RoundTripCredit::none(),
            Duration::from_millis(10),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_release_returns_slot() {
        let gate = gate(1);
        let cancel = CancellationToken::new();
        let permit = gate.acquire("euw1", &cancel).await.unwrap();
        let guard = PermitGuard::new(Arc::clone(&gate), permit);

        assert_eq!(gate.snapshot("euw1").await.in_flight, 1);
        guard.release(Duration::from_millis(20)).await;

        let snapshot = gate.snapshot("euw1").await;
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.cooling, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_guard_returns_slot() {
        let gate = gate(1);
        let cancel = CancellationToken::new();
        let permit = gate.acquire("euw1", &cancel).await.unwrap();
        drop(PermitGuard::new(Arc::clone(&gate), permit));

        // let the spawned release run
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let snapshot = gate.snapshot("euw1").await;
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.cooling, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_sleep() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            cancellable_sleep(Duration::from_secs(60), &cancel).await,
            Err(AcquireCancelled)
        );

        let fresh = CancellationToken::new();
        assert!(cancellable_sleep(Duration::from_millis(5), &fresh).await.is_ok());
    }
}
