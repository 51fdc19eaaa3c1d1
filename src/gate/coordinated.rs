use super::{cancellable_sleep, GateKind, InProcessGate, Permit, PermitOrigin, ThrottleGate};
use crate::error::{AcquireCancelled, StoreError};
use crate::rate_budget::{BudgetSnapshot, BudgetTable, RateBudget, Reservation, RoundTripCredit, SlotWindow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Storage for budgets shared by several gates, possibly in different
/// processes. Each call must be atomic with respect to the others for the
/// same scope.
#[async_trait]
pub trait BudgetStore: Send + Sync {
    /// Take a slot for `permit_id` if the budget allows it. In-flight slots
    /// older than `lease` are reclaimed first.
    async fn try_reserve(
        &self,
        budget: &RateBudget,
        permit_id: Uuid,
        lease: Duration,
    ) -> Result<Reservation, StoreError>;

    /// Move `permit_id` from in flight to cooling, starting its window
    /// `credit` before now but never before it was reserved.
    async fn settle(&self, budget: &RateBudget, permit_id: Uuid, credit: Duration) -> Result<(), StoreError>;

    async fn snapshot(&self, budget: &RateBudget) -> Result<BudgetSnapshot, StoreError>;

    /// Drop connections held by the store
    async fn close(&self) {}
}

/// Budget store living in this process. Gates sharing one instance share
/// one budget per scope.
#[derive(Default)]
pub struct MemoryBudgetStore {
    windows: Mutex<HashMap<String, SlotWindow>>,
}

impl MemoryBudgetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BudgetStore for MemoryBudgetStore {
    async fn try_reserve(
        &self,
        budget: &RateBudget,
        permit_id: Uuid,
        lease: Duration,
    ) -> Result<Reservation, StoreError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let window = windows.entry(budget.scope_key.clone()).or_default();

        let reclaimed = window.reclaim_stale(now, lease);
        if reclaimed > 0 {
            tracing::warn!(
                target: "riot_gate::gate",
                scope = %budget.scope_key,
                reclaimed,
                "Reclaimed in-flight permits past their lease"
            );
        }

        Ok(window.try_reserve(permit_id, now, budget))
    }

    async fn settle(&self, budget: &RateBudget, permit_id: Uuid, credit: Duration) -> Result<(), StoreError> {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(window) = windows.get_mut(&budget.scope_key) {
            window.settle(&permit_id, Instant::now(), credit);
        }
        Ok(())
    }

    async fn snapshot(&self, budget: &RateBudget) -> Result<BudgetSnapshot, StoreError> {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let window = windows.entry(budget.scope_key.clone()).or_default();
        Ok(window.snapshot(Instant::now(), budget))
    }
}

/// Orphaned reservations remembered for cleanup; older ones fall to the lease
const MAX_ORPHANS: usize = 256;

/// Gate whose budgets live in a [`BudgetStore`] shared with other client
/// instances.
///
/// When the store cannot be reached the gate serves requests from a local
/// [`InProcessGate`] configured with a smaller budget. It stays on the local
/// budget for the retry interval, then tries the store again.
pub struct CoordinatedGate {
    store: Arc<dyn BudgetStore>,
    budgets: BudgetTable,
    fallback: InProcessGate,
    credit: RoundTripCredit,
    poll_interval: Duration,
    lease: Duration,
    store_timeout: Duration,
    store_retry: Duration,
    turnstiles: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    degraded: AtomicBool,
    degraded_until: Mutex<Option<Instant>>,
    orphans: Mutex<Vec<(RateBudget, Uuid)>>,
}

impl CoordinatedGate {
    pub fn new(store: Arc<dyn BudgetStore>, budgets: BudgetTable, fallback: InProcessGate) -> Self {
        Self {
            store,
            budgets,
            fallback,
            credit: RoundTripCredit::default(),
            poll_interval: Duration::from_millis(25),
            lease: Duration::from_secs(30),
            store_timeout: Duration::from_secs(1),
            store_retry: Duration::from_secs(5),
            turnstiles: Mutex::new(HashMap::new()),
            degraded: AtomicBool::new(false),
            degraded_until: Mutex::new(None),
            orphans: Mutex::new(Vec::new()),
        }
    }

    pub fn with_credit(mut self, credit: RoundTripCredit) -> Self {
        self.credit = credit;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Longest wait for a single store call.
    ///
    /// A reservation that times out may still have been applied by the store.
    /// Its id is kept and settled once the store answers again; if that never
    /// happens the slot stays counted until the lease plus one window.
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// How long to stay on the local budget after a failed store call
    pub fn with_store_retry(mut self, store_retry: Duration) -> Self {
        self.store_retry = store_retry;
        self
    }

    /// Whether the last store interaction failed
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn turnstile(&self, scope_key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut turnstiles = self.turnstiles.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(turnstiles.entry(scope_key.to_string()).or_default())
    }

    fn backing_off(&self) -> bool {
        let until = self.degraded_until.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(*until, Some(until) if Instant::now() < until)
    }

    fn remember_orphan(&self, budget: &RateBudget, permit_id: Uuid) {
        let mut orphans = self.orphans.lock().unwrap_or_else(PoisonError::into_inner);
        if orphans.len() >= MAX_ORPHANS {
            orphans.remove(0);
        }
        orphans.push((budget.clone(), permit_id));
    }

    /// Settle reservations whose answer was lost to a timeout or cancellation
    async fn settle_orphans(&self) {
        let orphans = std::mem::take(&mut *self.orphans.lock().unwrap_or_else(PoisonError::into_inner));
        let mut pending = orphans.into_iter();

        while let Some((budget, permit_id)) = pending.next() {
            if let Err(err) = self.call_store(self.store.settle(&budget, permit_id, Duration::ZERO)).await {
                tracing::debug!(target: "riot_gate::gate", error = %err, "Could not settle orphaned reservation");
                let mut orphans = self.orphans.lock().unwrap_or_else(PoisonError::into_inner);
                orphans.push((budget, permit_id));
                orphans.extend(pending);
                return;
            }
            tracing::debug!(
                target: "riot_gate::gate",
                scope = %budget.scope_key,
                permit = %permit_id,
                "Settled orphaned reservation"
            );
        }
    }

    async fn call_store<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let result = match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.store_timeout)),
        };

        let mut until = self.degraded_until.lock().unwrap_or_else(PoisonError::into_inner);
        match &result {
            Ok(_) => {
                *until = None;
                if self.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!(target: "riot_gate::gate", "Budget store reachable again, leaving degraded mode");
                }
            }
            Err(err) => {
                *until = Some(Instant::now() + self.store_retry);
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        target: "riot_gate::gate",
                        error = %err,
                        retry_secs = self.store_retry.as_secs(),
                        "Budget store unavailable, throttling locally with a reduced budget"
                    );
                }
            }
        }
        drop(until);
        result
    }
}

#[async_trait]
impl ThrottleGate for CoordinatedGate {
    async fn acquire(
        &self,
        scope_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Permit, AcquireCancelled> {
        if self.backing_off() {
            return self.fallback.acquire(scope_key, cancel).await;
        }

        let budget = self.budgets.for_scope(scope_key);
        let turnstile = self.turnstile(scope_key);

        let turn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AcquireCancelled),
            turn = turnstile.lock() => turn,
        };

        loop {
            if cancel.is_cancelled() {
                return Err(AcquireCancelled);
            }
            // another waiter found the store down while we queued
            if self.backing_off() {
                drop(turn);
                return self.fallback.acquire(scope_key, cancel).await;
            }

            let id = Uuid::new_v4();
            let reserved = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.remember_orphan(&budget, id);
                    return Err(AcquireCancelled);
                }
                reserved = self.call_store(self.store.try_reserve(&budget, id, self.lease)) => reserved,
            };

            let wait = match reserved {
                Ok(Reservation::Granted) => {
                    tracing::trace!(target: "riot_gate::gate", scope = %scope_key, permit = %id, "Shared permit granted");
                    self.settle_orphans().await;
                    return Ok(Permit::new(scope_key, id, PermitOrigin::Shared));
                }
                Ok(Reservation::Wait(Some(until_free))) => until_free.max(Duration::from_millis(1)),
                // other holders cannot wake us, so poll
                Ok(Reservation::Wait(None)) => self.poll_interval,
                Err(err) => {
                    if matches!(err, StoreError::Timeout(_)) {
                        self.remember_orphan(&budget, id);
                    }
                    drop(turn);
                    return self.fallback.acquire(scope_key, cancel).await;
                }
            };

            self.settle_orphans().await;
            cancellable_sleep(wait, cancel).await?;
        }
    }

    async fn release(&self, permit: Permit, observed_latency: Duration) {
        if permit.origin() == PermitOrigin::Local {
            self.fallback.release(permit, observed_latency).await;
            return;
        }

        let budget = self.budgets.for_scope(permit.scope_key());
        let credit = self.credit.credit_for(observed_latency);
        if let Err(err) = self.call_store(self.store.settle(&budget, permit.id(), credit)).await {
            tracing::warn!(
                target: "riot_gate::gate",
                scope = %permit.scope_key(),
                permit = %permit.id(),
                error = %err,
                lease_secs = self.lease.as_secs(),
                "Could not settle shared permit; the store reclaims it when its lease runs out"
            );
        }
    }

    async fn snapshot(&self, scope_key: &str) -> BudgetSnapshot {
        if self.backing_off() {
            return self.fallback.snapshot(scope_key).await;
        }
        let budget = self.budgets.for_scope(scope_key);
        match self.call_store(self.store.snapshot(&budget)).await {
            Ok(snapshot) => snapshot,
            Err(_) => self.fallback.snapshot(scope_key).await,
        }
    }

    fn kind(&self) -> GateKind {
        GateKind::Coordinated
    }

    async fn shutdown(&self) {
        self.store.close().await;
    }
}
