use super::{GateKind, Permit, PermitOrigin, ThrottleGate};
use crate::error::AcquireCancelled;
use crate::rate_budget::{BudgetSnapshot, BudgetTable, RateBudget, Reservation, RoundTripCredit, SlotWindow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-scope state: the slot window plus a turnstile that lets one waiter at
/// a time poll the budget. Tokio's mutex queues waiters in FIFO order, so a
/// caller that has been waiting is never overtaken by newer arrivals.
struct ScopeState {
    budget: RateBudget,
    slots: Mutex<SlotWindow>,
    turnstile: tokio::sync::Mutex<()>,
    released: Notify,
}

impl ScopeState {
    fn lock_slots(&self) -> MutexGuard<'_, SlotWindow> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Gate that owns every budget in this process
pub struct InProcessGate {
    budgets: BudgetTable,
    scopes: Mutex<HashMap<String, Arc<ScopeState>>>,
    credit: RoundTripCredit,
    poll_interval: Duration,
    lease: Option<Duration>,
}

impl InProcessGate {
    pub fn new(budgets: BudgetTable, credit: RoundTripCredit, poll_interval: Duration) -> Self {
        Self {
            budgets,
            scopes: Mutex::new(HashMap::new()),
            credit,
            poll_interval,
            lease: None,
        }
    }

    /// Return in-flight slots older than `lease` to the window, covering
    /// permits that were leaked instead of released
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = Some(lease);
        self
    }

    fn scope(&self, scope_key: &str) -> Arc<ScopeState> {
        let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
        let state = scopes.entry(scope_key.to_string()).or_insert_with(|| {
            Arc::new(ScopeState {
                budget: self.budgets.for_scope(scope_key),
                slots: Mutex::new(SlotWindow::new()),
                turnstile: tokio::sync::Mutex::new(()),
                released: Notify::new(),
            })
        });
        Arc::clone(state)
    }
}

#[async_trait]
impl ThrottleGate for InProcessGate {
    async fn acquire(
        &self,
        scope_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Permit, AcquireCancelled> {
        let scope = self.scope(scope_key);

        let _turn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AcquireCancelled),
            turn = scope.turnstile.lock() => turn,
        };

        loop {
            let id = Uuid::new_v4();
            let now = Instant::now();
            let reservation = {
                let mut slots = scope.lock_slots();
                if let Some(lease) = self.lease {
                    let reclaimed = slots.reclaim_stale(now, lease);
                    if reclaimed > 0 {
                        tracing::warn!(
                            target: "riot_gate::gate",
                            scope = %scope_key,
                            reclaimed,
                            "Reclaimed in-flight permits past their lease"
                        );
                    }
                }
                slots.try_reserve(id, now, &scope.budget)
            };

            let wait = match reservation {
                Reservation::Granted => {
                    tracing::trace!(target: "riot_gate::gate", scope = %scope_key, permit = %id, "Permit granted");
                    return Ok(Permit::new(scope_key, id, PermitOrigin::Local));
                }
                Reservation::Wait(Some(until_free)) => until_free,
                // every slot is in flight; a release will wake us
                Reservation::Wait(None) => self.poll_interval,
            };

            tracing::trace!(
                target: "riot_gate::gate",
                scope = %scope_key,
                wait_ms = wait.as_millis() as u64,
                "Budget exhausted, waiting"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AcquireCancelled),
                _ = scope.released.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn release(&self, permit: Permit, observed_latency: Duration) {
        let scope = self.scope(permit.scope_key());
        let credit = self.credit.credit_for(observed_latency);

        let settled = scope.lock_slots().settle(&permit.id(), Instant::now(), credit);
        if !settled {
            tracing::warn!(
                target: "riot_gate::gate",
                scope = %permit.scope_key(),
                permit = %permit.id(),
                "Released a permit this gate does not know about"
            );
        }

        scope.released.notify_one();
    }

    async fn snapshot(&self, scope_key: &str) -> BudgetSnapshot {
        let scope = self.scope(scope_key);
        let snapshot = scope.lock_slots().snapshot(Instant::now(), &scope.budget);
        snapshot
    }

    fn kind(&self) -> GateKind {
        GateKind::InProcess
    }
}
