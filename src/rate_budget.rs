//! Rate budget accounting.
//!
//! A budget allows `capacity` permits per trailing `window` for one scope key.
//! A permit occupies a slot from the moment it is granted until `window` after
//! its settled start time, so a slot is counted while the request is in flight
//! and while it cools down afterwards.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Budget for a single scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateBudget {
    pub capacity: u32,
    pub window: Duration,
    pub scope_key: String,
}

impl RateBudget {
    pub fn new(scope_key: impl Into<String>, capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            scope_key: scope_key.into(),
        }
    }
}

/// Default budget plus per-scope overrides
#[derive(Debug, Clone)]
pub struct BudgetTable {
    overrides: HashMap<String, (u32, Duration)>,
    default_capacity: u32,
    default_window: Duration,
}

impl BudgetTable {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            overrides: HashMap::new(),
            default_capacity: capacity.max(1),
            default_window: window,
        }
    }

    /// Add or update the budget for one scope
    pub fn set_override(&mut self, scope_key: impl Into<String>, capacity: u32, window: Duration) {
        self.overrides.insert(scope_key.into(), (capacity.max(1), window));
    }

    /// Get the budget for a scope, falling back to the default
    pub fn for_scope(&self, scope_key: &str) -> RateBudget {
        let (capacity, window) = self
            .overrides
            .get(scope_key)
            .copied()
            .unwrap_or((self.default_capacity, self.default_window));
        RateBudget::new(scope_key, capacity, window)
    }
}

/// Fraction of a request's observed latency credited back when its slot is
/// settled. The slot's window then starts at `release - latency * fraction`,
/// clamped to the acquisition instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundTripCredit(f64);

impl RoundTripCredit {
    pub fn new(fraction: f64) -> Self {
        if fraction.is_nan() {
            return Self(0.0);
        }
        Self(fraction.clamp(0.0, 1.0))
    }

    pub fn none() -> Self {
        Self(0.0)
    }

    pub fn fraction(&self) -> f64 {
        self.0
    }

    pub fn credit_for(&self, latency: Duration) -> Duration {
        latency.mul_f64(self.0)
    }
}

impl Default for RoundTripCredit {
    fn default() -> Self {
        Self(0.5)
    }
}

/// Result of trying to take a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Granted,
    /// Budget exhausted. Carries the time until the oldest cooling slot frees,
    /// or `None` when every slot is still in flight.
    Wait(Option<Duration>),
}

/// Point-in-time view of a scope's slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetSnapshot {
    pub scope_key: String,
    pub capacity: u32,
    pub in_flight: usize,
    pub cooling: usize,
}

impl BudgetSnapshot {
    pub fn available(&self) -> usize {
        (self.capacity as usize).saturating_sub(self.in_flight + self.cooling)
    }
}

/// Sliding window of slots for one scope
#[derive(Debug, Default)]
pub(crate) struct SlotWindow {
    in_flight: HashMap<Uuid, Instant>,
    // settled start times, ascending
    cooling: VecDeque<Instant>,
}

impl SlotWindow {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&start) = self.cooling.front() {
            if start + window <= now {
                self.cooling.pop_front();
            } else {
                break;
            }
        }
    }

    fn outstanding(&self) -> usize {
        self.in_flight.len() + self.cooling.len()
    }

    pub(crate) fn try_reserve(&mut self, id: Uuid, now: Instant, budget: &RateBudget) -> Reservation {
        self.prune(now, budget.window);

        if self.outstanding() < budget.capacity as usize {
            self.in_flight.insert(id, now);
            return Reservation::Granted;
        }

        Reservation::Wait(
            self.cooling
                .front()
                .map(|start| (*start + budget.window).saturating_duration_since(now)),
        )
    }

    /// Moves an in-flight slot to the cooling queue. Returns `false` when the
    /// slot is unknown (already settled or reclaimed).
    pub(crate) fn settle(&mut self, id: &Uuid, now: Instant, credit: Duration) -> bool {
        let Some(acquired_at) = self.in_flight.remove(id) else {
            return false;
        };

        let start = now
            .checked_sub(credit)
            .map_or(acquired_at, |credited| credited.max(acquired_at));
        let position = self.cooling.partition_point(|s| *s <= start);
        self.cooling.insert(position, start);
        true
    }

    /// Settles in-flight slots older than `lease` as if they had been released
    /// at the end of the lease, for holders that crashed or leaked their permit.
    pub(crate) fn reclaim_stale(&mut self, now: Instant, lease: Duration) -> usize {
        let stale: Vec<Uuid> = self
            .in_flight
            .iter()
            .filter(|(_, acquired_at)| now.saturating_duration_since(**acquired_at) >= lease)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            self.settle(id, now, Duration::ZERO);
        }
        stale.len()
    }

    pub(crate) fn snapshot(&mut self, now: Instant, budget: &RateBudget) -> BudgetSnapshot {
        self.prune(now, budget.window);
        BudgetSnapshot {
            scope_key: budget.scope_key.clone(),
            capacity: budget.capacity,
            in_flight: self.in_flight.len(),
            cooling: self.cooling.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(capacity: u32, window_ms: u64) -> RateBudget {
        RateBudget::new("euw1", capacity, Duration::from_millis(window_ms))
    }

    #[test]
    fn test_budget_table_fallback() {
        let mut table = BudgetTable::new(10, Duration::from_millis(500));
        table.set_override("kr", 20, Duration::from_secs(1));

        assert_eq!(table.for_scope("euw1").capacity, 10);
        assert_eq!(table.for_scope("kr").capacity, 20);
        assert_eq!(table.for_scope("kr").window, Duration::from_secs(1));
        assert_eq!(table.for_scope("kr").scope_key, "kr");
    }

    #[test]
    fn test_credit_clamped() {
        assert_eq!(RoundTripCredit::new(2.0).fraction(), 1.0);
        assert_eq!(RoundTripCredit::new(-1.0).fraction(), 0.0);
        assert_eq!(RoundTripCredit::new(f64::NAN).fraction(), 0.0);
        assert_eq!(
            RoundTripCredit::default().credit_for(Duration::from_millis(100)),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_reserve_until_capacity() {
        let budget = budget(2, 500);
        let mut window = SlotWindow::new();
        let now = Instant::now();

        assert_eq!(window.try_reserve(Uuid::new_v4(), now, &budget), Reservation::Granted);
        assert_eq!(window.try_reserve(Uuid::new_v4(), now, &budget), Reservation::Granted);
        // all slots in flight, nothing cooling yet
        assert_eq!(window.try_reserve(Uuid::new_v4(), now, &budget), Reservation::Wait(None));
    }

    #[test]
    fn test_settled_slot_frees_after_window() {
        let budget = budget(1, 500);
        let mut window = SlotWindow::new();
        let start = Instant::now();
        let id = Uuid::new_v4();

        assert_eq!(window.try_reserve(id, start, &budget), Reservation::Granted);
        assert!(window.settle(&id, start + Duration::from_millis(100), Duration::ZERO));

        let now = start + Duration::from_millis(200);
        assert_eq!(
            window.try_reserve(Uuid::new_v4(), now, &budget),
            Reservation::Wait(Some(Duration::from_millis(400)))
        );

        let later = start + Duration::from_millis(600);
        assert_eq!(window.try_reserve(Uuid::new_v4(), later, &budget), Reservation::Granted);
    }

    #[test]
    fn test_credit_never_predates_acquisition() {
        let budget = budget(1, 500);
        let mut window = SlotWindow::new();
        let start = Instant::now();
        let id = Uuid::new_v4();

        window.try_reserve(id, start, &budget);
        // bogus latency far larger than the time the permit was held
        window.settle(&id, start + Duration::from_millis(50), Duration::from_secs(10));

        let just_before = start + Duration::from_millis(499);
        assert!(matches!(
            window.try_reserve(Uuid::new_v4(), just_before, &budget),
            Reservation::Wait(Some(_))
        ));
        let at_window = start + Duration::from_millis(500);
        assert_eq!(window.try_reserve(Uuid::new_v4(), at_window, &budget), Reservation::Granted);
    }

    #[test]
    fn test_credit_shortens_wait_but_not_past_release() {
        let budget = budget(1, 500);
        let mut window = SlotWindow::new();
        let start = Instant::now();
        let id = Uuid::new_v4();

        window.try_reserve(id, start, &budget);
        let released = start + Duration::from_millis(200);
        window.settle(&id, released, Duration::from_millis(100));

        // slot starts at 100ms: free at 600ms, earlier than release + window (700ms)
        let now = start + Duration::from_millis(600);
        assert_eq!(window.try_reserve(Uuid::new_v4(), now, &budget), Reservation::Granted);
    }

    #[test]
    fn test_settle_unknown_slot() {
        let mut window = SlotWindow::new();
        assert!(!window.settle(&Uuid::new_v4(), Instant::now(), Duration::ZERO));
    }

    #[test]
    fn test_out_of_order_settles_stay_sorted() {
        let budget = budget(3, 1000);
        let mut window = SlotWindow::new();
        let start = Instant::now();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            window.try_reserve(*id, start, &budget);
        }

        window.settle(&ids[0], start + Duration::from_millis(300), Duration::ZERO);
        window.settle(&ids[1], start + Duration::from_millis(100), Duration::ZERO);
        window.settle(&ids[2], start + Duration::from_millis(200), Duration::ZERO);

        let now = start + Duration::from_millis(1150);
        assert_eq!(window.try_reserve(Uuid::new_v4(), now, &budget), Reservation::Granted);
        let snapshot = window.snapshot(now, &budget);
        assert_eq!(snapshot.cooling, 2);
        assert_eq!(snapshot.in_flight, 1);
    }

    #[test]
    fn test_reclaim_stale() {
        let budget = budget(1, 100);
        let mut window = SlotWindow::new();
        let start = Instant::now();
        window.try_reserve(Uuid::new_v4(), start, &budget);

        assert_eq!(window.reclaim_stale(start + Duration::from_secs(1), Duration::from_secs(5)), 0);
        assert_eq!(window.reclaim_stale(start + Duration::from_secs(5), Duration::from_secs(5)), 1);

        let snapshot = window.snapshot(start + Duration::from_secs(5), &budget);
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.cooling, 1);
        assert_eq!(snapshot.available(), 0);
    }
}
