//! Coordinated gate against a live Redis.
//!
//! Run with `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.

use riot_gate::gate::BudgetStore;
use riot_gate::redis::RedisBudgetStore;
use riot_gate::{BudgetTable, CoordinatedGate, InProcessGate, RoundTripCredit, ThrottleGate};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn gate(store: Arc<dyn BudgetStore>, capacity: u32) -> CoordinatedGate {
    let window = Duration::from_millis(1000);
    let fallback = InProcessGate::new(
        BudgetTable::new(1, window),
        RoundTripCredit::none(),
        Duration::from_millis(10),
    );
    CoordinatedGate::new(store, BudgetTable::new(capacity, window), fallback)
        .with_credit(RoundTripCredit::none())
        .with_poll_interval(Duration::from_millis(10))
}

fn unique_prefix() -> String {
    format!("riot-gate-test:{}", uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore]
async fn test_two_gates_share_one_budget() {
    let prefix = unique_prefix();
    let first = gate(Arc::new(RedisBudgetStore::new(&redis_url(), &prefix).unwrap()), 3);
    let second = gate(Arc::new(RedisBudgetStore::new(&redis_url(), &prefix).unwrap()), 3);
    let cancel = CancellationToken::new();

    let a = first.acquire("euw1", &cancel).await.unwrap();
    let b = second.acquire("euw1", &cancel).await.unwrap();
    let c = first.acquire("euw1", &cancel).await.unwrap();
    assert!(!first.is_degraded());

    let blocked = tokio::time::timeout(Duration::from_millis(200), second.acquire("euw1", &cancel)).await;
    assert!(blocked.is_err(), "fourth permit must wait for the shared window");

    let snapshot = second.snapshot("euw1").await;
    assert_eq!(snapshot.in_flight, 3);

    first.release(a, Duration::from_millis(20)).await;
    second.release(b, Duration::from_millis(20)).await;
    first.release(c, Duration::from_millis(20)).await;

    let snapshot = first.snapshot("euw1").await;
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.cooling, 3);

    let started = tokio::time::Instant::now();
    let d = second.acquire("euw1", &cancel).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(900));
    second.release(d, Duration::ZERO).await;
}

#[tokio::test]
#[ignore]
async fn test_ping_and_close() {
    let store = RedisBudgetStore::new(&redis_url(), &unique_prefix()).unwrap();
    assert_eq!(store.ping().await.unwrap(), "PONG");
    store.close().await;
    assert_eq!(store.ping().await.unwrap(), "PONG");
}

#[tokio::test]
#[ignore]
async fn test_reclaimed_slots_expire_with_cooling_set() {
    let prefix = unique_prefix();
    let store = RedisBudgetStore::new(&redis_url(), &prefix).unwrap();
    let budget = BudgetTable::new(2, Duration::from_millis(1000)).for_scope("euw1");
    let lease = Duration::from_millis(50);

    store.try_reserve(&budget, uuid::Uuid::new_v4(), lease).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    // the second reservation moves the stale one to cooling
    store.try_reserve(&budget, uuid::Uuid::new_v4(), lease).await.unwrap();

    let snapshot = store.snapshot(&budget).await.unwrap();
    assert_eq!(snapshot.in_flight, 1);
    assert_eq!(snapshot.cooling, 1);

    let client = redis::Client::open(redis_url()).unwrap();
    let mut conn = client.get_multiplexed_tokio_connection().await.unwrap();
    let ttl: i64 = redis::cmd("PTTL")
        .arg(format!("{}:{{euw1}}:cooling", prefix))
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(ttl > 0 && ttl <= 1050, "cooling set must expire, got {ttl}");
}

#[tokio::test]
async fn test_unreachable_redis_degrades_to_local_budget() {
    // nothing listens on the discard port
    let store = RedisBudgetStore::new("redis://127.0.0.1:9/", &unique_prefix()).unwrap();
    let gate = gate(Arc::new(store), 3).with_store_timeout(Duration::from_millis(200));
    let cancel = CancellationToken::new();

    let permit = gate.acquire("euw1", &cancel).await.unwrap();
    assert!(gate.is_degraded());
    assert_eq!(gate.snapshot("euw1").await.in_flight, 1);
    gate.release(permit, Duration::ZERO).await;
}
