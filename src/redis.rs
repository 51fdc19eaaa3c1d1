//! Redis-backed budget store.
//!
//! Each scope uses two sorted sets sharing a hash tag: `inflight` holds
//! permits scored by their reservation time, `cooling` holds settled permits
//! scored by the start of their window. Every operation is a single Lua script
//! so concurrent workers see a consistent count, and all timestamps come from
//! the Redis server clock rather than the workers' clocks.

use crate::error::StoreError;
use crate::gate::BudgetStore;
use crate::rate_budget::{BudgetSnapshot, RateBudget, Reservation};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, FromRedisValue, Script, ScriptInvocation};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

static UNSAFE_KEY_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9:_\-]").expect("static regex"));

/// How long a cooling set outlives its window after the last settle.
/// Idle scopes still expire; busy ones refresh on every settle.
const COOLING_TTL_SLACK: Duration = Duration::from_secs(60);

const RESERVE_SCRIPT: &str = r#"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local window = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local lease = tonumber(ARGV[4])

local stale = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', now - lease)
for _, member in ipairs(stale) do
  redis.call('ZREM', KEYS[1], member)
  redis.call('ZADD', KEYS[2], now, member)
end
if #stale > 0 then
  redis.call('PEXPIRE', KEYS[2], window + lease)
end

redis.call('ZREMRANGEBYSCORE', KEYS[2], '-inf', now - window)

local outstanding = redis.call('ZCARD', KEYS[1]) + redis.call('ZCARD', KEYS[2])
if outstanding < capacity then
  redis.call('ZADD', KEYS[1], now, ARGV[3])
  redis.call('PEXPIRE', KEYS[1], lease + window)
  return 0
end

local oldest = redis.call('ZRANGE', KEYS[2], 0, 0, 'WITHSCORES')
if oldest[2] then
  return math.max(1, tonumber(oldest[2]) + window - now)
end
return -1
"#;

const SETTLE_SCRIPT: &str = r#"
local acquired = redis.call('ZSCORE', KEYS[1], ARGV[1])
if not acquired then
  return 0
end
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local start = math.max(tonumber(acquired), now - tonumber(ARGV[2]))
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('ZADD', KEYS[2], start, ARGV[1])
redis.call('PEXPIRE', KEYS[2], ARGV[3])
return 1
"#;

const SNAPSHOT_SCRIPT: &str = r#"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local cooling = redis.call('ZCOUNT', KEYS[2], '(' .. (now - tonumber(ARGV[1])), '+inf')
return { redis.call('ZCARD', KEYS[1]), cooling }
"#;

pub struct RedisBudgetStore {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    key_prefix: String,
    reserve: Script,
    settle: Script,
    snapshot: Script,
}

impl RedisBudgetStore {
    /// Create a store. No connection is made until the first call, so an
    /// unreachable server only degrades the gate instead of failing startup.
    pub fn new(redis_url: &str, key_prefix: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
            key_prefix: key_prefix.to_string(),
            reserve: Script::new(RESERVE_SCRIPT),
            settle: Script::new(SETTLE_SCRIPT),
            snapshot: Script::new(SNAPSHOT_SCRIPT),
        })
    }

    /// Both keys of a scope share a hash tag so scripts work on Redis Cluster
    fn keys(&self, scope_key: &str) -> (String, String) {
        let scope = sanitize_scope(scope_key);
        (
            format!("{}:{{{}}}:inflight", self.key_prefix, scope),
            format!("{}:{{{}}}:cooling", self.key_prefix, scope),
        )
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self.client.get_multiplexed_tokio_connection().await?;
        tracing::debug!(target: "riot_gate::redis", "Connected to Redis budget store");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn invoke<T: FromRedisValue>(&self, invocation: ScriptInvocation<'_>) -> Result<T, StoreError> {
        let mut conn = self.connection().await?;

        match invocation.invoke_async(&mut conn).await {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
                    // reconnect on the next call
                    *self.connection.lock().await = None;
                }
                Err(err.into())
            }
        }
    }

    pub async fn ping(&self) -> Result<String, StoreError> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong)
    }
}

#[async_trait]
impl BudgetStore for RedisBudgetStore {
    async fn try_reserve(
        &self,
        budget: &RateBudget,
        permit_id: Uuid,
        lease: Duration,
    ) -> Result<Reservation, StoreError> {
        let (inflight, cooling) = self.keys(&budget.scope_key);
        let mut invocation = self.reserve.key(inflight);
        invocation
            .key(cooling)
            .arg(millis(budget.window))
            .arg(budget.capacity)
            .arg(permit_id.to_string())
            .arg(millis(lease));

        let answer: i64 = self.invoke(invocation).await?;
        Ok(match answer {
            0 => Reservation::Granted,
            wait if wait > 0 => Reservation::Wait(Some(Duration::from_millis(wait as u64))),
            _ => Reservation::Wait(None),
        })
    }

    async fn settle(&self, budget: &RateBudget, permit_id: Uuid, credit: Duration) -> Result<(), StoreError> {
        let (inflight, cooling) = self.keys(&budget.scope_key);
        let mut invocation = self.settle.key(inflight);
        invocation
            .key(cooling)
            .arg(permit_id.to_string())
            .arg(millis(credit))
            .arg(millis(cooling_ttl(budget.window)));

        let settled: i64 = self.invoke(invocation).await?;
        if settled == 0 {
            tracing::debug!(
                target: "riot_gate::redis",
                scope = %budget.scope_key,
                permit = %permit_id,
                "Permit was already reclaimed by the store"
            );
        }
        Ok(())
    }

    async fn snapshot(&self, budget: &RateBudget) -> Result<BudgetSnapshot, StoreError> {
        let (inflight, cooling) = self.keys(&budget.scope_key);
        let mut invocation = self.snapshot.key(inflight);
        invocation.key(cooling).arg(millis(budget.window));

        let (in_flight, cooling): (usize, usize) = self.invoke(invocation).await?;
        Ok(BudgetSnapshot {
            scope_key: budget.scope_key.clone(),
            capacity: budget.capacity,
            in_flight,
            cooling,
        })
    }

    async fn close(&self) {
        if self.connection.lock().await.take().is_some() {
            tracing::info!(target: "riot_gate::redis", "Closed Redis budget store connection");
        }
    }
}

fn cooling_ttl(window: Duration) -> Duration {
    window + COOLING_TTL_SLACK
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Replace characters that do not belong in a Redis key segment
pub fn sanitize_scope(scope_key: &str) -> String {
    UNSAFE_KEY_CHARS.replace_all(scope_key, "_").into_owned()
}
