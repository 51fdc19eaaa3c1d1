use crate::config_validator::{validate_api_key, validate_base_url, validate_redis_url, validate_region};
use crate::endpoint::Region;
use crate::error::{ClientError, Result};
use crate::rate_budget::{BudgetTable, RoundTripCredit};
use envconfig::Envconfig;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use validator::Validate;

#[derive(Envconfig, Validate, Clone)]
pub struct Config {
    /// Riot API key sent as `X-Riot-Token`
    #[envconfig(from = "RIOT_API_KEY")]
    #[validate(custom(function = "validate_api_key"))]
    pub api_key: String,

    /// Platform region, also used as the rate budget scope key
    #[envconfig(from = "RIOT_REGION", default = "euw1")]
    #[validate(custom(function = "validate_region"))]
    pub region: String,

    /// Overrides `https://{region}.api.riotgames.com`
    #[envconfig(from = "RIOT_API_BASE_URL", default = "")]
    #[validate(custom(function = "validate_base_url"))]
    pub base_url: String,

    /// Permits per window
    #[envconfig(from = "RATE_LIMIT_CAPACITY", default = "10")]
    #[validate(range(min = 1))]
    pub rate_limit_capacity: u32,

    /// Window length in milliseconds
    #[envconfig(from = "RATE_LIMIT_WINDOW_MS", default = "500")]
    #[validate(range(min = 1))]
    pub rate_limit_window_ms: u64,

    /// Fraction of the observed latency credited back at release
    #[envconfig(from = "ROUND_TRIP_CREDIT", default = "0.5")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub round_trip_credit: f64,

    /// Longest sleep between two budget checks while blocked
    #[envconfig(from = "GATE_POLL_INTERVAL_MS", default = "25")]
    #[validate(range(min = 1))]
    pub gate_poll_interval_ms: u64,

    /// Shared budget store; empty selects the in-process gate
    #[envconfig(from = "REDIS_URL", default = "")]
    #[validate(custom(function = "validate_redis_url"))]
    pub redis_url: String,

    #[envconfig(from = "REDIS_KEY_PREFIX", default = "riot:budget")]
    #[validate(length(min = 1))]
    pub redis_key_prefix: String,

    /// In-flight permits older than this are reclaimed from the shared store
    #[envconfig(from = "INFLIGHT_LEASE_SECS", default = "30")]
    #[validate(range(min = 1))]
    pub inflight_lease_secs: u64,

    /// Local capacity is divided by this while the shared store is down
    #[envconfig(from = "DEGRADED_CAPACITY_DIVISOR", default = "2")]
    #[validate(range(min = 1))]
    pub degraded_capacity_divisor: u32,

    #[envconfig(from = "HTTP_TIMEOUT_SECS", default = "10")]
    #[validate(range(min = 1))]
    pub http_timeout_secs: u64,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config::init_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from explicit key/value pairs, with the same
    /// defaults and validation as `from_env`
    pub fn from_map(values: &HashMap<String, String>) -> Result<Self> {
        let config = Config::init_from_hashmap(values)?;
        config.validate()?;
        Ok(config)
    }

    pub fn region(&self) -> Result<Region> {
        self.region.parse().map_err(ClientError::Configuration)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.gate_poll_interval_ms)
    }

    pub fn inflight_lease(&self) -> Duration {
        Duration::from_secs(self.inflight_lease_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn credit(&self) -> RoundTripCredit {
        RoundTripCredit::new(self.round_trip_credit)
    }

    pub fn uses_redis(&self) -> bool {
        !self.redis_url.is_empty()
    }

    /// Budget applied to every scope this client talks to
    pub fn budget_table(&self) -> BudgetTable {
        BudgetTable::new(self.rate_limit_capacity, self.window())
    }

    /// Budget used locally while the shared store cannot be reached
    pub fn degraded_budget_table(&self) -> BudgetTable {
        let capacity = (self.rate_limit_capacity / self.degraded_capacity_divisor).max(1);
        BudgetTable::new(capacity, self.window())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("region", &self.region)
            .field("base_url", &self.base_url)
            .field("rate_limit_capacity", &self.rate_limit_capacity)
            .field("rate_limit_window_ms", &self.rate_limit_window_ms)
            .field("round_trip_credit", &self.round_trip_credit)
            .field("gate_poll_interval_ms", &self.gate_poll_interval_ms)
            .field("redis_url", &self.redis_url)
            .field("redis_key_prefix", &self.redis_key_prefix)
            .field("inflight_lease_secs", &self.inflight_lease_secs)
            .field("degraded_capacity_divisor", &self.degraded_capacity_divisor)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("log_level", &self.log_level)
            .finish()
    }
}
