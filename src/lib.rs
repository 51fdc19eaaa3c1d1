pub mod chunk;
pub mod client;
pub mod config;
pub mod config_validator;
pub mod decode;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod gate;
pub mod metrics;
pub mod models;
pub mod outcome;
pub mod rate_budget;
pub mod redis;

pub use client::RiotClient;
pub use config::Config;
pub use endpoint::{Endpoint, EndpointCategory, Region, Routes};
pub use error::{AcquireCancelled, ClientError, Result, StoreError};
pub use executor::Executor;
pub use gate::{build_gate, CoordinatedGate, InProcessGate, Permit, PermitGuard, ThrottleGate};
pub use outcome::CallOutcome;
pub use rate_budget::{BudgetSnapshot, BudgetTable, RateBudget, RoundTripCredit};
