use thiserror::Error;
use std::time::Duration;

/// Errors that cross the client boundary.
///
/// Rate limiting, transient network failures and server errors never show up
/// here: the executor absorbs them in its retry loop.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Undecodable response from {endpoint}: {reason}")]
    Terminal { endpoint: String, reason: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Returned by `ThrottleGate::acquire` when the caller's cancellation token
/// fires before a permit is granted. No slot is held when this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Permit acquisition cancelled")]
pub struct AcquireCancelled;

impl From<AcquireCancelled> for ClientError {
    fn from(_: AcquireCancelled) -> Self {
        ClientError::Cancelled
    }
}

/// Failures of the shared budget store behind a coordinated gate.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Budget store unavailable: {0}")]
    Unavailable(String),

    /// The call may still have been applied by the store
    #[error("Budget store did not answer within {0:?}")]
    Timeout(Duration),
}

impl From<envconfig::Error> for ClientError {
    fn from(err: envconfig::Error) -> Self {
        ClientError::Configuration(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ClientError {
    fn from(err: validator::ValidationErrors) -> Self {
        ClientError::Configuration(err.to_string())
    }
}
