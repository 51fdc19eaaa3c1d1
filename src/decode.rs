//! Response body decoding.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct DecodeError(String);

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError(err.to_string())
    }
}

/// Parse a body into a generic JSON tree
pub fn json_tree(body: &str) -> Result<Value, DecodeError> {
    Ok(serde_json::from_str(body)?)
}

/// Parse a body straight into `T`
pub fn typed<T: DeserializeOwned>(body: &str) -> Result<T, DecodeError> {
    Ok(serde_json::from_str(body)?)
}

/// Keep the body as text
pub fn raw(body: &str) -> Result<String, DecodeError> {
    Ok(body.to_string())
}

/// Map an already parsed tree onto `T`
pub fn from_tree<T: DeserializeOwned>(tree: Value) -> Result<T, DecodeError> {
    Ok(serde_json::from_value(tree)?)
}
