use std::borrow::Cow;
use validator::ValidationError;

fn invalid(code: &'static str, message: String) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Owned(message))
}

/// Validates a Redis URL. An empty URL is allowed and selects the
/// in-process gate.
pub fn validate_redis_url(url: &str) -> Result<(), ValidationError> {
    if url.is_empty() {
        return Ok(());
    }

    if !url.starts_with("redis://") && !url.starts_with("rediss://") {
        return Err(invalid(
            "redis_url",
            "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
        ));
    }

    Ok(())
}

/// Validates the API base URL override. Empty means the public Riot hosts.
pub fn validate_base_url(url: &str) -> Result<(), ValidationError> {
    if url.is_empty() {
        return Ok(());
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(invalid(
            "base_url",
            "API base URL must start with 'http://' or 'https://'".to_string(),
        ));
    }

    if url.ends_with('/') {
        return Err(invalid(
            "base_url",
            "API base URL must not end with '/'".to_string(),
        ));
    }

    Ok(())
}

/// Validates the credential. Whitespace-only keys are rejected as missing.
pub fn validate_api_key(key: &str) -> Result<(), ValidationError> {
    if key.trim().is_empty() {
        return Err(invalid(
            "api_key",
            "RIOT_API_KEY must be set to your Riot API key".to_string(),
        ));
    }

    Ok(())
}

/// Validates the region name against the known platform list
pub fn validate_region(region: &str) -> Result<(), ValidationError> {
    region
        .parse::<crate::endpoint::Region>()
        .map(|_| ())
        .map_err(|e| invalid("region", e))
}
