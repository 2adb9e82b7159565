use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::api::ApiError;

/// Check the bearer token against the configured key. With no key configured
/// every request is allowed.
pub fn verify_bearer(headers: &HeaderMap, expected_key: Option<&str>) -> Result<(), ApiError> {
    let Some(expected_key) = expected_key else {
        return Ok(());
    };

    let token = extract_bearer_token(headers)?;
    if token.trim() != expected_key {
        return Err(ApiError::Unauthorized("Invalid API key"));
    }

    Ok(())
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let Some(raw_header) = headers.get(AUTHORIZATION) else {
        return Err(ApiError::Unauthorized("Missing Authorization header"));
    };

    let Ok(value) = raw_header.to_str() else {
        return Err(ApiError::Unauthorized("Invalid Authorization header"));
    };

    let Some(token) = value.strip_prefix("Bearer ") else {
        return Err(ApiError::Unauthorized("Authorization must use Bearer token"));
    };

    Ok(token.to_string())
}
