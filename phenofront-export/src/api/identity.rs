//! Caller identity
//!
//! Login happens upstream; the fronting proxy passes the authenticated user
//! name in `X-Remote-User`.

use axum::http::HeaderMap;

use super::ApiError;

pub const REMOTE_USER_HEADER: &str = "x-remote-user";

/// Name the login layer uses for an unauthenticated principal
pub const ANONYMOUS_USER: &str = "anonymousUser";

/// Authenticated identity of the caller, or `NotLoggedIn`
pub fn caller_identity(headers: &HeaderMap) -> Result<String, ApiError> {
    let identity = headers
        .get(REMOTE_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    if identity.is_empty() || identity == ANONYMOUS_USER {
        return Err(ApiError::NotLoggedIn);
    }
    Ok(identity.to_string())
}
