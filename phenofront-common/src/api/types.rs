//! Shared API response types
//!
//! Bodies returned by every Phenofront HTTP service, independent of the web
//! framework that renders them.

use serde::{Deserialize, Serialize};

/// Error body: `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Health check body
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_serialization() {
        let body = serde_json::to_value(ErrorResponse::new("Invalid download key")).unwrap();
        assert_eq!(body, serde_json::json!({"error": "Invalid download key"}));
    }
}
