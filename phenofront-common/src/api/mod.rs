//! API module for shared HTTP API functionality
//!
//! # Design Principle
//!
//! This module contains ONLY:
//! - Pure in-process state (download keys)
//! - Shared response types
//!
//! Each service wraps these with framework-specific handlers (Axum, etc.).

pub mod download_keys;
pub mod types;

pub use download_keys::{DownloadKeyStore, KeyLookup};
pub use types::{ErrorResponse, HealthResponse};
