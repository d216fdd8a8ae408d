//! # Phenofront Common Library
//!
//! Shared code for the Phenofront services including:
//! - Snapshot and tile records
//! - Error taxonomy
//! - Configuration loading
//! - Download key store and API response types
//! - Query time parsing

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod time;

pub use error::{Error, Result};
pub use models::{ChannelFilter, Snapshot, Tile};
