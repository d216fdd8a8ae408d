//! Database access layer for phenofront-export
//!
//! All experiment connections are read-only.

pub mod router;
pub mod schema;
pub mod snapshots;

pub use router::{ConnectionTarget, DatastoreHandle, DatastoreRouter};
pub use snapshots::SnapshotFilter;
