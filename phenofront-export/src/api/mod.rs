//! HTTP API handlers for phenofront-export

pub mod download;
pub mod error;
pub mod experiments;
pub mod health;
pub mod identity;
pub mod results;

pub use download::{mass_download, stream_snapshot};
pub use error::ApiError;
pub use experiments::{list_experiments, select_experiment};
pub use health::health_routes;
pub use identity::caller_identity;
pub use results::{filter_results, query_builder, recent_results};

use crate::db::DatastoreHandle;
use crate::AppState;

/// Datastore of the experiment the caller selected
async fn active_datastore(state: &AppState, identity: &str) -> Result<DatastoreHandle, ApiError> {
    let experiment = state
        .sessions
        .active(identity)
        .ok_or(ApiError::NoActiveExperiment)?;
    Ok(state.datastores.open(&experiment).await?)
}
