//! Snapshot listings for the caller's active experiment

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Duration;
use phenofront_common::time::{format_query_time, now, parse_query_time};
use phenofront_common::Snapshot;
use serde::{Deserialize, Serialize};

use super::{active_datastore, caller_identity, ApiError};
use crate::db::snapshots::{
    find_after, find_between, find_recent, list_barcodes, DEFAULT_WINDOW_DAYS,
};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SnapshotsResponse {
    pub experiment: String,
    pub description: String,
    pub count: usize,
    pub snapshots: Vec<Snapshot>,
}

impl SnapshotsResponse {
    fn new(experiment: &str, description: String, snapshots: Vec<Snapshot>) -> Self {
        Self {
            experiment: experiment.to_string(),
            description,
            count: snapshots.len(),
            snapshots,
        }
    }
}

/// GET /api/results
pub async fn recent_results(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SnapshotsResponse>, ApiError> {
    let identity = caller_identity(&headers)?;
    let ds = active_datastore(&state, &identity).await?;

    let limit = state.config.downloads.recent_limit;
    let snapshots = find_recent(&ds, limit).await?;

    Ok(Json(SnapshotsResponse::new(
        ds.experiment(),
        format!("{} most recent snapshots", limit),
        snapshots,
    )))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterResultsQuery {
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
}

/// GET /api/filterresults
///
/// Both bounds: that window. Start only: everything from start on.
/// Otherwise the default window ending at the end time, or now.
pub async fn filter_results(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterResultsQuery>,
) -> Result<Json<SnapshotsResponse>, ApiError> {
    let identity = caller_identity(&headers)?;
    let start = parse_query_time(&query.start_time)?;
    let end = parse_query_time(&query.end_time)?;

    let ds = active_datastore(&state, &identity).await?;

    let (description, snapshots) = match (start, end) {
        (Some(start), Some(end)) => (
            format!(
                "Snapshots between {} and {}",
                format_query_time(&start),
                format_query_time(&end)
            ),
            find_between(&ds, start, end).await?,
        ),
        (Some(start), None) => (
            format!("Snapshots after {}", format_query_time(&start)),
            find_after(&ds, start).await?,
        ),
        (None, end) => {
            let end = end.unwrap_or_else(now);
            let start = end - Duration::days(DEFAULT_WINDOW_DAYS);
            (
                format!(
                    "Snapshots between {} and {}",
                    format_query_time(&start),
                    format_query_time(&end)
                ),
                find_between(&ds, start, end).await?,
            )
        }
    };

    Ok(Json(SnapshotsResponse::new(ds.experiment(), description, snapshots)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBuilderResponse {
    pub download_key: String,
    pub active_experiment: String,
    pub example_barcodes: Vec<String>,
}

/// GET /api/querybuilder
///
/// Issues a download key bound to the caller, for use by `/massdownload`
/// from clients that carry no login session.
pub async fn query_builder(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<QueryBuilderResponse>, ApiError> {
    let identity = caller_identity(&headers)?;
    let ds = active_datastore(&state, &identity).await?;

    let example_barcodes = list_barcodes(&ds, state.config.downloads.example_barcodes).await?;
    let download_key = state.download_keys.issue(&identity);

    Ok(Json(QueryBuilderResponse {
        download_key,
        active_experiment: ds.experiment().to_string(),
        example_barcodes,
    }))
}
