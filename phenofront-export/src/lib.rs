//! phenofront-export library
//!
//! Queries imaging snapshots from per-experiment databases and streams them
//! to clients as ZIP archives.

use axum::routing::{get, post};
use axum::Router;
use phenofront_common::api::DownloadKeyStore;
use phenofront_common::config::TomlConfig;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod archive;
pub mod db;
pub mod images;
pub mod session;

use db::DatastoreRouter;
use session::ActiveExperiments;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<TomlConfig>,
    pub datastores: Arc<DatastoreRouter>,
    pub download_keys: Arc<DownloadKeyStore>,
    pub sessions: Arc<ActiveExperiments>,
}

impl AppState {
    pub fn new(config: TomlConfig) -> Self {
        let config = Arc::new(config);
        let download_keys = DownloadKeyStore::new(
            Duration::from_secs(config.downloads.token_ttl_secs),
            config.downloads.max_tokens,
        );

        Self {
            datastores: Arc::new(DatastoreRouter::new(config.clone())),
            download_keys: Arc::new(download_keys),
            sessions: Arc::new(ActiveExperiments::new()),
            config,
        }
    }
}

/// Build application router
///
/// `/massdownload` authorizes by download key; every `/api` route needs the
/// caller identity header; `/health` needs nothing.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/experiments", get(api::list_experiments))
        .route("/api/selection", post(api::select_experiment))
        .route("/api/results", get(api::recent_results))
        .route("/api/filterresults", get(api::filter_results))
        .route("/api/querybuilder", get(api::query_builder))
        .route("/api/stream/:id", get(api::stream_snapshot))
        .route("/massdownload", get(api::mass_download))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
