//! Experiment listing and selection

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{caller_identity, ApiError};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentsResponse {
    pub user: String,
    pub experiments: Vec<String>,
    pub active_experiment: Option<String>,
}

/// GET /api/experiments
pub async fn list_experiments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ExperimentsResponse>, ApiError> {
    let identity = caller_identity(&headers)?;

    Ok(Json(ExperimentsResponse {
        experiments: state.config.allowed_experiments(&identity),
        active_experiment: state.sessions.active(&identity),
        user: identity,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SelectionForm {
    #[serde(rename = "experimentName")]
    pub experiment_name: String,
}

/// POST /api/selection
///
/// The experiment must be allowed for the caller and its configuration must
/// resolve; only then does it become the caller's active experiment.
pub async fn select_experiment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<SelectionForm>,
) -> Result<(StatusCode, &'static str), ApiError> {
    let identity = caller_identity(&headers)?;
    let experiment = form.experiment_name.trim();

    if !state.config.is_allowed(&identity, experiment) {
        return Err(ApiError::ExperimentNotAllowed(experiment.to_string()));
    }
    state.datastores.resolve(experiment)?;

    state.sessions.select(&identity, experiment);
    info!("User {} selected experiment {}", identity, experiment);

    Ok((StatusCode::OK, "Experiment Loaded."))
}
