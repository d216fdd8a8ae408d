//! Streamed ZIP downloads
//!
//! `/massdownload` serves non-interactive clients (wget, scripts) that carry a
//! download key instead of a login session. Every check runs before the
//! response starts; once headers are out, failures can only end the stream.

use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use phenofront_common::api::KeyLookup;
use phenofront_common::time::{now, parse_query_time};
use phenofront_common::{ChannelFilter, Snapshot};
use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use super::{active_datastore, caller_identity, ApiError};
use crate::archive::{spawn_archive_stream, ArchiveBuilder};
use crate::db::snapshots::{find_by_filter, find_by_id};
use crate::db::{DatastoreHandle, SnapshotFilter};
use crate::images::ImageResolver;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MassDownloadQuery {
    pub download_key: Option<String>,
    pub active_experiment: Option<String>,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    pub plant_barcode: Option<String>,
    pub measurement_label: Option<String>,
    #[serde(default, deserialize_with = "checkbox_flag")]
    pub vis: bool,
    #[serde(default, deserialize_with = "checkbox_flag")]
    pub nir: bool,
    #[serde(default, deserialize_with = "checkbox_flag")]
    pub fluo: bool,
}

/// Flags as HTML forms and scripts send them: `true`/`on`/`yes`/`1` or
/// `false`/`off`/`no`/`0`, any case. An empty value is off.
fn checkbox_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlagVisitor;

    impl<'de> Visitor<'de> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("one of true, on, yes, 1, false, off, no, 0")
        }

        fn visit_bool<E: de::Error>(self, value: bool) -> Result<bool, E> {
            Ok(value)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<bool, E> {
            match value {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(E::invalid_value(Unexpected::Unsigned(value), &self)),
            }
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<bool, E> {
            match value.trim().to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Ok(true),
                "false" | "off" | "no" | "0" | "" => Ok(false),
                _ => Err(E::invalid_value(Unexpected::Str(value), &self)),
            }
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}

impl MassDownloadQuery {
    fn channels(&self) -> ChannelFilter {
        ChannelFilter {
            visible: self.vis,
            near_infrared: self.nir,
            fluorescent: self.fluo,
        }
    }
}

/// GET /massdownload
pub async fn mass_download(
    State(state): State<AppState>,
    query: Result<Query<MassDownloadQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;

    // A blank key is as good as none
    let key = query.download_key.as_deref().filter(|k| !k.trim().is_empty());
    let identity = match state.download_keys.lookup(key) {
        KeyLookup::Found(identity) => identity,
        KeyLookup::Absent => return Err(ApiError::MissingDownloadKey),
        KeyLookup::Unresolvable => return Err(ApiError::InvalidDownloadKey),
    };

    let experiment = query.active_experiment.as_deref().unwrap_or_default().trim();
    if experiment.is_empty() || !state.config.is_allowed(&identity, experiment) {
        return Err(ApiError::InvalidExperimentSelection(experiment.to_string()));
    }
    let target = state.datastores.resolve(experiment)?;

    let filter = SnapshotFilter::new(
        parse_query_time(&query.start_time)?,
        parse_query_time(&query.end_time)?,
        query.plant_barcode.clone(),
        query.measurement_label.clone(),
        now(),
    )?;

    let ds = state.datastores.bind(&target).await?;
    let snapshots = find_by_filter(&ds, &filter).await?;

    let key = key.unwrap_or_default();
    info!(
        "User {} downloading {} snapshots from experiment {}",
        identity,
        snapshots.len(),
        experiment
    );
    Ok(archive_response(
        &ds,
        snapshots,
        query.channels(),
        &format!("Snapshots{}.zip", key),
    ))
}

/// GET /api/stream/:id
///
/// One snapshot of the caller's active experiment, every channel included.
pub async fn stream_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let identity = caller_identity(&headers)?;
    let ds = active_datastore(&state, &identity).await?;
    let snapshot = find_by_id(&ds, id).await?;

    info!(
        "User {} downloading snapshot {} from experiment {}",
        identity,
        id,
        ds.experiment()
    );
    Ok(archive_response(
        &ds,
        vec![snapshot],
        ChannelFilter::all(),
        &format!("Snapshot{}.zip", id),
    ))
}

fn archive_response(
    ds: &DatastoreHandle,
    snapshots: Vec<Snapshot>,
    filter: ChannelFilter,
    filename: &str,
) -> Response {
    let resolver = ImageResolver::new(Arc::new(ds.image_store()));
    let stream = spawn_archive_stream(
        ArchiveBuilder::new(resolver),
        snapshots,
        ds.experiment().to_string(),
        filter,
    );

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_flags_default_off() {
        let query: MassDownloadQuery =
            serde_json::from_value(serde_json::json!({"downloadKey": "abc"})).unwrap();
        assert_eq!(query.channels(), ChannelFilter::default());
        assert_eq!(query.start_time, "");
    }

    #[test]
    fn test_channel_flags_accept_checkbox_values() {
        let query: MassDownloadQuery = serde_json::from_value(serde_json::json!({
            "vis": "on",
            "nir": "YES",
            "fluo": "0",
        }))
        .unwrap();
        assert!(query.vis);
        assert!(query.nir);
        assert!(!query.fluo);

        let query: MassDownloadQuery =
            serde_json::from_value(serde_json::json!({"vis": true, "nir": 1, "fluo": "off"}))
                .unwrap();
        assert!(query.vis && query.nir && !query.fluo);
    }

    #[test]
    fn test_channel_flag_rejects_other_words() {
        let result: Result<MassDownloadQuery, _> =
            serde_json::from_value(serde_json::json!({"vis": "maybe"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_channel_flags_map_to_filter() {
        let query = MassDownloadQuery {
            vis: true,
            fluo: true,
            ..Default::default()
        };
        let filter = query.channels();
        assert!(filter.visible);
        assert!(!filter.near_infrared);
        assert!(filter.fluorescent);
    }
}
