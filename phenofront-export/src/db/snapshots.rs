//! Snapshot queries
//!
//! All queries run against an explicitly bound [`DatastoreHandle`] and
//! return snapshots with their complete tile sets. Tiles keep database
//! insertion order within a snapshot.
//!
//! Ordering:
//! - `find_recent`: newest first, ties broken by id descending
//! - everything else: oldest first, ties broken by id ascending
//!
//! Failures are never retried here; a datastore error aborts the request.

use chrono::{DateTime, Duration, Utc};
use phenofront_common::models::{DataFormat, Dimensions, ImageRef, RotateFlip};
use phenofront_common::{Error, Result, Snapshot, Tile};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, info, warn};

use super::router::DatastoreHandle;

/// Length of the window used when a filter names no start and no end
pub const DEFAULT_WINDOW_DAYS: i64 = 3;

const SELECT_WITH_TILES: &str = "SELECT \
    s.id AS snapshot_id, \
    s.capture_timestamp AS capture_timestamp, \
    s.barcode AS barcode, \
    s.measurement_label AS measurement_label, \
    s.path_prefix AS path_prefix, \
    t.camera_label AS camera_label, \
    t.raw_image_ref AS raw_image_ref, \
    t.null_image_ref AS null_image_ref, \
    t.data_format AS data_format, \
    t.width AS width, \
    t.height AS height, \
    t.rotate_flip AS rotate_flip, \
    t.frame AS frame \
    FROM snapshot s LEFT JOIN tile t ON t.snapshot_id = s.id";

const ORDER_ASCENDING: &str = " ORDER BY s.capture_timestamp ASC, s.id ASC, t.id ASC";
const ORDER_DESCENDING: &str = " ORDER BY s.capture_timestamp DESC, s.id DESC, t.id ASC";

/// Criteria for the bulk download query
///
/// Build with [`SnapshotFilter::new`], which applies the default window
/// explicitly instead of relying on empty-string sentinels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFilter {
    pub start: DateTime<Utc>,
    /// Inclusive upper bound; `None` means open ended
    pub end: Option<DateTime<Utc>>,
    /// Barcodes must start with this text (case-sensitive)
    pub barcode_prefix: Option<String>,
    /// Measurement label must equal this text
    pub measurement_label: Option<String>,
}

impl SnapshotFilter {
    /// Resolve optional bounds into a concrete window
    ///
    /// - start and end: `[start, end]`
    /// - start only: `[start, ∞)`
    /// - end only: the three days ending at `end`
    /// - neither: the three days ending at `now`
    ///
    /// Blank barcode and label are treated as unset. A start after the end
    /// is rejected with `InvalidArgument`.
    pub fn new(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        barcode_prefix: Option<String>,
        measurement_label: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let (start, end) = match (start, end) {
            (Some(start), end) => (start, end),
            (None, Some(end)) => (end - Duration::days(DEFAULT_WINDOW_DAYS), Some(end)),
            (None, None) => (now - Duration::days(DEFAULT_WINDOW_DAYS), Some(now)),
        };

        if let Some(end) = end {
            check_window(&start, &end)?;
        }

        Ok(Self {
            start,
            end,
            barcode_prefix: non_blank(barcode_prefix),
            measurement_label: non_blank(measurement_label),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn check_window(start: &DateTime<Utc>, end: &DateTime<Utc>) -> Result<()> {
    if start > end {
        return Err(Error::InvalidArgument(format!(
            "start {} is after end {}",
            start, end
        )));
    }
    Ok(())
}

/// The `n` most recently captured snapshots, newest first
pub async fn find_recent(ds: &DatastoreHandle, n: u32) -> Result<Vec<Snapshot>> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_WITH_TILES);
    query
        .push(" WHERE s.id IN (SELECT id FROM snapshot ORDER BY capture_timestamp DESC, id DESC LIMIT ")
        .push_bind(i64::from(n))
        .push(")")
        .push(ORDER_DESCENDING);

    let rows = query.build().fetch_all(ds.pool()).await?;
    let snapshots = collect_snapshots(&rows, ds.experiment())?;
    info!(
        "Found {} most recent snapshots in experiment {}",
        snapshots.len(),
        ds.experiment()
    );
    Ok(snapshots)
}

/// Exactly one snapshot, or `NotFound`
pub async fn find_by_id(ds: &DatastoreHandle, id: i64) -> Result<Snapshot> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_WITH_TILES);
    query.push(" WHERE s.id = ").push_bind(id).push(ORDER_ASCENDING);

    let rows = query.build().fetch_all(ds.pool()).await?;
    collect_snapshots(&rows, ds.experiment())?
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(format!("snapshot {} in experiment {}", id, ds.experiment())))
}

/// Snapshots captured within `[start, end]`, oldest first
pub async fn find_between(
    ds: &DatastoreHandle,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Snapshot>> {
    check_window(&start, &end)?;

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_WITH_TILES);
    query
        .push(" WHERE s.capture_timestamp >= ")
        .push_bind(start.timestamp_millis())
        .push(" AND s.capture_timestamp <= ")
        .push_bind(end.timestamp_millis())
        .push(ORDER_ASCENDING);

    let rows = query.build().fetch_all(ds.pool()).await?;
    let snapshots = collect_snapshots(&rows, ds.experiment())?;
    info!(
        "Found {} snapshots between {} and {} in experiment {}",
        snapshots.len(),
        start,
        end,
        ds.experiment()
    );
    Ok(snapshots)
}

/// Snapshots captured at or after `start`, oldest first
pub async fn find_after(ds: &DatastoreHandle, start: DateTime<Utc>) -> Result<Vec<Snapshot>> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_WITH_TILES);
    query
        .push(" WHERE s.capture_timestamp >= ")
        .push_bind(start.timestamp_millis())
        .push(ORDER_ASCENDING);

    let rows = query.build().fetch_all(ds.pool()).await?;
    let snapshots = collect_snapshots(&rows, ds.experiment())?;
    info!(
        "Found {} snapshots after {} in experiment {}",
        snapshots.len(),
        start,
        ds.experiment()
    );
    Ok(snapshots)
}

/// Snapshots matching a bulk download filter, oldest first
pub async fn find_by_filter(ds: &DatastoreHandle, filter: &SnapshotFilter) -> Result<Vec<Snapshot>> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_WITH_TILES);
    query
        .push(" WHERE s.capture_timestamp >= ")
        .push_bind(filter.start.timestamp_millis());

    if let Some(end) = filter.end {
        query
            .push(" AND s.capture_timestamp <= ")
            .push_bind(end.timestamp_millis());
    }

    if let Some(prefix) = &filter.barcode_prefix {
        // substr compares characters exactly; LIKE would fold ASCII case
        let prefix_len = prefix.chars().count() as i64;
        query
            .push(" AND substr(s.barcode, 1, ")
            .push_bind(prefix_len)
            .push(") = ")
            .push_bind(prefix.clone());
    }

    if let Some(label) = &filter.measurement_label {
        query
            .push(" AND s.measurement_label = ")
            .push_bind(label.clone());
    }

    query.push(ORDER_ASCENDING);
    debug!("Snapshot filter query: {}", query.sql());

    let rows = query.build().fetch_all(ds.pool()).await?;
    let snapshots = collect_snapshots(&rows, ds.experiment())?;
    info!(
        "Found {} snapshots matching {:?} in experiment {}",
        snapshots.len(),
        filter,
        ds.experiment()
    );
    Ok(snapshots)
}

/// Up to `limit` distinct plant barcodes, sorted
pub async fn list_barcodes(ds: &DatastoreHandle, limit: u32) -> Result<Vec<String>> {
    let barcodes = sqlx::query_scalar::<_, String>(
        "SELECT DISTINCT barcode FROM snapshot ORDER BY barcode ASC LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(ds.pool())
    .await?;
    Ok(barcodes)
}

/// Fold joined snapshot/tile rows into snapshots
///
/// Rows of one snapshot are adjacent because every query orders by
/// capture time and id first.
fn collect_snapshots(rows: &[SqliteRow], experiment: &str) -> Result<Vec<Snapshot>> {
    let mut snapshots: Vec<Snapshot> = Vec::new();

    for row in rows {
        let id: i64 = row.try_get("snapshot_id")?;
        let path_prefix: String = row.try_get("path_prefix")?;

        if snapshots.last().map(|s| s.id) != Some(id) {
            let captured_ms: i64 = row.try_get("capture_timestamp")?;
            snapshots.push(Snapshot {
                id,
                captured_at: decode_time(captured_ms)?,
                barcode: row.try_get("barcode")?,
                measurement_label: row.try_get("measurement_label")?,
                experiment: experiment.to_string(),
                tiles: Vec::new(),
            });
        }

        if let Some(tile) = decode_tile(row, id, &path_prefix)? {
            if let Some(current) = snapshots.last_mut() {
                current.tiles.push(tile);
            }
        }
    }

    Ok(snapshots)
}

fn decode_time(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        Error::DatastoreUnavailable(format!("capture_timestamp {} out of range", millis))
    })
}

/// Tile half of a joined row; `None` when the snapshot has no tiles
fn decode_tile(row: &SqliteRow, snapshot_id: i64, path_prefix: &str) -> Result<Option<Tile>> {
    let camera_label: Option<String> = row.try_get("camera_label")?;
    let Some(camera_label) = camera_label else {
        return Ok(None);
    };

    let rotate_code: i64 = row.try_get("rotate_flip")?;
    let rotate_flip = i32::try_from(rotate_code)
        .ok()
        .and_then(RotateFlip::from_code)
        .unwrap_or_else(|| {
            warn!(
                "Snapshot {} tile {} has unknown rotate/flip code {}, using none",
                snapshot_id, camera_label, rotate_code
            );
            RotateFlip::RotateNoneFlipNone
        });

    let frame_value: i64 = row.try_get("frame")?;
    let frame = u32::try_from(frame_value).unwrap_or_else(|_| {
        warn!(
            "Snapshot {} tile {} has invalid frame {}, using 0",
            snapshot_id, camera_label, frame_value
        );
        0
    });

    let format_code: i64 = row.try_get("data_format")?;
    let data_format = DataFormat::from_code(i32::try_from(format_code).unwrap_or(-1));

    Ok(Some(Tile {
        raw_image: ImageRef::from_column(row.try_get("raw_image_ref")?),
        null_image: ImageRef::from_column(row.try_get("null_image_ref")?),
        data_format,
        dimensions: Dimensions::from_columns(row.try_get("width")?, row.try_get("height")?),
        rotate_flip,
        frame,
        path_prefix: path_prefix.to_string(),
        camera_label,
    }))
}
