//! Experiment database layout
//!
//! Experiment databases are written by the imaging system; this service only
//! reads them. The DDL lives here so fixtures and tooling build databases the
//! query engine understands.
//!
//! `capture_timestamp` is UTC milliseconds since the Unix epoch. Image
//! reference columns use 0 or NULL for "no image".

use sqlx::SqlitePool;

pub const SNAPSHOT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS snapshot (
    id INTEGER PRIMARY KEY,
    capture_timestamp INTEGER NOT NULL,
    barcode TEXT NOT NULL,
    measurement_label TEXT NOT NULL DEFAULT '',
    path_prefix TEXT NOT NULL
)
"#;

pub const TILE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tile (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL REFERENCES snapshot(id),
    camera_label TEXT NOT NULL,
    raw_image_ref INTEGER,
    null_image_ref INTEGER,
    data_format INTEGER NOT NULL DEFAULT 0,
    width INTEGER,
    height INTEGER,
    rotate_flip INTEGER NOT NULL DEFAULT 0,
    frame INTEGER NOT NULL DEFAULT 0
)
"#;

const INDEXES: [&str; 3] = [
    "CREATE INDEX IF NOT EXISTS idx_snapshot_capture ON snapshot(capture_timestamp, id)",
    "CREATE INDEX IF NOT EXISTS idx_snapshot_barcode ON snapshot(barcode)",
    "CREATE INDEX IF NOT EXISTS idx_tile_snapshot ON tile(snapshot_id)",
];

/// Create the snapshot and tile tables on a writable pool
pub async fn create_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(SNAPSHOT_TABLE).execute(pool).await?;
    sqlx::query(TILE_TABLE).execute(pool).await?;
    for index in INDEXES {
        sqlx::query(index).execute(pool).await?;
    }
    Ok(())
}
