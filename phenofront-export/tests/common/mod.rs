//! Shared fixture: one experiment database plus image directory in a tempdir

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use phenofront_common::config::TomlConfig;
use phenofront_export::db::{schema, DatastoreHandle, DatastoreRouter};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const EXPERIMENT: &str = "maize";

/// PNG tiles use data format code 1
pub const PNG: i64 = 1;

pub struct Fixture {
    pub dir: TempDir,
    pub db_path: PathBuf,
    pub image_root: PathBuf,
    writer: SqlitePool,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("maize.db");
        let image_root = dir.path().join("images");
        std::fs::create_dir_all(&image_root).unwrap();

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        schema::create_tables(&writer).await.unwrap();

        Self {
            dir,
            db_path,
            image_root,
            writer,
        }
    }

    /// Insert a snapshot whose images live under `snap<id>/`
    pub async fn add_snapshot(&self, id: i64, captured_at: DateTime<Utc>, barcode: &str, label: &str) {
        sqlx::query(
            "INSERT INTO snapshot (id, capture_timestamp, barcode, measurement_label, path_prefix)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(captured_at.timestamp_millis())
        .bind(barcode)
        .bind(label)
        .bind(format!("snap{}", id))
        .execute(&self.writer)
        .await
        .unwrap();
    }

    /// Insert a PNG tile; a reference of 0 means no image
    pub async fn add_tile(&self, snapshot_id: i64, camera_label: &str, raw: i64, null: i64, frame: i64) {
        sqlx::query(
            "INSERT INTO tile (snapshot_id, camera_label, raw_image_ref, null_image_ref,
                               data_format, width, height, rotate_flip, frame)
             VALUES (?, ?, ?, ?, ?, 2454, 2056, 0, ?)",
        )
        .bind(snapshot_id)
        .bind(camera_label)
        .bind(raw)
        .bind(null)
        .bind(PNG)
        .bind(frame)
        .execute(&self.writer)
        .await
        .unwrap();
    }

    /// Store image bytes where the tile locator `snap<id>/<reference>` points
    pub fn write_image(&self, snapshot_id: i64, reference: i64, bytes: &[u8]) {
        let dir = self.image_root.join(format!("snap{}", snapshot_id));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(reference.to_string()), bytes).unwrap();
    }

    pub fn config_text(&self) -> String {
        format!(
            r#"
[experiments.{experiment}]
database_url = "sqlite://{db}"
image_root = "{images}"

[experiments.broken]
database_url = "sqlite://{db}"

[users.alice]
experiments = ["{experiment}", "broken"]

[users.bob]
experiments = ["setaria"]
"#,
            experiment = EXPERIMENT,
            db = self.db_path.display(),
            images = self.image_root.display(),
        )
    }

    pub fn config(&self) -> TomlConfig {
        TomlConfig::parse(&self.config_text()).unwrap()
    }

    /// Read-only handle on the fixture experiment
    pub async fn handle(&self) -> DatastoreHandle {
        DatastoreRouter::new(Arc::new(self.config()))
            .open(EXPERIMENT)
            .await
            .unwrap()
    }
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}
