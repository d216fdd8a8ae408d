//! Experiment datastore routing
//!
//! Every experiment lives in its own database. `resolve` turns an experiment
//! name into a [`ConnectionTarget`] using the `[experiments.<name>]` table of
//! the configuration; `bind` turns a target into a [`DatastoreHandle`] that
//! query functions take explicitly. Nothing here holds an "active" experiment:
//! the handle is the request's binding.
//!
//! Pools are cached per experiment, so concurrent requests for the same
//! experiment share connections while requests for different experiments
//! never see each other's target.

use phenofront_common::config::TomlConfig;
use phenofront_common::{Error, Result};
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::images::FsImageStore;

/// Connections per experiment pool
const MAX_CONNECTIONS: u32 = 4;

/// How long a query waits for a free connection
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where one experiment's data lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub experiment: String,
    pub database_url: String,
    pub image_root: PathBuf,
}

/// Shape of an `[experiments.<name>]` table
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExperimentEntry {
    database_url: String,
    image_root: String,
}

/// A bound experiment datastore, passed to every query
#[derive(Debug, Clone)]
pub struct DatastoreHandle {
    target: Arc<ConnectionTarget>,
    pool: SqlitePool,
}

impl DatastoreHandle {
    pub fn experiment(&self) -> &str {
        &self.target.experiment
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Image storage for this experiment
    pub fn image_store(&self) -> FsImageStore {
        FsImageStore::new(self.target.image_root.clone())
    }
}

/// Maps experiment names to datastores
pub struct DatastoreRouter {
    config: Arc<TomlConfig>,
    pools: RwLock<HashMap<String, (ConnectionTarget, SqlitePool)>>,
}

impl DatastoreRouter {
    pub fn new(config: Arc<TomlConfig>) -> Self {
        Self {
            config,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Connection target for `experiment`
    ///
    /// Fails with `Configuration` when the experiment has no entry or the
    /// entry is malformed (not a table, unknown keys, missing or empty
    /// fields, non-SQLite URL).
    pub fn resolve(&self, experiment: &str) -> Result<ConnectionTarget> {
        let table = self.config.experiment_table(experiment).ok_or_else(|| {
            Error::Configuration(format!("No datastore configured for experiment '{}'", experiment))
        })?;

        let entry: ExperimentEntry = table.clone().try_into().map_err(|e| {
            Error::Configuration(format!("Malformed entry for experiment '{}': {}", experiment, e))
        })?;

        if !entry.database_url.starts_with("sqlite:") {
            return Err(Error::Configuration(format!(
                "Experiment '{}' database_url must be a sqlite: URL",
                experiment
            )));
        }
        if entry.image_root.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "Experiment '{}' has an empty image_root",
                experiment
            )));
        }

        Ok(ConnectionTarget {
            experiment: experiment.to_string(),
            database_url: entry.database_url,
            image_root: PathBuf::from(entry.image_root),
        })
    }

    /// Handle for running queries against `target`
    ///
    /// Reuses the experiment's pool when the cached one points at the same
    /// database; otherwise opens a new read-only pool. Connection failures
    /// surface as `DatastoreUnavailable` and leave the cache untouched.
    pub async fn bind(&self, target: &ConnectionTarget) -> Result<DatastoreHandle> {
        {
            let pools = self.pools.read().await;
            if let Some((cached, pool)) = pools.get(&target.experiment) {
                if cached == target && !pool.is_closed() {
                    debug!("Reusing pool for experiment {}", target.experiment);
                    return Ok(DatastoreHandle {
                        target: Arc::new(cached.clone()),
                        pool: pool.clone(),
                    });
                }
            }
        }

        let pool = connect_readonly(&target.database_url).await?;
        info!("✓ Connected to datastore for experiment {} (read-only)", target.experiment);

        self.pools
            .write()
            .await
            .insert(target.experiment.clone(), (target.clone(), pool.clone()));

        Ok(DatastoreHandle {
            target: Arc::new(target.clone()),
            pool,
        })
    }

    /// `resolve` followed by `bind`
    pub async fn open(&self, experiment: &str) -> Result<DatastoreHandle> {
        let target = self.resolve(experiment)?;
        self.bind(&target).await
    }
}

/// Open a read-only pool
///
/// Uses SQLite read-only mode; a database file that does not exist is a
/// connectivity failure, never created.
async fn connect_readonly(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| Error::Configuration(format!("Invalid database_url '{}': {}", database_url, e)))?
        .read_only(true)
        .create_if_missing(false);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await?;

    Ok(pool)
}
