//! libSQL database handle shared by the account and roster stores.
//!
//! A [`Database`] owns exactly one connection. Every statement the gateway
//! issues goes through it, which keeps in-memory databases coherent and makes
//! each store call a single serialised statement against the engine.

use libsql::{Connection, Database as LibSqlDatabase};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::StoreError;

/// Where the gateway database lives.
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    /// Path to the database file (None for in-memory)
    pub path: Option<PathBuf>,
    /// Optional remote URL for an embedded replica
    pub sync_url: Option<String>,
    /// Auth token for `sync_url`
    pub auth_token: Option<String>,
}

/// Wrapper around a libsql database and its single shared connection.
#[derive(Clone)]
pub struct Database {
    db: Arc<LibSqlDatabase>,
    conn: Arc<Mutex<Connection>>,
    name: String,
    replica: bool,
}

impl Database {
    /// Open the database described by `config`.
    pub async fn open(name: &str, config: &DatabaseConfig) -> Result<Self, StoreError> {
        match (&config.path, &config.sync_url, &config.auth_token) {
            (Some(path), Some(url), Some(token)) => {
                Self::open_with_sync(name, path, url, token).await
            }
            (Some(_), Some(_), None) => Err(StoreError::ConnectionFailed(
                "sync_url requires an auth_token".to_string(),
            )),
            (Some(path), None, _) => Self::open_local(name, path).await,
            (None, Some(_), _) => Err(StoreError::ConnectionFailed(
                "sync_url requires a local replica path".to_string(),
            )),
            (None, None, _) => Self::in_memory(name).await,
        }
    }

    /// Create a new in-memory database
    #[instrument(skip_all)]
    pub async fn in_memory(name: &str) -> Result<Self, StoreError> {
        debug!("Creating in-memory database: {}", name);
        let db = libsql::Builder::new_local(":memory:").build().await?;
        Self::with_connection(db, name).await
    }

    /// Create or open a local file-based database
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open_local(name: &str, path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;

        let db = libsql::Builder::new_local(path).build().await?;

        info!("Opened database '{}' at {:?}", name, path);
        Self::with_connection(db, name).await
    }

    /// Open an embedded replica synced with a remote libSQL server
    #[instrument(skip_all, fields(name = %name))]
    pub async fn open_with_sync(
        name: &str,
        local_path: impl AsRef<Path>,
        sync_url: &str,
        auth_token: &str,
    ) -> Result<Self, StoreError> {
        let path = local_path.as_ref();
        ensure_parent_dir(path)?;

        let db = libsql::Builder::new_remote_replica(
            path,
            sync_url.to_string(),
            auth_token.to_string(),
        )
        .build()
        .await?;

        info!("Opened synced database '{}' at {:?}", name, path);
        let mut database = Self::with_connection(db, name).await?;
        database.replica = true;
        Ok(database)
    }

    async fn with_connection(db: LibSqlDatabase, name: &str) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        // Off by default in SQLite; the roster cascade depends on it.
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| StoreError::ConnectionFailed(format!("Failed to enable foreign keys: {}", e)))?;

        Ok(Self {
            db: Arc::new(db),
            conn: Arc::new(Mutex::new(conn)),
            name: name.to_string(),
            replica: false,
        })
    }

    /// The shared connection used by all stores on this database.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Get the database name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is an embedded replica of a remote database.
    pub fn is_replica(&self) -> bool {
        self.replica
    }

    /// Pull the remote's frames into the embedded replica. A no-op for
    /// local and in-memory databases.
    #[instrument(skip_all, fields(name = %self.name))]
    pub async fn sync(&self) -> Result<(), StoreError> {
        if !self.replica {
            return Ok(());
        }
        debug!("Syncing database '{}'", self.name);
        self.db.sync().await?;
        Ok(())
    }

    /// Check if the database is healthy by executing a simple query
    #[instrument(skip_all, fields(name = %self.name))]
    pub async fn health_check(&self) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        match conn.query("SELECT 1", ()).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Database health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::ConnectionFailed(format!("Failed to create database directory: {}", e))
            })?;
        }
    }
    Ok(())
}
