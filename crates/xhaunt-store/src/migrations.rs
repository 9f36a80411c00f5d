//! Schema migrations for the gateway database.
//!
//! Applied versions are tracked in a `_migrations` table so that running the
//! migrator on every start is cheap and idempotent.

use libsql::Connection;
use tracing::{debug, info, instrument};

use crate::{Database, StoreError};

/// Registered accounts, one row per bridged address.
pub const ACCOUNTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    address TEXT NOT NULL UNIQUE,           -- canonical bare JID
    username TEXT NOT NULL,                 -- foreign service login
    credential TEXT                         -- password or session token
);
"#;

/// Foreign contacts; deleting an account deletes its roster.
pub const ROSTER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS roster (
    address TEXT NOT NULL REFERENCES accounts(address) ON DELETE CASCADE,
    external_primary_id TEXT NOT NULL,
    external_secondary_id TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_roster_address ON roster(address);
CREATE INDEX IF NOT EXISTS idx_roster_external_id ON roster(external_primary_id, external_secondary_id);
"#;

/// A single versioned schema change.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number (must be unique and incrementing)
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

impl Migration {
    pub const fn new(version: i64, description: &'static str, sql: &'static str) -> Self {
        Self {
            version,
            description,
            sql,
        }
    }
}

/// Runs pending migrations in version order.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    /// Create a new migration runner with the given migrations
    pub fn new(migrations: Vec<Migration>) -> Self {
        let mut sorted = migrations;
        sorted.sort_by_key(|m| m.version);
        Self { migrations: sorted }
    }

    /// Runner for the gateway schema.
    pub fn gateway() -> Self {
        Self::new(vec![
            Migration::new(1, "accounts table", ACCOUNTS_SCHEMA),
            Migration::new(2, "roster table with cascading foreign key", ROSTER_SCHEMA),
        ])
    }

    /// Run all pending migrations on the database.
    ///
    /// Returns the versions applied by this call.
    #[instrument(skip_all, fields(db_name = %db.name()))]
    pub async fn run(&self, db: &Database) -> Result<Vec<i64>, StoreError> {
        let conn = db.connection();
        let conn = conn.lock().await;
        self.run_with_connection(&conn).await
    }

    async fn run_with_connection(&self, conn: &Connection) -> Result<Vec<i64>, StoreError> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            (),
        )
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("Failed to create migrations table: {}", e)))?;

        let applied = applied_versions(conn).await?;
        debug!("Already applied migrations: {:?}", applied);

        let mut newly_applied = Vec::new();
        for migration in &self.migrations {
            if applied.contains(&migration.version) {
                continue;
            }

            info!(
                "Applying migration v{}: {}",
                migration.version, migration.description
            );

            conn.execute_batch(migration.sql).await.map_err(|e| {
                StoreError::MigrationFailed(format!("Migration v{} failed: {}", migration.version, e))
            })?;

            conn.execute(
                "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
                (migration.version, migration.description),
            )
            .await
            .map_err(|e| {
                StoreError::MigrationFailed(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e
                ))
            })?;

            newly_applied.push(migration.version);
        }

        if newly_applied.is_empty() {
            debug!("No new migrations to apply");
        } else {
            info!("Applied {} new migrations", newly_applied.len());
        }

        Ok(newly_applied)
    }

    /// Highest applied version, or `None` on a fresh database.
    #[instrument(skip_all, fields(db_name = %db.name()))]
    pub async fn current_version(&self, db: &Database) -> Result<Option<i64>, StoreError> {
        let conn = db.connection();
        let conn = conn.lock().await;

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name='_migrations'",
                (),
            )
            .await?;
        if rows.next().await?.is_none() {
            return Ok(None);
        }

        Ok(applied_versions(&conn).await?.into_iter().max())
    }

    /// Whether any known migration has not been applied yet.
    pub async fn has_pending(&self, db: &Database) -> Result<bool, StoreError> {
        let current = self.current_version(db).await?.unwrap_or(0);
        Ok(self.migrations.iter().any(|m| m.version > current))
    }
}

async fn applied_versions(conn: &Connection) -> Result<Vec<i64>, StoreError> {
    let mut rows = conn
        .query("SELECT version FROM _migrations ORDER BY version", ())
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("Failed to query migrations: {}", e)))?;

    let mut versions = Vec::new();
    while let Some(row) = rows.next().await? {
        versions.push(row.get::<i64>(0)?);
    }
    Ok(versions)
}
