use thiserror::Error;

/// Errors raised by the storage layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// More rows matched than the schema allows.
    #[error("Consistency violation for {address}: {rows} rows where at most one was expected")]
    Consistency { address: String, rows: u64 },

    #[error("Internal storage error: {0}")]
    Internal(String),
}

impl From<libsql::Error> for StoreError {
    fn from(e: libsql::Error) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}
