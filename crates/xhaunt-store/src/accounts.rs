//! libSQL implementation of [`AccountStore`].

use async_trait::async_trait;
use libsql::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, warn};

use crate::migrations::ACCOUNTS_SCHEMA;
use crate::{Account, AccountStore, Database, StoreError};

/// Account table backed by libSQL.
#[derive(Clone)]
pub struct LibSqlAccountStore {
    conn: Arc<Mutex<Connection>>,
    initialized: Arc<AtomicBool>,
}

impl LibSqlAccountStore {
    pub fn new(db: &Database) -> Self {
        Self::from_shared(db.connection())
    }

    /// Create from an Arc<Mutex<Connection>> shared with other stores.
    pub fn from_shared(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl AccountStore for LibSqlAccountStore {
    #[instrument(skip(self))]
    async fn create_schema_if_needed(&self) -> Result<(), StoreError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let conn = self.conn.lock().await;
        conn.execute_batch(ACCOUNTS_SCHEMA).await?;

        self.initialized.store(true, Ordering::Release);
        debug!("Account schema initialized");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find(&self, address: &str) -> Result<Option<Account>, StoreError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT username, credential FROM accounts WHERE address = ?1",
                [address],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let account = Account {
            address: address.to_string(),
            username: row.get(0)?,
            credential: row.get(1).ok(),
        };

        let mut rows_seen = 1u64;
        while rows.next().await?.is_some() {
            rows_seen += 1;
        }
        if rows_seen > 1 {
            error!(address = %address, rows = rows_seen, "Duplicate accounts for one address");
            return Err(StoreError::Consistency {
                address: address.to_string(),
                rows: rows_seen,
            });
        }

        Ok(Some(account))
    }

    #[instrument(skip(self, credential))]
    async fn upsert(
        &self,
        address: &str,
        username: &str,
        credential: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        // DO UPDATE keeps the existing row, so the roster is not cascaded away
        // on re-registration.
        conn.execute(
            r#"
            INSERT INTO accounts (address, username, credential)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(address) DO UPDATE SET
                username = excluded.username,
                credential = excluded.credential
            "#,
            (address, username, credential),
        )
        .await?;

        debug!(address = %address, "Account stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, address: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute("DELETE FROM accounts WHERE address = ?1", [address])
            .await?;

        match removed {
            0 => debug!(address = %address, "No account to remove"),
            1 => debug!(address = %address, "Account removed"),
            n => error!(address = %address, rows = n, "Removed more than one account for one address"),
        }
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let mut rows = conn.query("SELECT COUNT(*) FROM accounts", ()).await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? as u64),
            None => Ok(0),
        }
    }

    #[instrument(skip(self))]
    async fn credential(&self, address: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT credential FROM accounts WHERE address = ?1", [address])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0).ok()),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, credential))]
    async fn set_credential(&self, address: &str, credential: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE accounts SET credential = ?2 WHERE address = ?1",
                (address, credential),
            )
            .await?;

        match updated {
            0 => warn!(address = %address, "No account to store credential for"),
            1 => debug!(address = %address, "Credential updated"),
            n => error!(address = %address, rows = n, "Updated credential on more than one account"),
        }
        Ok(updated)
    }
}
