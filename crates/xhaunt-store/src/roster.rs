//! libSQL implementation of [`RosterStore`].

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use libsql::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::migrations::ROSTER_SCHEMA;
use crate::{Database, ExternalId, ExternalIdStream, RosterStore, StoreError};

/// Rows fetched per round trip while enumerating.
const PAGE_SIZE: i64 = 256;

/// Roster table backed by libSQL.
#[derive(Clone)]
pub struct LibSqlRosterStore {
    conn: Arc<Mutex<Connection>>,
    initialized: Arc<AtomicBool>,
}

impl LibSqlRosterStore {
    pub fn new(db: &Database) -> Self {
        Self::from_shared(db.connection())
    }

    pub fn from_shared(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct Cursor {
    conn: Arc<Mutex<Connection>>,
    address: String,
    after_rowid: i64,
    exhausted: bool,
}

async fn fetch_page(
    conn: &Mutex<Connection>,
    address: &str,
    after_rowid: i64,
) -> Result<Vec<(i64, ExternalId)>, StoreError> {
    let conn = conn.lock().await;
    let mut rows = conn
        .query(
            r#"
            SELECT rowid, external_primary_id, external_secondary_id
            FROM roster
            WHERE address = ?1 AND rowid > ?2
            ORDER BY rowid
            LIMIT ?3
            "#,
            (address, after_rowid, PAGE_SIZE),
        )
        .await?;

    let mut page = Vec::new();
    while let Some(row) = rows.next().await? {
        let rowid: i64 = row.get(0)?;
        page.push((rowid, ExternalId::new(row.get::<String>(1)?, row.get::<String>(2)?)));
    }
    Ok(page)
}

#[async_trait]
impl RosterStore for LibSqlRosterStore {
    #[instrument(skip(self))]
    async fn create_schema_if_needed(&self) -> Result<(), StoreError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let conn = self.conn.lock().await;
        conn.execute_batch(ROSTER_SCHEMA).await?;

        self.initialized.store(true, Ordering::Release);
        debug!("Roster schema initialized");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn add(&self, address: &str, id: &ExternalId) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let inserted = conn
            .execute(
                "INSERT INTO roster (address, external_primary_id, external_secondary_id) VALUES (?1, ?2, ?3)",
                (address, id.primary_id.as_str(), id.secondary_id.as_str()),
            )
            .await?;

        if inserted != 1 {
            warn!(address = %address, count = inserted, "Unexpected row count adding roster entry");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, address: &str, id: &ExternalId) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                r#"
                DELETE FROM roster
                WHERE address = ?1 AND external_primary_id = ?2 AND external_secondary_id = ?3
                "#,
                (address, id.primary_id.as_str(), id.secondary_id.as_str()),
            )
            .await?;

        if removed != 1 {
            warn!(address = %address, count = removed, "Unexpected row count removing roster entry");
        }
        Ok(())
    }

    fn enumerate(&self, address: &str) -> ExternalIdStream {
        let cursor = Cursor {
            conn: Arc::clone(&self.conn),
            address: address.to_string(),
            after_rowid: 0,
            exhausted: false,
        };

        stream::try_unfold(cursor, |mut cursor| async move {
            if cursor.exhausted {
                return Ok::<_, StoreError>(None);
            }

            let page = fetch_page(&cursor.conn, &cursor.address, cursor.after_rowid).await?;
            let Some((last_rowid, _)) = page.last() else {
                return Ok(None);
            };
            cursor.after_rowid = *last_rowid;
            cursor.exhausted = (page.len() as i64) < PAGE_SIZE;

            let ids: Vec<Result<ExternalId, StoreError>> =
                page.into_iter().map(|(_, id)| Ok(id)).collect();
            Ok(Some((stream::iter(ids), cursor)))
        })
        .try_flatten()
        .boxed()
    }

    #[instrument(skip(self))]
    async fn count(&self, address: Option<&str>) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let mut rows = match address {
            Some(address) => {
                conn.query("SELECT COUNT(*) FROM roster WHERE address = ?1", [address])
                    .await?
            }
            None => conn.query("SELECT COUNT(*) FROM roster", ()).await?,
        };

        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? as u64),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccountStore, LibSqlAccountStore, MigrationRunner};
    use std::collections::HashSet;

    async fn create_test_stores() -> (LibSqlAccountStore, LibSqlRosterStore) {
        let db = Database::in_memory("test").await.unwrap();
        MigrationRunner::gateway().run(&db).await.unwrap();
        (LibSqlAccountStore::new(&db), LibSqlRosterStore::new(&db))
    }

    #[tokio::test]
    async fn test_add_and_count() {
        let (accounts, roster) = create_test_stores().await;
        accounts.upsert("alice@example.org", "alice", None).await.unwrap();

        roster
            .add("alice@example.org", &ExternalId::new("gaia1", "chat1"))
            .await
            .unwrap();
        roster
            .add("alice@example.org", &ExternalId::new("gaia2", "chat2"))
            .await
            .unwrap();

        assert_eq!(roster.count(Some("alice@example.org")).await.unwrap(), 2);
        assert_eq!(roster.count(Some("bob@example.org")).await.unwrap(), 0);
        assert_eq!(roster.count(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_add_requires_account() {
        let (_accounts, roster) = create_test_stores().await;

        let result = roster
            .add("ghost@example.org", &ExternalId::new("gaia", "chat"))
            .await;
        assert!(result.is_err());
        assert_eq!(roster.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_entry() {
        let (accounts, roster) = create_test_stores().await;
        accounts.upsert("alice@example.org", "alice", None).await.unwrap();
        let contact = ExternalId::new("gaia1", "chat1");

        roster.add("alice@example.org", &contact).await.unwrap();
        roster.remove("alice@example.org", &contact).await.unwrap();
        // Missing rows are logged, not reported.
        roster.remove("alice@example.org", &contact).await.unwrap();

        assert_eq!(roster.count(Some("alice@example.org")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_account_removal_cascades() {
        let (accounts, roster) = create_test_stores().await;
        accounts.upsert("alice@example.org", "alice", None).await.unwrap();
        accounts.upsert("bob@example.org", "bob", None).await.unwrap();

        for i in 0..5 {
            roster
                .add("alice@example.org", &ExternalId::new(format!("g{i}"), format!("c{i}")))
                .await
                .unwrap();
        }
        roster
            .add("bob@example.org", &ExternalId::new("g", "c"))
            .await
            .unwrap();

        assert_eq!(accounts.remove("alice@example.org").await.unwrap(), 1);
        assert_eq!(roster.count(Some("alice@example.org")).await.unwrap(), 0);
        assert_eq!(roster.count(Some("bob@example.org")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reregistration_keeps_roster() {
        let (accounts, roster) = create_test_stores().await;
        accounts.upsert("alice@example.org", "alice", Some("pw1")).await.unwrap();
        roster
            .add("alice@example.org", &ExternalId::new("g", "c"))
            .await
            .unwrap();

        accounts.upsert("alice@example.org", "alice", Some("pw2")).await.unwrap();

        assert_eq!(roster.count(Some("alice@example.org")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enumerate_spans_pages_and_restarts() {
        let (accounts, roster) = create_test_stores().await;
        accounts.upsert("alice@example.org", "alice", None).await.unwrap();
        accounts.upsert("bob@example.org", "bob", None).await.unwrap();

        let total = PAGE_SIZE as usize + 10;
        for i in 0..total {
            roster
                .add("alice@example.org", &ExternalId::new(format!("g{i}"), format!("c{i}")))
                .await
                .unwrap();
        }
        roster
            .add("bob@example.org", &ExternalId::new("bob-g", "bob-c"))
            .await
            .unwrap();

        let first: HashSet<ExternalId> = roster
            .enumerate("alice@example.org")
            .try_collect()
            .await
            .unwrap();
        assert_eq!(first.len(), total);
        assert!(first.contains(&ExternalId::new("g0", "c0")));
        assert!(!first.contains(&ExternalId::new("bob-g", "bob-c")));

        let second: Vec<ExternalId> = roster
            .enumerate("alice@example.org")
            .try_collect()
            .await
            .unwrap();
        assert_eq!(second.len(), total);
    }

    #[tokio::test]
    async fn test_enumerate_empty_roster() {
        let (_accounts, roster) = create_test_stores().await;

        let ids: Vec<ExternalId> = roster
            .enumerate("nobody@example.org")
            .try_collect()
            .await
            .unwrap();
        assert!(ids.is_empty());
    }
}
