use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::{
    AccountStore, Database, LibSqlAccountStore, LibSqlRosterStore, MemoryStore, MigrationRunner,
    RosterStore, StoreError, TokenCache,
};

/// The stores a running gateway works against.
///
/// Opened once at startup, handed explicitly to the registration controller,
/// and closed at shutdown.
#[derive(Clone)]
pub struct GatewayContext {
    accounts: Arc<dyn AccountStore>,
    roster: Arc<dyn RosterStore>,
    database: Option<Database>,
}

impl GatewayContext {
    /// Migrate `db` and build libSQL stores on its connection.
    ///
    /// An embedded replica is synced first so migrations run against the
    /// remote's current schema.
    #[instrument(skip_all, fields(db_name = %db.name()))]
    pub async fn open(db: Database) -> Result<Self, StoreError> {
        if db.is_replica() {
            db.sync().await?;
            info!("Replica synced before migration");
        }
        MigrationRunner::gateway().run(&db).await?;

        let accounts = LibSqlAccountStore::new(&db);
        let roster = LibSqlRosterStore::new(&db);
        accounts.create_schema_if_needed().await?;
        roster.create_schema_if_needed().await?;

        info!("Gateway context opened");
        Ok(Self {
            accounts: Arc::new(accounts),
            roster: Arc::new(roster),
            database: Some(db),
        })
    }

    /// Context over a fresh in-memory backend.
    pub fn in_memory() -> Self {
        let store = MemoryStore::new();
        Self::from_stores(Arc::new(store.accounts()), Arc::new(store.roster()))
    }

    /// Context over caller-provided stores.
    pub fn from_stores(accounts: Arc<dyn AccountStore>, roster: Arc<dyn RosterStore>) -> Self {
        Self {
            accounts,
            roster,
            database: None,
        }
    }

    pub fn accounts(&self) -> &Arc<dyn AccountStore> {
        &self.accounts
    }

    pub fn roster(&self) -> &Arc<dyn RosterStore> {
        &self.roster
    }

    /// Token cache bound to `address`.
    pub fn token_cache(&self, address: &str) -> TokenCache {
        TokenCache::new(Arc::clone(&self.accounts), address)
    }

    /// Release the stores and the database handle.
    pub async fn close(self) -> Result<(), StoreError> {
        if let Some(db) = &self.database {
            if !db.health_check().await? {
                warn!(db_name = %db.name(), "Database unhealthy at shutdown");
            }
            if let Err(e) = db.sync().await {
                warn!(db_name = %db.name(), error = %e, "Final replica sync failed");
            }
            info!(db_name = %db.name(), "Gateway context closed");
        }
        Ok(())
    }
}
