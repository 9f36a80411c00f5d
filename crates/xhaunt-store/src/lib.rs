//! Account and roster persistence for the XHaunt registration gateway.
//!
//! Storage is exposed as two capability traits:
//! - [`AccountStore`]: one row per bridged address holding the foreign
//!   username and an optional credential (password or cached session token)
//! - [`RosterStore`]: the foreign contacts of an account, removed together
//!   with the account through a cascading foreign key
//!
//! Two backends implement them: libSQL ([`LibSqlAccountStore`],
//! [`LibSqlRosterStore`]) and an in-memory map ([`MemoryStore`]) used by
//! tests. [`GatewayContext`] bundles a matching pair and owns their lifecycle.

mod accounts;
mod context;
mod database;
mod error;
mod memory;
mod migrations;
mod roster;
mod token_cache;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use accounts::LibSqlAccountStore;
pub use context::GatewayContext;
pub use database::{Database, DatabaseConfig};
pub use error::StoreError;
pub use memory::{MemoryAccountStore, MemoryRosterStore, MemoryStore};
pub use migrations::{Migration, MigrationRunner, ACCOUNTS_SCHEMA, ROSTER_SCHEMA};
pub use roster::LibSqlRosterStore;
pub use token_cache::TokenCache;

/// A registered bridged identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Canonical bare JID of the registrant.
    pub address: String,
    /// Login name on the foreign service.
    pub username: String,
    /// Password or session token, if one is stored.
    pub credential: Option<String>,
}

/// Opaque identifier of a contact on the foreign service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalId {
    pub primary_id: String,
    pub secondary_id: String,
}

impl ExternalId {
    pub fn new(primary_id: impl Into<String>, secondary_id: impl Into<String>) -> Self {
        Self {
            primary_id: primary_id.into(),
            secondary_id: secondary_id.into(),
        }
    }
}

/// Lazily produced roster contents for one address.
pub type ExternalIdStream = BoxStream<'static, Result<ExternalId, StoreError>>;

/// Durable table of registered accounts keyed uniquely by address.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Create the account table and its unique address index.
    ///
    /// Idempotent and safe to race with other callers.
    async fn create_schema_if_needed(&self) -> Result<(), StoreError>;

    /// Look up the account registered for `address`.
    ///
    /// Returns `Ok(None)` when nothing is registered. More than one matching
    /// row yields [`StoreError::Consistency`].
    async fn find(&self, address: &str) -> Result<Option<Account>, StoreError>;

    /// Create the account or overwrite username and credential in one
    /// atomic statement.
    async fn upsert(
        &self,
        address: &str,
        username: &str,
        credential: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Delete the account and, through the cascade, its roster.
    ///
    /// Returns the number of deleted account rows: 0 when nothing was
    /// registered, 1 normally. Anything above 1 is an anomaly the caller
    /// must surface.
    async fn remove(&self, address: &str) -> Result<u64, StoreError>;

    /// Number of registered accounts.
    async fn count(&self) -> Result<u64, StoreError>;

    /// Stored credential for `address`, if the account exists and has one.
    async fn credential(&self, address: &str) -> Result<Option<String>, StoreError>;

    /// Overwrite the credential of an existing account.
    ///
    /// Returns the number of updated rows; 0 when the account is absent.
    async fn set_credential(&self, address: &str, credential: &str) -> Result<u64, StoreError>;
}

/// Durable table of foreign contacts, foreign-keyed to [`AccountStore`].
#[async_trait]
pub trait RosterStore: Send + Sync {
    /// Create the roster table, its cascading foreign key and the address index.
    async fn create_schema_if_needed(&self) -> Result<(), StoreError>;

    /// Add a contact. A row count other than 1 is logged, not returned.
    async fn add(&self, address: &str, id: &ExternalId) -> Result<(), StoreError>;

    /// Remove a contact. A row count other than 1 is logged, not returned.
    async fn remove(&self, address: &str, id: &ExternalId) -> Result<(), StoreError>;

    /// Contacts of `address`, in no particular order.
    ///
    /// The stream is finite; calling `enumerate` again starts over.
    fn enumerate(&self, address: &str) -> ExternalIdStream;

    /// Number of contacts for `address`, or across all accounts when `None`.
    async fn count(&self, address: Option<&str>) -> Result<u64, StoreError>;
}
