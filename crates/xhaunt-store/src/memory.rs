//! In-memory storage backend.
//!
//! Accounts own their roster entries directly, so removing an account drops
//! its roster the same way the database cascade does. Adding a roster entry
//! for an unknown address fails like a foreign key violation.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::{Account, AccountStore, ExternalId, ExternalIdStream, RosterStore, StoreError};

#[derive(Debug, Default)]
struct StoredAccount {
    username: String,
    credential: Option<String>,
    roster: Vec<ExternalId>,
}

type State = Arc<RwLock<HashMap<String, StoredAccount>>>;

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Internal("Lock poisoned".to_string())
}

/// Shared in-memory state handing out account and roster views.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: State,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accounts(&self) -> MemoryAccountStore {
        MemoryAccountStore {
            state: Arc::clone(&self.state),
        }
    }

    pub fn roster(&self) -> MemoryRosterStore {
        MemoryRosterStore {
            state: Arc::clone(&self.state),
        }
    }
}

/// [`AccountStore`] view over a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryAccountStore {
    state: State,
}

/// [`RosterStore`] view over a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryRosterStore {
    state: State,
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn create_schema_if_needed(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find(&self, address: &str) -> Result<Option<Account>, StoreError> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.get(address).map(|stored| Account {
            address: address.to_string(),
            username: stored.username.clone(),
            credential: stored.credential.clone(),
        }))
    }

    async fn upsert(
        &self,
        address: &str,
        username: &str,
        credential: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(poisoned)?;
        let stored = state.entry(address.to_string()).or_default();
        stored.username = username.to_string();
        stored.credential = credential.map(str::to_string);
        debug!(address = %address, "Account stored");
        Ok(())
    }

    async fn remove(&self, address: &str) -> Result<u64, StoreError> {
        let mut state = self.state.write().map_err(poisoned)?;
        Ok(state.remove(address).map_or(0, |_| 1))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.len() as u64)
    }

    async fn credential(&self, address: &str) -> Result<Option<String>, StoreError> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.get(address).and_then(|stored| stored.credential.clone()))
    }

    async fn set_credential(&self, address: &str, credential: &str) -> Result<u64, StoreError> {
        let mut state = self.state.write().map_err(poisoned)?;
        match state.get_mut(address) {
            Some(stored) => {
                stored.credential = Some(credential.to_string());
                Ok(1)
            }
            None => {
                warn!(address = %address, "No account to store credential for");
                Ok(0)
            }
        }
    }
}

#[async_trait]
impl RosterStore for MemoryRosterStore {
    async fn create_schema_if_needed(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn add(&self, address: &str, id: &ExternalId) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(poisoned)?;
        let stored = state.get_mut(address).ok_or_else(|| {
            StoreError::QueryFailed(format!("FOREIGN KEY constraint failed for {address}"))
        })?;
        stored.roster.push(id.clone());
        Ok(())
    }

    async fn remove(&self, address: &str, id: &ExternalId) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(poisoned)?;
        let removed = match state.get_mut(address) {
            Some(stored) => {
                let before = stored.roster.len();
                stored.roster.retain(|entry| entry != id);
                before - stored.roster.len()
            }
            None => 0,
        };

        if removed != 1 {
            warn!(address = %address, count = removed, "Unexpected row count removing roster entry");
        }
        Ok(())
    }

    fn enumerate(&self, address: &str) -> ExternalIdStream {
        let snapshot: Vec<Result<ExternalId, StoreError>> = match self.state.read() {
            Ok(state) => state
                .get(address)
                .map(|stored| stored.roster.iter().cloned().map(Ok).collect())
                .unwrap_or_default(),
            Err(e) => vec![Err(poisoned(e))],
        };
        stream::iter(snapshot).boxed()
    }

    async fn count(&self, address: Option<&str>) -> Result<u64, StoreError> {
        let state = self.state.read().map_err(poisoned)?;
        let count = match address {
            Some(address) => state.get(address).map_or(0, |stored| stored.roster.len()),
            None => state.values().map(|stored| stored.roster.len()).sum(),
        };
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_upsert_find_remove() {
        let store = MemoryStore::new();
        let accounts = store.accounts();

        accounts
            .upsert("test@example.org", "hangouts1", Some("pw1"))
            .await
            .unwrap();
        accounts
            .upsert("other@example.org", "hangouts2", None)
            .await
            .unwrap();
        assert_eq!(accounts.count().await.unwrap(), 2);

        let account = accounts.find("test@example.org").await.unwrap().unwrap();
        assert_eq!(account.username, "hangouts1");
        assert_eq!(account.credential.as_deref(), Some("pw1"));

        assert_eq!(accounts.remove("test@example.org").await.unwrap(), 1);
        assert_eq!(accounts.remove("test@example.org").await.unwrap(), 0);
        assert_eq!(accounts.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_removal_drops_roster() {
        let store = MemoryStore::new();
        let accounts = store.accounts();
        let roster = store.roster();

        accounts.upsert("alice@example.org", "alice", None).await.unwrap();
        for i in 0..3 {
            roster
                .add("alice@example.org", &ExternalId::new(format!("g{i}"), "c"))
                .await
                .unwrap();
        }
        assert_eq!(roster.count(Some("alice@example.org")).await.unwrap(), 3);

        accounts.remove("alice@example.org").await.unwrap();
        assert_eq!(roster.count(Some("alice@example.org")).await.unwrap(), 0);
        assert_eq!(roster.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_roster_add_without_account_fails() {
        let store = MemoryStore::new();
        let result = store
            .roster()
            .add("ghost@example.org", &ExternalId::new("g", "c"))
            .await;
        assert!(matches!(result, Err(StoreError::QueryFailed(_))));
    }

    #[tokio::test]
    async fn test_enumerate_snapshot() {
        let store = MemoryStore::new();
        store.accounts().upsert("alice@example.org", "alice", None).await.unwrap();
        let roster = store.roster();
        roster
            .add("alice@example.org", &ExternalId::new("g1", "c1"))
            .await
            .unwrap();
        roster
            .add("alice@example.org", &ExternalId::new("g2", "c2"))
            .await
            .unwrap();

        let ids: Vec<ExternalId> = roster.enumerate("alice@example.org").try_collect().await.unwrap();
        assert_eq!(ids.len(), 2);

        roster
            .remove("alice@example.org", &ExternalId::new("g1", "c1"))
            .await
            .unwrap();
        let ids: Vec<ExternalId> = roster.enumerate("alice@example.org").try_collect().await.unwrap();
        assert_eq!(ids, vec![ExternalId::new("g2", "c2")]);
    }
}
