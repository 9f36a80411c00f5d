use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::{AccountStore, StoreError};

/// Refresh-token cache for one registered account.
///
/// Foreign-service login code reads the token on startup and writes back
/// the replacement whenever the service rotates it. The token lives in the
/// account's `credential` column.
#[derive(Clone)]
pub struct TokenCache {
    store: Arc<dyn AccountStore>,
    address: String,
}

impl TokenCache {
    pub fn new(store: Arc<dyn AccountStore>, address: impl Into<String>) -> Self {
        Self {
            store,
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn get(&self) -> Result<Option<String>, StoreError> {
        self.store.credential(&self.address).await
    }

    /// Store a rotated token. Returns `false` when the account no longer exists.
    #[instrument(skip(self, token), fields(address = %self.address))]
    pub async fn set(&self, token: &str) -> Result<bool, StoreError> {
        let updated = self.store.set_credential(&self.address, token).await?;
        if updated == 0 {
            warn!("Token not cached, account is gone");
            return Ok(false);
        }
        debug!("Token cached");
        Ok(true)
    }
}
