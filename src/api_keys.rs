use std::sync::Arc;

use uuid::Uuid;

use crate::errors::StoreError;
use crate::kv::{Item, ItemKey, KeyValueStore, SecondaryIndex, SortCondition};

/// Result of a reverse credential lookup.
///
/// `Unknown` means "unauthenticated", not "error": callers must not retry,
/// and the variant deliberately does not reveal whether a key of that shape
/// was ever issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    Known(String),
    Unknown,
}

/// Third-party credential store: forward rows `{username} -> {apikey}` with
/// a reverse projection `gsipk = {apikey}` for lookup by key.
///
/// At most one credential is active per username; issuing a new key deletes
/// the old mapping first, so the reverse index never resolves a stale key.
pub struct ApiKeyAuthStore {
    store: Arc<dyn KeyValueStore>,
}

impl ApiKeyAuthStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn current_key(&self, username: &str) -> Result<Option<String>, StoreError> {
        let rows = self
            .store
            .query_partition(username, SortCondition::Any)
            .await?;
        Ok(rows.into_iter().next().map(|item| item.sk))
    }

    /// Issue a fresh key for `username`, rotating out any existing one.
    pub async fn issue(&self, username: &str) -> Result<String, StoreError> {
        self.revoke(username).await?;

        let apikey = Uuid::new_v4().to_string();
        let item = Item::new(username, apikey.as_str()).with_gsi(apikey.as_str(), username);
        self.store.put(item).await?;
        tracing::info!("Issued api key for username: {}", username);
        Ok(apikey)
    }

    /// First-time registration: issues a key only if `username` has none.
    /// Returns `None` without touching the existing credential otherwise.
    pub async fn register(&self, username: &str) -> Result<Option<String>, StoreError> {
        if self.current_key(username).await?.is_some() {
            tracing::info!("Username {} already registered", username);
            return Ok(None);
        }
        Ok(Some(self.issue(username).await?))
    }

    /// Reverse lookup: which username owns `apikey`.
    pub async fn lookup_owner(&self, apikey: &str) -> Result<Owner, StoreError> {
        let rows = self
            .store
            .query_index(SecondaryIndex::Gsi, apikey, SortCondition::Any)
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .map(|item| Owner::Known(item.pk))
            .unwrap_or(Owner::Unknown))
    }

    /// Existence check via the reverse index.
    pub async fn verify(&self, apikey: &str) -> Result<bool, StoreError> {
        Ok(matches!(self.lookup_owner(apikey).await?, Owner::Known(_)))
    }

    /// Delete the credential for `username` if present; no-op otherwise.
    pub async fn revoke(&self, username: &str) -> Result<(), StoreError> {
        if let Some(apikey) = self.current_key(username).await? {
            self.store
                .delete(&ItemKey::new(username, apikey.as_str()))
                .await?;
            tracing::info!("Revoked api key for username: {}", username);
        }
        Ok(())
    }
}
