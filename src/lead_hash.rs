use std::sync::Arc;

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};

use crate::errors::StoreError;
use crate::kv::{Item, ItemKey, KeyValueStore};

/// SHA-256 hex digest of a raw provider payload.
///
/// Two submissions with equal payload bytes hash to the same dedup key.
pub fn submission_hash(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Outcome of a raw-submission dedup check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateCheck {
    pub duplicate: bool,
    /// The response recorded for the prior identical submission, if any.
    pub prior_response: Option<String>,
}

/// Dedup of raw provider submissions by content hash.
///
/// A row's presence for `(hash, provider)` is definitional: two submissions
/// with equal hash and provider are the same event. Rows expire after the
/// configured retention window, after which the key may be reused.
pub struct LeadHashStore {
    store: Arc<dyn KeyValueStore>,
    ttl_days: i64,
}

impl LeadHashStore {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl_days: i64) -> Self {
        Self { store, ttl_days }
    }

    fn key(hash: &str, provider: &str) -> ItemKey {
        ItemKey::new(format!("LEAD#{}", hash), provider)
    }

    /// Record a submission and the response handed back to the provider.
    ///
    /// Last write wins if called twice for the same key; callers needing
    /// strict idempotency must run [`Self::is_duplicate`] first.
    pub async fn record_submission(
        &self,
        hash: &str,
        provider: &str,
        response: &str,
    ) -> Result<(), StoreError> {
        let item = Item::new(format!("LEAD#{}", hash), provider)
            .with_attr("response", response)
            .with_ttl(Utc::now() + Duration::days(self.ttl_days));
        self.store.put(item).await?;
        tracing::info!(
            "Recorded submission hash: {}, provider: {}, response: {}",
            hash,
            provider,
            response
        );
        Ok(())
    }

    /// Point lookup; absence means not duplicate. A transient store failure
    /// propagates as an error, never as "not duplicate".
    pub async fn is_duplicate(
        &self,
        hash: &str,
        provider: &str,
    ) -> Result<DuplicateCheck, StoreError> {
        match self.store.get(&Self::key(hash, provider)).await? {
            Some(item) => Ok(DuplicateCheck {
                duplicate: true,
                prior_response: item.opt_str_attr("response").map(str::to_string),
            }),
            None => Ok(DuplicateCheck {
                duplicate: false,
                prior_response: None,
            }),
        }
    }
}
