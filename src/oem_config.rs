use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::kv::{Item, ItemKey, KeyValueStore};

const METADATA_SK: &str = "METADATA";
const RMW_RETRIES: usize = 3;

/// Per-OEM settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OemConfig {
    pub oem: String,
    /// Whether lead uniqueness includes the vehicle model or only the
    /// customer+make pair.
    pub model_level_dedup: bool,
    /// Acceptance threshold used by the distribution layer.
    pub threshold: String,
}

/// Per-OEM configuration rows (`OEM#{oem}` / `METADATA`).
///
/// The model-level-dedup flag is consulted before every lead uniqueness
/// check, so reads go through a cache whose TTL is seconds; mutations
/// invalidate the cached entry immediately.
pub struct OemConfigStore {
    store: Arc<dyn KeyValueStore>,
    flag_cache: Cache<String, bool>,
}

impl OemConfigStore {
    pub fn new(store: Arc<dyn KeyValueStore>, flag_cache_ttl_secs: u64) -> Self {
        let flag_cache = Cache::builder()
            .time_to_live(Duration::from_secs(flag_cache_ttl_secs.max(1)))
            .max_capacity(1_000)
            .build();
        Self { store, flag_cache }
    }

    fn key(oem: &str) -> ItemKey {
        ItemKey::new(format!("OEM#{}", oem), METADATA_SK)
    }

    fn config_from_item(oem: &str, item: &Item) -> Result<OemConfig, StoreError> {
        Ok(OemConfig {
            oem: oem.to_string(),
            model_level_dedup: item
                .attrs
                .get("model_level_dedup")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            threshold: item.str_attr("threshold")?.to_string(),
        })
    }

    pub async fn create(
        &self,
        oem: &str,
        model_level_dedup: bool,
        threshold: &str,
    ) -> Result<(), StoreError> {
        let item = Item::new(format!("OEM#{}", oem), METADATA_SK)
            .with_attr("model_level_dedup", model_level_dedup)
            .with_attr("threshold", threshold);
        self.store.put(item).await?;
        self.flag_cache.invalidate(oem).await;
        tracing::info!(
            "Created OEM {}: model_level_dedup: {}, threshold: {}",
            oem,
            model_level_dedup,
            threshold
        );
        Ok(())
    }

    pub async fn get(&self, oem: &str) -> Result<Option<OemConfig>, StoreError> {
        match self.store.get(&Self::key(oem)).await? {
            Some(item) => Ok(Some(Self::config_from_item(oem, &item)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, oem: &str) -> Result<(), StoreError> {
        self.store.delete(&Self::key(oem)).await?;
        self.flag_cache.invalidate(oem).await;
        tracing::info!("Deleted OEM {}", oem);
        Ok(())
    }

    /// Model-level-dedup flag for an OEM; false when the OEM is unknown.
    ///
    /// Served from the short-TTL cache. Callers on the uniqueness path use
    /// this, not `get`, so a flag flip propagates within the cache TTL.
    pub async fn model_level_dedup(&self, oem: &str) -> Result<bool, StoreError> {
        if let Some(flag) = self.flag_cache.get(oem).await {
            return Ok(flag);
        }
        let flag = self
            .store
            .get(&Self::key(oem))
            .await?
            .and_then(|item| item.attrs.get("model_level_dedup").and_then(|v| v.as_bool()))
            .unwrap_or(false);
        self.flag_cache.insert(oem.to_string(), flag).await;
        Ok(flag)
    }

    pub async fn set_model_level_dedup(&self, oem: &str, enabled: bool) -> Result<(), StoreError> {
        self.mutate(oem, |item| {
            item.set_attr("model_level_dedup", enabled);
        })
        .await?;
        self.flag_cache.invalidate(oem).await;
        Ok(())
    }

    /// Domain validation failure (`OemNotFound`) if the OEM was never
    /// created; transient store failures surface separately.
    pub async fn set_threshold(&self, oem: &str, threshold: &str) -> Result<(), StoreError> {
        self.mutate(oem, |item| {
            item.set_attr("threshold", threshold);
        })
        .await?;
        tracing::info!("OEM {} threshold set to {}", oem, threshold);
        Ok(())
    }

    /// Versioned read-modify-write on the metadata row, retried on conflict.
    async fn mutate<F>(&self, oem: &str, apply: F) -> Result<(), StoreError>
    where
        F: Fn(&mut Item),
    {
        let mut attempt = 0;
        loop {
            let Some(mut item) = self.store.get(&Self::key(oem)).await? else {
                return Err(StoreError::OemNotFound(oem.to_string()));
            };
            let expected = item.version;
            apply(&mut item);
            match self.store.put_versioned(item, expected).await {
                Ok(()) => return Ok(()),
                Err(StoreError::Conflict(msg)) => {
                    attempt += 1;
                    if attempt >= RMW_RETRIES {
                        return Err(StoreError::Conflict(msg));
                    }
                    tracing::warn!("Retrying OEM {} metadata update after conflict", oem);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
