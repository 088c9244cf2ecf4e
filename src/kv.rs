use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::errors::StoreError;

/// Separator for composite key parts (`make#uuid`, `phone#lastname`, ...).
pub const KEY_SEP: char = '#';

/// Join key parts into a composite key.
pub fn composite(parts: &[&str]) -> String {
    parts.join("#")
}

/// Split a composite key into its parts.
pub fn split_composite(key: &str) -> Vec<&str> {
    key.split(KEY_SEP).collect()
}

/// Primary key of a row: partition key plus sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub pk: String,
    pub sk: String,
}

impl ItemKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

/// The two global secondary indexes of the lead table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryIndex {
    /// gsipk/gsisk: lead date buckets, email fan-out, api-key reverse lookup.
    Gsi,
    /// gsipk1/gsisk1: phone+lastname fan-out.
    Gsi1,
}

/// Sort-key condition for partition and index queries.
#[derive(Debug, Clone)]
pub enum SortCondition {
    /// Every row in the partition.
    Any,
    /// Exact sort-key match.
    Equals(String),
    /// Sort-key prefix match.
    BeginsWith(String),
}

impl SortCondition {
    fn matches(&self, sk: Option<&str>) -> bool {
        match self {
            SortCondition::Any => true,
            SortCondition::Equals(want) => sk == Some(want.as_str()),
            SortCondition::BeginsWith(prefix) => {
                sk.map(|s| s.starts_with(prefix.as_str())).unwrap_or(false)
            }
        }
    }
}

/// A single row of the lead table.
///
/// `version` is maintained by the store: it starts at 1 on first write and
/// increments on every rewrite, enabling the optimistic-concurrency path of
/// [`KeyValueStore::put_versioned`]. `expires_at` is the store-enforced TTL;
/// expired rows are invisible to every read operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub pk: String,
    pub sk: String,
    pub gsipk: Option<String>,
    pub gsisk: Option<String>,
    pub gsipk1: Option<String>,
    pub gsisk1: Option<String>,
    #[serde(default)]
    pub version: i64,
    pub expires_at: Option<DateTime<Utc>>,
    /// Free-form record attributes (email, phone, conversion, ...).
    #[serde(default)]
    pub attrs: serde_json::Map<String, Value>,
}

impl Item {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
            gsipk: None,
            gsisk: None,
            gsipk1: None,
            gsisk1: None,
            version: 0,
            expires_at: None,
            attrs: serde_json::Map::new(),
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.pk.clone(), self.sk.clone())
    }

    pub fn with_gsi(mut self, gsipk: impl Into<String>, gsisk: impl Into<String>) -> Self {
        self.gsipk = Some(gsipk.into());
        self.gsisk = Some(gsisk.into());
        self
    }

    pub fn with_gsi1(mut self, gsipk1: impl Into<String>, gsisk1: impl Into<String>) -> Self {
        self.gsipk1 = Some(gsipk1.into());
        self.gsisk1 = Some(gsisk1.into());
        self
    }

    pub fn with_ttl(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<Value>) {
        self.attrs.insert(name.to_string(), value.into());
    }

    /// String attribute, or `InvalidRecord` if absent or not a string.
    pub fn str_attr(&self, name: &str) -> Result<&str, StoreError> {
        self.attrs
            .get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                StoreError::InvalidRecord(format!(
                    "row {}/{} missing string attribute '{}'",
                    self.pk, self.sk, name
                ))
            })
    }

    pub fn opt_str_attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(|v| v.as_str())
    }

    fn live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t > now).unwrap_or(true)
    }
}

/// Minimal single-item contract of the durable store.
///
/// get/put/delete are atomic per item; there are no cross-item transactions.
/// `put_if_absent` and `put_versioned` are the conditional-write primitives
/// that close the check-then-insert and read-modify-write races at the call
/// sites that need them.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Point lookup. Expired rows read as absent.
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError>;

    /// Unconditional write, last writer wins. Bumps the stored version.
    async fn put(&self, item: Item) -> Result<(), StoreError>;

    /// Write only if no live row exists at the key; `AlreadyExists` otherwise.
    async fn put_if_absent(&self, item: Item) -> Result<(), StoreError>;

    /// Rewrite an existing row only if its stored version still equals
    /// `expected_version`; `Conflict` otherwise (including a row that
    /// vanished between the caller's read and this write).
    async fn put_versioned(&self, item: Item, expected_version: i64) -> Result<(), StoreError>;

    /// Delete a row. Deleting an absent key is a no-op.
    async fn delete(&self, key: &ItemKey) -> Result<(), StoreError>;

    /// Rows of one partition, ordered by sort key, filtered by `cond`.
    async fn query_partition(
        &self,
        pk: &str,
        cond: SortCondition,
    ) -> Result<Vec<Item>, StoreError>;

    /// Rows matching an index partition key, filtered by `cond` on the
    /// index sort key.
    async fn query_index(
        &self,
        index: SecondaryIndex,
        pk: &str,
        cond: SortCondition,
    ) -> Result<Vec<Item>, StoreError>;
}

/// In-process implementation backed by an ordered map.
///
/// Used by the test-suite and by embedded deployments; the durable
/// counterpart is [`crate::pg::PgStore`]. TTL is enforced at read time, so
/// an expired hash-dedup row frees its key for reuse without a reaper.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<(String, String), Item>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        let now = Utc::now();
        let rows = self.rows.read().await;
        Ok(rows
            .get(&(key.pk.clone(), key.sk.clone()))
            .filter(|item| item.live_at(now))
            .cloned())
    }

    async fn put(&self, mut item: Item) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        let key = (item.pk.clone(), item.sk.clone());
        let prior_version = rows.get(&key).map(|i| i.version).unwrap_or(0);
        item.version = prior_version + 1;
        rows.insert(key, item);
        Ok(())
    }

    async fn put_if_absent(&self, mut item: Item) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut rows = self.rows.write().await;
        let key = (item.pk.clone(), item.sk.clone());
        if let Some(existing) = rows.get(&key) {
            if existing.live_at(now) {
                return Err(StoreError::AlreadyExists(format!(
                    "{}/{}",
                    item.pk, item.sk
                )));
            }
        }
        item.version = 1;
        rows.insert(key, item);
        Ok(())
    }

    async fn put_versioned(&self, mut item: Item, expected_version: i64) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut rows = self.rows.write().await;
        let key = (item.pk.clone(), item.sk.clone());
        match rows.get(&key).filter(|i| i.live_at(now)) {
            Some(existing) if existing.version == expected_version => {
                item.version = expected_version + 1;
                rows.insert(key, item);
                Ok(())
            }
            Some(existing) => Err(StoreError::Conflict(format!(
                "{}/{}: stored version {} != expected {}",
                item.pk, item.sk, existing.version, expected_version
            ))),
            None => Err(StoreError::Conflict(format!(
                "{}/{}: row no longer present",
                item.pk, item.sk
            ))),
        }
    }

    async fn delete(&self, key: &ItemKey) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        rows.remove(&(key.pk.clone(), key.sk.clone()));
        Ok(())
    }

    async fn query_partition(
        &self,
        pk: &str,
        cond: SortCondition,
    ) -> Result<Vec<Item>, StoreError> {
        let now = Utc::now();
        let rows = self.rows.read().await;
        let lower = (pk.to_string(), String::new());
        Ok(rows
            .range((Bound::Included(lower), Bound::Unbounded))
            .take_while(|((row_pk, _), _)| row_pk.as_str() == pk)
            .filter(|(_, item)| item.live_at(now) && cond.matches(Some(item.sk.as_str())))
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn query_index(
        &self,
        index: SecondaryIndex,
        pk: &str,
        cond: SortCondition,
    ) -> Result<Vec<Item>, StoreError> {
        let now = Utc::now();
        let rows = self.rows.read().await;
        let mut out: Vec<Item> = rows
            .values()
            .filter(|item| item.live_at(now))
            .filter(|item| {
                let (ipk, isk) = match index {
                    SecondaryIndex::Gsi => (item.gsipk.as_deref(), item.gsisk.as_deref()),
                    SecondaryIndex::Gsi1 => (item.gsipk1.as_deref(), item.gsisk1.as_deref()),
                };
                ipk == Some(pk) && cond.matches(isk)
            })
            .cloned()
            .collect();
        // Index order mirrors the durable store: ascending by index sort key.
        out.sort_by(|a, b| {
            let key = |i: &Item| match index {
                SecondaryIndex::Gsi => i.gsisk.clone(),
                SecondaryIndex::Gsi1 => i.gsisk1.clone(),
            };
            key(a).cmp(&key(b))
        });
        Ok(out)
    }
}
