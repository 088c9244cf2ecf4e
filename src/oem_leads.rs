use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::kv::{composite, split_composite, Item, KeyValueStore, SecondaryIndex, SortCondition};
use crate::oem_config::OemConfigStore;

const RMW_RETRIES: usize = 3;

/// Encode the two-part lead state carried in `gsisk`.
///
/// `0#0` means not yet responded and not converted; a response moves the
/// record to `1#{converted}`. The transition is one-way.
pub fn lead_state(oem_responded: bool, converted: bool) -> String {
    format!("{}#{}", oem_responded as u8, converted as u8)
}

/// A lead accepted for an OEM, as it will be forwarded downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOemLead {
    pub uuid: String,
    pub make: String,
    pub model: String,
    /// Submission date bucket (`YYYY-MM-DD`), the gsi partition.
    pub date: String,
    pub email: String,
    pub phone: String,
    pub last_name: String,
    pub timestamp: String,
    pub make_model_filter_status: String,
    pub lead_hash: String,
    pub dealer: String,
    /// Third-party lead provider that submitted this lead.
    pub provider: String,
    pub postalcode: String,
}

/// Canonical per-OEM lead record with its conversion state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OemLead {
    pub uuid: String,
    pub make: String,
    pub model: String,
    pub email: String,
    pub phone: String,
    pub last_name: String,
    pub timestamp: String,
    pub make_model_filter_status: String,
    pub lead_hash: String,
    pub dealer: String,
    pub provider: String,
    pub postalcode: String,
    pub oem_responded: bool,
    pub converted: bool,
}

impl OemLead {
    fn from_item(item: &Item) -> Result<Self, StoreError> {
        let pk_parts = split_composite(&item.pk);
        let [make, uuid] = pk_parts.as_slice() else {
            return Err(StoreError::InvalidRecord(format!(
                "lead partition key '{}' is not make#uuid",
                item.pk
            )));
        };
        let state = item.gsisk.as_deref().unwrap_or("0#0");
        let state_parts = split_composite(state);
        let (oem_responded, converted) = match state_parts.as_slice() {
            [sent, conv] => (*sent == "1", *conv == "1"),
            _ => {
                return Err(StoreError::InvalidRecord(format!(
                    "lead state key '{}' is not sent#converted",
                    state
                )))
            }
        };
        Ok(Self {
            uuid: uuid.to_string(),
            make: make.to_string(),
            model: item.str_attr("model")?.to_string(),
            email: item.str_attr("email")?.to_string(),
            phone: item.str_attr("phone")?.to_string(),
            last_name: item.str_attr("last_name")?.to_string(),
            timestamp: item.str_attr("timestamp")?.to_string(),
            make_model_filter_status: item
                .opt_str_attr("make_model_filter_status")
                .unwrap_or("")
                .to_string(),
            lead_hash: item.opt_str_attr("lead_hash").unwrap_or("").to_string(),
            dealer: item.opt_str_attr("dealer").unwrap_or("").to_string(),
            provider: item.opt_str_attr("3pl").unwrap_or("").to_string(),
            postalcode: item.opt_str_attr("postalcode").unwrap_or("").to_string(),
            oem_responded,
            converted,
        })
    }
}

/// Canonical per-OEM lead records: insertion, config-dependent uniqueness,
/// the pending-lead date query, and the conversion state machine.
pub struct OemLeadStore {
    store: Arc<dyn KeyValueStore>,
    config: Arc<OemConfigStore>,
    ttl_days: i64,
}

impl OemLeadStore {
    pub fn new(store: Arc<dyn KeyValueStore>, config: Arc<OemConfigStore>, ttl_days: i64) -> Self {
        Self {
            store,
            config,
            ttl_days,
        }
    }

    /// Insert a freshly accepted lead with state `0#0`.
    ///
    /// The write is conditional on the exact key being free, so two
    /// concurrent submissions for the same `(make, uuid, model)` cannot both
    /// land; the loser gets `AlreadyExists`. With model-level dedup off the
    /// uniqueness unit is the whole `make#uuid` partition, which a
    /// single-key condition cannot cover — callers must run [`Self::exists`]
    /// first, and that check-then-insert window remains racy across
    /// different models.
    pub async fn insert(&self, lead: &NewOemLead) -> Result<(), StoreError> {
        let item = Item::new(
            composite(&[&lead.make, &lead.uuid]),
            composite(&[&lead.make, &lead.model]),
        )
        .with_gsi(composite(&[&lead.make, &lead.date]), lead_state(false, false))
        .with_attr("make", lead.make.as_str())
        .with_attr("model", lead.model.as_str())
        .with_attr("email", lead.email.as_str())
        .with_attr("phone", lead.phone.as_str())
        .with_attr("last_name", lead.last_name.as_str())
        .with_attr("timestamp", lead.timestamp.as_str())
        .with_attr("conversion", 0)
        .with_attr(
            "make_model_filter_status",
            lead.make_model_filter_status.as_str(),
        )
        .with_attr("lead_hash", lead.lead_hash.as_str())
        .with_attr("dealer", lead.dealer.as_str())
        .with_attr("3pl", lead.provider.as_str())
        .with_attr("postalcode", lead.postalcode.as_str())
        .with_ttl(Utc::now() + Duration::days(self.ttl_days));

        self.store.put_if_absent(item).await?;
        tracing::info!(
            "Inserted OEM lead uuid: {}, make: {}, model: {}, date: {}",
            lead.uuid,
            lead.make,
            lead.model,
            lead.date
        );
        Ok(())
    }

    /// Configuration-dependent uniqueness check.
    ///
    /// Reads the OEM's model-level-dedup flag first (short-TTL cache, never
    /// stale for long): when on, only the exact `(make, uuid, model)` key
    /// counts; when off, any lead in the `make#uuid` partition does.
    pub async fn exists(&self, uuid: &str, make: &str, model: &str) -> Result<bool, StoreError> {
        let pk = composite(&[make, uuid]);
        let cond = if self.config.model_level_dedup(make).await? {
            SortCondition::Equals(composite(&[make, model]))
        } else {
            SortCondition::Any
        };
        let items = self.store.query_partition(&pk, cond).await?;
        Ok(!items.is_empty())
    }

    /// Leads accepted on `date` that the OEM has not responded to yet.
    ///
    /// gsi query on `{oem}#{date}` with state prefix `0#0`; the partition is
    /// TTL-bounded, and the query is restartable by re-issuing it.
    pub async fn pending_for_oem_on_date(
        &self,
        oem: &str,
        date: &str,
    ) -> Result<Vec<OemLead>, StoreError> {
        let items = self
            .store
            .query_index(
                SecondaryIndex::Gsi,
                &composite(&[oem, date]),
                SortCondition::BeginsWith(lead_state(false, false)),
            )
            .await?;
        items.iter().map(OemLead::from_item).collect()
    }

    /// Record the OEM's conversion response for a lead.
    ///
    /// `None` if no record exists for `(oem, uuid)`; otherwise the row moves
    /// to state `1#{converted}` and the updated record is returned. The
    /// rewrite is version-guarded and retried, so concurrent converters
    /// cannot silently drop each other's fields.
    pub async fn record_conversion(
        &self,
        uuid: &str,
        oem: &str,
        converted: bool,
    ) -> Result<Option<OemLead>, StoreError> {
        self.transition(uuid, oem, Some(converted), "conversion").await
    }

    /// Mark a lead as forwarded to the OEM without conversion info
    /// (state `1#0`). False if the record is absent.
    pub async fn mark_sent(
        &self,
        uuid: &str,
        oem: &str,
        make: &str,
        model: &str,
    ) -> Result<bool, StoreError> {
        tracing::debug!(
            "Marking lead sent uuid: {}, oem: {}, make: {}, model: {}",
            uuid,
            oem,
            make,
            model
        );
        Ok(self.transition(uuid, oem, None, "sent").await?.is_some())
    }

    /// Shared versioned rewrite for the two state transitions.
    ///
    /// `conversion` carries the OEM's answer; `None` marks the lead as sent
    /// (`1#0`) without touching a conversion value that may already be
    /// recorded on the row.
    async fn transition(
        &self,
        uuid: &str,
        oem: &str,
        conversion: Option<bool>,
        what: &str,
    ) -> Result<Option<OemLead>, StoreError> {
        let pk = composite(&[oem, uuid]);
        let mut attempt = 0;
        loop {
            let items = self.store.query_partition(&pk, SortCondition::Any).await?;
            let Some(mut item) = items.into_iter().next() else {
                tracing::warn!("No lead record for uuid: {}, oem: {}", uuid, oem);
                return Ok(None);
            };
            let expected = item.version;
            item.set_attr("oem_responded", 1);
            if let Some(converted) = conversion {
                item.set_attr("conversion", converted as i64);
                item.gsisk = Some(lead_state(true, converted));
            } else {
                item.gsisk = Some(lead_state(true, false));
            }

            match self.store.put_versioned(item.clone(), expected).await {
                Ok(()) => {
                    tracing::info!("Recorded {} for uuid: {}, oem: {}", what, uuid, oem);
                    return Ok(Some(OemLead::from_item(&item)?));
                }
                Err(StoreError::Conflict(msg)) => {
                    attempt += 1;
                    if attempt >= RMW_RETRIES {
                        return Err(StoreError::Conflict(msg));
                    }
                    tracing::warn!("Retrying {} update for uuid: {} after conflict", what, uuid);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
