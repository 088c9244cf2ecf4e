use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::errors::StoreError;
use crate::kv::{composite, Item, KeyValueStore, SecondaryIndex, SortCondition};
use crate::oem_leads::OemLeadStore;

const CUSTOMER_SK: &str = "CUSTOMER_LEAD";

/// Cross-provider identity fan-out: lookup of customer uuids by email or by
/// phone+lastname, and the dedup gate built on top of it.
///
/// Fan-out rows are append-only; a later submission for the same customer
/// writes a new row under its own uuid rather than replacing the old one.
pub struct CustomerIdentityIndex {
    store: Arc<dyn KeyValueStore>,
    leads: Arc<OemLeadStore>,
    ttl_days: i64,
}

impl CustomerIdentityIndex {
    pub fn new(store: Arc<dyn KeyValueStore>, leads: Arc<OemLeadStore>, ttl_days: i64) -> Self {
        Self {
            store,
            leads,
            ttl_days,
        }
    }

    /// Write the fan-out row so future lookups by email or phone+lastname
    /// resolve to this uuid.
    pub async fn record_identity(
        &self,
        uuid: &str,
        email: &str,
        phone: &str,
        last_name: &str,
        make: &str,
        model: &str,
    ) -> Result<(), StoreError> {
        let item = Item::new(uuid, CUSTOMER_SK)
            .with_gsi(email, uuid)
            .with_gsi1(composite(&[phone, last_name]), uuid)
            .with_attr("oem", make)
            .with_attr("make", make)
            .with_attr("model", model)
            .with_ttl(Utc::now() + Duration::days(self.ttl_days));
        self.store.put(item).await?;
        tracing::info!(
            "Recorded identity uuid: {}, email: {}, phone: {}, last_name: {}, make: {}, model: {}",
            uuid,
            email,
            phone,
            last_name,
            make,
            model
        );
        Ok(())
    }

    /// Cross-provider dedup gate.
    ///
    /// A lead is a duplicate if the same underlying customer, matched by
    /// email OR phone+lastname, already has an accepted/sent lead for the
    /// same make (and model, if the OEM dedups at model level) — regardless
    /// of which provider or content hash produced it.
    pub async fn find_duplicates(
        &self,
        email: &str,
        phone: &str,
        last_name: &str,
        make: &str,
        model: &str,
    ) -> Result<bool, StoreError> {
        let by_email = self
            .store
            .query_index(SecondaryIndex::Gsi, email, SortCondition::Any)
            .await?;
        let by_phone = self
            .store
            .query_index(
                SecondaryIndex::Gsi1,
                &composite(&[phone, last_name]),
                SortCondition::Any,
            )
            .await?;

        for item in by_email.iter().chain(by_phone.iter()) {
            if self.leads.exists(&item.pk, make, model).await? {
                tracing::info!(
                    "Duplicate lead for make: {}, model: {} via uuid: {}",
                    make,
                    model,
                    item.pk
                );
                return Ok(true);
            }
        }
        Ok(false)
    }
}
