//! Lead Store and Access-Pattern Layer
//!
//! Persistence and identity-resolution layer of an automotive
//! lead-distribution service: single-table key design, the secondary-index
//! access patterns built on it, the dedup/conversion state machine, and the
//! geo-radius dealer lookup.
//!
//! # Modules
//!
//! - `api_keys`: Third-party credential issuance and reverse lookup.
//! - `config`: Configuration management.
//! - `customer_identity`: Cross-provider dedup by email / phone+lastname.
//! - `dealers`: Nearest-dealer resolution and detail enrichment.
//! - `errors`: Error handling types.
//! - `geo`: Radius-query primitive over the dealer table.
//! - `kv`: Key-value store abstraction and in-memory implementation.
//! - `lead_hash`: Dedup of raw provider submissions by content hash.
//! - `oem_config`: Per-OEM settings (model-level dedup flag, threshold).
//! - `oem_leads`: Canonical per-OEM lead records and conversion state.
//! - `pg`: Postgres-backed store implementations.
//! - `verify`: Contact-verification gateway client.

pub mod api_keys;
pub mod config;
pub mod customer_identity;
pub mod dealers;
pub mod errors;
pub mod geo;
pub mod kv;
pub mod lead_hash;
pub mod oem_config;
pub mod oem_leads;
pub mod pg;
pub mod verify;

use std::sync::Arc;

use crate::api_keys::ApiKeyAuthStore;
use crate::config::Config;
use crate::customer_identity::CustomerIdentityIndex;
use crate::dealers::GeoDealerLocator;
use crate::errors::ResultExt;
use crate::geo::{GeoIndex, PgGeoIndex};
use crate::kv::KeyValueStore;
use crate::lead_hash::LeadHashStore;
use crate::oem_config::OemConfigStore;
use crate::oem_leads::OemLeadStore;
use crate::pg::{Database, PgStore};

/// All store components wired over one backend, built once at process start
/// and handed to the request layer.
pub struct StoreLayer {
    pub lead_hashes: LeadHashStore,
    pub oem_config: Arc<OemConfigStore>,
    pub oem_leads: Arc<OemLeadStore>,
    pub identity: CustomerIdentityIndex,
    pub api_keys: ApiKeyAuthStore,
    pub dealers: GeoDealerLocator,
    db: Option<Database>,
}

impl StoreLayer {
    /// Connect to Postgres, run the schema migrations, and assemble the
    /// component stores.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let db = Database::connect(&config.database_url).await?;
        let store = PgStore::new(db.pool.clone());
        store.ensure_schema().await.context("creating lead table")?;
        let geo = PgGeoIndex::new(db.pool.clone());
        geo.ensure_schema().await.context("creating dealer table")?;
        let mut layer = Self::assemble(config, Arc::new(store), Arc::new(geo));
        layer.db = Some(db);
        tracing::info!("Store layer initialized");
        Ok(layer)
    }

    /// Assemble the components over caller-supplied backends. Tests and
    /// embedded deployments pass the in-memory implementations.
    pub fn assemble(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        geo: Arc<dyn GeoIndex>,
    ) -> Self {
        let oem_config = Arc::new(OemConfigStore::new(
            store.clone(),
            config.oem_flag_cache_ttl_secs,
        ));
        let oem_leads = Arc::new(OemLeadStore::new(
            store.clone(),
            oem_config.clone(),
            config.oem_lead_ttl_days,
        ));
        Self {
            lead_hashes: LeadHashStore::new(store.clone(), config.lead_hash_ttl_days),
            identity: CustomerIdentityIndex::new(
                store.clone(),
                oem_leads.clone(),
                config.oem_lead_ttl_days,
            ),
            api_keys: ApiKeyAuthStore::new(store.clone()),
            dealers: GeoDealerLocator::new(geo, store, config.dealer_search_radius_meters),
            oem_config,
            oem_leads,
            db: None,
        }
    }

    /// Drain the connection pool. No-op for in-memory backends.
    pub async fn close(&self) {
        if let Some(db) = &self.db {
            db.close().await;
        }
    }
}
