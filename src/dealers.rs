use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::geo::GeoIndex;
use crate::kv::{Item, ItemKey, KeyValueStore};

/// The dealer block attached to an outbound lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearestDealer {
    pub dealer_code: String,
    pub dealer_name: String,
    pub postalcode: String,
    pub distance_meters: f64,
}

/// Enrichment detail for a known dealer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealerDetail {
    pub postalcode: String,
    pub rating: f64,
    pub recommended: bool,
    pub review_count: i64,
}

/// Nearest-dealer resolution over the geo index, plus detail enrichment
/// rows (`DEALER#{code}` / `{oem}`) in the key-value store.
pub struct GeoDealerLocator {
    geo: Arc<dyn GeoIndex>,
    store: Arc<dyn KeyValueStore>,
    radius_meters: f64,
}

impl GeoDealerLocator {
    pub fn new(geo: Arc<dyn GeoIndex>, store: Arc<dyn KeyValueStore>, radius_meters: f64) -> Self {
        Self {
            geo,
            store,
            radius_meters,
        }
    }

    fn detail_key(dealer_code: &str, oem: &str) -> ItemKey {
        ItemKey::new(format!("DEALER#{}", dealer_code), oem)
    }

    /// Closest dealer of `oem` within the configured radius.
    ///
    /// Absence is a valid terminal result: no radius-expansion retry, and a
    /// closer dealer from another OEM's roster never substitutes.
    pub async fn nearest_dealer(
        &self,
        oem: &str,
        lat: f64,
        lng: f64,
    ) -> Result<Option<NearestDealer>, StoreError> {
        let hits = self
            .geo
            .query_radius(lat, lng, self.radius_meters, Some(oem), true)
            .await?;
        let Some((point, distance)) = hits.into_iter().next() else {
            tracing::info!("No {} dealer within {}m of ({}, {})", oem, self.radius_meters, lat, lng);
            return Ok(None);
        };
        Ok(Some(NearestDealer {
            dealer_code: point.dealer_code,
            dealer_name: point.dealer_name,
            postalcode: point.postalcode,
            distance_meters: distance,
        }))
    }

    /// Detail lookup by `(dealerCode, oem)`; `None` when the pair is unknown
    /// (e.g. the nearest dealer came from a different OEM's roster than the
    /// one enriching the lead). An empty dealer code short-circuits.
    pub async fn dealer_detail(
        &self,
        dealer_code: &str,
        oem: &str,
    ) -> Result<Option<DealerDetail>, StoreError> {
        if dealer_code.is_empty() {
            return Ok(None);
        }
        let Some(item) = self.store.get(&Self::detail_key(dealer_code, oem)).await? else {
            return Ok(None);
        };
        Ok(Some(DealerDetail {
            postalcode: item.str_attr("postalcode")?.to_string(),
            rating: item
                .attrs
                .get("rating")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            recommended: item
                .attrs
                .get("recommended")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            review_count: item
                .attrs
                .get("review_count")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
        }))
    }

    /// Admin load/update of a dealer's enrichment row.
    pub async fn upsert_detail(
        &self,
        dealer_code: &str,
        oem: &str,
        detail: &DealerDetail,
    ) -> Result<(), StoreError> {
        let item = Item::new(format!("DEALER#{}", dealer_code), oem)
            .with_attr("postalcode", detail.postalcode.as_str())
            .with_attr("rating", detail.rating)
            .with_attr("recommended", detail.recommended)
            .with_attr("review_count", detail.review_count);
        self.store.put(item).await?;
        Ok(())
    }
}
