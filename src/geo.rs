use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;

use crate::errors::StoreError;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
/// Meters per degree of latitude (spherical approximation).
const METERS_PER_LAT_DEGREE: f64 = 111_320.0;

/// Haversine distance between two points in meters.
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Latitude band covering every point within `radius_meters` of `lat`.
///
/// Cheap prefilter for the indexed scan; the exact cut is the haversine
/// post-filter. Clamped to the poles.
pub fn latitude_band(lat: f64, radius_meters: f64) -> (f64, f64) {
    let delta = radius_meters / METERS_PER_LAT_DEGREE;
    ((lat - delta).max(-90.0), (lat + delta).min(90.0))
}

/// A dealer as stored in the geo-indexed dealer table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealerPoint {
    pub dealer_code: String,
    pub dealer_name: String,
    pub postalcode: String,
    pub oem: String,
    pub lat: f64,
    pub lng: f64,
}

/// Radius-query primitive over the dealer table.
///
/// Results are capped by the radius; with `sort` set they come back ascending
/// by distance. `oem_filter` is applied server-side (inside the scan), not by
/// the caller.
#[async_trait]
pub trait GeoIndex: Send + Sync {
    async fn query_radius(
        &self,
        lat: f64,
        lng: f64,
        radius_meters: f64,
        oem_filter: Option<&str>,
        sort: bool,
    ) -> Result<Vec<(DealerPoint, f64)>, StoreError>;
}

/// In-process geo index for tests and embedded deployments.
#[derive(Default)]
pub struct MemoryGeoIndex {
    points: RwLock<Vec<DealerPoint>>,
}

impl MemoryGeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, point: DealerPoint) {
        self.points.write().await.push(point);
    }
}

#[async_trait]
impl GeoIndex for MemoryGeoIndex {
    async fn query_radius(
        &self,
        lat: f64,
        lng: f64,
        radius_meters: f64,
        oem_filter: Option<&str>,
        sort: bool,
    ) -> Result<Vec<(DealerPoint, f64)>, StoreError> {
        let (min_lat, max_lat) = latitude_band(lat, radius_meters);
        let points = self.points.read().await;
        let mut hits: Vec<(DealerPoint, f64)> = points
            .iter()
            .filter(|p| p.lat >= min_lat && p.lat <= max_lat)
            .filter(|p| oem_filter.map(|oem| p.oem == oem).unwrap_or(true))
            .filter_map(|p| {
                let distance = haversine_distance(lat, lng, p.lat, p.lng);
                (distance <= radius_meters).then(|| (p.clone(), distance))
            })
            .collect();
        if sort {
            hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        }
        Ok(hits)
    }
}

/// Durable dealer table: latitude-band indexed scan in SQL, haversine
/// post-filter in process.
pub struct PgGeoIndex {
    pool: PgPool,
}

impl PgGeoIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dealer_points (
                dealer_code text NOT NULL,
                oem         text NOT NULL,
                dealer_name text NOT NULL,
                postalcode  text NOT NULL,
                lat         double precision NOT NULL,
                lng         double precision NOT NULL,
                PRIMARY KEY (dealer_code, oem)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS dealer_points_lat ON dealer_points (lat)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert(&self, point: &DealerPoint) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO dealer_points (dealer_code, oem, dealer_name, postalcode, lat, lng)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (dealer_code, oem) DO UPDATE
            SET dealer_name = EXCLUDED.dealer_name,
                postalcode = EXCLUDED.postalcode,
                lat = EXCLUDED.lat,
                lng = EXCLUDED.lng
            "#,
        )
        .bind(&point.dealer_code)
        .bind(&point.oem)
        .bind(&point.dealer_name)
        .bind(&point.postalcode)
        .bind(point.lat)
        .bind(point.lng)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl GeoIndex for PgGeoIndex {
    async fn query_radius(
        &self,
        lat: f64,
        lng: f64,
        radius_meters: f64,
        oem_filter: Option<&str>,
        sort: bool,
    ) -> Result<Vec<(DealerPoint, f64)>, StoreError> {
        let (min_lat, max_lat) = latitude_band(lat, radius_meters);
        let rows = match oem_filter {
            Some(oem) => {
                sqlx::query(
                    "SELECT * FROM dealer_points WHERE lat BETWEEN $1 AND $2 AND oem = $3",
                )
                .bind(min_lat)
                .bind(max_lat)
                .bind(oem)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM dealer_points WHERE lat BETWEEN $1 AND $2")
                    .bind(min_lat)
                    .bind(max_lat)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let point = DealerPoint {
                dealer_code: row.try_get("dealer_code")?,
                dealer_name: row.try_get("dealer_name")?,
                postalcode: row.try_get("postalcode")?,
                oem: row.try_get("oem")?,
                lat: row.try_get("lat")?,
                lng: row.try_get("lng")?,
            };
            let distance = haversine_distance(lat, lng, point.lat, point.lng);
            if distance <= radius_meters {
                hits.push((point, distance));
            }
        }
        if sort {
            hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dealer(code: &str, oem: &str, lat: f64, lng: f64) -> DealerPoint {
        DealerPoint {
            dealer_code: code.to_string(),
            dealer_name: format!("{} of Springfield", oem),
            postalcode: "62701".to_string(),
            oem: oem.to_string(),
            lat,
            lng,
        }
    }

    #[test]
    fn haversine_known_distance() {
        // Chicago -> Milwaukee is roughly 131 km.
        let d = haversine_distance(41.8781, -87.6298, 43.0389, -87.9065);
        assert!((d - 131_000.0).abs() < 5_000.0, "got {}", d);
    }

    #[test]
    fn latitude_band_clamps_at_poles() {
        let (lo, hi) = latitude_band(89.9, 100_000.0);
        assert!(lo < 89.9);
        assert_eq!(hi, 90.0);
    }

    #[tokio::test]
    async fn radius_query_filters_and_sorts() {
        let index = MemoryGeoIndex::new();
        index.insert(dealer("D1", "Toyota", 41.88, -87.63)).await;
        index.insert(dealer("D2", "Toyota", 41.95, -87.65)).await;
        index.insert(dealer("D3", "Ford", 41.88, -87.62)).await;
        // Out of a 50 km radius from the Loop.
        index.insert(dealer("D4", "Toyota", 43.04, -87.91)).await;

        let hits = index
            .query_radius(41.8781, -87.6298, 50_000.0, Some("Toyota"), true)
            .await
            .unwrap();
        assert_eq!(
            hits.iter().map(|(p, _)| p.dealer_code.as_str()).collect::<Vec<_>>(),
            vec!["D1", "D2"]
        );
        assert!(hits[0].1 <= hits[1].1);
    }
}
