use serde::Deserialize;

/// Default retention for raw submission-hash rows, in days.
const DEFAULT_LEAD_HASH_TTL_DAYS: i64 = 1;
/// Default retention for canonical OEM lead and customer identity rows.
const DEFAULT_OEM_LEAD_TTL_DAYS: i64 = 365;
/// Default dealer search radius. The original service searches 50 km.
const DEFAULT_DEALER_RADIUS_METERS: f64 = 50_000.0;
/// Default TTL for the cached model-level-dedup flag. Must stay short:
/// the flag is read before every uniqueness check and must never be
/// cached indefinitely.
const DEFAULT_OEM_FLAG_CACHE_TTL_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub lead_hash_ttl_days: i64,
    pub oem_lead_ttl_days: i64,
    pub dealer_search_radius_meters: f64,
    pub oem_flag_cache_ttl_secs: u64,
    pub verify_service_url: String,
    pub verify_request_key: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            lead_hash_ttl_days: std::env::var("LEAD_HASH_TTL_DAYS")
                .ok()
                .map(|v| {
                    v.parse::<i64>()
                        .map_err(|_| anyhow::anyhow!("LEAD_HASH_TTL_DAYS must be a whole number"))
                })
                .transpose()?
                .unwrap_or(DEFAULT_LEAD_HASH_TTL_DAYS),
            oem_lead_ttl_days: std::env::var("OEM_LEAD_TTL_DAYS")
                .ok()
                .map(|v| {
                    v.parse::<i64>()
                        .map_err(|_| anyhow::anyhow!("OEM_LEAD_TTL_DAYS must be a whole number"))
                })
                .transpose()?
                .unwrap_or(DEFAULT_OEM_LEAD_TTL_DAYS),
            dealer_search_radius_meters: std::env::var("DEALER_SEARCH_RADIUS_METERS")
                .ok()
                .map(|v| {
                    v.parse::<f64>().map_err(|_| {
                        anyhow::anyhow!("DEALER_SEARCH_RADIUS_METERS must be a number")
                    })
                })
                .transpose()?
                .unwrap_or(DEFAULT_DEALER_RADIUS_METERS),
            oem_flag_cache_ttl_secs: std::env::var("OEM_FLAG_CACHE_TTL_SECS")
                .ok()
                .map(|v| {
                    v.parse::<u64>().map_err(|_| {
                        anyhow::anyhow!("OEM_FLAG_CACHE_TTL_SECS must be a whole number")
                    })
                })
                .transpose()?
                .unwrap_or(DEFAULT_OEM_FLAG_CACHE_TTL_SECS),
            verify_service_url: std::env::var("VERIFY_SERVICE_URL")
                .map_err(|_| anyhow::anyhow!("VERIFY_SERVICE_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("VERIFY_SERVICE_URL cannot be empty");
                    }
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("VERIFY_SERVICE_URL must start with http:// or https://");
                    }
                    Ok(url)
                })?,
            verify_request_key: std::env::var("VERIFY_REQUEST_KEY")
                .map_err(|_| anyhow::anyhow!("VERIFY_REQUEST_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("VERIFY_REQUEST_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
        };

        if config.lead_hash_ttl_days <= 0 || config.oem_lead_ttl_days <= 0 {
            anyhow::bail!("retention windows must be at least one day");
        }
        if config.dealer_search_radius_meters <= 0.0 {
            anyhow::bail!("DEALER_SEARCH_RADIUS_METERS must be positive");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Database URL: {}...", url_prefix(&config.database_url));
        tracing::debug!("Verify service URL: {}", config.verify_service_url);
        tracing::debug!(
            "Retention: lead hash {}d, oem lead {}d; dealer radius {}m",
            config.lead_hash_ttl_days,
            config.oem_lead_ttl_days,
            config.dealer_search_radius_meters
        );

        Ok(config)
    }
}

/// Loggable prefix of the database URL. Truncation is by character, so a
/// multibyte rune in the credentials cannot land on a slice boundary.
fn url_prefix(url: &str) -> String {
    url.chars().take(20).collect()
}

#[cfg(test)]
impl Default for Config {
    /// Test fixture; unit tests never read the process environment.
    fn default() -> Self {
        Self {
            database_url: "postgresql://test".to_string(),
            lead_hash_ttl_days: DEFAULT_LEAD_HASH_TTL_DAYS,
            oem_lead_ttl_days: DEFAULT_OEM_LEAD_TTL_DAYS,
            dealer_search_radius_meters: DEFAULT_DEALER_RADIUS_METERS,
            oem_flag_cache_ttl_secs: DEFAULT_OEM_FLAG_CACHE_TTL_SECS,
            verify_service_url: "https://verify.example.com".to_string(),
            verify_request_key: "test_key".to_string(),
        }
    }
}
