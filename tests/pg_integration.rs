use std::env;

use als_lead_store::config::Config;
use als_lead_store::kv::{Item, ItemKey, KeyValueStore, SecondaryIndex, SortCondition};
use als_lead_store::pg::{Database, PgStore};
use als_lead_store::StoreLayer;

/// Integration smoke test for the Postgres-backed store.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn pg_store_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::connect(&db_url).await?;
    let store = PgStore::new(db.pool.clone());
    store
        .ensure_schema()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // Unique partition per run to avoid conflicts on repeated runs.
    let pk = format!("Ford#{}", uuid::Uuid::new_v4());

    let item = Item::new(pk.clone(), "Ford#F150")
        .with_gsi("Ford#2024-01-01", "0#0")
        .with_attr("email", "jane@example.com");
    store
        .put_if_absent(item)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let read = store
        .get(&ItemKey::new(pk.clone(), "Ford#F150"))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .ok_or_else(|| anyhow::anyhow!("row not found after put"))?;
    assert_eq!(read.version, 1);
    assert_eq!(read.opt_str_attr("email"), Some("jane@example.com"));

    let pending = store
        .query_index(
            SecondaryIndex::Gsi,
            "Ford#2024-01-01",
            SortCondition::BeginsWith("0#0".to_string()),
        )
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(pending.iter().any(|i| i.pk == pk));

    store
        .delete(&ItemKey::new(pk, "Ford#F150"))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    db.close().await;
    Ok(())
}

/// Full wiring against a live database: connect, migrate, run one
/// submission through the hash gate and the credential store.
#[tokio::test]
#[ignore]
async fn store_layer_end_to_end() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let config = Config {
        database_url: db_url,
        lead_hash_ttl_days: 1,
        oem_lead_ttl_days: 365,
        dealer_search_radius_meters: 50_000.0,
        oem_flag_cache_ttl_secs: 1,
        verify_service_url: "https://verify.invalid".to_string(),
        verify_request_key: "unused".to_string(),
    };
    let layer = StoreLayer::connect(&config).await?;

    let hash = format!("{}", uuid::Uuid::new_v4().simple());
    let provider = format!("provider-{}", uuid::Uuid::new_v4().simple());

    let before = layer
        .lead_hashes
        .is_duplicate(&hash, &provider)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(!before.duplicate);
    layer
        .lead_hashes
        .record_submission(&hash, &provider, "ACCEPTED")
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let after = layer
        .lead_hashes
        .is_duplicate(&hash, &provider)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(after.duplicate);

    let key = layer
        .api_keys
        .issue(&provider)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(layer
        .api_keys
        .verify(&key)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?);
    layer
        .api_keys
        .revoke(&provider)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    layer.close().await;
    Ok(())
}
