//! End-to-end access-pattern scenarios over the in-memory store: the full
//! submission path (hash dedup, identity dedup, insert, conversion) wired
//! the way a distribution service would wire it.

use std::sync::Arc;

use als_lead_store::api_keys::{ApiKeyAuthStore, Owner};
use als_lead_store::customer_identity::CustomerIdentityIndex;
use als_lead_store::dealers::GeoDealerLocator;
use als_lead_store::geo::{DealerPoint, MemoryGeoIndex};
use als_lead_store::kv::{KeyValueStore, MemoryStore};
use als_lead_store::lead_hash::{submission_hash, LeadHashStore};
use als_lead_store::oem_config::OemConfigStore;
use als_lead_store::oem_leads::{NewOemLead, OemLeadStore};

struct Fixture {
    hashes: LeadHashStore,
    identity: CustomerIdentityIndex,
    leads: Arc<OemLeadStore>,
    config: Arc<OemConfigStore>,
    auth: ApiKeyAuthStore,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixture() -> Fixture {
    init_tracing();
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let config = Arc::new(OemConfigStore::new(kv.clone(), 1));
    let leads = Arc::new(OemLeadStore::new(kv.clone(), config.clone(), 365));
    Fixture {
        hashes: LeadHashStore::new(kv.clone(), 1),
        identity: CustomerIdentityIndex::new(kv.clone(), leads.clone(), 365),
        leads,
        config,
        auth: ApiKeyAuthStore::new(kv),
    }
}

fn ford_lead(uuid: &str, model: &str, date: &str) -> NewOemLead {
    NewOemLead {
        uuid: uuid.to_string(),
        make: "Ford".to_string(),
        model: model.to_string(),
        date: date.to_string(),
        email: "jane@example.com".to_string(),
        phone: "3125550100".to_string(),
        last_name: "Doe".to_string(),
        timestamp: "1704067200".to_string(),
        make_model_filter_status: "True".to_string(),
        lead_hash: "deadbeef".to_string(),
        dealer: "D42".to_string(),
        provider: "acme_leads".to_string(),
        postalcode: "60601".to_string(),
    }
}

#[tokio::test]
async fn submission_hash_gate_before_and_after() {
    let f = fixture();
    let hash = submission_hash(br#"{"customer":"jane","make":"Ford"}"#);

    let before = f.hashes.is_duplicate(&hash, "acme_leads").await.unwrap();
    assert!(!before.duplicate);

    f.hashes
        .record_submission(&hash, "acme_leads", "ACCEPTED")
        .await
        .unwrap();

    let after = f.hashes.is_duplicate(&hash, "acme_leads").await.unwrap();
    assert!(after.duplicate);
    assert_eq!(after.prior_response.as_deref(), Some("ACCEPTED"));
}

#[tokio::test]
async fn model_dedup_off_blocks_every_model_for_the_customer() {
    let f = fixture();
    f.config.create("Ford", false, "0.4").await.unwrap();
    f.leads
        .insert(&ford_lead("u1", "F150", "2024-01-01"))
        .await
        .unwrap();

    assert!(f.leads.exists("u1", "Ford", "F150").await.unwrap());
    assert!(f.leads.exists("u1", "Ford", "Mustang").await.unwrap());
}

#[tokio::test]
async fn pending_then_converted_scenario() {
    // Insert u1/Ford/F150 on 2024-01-01; pending query returns exactly that
    // record in state 0#0; after conversion the queue is empty and the row
    // reads 1#1.
    let f = fixture();
    f.config.create("Ford", false, "0.4").await.unwrap();
    f.leads
        .insert(&ford_lead("u1", "F150", "2024-01-01"))
        .await
        .unwrap();

    let pending = f
        .leads
        .pending_for_oem_on_date("Ford", "2024-01-01")
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].uuid, "u1");
    assert!(!pending[0].oem_responded);
    assert!(!pending[0].converted);

    let updated = f
        .leads
        .record_conversion("u1", "Ford", true)
        .await
        .unwrap()
        .expect("record exists");
    assert!(updated.oem_responded);
    assert!(updated.converted);

    let pending = f
        .leads
        .pending_for_oem_on_date("Ford", "2024-01-01")
        .await
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn conversion_on_missing_record_creates_nothing() {
    let f = fixture();
    assert!(f
        .leads
        .record_conversion("ghost", "Ford", true)
        .await
        .unwrap()
        .is_none());
    assert!(f
        .leads
        .pending_for_oem_on_date("Ford", "2024-01-01")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn two_uuids_sharing_an_email_are_duplicates() {
    let f = fixture();
    f.config.create("Ford", false, "0.4").await.unwrap();

    // Two providers submit the same person; each minted its own uuid.
    for uuid in ["u1", "u2"] {
        f.identity
            .record_identity(uuid, "jane@example.com", "3125550100", "Doe", "Ford", "F150")
            .await
            .unwrap();
        f.leads
            .insert(&ford_lead(uuid, "F150", "2024-01-01"))
            .await
            .unwrap();
    }

    let duplicate = f
        .identity
        .find_duplicates("jane@example.com", "7735550999", "Doe", "Ford", "F150")
        .await
        .unwrap();
    assert!(duplicate);
}

#[tokio::test]
async fn credential_rotation_and_registration() {
    let f = fixture();

    let first = f.auth.issue("acme_leads").await.unwrap();
    let second = f.auth.issue("acme_leads").await.unwrap();
    assert_ne!(first, second);
    assert!(!f.auth.verify(&first).await.unwrap());
    assert!(f.auth.verify(&second).await.unwrap());

    // register is first-time only: no rotation on the second call.
    assert!(f.auth.register("acme_leads").await.unwrap().is_none());
    assert!(f.auth.verify(&second).await.unwrap());

    assert_eq!(
        f.auth.lookup_owner("no-such-key").await.unwrap(),
        Owner::Unknown
    );
}

#[tokio::test]
async fn nearest_dealer_ignores_other_oems_inside_the_radius() {
    init_tracing();
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let geo = MemoryGeoIndex::new();
    // A Ford dealer a block away; no Toyota dealer within 50 km.
    geo.insert(DealerPoint {
        dealer_code: "F1".to_string(),
        dealer_name: "Loop Ford".to_string(),
        postalcode: "60601".to_string(),
        oem: "Ford".to_string(),
        lat: 41.879,
        lng: -87.63,
    })
    .await;

    let locator = GeoDealerLocator::new(Arc::new(geo), kv, 50_000.0);
    let toyota = locator
        .nearest_dealer("Toyota", 41.8781, -87.6298)
        .await
        .unwrap();
    assert!(toyota.is_none());

    let ford = locator
        .nearest_dealer("Ford", 41.8781, -87.6298)
        .await
        .unwrap()
        .expect("ford dealer in radius");
    assert_eq!(ford.dealer_code, "F1");
    assert!(ford.distance_meters < 1_000.0);
}
