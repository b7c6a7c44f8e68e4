//! Pool/catalogue sharding behavior: weighted placement, catalogue
//! authority, and flavor-constrained routing.

mod common;

use std::sync::Arc;

use common::{body, CLIENT_A};
use serde_json::json;
use zaqar::core::message::NewMessage;
use zaqar::core::select::{weighted, weighted_with};
use zaqar::storage::memory::MemoryDriver;
use zaqar::storage::pooling::{Catalog, PooledDataDriver};
use zaqar::storage::{
    ControlDriver, DataDriver, Flavor, Pool, StorageError,
};

async fn pooled_with(pools: &[(&str, &str, i64, Option<&str>)]) -> (Arc<dyn ControlDriver>, PooledDataDriver) {
    let control: Arc<dyn ControlDriver> = Arc::new(MemoryDriver::new());

    for (name, uri, weight, flavor) in pools {
        control
            .pools()
            .create(Pool {
                name: name.to_string(),
                uri: uri.to_string(),
                weight: *weight,
                flavor: flavor.map(str::to_string),
                options: json!({}),
            })
            .await
            .unwrap();
    }

    let catalog = Arc::new(Catalog::new(Arc::clone(&control)));
    (control, PooledDataDriver::new(catalog))
}

#[tokio::test]
async fn queue_creation_inserts_a_catalogue_entry() {
    let (control, pooled) = pooled_with(&[("pool-1", "memory://pool-1", 100, None)]).await;

    let created = pooled
        .queues()
        .create("p1", "orders", json!({}))
        .await
        .unwrap();
    assert!(created);

    let entry = control.catalogue().get("p1", "orders").await.unwrap();
    assert_eq!(entry.pool, "pool-1");

    // Idempotent PUT: same pool, not newly created.
    let again = pooled
        .queues()
        .create("p1", "orders", json!({}))
        .await
        .unwrap();
    assert!(!again);
    let entry = control.catalogue().get("p1", "orders").await.unwrap();
    assert_eq!(entry.pool, "pool-1", "catalogue entry must be unchanged");
}

#[tokio::test]
async fn creation_without_pools_reports_no_pool_found() {
    let (_, pooled) = pooled_with(&[]).await;

    let err = pooled
        .queues()
        .create("p1", "orders", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NoPoolFound));
}

#[tokio::test]
async fn placement_follows_the_weights() {
    let (control, pooled) = pooled_with(&[
        ("light", "memory://light", 1, None),
        ("heavy", "memory://heavy", 99, None),
    ])
    .await;

    for i in 0..500 {
        pooled
            .queues()
            .create("p1", &format!("q{i:04}"), json!({}))
            .await
            .unwrap();
    }

    let entries = control.catalogue().list("p1").await.unwrap();
    let heavy = entries.iter().filter(|e| e.pool == "heavy").count();
    assert_eq!(entries.len(), 500);

    // weight 99/100 → expect ~495; allow generous variance.
    assert!(heavy >= 460, "heavy pool got only {heavy}/500");
}

#[tokio::test]
async fn zero_weight_pools_are_never_selected() {
    let (control, pooled) = pooled_with(&[
        ("dead", "memory://dead", 0, None),
        ("live", "memory://live", 5, None),
    ])
    .await;

    for i in 0..50 {
        pooled
            .queues()
            .create("p1", &format!("q{i:02}"), json!({}))
            .await
            .unwrap();
    }

    let entries = control.catalogue().list("p1").await.unwrap();
    assert!(entries.iter().all(|e| e.pool == "live"));
}

#[tokio::test]
async fn catalogue_is_authoritative_after_delete() {
    let (control, pooled) = pooled_with(&[("pool-1", "memory://auth", 10, None)]).await;
    let queues = pooled.queues();

    queues.create("p1", "orders", json!({})).await.unwrap();
    pooled
        .messages()
        .post(
            "p1",
            "orders",
            vec![NewMessage { ttl: 300, body: body(1) }],
            CLIENT_A,
        )
        .await
        .unwrap();

    queues.delete("p1", "orders").await.unwrap();

    // Simulate a dysfunctional pool that still physically holds the
    // queue record: the catalogue has the final word regardless.
    let pool_driver = zaqar::storage::utils::driver_registry()
        .get("memory://auth")
        .await
        .unwrap();
    pool_driver
        .queues()
        .create("p1", "orders", json!({}))
        .await
        .unwrap();

    assert!(!queues.exists("p1", "orders").await.unwrap());
    let err = queues.get_metadata("p1", "orders").await.unwrap_err();
    assert!(matches!(err, StorageError::QueueDoesNotExist { .. }));
    let err = control.catalogue().get("p1", "orders").await.unwrap_err();
    assert!(matches!(err, StorageError::QueueNotMapped { .. }));
}

#[tokio::test]
async fn operations_route_through_the_bound_pool() {
    let (_, pooled) = pooled_with(&[
        ("a", "memory://route-a", 1, None),
        ("b", "memory://route-b", 1, None),
    ])
    .await;

    // Spread a few queues over both pools, then make sure messages come
    // back from wherever their queue landed.
    for name in ["q1", "q2", "q3", "q4"] {
        pooled.queues().create("p1", name, json!({})).await.unwrap();
        pooled
            .messages()
            .post(
                "p1",
                name,
                vec![NewMessage { ttl: 300, body: json!({ "q": name }) }],
                CLIENT_A,
            )
            .await
            .unwrap();
    }

    for name in ["q1", "q2", "q3", "q4"] {
        let (_, claimed) = pooled
            .claims()
            .create("p1", name, 60, 60, 10)
            .await
            .unwrap()
            .expect("claimable");
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].body, json!({ "q": name }));
    }
}

#[tokio::test]
async fn flavored_queues_only_land_on_matching_pools() {
    let (control, pooled) = pooled_with(&[
        ("plain", "memory://plain", 100, None),
        ("gold-1", "memory://gold-1", 1, Some("gold")),
        ("gold-2", "memory://gold-2", 1, Some("gold")),
    ])
    .await;

    control
        .flavors()
        .create(Flavor {
            name: "gold".to_string(),
            project: "p1".to_string(),
            capabilities: json!({"durable": true}),
        })
        .await
        .unwrap();

    for i in 0..20 {
        pooled
            .queues()
            .create("p1", &format!("vip{i:02}"), json!({"_flavor": "gold"}))
            .await
            .unwrap();
    }

    let entries = control.catalogue().list("p1").await.unwrap();
    assert!(entries
        .iter()
        .all(|e| e.pool == "gold-1" || e.pool == "gold-2"));
}

#[tokio::test]
async fn unknown_flavor_fails_queue_creation() {
    let (_, pooled) = pooled_with(&[("plain", "memory://u-plain", 1, None)]).await;

    let err = pooled
        .queues()
        .create("p1", "vip", json!({"_flavor": "platinum"}))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::FlavorDoesNotExist { .. }));
}

#[test]
fn weighted_selection_spectrum_properties() {
    // Direct checks on the selector used for placement.
    let entries = [("a", -1i64), ("b", 0)];
    assert!(weighted(&entries, |e| e.1).is_none());

    let entries = [("a", 3i64), ("b", 1)];
    let mut rng = rand::rngs::mock::StepRng::new(0, 1);
    // Draws 0..3 land in `a`, draw 3 lands in `b`.
    let picked = weighted_with(&entries, |e| e.1, &mut rng).unwrap();
    assert_eq!(picked.0, "a");
}
