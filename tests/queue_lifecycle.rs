mod common;

use common::{all_drivers, body, CLIENT_A};
use serde_json::json;
use zaqar::core::message::NewMessage;
use zaqar::storage::{DataDriver, StorageError};

#[tokio::test]
async fn create_is_idempotent_and_reports_newness() {
    for t in all_drivers().await {
        let queues = t.driver.queues();

        let first = queues.create("p1", "orders", json!({})).await.unwrap();
        let second = queues.create("p1", "orders", json!({})).await.unwrap();
        assert!(first, "{}: first create must report new", t.name);
        assert!(!second, "{}: second create must be idempotent", t.name);

        assert!(queues.exists("p1", "orders").await.unwrap());
        assert!(!queues.exists("p2", "orders").await.unwrap());
    }
}

#[tokio::test]
async fn metadata_round_trip_and_missing_queue_errors() {
    for t in all_drivers().await {
        let queues = t.driver.queues();

        let err = queues.get_metadata("p1", "ghost").await.unwrap_err();
        assert!(
            matches!(err, StorageError::QueueDoesNotExist { .. }),
            "{}: expected QueueDoesNotExist, got {err:?}",
            t.name
        );

        queues.create("p1", "orders", json!({"team": "billing"})).await.unwrap();
        assert_eq!(
            queues.get_metadata("p1", "orders").await.unwrap(),
            json!({"team": "billing"})
        );

        queues
            .set_metadata("p1", "orders", json!({"team": "payments"}))
            .await
            .unwrap();
        assert_eq!(
            queues.get_metadata("p1", "orders").await.unwrap(),
            json!({"team": "payments"})
        );
    }
}

#[tokio::test]
async fn listing_pages_forward_with_markers() {
    for t in all_drivers().await {
        let queues = t.driver.queues();
        for name in ["alpha", "beta", "gamma", "delta", "epsilon"] {
            queues.create("p1", name, json!({})).await.unwrap();
        }
        // Another project's queues must not leak in.
        queues.create("p2", "zeta", json!({})).await.unwrap();

        let first = queues.list("p1", None, 2, false).await.unwrap();
        let names: Vec<&str> = first.items.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta"], "{}", t.name);
        let marker = first.marker.expect("full page carries a marker");

        let second = queues.list("p1", Some(&marker), 10, false).await.unwrap();
        let names: Vec<&str> = second.items.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, ["delta", "epsilon", "gamma"], "{}", t.name);
        assert!(second.marker.is_none(), "{}: short page has no marker", t.name);
    }
}

#[tokio::test]
async fn delete_cascades_to_messages_and_claims() {
    for t in all_drivers().await {
        let queues = t.driver.queues();
        let messages = t.driver.messages();
        let claims = t.driver.claims();

        queues.create("p1", "orders", json!({})).await.unwrap();
        messages
            .post(
                "p1",
                "orders",
                vec![
                    NewMessage { ttl: 300, body: body(1) },
                    NewMessage { ttl: 300, body: body(2) },
                ],
                CLIENT_A,
            )
            .await
            .unwrap();
        let (claim_id, _) = claims
            .create("p1", "orders", 60, 60, 10)
            .await
            .unwrap()
            .expect("claim something");

        queues.delete("p1", "orders").await.unwrap();
        assert!(!queues.exists("p1", "orders").await.unwrap(), "{}", t.name);

        // Recreating the queue must yield a clean slate.
        queues.create("p1", "orders", json!({})).await.unwrap();
        let listing = messages
            .list("p1", "orders", &Default::default())
            .await
            .unwrap();
        assert!(listing.items.is_empty(), "{}: stale messages", t.name);

        let err = claims.get("p1", "orders", &claim_id).await.unwrap_err();
        assert!(
            matches!(err, StorageError::ClaimDoesNotExist { .. }),
            "{}: stale claim survived delete: {err:?}",
            t.name
        );
    }
}

#[tokio::test]
async fn stats_count_claimed_free_and_bounds() {
    for t in all_drivers().await {
        let queues = t.driver.queues();
        let messages = t.driver.messages();
        let claims = t.driver.claims();

        queues.create("p1", "orders", json!({})).await.unwrap();

        let empty = queues.stats("p1", "orders").await.unwrap();
        assert_eq!((empty.total, empty.claimed, empty.free), (0, 0, 0));
        assert!(empty.oldest.is_none() && empty.newest.is_none());

        let ids = messages
            .post(
                "p1",
                "orders",
                (1..=3)
                    .map(|n| NewMessage { ttl: 300, body: body(n) })
                    .collect(),
                CLIENT_A,
            )
            .await
            .unwrap();
        claims.create("p1", "orders", 60, 60, 2).await.unwrap();

        let stats = queues.stats("p1", "orders").await.unwrap();
        assert_eq!(stats.total, 3, "{}", t.name);
        assert_eq!(stats.claimed, 2, "{}", t.name);
        assert_eq!(stats.free, 1, "{}", t.name);

        let oldest = stats.oldest.expect("oldest");
        let newest = stats.newest.expect("newest");
        assert_eq!(oldest.id, ids[0], "{}", t.name);
        assert_eq!(newest.id, ids[2], "{}", t.name);
    }
}
