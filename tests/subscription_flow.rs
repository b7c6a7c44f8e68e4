mod common;

use common::all_drivers;
use serde_json::json;
use zaqar::storage::{DataDriver, StorageError, SubscriptionPatch};

#[tokio::test]
async fn create_get_and_uniqueness_per_subscriber() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "events", json!({}))
            .await
            .unwrap();
        let subs = t.driver.subscriptions();

        let id = subs
            .create(
                "p1",
                "events",
                "http://example.com/hook",
                600,
                json!({"retries": 3}),
                false,
            )
            .await
            .unwrap();

        let sub = subs.get("p1", "events", &id).await.unwrap();
        assert_eq!(sub.subscriber, "http://example.com/hook");
        assert_eq!(sub.source, "events");
        assert_eq!(sub.options, json!({"retries": 3}));
        assert!(!sub.confirmed, "{}", t.name);

        // Unique by (project, queue, subscriber URI).
        let err = subs
            .create(
                "p1",
                "events",
                "http://example.com/hook",
                600,
                json!({}),
                false,
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, StorageError::SubscriptionAlreadyExists),
            "{}: {err:?}",
            t.name
        );

        // A different queue may reuse the URI.
        t.driver
            .queues()
            .create("p1", "other", json!({}))
            .await
            .unwrap();
        subs.create("p1", "other", "http://example.com/hook", 600, json!({}), false)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn listing_pages_and_skips_expired() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "events", json!({}))
            .await
            .unwrap();
        let subs = t.driver.subscriptions();

        for i in 0..5 {
            subs.create(
                "p1",
                "events",
                &format!("http://example.com/hook-{i}"),
                600,
                json!({}),
                true,
            )
            .await
            .unwrap();
        }

        let first = subs.list("p1", "events", None, 3).await.unwrap();
        assert_eq!(first.items.len(), 3, "{}", t.name);
        let marker = first.marker.expect("full page carries a marker");

        let rest = subs
            .list("p1", "events", Some(&marker), 10)
            .await
            .unwrap();
        assert_eq!(rest.items.len(), 2, "{}", t.name);
        assert!(rest.marker.is_none(), "{}", t.name);

        let mut all: Vec<String> = first
            .items
            .into_iter()
            .chain(rest.items)
            .map(|sub| sub.id)
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 5, "{}: pages overlap", t.name);
    }
}

#[tokio::test]
async fn update_patches_fields_and_guards_uniqueness() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "events", json!({}))
            .await
            .unwrap();
        let subs = t.driver.subscriptions();

        let first = subs
            .create("p1", "events", "http://example.com/a", 600, json!({}), true)
            .await
            .unwrap();
        let second = subs
            .create("p1", "events", "http://example.com/b", 600, json!({}), true)
            .await
            .unwrap();

        // Stealing another subscription's URI is a conflict.
        let err = subs
            .update(
                "p1",
                "events",
                &second,
                SubscriptionPatch {
                    subscriber: Some("http://example.com/a".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, StorageError::SubscriptionAlreadyExists),
            "{}: {err:?}",
            t.name
        );

        subs.update(
            "p1",
            "events",
            &first,
            SubscriptionPatch {
                ttl: Some(1_200),
                options: Some(json!({"retries": 5})),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let sub = subs.get("p1", "events", &first).await.unwrap();
        assert_eq!(sub.ttl, 1_200, "{}", t.name);
        assert_eq!(sub.options, json!({"retries": 5}), "{}", t.name);
    }
}

#[tokio::test]
async fn confirm_delete_and_exists() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "events", json!({}))
            .await
            .unwrap();
        let subs = t.driver.subscriptions();

        let id = subs
            .create("p1", "events", "http://example.com/c", 600, json!({}), false)
            .await
            .unwrap();
        assert!(subs.exists("p1", "events", &id).await.unwrap());

        subs.confirm("p1", "events", &id, true).await.unwrap();
        assert!(subs.get("p1", "events", &id).await.unwrap().confirmed);

        let found = subs
            .get_with_subscriber("p1", "events", "http://example.com/c")
            .await
            .unwrap();
        assert_eq!(found.id, id, "{}", t.name);

        subs.delete("p1", "events", &id).await.unwrap();
        // Idempotent delete.
        subs.delete("p1", "events", &id).await.unwrap();
        assert!(!subs.exists("p1", "events", &id).await.unwrap());

        let err = subs
            .confirm("p1", "events", &id, true)
            .await
            .unwrap_err();
        assert!(
            matches!(err, StorageError::SubscriptionDoesNotExist { .. }),
            "{}: {err:?}",
            t.name
        );
    }
}
