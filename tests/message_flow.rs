mod common;

use common::{all_drivers, body, CLIENT_A, CLIENT_B};
use serde_json::json;
use zaqar::core::message::NewMessage;
use zaqar::storage::{DataDriver, ListOptions, SortOrder, StorageError};

fn batch(range: std::ops::RangeInclusive<u64>) -> Vec<NewMessage> {
    range
        .map(|n| NewMessage {
            ttl: 300,
            body: body(n),
        })
        .collect()
}

#[tokio::test]
async fn posting_preserves_fifo_order_across_pages() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "orders", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();

        let ids = messages
            .post("p1", "orders", batch(1..=7), CLIENT_A)
            .await
            .unwrap();
        assert_eq!(ids.len(), 7);

        // Page through with forwarded markers; concatenation must be a
        // prefix of the post order.
        let mut seen = Vec::new();
        let mut marker = None;
        loop {
            let page = messages
                .list(
                    "p1",
                    "orders",
                    &ListOptions {
                        marker: marker.clone(),
                        limit: 3,
                        echo: true,
                        include_claimed: false,
                        client_uuid: Some(CLIENT_A.to_string()),
                    },
                )
                .await
                .unwrap();
            if page.items.is_empty() {
                break;
            }
            seen.extend(page.items.iter().map(|m| m.id.clone()));
            marker = page.marker;
        }

        assert_eq!(seen, ids, "{}: listing is not FIFO", t.name);
    }
}

#[tokio::test]
async fn echo_suppression_hides_own_messages_only() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "orders", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();
        let posted = messages
            .post("p1", "orders", batch(1..=1), CLIENT_A)
            .await
            .unwrap();

        let list_for = |client: &str, echo: bool| ListOptions {
            marker: None,
            limit: 10,
            echo,
            include_claimed: false,
            client_uuid: Some(client.to_string()),
        };

        let own = messages
            .list("p1", "orders", &list_for(CLIENT_A, false))
            .await
            .unwrap();
        assert!(own.items.is_empty(), "{}: echo not suppressed", t.name);

        let own_echoed = messages
            .list("p1", "orders", &list_for(CLIENT_A, true))
            .await
            .unwrap();
        assert_eq!(own_echoed.items.len(), 1, "{}", t.name);

        let other = messages
            .list("p1", "orders", &list_for(CLIENT_B, false))
            .await
            .unwrap();
        assert_eq!(other.items.len(), 1, "{}", t.name);
        assert_eq!(other.items[0].id, posted[0], "{}", t.name);
    }
}

#[tokio::test]
async fn get_and_bulk_get_skip_missing_messages() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "orders", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();
        let ids = messages
            .post("p1", "orders", batch(1..=2), CLIENT_A)
            .await
            .unwrap();

        let one = messages.get("p1", "orders", &ids[0]).await.unwrap();
        assert_eq!(one.body, body(1));

        let err = messages.get("p1", "orders", "missing").await.unwrap_err();
        assert!(matches!(err, StorageError::MessageDoesNotExist { .. }));

        let got = messages
            .bulk_get(
                "p1",
                "orders",
                &[ids[0].clone(), "missing".to_string(), ids[1].clone()],
            )
            .await
            .unwrap();
        assert_eq!(got.len(), 2, "{}: missing ids must be dropped", t.name);
    }
}

#[tokio::test]
async fn unconditional_delete_is_idempotent() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "orders", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();
        let ids = messages
            .post("p1", "orders", batch(1..=1), CLIENT_A)
            .await
            .unwrap();

        messages.delete("p1", "orders", &ids[0], None).await.unwrap();
        // Deleting again (or in a queue that never existed) succeeds.
        messages.delete("p1", "orders", &ids[0], None).await.unwrap();
        messages.delete("p1", "ghost", &ids[0], None).await.unwrap();

        let listing = messages
            .list("p1", "orders", &Default::default())
            .await
            .unwrap();
        assert!(listing.items.is_empty(), "{}", t.name);
    }
}

#[tokio::test]
async fn pop_claims_and_deletes_in_order() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "orders", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();
        messages
            .post("p1", "orders", batch(1..=3), CLIENT_A)
            .await
            .unwrap();

        let popped = messages.pop("p1", "orders", 2).await.unwrap();
        let bodies: Vec<_> = popped.iter().map(|m| m.body.clone()).collect();
        assert_eq!(bodies, vec![body(1), body(2)], "{}", t.name);

        let rest = messages
            .list(
                "p1",
                "orders",
                &ListOptions {
                    echo: true,
                    client_uuid: Some(CLIENT_A.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(rest.items.len(), 1, "{}", t.name);
        assert_eq!(rest.items[0].body, body(3), "{}", t.name);
    }
}

#[tokio::test]
async fn first_reports_the_bounding_messages() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "orders", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();

        assert!(messages
            .first("p1", "orders", SortOrder::Oldest)
            .await
            .unwrap()
            .is_none());

        let ids = messages
            .post("p1", "orders", batch(1..=3), CLIENT_A)
            .await
            .unwrap();

        let oldest = messages
            .first("p1", "orders", SortOrder::Oldest)
            .await
            .unwrap()
            .unwrap();
        let newest = messages
            .first("p1", "orders", SortOrder::Newest)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(oldest.id, ids[0], "{}", t.name);
        assert_eq!(newest.id, ids[2], "{}", t.name);
    }
}

#[tokio::test]
async fn expired_messages_become_invisible() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "orders", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();

        messages
            .post(
                "p1",
                "orders",
                vec![
                    NewMessage { ttl: 1, body: body(1) },
                    NewMessage { ttl: 300, body: body(2) },
                ],
                CLIENT_A,
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;

        let listing = messages
            .list(
                "p1",
                "orders",
                &ListOptions {
                    echo: true,
                    client_uuid: Some(CLIENT_A.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let bodies: Vec<_> = listing.items.iter().map(|m| m.body.clone()).collect();
        assert_eq!(bodies, vec![body(2)], "{}: expiry leak", t.name);
    }
}
