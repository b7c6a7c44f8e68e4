mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{all_drivers, body, CLIENT_A};
use serde_json::json;
use tokio::time::sleep;
use zaqar::core::message::NewMessage;
use zaqar::storage::memory::MemoryDriver;
use zaqar::storage::{DataDriver, ListOptions, StorageError};

fn batch(range: std::ops::RangeInclusive<u64>) -> Vec<NewMessage> {
    range
        .map(|n| NewMessage {
            ttl: 300,
            body: body(n),
        })
        .collect()
}

fn unclaimed_listing() -> ListOptions {
    ListOptions {
        echo: true,
        include_claimed: false,
        client_uuid: Some(CLIENT_A.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn post_claim_delete_cycle() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "work", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();
        let claims = t.driver.claims();

        let ids = messages
            .post("p1", "work", batch(1..=3), CLIENT_A)
            .await
            .unwrap();

        // Claim the first two; bodies must come back in order.
        let (claim_id, claimed) = claims
            .create("p1", "work", 30, 60, 2)
            .await
            .unwrap()
            .expect("messages available");
        assert_eq!(claimed.len(), 2, "{}", t.name);
        assert_eq!(claimed[0].id, ids[0], "{}", t.name);
        assert_eq!(claimed[1].id, ids[1], "{}", t.name);

        // Unclaimed listing shows only the third message.
        let visible = messages
            .list("p1", "work", &unclaimed_listing())
            .await
            .unwrap();
        let bodies: Vec<_> = visible.items.iter().map(|m| m.body.clone()).collect();
        assert_eq!(bodies, vec![body(3)], "{}", t.name);

        // The worker deletes each claimed message with the claim id.
        for id in [&ids[0], &ids[1]] {
            messages
                .delete("p1", "work", id, Some(&claim_id))
                .await
                .unwrap();
        }

        let (meta, remaining) = claims.get("p1", "work", &claim_id).await.unwrap();
        assert_eq!(meta.id, claim_id);
        assert!(remaining.is_empty(), "{}: deleted messages linger", t.name);

        // Message three is untouched.
        let visible = messages
            .list("p1", "work", &unclaimed_listing())
            .await
            .unwrap();
        assert_eq!(visible.items.len(), 1, "{}", t.name);
    }
}

#[tokio::test]
async fn claim_expiry_frees_messages_and_claim_get_404s() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "work", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();
        let claims = t.driver.claims();

        messages
            .post("p1", "work", batch(1..=1), CLIENT_A)
            .await
            .unwrap();
        let (claim_id, _) = claims
            .create("p1", "work", 1, 60, 10)
            .await
            .unwrap()
            .expect("claimed");

        // While the claim is live the message is hidden.
        let hidden = messages
            .list("p1", "work", &unclaimed_listing())
            .await
            .unwrap();
        assert!(hidden.items.is_empty(), "{}", t.name);

        sleep(Duration::from_secs(2)).await;

        let err = claims.get("p1", "work", &claim_id).await.unwrap_err();
        assert!(
            matches!(err, StorageError::ClaimDoesNotExist { .. }),
            "{}: lapsed claim still addressable: {err:?}",
            t.name
        );

        // The message lapsed back to visible (grace kept it alive).
        let visible = messages
            .list("p1", "work", &unclaimed_listing())
            .await
            .unwrap();
        assert_eq!(visible.items.len(), 1, "{}", t.name);
    }
}

#[tokio::test]
async fn renewal_rebases_the_lease() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "work", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();
        let claims = t.driver.claims();

        messages
            .post("p1", "work", batch(1..=1), CLIENT_A)
            .await
            .unwrap();
        let (claim_id, _) = claims
            .create("p1", "work", 2, 60, 10)
            .await
            .unwrap()
            .expect("claimed");

        sleep(Duration::from_secs(1)).await;

        // Renew before expiry with a longer ttl.
        claims
            .update("p1", "work", &claim_id, 30, 60)
            .await
            .unwrap();

        // Past the original expiry the claim must still hold.
        sleep(Duration::from_secs(2)).await;
        let (meta, held) = claims.get("p1", "work", &claim_id).await.unwrap();
        assert_eq!(meta.ttl, 30, "{}", t.name);
        assert_eq!(held.len(), 1, "{}", t.name);

        let hidden = messages
            .list("p1", "work", &unclaimed_listing())
            .await
            .unwrap();
        assert!(hidden.items.is_empty(), "{}: renewal lost the lease", t.name);
    }
}

#[tokio::test]
async fn grace_window_blocks_the_old_holder_but_offers_the_message_again() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "work", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();
        let claims = t.driver.claims();

        let ids = messages
            .post("p1", "work", batch(1..=1), CLIENT_A)
            .await
            .unwrap();
        let (old_claim, _) = claims
            .create("p1", "work", 1, 10, 10)
            .await
            .unwrap()
            .expect("claimed");

        sleep(Duration::from_secs(2)).await;

        // The old holder's conditional delete must fail after expiry.
        let err = messages
            .delete("p1", "work", &ids[0], Some(&old_claim))
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                StorageError::MessageNotClaimed { .. } | StorageError::ClaimDoesNotExist { .. }
            ),
            "{}: stale worker deleted a lapsed message: {err:?}",
            t.name
        );

        // A fresh claim receives the same message.
        let (new_claim, reclaimed) = claims
            .create("p1", "work", 30, 60, 10)
            .await
            .unwrap()
            .expect("message re-offered");
        assert_ne!(new_claim, old_claim);
        assert_eq!(reclaimed.len(), 1, "{}", t.name);
        assert_eq!(reclaimed[0].id, ids[0], "{}", t.name);
    }
}

#[tokio::test]
async fn conditional_delete_rejects_the_wrong_claim() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "work", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();
        let claims = t.driver.claims();

        let ids = messages
            .post("p1", "work", batch(1..=2), CLIENT_A)
            .await
            .unwrap();
        let (claim_a, _) = claims
            .create("p1", "work", 60, 60, 1)
            .await
            .unwrap()
            .expect("claimed first");
        let (claim_b, _) = claims
            .create("p1", "work", 60, 60, 1)
            .await
            .unwrap()
            .expect("claimed second");

        // Deleting message 1 with claim B's id is not permitted.
        let err = messages
            .delete("p1", "work", &ids[0], Some(&claim_b))
            .await
            .unwrap_err();
        assert!(
            matches!(err, StorageError::MessageIsClaimedBy { .. }),
            "{}: {err:?}",
            t.name
        );

        // An unconditional delete of a claimed message is refused too.
        let err = messages.delete("p1", "work", &ids[0], None).await.unwrap_err();
        assert!(matches!(err, StorageError::MessageIsClaimed { .. }), "{}", t.name);

        // The rightful claims succeed.
        messages
            .delete("p1", "work", &ids[0], Some(&claim_a))
            .await
            .unwrap();
        messages
            .delete("p1", "work", &ids[1], Some(&claim_b))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn overlapping_claims_never_share_messages() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "work", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();
        let claims = t.driver.claims();

        messages
            .post("p1", "work", batch(1..=6), CLIENT_A)
            .await
            .unwrap();

        let first = claims
            .create("p1", "work", 60, 60, 4)
            .await
            .unwrap()
            .expect("first batch");
        let second = claims
            .create("p1", "work", 60, 60, 4)
            .await
            .unwrap()
            .expect("second batch");

        let overlap: Vec<_> = first
            .1
            .iter()
            .filter(|m| second.1.iter().any(|n| n.id == m.id))
            .collect();
        assert!(overlap.is_empty(), "{}: claims overlap: {overlap:?}", t.name);
        assert_eq!(first.1.len() + second.1.len(), 6, "{}", t.name);
    }
}

#[tokio::test]
async fn release_is_idempotent_and_frees_messages() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "work", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();
        let claims = t.driver.claims();

        messages
            .post("p1", "work", batch(1..=2), CLIENT_A)
            .await
            .unwrap();
        let (claim_id, _) = claims
            .create("p1", "work", 60, 60, 10)
            .await
            .unwrap()
            .expect("claimed");

        claims.delete("p1", "work", &claim_id).await.unwrap();
        // Idempotent: a second release succeeds as well.
        claims.delete("p1", "work", &claim_id).await.unwrap();

        let visible = messages
            .list("p1", "work", &unclaimed_listing())
            .await
            .unwrap();
        assert_eq!(visible.items.len(), 2, "{}: release must free", t.name);
    }
}

#[tokio::test]
async fn gc_sweeps_lapsed_claim_records() {
    for t in all_drivers().await {
        t.driver
            .queues()
            .create("p1", "work", json!({}))
            .await
            .unwrap();
        let messages = t.driver.messages();
        let claims = t.driver.claims();

        messages
            .post("p1", "work", batch(1..=2), CLIENT_A)
            .await
            .unwrap();
        claims
            .create("p1", "work", 1, 5, 1)
            .await
            .unwrap()
            .expect("short claim");
        let (live_claim, _) = claims
            .create("p1", "work", 60, 60, 1)
            .await
            .unwrap()
            .expect("long claim");

        sleep(Duration::from_secs(2)).await;

        let removed = claims.gc("p1", "work").await.unwrap();
        assert_eq!(removed, 1, "{}: exactly the lapsed claim", t.name);

        // The live claim is untouched by the sweep.
        assert!(claims.get("p1", "work", &live_claim).await.is_ok(), "{}", t.name);
    }
}

#[tokio::test]
async fn concurrent_claims_on_one_message_have_a_single_winner() {
    let driver: Arc<dyn DataDriver> = Arc::new(MemoryDriver::new());
    driver
        .queues()
        .create("p1", "work", json!({}))
        .await
        .unwrap();
    driver
        .messages()
        .post("p1", "work", batch(1..=1), CLIENT_A)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let claims = driver.claims();
        handles.push(tokio::spawn(async move {
            claims.create("p1", "work", 60, 60, 1).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one claim may own the message");
}

#[tokio::test]
async fn exhausted_messages_move_to_the_dead_letter_queue() {
    for t in all_drivers().await {
        let metadata = json!({
            "_max_claim_count": 2,
            "_dead_letter_queue": "failed",
            "_dead_letter_queue_messages_ttl": 300,
        });
        t.driver
            .queues()
            .create("p1", "work", metadata)
            .await
            .unwrap();
        let messages = t.driver.messages();
        let claims = t.driver.claims();

        let ids = messages
            .post("p1", "work", batch(1..=1), CLIENT_A)
            .await
            .unwrap();

        // Claim and release twice; the third attempt diverts the message.
        for _ in 0..2 {
            let (claim_id, claimed) = claims
                .create("p1", "work", 60, 60, 10)
                .await
                .unwrap()
                .expect("claimable");
            assert_eq!(claimed.len(), 1, "{}", t.name);
            claims.delete("p1", "work", &claim_id).await.unwrap();
        }

        let third = claims.create("p1", "work", 60, 60, 10).await.unwrap();
        assert!(third.is_none(), "{}: exhausted message was claimed", t.name);

        let dead = messages
            .list("p1", "failed", &unclaimed_listing())
            .await
            .unwrap();
        assert_eq!(dead.items.len(), 1, "{}: message not diverted", t.name);
        assert_eq!(dead.items[0].id, ids[0], "{}", t.name);

        let source = messages
            .list("p1", "work", &unclaimed_listing())
            .await
            .unwrap();
        assert!(source.items.is_empty(), "{}: message left behind", t.name);
    }
}
