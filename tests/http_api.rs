//! v2 API surface: status codes, headers, and end-to-end flows through
//! the axum router.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use zaqar::transport::http::create_router;
use zaqar::transport::AppState;
use zaqar::{Bootstrap, Config};

const PROJECT: &str = "tenant-1";
const CLIENT: &str = "33333333-3333-4333-8333-333333333333";

async fn test_router() -> Router {
    let mut conf = Config::default();
    // Short floors so API tests don't have to wait on production minimums.
    conf.transport.min_message_ttl = 1;
    conf.transport.min_claim_ttl = 1;
    conf.transport.min_subscription_ttl = 1;

    let boot = Arc::new(Bootstrap::new(conf).await.expect("bootstrap"));
    create_router(AppState::new(boot))
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-Project-ID", PROJECT)
        .header("Client-ID", CLIENT);

    if body.is_some() {
        builder = builder.header("Content-Type", "application/json");
    }

    builder
        .body(match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        })
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn queue_put_is_201_then_204() {
    let router = test_router().await;

    let created = router
        .clone()
        .oneshot(request("PUT", "/v2/queues/orders", Some(json!({}))))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let repeated = router
        .clone()
        .oneshot(request("PUT", "/v2/queues/orders", Some(json!({}))))
        .await
        .unwrap();
    assert_eq!(repeated.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn missing_project_header_is_a_400() {
    let router = test_router().await;

    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v2/queues")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn message_post_requires_a_client_uuid() {
    let router = test_router().await;

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/queues/orders/messages")
                .header("X-Project-ID", PROJECT)
                .header("Client-ID", "not-a-uuid")
                .header("Content-Type", "application/json")
                .body(Body::from(
                    json!({"messages": [{"ttl": 60, "body": {}}]}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn posting_to_a_missing_queue_lazily_creates_it() {
    let router = test_router().await;

    let response = router
        .clone()
        .oneshot(request(
            "POST",
            "/v2/queues/lazy/messages",
            Some(json!({"messages": [{"ttl": 60, "body": {"a": 1}}]})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["ids"].as_array().unwrap().len(), 1);

    let get = router
        .clone()
        .oneshot(request("GET", "/v2/queues/lazy", None))
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::OK);
}

#[tokio::test]
async fn post_claim_delete_cycle_over_http() {
    let router = test_router().await;

    router
        .clone()
        .oneshot(request("PUT", "/v2/queues/q", Some(json!({}))))
        .await
        .unwrap();

    // Post three messages.
    let post = router
        .clone()
        .oneshot(request(
            "POST",
            "/v2/queues/q/messages",
            Some(json!({"messages": [
                {"ttl": 60, "body": {"a": 1}},
                {"ttl": 60, "body": {"b": 2}},
                {"ttl": 60, "body": {"c": 3}},
            ]})),
        ))
        .await
        .unwrap();
    assert_eq!(post.status(), StatusCode::CREATED);

    // Claim two.
    let claim = router
        .clone()
        .oneshot(request(
            "POST",
            "/v2/queues/q/claims?limit=2",
            Some(json!({"ttl": 30, "grace": 60})),
        ))
        .await
        .unwrap();
    assert_eq!(claim.status(), StatusCode::CREATED);
    let claim_body = json_body(claim).await;
    let claim_id = claim_body["id"].as_str().unwrap().to_string();
    let claimed = claim_body["messages"].as_array().unwrap();
    assert_eq!(claimed.len(), 2);
    assert_eq!(claimed[0]["body"], json!({"a": 1}));
    assert_eq!(claimed[1]["body"], json!({"b": 2}));

    // Unclaimed listing (same client needs echo) shows only {c}.
    let listing = router
        .clone()
        .oneshot(request(
            "GET",
            "/v2/queues/q/messages?echo=true&include_claimed=false",
            None,
        ))
        .await
        .unwrap();
    assert_eq!(listing.status(), StatusCode::OK);
    let listing = json_body(listing).await;
    let visible = listing["messages"].as_array().unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0]["body"], json!({"c": 3}));

    // Delete the claimed messages with the claim id.
    for msg in claimed {
        let id = msg["id"].as_str().unwrap();
        let delete = router
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/v2/queues/q/messages/{id}?claim_id={claim_id}"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(delete.status(), StatusCode::NO_CONTENT);
    }

    // Claim get answers with an empty message list.
    let get_claim = router
        .clone()
        .oneshot(request("GET", &format!("/v2/queues/q/claims/{claim_id}"), None))
        .await
        .unwrap();
    assert_eq!(get_claim.status(), StatusCode::OK);
    let get_claim = json_body(get_claim).await;
    assert!(get_claim["messages"].as_array().unwrap().is_empty());

    // Release, then the released claim reads as gone on a second delete
    // too (idempotent).
    for _ in 0..2 {
        let release = router
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/v2/queues/q/claims/{claim_id}"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(release.status(), StatusCode::NO_CONTENT);
    }
}

#[tokio::test]
async fn claim_on_an_empty_queue_is_204() {
    let router = test_router().await;

    router
        .clone()
        .oneshot(request("PUT", "/v2/queues/idle", Some(json!({}))))
        .await
        .unwrap();

    let claim = router
        .clone()
        .oneshot(request(
            "POST",
            "/v2/queues/idle/claims",
            Some(json!({"ttl": 30, "grace": 60})),
        ))
        .await
        .unwrap();
    assert_eq!(claim.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn echo_suppression_over_http() {
    let router = test_router().await;

    router
        .clone()
        .oneshot(request(
            "POST",
            "/v2/queues/echoes/messages",
            Some(json!({"messages": [{"ttl": 60, "body": {"m": 1}}]})),
        ))
        .await
        .unwrap();

    // Same client, echo defaults to false: nothing comes back.
    let own = router
        .clone()
        .oneshot(request("GET", "/v2/queues/echoes/messages", None))
        .await
        .unwrap();
    let own = json_body(own).await;
    assert!(own["messages"].as_array().unwrap().is_empty());

    // A different client sees the message.
    let other = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v2/queues/echoes/messages")
                .header("X-Project-ID", PROJECT)
                .header("Client-ID", "44444444-4444-4444-8444-444444444444")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let other = json_body(other).await;
    assert_eq!(other["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn stats_and_missing_queue_404() {
    let router = test_router().await;

    let missing = router
        .clone()
        .oneshot(request("GET", "/v2/queues/nope/stats", None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    router
        .clone()
        .oneshot(request(
            "POST",
            "/v2/queues/counted/messages",
            Some(json!({"messages": [{"ttl": 60, "body": {}}]})),
        ))
        .await
        .unwrap();

    let stats = router
        .clone()
        .oneshot(request("GET", "/v2/queues/counted/stats", None))
        .await
        .unwrap();
    assert_eq!(stats.status(), StatusCode::OK);
    let stats = json_body(stats).await;
    assert_eq!(stats["messages"]["total"], 1);
    assert_eq!(stats["messages"]["free"], 1);
}

#[tokio::test]
async fn subscription_lifecycle_with_confirmation() {
    let router = test_router().await;

    let create = router
        .clone()
        .oneshot(request(
            "POST",
            "/v2/queues/subbed/subscriptions",
            Some(json!({"subscriber": "http://example.com/hook", "ttl": 600})),
        ))
        .await
        .unwrap();
    assert_eq!(create.status(), StatusCode::CREATED);
    let sub_id = json_body(create).await["subscription_id"]
        .as_str()
        .unwrap()
        .to_string();

    // Confirmable protocol starts unconfirmed.
    let get = router
        .clone()
        .oneshot(request(
            "GET",
            &format!("/v2/queues/subbed/subscriptions/{sub_id}"),
            None,
        ))
        .await
        .unwrap();
    let sub = json_body(get).await;
    assert_eq!(sub["confirmed"], json!(false));

    // Duplicate subscriber URI conflicts.
    let dup = router
        .clone()
        .oneshot(request(
            "POST",
            "/v2/queues/subbed/subscriptions",
            Some(json!({"subscriber": "http://example.com/hook", "ttl": 600})),
        ))
        .await
        .unwrap();
    assert_eq!(dup.status(), StatusCode::CONFLICT);

    // Confirm, then verify.
    let confirm = router
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/v2/queues/subbed/subscriptions/{sub_id}/confirm"),
            Some(json!({"confirmed": true})),
        ))
        .await
        .unwrap();
    assert_eq!(confirm.status(), StatusCode::NO_CONTENT);

    let get = router
        .clone()
        .oneshot(request(
            "GET",
            &format!("/v2/queues/subbed/subscriptions/{sub_id}"),
            None,
        ))
        .await
        .unwrap();
    let sub = json_body(get).await;
    assert_eq!(sub["confirmed"], json!(true));

    // Unsupported scheme is rejected up front.
    let bad = router
        .clone()
        .oneshot(request(
            "POST",
            "/v2/queues/subbed/subscriptions",
            Some(json!({"subscriber": "ftp://example.com", "ttl": 600})),
        ))
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn pool_admin_surface() {
    let router = test_router().await;

    let put = router
        .clone()
        .oneshot(request(
            "PUT",
            "/v2/pools/pool-1",
            Some(json!({"uri": "memory://pool-1", "weight": 10})),
        ))
        .await
        .unwrap();
    assert_eq!(put.status(), StatusCode::CREATED);

    // Same URI under a different name conflicts.
    let dup = router
        .clone()
        .oneshot(request(
            "PUT",
            "/v2/pools/pool-2",
            Some(json!({"uri": "memory://pool-1", "weight": 1})),
        ))
        .await
        .unwrap();
    assert_eq!(dup.status(), StatusCode::CONFLICT);

    let listing = router
        .clone()
        .oneshot(request("GET", "/v2/pools", None))
        .await
        .unwrap();
    assert_eq!(listing.status(), StatusCode::OK);
    let listing = json_body(listing).await;
    assert_eq!(listing["pools"].as_array().unwrap().len(), 1);

    let missing = router
        .clone()
        .oneshot(request("GET", "/v2/pools/ghost", None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn home_document_lists_resources() {
    let router = test_router().await;

    let home = router
        .clone()
        .oneshot(request("GET", "/v2", None))
        .await
        .unwrap();
    assert_eq!(home.status(), StatusCode::OK);
    let home = json_body(home).await;
    assert!(home["resources"]["rel/queues"].is_object());
    assert!(home["resources"]["rel/claims"].is_object());
}

#[tokio::test]
async fn bulk_delete_and_pop_query_forms() {
    let router = test_router().await;

    let post = router
        .clone()
        .oneshot(request(
            "POST",
            "/v2/queues/bulk/messages",
            Some(json!({"messages": [
                {"ttl": 60, "body": {"n": 1}},
                {"ttl": 60, "body": {"n": 2}},
                {"ttl": 60, "body": {"n": 3}},
            ]})),
        ))
        .await
        .unwrap();
    let ids: Vec<String> = json_body(post).await["ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();

    let pop = router
        .clone()
        .oneshot(request("DELETE", "/v2/queues/bulk/messages?pop=1", None))
        .await
        .unwrap();
    assert_eq!(pop.status(), StatusCode::OK);
    let popped = json_body(pop).await;
    assert_eq!(popped["messages"].as_array().unwrap().len(), 1);

    let bulk = router
        .clone()
        .oneshot(request(
            "DELETE",
            &format!("/v2/queues/bulk/messages?ids={},{}", ids[1], ids[2]),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(bulk.status(), StatusCode::NO_CONTENT);

    let neither = router
        .clone()
        .oneshot(request("DELETE", "/v2/queues/bulk/messages", None))
        .await
        .unwrap();
    assert_eq!(neither.status(), StatusCode::BAD_REQUEST);
}
