//! HTTP (v2) API server and routing.
//!
//! Thin handlers only: extract, validate at the boundary, call the storage
//! controllers, map typed errors to status codes.

pub mod admin;
pub mod claims;
pub mod home;
pub mod messages;
pub mod queues;
pub mod subscriptions;

use std::time::Duration;

use axum::http::{header::CONTENT_TYPE, Method};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::{Any, CorsLayer}, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::transport::AppState;

/// Builds the complete v2 router.
pub fn create_router(state: AppState) -> Router {
    let request_timeout = Duration::from_millis(state.boot.conf.server.request_timeout_ms);

    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::PUT,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([CONTENT_TYPE])
        .allow_origin(Any);

    Router::new()
        .route("/v2", get(home::home_document))
        .route("/v2/health", get(health))
        .route("/v2/queues", get(queues::list))
        .route(
            "/v2/queues/:queue",
            put(queues::create).get(queues::get).delete(queues::remove),
        )
        .route(
            "/v2/queues/:queue/metadata",
            get(queues::get_metadata).put(queues::put_metadata),
        )
        .route("/v2/queues/:queue/stats", get(queues::stats))
        .route(
            "/v2/queues/:queue/messages",
            post(messages::post_messages)
                .get(messages::list)
                .delete(messages::bulk_remove),
        )
        .route(
            "/v2/queues/:queue/messages/:message_id",
            get(messages::get).delete(messages::remove),
        )
        .route("/v2/queues/:queue/claims", post(claims::create))
        .route(
            "/v2/queues/:queue/claims/:claim_id",
            get(claims::get).patch(claims::update).delete(claims::remove),
        )
        .route(
            "/v2/queues/:queue/subscriptions",
            post(subscriptions::create).get(subscriptions::list),
        )
        .route(
            "/v2/queues/:queue/subscriptions/:subscription_id",
            get(subscriptions::get)
                .patch(subscriptions::update)
                .delete(subscriptions::remove),
        )
        .route(
            "/v2/queues/:queue/subscriptions/:subscription_id/confirm",
            put(subscriptions::confirm),
        )
        .route("/v2/pools", get(admin::list_pools))
        .route(
            "/v2/pools/:pool",
            put(admin::put_pool)
                .get(admin::get_pool)
                .patch(admin::patch_pool)
                .delete(admin::delete_pool),
        )
        .route("/v2/flavors", get(admin::list_flavors))
        .route(
            "/v2/flavors/:flavor",
            put(admin::put_flavor)
                .get(admin::get_flavor)
                .patch(admin::patch_flavor)
                .delete(admin::delete_flavor),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout))
                .layer(cors),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Binds and serves until the task is cancelled.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.boot.conf.server.bind_addr.clone();
    info!("Starting zaqar API on {}", bind_addr);

    let listener = TcpListener::bind(&bind_addr).await?;
    let router = create_router(state);
    axum::serve(listener, router).await?;
    Ok(())
}
