use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::notification;
use crate::storage::{StorageError, SubscriptionPatch, DEFAULT_SUBSCRIPTIONS_PER_PAGE};
use crate::transport::{validation, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    pub subscriber: String,
    pub ttl: u64,
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub marker: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmBody {
    pub confirmed: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateBody>,
) -> ApiResult<impl IntoResponse> {
    let project = validation::project_id(&headers)?;
    validation::resource_name("queue", &queue)?;
    validation::subscription_ttl(&state.boot.conf.transport, body.ttl)?;

    if !notification::is_supported_subscriber(&body.subscriber) {
        return Err(StorageError::invalid(format!(
            "unsupported subscriber uri: {}",
            body.subscriber
        ))
        .into());
    }

    // Subscriptions share the lazy-queue behavior of message posting.
    let queues_ctrl = state.boot.data.queues();
    if !queues_ctrl.exists(&project, &queue).await? {
        queues_ctrl.create(&project, &queue, json!({})).await?;
    }

    let confirmed = state.notifier.initially_confirmed(&body.subscriber);
    let id = state
        .boot
        .data
        .subscriptions()
        .create(
            &project,
            &queue,
            &body.subscriber,
            body.ttl,
            body.options,
            confirmed,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "subscription_id": id })),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let project = validation::project_id(&headers)?;
    let limit = validation::page_limit(query.limit, DEFAULT_SUBSCRIPTIONS_PER_PAGE, 100)?;

    let page = state
        .boot
        .data
        .subscriptions()
        .list(&project, &queue, query.marker.as_deref(), limit)
        .await?;

    Ok(Json(json!({
        "subscriptions": page.items,
        "marker": page.marker,
    })))
}

pub async fn get(
    State(state): State<AppState>,
    Path((queue, subscription_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let project = validation::project_id(&headers)?;
    let sub = state
        .boot
        .data
        .subscriptions()
        .get(&project, &queue, &subscription_id)
        .await?;
    Ok(Json(serde_json::to_value(sub).map_err(StorageError::from)?))
}

pub async fn update(
    State(state): State<AppState>,
    Path((queue, subscription_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(patch): Json<SubscriptionPatch>,
) -> ApiResult<StatusCode> {
    let project = validation::project_id(&headers)?;

    if let Some(ttl) = patch.ttl {
        validation::subscription_ttl(&state.boot.conf.transport, ttl)?;
    }
    if let Some(subscriber) = &patch.subscriber {
        if !notification::is_supported_subscriber(subscriber) {
            return Err(
                StorageError::invalid(format!("unsupported subscriber uri: {subscriber}")).into(),
            );
        }
    }

    state
        .boot
        .data
        .subscriptions()
        .update(&project, &queue, &subscription_id, patch)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove(
    State(state): State<AppState>,
    Path((queue, subscription_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let project = validation::project_id(&headers)?;
    state
        .boot
        .data
        .subscriptions()
        .delete(&project, &queue, &subscription_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn confirm(
    State(state): State<AppState>,
    Path((queue, subscription_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<ConfirmBody>,
) -> ApiResult<StatusCode> {
    let project = validation::project_id(&headers)?;
    state
        .boot
        .data
        .subscriptions()
        .confirm(&project, &queue, &subscription_id, body.confirmed)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
