use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::transport::{validation, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub marker: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub detailed: bool,
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let project = validation::project_id(&headers)?;
    let conf = &state.boot.conf.transport;
    let limit = validation::page_limit(
        query.limit,
        conf.default_queues_per_page,
        conf.default_queues_per_page.max(100),
    )?;

    let page = state
        .boot
        .data
        .queues()
        .list(&project, query.marker.as_deref(), limit, query.detailed)
        .await?;

    Ok(Json(json!({
        "queues": page.items,
        "marker": page.marker,
    })))
}

pub async fn create(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> ApiResult<StatusCode> {
    let project = validation::project_id(&headers)?;
    validation::resource_name("queue", &queue)?;

    let metadata = body.map(|Json(value)| value).unwrap_or_else(|| json!({}));
    validation::metadata_size(&state.boot.conf.transport, &metadata)?;

    let created = state
        .boot
        .data
        .queues()
        .create(&project, &queue, metadata)
        .await?;

    Ok(if created {
        StatusCode::CREATED
    } else {
        StatusCode::NO_CONTENT
    })
}

pub async fn get(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let project = validation::project_id(&headers)?;
    let metadata = state
        .boot
        .data
        .queues()
        .get_metadata(&project, &queue)
        .await?;
    Ok(Json(metadata))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let project = validation::project_id(&headers)?;
    state.boot.data.queues().delete(&project, &queue).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_metadata(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let project = validation::project_id(&headers)?;
    let metadata = state
        .boot
        .data
        .queues()
        .get_metadata(&project, &queue)
        .await?;
    Ok(Json(metadata))
}

pub async fn put_metadata(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
    Json(metadata): Json<Value>,
) -> ApiResult<StatusCode> {
    let project = validation::project_id(&headers)?;
    validation::metadata_size(&state.boot.conf.transport, &metadata)?;

    state
        .boot
        .data
        .queues()
        .set_metadata(&project, &queue, metadata)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stats(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let project = validation::project_id(&headers)?;
    let stats = state.boot.data.queues().stats(&project, &queue).await?;
    Ok(Json(json!({ "messages": stats })))
}
