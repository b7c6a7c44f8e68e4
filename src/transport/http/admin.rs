//! Admin-scoped pool and flavor registries.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::storage::{Flavor, Pool, PoolPatch, DEFAULT_POOLS_PER_PAGE};
use crate::transport::{validation, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub marker: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PoolBody {
    pub uri: String,
    pub weight: i64,
    pub flavor: Option<String>,
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Deserialize)]
pub struct FlavorBody {
    #[serde(default)]
    pub capabilities: Value,
}

pub async fn list_pools(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let limit = validation::page_limit(query.limit, DEFAULT_POOLS_PER_PAGE, 100)?;
    let page = state
        .boot
        .control
        .pools()
        .list(query.marker.as_deref(), limit)
        .await?;

    Ok(Json(json!({
        "pools": page.items,
        "marker": page.marker,
    })))
}

pub async fn put_pool(
    State(state): State<AppState>,
    Path(pool): Path<String>,
    Json(body): Json<PoolBody>,
) -> ApiResult<StatusCode> {
    validation::resource_name("pool", &pool)?;

    state
        .boot
        .control
        .pools()
        .create(Pool {
            name: pool,
            uri: body.uri,
            weight: body.weight,
            flavor: body.flavor,
            options: body.options,
        })
        .await?;
    Ok(StatusCode::CREATED)
}

pub async fn get_pool(
    State(state): State<AppState>,
    Path(pool): Path<String>,
) -> ApiResult<Json<Pool>> {
    Ok(Json(state.boot.control.pools().get(&pool).await?))
}

pub async fn patch_pool(
    State(state): State<AppState>,
    Path(pool): Path<String>,
    Json(patch): Json<PoolPatch>,
) -> ApiResult<StatusCode> {
    state.boot.control.pools().update(&pool, patch).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_pool(
    State(state): State<AppState>,
    Path(pool): Path<String>,
) -> ApiResult<StatusCode> {
    state.boot.control.pools().delete(&pool).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_flavors(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let project = validation::project_id(&headers)?;
    let limit = validation::page_limit(query.limit, DEFAULT_POOLS_PER_PAGE, 100)?;

    let page = state
        .boot
        .control
        .flavors()
        .list(&project, query.marker.as_deref(), limit)
        .await?;

    Ok(Json(json!({
        "flavors": page.items,
        "marker": page.marker,
    })))
}

pub async fn put_flavor(
    State(state): State<AppState>,
    Path(flavor): Path<String>,
    headers: HeaderMap,
    Json(body): Json<FlavorBody>,
) -> ApiResult<StatusCode> {
    let project = validation::project_id(&headers)?;
    validation::resource_name("flavor", &flavor)?;

    state
        .boot
        .control
        .flavors()
        .create(Flavor {
            name: flavor,
            project,
            capabilities: body.capabilities,
        })
        .await?;
    Ok(StatusCode::CREATED)
}

pub async fn get_flavor(
    State(state): State<AppState>,
    Path(flavor): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Flavor>> {
    let project = validation::project_id(&headers)?;
    Ok(Json(
        state.boot.control.flavors().get(&project, &flavor).await?,
    ))
}

pub async fn patch_flavor(
    State(state): State<AppState>,
    Path(flavor): Path<String>,
    headers: HeaderMap,
    Json(body): Json<FlavorBody>,
) -> ApiResult<StatusCode> {
    let project = validation::project_id(&headers)?;
    state
        .boot
        .control
        .flavors()
        .update(&project, &flavor, body.capabilities)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_flavor(
    State(state): State<AppState>,
    Path(flavor): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let project = validation::project_id(&headers)?;
    state
        .boot
        .control
        .flavors()
        .delete(&project, &flavor)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
