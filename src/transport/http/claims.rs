use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::transport::{validation, ApiResult, AppState};

const DEFAULT_CLAIM_TTL: u64 = 300;
const DEFAULT_CLAIM_GRACE: u64 = 60;

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    pub ttl: Option<u64>,
    pub grace: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    pub ttl: Option<u64>,
    pub grace: Option<u64>,
}

pub async fn create(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
    Query(query): Query<CreateQuery>,
    body: Option<Json<CreateBody>>,
) -> ApiResult<impl IntoResponse> {
    let project = validation::project_id(&headers)?;
    let conf = &state.boot.conf.transport;

    let body = body.map(|Json(body)| body).unwrap_or(CreateBody {
        ttl: None,
        grace: None,
    });
    let ttl = body.ttl.unwrap_or(DEFAULT_CLAIM_TTL);
    let grace = body.grace.unwrap_or(DEFAULT_CLAIM_GRACE);
    validation::claim_ttl(conf, ttl)?;
    validation::claim_grace(conf, grace)?;
    let limit = validation::claim_limit(conf, query.limit)?;

    let outcome = state
        .boot
        .data
        .claims()
        .create(&project, &queue, ttl, grace, limit)
        .await?;

    match outcome {
        // Nothing to claim: success with no content.
        None => Ok(StatusCode::NO_CONTENT.into_response()),
        Some((claim_id, messages)) => {
            let body = Json(json!({
                "id": claim_id,
                "ttl": ttl,
                "grace": grace,
                "messages": messages,
            }));
            Ok((StatusCode::CREATED, body).into_response())
        }
    }
}

pub async fn get(
    State(state): State<AppState>,
    Path((queue, claim_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let project = validation::project_id(&headers)?;

    let (meta, messages) = state
        .boot
        .data
        .claims()
        .get(&project, &queue, &claim_id)
        .await?;

    Ok(Json(json!({
        "id": meta.id,
        "ttl": meta.ttl,
        "age": meta.age,
        "messages": messages,
    })))
}

pub async fn update(
    State(state): State<AppState>,
    Path((queue, claim_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<UpdateBody>,
) -> ApiResult<StatusCode> {
    let project = validation::project_id(&headers)?;
    let conf = &state.boot.conf.transport;

    // Renewal re-bases both ttl and grace from now.
    let ttl = body.ttl.unwrap_or(DEFAULT_CLAIM_TTL);
    let grace = body.grace.unwrap_or(DEFAULT_CLAIM_GRACE);
    validation::claim_ttl(conf, ttl)?;
    validation::claim_grace(conf, grace)?;

    state
        .boot
        .data
        .claims()
        .update(&project, &queue, &claim_id, ttl, grace)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove(
    State(state): State<AppState>,
    Path((queue, claim_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let project = validation::project_id(&headers)?;
    state
        .boot
        .data
        .claims()
        .delete(&project, &queue, &claim_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
