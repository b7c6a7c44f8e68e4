use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::message::NewMessage;
use crate::storage::{ListOptions, StorageError};
use crate::transport::{validation, ApiResult, AppState};

/// TTL applied when a posted message does not carry one.
const DEFAULT_MESSAGE_TTL: u64 = 3_600;

#[derive(Debug, Deserialize)]
pub struct PostBody {
    pub messages: Vec<PostedMessage>,
}

#[derive(Debug, Deserialize)]
pub struct PostedMessage {
    pub ttl: Option<u64>,
    pub body: Value,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub marker: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub echo: bool,
    #[serde(default)]
    pub include_claimed: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub claim_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteQuery {
    /// Comma-separated message ids.
    pub ids: Option<String>,
    /// Claim-and-delete this many messages instead.
    pub pop: Option<usize>,
}

pub async fn post_messages(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PostBody>,
) -> ApiResult<impl IntoResponse> {
    let project = validation::project_id(&headers)?;
    let client = validation::client_uuid(&headers)?;
    validation::resource_name("queue", &queue)?;

    let conf = &state.boot.conf.transport;
    if body.messages.is_empty() {
        return Err(StorageError::invalid("no messages to enqueue").into());
    }

    let mut batch = Vec::with_capacity(body.messages.len());
    let mut batch_size = 0usize;
    for message in body.messages {
        let ttl = message.ttl.unwrap_or(DEFAULT_MESSAGE_TTL);
        validation::message_ttl(conf, ttl)?;
        batch_size += message.body.to_string().len();
        batch.push(NewMessage {
            ttl,
            body: message.body,
        });
    }
    if batch_size > conf.max_messages_post_size {
        return Err(StorageError::invalid(format!(
            "message batch exceeds {} bytes",
            conf.max_messages_post_size
        ))
        .into());
    }

    let messages_ctrl = state.boot.data.messages();
    let ids = match messages_ctrl
        .post(&project, &queue, batch.clone(), &client)
        .await
    {
        // Queues are lazy in v2: posting to a missing queue creates it.
        Err(err) if matches!(err, StorageError::QueueDoesNotExist { .. }) => {
            state
                .boot
                .data
                .queues()
                .create(&project, &queue, json!({}))
                .await?;
            messages_ctrl.post(&project, &queue, batch, &client).await?
        }
        other => other?,
    };

    // Push notifications fan out off the request path.
    {
        let subscriptions = state.boot.data.subscriptions();
        let notifier = state.notifier.clone();
        let project = project.clone();
        let queue = queue.clone();
        let posted = messages_ctrl.bulk_get(&project, &queue, &ids).await?;
        tokio::spawn(async move {
            notifier
                .notify_post(subscriptions, &project, &queue, posted)
                .await;
        });
    }

    let resources: Vec<String> = ids
        .iter()
        .map(|id| format!("/v2/queues/{queue}/messages/{id}"))
        .collect();

    Ok((
        StatusCode::CREATED,
        Json(json!({ "resources": resources, "ids": ids })),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let project = validation::project_id(&headers)?;
    let client = validation::client_uuid(&headers)?;
    let conf = &state.boot.conf.transport;
    let limit = validation::page_limit(
        query.limit,
        conf.default_messages_per_page,
        conf.max_messages_per_page,
    )?;

    let opts = ListOptions {
        marker: query.marker,
        limit,
        echo: query.echo,
        include_claimed: query.include_claimed,
        client_uuid: Some(client),
    };

    let page = state
        .boot
        .data
        .messages()
        .list(&project, &queue, &opts)
        .await?;

    Ok(Json(json!({
        "messages": page.items,
        "marker": page.marker,
    })))
}

pub async fn get(
    State(state): State<AppState>,
    Path((queue, message_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let project = validation::project_id(&headers)?;
    let message = state
        .boot
        .data
        .messages()
        .get(&project, &queue, &message_id)
        .await?;
    Ok(Json(serde_json::to_value(message).map_err(StorageError::from)?))
}

pub async fn remove(
    State(state): State<AppState>,
    Path((queue, message_id)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<StatusCode> {
    let project = validation::project_id(&headers)?;
    state
        .boot
        .data
        .messages()
        .delete(&project, &queue, &message_id, query.claim_id.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn bulk_remove(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
    Query(query): Query<BulkDeleteQuery>,
) -> ApiResult<impl IntoResponse> {
    let project = validation::project_id(&headers)?;
    let conf = &state.boot.conf.transport;

    match (query.pop, query.ids) {
        (Some(count), None) => {
            let limit = validation::page_limit(Some(count), 1, conf.max_messages_per_page)?;
            let popped = state
                .boot
                .data
                .messages()
                .pop(&project, &queue, limit)
                .await?;
            Ok((StatusCode::OK, Json(json!({ "messages": popped }))).into_response())
        }
        (None, Some(ids)) => {
            let ids: Vec<String> = ids
                .split(',')
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
            if ids.is_empty() {
                return Err(StorageError::invalid("no message ids given").into());
            }

            state
                .boot
                .data
                .messages()
                .bulk_delete(&project, &queue, &ids, None)
                .await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        _ => Err(StorageError::invalid("specify either `ids` or `pop`").into()),
    }
}
