//! Transport layer: thin resource handlers over the storage controllers.
//!
//! Limits are enforced here, at the boundary; the handlers translate wire
//! requests into controller calls and map `StorageError` kinds onto
//! status codes.

pub mod http;
mod validation;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::bootstrap::Bootstrap;
use crate::notification::Notifier;
use crate::storage::StorageError;

pub use validation::*;

#[derive(Clone)]
pub struct AppState {
    pub boot: Arc<Bootstrap>,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(boot: Arc<Bootstrap>) -> Self {
        let notifier = Notifier::new(&boot.conf.notifier);
        Self { boot, notifier }
    }
}

/// Transport-facing error: a storage error plus its wire rendering.
pub struct ApiError(pub StorageError);

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = &self.0;
        let status = match err {
            StorageError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            _ if err.is_not_found() => StatusCode::NOT_FOUND,
            _ if err.is_not_permitted() => StatusCode::FORBIDDEN,
            _ if err.is_conflict() => StatusCode::CONFLICT,
            _ if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            StorageError::Internal(_) => {
                error!("internal storage failure: {err}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "title": status.canonical_reason().unwrap_or("Error"),
            "description": err.to_string(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
