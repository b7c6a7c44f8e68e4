//! Boundary validation: headers, names, TTL ranges and payload sizes.
//!
//! The same limits are part of the core's configuration surface; anything
//! rejected here answers 400 without touching a driver.

use axum::http::HeaderMap;
use serde_json::Value;
use uuid::Uuid;

use crate::config::TransportConfig;
use crate::storage::{Result, StorageError};

pub const PROJECT_ID_HEADER: &str = "x-project-id";
pub const CLIENT_ID_HEADER: &str = "client-id";

const MAX_NAME_LEN: usize = 64;

/// Every v2 path is scoped by the project header.
pub fn project_id(headers: &HeaderMap) -> Result<String> {
    let raw = headers
        .get(PROJECT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if raw.is_empty() {
        return Err(StorageError::invalid("X-Project-ID header is required"));
    }
    if raw.len() > 256 || raw.contains('/') {
        return Err(StorageError::invalid("invalid X-Project-ID header"));
    }
    Ok(raw.to_string())
}

/// `Client-ID` is mandatory on message POST/GET; it is the echo identity.
pub fn client_uuid(headers: &HeaderMap) -> Result<String> {
    let raw = headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    Uuid::parse_str(raw)
        .map(|uuid| uuid.to_string())
        .map_err(|_| StorageError::invalid("Client-ID header must be a UUID"))
}

pub fn resource_name(kind: &str, name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if ok {
        Ok(())
    } else {
        Err(StorageError::invalid(format!(
            "invalid {kind} name: {name:?}"
        )))
    }
}

pub fn message_ttl(conf: &TransportConfig, ttl: u64) -> Result<()> {
    bounded("ttl", ttl, conf.min_message_ttl, conf.max_message_ttl)
}

pub fn claim_ttl(conf: &TransportConfig, ttl: u64) -> Result<()> {
    bounded("claim ttl", ttl, conf.min_claim_ttl, conf.max_claim_ttl)
}

pub fn claim_grace(conf: &TransportConfig, grace: u64) -> Result<()> {
    bounded("claim grace", grace, conf.min_claim_ttl, conf.max_claim_grace)
}

pub fn subscription_ttl(conf: &TransportConfig, ttl: u64) -> Result<()> {
    bounded("subscription ttl", ttl, conf.min_subscription_ttl, u64::MAX)
}

fn bounded(what: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(StorageError::invalid(format!(
            "{what} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

/// Page-size limit: positive and within the configured ceiling.
pub fn page_limit(requested: Option<usize>, default: usize, max: usize) -> Result<usize> {
    let limit = requested.unwrap_or(default);
    if limit == 0 || limit > max {
        return Err(StorageError::invalid(format!(
            "limit must be between 1 and {max}"
        )));
    }
    Ok(limit)
}

pub fn claim_limit(conf: &TransportConfig, requested: Option<usize>) -> Result<usize> {
    page_limit(
        requested,
        crate::storage::DEFAULT_MESSAGES_PER_CLAIM,
        conf.max_messages_per_claim,
    )
}

pub fn metadata_size(conf: &TransportConfig, metadata: &Value) -> Result<()> {
    let size = metadata.to_string().len();
    if size > conf.max_queue_metadata_size {
        return Err(StorageError::invalid(format!(
            "queue metadata exceeds {} bytes",
            conf.max_queue_metadata_size
        )));
    }
    Ok(())
}

pub fn post_body_size(conf: &TransportConfig, body: &Value) -> Result<()> {
    let size = body.to_string().len();
    if size > conf.max_messages_post_size {
        return Err(StorageError::invalid(format!(
            "message batch exceeds {} bytes",
            conf.max_messages_post_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn project_header_is_mandatory() {
        let headers = HeaderMap::new();
        assert!(project_id(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(PROJECT_ID_HEADER, HeaderValue::from_static("tenant-1"));
        assert_eq!(project_id(&headers).unwrap(), "tenant-1");
    }

    #[test]
    fn client_id_must_be_a_uuid() {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(client_uuid(&headers).is_err());

        headers.insert(
            CLIENT_ID_HEADER,
            HeaderValue::from_static("00000000-0000-4000-8000-000000000001"),
        );
        assert!(client_uuid(&headers).is_ok());
    }

    #[test]
    fn names_are_restricted() {
        assert!(resource_name("queue", "orders_2024").is_ok());
        assert!(resource_name("queue", "").is_err());
        assert!(resource_name("queue", "a/b").is_err());
        assert!(resource_name("queue", &"q".repeat(65)).is_err());
    }

    #[test]
    fn page_limits_are_clamped() {
        assert_eq!(page_limit(None, 10, 20).unwrap(), 10);
        assert_eq!(page_limit(Some(20), 10, 20).unwrap(), 20);
        assert!(page_limit(Some(0), 10, 20).is_err());
        assert!(page_limit(Some(21), 10, 20).is_err());
    }
}
