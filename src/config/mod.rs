use serde::Deserialize;
use std::{fs, path::Path};

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Limits enforced at the transport boundary. The storage core accepts the
/// same values and answers `InvalidRequest` when they are violated.
#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_max_message_size")]
    pub max_messages_post_size: usize,
    #[serde(default = "default_max_metadata_size")]
    pub max_queue_metadata_size: usize,
    #[serde(default = "default_max_messages_per_claim")]
    pub max_messages_per_claim: usize,
    #[serde(default = "default_max_messages_per_page")]
    pub max_messages_per_page: usize,
    #[serde(default = "default_queues_per_page")]
    pub default_queues_per_page: usize,
    #[serde(default = "default_messages_per_page")]
    pub default_messages_per_page: usize,
    #[serde(default = "default_min_ttl")]
    pub min_message_ttl: u64,
    #[serde(default = "default_max_ttl")]
    pub max_message_ttl: u64,
    #[serde(default = "default_min_ttl")]
    pub min_claim_ttl: u64,
    #[serde(default = "default_max_ttl")]
    pub max_claim_ttl: u64,
    #[serde(default = "default_max_grace")]
    pub max_claim_grace: u64,
    #[serde(default = "default_min_ttl")]
    pub min_subscription_ttl: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Control-plane store (catalogue, pools, flavors).
    #[serde(default = "default_store_uri")]
    pub control_uri: String,
    /// Data-plane store used when pooling is disabled.
    #[serde(default = "default_store_uri")]
    pub data_uri: String,
    /// Route queues across registered pools instead of `data_uri`.
    #[serde(default)]
    pub pooling: bool,
    /// Budget for the claim-create retry loop, in seconds.
    #[serde(default = "default_claim_retry_budget")]
    pub claim_retry_budget_secs: u64,
    /// Transient backend failures are retried this many times before a
    /// `ConnectionError` reaches the caller.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    #[serde(default = "default_notifier_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Whether http(s) subscriptions must be confirmed before delivery.
    #[serde(default = "default_true")]
    pub require_confirmation: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, anyhow::Error> {
    let raw: String = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&raw)?;
    Ok(config)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_messages_post_size: default_max_message_size(),
            max_queue_metadata_size: default_max_metadata_size(),
            max_messages_per_claim: default_max_messages_per_claim(),
            max_messages_per_page: default_max_messages_per_page(),
            default_queues_per_page: default_queues_per_page(),
            default_messages_per_page: default_messages_per_page(),
            min_message_ttl: default_min_ttl(),
            max_message_ttl: default_max_ttl(),
            min_claim_ttl: default_min_ttl(),
            max_claim_ttl: default_max_ttl(),
            max_claim_grace: default_max_grace(),
            min_subscription_ttl: default_min_ttl(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            control_uri: default_store_uri(),
            data_uri: default_store_uri(),
            pooling: false,
            claim_retry_budget_secs: default_claim_retry_budget(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_notifier_timeout_ms(),
            require_confirmation: true,
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8888".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_message_size() -> usize {
    256 * 1024
}

fn default_max_metadata_size() -> usize {
    64 * 1024
}

fn default_max_messages_per_claim() -> usize {
    20
}

fn default_max_messages_per_page() -> usize {
    20
}

fn default_queues_per_page() -> usize {
    10
}

fn default_messages_per_page() -> usize {
    20
}

fn default_min_ttl() -> u64 {
    60
}

fn default_max_ttl() -> u64 {
    1_209_600
}

fn default_max_grace() -> u64 {
    43_200
}

fn default_store_uri() -> String {
    "memory://".to_string()
}

fn default_claim_retry_budget() -> u64 {
    10
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_backoff_ms() -> u64 {
    250
}

fn default_notifier_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_limits() {
        let cfg = Config::default();
        assert_eq!(cfg.transport.max_messages_post_size, 256 * 1024);
        assert_eq!(cfg.transport.max_queue_metadata_size, 64 * 1024);
        assert_eq!(cfg.transport.max_messages_per_claim, 20);
        assert_eq!(cfg.transport.default_queues_per_page, 10);
        assert_eq!(cfg.transport.default_messages_per_page, 20);
        assert!(!cfg.storage.pooling);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            bind_addr = "0.0.0.0:9000"

            [storage]
            pooling = true
            control_uri = "sqlite::memory:"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.bind_addr, "0.0.0.0:9000");
        assert!(cfg.storage.pooling);
        assert_eq!(cfg.storage.control_uri, "sqlite::memory:");
        assert_eq!(cfg.storage.data_uri, "memory://");
        assert_eq!(cfg.transport.min_claim_ttl, 60);
    }
}
