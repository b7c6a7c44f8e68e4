//! Zaqar – a multi-tenant message queueing service written in Rust.
//!
//! This crate exports
//!  * `core`         – message, claim and pool-selection logic
//!  * `storage`      – the driver contract plus the concrete backends
//!  * `transport`    – HTTP (v2) resource handlers
//!  * `notification` – push delivery to subscribed endpoints
//!  * `config`       – TOML-driven runtime configuration
//!
//! Downstream applications can embed the service (`Bootstrap` +
//! `transport::http::serve`) or drive the storage controllers directly.

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod bootstrap;
pub mod config;
pub mod core;
pub mod logging;
pub mod notification;
pub mod storage;
pub mod transport;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use bootstrap::Bootstrap;
pub use config::{load_config, Config};
