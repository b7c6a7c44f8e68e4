//! Storage layer: the driver contract (L0) and its concrete backends.
//!
//! Every backend exposes the same four data-plane controllers plus, for
//! control-capable stores, the catalogue / pools / flavors controllers.
//! Semantics are identical across drivers; only encoding, indexing and TTL
//! mechanics differ:
//!
//! - `memory` – in-process document maps
//! - `redb`   – embedded ACID key-value store
//! - `fs`     – filesystem object layout
//! - `sqlite` – relational store over sqlx
//!
//! `pooling` layers the (project, queue) → pool catalogue on top of any mix
//! of the above.

pub mod errors;
pub mod fs;
pub mod memory;
pub mod pooling;
pub mod redb;
pub mod sqlite;
pub mod utils;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::claim::ClaimMeta;
use crate::core::message::{NewMessage, QueueMessage};
pub use errors::StorageError;

pub type Result<T> = std::result::Result<T, StorageError>;

pub const DEFAULT_QUEUES_PER_PAGE: usize = 10;
pub const DEFAULT_MESSAGES_PER_PAGE: usize = 20;
pub const DEFAULT_POOLS_PER_PAGE: usize = 10;
pub const DEFAULT_SUBSCRIPTIONS_PER_PAGE: usize = 10;
pub const DEFAULT_MESSAGES_PER_CLAIM: usize = 10;

/// One page of a restartable listing; `marker` resumes after the last item.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub marker: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            marker: None,
        }
    }
}

/// Queue as returned by listings; `metadata` is populated when `detailed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Age of a bounding (oldest/newest) unexpired message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAge {
    pub id: String,
    pub age: u64,
    pub created: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub claimed: u64,
    pub free: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest: Option<MessageAge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest: Option<MessageAge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Oldest,
    Newest,
}

/// Knobs for `MessageController::list`, mirroring the request surface.
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub marker: Option<String>,
    pub limit: usize,
    pub echo: bool,
    pub include_claimed: bool,
    pub client_uuid: Option<String>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            marker: None,
            limit: DEFAULT_MESSAGES_PER_PAGE,
            echo: false,
            include_claimed: false,
            client_uuid: None,
        }
    }
}

/// A backend storage instance queues are sharded onto.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    pub uri: String,
    pub weight: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolPatch {
    pub uri: Option<String>,
    pub weight: Option<i64>,
    pub flavor: Option<Option<String>>,
    pub options: Option<Value>,
}

/// A named bundle of pools advertised to tenants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flavor {
    pub name: String,
    pub project: String,
    #[serde(default)]
    pub capabilities: Value,
}

/// The authoritative (project, queue) → pool binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub project: String,
    pub queue: String,
    pub pool: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    /// Queue the subscription is scoped to.
    pub source: String,
    pub subscriber: String,
    pub ttl: u64,
    pub expires: u64,
    #[serde(default)]
    pub options: Value,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionPatch {
    pub subscriber: Option<String>,
    pub ttl: Option<u64>,
    pub options: Option<Value>,
}

/// Queue resource operations (L0).
#[async_trait]
pub trait QueueController: Send + Sync {
    /// Returns true iff the queue was newly created.
    async fn create(&self, project: &str, name: &str, metadata: Value) -> Result<bool>;

    async fn exists(&self, project: &str, name: &str) -> Result<bool>;

    async fn get_metadata(&self, project: &str, name: &str) -> Result<Value>;

    async fn set_metadata(&self, project: &str, name: &str, metadata: Value) -> Result<()>;

    /// Cascades to the queue's messages, claims and subscriptions.
    async fn delete(&self, project: &str, name: &str) -> Result<()>;

    async fn stats(&self, project: &str, name: &str) -> Result<QueueStats>;

    async fn list(
        &self,
        project: &str,
        marker: Option<&str>,
        limit: usize,
        detailed: bool,
    ) -> Result<Page<QueueInfo>>;
}

/// Message resource operations (L0).
#[async_trait]
pub trait MessageController: Send + Sync {
    /// Appends `messages` as one group; ids come back in posting order.
    async fn post(
        &self,
        project: &str,
        queue: &str,
        messages: Vec<NewMessage>,
        client_uuid: &str,
    ) -> Result<Vec<String>>;

    async fn get(&self, project: &str, queue: &str, message_id: &str) -> Result<QueueMessage>;

    /// Missing ids are silently dropped from the result.
    async fn bulk_get(
        &self,
        project: &str,
        queue: &str,
        message_ids: &[String],
    ) -> Result<Vec<QueueMessage>>;

    async fn list(&self, project: &str, queue: &str, opts: &ListOptions)
        -> Result<Page<QueueMessage>>;

    /// With `claim`, deletes only when the message's live claim matches.
    async fn delete(
        &self,
        project: &str,
        queue: &str,
        message_id: &str,
        claim: Option<&str>,
    ) -> Result<()>;

    async fn bulk_delete(
        &self,
        project: &str,
        queue: &str,
        message_ids: &[String],
        claim_ids: Option<&[String]>,
    ) -> Result<()>;

    /// Bounding unexpired message for stats; `None` when the queue is empty.
    async fn first(&self, project: &str, queue: &str, sort: SortOrder)
        -> Result<Option<MessageAge>>;

    /// Claims-and-deletes atomically.
    async fn pop(&self, project: &str, queue: &str, limit: usize) -> Result<Vec<QueueMessage>>;

    /// Unclaimed visible messages in FIFO order; used by claim creation.
    async fn active(&self, project: &str, queue: &str, limit: usize) -> Result<Vec<QueueMessage>>;
}

/// Claim resource operations (L1 engine, L0 surface).
#[async_trait]
pub trait ClaimController: Send + Sync {
    /// Returns `None` when the queue holds no active messages.
    async fn create(
        &self,
        project: &str,
        queue: &str,
        ttl: u64,
        grace: u64,
        limit: usize,
    ) -> Result<Option<(String, Vec<QueueMessage>)>>;

    /// Claim meta plus the still-existing claimed messages.
    async fn get(
        &self,
        project: &str,
        queue: &str,
        claim_id: &str,
    ) -> Result<(ClaimMeta, Vec<QueueMessage>)>;

    /// Renewal: re-bases ttl and grace from now.
    async fn update(
        &self,
        project: &str,
        queue: &str,
        claim_id: &str,
        ttl: u64,
        grace: u64,
    ) -> Result<()>;

    /// Release; idempotent.
    async fn delete(&self, project: &str, queue: &str, claim_id: &str) -> Result<()>;

    /// Sweeps lapsed claim records; returns how many were collected.
    async fn gc(&self, project: &str, queue: &str) -> Result<u64>;
}

/// Subscription resource operations (L0).
#[async_trait]
pub trait SubscriptionController: Send + Sync {
    async fn list(
        &self,
        project: &str,
        queue: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Page<Subscription>>;

    async fn get(&self, project: &str, queue: &str, subscription_id: &str) -> Result<Subscription>;

    /// Unique per (project, queue, subscriber).
    async fn create(
        &self,
        project: &str,
        queue: &str,
        subscriber: &str,
        ttl: u64,
        options: Value,
        confirmed: bool,
    ) -> Result<String>;

    async fn update(
        &self,
        project: &str,
        queue: &str,
        subscription_id: &str,
        patch: SubscriptionPatch,
    ) -> Result<()>;

    async fn delete(&self, project: &str, queue: &str, subscription_id: &str) -> Result<()>;

    async fn exists(&self, project: &str, queue: &str, subscription_id: &str) -> Result<bool>;

    async fn confirm(
        &self,
        project: &str,
        queue: &str,
        subscription_id: &str,
        confirmed: bool,
    ) -> Result<()>;

    async fn get_with_subscriber(
        &self,
        project: &str,
        queue: &str,
        subscriber: &str,
    ) -> Result<Subscription>;
}

/// Hands out the data-plane controllers for one backend.
pub trait DataDriver: Send + Sync {
    fn queues(&self) -> Arc<dyn QueueController>;
    fn messages(&self) -> Arc<dyn MessageController>;
    fn claims(&self) -> Arc<dyn ClaimController>;
    fn subscriptions(&self) -> Arc<dyn SubscriptionController>;
}

/// Catalogue directory operations (L2 control plane).
#[async_trait]
pub trait CatalogueController: Send + Sync {
    async fn list(&self, project: &str) -> Result<Vec<CatalogueEntry>>;
    async fn get(&self, project: &str, queue: &str) -> Result<CatalogueEntry>;
    async fn exists(&self, project: &str, queue: &str) -> Result<bool>;
    async fn insert(&self, project: &str, queue: &str, pool: &str) -> Result<()>;
    async fn update(&self, project: &str, queue: &str, pool: &str) -> Result<()>;
    /// Idempotent.
    async fn delete(&self, project: &str, queue: &str) -> Result<()>;
}

/// Pool registry operations (L2 control plane).
#[async_trait]
pub trait PoolsController: Send + Sync {
    async fn list(&self, marker: Option<&str>, limit: usize) -> Result<Page<Pool>>;
    async fn get(&self, name: &str) -> Result<Pool>;
    async fn exists(&self, name: &str) -> Result<bool>;
    /// Upsert by name; fails with `PoolAlreadyExists` when the URI is
    /// already bound to a different pool.
    async fn create(&self, pool: Pool) -> Result<()>;
    async fn update(&self, name: &str, patch: PoolPatch) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
    /// `None` selects the default group (pools with no flavor tag).
    async fn list_by_flavor(&self, flavor: Option<&str>) -> Result<Vec<Pool>>;
}

/// Flavor registry operations (L2 control plane).
#[async_trait]
pub trait FlavorsController: Send + Sync {
    async fn list(&self, project: &str, marker: Option<&str>, limit: usize)
        -> Result<Page<Flavor>>;
    async fn get(&self, project: &str, name: &str) -> Result<Flavor>;
    async fn exists(&self, project: &str, name: &str) -> Result<bool>;
    async fn create(&self, flavor: Flavor) -> Result<()>;
    async fn update(&self, project: &str, name: &str, capabilities: Value) -> Result<()>;
    async fn delete(&self, project: &str, name: &str) -> Result<()>;
}

/// Hands out the control-plane controllers.
pub trait ControlDriver: Send + Sync {
    fn catalogue(&self) -> Arc<dyn CatalogueController>;
    fn pools(&self) -> Arc<dyn PoolsController>;
    fn flavors(&self) -> Arc<dyn FlavorsController>;
}

/// Decodes a listing marker produced by this service (a decimal rank).
pub fn parse_marker(marker: Option<&str>) -> Result<Option<u64>> {
    match marker {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| StorageError::invalid(format!("malformed marker: {raw:?}"))),
    }
}
