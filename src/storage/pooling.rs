//! Pool/catalogue sharding layer (L2).
//!
//! `Catalog` owns the persistent (project, queue) → pool binding and the
//! weighted pool pick made on queue creation. `PooledDataDriver` wraps it in
//! the ordinary `DataDriver` surface: every operation looks the binding up,
//! opens (or reuses) a driver for the bound pool, and forwards.
//!
//! The catalogue is authoritative: once an entry is gone the queue reads as
//! nonexistent, whatever the pool still physically holds.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{info, warn};

use crate::core::claim::ClaimMeta;
use crate::core::message::{NewMessage, QueueMessage};
use crate::core::select;
use crate::storage::utils;
use crate::storage::{
    ClaimController, ControlDriver, DataDriver, ListOptions, MessageAge, MessageController, Page,
    QueueController, QueueInfo, QueueStats, Result, SortOrder, StorageError, Subscription,
    SubscriptionController, SubscriptionPatch,
};

/// Reads the flavor requested through queue metadata.
fn metadata_flavor(metadata: &Value) -> Option<String> {
    metadata
        .get("_flavor")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Directory of queue→pool bindings plus the driver registry and a
/// process-wide binding cache.
pub struct Catalog {
    control: Arc<dyn ControlDriver>,
    cache: DashMap<(String, String), String>,
}

impl Catalog {
    pub fn new(control: Arc<dyn ControlDriver>) -> Self {
        Self {
            control,
            cache: DashMap::new(),
        }
    }

    pub fn control(&self) -> Arc<dyn ControlDriver> {
        Arc::clone(&self.control)
    }

    fn cache_key(project: &str, queue: &str) -> (String, String) {
        (project.to_string(), queue.to_string())
    }

    /// Ensures a catalogue entry exists for the queue, weight-selecting a
    /// pool when one has to be chosen. The entry is inserted before any
    /// pool-side create is issued.
    pub async fn register(
        &self,
        project: &str,
        queue: &str,
        flavor: Option<&str>,
    ) -> Result<()> {
        let catalogue = self.control.catalogue();

        // A changed flavor re-registers the queue; otherwise an existing
        // binding always wins.
        if catalogue.exists(project, queue).await? {
            let entry = catalogue.get(project, queue).await?;
            let bound_flavor = match self.control.pools().get(&entry.pool).await {
                Ok(pool) => pool.flavor,
                Err(err) if err.is_not_found() => None,
                Err(err) => return Err(err),
            };

            if bound_flavor.as_deref() == flavor {
                return Ok(());
            }

            info!(
                "re-registering queue {}/{}: flavor {:?} -> {:?}",
                project, queue, bound_flavor, flavor
            );
            catalogue.delete(project, queue).await?;
            self.cache.remove(&Self::cache_key(project, queue));
        }

        if let Some(flavor_name) = flavor {
            // Surface FlavorDoesNotExist before selection.
            self.control.flavors().get(project, flavor_name).await?;
        }

        let candidates = self.control.pools().list_by_flavor(flavor).await?;
        let pool = select::weighted(&candidates, |pool| pool.weight)
            .ok_or(StorageError::NoPoolFound)?;

        info!(
            "register queue: project:{} queue:{} pool:{}",
            project, queue, pool.name
        );
        catalogue.insert(project, queue, &pool.name).await?;
        self.cache
            .insert(Self::cache_key(project, queue), pool.name.clone());
        Ok(())
    }

    /// Removes the binding. Invalidation happens on both ends of the
    /// delete so a stale pool is never served across queue re-creation.
    pub async fn deregister(&self, project: &str, queue: &str) -> Result<()> {
        let key = Self::cache_key(project, queue);
        self.cache.remove(&key);
        self.control.catalogue().delete(project, queue).await?;
        self.cache.remove(&key);
        Ok(())
    }

    /// Resolves the queue's pool and opens a driver for it. `None` when
    /// the queue has no binding.
    pub async fn lookup(
        &self,
        project: &str,
        queue: &str,
    ) -> Result<Option<Arc<dyn DataDriver>>> {
        let key = Self::cache_key(project, queue);
        let pool_name = match self.cache.get(&key) {
            Some(cached) => cached.clone(),
            None => match self.control.catalogue().get(project, queue).await {
                Ok(entry) => {
                    self.cache.insert(key, entry.pool.clone());
                    entry.pool
                }
                Err(err) if err.is_not_found() => return Ok(None),
                Err(err) => return Err(err),
            },
        };

        let pool = self.control.pools().get(&pool_name).await?;
        let driver = utils::driver_registry().get(&pool.uri).await?;
        Ok(Some(driver))
    }

    async fn lookup_or_missing(&self, project: &str, queue: &str) -> Result<Arc<dyn DataDriver>> {
        self.lookup(project, queue)
            .await?
            .ok_or_else(|| StorageError::queue_missing(project, queue))
    }
}

/// `DataDriver` that routes every operation through the catalogue.
pub struct PooledDataDriver {
    catalog: Arc<Catalog>,
}

impl PooledDataDriver {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

impl DataDriver for PooledDataDriver {
    fn queues(&self) -> Arc<dyn QueueController> {
        Arc::new(PooledQueueController {
            catalog: Arc::clone(&self.catalog),
        })
    }

    fn messages(&self) -> Arc<dyn MessageController> {
        Arc::new(PooledMessageController {
            catalog: Arc::clone(&self.catalog),
        })
    }

    fn claims(&self) -> Arc<dyn ClaimController> {
        Arc::new(PooledClaimController {
            catalog: Arc::clone(&self.catalog),
        })
    }

    fn subscriptions(&self) -> Arc<dyn SubscriptionController> {
        Arc::new(PooledSubscriptionController {
            catalog: Arc::clone(&self.catalog),
        })
    }
}

struct PooledQueueController {
    catalog: Arc<Catalog>,
}

#[async_trait]
impl QueueController for PooledQueueController {
    async fn create(&self, project: &str, name: &str, metadata: Value) -> Result<bool> {
        let flavor = metadata_flavor(&metadata);
        self.catalog
            .register(project, name, flavor.as_deref())
            .await?;

        // Registration just inserted (or kept) the binding, so the lookup
        // cannot miss short of a concurrent delete.
        let driver = self.catalog.lookup_or_missing(project, name).await?;
        driver.queues().create(project, name, metadata).await
    }

    async fn exists(&self, project: &str, name: &str) -> Result<bool> {
        match self.catalog.lookup(project, name).await? {
            Some(driver) => driver.queues().exists(project, name).await,
            None => Ok(false),
        }
    }

    async fn get_metadata(&self, project: &str, name: &str) -> Result<Value> {
        let driver = self.catalog.lookup_or_missing(project, name).await?;
        driver.queues().get_metadata(project, name).await
    }

    async fn set_metadata(&self, project: &str, name: &str, metadata: Value) -> Result<()> {
        let flavor = metadata_flavor(&metadata);
        self.catalog
            .register(project, name, flavor.as_deref())
            .await?;
        let driver = self.catalog.lookup_or_missing(project, name).await?;
        driver.queues().set_metadata(project, name, metadata).await
    }

    async fn delete(&self, project: &str, name: &str) -> Result<()> {
        let driver = self.catalog.lookup(project, name).await?;

        // Catalogue first: once the entry is gone the queue is gone for
        // every reader. The pool-side cleanup is best-effort.
        self.catalog.deregister(project, name).await?;

        if let Some(driver) = driver {
            if let Err(err) = driver.queues().delete(project, name).await {
                warn!(
                    "pool-side delete of {}/{} failed (will be swept later): {}",
                    project, name, err
                );
            }
        }
        Ok(())
    }

    async fn stats(&self, project: &str, name: &str) -> Result<QueueStats> {
        let driver = self.catalog.lookup_or_missing(project, name).await?;
        driver.queues().stats(project, name).await
    }

    async fn list(
        &self,
        project: &str,
        marker: Option<&str>,
        limit: usize,
        detailed: bool,
    ) -> Result<Page<QueueInfo>> {
        // The catalogue is the source of truth for which queues exist.
        let entries = self.catalog.control.catalogue().list(project).await?;

        let mut items = Vec::new();
        for entry in entries {
            if let Some(marker) = marker {
                if entry.queue.as_str() <= marker {
                    continue;
                }
            }

            let metadata = if detailed {
                match self.catalog.lookup(project, &entry.queue).await? {
                    Some(driver) => driver
                        .queues()
                        .get_metadata(project, &entry.queue)
                        .await
                        .ok(),
                    None => None,
                }
            } else {
                None
            };

            items.push(QueueInfo {
                name: entry.queue,
                metadata,
            });
            if items.len() == limit {
                break;
            }
        }

        let marker = if items.len() == limit {
            items.last().map(|q| q.name.clone())
        } else {
            None
        };

        Ok(Page { items, marker })
    }
}

struct PooledMessageController {
    catalog: Arc<Catalog>,
}

#[async_trait]
impl MessageController for PooledMessageController {
    async fn post(
        &self,
        project: &str,
        queue: &str,
        messages: Vec<NewMessage>,
        client_uuid: &str,
    ) -> Result<Vec<String>> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver
            .messages()
            .post(project, queue, messages, client_uuid)
            .await
    }

    async fn get(&self, project: &str, queue: &str, message_id: &str) -> Result<QueueMessage> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver.messages().get(project, queue, message_id).await
    }

    async fn bulk_get(
        &self,
        project: &str,
        queue: &str,
        message_ids: &[String],
    ) -> Result<Vec<QueueMessage>> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver.messages().bulk_get(project, queue, message_ids).await
    }

    async fn list(
        &self,
        project: &str,
        queue: &str,
        opts: &ListOptions,
    ) -> Result<Page<QueueMessage>> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver.messages().list(project, queue, opts).await
    }

    async fn delete(
        &self,
        project: &str,
        queue: &str,
        message_id: &str,
        claim: Option<&str>,
    ) -> Result<()> {
        match self.catalog.lookup(project, queue).await? {
            Some(driver) => {
                driver
                    .messages()
                    .delete(project, queue, message_id, claim)
                    .await
            }
            None => Ok(()),
        }
    }

    async fn bulk_delete(
        &self,
        project: &str,
        queue: &str,
        message_ids: &[String],
        claim_ids: Option<&[String]>,
    ) -> Result<()> {
        match self.catalog.lookup(project, queue).await? {
            Some(driver) => {
                driver
                    .messages()
                    .bulk_delete(project, queue, message_ids, claim_ids)
                    .await
            }
            None => Ok(()),
        }
    }

    async fn first(
        &self,
        project: &str,
        queue: &str,
        sort: SortOrder,
    ) -> Result<Option<MessageAge>> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver.messages().first(project, queue, sort).await
    }

    async fn pop(&self, project: &str, queue: &str, limit: usize) -> Result<Vec<QueueMessage>> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver.messages().pop(project, queue, limit).await
    }

    async fn active(&self, project: &str, queue: &str, limit: usize) -> Result<Vec<QueueMessage>> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver.messages().active(project, queue, limit).await
    }
}

struct PooledClaimController {
    catalog: Arc<Catalog>,
}

#[async_trait]
impl ClaimController for PooledClaimController {
    async fn create(
        &self,
        project: &str,
        queue: &str,
        ttl: u64,
        grace: u64,
        limit: usize,
    ) -> Result<Option<(String, Vec<QueueMessage>)>> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver
            .claims()
            .create(project, queue, ttl, grace, limit)
            .await
    }

    async fn get(
        &self,
        project: &str,
        queue: &str,
        claim_id: &str,
    ) -> Result<(ClaimMeta, Vec<QueueMessage>)> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver.claims().get(project, queue, claim_id).await
    }

    async fn update(
        &self,
        project: &str,
        queue: &str,
        claim_id: &str,
        ttl: u64,
        grace: u64,
    ) -> Result<()> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver
            .claims()
            .update(project, queue, claim_id, ttl, grace)
            .await
    }

    async fn delete(&self, project: &str, queue: &str, claim_id: &str) -> Result<()> {
        match self.catalog.lookup(project, queue).await? {
            Some(driver) => driver.claims().delete(project, queue, claim_id).await,
            None => Ok(()),
        }
    }

    async fn gc(&self, project: &str, queue: &str) -> Result<u64> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver.claims().gc(project, queue).await
    }
}

struct PooledSubscriptionController {
    catalog: Arc<Catalog>,
}

#[async_trait]
impl SubscriptionController for PooledSubscriptionController {
    async fn list(
        &self,
        project: &str,
        queue: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Page<Subscription>> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver
            .subscriptions()
            .list(project, queue, marker, limit)
            .await
    }

    async fn get(&self, project: &str, queue: &str, subscription_id: &str) -> Result<Subscription> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver
            .subscriptions()
            .get(project, queue, subscription_id)
            .await
    }

    async fn create(
        &self,
        project: &str,
        queue: &str,
        subscriber: &str,
        ttl: u64,
        options: Value,
        confirmed: bool,
    ) -> Result<String> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver
            .subscriptions()
            .create(project, queue, subscriber, ttl, options, confirmed)
            .await
    }

    async fn update(
        &self,
        project: &str,
        queue: &str,
        subscription_id: &str,
        patch: SubscriptionPatch,
    ) -> Result<()> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver
            .subscriptions()
            .update(project, queue, subscription_id, patch)
            .await
    }

    async fn delete(&self, project: &str, queue: &str, subscription_id: &str) -> Result<()> {
        match self.catalog.lookup(project, queue).await? {
            Some(driver) => {
                driver
                    .subscriptions()
                    .delete(project, queue, subscription_id)
                    .await
            }
            None => Ok(()),
        }
    }

    async fn exists(&self, project: &str, queue: &str, subscription_id: &str) -> Result<bool> {
        match self.catalog.lookup(project, queue).await? {
            Some(driver) => {
                driver
                    .subscriptions()
                    .exists(project, queue, subscription_id)
                    .await
            }
            None => Ok(false),
        }
    }

    async fn confirm(
        &self,
        project: &str,
        queue: &str,
        subscription_id: &str,
        confirmed: bool,
    ) -> Result<()> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver
            .subscriptions()
            .confirm(project, queue, subscription_id, confirmed)
            .await
    }

    async fn get_with_subscriber(
        &self,
        project: &str,
        queue: &str,
        subscriber: &str,
    ) -> Result<Subscription> {
        let driver = self.catalog.lookup_or_missing(project, queue).await?;
        driver
            .subscriptions()
            .get_with_subscriber(project, queue, subscriber)
            .await
    }
}
