use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::Store;
use crate::core::current_timestamp;
use crate::storage::{
    Page, Result, StorageError, Subscription, SubscriptionController, SubscriptionPatch,
};

pub(super) struct MemorySubscriptionController {
    pub store: Arc<Store>,
}

#[async_trait]
impl SubscriptionController for MemorySubscriptionController {
    async fn list(
        &self,
        project: &str,
        queue: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Page<Subscription>> {
        let state = self.store.queue_or_err(project, queue)?;
        let guard = state.read();
        let now = current_timestamp();

        let mut items = Vec::new();
        for (id, sub) in guard.subscriptions.iter() {
            if let Some(marker) = marker {
                if id.as_str() <= marker {
                    continue;
                }
            }
            if sub.expires <= now {
                continue;
            }

            items.push(sub.clone());
            if items.len() == limit {
                break;
            }
        }

        let marker = if items.len() == limit {
            items.last().map(|sub| sub.id.clone())
        } else {
            None
        };

        Ok(Page { items, marker })
    }

    async fn get(&self, project: &str, queue: &str, subscription_id: &str) -> Result<Subscription> {
        let state = self.store.queue_or_err(project, queue)?;
        let guard = state.read();
        let now = current_timestamp();

        guard
            .subscriptions
            .get(subscription_id)
            .filter(|sub| sub.expires > now)
            .cloned()
            .ok_or_else(|| StorageError::SubscriptionDoesNotExist {
                id: subscription_id.to_string(),
            })
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
        let state = self.store.queue_or_err(project, queue)?;
        let mut guard = state.write();
        let now = current_timestamp();

        if let Some(existing) = guard.by_subscriber.get(subscriber).cloned() {
            let live = guard
                .subscriptions
                .get(&existing)
                .is_some_and(|sub| sub.expires > now);
            if live {
                return Err(StorageError::SubscriptionAlreadyExists);
            }
            // A lapsed subscription no longer reserves the subscriber URI.
            guard.subscriptions.remove(&existing);
            guard.by_subscriber.remove(subscriber);
        }

        let id = Uuid::new_v4().simple().to_string();
        let sub = Subscription {
            id: id.clone(),
            source: queue.to_string(),
            subscriber: subscriber.to_string(),
            ttl,
            expires: now + ttl,
            options,
            confirmed,
        };

        guard.by_subscriber.insert(subscriber.to_string(), id.clone());
        guard.subscriptions.insert(id.clone(), sub);
        Ok(id)
    }

    async fn update(
        &self,
        project: &str,
        queue: &str,
        subscription_id: &str,
        patch: SubscriptionPatch,
    ) -> Result<()> {
        let state = self.store.queue_or_err(project, queue)?;
        let mut guard = state.write();
        let now = current_timestamp();

        if let Some(new_subscriber) = &patch.subscriber {
            let taken = guard
                .by_subscriber
                .get(new_subscriber)
                .is_some_and(|owner| owner != subscription_id);
            if taken {
                return Err(StorageError::SubscriptionAlreadyExists);
            }
        }

        let Some(sub) = guard.subscriptions.get_mut(subscription_id) else {
            return Err(StorageError::SubscriptionDoesNotExist {
                id: subscription_id.to_string(),
            });
        };

        let old_subscriber = sub.subscriber.clone();
        if let Some(subscriber) = patch.subscriber {
            sub.subscriber = subscriber;
        }
        if let Some(ttl) = patch.ttl {
            sub.ttl = ttl;
            sub.expires = now + ttl;
        }
        if let Some(options) = patch.options {
            sub.options = options;
        }
        let new_subscriber = sub.subscriber.clone();

        if old_subscriber != new_subscriber {
            guard.by_subscriber.remove(&old_subscriber);
            guard
                .by_subscriber
                .insert(new_subscriber, subscription_id.to_string());
        }

        Ok(())
    }

    async fn delete(&self, project: &str, queue: &str, subscription_id: &str) -> Result<()> {
        let Some(state) = self.store.queue(project, queue) else {
            return Ok(());
        };
        let mut guard = state.write();

        if let Some(sub) = guard.subscriptions.remove(subscription_id) {
            guard.by_subscriber.remove(&sub.subscriber);
        }
        Ok(())
    }

    async fn exists(&self, project: &str, queue: &str, subscription_id: &str) -> Result<bool> {
        let Some(state) = self.store.queue(project, queue) else {
            return Ok(false);
        };
        let guard = state.read();
        let now = current_timestamp();

        Ok(guard
            .subscriptions
            .get(subscription_id)
            .is_some_and(|sub| sub.expires > now))
    }

    async fn confirm(
        &self,
        project: &str,
        queue: &str,
        subscription_id: &str,
        confirmed: bool,
    ) -> Result<()> {
        let state = self.store.queue_or_err(project, queue)?;
        let mut guard = state.write();

        let Some(sub) = guard.subscriptions.get_mut(subscription_id) else {
            return Err(StorageError::SubscriptionDoesNotExist {
                id: subscription_id.to_string(),
            });
        };
        sub.confirmed = confirmed;
        Ok(())
    }

    async fn get_with_subscriber(
        &self,
        project: &str,
        queue: &str,
        subscriber: &str,
    ) -> Result<Subscription> {
        let state = self.store.queue_or_err(project, queue)?;
        let guard = state.read();

        guard
            .by_subscriber
            .get(subscriber)
            .and_then(|id| guard.subscriptions.get(id))
            .cloned()
            .ok_or_else(|| StorageError::SubscriptionDoesNotExist {
                id: subscriber.to_string(),
            })
    }
}
