use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{read_json, remove_if_present, sorted_stems, write_json, Shared};
use crate::core::current_timestamp;
use crate::storage::{
    Page, Result, StorageError, Subscription, SubscriptionController, SubscriptionPatch,
};

pub(super) struct FsSubscriptionController {
    pub shared: Arc<Shared>,
}

impl FsSubscriptionController {
    fn load(&self, project: &str, queue: &str, id: &str) -> Result<Option<Subscription>> {
        read_json(&self.shared.sub_path(project, queue, id))
    }

    fn find_by_subscriber(
        &self,
        project: &str,
        queue: &str,
        subscriber: &str,
    ) -> Result<Option<Subscription>> {
        let dir = self.shared.queue_dir(project, queue).join("subs");
        for stem in sorted_stems(&dir)? {
            if let Some(sub) = self.load(project, queue, &stem)? {
                if sub.subscriber == subscriber {
                    return Ok(Some(sub));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl SubscriptionController for FsSubscriptionController {
    async fn list(
        &self,
        project: &str,
        queue: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Page<Subscription>> {
        if !self.shared.queue_exists(project, queue) {
            return Err(StorageError::queue_missing(project, queue));
        }

        let now = current_timestamp();
        let dir = self.shared.queue_dir(project, queue).join("subs");

        let mut items = Vec::new();
        for stem in sorted_stems(&dir)? {
            if let Some(marker) = marker {
                if stem.as_str() <= marker {
                    continue;
                }
            }
            let Some(sub) = self.load(project, queue, &stem)? else {
                continue;
            };
            if sub.expires <= now {
                continue;
            }

            items.push(sub);
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
        let now = current_timestamp();
        self.load(project, queue, subscription_id)?
            .filter(|sub| sub.expires > now)
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
        let lock = self.shared.lock(project, queue);
        let _guard = lock.lock();

        if !self.shared.queue_exists(project, queue) {
            return Err(StorageError::queue_missing(project, queue));
        }

        let now = current_timestamp();
        if let Some(existing) = self.find_by_subscriber(project, queue, subscriber)? {
            if existing.expires > now {
                return Err(StorageError::SubscriptionAlreadyExists);
            }
            // A lapsed subscription no longer reserves the subscriber URI.
            remove_if_present(&self.shared.sub_path(project, queue, &existing.id))?;
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
        write_json(&self.shared.sub_path(project, queue, &id), &sub)?;
        Ok(id)
    }

    async fn update(
        &self,
        project: &str,
        queue: &str,
        subscription_id: &str,
        patch: SubscriptionPatch,
    ) -> Result<()> {
        let lock = self.shared.lock(project, queue);
        let _guard = lock.lock();

        let now = current_timestamp();
        let mut sub = self.load(project, queue, subscription_id)?.ok_or_else(|| {
            StorageError::SubscriptionDoesNotExist {
                id: subscription_id.to_string(),
            }
        })?;

        if let Some(subscriber) = &patch.subscriber {
            let taken = self
                .find_by_subscriber(project, queue, subscriber)?
                .is_some_and(|other| other.id != subscription_id);
            if taken {
                return Err(StorageError::SubscriptionAlreadyExists);
            }
            sub.subscriber = subscriber.clone();
        }
        if let Some(ttl) = patch.ttl {
            sub.ttl = ttl;
            sub.expires = now + ttl;
        }
        if let Some(options) = patch.options {
            sub.options = options;
        }

        write_json(&self.shared.sub_path(project, queue, subscription_id), &sub)
    }

    async fn delete(&self, project: &str, queue: &str, subscription_id: &str) -> Result<()> {
        remove_if_present(&self.shared.sub_path(project, queue, subscription_id))
    }

    async fn exists(&self, project: &str, queue: &str, subscription_id: &str) -> Result<bool> {
        let now = current_timestamp();
        Ok(self
            .load(project, queue, subscription_id)?
            .is_some_and(|sub| sub.expires > now))
    }

    async fn confirm(
        &self,
        project: &str,
        queue: &str,
        subscription_id: &str,
        confirmed: bool,
    ) -> Result<()> {
        let lock = self.shared.lock(project, queue);
        let _guard = lock.lock();

        let mut sub = self.load(project, queue, subscription_id)?.ok_or_else(|| {
            StorageError::SubscriptionDoesNotExist {
                id: subscription_id.to_string(),
            }
        })?;
        sub.confirmed = confirmed;
        write_json(&self.shared.sub_path(project, queue, subscription_id), &sub)
    }

    async fn get_with_subscriber(
        &self,
        project: &str,
        queue: &str,
        subscriber: &str,
    ) -> Result<Subscription> {
        self.find_by_subscriber(project, queue, subscriber)?
            .ok_or_else(|| StorageError::SubscriptionDoesNotExist {
                id: subscriber.to_string(),
            })
    }
}
