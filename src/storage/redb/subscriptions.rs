use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable};
use serde_json::Value;
use uuid::Uuid;

use super::{decode, encode, prefix_bounds, scope, scoped, QUEUES, SUBSCRIBER_INDEX, SUBSCRIPTIONS};
use crate::core::current_timestamp;
use crate::storage::{
    Page, Result, StorageError, Subscription, SubscriptionController, SubscriptionPatch,
};

pub(super) struct RedbSubscriptionController {
    pub db: Arc<Database>,
}

impl RedbSubscriptionController {
    fn queue_exists(&self, project: &str, queue: &str) -> Result<bool> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(QUEUES)?;
        Ok(table.get(scope(project, queue).as_str())?.is_some())
    }

    fn load(&self, project: &str, queue: &str, id: &str) -> Result<Option<Subscription>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(SUBSCRIPTIONS)?;
        match table.get(scoped(&scope(project, queue), id).as_str())? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SubscriptionController for RedbSubscriptionController {
    async fn list(
        &self,
        project: &str,
        queue: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Page<Subscription>> {
        if !self.queue_exists(project, queue)? {
            return Err(StorageError::queue_missing(project, queue));
        }

        let now = current_timestamp();
        let scope_key = scope(project, queue);
        let (start, end) = prefix_bounds(&scope_key);

        let tx = self.db.begin_read()?;
        let table = tx.open_table(SUBSCRIPTIONS)?;

        let mut items = Vec::new();
        for entry in table.range::<&str>(start.as_str()..end.as_str())? {
            let (key, value) = entry?;
            let id = key.value().rsplit('/').next().unwrap_or_default();
            if let Some(marker) = marker {
                if id <= marker {
                    continue;
                }
            }

            let sub: Subscription = decode(value.value())?;
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
        if !self.queue_exists(project, queue)? {
            return Err(StorageError::queue_missing(project, queue));
        }

        let now = current_timestamp();
        let scope_key = scope(project, queue);
        let id = Uuid::new_v4().simple().to_string();

        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(SUBSCRIPTIONS)?;
            let mut index = tx.open_table(SUBSCRIBER_INDEX)?;
            let index_key = scoped(&scope_key, subscriber);

            let existing: Option<String> = match index.get(index_key.as_str())? {
                Some(guard) => Some(String::from_utf8_lossy(guard.value()).into_owned()),
                None => None,
            };
            if let Some(existing) = existing {
                let live = match table.get(scoped(&scope_key, &existing).as_str())? {
                    Some(guard) => {
                        let sub: Subscription = decode(guard.value())?;
                        sub.expires > now
                    }
                    None => false,
                };
                if live {
                    return Err(StorageError::SubscriptionAlreadyExists);
                }
                // A lapsed subscription no longer reserves the URI.
                table.remove(scoped(&scope_key, &existing).as_str())?;
            }

            let sub = Subscription {
                id: id.clone(),
                source: queue.to_string(),
                subscriber: subscriber.to_string(),
                ttl,
                expires: now + ttl,
                options,
                confirmed,
            };
            table.insert(scoped(&scope_key, &id).as_str(), encode(&sub)?.as_slice())?;
            index.insert(index_key.as_str(), id.as_bytes())?;
        }
        tx.commit()?;
        Ok(id)
    }

    async fn update(
        &self,
        project: &str,
        queue: &str,
        subscription_id: &str,
        patch: SubscriptionPatch,
    ) -> Result<()> {
        let now = current_timestamp();
        let scope_key = scope(project, queue);

        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(SUBSCRIPTIONS)?;
            let mut index = tx.open_table(SUBSCRIBER_INDEX)?;

            let sub_key = scoped(&scope_key, subscription_id);
            let mut sub: Subscription = match table.get(sub_key.as_str())? {
                Some(guard) => decode(guard.value())?,
                None => {
                    return Err(StorageError::SubscriptionDoesNotExist {
                        id: subscription_id.to_string(),
                    })
                }
            };

            if let Some(subscriber) = &patch.subscriber {
                let taken = match index.get(scoped(&scope_key, subscriber).as_str())? {
                    Some(guard) => guard.value() != subscription_id.as_bytes(),
                    None => false,
                };
                if taken {
                    return Err(StorageError::SubscriptionAlreadyExists);
                }
            }

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

            if old_subscriber != sub.subscriber {
                index.remove(scoped(&scope_key, &old_subscriber).as_str())?;
                index.insert(
                    scoped(&scope_key, &sub.subscriber).as_str(),
                    subscription_id.as_bytes(),
                )?;
            }

            table.insert(sub_key.as_str(), encode(&sub)?.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, project: &str, queue: &str, subscription_id: &str) -> Result<()> {
        let scope_key = scope(project, queue);

        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(SUBSCRIPTIONS)?;
            let removed: Option<Subscription> =
                match table.remove(scoped(&scope_key, subscription_id).as_str())? {
                    Some(guard) => Some(decode(guard.value())?),
                    None => None,
                };

            if let Some(sub) = removed {
                let mut index = tx.open_table(SUBSCRIBER_INDEX)?;
                index.remove(scoped(&scope_key, &sub.subscriber).as_str())?;
            }
        }
        tx.commit()?;
        Ok(())
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
        let scope_key = scope(project, queue);

        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(SUBSCRIPTIONS)?;
            let sub_key = scoped(&scope_key, subscription_id);
            let mut sub: Subscription = match table.get(sub_key.as_str())? {
                Some(guard) => decode(guard.value())?,
                None => {
                    return Err(StorageError::SubscriptionDoesNotExist {
                        id: subscription_id.to_string(),
                    })
                }
            };
            sub.confirmed = confirmed;
            table.insert(sub_key.as_str(), encode(&sub)?.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_with_subscriber(
        &self,
        project: &str,
        queue: &str,
        subscriber: &str,
    ) -> Result<Subscription> {
        let scope_key = scope(project, queue);
        let tx = self.db.begin_read()?;
        let index = tx.open_table(SUBSCRIBER_INDEX)?;

        let id = match index.get(scoped(&scope_key, subscriber).as_str())? {
            Some(guard) => String::from_utf8_lossy(guard.value()).into_owned(),
            None => {
                return Err(StorageError::SubscriptionDoesNotExist {
                    id: subscriber.to_string(),
                })
            }
        };

        let table = tx.open_table(SUBSCRIPTIONS)?;
        match table.get(scoped(&scope_key, &id).as_str())? {
            Some(guard) => Ok(decode(guard.value())?),
            None => Err(StorageError::SubscriptionDoesNotExist {
                id: subscriber.to_string(),
            }),
        }
    }
}
