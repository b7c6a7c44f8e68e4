use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable};
use serde_json::Value;

use super::{
    decode, encode, keys_with_prefix, prefix_bounds, scope, QueueEntry, CLAIMS, CLAIM_EXPIRY,
    MESSAGES, MESSAGE_INDEX, QUEUES, SUBSCRIBER_INDEX, SUBSCRIPTIONS,
};
use crate::core::current_timestamp;
use crate::core::message::MessageRecord;
use crate::storage::{
    MessageAge, Page, QueueController, QueueInfo, QueueStats, Result, StorageError,
};

pub(super) struct RedbQueueController {
    pub db: Arc<Database>,
}

impl RedbQueueController {
    fn load(&self, project: &str, name: &str) -> Result<Option<QueueEntry>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(QUEUES)?;
        let key = scope(project, name);
        match table.get(key.as_str())? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl QueueController for RedbQueueController {
    async fn create(&self, project: &str, name: &str, metadata: Value) -> Result<bool> {
        let tx = self.db.begin_write()?;
        let created = {
            let mut table = tx.open_table(QUEUES)?;
            let key = scope(project, name);
            if table.get(key.as_str())?.is_some() {
                false
            } else {
                let entry = QueueEntry {
                    metadata,
                    created: current_timestamp(),
                    counter: 0,
                };
                table.insert(key.as_str(), encode(&entry)?.as_slice())?;
                true
            }
        };
        tx.commit()?;
        Ok(created)
    }

    async fn exists(&self, project: &str, name: &str) -> Result<bool> {
        Ok(self.load(project, name)?.is_some())
    }

    async fn get_metadata(&self, project: &str, name: &str) -> Result<Value> {
        self.load(project, name)?
            .map(|entry| entry.metadata)
            .ok_or_else(|| StorageError::queue_missing(project, name))
    }

    async fn set_metadata(&self, project: &str, name: &str, metadata: Value) -> Result<()> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(QUEUES)?;
            let key = scope(project, name);
            let mut entry: QueueEntry = match table.get(key.as_str())? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StorageError::queue_missing(project, name)),
            };
            entry.metadata = metadata;
            table.insert(key.as_str(), encode(&entry)?.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, project: &str, name: &str) -> Result<()> {
        let tx = self.db.begin_write()?;
        {
            let key = scope(project, name);
            let mut queues = tx.open_table(QUEUES)?;
            queues.remove(key.as_str())?;

            // Cascade: every scoped record goes with the queue.
            let mut messages = tx.open_table(MESSAGES)?;
            for k in keys_with_prefix(&messages, &key)? {
                messages.remove(k.as_str())?;
            }
            let mut index = tx.open_table(MESSAGE_INDEX)?;
            for k in keys_with_prefix(&index, &key)? {
                index.remove(k.as_str())?;
            }
            let mut claims = tx.open_table(CLAIMS)?;
            for k in keys_with_prefix(&claims, &key)? {
                claims.remove(k.as_str())?;
            }
            let mut expiry = tx.open_table(CLAIM_EXPIRY)?;
            for k in keys_with_prefix(&expiry, &key)? {
                expiry.remove(k.as_str())?;
            }
            let mut subs = tx.open_table(SUBSCRIPTIONS)?;
            for k in keys_with_prefix(&subs, &key)? {
                subs.remove(k.as_str())?;
            }
            let mut sub_index = tx.open_table(SUBSCRIBER_INDEX)?;
            for k in keys_with_prefix(&sub_index, &key)? {
                sub_index.remove(k.as_str())?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn stats(&self, project: &str, name: &str) -> Result<QueueStats> {
        if self.load(project, name)?.is_none() {
            return Err(StorageError::queue_missing(project, name));
        }

        let tx = self.db.begin_read()?;
        let table = tx.open_table(MESSAGES)?;
        let now = current_timestamp();
        let (start, end) = prefix_bounds(&scope(project, name));

        let mut total = 0u64;
        let mut claimed = 0u64;
        let mut oldest: Option<MessageAge> = None;
        let mut newest: Option<MessageAge> = None;

        for entry in table.range::<&str>(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            let msg: MessageRecord = decode(value.value())?;
            if msg.is_expired(now) {
                continue;
            }

            total += 1;
            if msg.is_claimed(now) {
                claimed += 1;
            }

            let age = MessageAge {
                id: msg.id,
                age: now.saturating_sub(msg.created),
                created: msg.created,
            };
            if oldest.is_none() {
                oldest = Some(age.clone());
            }
            newest = Some(age);
        }

        Ok(QueueStats {
            claimed,
            free: total - claimed,
            total,
            newest,
            oldest,
        })
    }

    async fn list(
        &self,
        project: &str,
        marker: Option<&str>,
        limit: usize,
        detailed: bool,
    ) -> Result<Page<QueueInfo>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(QUEUES)?;
        let (start, end) = prefix_bounds(project);

        let mut items = Vec::new();
        for entry in table.range::<&str>(start.as_str()..end.as_str())? {
            let (key, value) = entry?;
            let name = key
                .value()
                .strip_prefix(&start)
                .unwrap_or(key.value())
                .to_string();

            if let Some(marker) = marker {
                if name.as_str() <= marker {
                    continue;
                }
            }

            let metadata = if detailed {
                let queue: QueueEntry = decode(value.value())?;
                Some(queue.metadata)
            } else {
                None
            };

            items.push(QueueInfo { name, metadata });
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
