use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::Store;
use crate::core::current_timestamp;
use crate::storage::{
    MessageAge, Page, QueueController, QueueInfo, QueueStats, Result, StorageError,
};

pub(super) struct MemoryQueueController {
    pub store: Arc<Store>,
}

#[async_trait]
impl QueueController for MemoryQueueController {
    async fn create(&self, project: &str, name: &str, metadata: Value) -> Result<bool> {
        let now = current_timestamp();
        Ok(self.store.create_queue(project, name, metadata, now))
    }

    async fn exists(&self, project: &str, name: &str) -> Result<bool> {
        Ok(self.store.queue(project, name).is_some())
    }

    async fn get_metadata(&self, project: &str, name: &str) -> Result<Value> {
        let state = self.store.queue_or_err(project, name)?;
        let guard = state.read();
        Ok(guard.metadata.clone())
    }

    async fn set_metadata(&self, project: &str, name: &str, metadata: Value) -> Result<()> {
        let state = self.store.queue_or_err(project, name)?;
        state.write().metadata = metadata;
        Ok(())
    }

    async fn delete(&self, project: &str, name: &str) -> Result<()> {
        // Dropping the document cascades: messages, claims and
        // subscriptions all live inside it.
        self.store.drop_queue(project, name);
        Ok(())
    }

    async fn stats(&self, project: &str, name: &str) -> Result<QueueStats> {
        let state = self.store.queue_or_err(project, name)?;
        let guard = state.read();
        let now = current_timestamp();

        let mut total = 0u64;
        let mut claimed = 0u64;
        let mut oldest: Option<MessageAge> = None;
        let mut newest: Option<MessageAge> = None;

        for msg in guard.messages.values() {
            if msg.is_expired(now) {
                continue;
            }

            total += 1;
            if msg.is_claimed(now) {
                claimed += 1;
            }

            let age = MessageAge {
                id: msg.id.clone(),
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
        if limit == 0 {
            return Err(StorageError::invalid("limit must be positive"));
        }

        let names = self.store.queue_names(project);
        let mut items = Vec::new();

        for name in names {
            if let Some(marker) = marker {
                if name.as_str() <= marker {
                    continue;
                }
            }

            let metadata = if detailed {
                self.store
                    .queue(project, &name)
                    .map(|state| state.read().metadata.clone())
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
