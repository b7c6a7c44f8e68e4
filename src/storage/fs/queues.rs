use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{QueueRecord, Shared};
use crate::core::current_timestamp;
use crate::storage::{
    MessageAge, Page, QueueController, QueueInfo, QueueStats, Result, StorageError,
};

pub(super) struct FsQueueController {
    pub shared: Arc<Shared>,
}

#[async_trait]
impl QueueController for FsQueueController {
    async fn create(&self, project: &str, name: &str, metadata: Value) -> Result<bool> {
        let lock = self.shared.lock(project, name);
        let _guard = lock.lock();

        if self.shared.queue_exists(project, name) {
            return Ok(false);
        }

        self.shared.store_queue(
            project,
            name,
            &QueueRecord {
                metadata,
                created: current_timestamp(),
                counter: 0,
            },
        )?;
        Ok(true)
    }

    async fn exists(&self, project: &str, name: &str) -> Result<bool> {
        Ok(self.shared.queue_exists(project, name))
    }

    async fn get_metadata(&self, project: &str, name: &str) -> Result<Value> {
        Ok(self.shared.load_queue_or_err(project, name)?.metadata)
    }

    async fn set_metadata(&self, project: &str, name: &str, metadata: Value) -> Result<()> {
        let lock = self.shared.lock(project, name);
        let _guard = lock.lock();

        let mut record = self.shared.load_queue_or_err(project, name)?;
        record.metadata = metadata;
        self.shared.store_queue(project, name, &record)
    }

    async fn delete(&self, project: &str, name: &str) -> Result<()> {
        let lock = self.shared.lock(project, name);
        let _guard = lock.lock();

        // Removing the tree cascades over messages, claims, subscriptions.
        match std::fs::remove_dir_all(self.shared.queue_dir(project, name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn stats(&self, project: &str, name: &str) -> Result<QueueStats> {
        let lock = self.shared.lock(project, name);
        let _guard = lock.lock();

        self.shared.load_queue_or_err(project, name)?;
        let now = current_timestamp();

        let mut total = 0u64;
        let mut claimed = 0u64;
        let mut oldest: Option<MessageAge> = None;
        let mut newest: Option<MessageAge> = None;

        for rank in self.shared.message_ranks(project, name)? {
            let Some(msg) = self.shared.load_message(project, name, rank)? else {
                continue;
            };
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
        let project_dir = self.shared.queue_dir(project, "");
        let entries = match std::fs::read_dir(&project_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Page::empty());
            }
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if self.shared.queue_exists(project, name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        let mut items = Vec::new();
        for name in names {
            if let Some(marker) = marker {
                if name.as_str() <= marker {
                    continue;
                }
            }

            let metadata = if detailed {
                self.shared
                    .load_queue(project, &name)?
                    .map(|record| record.metadata)
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
