use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::core::current_timestamp;
use crate::storage::{
    MessageAge, Page, QueueController, QueueInfo, QueueStats, Result, StorageError,
};

pub(super) struct SqliteQueueController {
    pub pool: SqlitePool,
}

impl SqliteQueueController {
    async fn queue_exists(&self, project: &str, name: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM queues WHERE project = ? AND name = ?")
            .bind(project)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl QueueController for SqliteQueueController {
    async fn create(&self, project: &str, name: &str, metadata: Value) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO queues (project, name, metadata, created, counter)
             VALUES (?, ?, ?, ?, 0)",
        )
        .bind(project)
        .bind(name)
        .bind(metadata.to_string())
        .bind(current_timestamp() as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, project: &str, name: &str) -> Result<bool> {
        self.queue_exists(project, name).await
    }

    async fn get_metadata(&self, project: &str, name: &str) -> Result<Value> {
        let row = sqlx::query("SELECT metadata FROM queues WHERE project = ? AND name = ?")
            .bind(project)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::queue_missing(project, name))?;

        let metadata: String = row.try_get("metadata")?;
        Ok(serde_json::from_str(&metadata)?)
    }

    async fn set_metadata(&self, project: &str, name: &str, metadata: Value) -> Result<()> {
        let result = sqlx::query("UPDATE queues SET metadata = ? WHERE project = ? AND name = ?")
            .bind(metadata.to_string())
            .bind(project)
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::queue_missing(project, name));
        }
        Ok(())
    }

    async fn delete(&self, project: &str, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Cascade inside one transaction.
        for table in ["messages", "claims", "subscriptions"] {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE project = ? AND queue = ?"
            ))
            .bind(project)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM queues WHERE project = ? AND name = ?")
            .bind(project)
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn stats(&self, project: &str, name: &str) -> Result<QueueStats> {
        if !self.queue_exists(project, name).await? {
            return Err(StorageError::queue_missing(project, name));
        }

        let now = current_timestamp() as i64;

        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(claim_id IS NOT NULL AND claim_expires > ?), 0) AS claimed
               FROM messages
              WHERE project = ? AND queue = ? AND expires > ?",
        )
        .bind(now)
        .bind(project)
        .bind(name)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let total = row.try_get::<i64, _>("total")? as u64;
        let claimed = row.try_get::<i64, _>("claimed")? as u64;

        let bounding = |order: &'static str| {
            let pool = self.pool.clone();
            async move {
                let row = sqlx::query(&format!(
                    "SELECT id, created FROM messages
                      WHERE project = ? AND queue = ? AND expires > ?
                      ORDER BY rank {order} LIMIT 1"
                ))
                .bind(project)
                .bind(name)
                .bind(now)
                .fetch_optional(&pool)
                .await?;

                match row {
                    Some(row) => {
                        let created = row.try_get::<i64, _>("created")? as u64;
                        Ok::<_, StorageError>(Some(MessageAge {
                            id: row.try_get("id")?,
                            age: (now as u64).saturating_sub(created),
                            created,
                        }))
                    }
                    None => Ok(None),
                }
            }
        };

        Ok(QueueStats {
            claimed,
            free: total - claimed,
            total,
            oldest: bounding("ASC").await?,
            newest: bounding("DESC").await?,
        })
    }

    async fn list(
        &self,
        project: &str,
        marker: Option<&str>,
        limit: usize,
        detailed: bool,
    ) -> Result<Page<QueueInfo>> {
        let rows = sqlx::query(
            "SELECT name, metadata FROM queues
              WHERE project = ? AND name > ?
              ORDER BY name LIMIT ?",
        )
        .bind(project)
        .bind(marker.unwrap_or(""))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata = if detailed {
                let raw: String = row.try_get("metadata")?;
                Some(serde_json::from_str(&raw)?)
            } else {
                None
            };
            items.push(QueueInfo {
                name: row.try_get("name")?,
                metadata,
            });
        }

        let marker = if items.len() == limit {
            items.last().map(|q| q.name.clone())
        } else {
            None
        };

        Ok(Page { items, marker })
    }
}
