use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use crate::core::current_timestamp;
use crate::storage::{
    Page, Result, StorageError, Subscription, SubscriptionController, SubscriptionPatch,
};

pub(super) struct SqliteSubscriptionController {
    pub pool: SqlitePool,
}

fn row_to_subscription(row: &SqliteRow) -> Result<Subscription> {
    let options: String = row.try_get("options")?;
    Ok(Subscription {
        id: row.try_get("id")?,
        source: row.try_get("queue")?,
        subscriber: row.try_get("subscriber")?,
        ttl: row.try_get::<i64, _>("ttl")? as u64,
        expires: row.try_get::<i64, _>("expires")? as u64,
        options: serde_json::from_str(&options)?,
        confirmed: row.try_get::<i64, _>("confirmed")? != 0,
    })
}

impl SqliteSubscriptionController {
    async fn queue_exists(&self, project: &str, queue: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM queues WHERE project = ? AND name = ?")
            .bind(project)
            .bind(queue)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl SubscriptionController for SqliteSubscriptionController {
    async fn list(
        &self,
        project: &str,
        queue: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Page<Subscription>> {
        if !self.queue_exists(project, queue).await? {
            return Err(StorageError::queue_missing(project, queue));
        }

        let now = current_timestamp();
        let rows = sqlx::query(
            "SELECT * FROM subscriptions
              WHERE project = ? AND queue = ? AND id > ? AND expires > ?
              ORDER BY id LIMIT ?",
        )
        .bind(project)
        .bind(queue)
        .bind(marker.unwrap_or(""))
        .bind(now as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(row_to_subscription(row)?);
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
        let row = sqlx::query(
            "SELECT * FROM subscriptions
              WHERE project = ? AND queue = ? AND id = ? AND expires > ?",
        )
        .bind(project)
        .bind(queue)
        .bind(subscription_id)
        .bind(now as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(row_to_subscription)
            .transpose()?
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
        if !self.queue_exists(project, queue).await? {
            return Err(StorageError::queue_missing(project, queue));
        }

        let now = current_timestamp();
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT id, expires FROM subscriptions
              WHERE project = ? AND queue = ? AND subscriber = ?",
        )
        .bind(project)
        .bind(queue)
        .bind(subscriber)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            if row.try_get::<i64, _>("expires")? as u64 > now {
                return Err(StorageError::SubscriptionAlreadyExists);
            }
            // A lapsed subscription no longer reserves the subscriber URI.
            let stale: String = row.try_get("id")?;
            sqlx::query("DELETE FROM subscriptions WHERE project = ? AND queue = ? AND id = ?")
                .bind(project)
                .bind(queue)
                .bind(&stale)
                .execute(&mut *tx)
                .await?;
        }

        let id = Uuid::new_v4().simple().to_string();
        sqlx::query(
            "INSERT INTO subscriptions
                 (project, queue, id, subscriber, ttl, expires, options, confirmed)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(project)
        .bind(queue)
        .bind(&id)
        .bind(subscriber)
        .bind(ttl as i64)
        .bind((now + ttl) as i64)
        .bind(options.to_string())
        .bind(confirmed as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT * FROM subscriptions WHERE project = ? AND queue = ? AND id = ?",
        )
        .bind(project)
        .bind(queue)
        .bind(subscription_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StorageError::SubscriptionDoesNotExist {
            id: subscription_id.to_string(),
        })?;
        let mut sub = row_to_subscription(&row)?;

        if let Some(subscriber) = &patch.subscriber {
            let taken = sqlx::query(
                "SELECT 1 FROM subscriptions
                  WHERE project = ? AND queue = ? AND subscriber = ? AND id != ?",
            )
            .bind(project)
            .bind(queue)
            .bind(subscriber)
            .bind(subscription_id)
            .fetch_optional(&mut *tx)
            .await?;
            if taken.is_some() {
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

        sqlx::query(
            "UPDATE subscriptions SET subscriber = ?, ttl = ?, expires = ?, options = ?
              WHERE project = ? AND queue = ? AND id = ?",
        )
        .bind(&sub.subscriber)
        .bind(sub.ttl as i64)
        .bind(sub.expires as i64)
        .bind(sub.options.to_string())
        .bind(project)
        .bind(queue)
        .bind(subscription_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, project: &str, queue: &str, subscription_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM subscriptions WHERE project = ? AND queue = ? AND id = ?")
            .bind(project)
            .bind(queue)
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn exists(&self, project: &str, queue: &str, subscription_id: &str) -> Result<bool> {
        let now = current_timestamp();
        let row = sqlx::query(
            "SELECT 1 FROM subscriptions
              WHERE project = ? AND queue = ? AND id = ? AND expires > ?",
        )
        .bind(project)
        .bind(queue)
        .bind(subscription_id)
        .bind(now as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn confirm(
        &self,
        project: &str,
        queue: &str,
        subscription_id: &str,
        confirmed: bool,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE subscriptions SET confirmed = ?
              WHERE project = ? AND queue = ? AND id = ?",
        )
        .bind(confirmed as i64)
        .bind(project)
        .bind(queue)
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SubscriptionDoesNotExist {
                id: subscription_id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_with_subscriber(
        &self,
        project: &str,
        queue: &str,
        subscriber: &str,
    ) -> Result<Subscription> {
        let row = sqlx::query(
            "SELECT * FROM subscriptions
              WHERE project = ? AND queue = ? AND subscriber = ?",
        )
        .bind(project)
        .bind(queue)
        .bind(subscriber)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(row_to_subscription)
            .transpose()?
            .ok_or_else(|| StorageError::SubscriptionDoesNotExist {
                id: subscriber.to_string(),
            })
    }
}
