use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use super::{row_to_message, store_message_stamp};
use crate::core::claim::{release_message, ClaimMeta, ClaimRecord, ClaimSchedule, DeadLetterPolicy};
use crate::core::current_timestamp;
use crate::core::message::QueueMessage;
use crate::storage::utils::retry_claim;
use crate::storage::{ClaimController, Result, StorageError};

pub(super) struct SqliteClaimController {
    pub pool: SqlitePool,
    /// Bound on the claim-create retry loop; busy/locked conditions are
    /// retried until this budget elapses, then surface as `ClaimConflict`.
    pub claim_retry_budget: Duration,
}

impl SqliteClaimController {
    async fn load_claim(
        &self,
        project: &str,
        queue: &str,
        claim_id: &str,
    ) -> Result<Option<ClaimRecord>> {
        let row = sqlx::query(
            "SELECT * FROM claims WHERE project = ? AND queue = ? AND id = ?",
        )
        .bind(project)
        .bind(queue)
        .bind(claim_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let message_ids = self.claimed_ids(project, queue, claim_id).await?;
        Ok(Some(ClaimRecord {
            id: row.try_get("id")?,
            ttl: row.try_get::<i64, _>("ttl")? as u64,
            grace: row.try_get::<i64, _>("grace")? as u64,
            created: row.try_get::<i64, _>("created")? as u64,
            expires: row.try_get::<i64, _>("expires")? as u64,
            message_ids,
        }))
    }

    /// The claim's message set is derived relationally.
    async fn claimed_ids(&self, project: &str, queue: &str, claim_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT id FROM messages
              WHERE project = ? AND queue = ? AND claim_id = ?
              ORDER BY rank",
        )
        .bind(project)
        .bind(queue)
        .bind(claim_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("id").map_err(Into::into))
            .collect()
    }

    async fn create_once(
        &self,
        project: &str,
        queue: &str,
        ttl: u64,
        grace: u64,
        limit: usize,
    ) -> Result<Option<(String, Vec<QueueMessage>)>> {
        let now = current_timestamp();
        let schedule = ClaimSchedule::new(now, ttl, grace);
        let claim_id = Uuid::new_v4().simple().to_string();

        let mut tx = self.pool.begin().await?;

        let metadata = sqlx::query("SELECT metadata FROM queues WHERE project = ? AND name = ?")
            .bind(project)
            .bind(queue)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StorageError::queue_missing(project, queue))?
            .try_get::<String, _>("metadata")?;
        let metadata: serde_json::Value = serde_json::from_str(&metadata)?;
        let policy = DeadLetterPolicy::from_metadata(&metadata);

        let rows = sqlx::query(
            "SELECT * FROM messages
              WHERE project = ? AND queue = ? AND expires > ?
                AND (claim_id IS NULL OR claim_expires <= ?)
              ORDER BY rank LIMIT ?",
        )
        .bind(project)
        .bind(queue)
        .bind(now as i64)
        .bind(now as i64)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::new();
        for row in &rows {
            let mut msg = row_to_message(row)?;

            if let Some(policy) = &policy {
                if policy.exhausted(&msg) {
                    debug!(
                        "dead-lettering message {} from {}/{} to {}",
                        msg.id, project, queue, policy.queue
                    );
                    sqlx::query(
                        "INSERT OR IGNORE INTO queues (project, name, metadata, created, counter)
                         VALUES (?, ?, '{}', ?, 0)",
                    )
                    .bind(project)
                    .bind(&policy.queue)
                    .bind(now as i64)
                    .execute(&mut *tx)
                    .await?;

                    let dlq_rank = sqlx::query(
                        "UPDATE queues SET counter = counter + 1
                          WHERE project = ? AND name = ?
                          RETURNING counter",
                    )
                    .bind(project)
                    .bind(&policy.queue)
                    .fetch_one(&mut *tx)
                    .await?
                    .try_get::<i64, _>("counter")?;

                    release_message(&mut msg, now);
                    if let Some(ttl) = policy.ttl {
                        msg.ttl = ttl;
                        msg.expires = now + ttl;
                    }

                    sqlx::query(
                        "UPDATE messages
                            SET queue = ?, rank = ?, ttl = ?, expires = ?,
                                claim_id = NULL, claim_expires = ?
                          WHERE project = ? AND queue = ? AND id = ?",
                    )
                    .bind(&policy.queue)
                    .bind(dlq_rank)
                    .bind(msg.ttl as i64)
                    .bind(msg.expires as i64)
                    .bind(now as i64)
                    .bind(project)
                    .bind(queue)
                    .bind(&msg.id)
                    .execute(&mut *tx)
                    .await?;
                    continue;
                }
            }

            schedule.stamp(&mut msg, &claim_id);
            msg.claim_count += 1;
            store_message_stamp(&mut *tx, project, queue, &msg).await?;
            claimed.push(msg.to_basic(now));
        }

        if !claimed.is_empty() {
            sqlx::query(
                "INSERT INTO claims (project, queue, id, ttl, grace, created, expires)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(project)
            .bind(queue)
            .bind(&claim_id)
            .bind(ttl as i64)
            .bind(grace as i64)
            .bind(now as i64)
            .bind(schedule.claim_expires as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        if claimed.is_empty() {
            return Ok(None);
        }
        Ok(Some((claim_id, claimed)))
    }
}

#[async_trait]
impl ClaimController for SqliteClaimController {
    async fn create(
        &self,
        project: &str,
        queue: &str,
        ttl: u64,
        grace: u64,
        limit: usize,
    ) -> Result<Option<(String, Vec<QueueMessage>)>> {
        retry_claim(self.claim_retry_budget, project, queue, || {
            self.create_once(project, queue, ttl, grace, limit)
        })
        .await
    }

    async fn get(
        &self,
        project: &str,
        queue: &str,
        claim_id: &str,
    ) -> Result<(ClaimMeta, Vec<QueueMessage>)> {
        let now = current_timestamp();
        let claim = self
            .load_claim(project, queue, claim_id)
            .await?
            .filter(|claim| claim.is_live(now))
            .ok_or_else(|| StorageError::claim_missing(project, queue, claim_id))?;

        let rows = sqlx::query(
            "SELECT * FROM messages
              WHERE project = ? AND queue = ? AND claim_id = ? AND expires > ?
              ORDER BY rank",
        )
        .bind(project)
        .bind(queue)
        .bind(claim_id)
        .bind(now as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            messages.push(row_to_message(row)?.to_basic(now));
        }

        Ok((claim.to_meta(now), messages))
    }

    async fn update(
        &self,
        project: &str,
        queue: &str,
        claim_id: &str,
        ttl: u64,
        grace: u64,
    ) -> Result<()> {
        let now = current_timestamp();
        let claim = self
            .load_claim(project, queue, claim_id)
            .await?
            .filter(|claim| claim.is_live(now))
            .ok_or_else(|| StorageError::claim_missing(project, queue, claim_id))?;

        let schedule = ClaimSchedule::new(now, ttl, grace);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE claims SET ttl = ?, grace = ?, expires = ?
              WHERE project = ? AND queue = ? AND id = ?",
        )
        .bind(ttl as i64)
        .bind(grace as i64)
        .bind(schedule.claim_expires as i64)
        .bind(project)
        .bind(queue)
        .bind(claim_id)
        .execute(&mut *tx)
        .await?;

        // Re-stamp every surviving message with the re-based lease.
        for id in &claim.message_ids {
            let row = sqlx::query(
                "SELECT * FROM messages WHERE project = ? AND queue = ? AND id = ?",
            )
            .bind(project)
            .bind(queue)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = row {
                let mut msg = row_to_message(&row)?;
                schedule.stamp(&mut msg, claim_id);
                store_message_stamp(&mut *tx, project, queue, &msg).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, project: &str, queue: &str, claim_id: &str) -> Result<()> {
        let now = current_timestamp();
        let mut tx = self.pool.begin().await?;

        // Releasing an unknown claim is a success (idempotent delete).
        sqlx::query("DELETE FROM claims WHERE project = ? AND queue = ? AND id = ?")
            .bind(project)
            .bind(queue)
            .bind(claim_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE messages SET claim_id = NULL, claim_expires = ?
              WHERE project = ? AND queue = ? AND claim_id = ?",
        )
        .bind(now as i64)
        .bind(project)
        .bind(queue)
        .bind(claim_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn gc(&self, project: &str, queue: &str) -> Result<u64> {
        let now = current_timestamp();
        let mut tx = self.pool.begin().await?;

        // Range over the expiry index, then reap expired message rows
        // while we hold the transaction.
        let swept = sqlx::query(
            "DELETE FROM claims WHERE project = ? AND queue = ? AND expires <= ?",
        )
        .bind(project)
        .bind(queue)
        .bind(now as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM messages WHERE project = ? AND queue = ? AND expires <= ?")
            .bind(project)
            .bind(queue)
            .bind(now as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(swept)
    }
}
