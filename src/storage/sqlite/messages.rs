use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use super::row_to_message;
use crate::core::current_timestamp;
use crate::core::message::{ListFilters, MessageRecord, NewMessage, QueueMessage};
use crate::storage::{
    parse_marker, ListOptions, MessageAge, MessageController, Page, Result, SortOrder,
    StorageError,
};

pub(super) struct SqliteMessageController {
    pub pool: SqlitePool,
}

#[async_trait]
impl MessageController for SqliteMessageController {
    async fn post(
        &self,
        project: &str,
        queue: &str,
        messages: Vec<NewMessage>,
        client_uuid: &str,
    ) -> Result<Vec<String>> {
        let now = current_timestamp();
        let mut tx = self.pool.begin().await?;

        let counter = sqlx::query(
            "SELECT counter FROM queues WHERE project = ? AND name = ?",
        )
        .bind(project)
        .bind(queue)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StorageError::queue_missing(project, queue))?
        .try_get::<i64, _>("counter")? as u64;

        let mut rank = counter;
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            rank += 1;
            let record = MessageRecord::new(rank, message.ttl, message.body, client_uuid, now);
            sqlx::query(
                "INSERT INTO messages
                     (project, queue, rank, id, ttl, created, expires, body, client,
                      claim_id, claim_expires, claim_count)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 0, 0)",
            )
            .bind(project)
            .bind(queue)
            .bind(record.rank as i64)
            .bind(&record.id)
            .bind(record.ttl as i64)
            .bind(record.created as i64)
            .bind(record.expires as i64)
            .bind(record.body.to_string())
            .bind(client_uuid)
            .execute(&mut *tx)
            .await?;
            ids.push(record.id);
        }

        sqlx::query("UPDATE queues SET counter = ? WHERE project = ? AND name = ?")
            .bind(rank as i64)
            .bind(project)
            .bind(queue)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ids)
    }

    async fn get(&self, project: &str, queue: &str, message_id: &str) -> Result<QueueMessage> {
        let now = current_timestamp();
        let row = sqlx::query(
            "SELECT * FROM messages WHERE project = ? AND queue = ? AND id = ?",
        )
        .bind(project)
        .bind(queue)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(row_to_message)
            .transpose()?
            .filter(|msg| !msg.is_expired(now))
            .map(|msg| msg.to_basic(now))
            .ok_or_else(|| StorageError::message_missing(project, queue, message_id))
    }

    async fn bulk_get(
        &self,
        project: &str,
        queue: &str,
        message_ids: &[String],
    ) -> Result<Vec<QueueMessage>> {
        let now = current_timestamp();
        let mut found = Vec::new();

        for id in message_ids {
            let row = sqlx::query(
                "SELECT * FROM messages WHERE project = ? AND queue = ? AND id = ?",
            )
            .bind(project)
            .bind(queue)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                let msg = row_to_message(&row)?;
                if !msg.is_expired(now) {
                    found.push(msg.to_basic(now));
                }
            }
        }
        Ok(found)
    }

    async fn list(
        &self,
        project: &str,
        queue: &str,
        opts: &ListOptions,
    ) -> Result<Page<QueueMessage>> {
        let marker = parse_marker(opts.marker.as_deref())?;
        let now = current_timestamp();

        let exists = sqlx::query("SELECT 1 FROM queues WHERE project = ? AND name = ?")
            .bind(project)
            .bind(queue)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StorageError::queue_missing(project, queue));
        }

        let filters = ListFilters {
            now,
            echo: opts.echo,
            include_claimed: opts.include_claimed,
            client_uuid: opts.client_uuid.clone(),
        };

        // The expiry/claim/echo predicates live in `ListFilters`; SQL does
        // the ordering and coarse pagination.
        let mut items = Vec::new();
        let mut last_rank = marker.map(|rank| rank as i64).unwrap_or(-1);

        loop {
            let rows = sqlx::query(
                "SELECT * FROM messages
                  WHERE project = ? AND queue = ? AND rank > ?
                  ORDER BY rank LIMIT ?",
            )
            .bind(project)
            .bind(queue)
            .bind(last_rank)
            .bind(opts.limit as i64)
            .fetch_all(&self.pool)
            .await?;

            if rows.is_empty() {
                break;
            }

            for row in &rows {
                let msg = row_to_message(row)?;
                last_rank = msg.rank as i64;
                if filters.admits(&msg) {
                    items.push(msg.to_basic(now));
                    if items.len() == opts.limit {
                        break;
                    }
                }
            }

            if items.len() == opts.limit {
                break;
            }
        }

        let marker = if items.is_empty() {
            None
        } else {
            Some(last_rank.to_string())
        };

        Ok(Page { items, marker })
    }

    async fn delete(
        &self,
        project: &str,
        queue: &str,
        message_id: &str,
        claim: Option<&str>,
    ) -> Result<()> {
        let now = current_timestamp();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT * FROM messages WHERE project = ? AND queue = ? AND id = ?",
        )
        .bind(project)
        .bind(queue)
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            // Essentially "already" deleted.
            return Ok(());
        };
        let msg = row_to_message(&row)?;
        let owner = msg.claim_id.as_deref().filter(|_| msg.is_claimed(now));

        match (claim, owner) {
            (None, Some(_)) => {
                return Err(StorageError::MessageIsClaimed {
                    id: message_id.to_string(),
                })
            }
            (Some(_), None) => {
                return Err(StorageError::MessageNotClaimed {
                    id: message_id.to_string(),
                })
            }
            (Some(requested), Some(owner)) if requested != owner => {
                let live = sqlx::query(
                    "SELECT 1 FROM claims
                      WHERE project = ? AND queue = ? AND id = ? AND expires > ?",
                )
                .bind(project)
                .bind(queue)
                .bind(requested)
                .bind(now as i64)
                .fetch_optional(&mut *tx)
                .await?;

                if live.is_some() {
                    return Err(StorageError::MessageIsClaimedBy {
                        id: message_id.to_string(),
                        claim: requested.to_string(),
                    });
                }
                return Err(StorageError::claim_missing(project, queue, requested));
            }
            _ => {}
        }

        sqlx::query("DELETE FROM messages WHERE project = ? AND queue = ? AND id = ?")
            .bind(project)
            .bind(queue)
            .bind(message_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn bulk_delete(
        &self,
        project: &str,
        queue: &str,
        message_ids: &[String],
        claim_ids: Option<&[String]>,
    ) -> Result<()> {
        let now = current_timestamp();
        let mut tx = self.pool.begin().await?;

        for id in message_ids {
            let row = sqlx::query(
                "SELECT * FROM messages WHERE project = ? AND queue = ? AND id = ?",
            )
            .bind(project)
            .bind(queue)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = row else {
                continue;
            };
            let msg = row_to_message(&row)?;

            if let Some(claim_ids) = claim_ids {
                let owner = msg.claim_id.as_deref().filter(|_| msg.is_claimed(now));
                match owner {
                    None => {
                        return Err(StorageError::MessageNotClaimed { id: id.clone() });
                    }
                    Some(owner) if !claim_ids.iter().any(|c| c == owner) => {
                        return Err(StorageError::MessageIsClaimedBy {
                            id: id.clone(),
                            claim: owner.to_string(),
                        });
                    }
                    Some(_) => {}
                }
            }

            sqlx::query("DELETE FROM messages WHERE project = ? AND queue = ? AND id = ?")
                .bind(project)
                .bind(queue)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn first(
        &self,
        project: &str,
        queue: &str,
        sort: SortOrder,
    ) -> Result<Option<MessageAge>> {
        let exists = sqlx::query("SELECT 1 FROM queues WHERE project = ? AND name = ?")
            .bind(project)
            .bind(queue)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StorageError::queue_missing(project, queue));
        }

        let now = current_timestamp();
        let order = match sort {
            SortOrder::Oldest => "ASC",
            SortOrder::Newest => "DESC",
        };

        let row = sqlx::query(&format!(
            "SELECT id, created FROM messages
              WHERE project = ? AND queue = ? AND expires > ?
              ORDER BY rank {order} LIMIT 1"
        ))
        .bind(project)
        .bind(queue)
        .bind(now as i64)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let created = row.try_get::<i64, _>("created")? as u64;
                Ok(Some(MessageAge {
                    id: row.try_get("id")?,
                    age: now.saturating_sub(created),
                    created,
                }))
            }
            None => Ok(None),
        }
    }

    async fn pop(&self, project: &str, queue: &str, limit: usize) -> Result<Vec<QueueMessage>> {
        let now = current_timestamp();
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM queues WHERE project = ? AND name = ?")
            .bind(project)
            .bind(queue)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StorageError::queue_missing(project, queue));
        }

        // Claim-and-delete in one transaction.
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

        let mut popped = Vec::with_capacity(rows.len());
        for row in &rows {
            let msg = row_to_message(row)?;
            sqlx::query("DELETE FROM messages WHERE project = ? AND queue = ? AND id = ?")
                .bind(project)
                .bind(queue)
                .bind(&msg.id)
                .execute(&mut *tx)
                .await?;
            popped.push(msg.to_basic(now));
        }

        tx.commit().await?;
        Ok(popped)
    }

    async fn active(&self, project: &str, queue: &str, limit: usize) -> Result<Vec<QueueMessage>> {
        let now = current_timestamp();

        let exists = sqlx::query("SELECT 1 FROM queues WHERE project = ? AND name = ?")
            .bind(project)
            .bind(queue)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StorageError::queue_missing(project, queue));
        }

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
        .fetch_all(&self.pool)
        .await?;

        let mut active = Vec::with_capacity(rows.len());
        for row in &rows {
            active.push(row_to_message(row)?.to_basic(now));
        }
        Ok(active)
    }
}
