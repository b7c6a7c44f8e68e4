use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable};
use tracing::debug;
use uuid::Uuid;

use super::{
    decode, encode, expiry_key, prefix_bounds, rank_key, scope, scoped, QueueEntry, CLAIMS,
    CLAIM_EXPIRY, MESSAGES, MESSAGE_INDEX, QUEUES,
};
use crate::core::claim::{
    release_message, ClaimMeta, ClaimRecord, ClaimSchedule, DeadLetterPolicy,
};
use crate::core::current_timestamp;
use crate::core::message::{MessageRecord, QueueMessage};
use crate::storage::{ClaimController, Result, StorageError};

pub(super) struct RedbClaimController {
    pub db: Arc<Database>,
}

const EMPTY: &[u8] = &[];

#[async_trait]
impl ClaimController for RedbClaimController {
    async fn create(
        &self,
        project: &str,
        queue: &str,
        ttl: u64,
        grace: u64,
        limit: usize,
    ) -> Result<Option<(String, Vec<QueueMessage>)>> {
        let scope_key = scope(project, queue);
        let now = current_timestamp();
        let schedule = ClaimSchedule::new(now, ttl, grace);
        let claim_id = Uuid::new_v4().simple().to_string();

        let tx = self.db.begin_write()?;
        let claimed = {
            let mut queues = tx.open_table(QUEUES)?;
            let entry: QueueEntry = match queues.get(scope_key.as_str())? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StorageError::queue_missing(project, queue)),
            };
            let policy = DeadLetterPolicy::from_metadata(&entry.metadata);

            let mut table = tx.open_table(MESSAGES)?;
            let mut index = tx.open_table(MESSAGE_INDEX)?;

            let (start, end) = prefix_bounds(&scope_key);
            let mut candidates = Vec::new();
            for item in table.range::<&str>(start.as_str()..end.as_str())? {
                let (_, value) = item?;
                let msg: MessageRecord = decode(value.value())?;
                if msg.is_visible(now) {
                    candidates.push(msg);
                    if candidates.len() == limit {
                        break;
                    }
                }
            }

            let mut claimed = Vec::new();
            for mut msg in candidates {
                if let Some(policy) = &policy {
                    if policy.exhausted(&msg) {
                        // The message has used up its claims: divert it to
                        // the dead-letter queue inside the same transaction.
                        debug!(
                            "dead-lettering message {} from {}/{} to {}",
                            msg.id, project, queue, policy.queue
                        );
                        table.remove(rank_key(&scope_key, msg.rank).as_str())?;
                        index.remove(scoped(&scope_key, &msg.id).as_str())?;

                        release_message(&mut msg, now);
                        if let Some(ttl) = policy.ttl {
                            msg.ttl = ttl;
                            msg.expires = now + ttl;
                        }

                        let dlq_scope = scope(project, &policy.queue);
                        let mut dlq: QueueEntry = match queues.get(dlq_scope.as_str())? {
                            Some(guard) => decode(guard.value())?,
                            None => QueueEntry {
                                metadata: serde_json::json!({}),
                                created: now,
                                counter: 0,
                            },
                        };
                        dlq.counter += 1;
                        msg.rank = dlq.counter;
                        table.insert(
                            rank_key(&dlq_scope, msg.rank).as_str(),
                            encode(&msg)?.as_slice(),
                        )?;
                        index.insert(scoped(&dlq_scope, &msg.id).as_str(), msg.rank)?;
                        queues.insert(dlq_scope.as_str(), encode(&dlq)?.as_slice())?;
                        continue;
                    }
                }

                schedule.stamp(&mut msg, &claim_id);
                msg.claim_count += 1;
                table.insert(
                    rank_key(&scope_key, msg.rank).as_str(),
                    encode(&msg)?.as_slice(),
                )?;
                claimed.push(msg.to_basic(now));
            }

            if !claimed.is_empty() {
                let record = ClaimRecord {
                    id: claim_id.clone(),
                    ttl,
                    grace,
                    created: now,
                    expires: schedule.claim_expires,
                    message_ids: claimed.iter().map(|msg| msg.id.clone()).collect(),
                };
                let mut claims = tx.open_table(CLAIMS)?;
                claims.insert(
                    scoped(&scope_key, &claim_id).as_str(),
                    encode(&record)?.as_slice(),
                )?;
                let mut expiry = tx.open_table(CLAIM_EXPIRY)?;
                expiry.insert(
                    expiry_key(&scope_key, record.expires, &claim_id).as_str(),
                    EMPTY,
                )?;
            }

            claimed
        };
        tx.commit()?;

        if claimed.is_empty() {
            return Ok(None);
        }
        Ok(Some((claim_id, claimed)))
    }

    async fn get(
        &self,
        project: &str,
        queue: &str,
        claim_id: &str,
    ) -> Result<(ClaimMeta, Vec<QueueMessage>)> {
        let scope_key = scope(project, queue);
        let now = current_timestamp();

        let tx = self.db.begin_read()?;
        let claims = tx.open_table(CLAIMS)?;
        let record: ClaimRecord = match claims.get(scoped(&scope_key, claim_id).as_str())? {
            Some(guard) => decode(guard.value())?,
            None => return Err(StorageError::claim_missing(project, queue, claim_id)),
        };
        if !record.is_live(now) {
            return Err(StorageError::claim_missing(project, queue, claim_id));
        }

        let index = tx.open_table(MESSAGE_INDEX)?;
        let table = tx.open_table(MESSAGES)?;

        let mut messages = Vec::new();
        for id in &record.message_ids {
            let Some(rank) = index.get(scoped(&scope_key, id).as_str())? else {
                continue;
            };
            if let Some(guard) = table.get(rank_key(&scope_key, rank.value()).as_str())? {
                let msg: MessageRecord = decode(guard.value())?;
                if !msg.is_expired(now) {
                    messages.push(msg.to_basic(now));
                }
            }
        }

        Ok((record.to_meta(now), messages))
    }

    async fn update(
        &self,
        project: &str,
        queue: &str,
        claim_id: &str,
        ttl: u64,
        grace: u64,
    ) -> Result<()> {
        let scope_key = scope(project, queue);
        let now = current_timestamp();
        let schedule = ClaimSchedule::new(now, ttl, grace);

        let tx = self.db.begin_write()?;
        {
            let mut claims = tx.open_table(CLAIMS)?;
            let claim_key = scoped(&scope_key, claim_id);
            let mut record: ClaimRecord = match claims.get(claim_key.as_str())? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StorageError::claim_missing(project, queue, claim_id)),
            };
            if !record.is_live(now) {
                return Err(StorageError::claim_missing(project, queue, claim_id));
            }

            let mut expiry = tx.open_table(CLAIM_EXPIRY)?;
            expiry.remove(expiry_key(&scope_key, record.expires, claim_id).as_str())?;

            record.ttl = ttl;
            record.grace = grace;
            record.expires = schedule.claim_expires;
            claims.insert(claim_key.as_str(), encode(&record)?.as_slice())?;
            expiry.insert(
                expiry_key(&scope_key, record.expires, claim_id).as_str(),
                EMPTY,
            )?;

            // Re-stamp every surviving message with the re-based lease.
            let mut table = tx.open_table(MESSAGES)?;
            let index = tx.open_table(MESSAGE_INDEX)?;
            for id in &record.message_ids {
                let Some(rank) = index.get(scoped(&scope_key, id).as_str())? else {
                    continue;
                };
                let rank = rank.value();
                let msg: Option<MessageRecord> =
                    match table.get(rank_key(&scope_key, rank).as_str())? {
                        Some(guard) => Some(decode(guard.value())?),
                        None => None,
                    };
                if let Some(mut msg) = msg {
                    schedule.stamp(&mut msg, claim_id);
                    table.insert(rank_key(&scope_key, rank).as_str(), encode(&msg)?.as_slice())?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, project: &str, queue: &str, claim_id: &str) -> Result<()> {
        let scope_key = scope(project, queue);
        let now = current_timestamp();

        let tx = self.db.begin_write()?;
        {
            let mut claims = tx.open_table(CLAIMS)?;
            let claim_key = scoped(&scope_key, claim_id);
            let record: Option<ClaimRecord> = match claims.remove(claim_key.as_str())? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };

            // Idempotent: nothing to release is a success.
            if let Some(record) = record {
                let mut expiry = tx.open_table(CLAIM_EXPIRY)?;
                expiry.remove(expiry_key(&scope_key, record.expires, claim_id).as_str())?;

                let mut table = tx.open_table(MESSAGES)?;
                let index = tx.open_table(MESSAGE_INDEX)?;
                for id in &record.message_ids {
                    let Some(rank) = index.get(scoped(&scope_key, id).as_str())? else {
                        continue;
                    };
                    let rank = rank.value();
                    let msg: Option<MessageRecord> =
                        match table.get(rank_key(&scope_key, rank).as_str())? {
                            Some(guard) => Some(decode(guard.value())?),
                            None => None,
                        };
                    if let Some(mut msg) = msg {
                        release_message(&mut msg, now);
                        table.insert(
                            rank_key(&scope_key, rank).as_str(),
                            encode(&msg)?.as_slice(),
                        )?;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn gc(&self, project: &str, queue: &str) -> Result<u64> {
        let scope_key = scope(project, queue);
        let now = current_timestamp();

        let tx = self.db.begin_write()?;
        let removed = {
            let mut expiry = tx.open_table(CLAIM_EXPIRY)?;
            let mut claims = tx.open_table(CLAIMS)?;

            // One range over the expiry index: keys sort by zero-padded
            // expiry, so everything below `now + 1` has lapsed.
            let start = format!("{scope_key}/");
            let end = format!("{scope_key}/{:020}", now + 1);
            let mut lapsed = Vec::new();
            for entry in expiry.range::<&str>(start.as_str()..end.as_str())? {
                let (key, _) = entry?;
                lapsed.push(key.value().to_string());
            }

            let mut removed = 0u64;
            for key in lapsed {
                expiry.remove(key.as_str())?;
                let claim_id = key.rsplit('/').next().unwrap_or_default().to_string();
                if claims.remove(scoped(&scope_key, &claim_id).as_str())?.is_some() {
                    removed += 1;
                }
            }

            // Piggy-back the message reaper: physically drop expired
            // message records while we hold the write transaction.
            let mut table = tx.open_table(MESSAGES)?;
            let mut index = tx.open_table(MESSAGE_INDEX)?;
            let (start, end) = prefix_bounds(&scope_key);
            let mut dead = Vec::new();
            for entry in table.range::<&str>(start.as_str()..end.as_str())? {
                let (key, value) = entry?;
                let msg: MessageRecord = decode(value.value())?;
                if msg.is_expired(now) {
                    dead.push((key.value().to_string(), msg.id));
                }
            }
            for (key, id) in dead {
                table.remove(key.as_str())?;
                index.remove(scoped(&scope_key, &id).as_str())?;
            }

            removed
        };
        tx.commit()?;
        Ok(removed)
    }
}
