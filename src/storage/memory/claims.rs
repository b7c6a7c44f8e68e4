use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::Store;
use crate::core::claim::{
    release_message, ClaimMeta, ClaimRecord, ClaimSchedule, DeadLetterPolicy,
};
use crate::core::current_timestamp;
use crate::core::message::{MessageRecord, QueueMessage};
use crate::storage::{ClaimController, Result, StorageError};

pub(super) struct MemoryClaimController {
    pub store: Arc<Store>,
}

#[async_trait]
impl ClaimController for MemoryClaimController {
    async fn create(
        &self,
        project: &str,
        queue: &str,
        ttl: u64,
        grace: u64,
        limit: usize,
    ) -> Result<Option<(String, Vec<QueueMessage>)>> {
        let state = self.store.queue_or_err(project, queue)?;
        let now = current_timestamp();
        let schedule = ClaimSchedule::new(now, ttl, grace);
        let claim_id = Uuid::new_v4().simple().to_string();

        // Everything up to the dead-letter hand-off happens under the
        // queue's write lock, which is this driver's linearization point.
        let (claimed, diverted) = {
            let mut guard = state.write();
            guard.purge_expired(now);

            let policy = DeadLetterPolicy::from_metadata(&guard.metadata);
            let candidates: Vec<String> = guard
                .messages
                .values()
                .filter(|msg| msg.is_visible(now))
                .take(limit)
                .map(|msg| msg.id.clone())
                .collect();

            let mut claimed: Vec<QueueMessage> = Vec::new();
            let mut diverted: Vec<MessageRecord> = Vec::new();

            for id in candidates {
                if let Some(policy) = &policy {
                    let exhausted = guard
                        .message(&id)
                        .is_some_and(|msg| policy.exhausted(msg));
                    if exhausted {
                        if let Some(mut msg) = guard.remove_message(&id) {
                            release_message(&mut msg, now);
                            if let Some(ttl) = policy.ttl {
                                msg.ttl = ttl;
                                msg.expires = now + ttl;
                            }
                            diverted.push(msg);
                        }
                        continue;
                    }
                }

                if let Some(msg) = guard.message_mut(&id) {
                    schedule.stamp(msg, &claim_id);
                    msg.claim_count += 1;
                    claimed.push(msg.to_basic(now));
                }
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
                guard
                    .claim_expiry
                    .insert((record.expires, claim_id.clone()));
                guard.claims.insert(claim_id.clone(), record);
            }

            (claimed, diverted)
        };

        // Dead-lettered messages move outside the source lock so two
        // queues dead-lettering into each other cannot deadlock.
        let policy = {
            let guard = state.read();
            DeadLetterPolicy::from_metadata(&guard.metadata)
        };
        if let Some(policy) = policy {
            if !diverted.is_empty() {
                debug!(
                    "moving {} exhausted messages from {}/{} to dead-letter queue {}",
                    diverted.len(),
                    project,
                    queue,
                    policy.queue
                );
                self.store
                    .create_queue(project, &policy.queue, serde_json::json!({}), now);
                let target = self.store.queue_or_err(project, &policy.queue)?;
                let mut target_guard = target.write();
                for mut msg in diverted {
                    msg.rank = target_guard.next_rank();
                    target_guard.insert_message(msg);
                }
            }
        }

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
        let state = self.store.queue_or_err(project, queue)?;
        let guard = state.read();
        let now = current_timestamp();

        let claim = guard
            .live_claim(claim_id, now)
            .ok_or_else(|| StorageError::claim_missing(project, queue, claim_id))?;

        // Messages already deleted by the worker are silently omitted.
        let messages = claim
            .message_ids
            .iter()
            .filter_map(|id| guard.message(id))
            .filter(|msg| !msg.is_expired(now))
            .map(|msg| msg.to_basic(now))
            .collect();

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
        let state = self.store.queue_or_err(project, queue)?;
        let mut guard = state.write();
        let now = current_timestamp();

        if guard.live_claim(claim_id, now).is_none() {
            return Err(StorageError::claim_missing(project, queue, claim_id));
        }

        let schedule = ClaimSchedule::new(now, ttl, grace);

        let (old_expires, message_ids) = {
            let claim = guard.claims.get_mut(claim_id).expect("claim is live");
            let old = claim.expires;
            claim.ttl = ttl;
            claim.grace = grace;
            claim.expires = schedule.claim_expires;
            (old, claim.message_ids.clone())
        };

        // Reindex the expiry entry, then re-stamp every surviving message.
        guard.claim_expiry.remove(&(old_expires, claim_id.to_string()));
        guard
            .claim_expiry
            .insert((schedule.claim_expires, claim_id.to_string()));

        for id in message_ids {
            if let Some(msg) = guard.message_mut(&id) {
                schedule.stamp(msg, claim_id);
            }
        }

        Ok(())
    }

    async fn delete(&self, project: &str, queue: &str, claim_id: &str) -> Result<()> {
        let Some(state) = self.store.queue(project, queue) else {
            return Ok(());
        };
        let mut guard = state.write();
        let now = current_timestamp();

        // Releasing an unknown claim is a success (idempotent delete).
        let Some(claim) = guard.claims.remove(claim_id) else {
            return Ok(());
        };

        guard
            .claim_expiry
            .remove(&(claim.expires, claim_id.to_string()));

        for id in &claim.message_ids {
            if let Some(msg) = guard.message_mut(id) {
                release_message(msg, now);
            }
        }

        Ok(())
    }

    async fn gc(&self, project: &str, queue: &str) -> Result<u64> {
        let state = self.store.queue_or_err(project, queue)?;
        let mut guard = state.write();
        let now = current_timestamp();

        // Single range over the expiry index; a claim is live only while
        // `expires > now`, so entries at `now` are already lapsed.
        let lapsed: Vec<(u64, String)> = guard
            .claim_expiry
            .range(..(now + 1, String::new()))
            .cloned()
            .collect();

        let mut removed = 0u64;
        for entry in lapsed {
            guard.claim_expiry.remove(&entry);
            if guard.claims.remove(&entry.1).is_some() {
                removed += 1;
            }
        }

        Ok(removed)
    }
}
