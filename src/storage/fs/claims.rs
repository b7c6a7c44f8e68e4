use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{read_json, remove_if_present, sorted_stems, write_json, QueueRecord, Shared};
use crate::core::claim::{
    release_message, ClaimMeta, ClaimRecord, ClaimSchedule, DeadLetterPolicy,
};
use crate::core::current_timestamp;
use crate::core::message::{MessageRecord, QueueMessage};
use crate::storage::{ClaimController, Result, StorageError};

pub(super) struct FsClaimController {
    pub shared: Arc<Shared>,
}

impl FsClaimController {
    fn load_claim(&self, project: &str, queue: &str, claim_id: &str) -> Result<Option<ClaimRecord>> {
        read_json(&self.shared.claim_path(project, queue, claim_id))
    }
}

#[async_trait]
impl ClaimController for FsClaimController {
    async fn create(
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

        let (claimed, diverted, policy) = {
            let lock = self.shared.lock(project, queue);
            let _guard = lock.lock();

            let record = self.shared.load_queue_or_err(project, queue)?;
            let policy = DeadLetterPolicy::from_metadata(&record.metadata);

            let mut claimed: Vec<QueueMessage> = Vec::new();
            let mut diverted: Vec<MessageRecord> = Vec::new();

            for rank in self.shared.message_ranks(project, queue)? {
                let Some(mut msg) = self.shared.load_message(project, queue, rank)? else {
                    continue;
                };
                if !msg.is_visible(now) {
                    continue;
                }

                if let Some(policy) = &policy {
                    if policy.exhausted(&msg) {
                        self.shared.remove_message(project, queue, &msg)?;
                        release_message(&mut msg, now);
                        if let Some(ttl) = policy.ttl {
                            msg.ttl = ttl;
                            msg.expires = now + ttl;
                        }
                        diverted.push(msg);
                        continue;
                    }
                }

                schedule.stamp(&mut msg, &claim_id);
                msg.claim_count += 1;
                self.shared.store_message(project, queue, &msg)?;
                claimed.push(msg.to_basic(now));

                if claimed.len() + diverted.len() == limit {
                    break;
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
                write_json(
                    &self.shared.claim_path(project, queue, &claim_id),
                    &record,
                )?;
            }

            (claimed, diverted, policy)
        };

        // Dead-letter hand-off happens after the source lock is released
        // so two queues dead-lettering into each other cannot deadlock.
        if let Some(policy) = policy {
            if !diverted.is_empty() {
                debug!(
                    "dead-lettering {} messages from {}/{} to {}",
                    diverted.len(),
                    project,
                    queue,
                    policy.queue
                );
                let lock = self.shared.lock(project, &policy.queue);
                let _guard = lock.lock();

                let mut dlq = match self.shared.load_queue(project, &policy.queue)? {
                    Some(record) => record,
                    None => QueueRecord {
                        metadata: serde_json::json!({}),
                        created: now,
                        counter: 0,
                    },
                };
                for mut msg in diverted {
                    dlq.counter += 1;
                    msg.rank = dlq.counter;
                    self.shared.store_message(project, &policy.queue, &msg)?;
                }
                self.shared.store_queue(project, &policy.queue, &dlq)?;
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
        let now = current_timestamp();
        let claim = self
            .load_claim(project, queue, claim_id)?
            .filter(|claim| claim.is_live(now))
            .ok_or_else(|| StorageError::claim_missing(project, queue, claim_id))?;

        // Messages already deleted by the worker are silently omitted.
        let mut messages = Vec::new();
        for id in &claim.message_ids {
            if let Some(msg) = self.shared.load_message_by_id(project, queue, id)? {
                if !msg.is_expired(now) {
                    messages.push(msg.to_basic(now));
                }
            }
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
        let lock = self.shared.lock(project, queue);
        let _guard = lock.lock();

        let now = current_timestamp();
        let mut claim = self
            .load_claim(project, queue, claim_id)?
            .filter(|claim| claim.is_live(now))
            .ok_or_else(|| StorageError::claim_missing(project, queue, claim_id))?;

        let schedule = ClaimSchedule::new(now, ttl, grace);
        claim.ttl = ttl;
        claim.grace = grace;
        claim.expires = schedule.claim_expires;
        write_json(&self.shared.claim_path(project, queue, claim_id), &claim)?;

        // Re-stamp every surviving message with the re-based lease.
        for id in &claim.message_ids {
            if let Some(mut msg) = self.shared.load_message_by_id(project, queue, id)? {
                schedule.stamp(&mut msg, claim_id);
                self.shared.store_message(project, queue, &msg)?;
            }
        }
        Ok(())
    }

    async fn delete(&self, project: &str, queue: &str, claim_id: &str) -> Result<()> {
        let lock = self.shared.lock(project, queue);
        let _guard = lock.lock();

        // Idempotent: releasing an unknown claim is a success.
        let Some(claim) = self.load_claim(project, queue, claim_id)? else {
            return Ok(());
        };

        let now = current_timestamp();
        for id in &claim.message_ids {
            if let Some(mut msg) = self.shared.load_message_by_id(project, queue, id)? {
                release_message(&mut msg, now);
                self.shared.store_message(project, queue, &msg)?;
            }
        }

        remove_if_present(&self.shared.claim_path(project, queue, claim_id))
    }

    async fn gc(&self, project: &str, queue: &str) -> Result<u64> {
        let lock = self.shared.lock(project, queue);
        let _guard = lock.lock();

        self.shared.load_queue_or_err(project, queue)?;
        let now = current_timestamp();

        let claims_dir = self.shared.queue_dir(project, queue).join("claims");
        let mut removed = 0u64;
        for stem in sorted_stems(&claims_dir)? {
            let Some(claim) = self.load_claim(project, queue, &stem)? else {
                continue;
            };
            if !claim.is_live(now) {
                remove_if_present(&self.shared.claim_path(project, queue, &stem))?;
                removed += 1;
            }
        }

        // Reap expired message objects while we hold the lock.
        for rank in self.shared.message_ranks(project, queue)? {
            if let Some(msg) = self.shared.load_message(project, queue, rank)? {
                if msg.is_expired(now) {
                    self.shared.remove_message(project, queue, &msg)?;
                }
            }
        }

        Ok(removed)
    }
}
