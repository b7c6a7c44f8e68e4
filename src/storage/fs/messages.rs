use std::sync::Arc;

use async_trait::async_trait;

use super::{read_json, write_json, Shared};
use crate::core::claim::ClaimRecord;
use crate::core::current_timestamp;
use crate::core::message::{ListFilters, MessageRecord, NewMessage, QueueMessage};
use crate::storage::{
    parse_marker, ListOptions, MessageAge, MessageController, Page, Result, SortOrder,
    StorageError,
};

pub(super) struct FsMessageController {
    pub shared: Arc<Shared>,
}

impl FsMessageController {
    fn live_claim(&self, project: &str, queue: &str, claim_id: &str, now: u64) -> Result<bool> {
        let record: Option<ClaimRecord> =
            read_json(&self.shared.claim_path(project, queue, claim_id))?;
        Ok(record.is_some_and(|claim| claim.is_live(now)))
    }

    /// Unlinks a deleted message from its owning claim object.
    fn unlink_from_claim(
        &self,
        project: &str,
        queue: &str,
        claim_id: &str,
        message_id: &str,
    ) -> Result<()> {
        let path = self.shared.claim_path(project, queue, claim_id);
        if let Some(mut claim) = read_json::<ClaimRecord>(&path)? {
            claim.message_ids.retain(|mid| mid != message_id);
            write_json(&path, &claim)?;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageController for FsMessageController {
    async fn post(
        &self,
        project: &str,
        queue: &str,
        messages: Vec<NewMessage>,
        client_uuid: &str,
    ) -> Result<Vec<String>> {
        let lock = self.shared.lock(project, queue);
        let _guard = lock.lock();

        let mut record = self.shared.load_queue_or_err(project, queue)?;
        let now = current_timestamp();

        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            record.counter += 1;
            let msg = MessageRecord::new(record.counter, message.ttl, message.body, client_uuid, now);
            self.shared.store_message(project, queue, &msg)?;
            ids.push(msg.id);
        }

        self.shared.store_queue(project, queue, &record)?;
        Ok(ids)
    }

    async fn get(&self, project: &str, queue: &str, message_id: &str) -> Result<QueueMessage> {
        let now = current_timestamp();
        self.shared
            .load_message_by_id(project, queue, message_id)?
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
            if let Some(msg) = self.shared.load_message_by_id(project, queue, id)? {
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
        if !self.shared.queue_exists(project, queue) {
            return Err(StorageError::queue_missing(project, queue));
        }

        let marker = parse_marker(opts.marker.as_deref())?;
        let now = current_timestamp();
        let filters = ListFilters {
            now,
            echo: opts.echo,
            include_claimed: opts.include_claimed,
            client_uuid: opts.client_uuid.clone(),
        };

        let mut items = Vec::new();
        let mut last_rank = None;

        for rank in self.shared.message_ranks(project, queue)? {
            if let Some(marker) = marker {
                if rank <= marker {
                    continue;
                }
            }
            let Some(msg) = self.shared.load_message(project, queue, rank)? else {
                continue;
            };
            if !filters.admits(&msg) {
                continue;
            }

            last_rank = Some(rank);
            items.push(msg.to_basic(now));
            if items.len() == opts.limit {
                break;
            }
        }

        Ok(Page {
            items,
            marker: last_rank.map(|rank| rank.to_string()),
        })
    }

    async fn delete(
        &self,
        project: &str,
        queue: &str,
        message_id: &str,
        claim: Option<&str>,
    ) -> Result<()> {
        let lock = self.shared.lock(project, queue);
        let _guard = lock.lock();

        if !self.shared.queue_exists(project, queue) {
            return Ok(());
        }
        let Some(msg) = self.shared.load_message_by_id(project, queue, message_id)? else {
            return Ok(());
        };

        let now = current_timestamp();
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
                if self.live_claim(project, queue, requested, now)? {
                    return Err(StorageError::MessageIsClaimedBy {
                        id: message_id.to_string(),
                        claim: requested.to_string(),
                    });
                }
                return Err(StorageError::claim_missing(project, queue, requested));
            }
            _ => {}
        }

        self.shared.remove_message(project, queue, &msg)?;
        if let Some(owner) = owner {
            self.unlink_from_claim(project, queue, owner, message_id)?;
        }
        Ok(())
    }

    async fn bulk_delete(
        &self,
        project: &str,
        queue: &str,
        message_ids: &[String],
        claim_ids: Option<&[String]>,
    ) -> Result<()> {
        let lock = self.shared.lock(project, queue);
        let _guard = lock.lock();

        if !self.shared.queue_exists(project, queue) {
            return Ok(());
        }
        let now = current_timestamp();

        for id in message_ids {
            let Some(msg) = self.shared.load_message_by_id(project, queue, id)? else {
                continue;
            };

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

            self.shared.remove_message(project, queue, &msg)?;
        }
        Ok(())
    }

    async fn first(
        &self,
        project: &str,
        queue: &str,
        sort: SortOrder,
    ) -> Result<Option<MessageAge>> {
        if !self.shared.queue_exists(project, queue) {
            return Err(StorageError::queue_missing(project, queue));
        }

        let now = current_timestamp();
        let ranks = self.shared.message_ranks(project, queue)?;

        let scan = |ranks: &mut dyn Iterator<Item = &u64>| -> Result<Option<MessageAge>> {
            for rank in ranks {
                if let Some(msg) = self.shared.load_message(project, queue, *rank)? {
                    if !msg.is_expired(now) {
                        return Ok(Some(MessageAge {
                            id: msg.id,
                            age: now.saturating_sub(msg.created),
                            created: msg.created,
                        }));
                    }
                }
            }
            Ok(None)
        };

        match sort {
            SortOrder::Oldest => scan(&mut ranks.iter()),
            SortOrder::Newest => scan(&mut ranks.iter().rev()),
        }
    }

    async fn pop(&self, project: &str, queue: &str, limit: usize) -> Result<Vec<QueueMessage>> {
        let lock = self.shared.lock(project, queue);
        let _guard = lock.lock();

        self.shared.load_queue_or_err(project, queue)?;
        let now = current_timestamp();

        // Claim-and-delete in one critical section.
        let mut popped = Vec::new();
        for rank in self.shared.message_ranks(project, queue)? {
            let Some(msg) = self.shared.load_message(project, queue, rank)? else {
                continue;
            };
            if !msg.is_visible(now) {
                continue;
            }

            self.shared.remove_message(project, queue, &msg)?;
            popped.push(msg.to_basic(now));
            if popped.len() == limit {
                break;
            }
        }

        Ok(popped)
    }

    async fn active(&self, project: &str, queue: &str, limit: usize) -> Result<Vec<QueueMessage>> {
        if !self.shared.queue_exists(project, queue) {
            return Err(StorageError::queue_missing(project, queue));
        }

        let now = current_timestamp();
        let mut active = Vec::new();
        for rank in self.shared.message_ranks(project, queue)? {
            let Some(msg) = self.shared.load_message(project, queue, rank)? else {
                continue;
            };
            if msg.is_visible(now) {
                active.push(msg.to_basic(now));
                if active.len() == limit {
                    break;
                }
            }
        }
        Ok(active)
    }
}
