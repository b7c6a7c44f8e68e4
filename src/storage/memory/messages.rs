use std::sync::Arc;

use async_trait::async_trait;

use super::{QueueState, Store};
use crate::core::current_timestamp;
use crate::core::message::{ListFilters, MessageRecord, NewMessage, QueueMessage};
use crate::storage::{
    parse_marker, ListOptions, MessageAge, MessageController, Page, Result, SortOrder,
    StorageError,
};

pub(super) struct MemoryMessageController {
    pub store: Arc<Store>,
}

/// Applies the conditional-delete authorization matrix.
///
/// Shared with the other lock-based driver; the transactional backends
/// express the same matrix in their own query shape.
pub(crate) fn check_delete_claim(
    state: &QueueState,
    project: &str,
    queue: &str,
    msg: &MessageRecord,
    claim: Option<&str>,
    now: u64,
) -> Result<()> {
    let live_claim_id = msg.claim_id.as_deref().filter(|_| msg.is_claimed(now));

    match (claim, live_claim_id) {
        // Unconditional delete of a claimed message is not allowed.
        (None, Some(_)) => Err(StorageError::MessageIsClaimed {
            id: msg.id.clone(),
        }),
        (None, None) => Ok(()),
        // The old holder keeps failing here once the claim lapses: the
        // grace window only extends the message lifetime, not the lease.
        (Some(_), None) => Err(StorageError::MessageNotClaimed {
            id: msg.id.clone(),
        }),
        (Some(requested), Some(owner)) if requested != owner => {
            if state.live_claim(requested, now).is_none() {
                Err(StorageError::claim_missing(project, queue, requested))
            } else {
                Err(StorageError::MessageIsClaimedBy {
                    id: msg.id.clone(),
                    claim: requested.to_string(),
                })
            }
        }
        (Some(_), Some(_)) => Ok(()),
    }
}

#[async_trait]
impl MessageController for MemoryMessageController {
    async fn post(
        &self,
        project: &str,
        queue: &str,
        messages: Vec<NewMessage>,
        client_uuid: &str,
    ) -> Result<Vec<String>> {
        let state = self.store.queue_or_err(project, queue)?;
        let mut guard = state.write();
        let now = current_timestamp();
        guard.purge_expired(now);

        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            let rank = guard.next_rank();
            let record = MessageRecord::new(rank, message.ttl, message.body, client_uuid, now);
            ids.push(record.id.clone());
            guard.insert_message(record);
        }

        Ok(ids)
    }

    async fn get(&self, project: &str, queue: &str, message_id: &str) -> Result<QueueMessage> {
        let state = self.store.queue_or_err(project, queue)?;
        let guard = state.read();
        let now = current_timestamp();

        guard
            .message(message_id)
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
        let state = self.store.queue_or_err(project, queue)?;
        let guard = state.read();
        let now = current_timestamp();

        Ok(message_ids
            .iter()
            .filter_map(|id| guard.message(id))
            .filter(|msg| !msg.is_expired(now))
            .map(|msg| msg.to_basic(now))
            .collect())
    }

    async fn list(
        &self,
        project: &str,
        queue: &str,
        opts: &ListOptions,
    ) -> Result<Page<QueueMessage>> {
        let state = self.store.queue_or_err(project, queue)?;
        let marker = parse_marker(opts.marker.as_deref())?;
        let guard = state.read();
        let now = current_timestamp();

        let filters = ListFilters {
            now,
            echo: opts.echo,
            include_claimed: opts.include_claimed,
            client_uuid: opts.client_uuid.clone(),
        };

        let start = marker.map(|rank| rank + 1).unwrap_or(0);
        let mut items = Vec::new();
        let mut last_rank = None;

        for (rank, msg) in guard.messages.range(start..) {
            if !filters.admits(msg) {
                continue;
            }

            items.push(msg.to_basic(now));
            last_rank = Some(*rank);
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
        let Some(state) = self.store.queue(project, queue) else {
            return Ok(());
        };
        let mut guard = state.write();
        let now = current_timestamp();

        let Some(msg) = guard.message(message_id) else {
            // Already gone, which is what the caller wanted.
            return Ok(());
        };

        check_delete_claim(&guard, project, queue, msg, claim, now)?;

        guard.remove_message(message_id);
        Ok(())
    }

    async fn bulk_delete(
        &self,
        project: &str,
        queue: &str,
        message_ids: &[String],
        claim_ids: Option<&[String]>,
    ) -> Result<()> {
        let Some(state) = self.store.queue(project, queue) else {
            return Ok(());
        };
        let mut guard = state.write();
        let now = current_timestamp();

        for id in message_ids {
            let Some(msg) = guard.message(id) else {
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

            guard.remove_message(id);
        }

        Ok(())
    }

    async fn first(
        &self,
        project: &str,
        queue: &str,
        sort: SortOrder,
    ) -> Result<Option<MessageAge>> {
        let state = self.store.queue_or_err(project, queue)?;
        let guard = state.read();
        let now = current_timestamp();

        let mut unexpired = guard.messages.values().filter(|msg| !msg.is_expired(now));
        let bounding = match sort {
            SortOrder::Oldest => unexpired.next(),
            SortOrder::Newest => unexpired.last(),
        };

        Ok(bounding.map(|msg| MessageAge {
            id: msg.id.clone(),
            age: now.saturating_sub(msg.created),
            created: msg.created,
        }))
    }

    async fn pop(&self, project: &str, queue: &str, limit: usize) -> Result<Vec<QueueMessage>> {
        let state = self.store.queue_or_err(project, queue)?;
        let mut guard = state.write();
        let now = current_timestamp();

        // Claim-and-delete collapses into one pass under the queue lock.
        let victims: Vec<String> = guard
            .messages
            .values()
            .filter(|msg| msg.is_visible(now))
            .take(limit)
            .map(|msg| msg.id.clone())
            .collect();

        let mut popped = Vec::with_capacity(victims.len());
        for id in victims {
            if let Some(msg) = guard.remove_message(&id) {
                popped.push(msg.to_basic(now));
            }
        }

        Ok(popped)
    }

    async fn active(&self, project: &str, queue: &str, limit: usize) -> Result<Vec<QueueMessage>> {
        let state = self.store.queue_or_err(project, queue)?;
        let guard = state.read();
        let now = current_timestamp();

        Ok(guard
            .messages
            .values()
            .filter(|msg| msg.is_visible(now))
            .take(limit)
            .map(|msg| msg.to_basic(now))
            .collect())
    }
}
