use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable};

use super::{
    decode, encode, prefix_bounds, rank_key, scope, scoped, QueueEntry, CLAIMS, MESSAGES,
    MESSAGE_INDEX, QUEUES,
};
use crate::core::claim::ClaimRecord;
use crate::core::current_timestamp;
use crate::core::message::{ListFilters, MessageRecord, NewMessage, QueueMessage};
use crate::storage::{
    parse_marker, ListOptions, MessageAge, MessageController, Page, Result, SortOrder,
    StorageError,
};

pub(super) struct RedbMessageController {
    pub db: Arc<Database>,
}

/// Resolves the message's live claim id, if any.
fn live_owner(msg: &MessageRecord, now: u64) -> Option<&str> {
    msg.claim_id.as_deref().filter(|_| msg.is_claimed(now))
}

#[async_trait]
impl MessageController for RedbMessageController {
    async fn post(
        &self,
        project: &str,
        queue: &str,
        messages: Vec<NewMessage>,
        client_uuid: &str,
    ) -> Result<Vec<String>> {
        let scope_key = scope(project, queue);
        let now = current_timestamp();

        let tx = self.db.begin_write()?;
        let ids = {
            let mut queues = tx.open_table(QUEUES)?;
            let mut entry: QueueEntry = match queues.get(scope_key.as_str())? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StorageError::queue_missing(project, queue)),
            };

            let mut table = tx.open_table(MESSAGES)?;
            let mut index = tx.open_table(MESSAGE_INDEX)?;

            let mut ids = Vec::with_capacity(messages.len());
            for message in messages {
                entry.counter += 1;
                let record =
                    MessageRecord::new(entry.counter, message.ttl, message.body, client_uuid, now);
                table.insert(
                    rank_key(&scope_key, record.rank).as_str(),
                    encode(&record)?.as_slice(),
                )?;
                index.insert(scoped(&scope_key, &record.id).as_str(), record.rank)?;
                ids.push(record.id);
            }

            queues.insert(scope_key.as_str(), encode(&entry)?.as_slice())?;
            ids
        };
        tx.commit()?;
        Ok(ids)
    }

    async fn get(&self, project: &str, queue: &str, message_id: &str) -> Result<QueueMessage> {
        let scope_key = scope(project, queue);
        let now = current_timestamp();

        let tx = self.db.begin_read()?;
        let index = tx.open_table(MESSAGE_INDEX)?;
        let table = tx.open_table(MESSAGES)?;

        let missing = || StorageError::message_missing(project, queue, message_id);
        let rank = index
            .get(scoped(&scope_key, message_id).as_str())?
            .map(|guard| guard.value())
            .ok_or_else(missing)?;
        let msg: MessageRecord = match table.get(rank_key(&scope_key, rank).as_str())? {
            Some(guard) => decode(guard.value())?,
            None => return Err(missing()),
        };

        if msg.is_expired(now) {
            return Err(missing());
        }
        Ok(msg.to_basic(now))
    }

    async fn bulk_get(
        &self,
        project: &str,
        queue: &str,
        message_ids: &[String],
    ) -> Result<Vec<QueueMessage>> {
        let scope_key = scope(project, queue);
        let now = current_timestamp();

        let tx = self.db.begin_read()?;
        let index = tx.open_table(MESSAGE_INDEX)?;
        let table = tx.open_table(MESSAGES)?;

        let mut found = Vec::new();
        for id in message_ids {
            let Some(rank) = index.get(scoped(&scope_key, id).as_str())? else {
                continue;
            };
            if let Some(guard) = table.get(rank_key(&scope_key, rank.value()).as_str())? {
                let msg: MessageRecord = decode(guard.value())?;
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
        let scope_key = scope(project, queue);
        let marker = parse_marker(opts.marker.as_deref())?;
        let now = current_timestamp();

        let tx = self.db.begin_read()?;
        if tx.open_table(QUEUES)?.get(scope_key.as_str())?.is_none() {
            return Err(StorageError::queue_missing(project, queue));
        }
        let table = tx.open_table(MESSAGES)?;

        let filters = ListFilters {
            now,
            echo: opts.echo,
            include_claimed: opts.include_claimed,
            client_uuid: opts.client_uuid.clone(),
        };

        let start = rank_key(&scope_key, marker.map(|rank| rank + 1).unwrap_or(0));
        let (_, end) = prefix_bounds(&scope_key);

        let mut items = Vec::new();
        let mut last_rank = None;
        for entry in table.range::<&str>(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            let msg: MessageRecord = decode(value.value())?;
            if !filters.admits(&msg) {
                continue;
            }

            last_rank = Some(msg.rank);
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
        let scope_key = scope(project, queue);
        let now = current_timestamp();

        let tx = self.db.begin_write()?;
        {
            if tx.open_table(QUEUES)?.get(scope_key.as_str())?.is_none() {
                return Ok(());
            }

            let mut index = tx.open_table(MESSAGE_INDEX)?;
            let mut table = tx.open_table(MESSAGES)?;
            let mut claims = tx.open_table(CLAIMS)?;

            let index_key = scoped(&scope_key, message_id);
            let Some(rank) = index.get(index_key.as_str())?.map(|guard| guard.value()) else {
                // Essentially "already" deleted.
                return Ok(());
            };
            let message_key = rank_key(&scope_key, rank);
            let msg: MessageRecord = match table.get(message_key.as_str())? {
                Some(guard) => decode(guard.value())?,
                None => return Ok(()),
            };

            let owner = live_owner(&msg, now);
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
                    let requested_live = match claims.get(scoped(&scope_key, requested).as_str())? {
                        Some(guard) => {
                            let record: ClaimRecord = decode(guard.value())?;
                            record.is_live(now)
                        }
                        None => false,
                    };
                    if requested_live {
                        return Err(StorageError::MessageIsClaimedBy {
                            id: message_id.to_string(),
                            claim: requested.to_string(),
                        });
                    }
                    return Err(StorageError::claim_missing(project, queue, requested));
                }
                _ => {}
            }

            table.remove(message_key.as_str())?;
            index.remove(index_key.as_str())?;

            // Unlink from the owning claim so claim gets stop reporting it.
            if let Some(owner) = owner.map(str::to_string) {
                let claim_key = scoped(&scope_key, &owner);
                let record: Option<ClaimRecord> = match claims.get(claim_key.as_str())? {
                    Some(guard) => Some(decode(guard.value())?),
                    None => None,
                };
                if let Some(mut record) = record {
                    record.message_ids.retain(|mid| mid != message_id);
                    claims.insert(claim_key.as_str(), encode(&record)?.as_slice())?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn bulk_delete(
        &self,
        project: &str,
        queue: &str,
        message_ids: &[String],
        claim_ids: Option<&[String]>,
    ) -> Result<()> {
        let scope_key = scope(project, queue);
        let now = current_timestamp();

        let tx = self.db.begin_write()?;
        {
            if tx.open_table(QUEUES)?.get(scope_key.as_str())?.is_none() {
                return Ok(());
            }

            let mut index = tx.open_table(MESSAGE_INDEX)?;
            let mut table = tx.open_table(MESSAGES)?;

            for id in message_ids {
                let index_key = scoped(&scope_key, id);
                let Some(rank) = index.get(index_key.as_str())?.map(|guard| guard.value())
                else {
                    continue;
                };
                let message_key = rank_key(&scope_key, rank);
                let msg: MessageRecord = match table.get(message_key.as_str())? {
                    Some(guard) => decode(guard.value())?,
                    None => continue,
                };

                if let Some(claim_ids) = claim_ids {
                    match live_owner(&msg, now) {
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

                table.remove(message_key.as_str())?;
                index.remove(index_key.as_str())?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn first(
        &self,
        project: &str,
        queue: &str,
        sort: SortOrder,
    ) -> Result<Option<MessageAge>> {
        let scope_key = scope(project, queue);
        let now = current_timestamp();

        let tx = self.db.begin_read()?;
        if tx.open_table(QUEUES)?.get(scope_key.as_str())?.is_none() {
            return Err(StorageError::queue_missing(project, queue));
        }
        let table = tx.open_table(MESSAGES)?;
        let (start, end) = prefix_bounds(&scope_key);

        let range = table.range::<&str>(start.as_str()..end.as_str())?;
        let mut bounding = None;

        match sort {
            SortOrder::Oldest => {
                for entry in range {
                    let (_, value) = entry?;
                    let msg: MessageRecord = decode(value.value())?;
                    if !msg.is_expired(now) {
                        bounding = Some(msg);
                        break;
                    }
                }
            }
            SortOrder::Newest => {
                for entry in range.rev() {
                    let (_, value) = entry?;
                    let msg: MessageRecord = decode(value.value())?;
                    if !msg.is_expired(now) {
                        bounding = Some(msg);
                        break;
                    }
                }
            }
        }

        Ok(bounding.map(|msg| MessageAge {
            id: msg.id,
            age: now.saturating_sub(msg.created),
            created: msg.created,
        }))
    }

    async fn pop(&self, project: &str, queue: &str, limit: usize) -> Result<Vec<QueueMessage>> {
        let scope_key = scope(project, queue);
        let now = current_timestamp();

        let tx = self.db.begin_write()?;
        let popped = {
            if tx.open_table(QUEUES)?.get(scope_key.as_str())?.is_none() {
                return Err(StorageError::queue_missing(project, queue));
            }

            let mut table = tx.open_table(MESSAGES)?;
            let mut index = tx.open_table(MESSAGE_INDEX)?;
            let (start, end) = prefix_bounds(&scope_key);

            // Claim-and-delete in one transaction.
            let mut victims = Vec::new();
            for entry in table.range::<&str>(start.as_str()..end.as_str())? {
                let (_, value) = entry?;
                let msg: MessageRecord = decode(value.value())?;
                if msg.is_visible(now) {
                    victims.push(msg);
                    if victims.len() == limit {
                        break;
                    }
                }
            }

            let mut popped = Vec::with_capacity(victims.len());
            for msg in victims {
                table.remove(rank_key(&scope_key, msg.rank).as_str())?;
                index.remove(scoped(&scope_key, &msg.id).as_str())?;
                popped.push(msg.to_basic(now));
            }
            popped
        };
        tx.commit()?;
        Ok(popped)
    }

    async fn active(&self, project: &str, queue: &str, limit: usize) -> Result<Vec<QueueMessage>> {
        let scope_key = scope(project, queue);
        let now = current_timestamp();

        let tx = self.db.begin_read()?;
        if tx.open_table(QUEUES)?.get(scope_key.as_str())?.is_none() {
            return Err(StorageError::queue_missing(project, queue));
        }
        let table = tx.open_table(MESSAGES)?;
        let (start, end) = prefix_bounds(&scope_key);

        let mut active = Vec::new();
        for entry in table.range::<&str>(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            let msg: MessageRecord = decode(value.value())?;
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
