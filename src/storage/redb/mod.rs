//! Embedded key-value driver backed by redb.
//!
//! Layout translates the sorted-set shape of the KV original into ordered
//! key ranges. All keys are scoped `project/queue/...`; ranks and expiry
//! timestamps are zero-padded so lexicographic order is numeric order:
//!
//! | Table              | Key                              | Value            |
//! |--------------------|----------------------------------|------------------|
//! | `queues`           | `project/queue`                  | `QueueEntry`     |
//! | `messages`         | `project/queue/{rank:020}`       | `MessageRecord`  |
//! | `message_index`    | `project/queue/{message_id}`     | rank             |
//! | `claims`           | `project/queue/{claim_id}`       | `ClaimRecord`    |
//! | `claim_expiry`     | `project/queue/{expires:020}/{claim_id}` | `[]`     |
//! | `subscriptions`    | `project/queue/{subscription_id}`| `Subscription`   |
//! | `subscriber_index` | `project/queue/{subscriber}`     | subscription id  |
//!
//! Every mutating operation is one write transaction, which redb serializes;
//! that is the transactional arm of the claim-atomicity requirement.

mod claims;
mod messages;
mod queues;
mod subscriptions;

use std::path::Path;
use std::sync::Arc;

use redb::{Database, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::{
    ClaimController, DataDriver, MessageController, QueueController, Result, StorageError,
    SubscriptionController,
};

pub(crate) const QUEUES: TableDefinition<&str, &[u8]> = TableDefinition::new("queues");
pub(crate) const MESSAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("messages");
pub(crate) const MESSAGE_INDEX: TableDefinition<&str, u64> = TableDefinition::new("message_index");
pub(crate) const CLAIMS: TableDefinition<&str, &[u8]> = TableDefinition::new("claims");
pub(crate) const CLAIM_EXPIRY: TableDefinition<&str, &[u8]> = TableDefinition::new("claim_expiry");
pub(crate) const SUBSCRIPTIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("subscriptions");
pub(crate) const SUBSCRIBER_INDEX: TableDefinition<&str, &[u8]> =
    TableDefinition::new("subscriber_index");

/// Queue record; the rank counter lives here so posts bump it in the same
/// transaction that writes the messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct QueueEntry {
    pub metadata: Value,
    pub created: u64,
    pub counter: u64,
}

pub(crate) fn scope(project: &str, queue: &str) -> String {
    format!("{project}/{queue}")
}

pub(crate) fn scoped(scope: &str, suffix: &str) -> String {
    format!("{scope}/{suffix}")
}

pub(crate) fn rank_key(scope: &str, rank: u64) -> String {
    format!("{scope}/{rank:020}")
}

pub(crate) fn expiry_key(scope: &str, expires: u64, claim_id: &str) -> String {
    format!("{scope}/{expires:020}/{claim_id}")
}

/// `(start, end)` bounds covering every key under `prefix/`.
///
/// `'0'` is the successor of `'/'` in ASCII, so `prefix + "0"` sorts after
/// every scoped key.
pub(crate) fn prefix_bounds(prefix: &str) -> (String, String) {
    (format!("{prefix}/"), format!("{prefix}0"))
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(Into::into)
}

pub(crate) fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(Into::into)
}

/// Embedded ACID KV driver.
pub struct RedbDriver {
    db: Arc<Database>,
}

impl RedbDriver {
    /// Opens (or creates) the database file and makes sure every table
    /// exists, so read transactions never trip over a missing table.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path)
            .map_err(|err| StorageError::connection(err.to_string()))?;

        let init = db.begin_write()?;
        {
            init.open_table(QUEUES)?;
            init.open_table(MESSAGES)?;
            init.open_table(MESSAGE_INDEX)?;
            init.open_table(CLAIMS)?;
            init.open_table(CLAIM_EXPIRY)?;
            init.open_table(SUBSCRIPTIONS)?;
            init.open_table(SUBSCRIBER_INDEX)?;
        }
        init.commit()?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl DataDriver for RedbDriver {
    fn queues(&self) -> Arc<dyn QueueController> {
        Arc::new(queues::RedbQueueController {
            db: Arc::clone(&self.db),
        })
    }

    fn messages(&self) -> Arc<dyn MessageController> {
        Arc::new(messages::RedbMessageController {
            db: Arc::clone(&self.db),
        })
    }

    fn claims(&self) -> Arc<dyn ClaimController> {
        Arc::new(claims::RedbClaimController {
            db: Arc::clone(&self.db),
        })
    }

    fn subscriptions(&self) -> Arc<dyn SubscriptionController> {
        Arc::new(subscriptions::RedbSubscriptionController {
            db: Arc::clone(&self.db),
        })
    }
}

/// Collects every key under `prefix/` in `table`.
pub(crate) fn keys_with_prefix<V: redb::Value + 'static>(
    table: &impl redb::ReadableTable<&'static str, V>,
    prefix: &str,
) -> Result<Vec<String>> {
    let (start, end) = prefix_bounds(prefix);
    let mut keys = Vec::new();
    for entry in table.range::<&str>(start.as_str()..end.as_str())? {
        let (key, _) = entry?;
        keys.push(key.value().to_string());
    }
    Ok(keys)
}
