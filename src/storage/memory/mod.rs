//! In-process document driver.
//!
//! Every queue owns one document: metadata, a rank-ordered message map, the
//! claim table and its expiry index, and the queue's subscriptions. The
//! document sits behind a `parking_lot` RwLock inside a `DashMap`, which
//! makes every mutating operation naturally linearizable per queue.
//!
//! This driver doubles as the default control store (catalogue, pools,
//! flavors kept in process).

mod claims;
mod control;
mod messages;
mod queues;
mod subscriptions;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::core::claim::ClaimRecord;
use crate::core::message::MessageRecord;
use crate::storage::{
    CatalogueController, ClaimController, ControlDriver, DataDriver, FlavorsController,
    MessageController, PoolsController, QueueController, Result, StorageError, Subscription,
    SubscriptionController,
};

pub use control::MemoryControlStore;

/// One queue's document.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub metadata: Value,
    pub created: u64,
    /// FIFO rank counter; the next message gets `counter + 1`.
    pub counter: u64,
    pub messages: BTreeMap<u64, MessageRecord>,
    pub by_id: HashMap<String, u64>,
    pub claims: HashMap<String, ClaimRecord>,
    /// (expires, claim id) pairs, kept sorted for the gc sweep.
    pub claim_expiry: BTreeSet<(u64, String)>,
    pub subscriptions: BTreeMap<String, Subscription>,
    pub by_subscriber: HashMap<String, String>,
}

impl QueueState {
    pub fn new(metadata: Value, now: u64) -> Self {
        Self {
            metadata,
            created: now,
            ..Default::default()
        }
    }

    pub fn next_rank(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    pub fn insert_message(&mut self, msg: MessageRecord) {
        self.by_id.insert(msg.id.clone(), msg.rank);
        self.messages.insert(msg.rank, msg);
    }

    pub fn message(&self, id: &str) -> Option<&MessageRecord> {
        self.by_id.get(id).and_then(|rank| self.messages.get(rank))
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut MessageRecord> {
        let rank = *self.by_id.get(id)?;
        self.messages.get_mut(&rank)
    }

    /// Removes a message and unlinks it from its claim record, if any.
    pub fn remove_message(&mut self, id: &str) -> Option<MessageRecord> {
        let rank = self.by_id.remove(id)?;
        let msg = self.messages.remove(&rank)?;

        if let Some(claim_id) = &msg.claim_id {
            if let Some(claim) = self.claims.get_mut(claim_id) {
                claim.message_ids.retain(|mid| mid != id);
            }
        }

        Some(msg)
    }

    /// Drops messages whose own TTL has elapsed. Claims lapse implicitly
    /// through the visibility predicate and are reaped by `gc`.
    pub fn purge_expired(&mut self, now: u64) {
        let expired: Vec<String> = self
            .messages
            .values()
            .filter(|msg| msg.is_expired(now))
            .map(|msg| msg.id.clone())
            .collect();

        for id in expired {
            self.remove_message(&id);
        }
    }

    /// A claim is addressable only while it is live.
    pub fn live_claim(&self, claim_id: &str, now: u64) -> Option<&ClaimRecord> {
        self.claims.get(claim_id).filter(|claim| claim.is_live(now))
    }
}

/// Shared state behind all of the driver's controllers.
#[derive(Debug, Default)]
pub(crate) struct Store {
    queues: DashMap<(String, String), Arc<RwLock<QueueState>>>,
}

impl Store {
    pub fn key(project: &str, name: &str) -> (String, String) {
        (project.to_string(), name.to_string())
    }

    pub fn queue(&self, project: &str, name: &str) -> Option<Arc<RwLock<QueueState>>> {
        self.queues
            .get(&Self::key(project, name))
            .map(|entry| Arc::clone(&entry))
    }

    pub fn queue_or_err(&self, project: &str, name: &str) -> Result<Arc<RwLock<QueueState>>> {
        self.queue(project, name)
            .ok_or_else(|| StorageError::queue_missing(project, name))
    }

    /// Inserts the queue if absent; returns true iff newly created.
    pub fn create_queue(&self, project: &str, name: &str, metadata: Value, now: u64) -> bool {
        let mut created = false;
        self.queues
            .entry(Self::key(project, name))
            .or_insert_with(|| {
                created = true;
                Arc::new(RwLock::new(QueueState::new(metadata, now)))
            });
        created
    }

    pub fn drop_queue(&self, project: &str, name: &str) {
        self.queues.remove(&Self::key(project, name));
    }

    pub fn queue_names(&self, project: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .queues
            .iter()
            .filter(|entry| entry.key().0 == project)
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();
        names
    }
}

/// In-process driver handing out document-map controllers.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    store: Arc<Store>,
    control: Arc<MemoryControlStore>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataDriver for MemoryDriver {
    fn queues(&self) -> Arc<dyn QueueController> {
        Arc::new(queues::MemoryQueueController {
            store: Arc::clone(&self.store),
        })
    }

    fn messages(&self) -> Arc<dyn MessageController> {
        Arc::new(messages::MemoryMessageController {
            store: Arc::clone(&self.store),
        })
    }

    fn claims(&self) -> Arc<dyn ClaimController> {
        Arc::new(claims::MemoryClaimController {
            store: Arc::clone(&self.store),
        })
    }

    fn subscriptions(&self) -> Arc<dyn SubscriptionController> {
        Arc::new(subscriptions::MemorySubscriptionController {
            store: Arc::clone(&self.store),
        })
    }
}

impl ControlDriver for MemoryDriver {
    fn catalogue(&self) -> Arc<dyn CatalogueController> {
        Arc::new(control::MemoryCatalogueController {
            store: Arc::clone(&self.control),
        })
    }

    fn pools(&self) -> Arc<dyn PoolsController> {
        Arc::new(control::MemoryPoolsController {
            store: Arc::clone(&self.control),
        })
    }

    fn flavors(&self) -> Arc<dyn FlavorsController> {
        Arc::new(control::MemoryFlavorsController {
            store: Arc::clone(&self.control),
        })
    }
}
