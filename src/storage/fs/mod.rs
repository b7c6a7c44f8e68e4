//! Filesystem object driver.
//!
//! Each record is one JSON object on disk, laid out so a sorted directory
//! scan yields FIFO order:
//!
//! ```text
//! root/{project}/{queue}/queue.json           queue record (metadata, counter)
//! root/{project}/{queue}/msgs/{rank:020}.json message records
//! root/{project}/{queue}/ids/{message_id}     rank back-references
//! root/{project}/{queue}/claims/{id}.json     claim records
//! root/{project}/{queue}/subs/{id}.json       subscriptions
//! ```
//!
//! Objects are written to a temp name and renamed into place. A per-queue
//! lock map provides the lock-based arm of the claim-atomicity requirement;
//! operations never await while holding a lock.

mod claims;
mod messages;
mod queues;
mod subscriptions;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::message::MessageRecord;
use crate::storage::{
    ClaimController, DataDriver, MessageController, QueueController, Result, StorageError,
    SubscriptionController,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct QueueRecord {
    pub metadata: Value,
    pub created: u64,
    pub counter: u64,
}

/// Root directory plus the per-queue lock map, shared by the controllers.
pub(crate) struct Shared {
    root: PathBuf,
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl Shared {
    pub fn queue_dir(&self, project: &str, queue: &str) -> PathBuf {
        self.root.join(project).join(queue)
    }

    pub fn queue_record_path(&self, project: &str, queue: &str) -> PathBuf {
        self.queue_dir(project, queue).join("queue.json")
    }

    pub fn message_path(&self, project: &str, queue: &str, rank: u64) -> PathBuf {
        self.queue_dir(project, queue)
            .join("msgs")
            .join(format!("{rank:020}.json"))
    }

    pub fn id_path(&self, project: &str, queue: &str, id: &str) -> PathBuf {
        self.queue_dir(project, queue).join("ids").join(id)
    }

    pub fn claim_path(&self, project: &str, queue: &str, id: &str) -> PathBuf {
        self.queue_dir(project, queue)
            .join("claims")
            .join(format!("{id}.json"))
    }

    pub fn sub_path(&self, project: &str, queue: &str, id: &str) -> PathBuf {
        self.queue_dir(project, queue)
            .join("subs")
            .join(format!("{id}.json"))
    }

    pub fn lock(&self, project: &str, queue: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((project.to_string(), queue.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn queue_exists(&self, project: &str, queue: &str) -> bool {
        self.queue_record_path(project, queue).is_file()
    }

    pub fn load_queue(&self, project: &str, queue: &str) -> Result<Option<QueueRecord>> {
        read_json(&self.queue_record_path(project, queue))
    }

    pub fn load_queue_or_err(&self, project: &str, queue: &str) -> Result<QueueRecord> {
        self.load_queue(project, queue)?
            .ok_or_else(|| StorageError::queue_missing(project, queue))
    }

    pub fn store_queue(&self, project: &str, queue: &str, record: &QueueRecord) -> Result<()> {
        write_json(&self.queue_record_path(project, queue), record)
    }

    /// Message ranks in FIFO order, straight from the sorted directory.
    pub fn message_ranks(&self, project: &str, queue: &str) -> Result<Vec<u64>> {
        let dir = self.queue_dir(project, queue).join("msgs");
        sorted_stems(&dir)?
            .into_iter()
            .map(|stem| {
                stem.parse::<u64>()
                    .map_err(|_| StorageError::Internal(format!("bad message object: {stem}")))
            })
            .collect()
    }

    pub fn load_message(&self, project: &str, queue: &str, rank: u64) -> Result<Option<MessageRecord>> {
        read_json(&self.message_path(project, queue, rank))
    }

    pub fn load_message_by_id(
        &self,
        project: &str,
        queue: &str,
        id: &str,
    ) -> Result<Option<MessageRecord>> {
        let Some(rank) = self.lookup_rank(project, queue, id)? else {
            return Ok(None);
        };
        self.load_message(project, queue, rank)
    }

    pub fn lookup_rank(&self, project: &str, queue: &str, id: &str) -> Result<Option<u64>> {
        let path = self.id_path(project, queue, id);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw.trim().parse::<u64>().map_err(|_| {
                StorageError::Internal(format!("bad rank back-reference for {id}"))
            })?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn store_message(&self, project: &str, queue: &str, msg: &MessageRecord) -> Result<()> {
        write_json(&self.message_path(project, queue, msg.rank), msg)?;
        write_atomic(
            &self.id_path(project, queue, &msg.id),
            msg.rank.to_string().as_bytes(),
        )
    }

    pub fn remove_message(&self, project: &str, queue: &str, msg: &MessageRecord) -> Result<()> {
        remove_if_present(&self.message_path(project, queue, msg.rank))?;
        remove_if_present(&self.id_path(project, queue, &msg.id))
    }
}

/// Filesystem driver; `fs://<root>` URIs map here.
pub struct FsDriver {
    shared: Arc<Shared>,
}

impl FsDriver {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            shared: Arc::new(Shared {
                root: root.as_ref().to_path_buf(),
                locks: DashMap::new(),
            }),
        })
    }
}

impl DataDriver for FsDriver {
    fn queues(&self) -> Arc<dyn QueueController> {
        Arc::new(queues::FsQueueController {
            shared: Arc::clone(&self.shared),
        })
    }

    fn messages(&self) -> Arc<dyn MessageController> {
        Arc::new(messages::FsMessageController {
            shared: Arc::clone(&self.shared),
        })
    }

    fn claims(&self) -> Arc<dyn ClaimController> {
        Arc::new(claims::FsClaimController {
            shared: Arc::clone(&self.shared),
        })
    }

    fn subscriptions(&self) -> Arc<dyn SubscriptionController> {
        Arc::new(subscriptions::FsSubscriptionController {
            shared: Arc::clone(&self.shared),
        })
    }
}

pub(crate) fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, &serde_json::to_vec(value)?)
}

/// Write-then-rename so readers never observe a torn object.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::Internal(format!("object path has no parent: {path:?}")))?;
    std::fs::create_dir_all(parent)?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Sorted file stems (no extension) of a directory; empty when missing.
pub(crate) fn sorted_stems(dir: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut stems = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            stems.push(stem.to_string());
        }
    }
    stems.sort();
    Ok(stems)
}
