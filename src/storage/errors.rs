//! Typed errors surfaced by every storage driver.
//!
//! The transport maps these onto status codes: validation 400,
//! not-found → 404, not-permitted → 403, conflict → 409, transient → 503,
//! everything else → 500. `kind` helpers keep that mapping in one match.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Queue {name} does not exist for project {project}")]
    QueueDoesNotExist { project: String, name: String },

    #[error("Message {id} does not exist in queue {queue} for project {project}")]
    MessageDoesNotExist {
        project: String,
        queue: String,
        id: String,
    },

    #[error("Claim {id} does not exist in queue {queue} for project {project}")]
    ClaimDoesNotExist {
        project: String,
        queue: String,
        id: String,
    },

    #[error("Subscription {id} does not exist")]
    SubscriptionDoesNotExist { id: String },

    #[error("Flavor {name} does not exist")]
    FlavorDoesNotExist { name: String },

    #[error("Pool {name} does not exist")]
    PoolDoesNotExist { name: String },

    #[error("No pool found for queue {queue} for project {project}")]
    QueueNotMapped { project: String, queue: String },

    #[error("No pools registered")]
    NoPoolFound,

    #[error("Message {id} is claimed")]
    MessageIsClaimed { id: String },

    #[error("Message {id} is no longer claimed")]
    MessageNotClaimed { id: String },

    #[error("Message {id} is not claimed by {claim}")]
    MessageIsClaimedBy { id: String, claim: String },

    #[error("Not permitted: {reason}")]
    NotPermitted { reason: String },

    #[error(
        "Messages could not be claimed due to a conflict with another \
         parallel claim in queue {queue} for project {project}"
    )]
    ClaimConflict { project: String, queue: String },

    #[error(
        "Message could not be enqueued due to a conflict with one or more \
         other messages in queue {queue} for project {project}"
    )]
    MessageConflict { project: String, queue: String },

    #[error(
        "Such subscription already exists. Subscriptions are unique by \
         project + queue + subscriber URI."
    )]
    SubscriptionAlreadyExists,

    #[error("The database URI is in use by another pool")]
    PoolAlreadyExists,

    #[error("Pool {pool} is in use by flavor {flavor}")]
    PoolInUseByFlavor { pool: String, flavor: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Connection error: {reason}")]
    ConnectionError { reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn queue_missing(project: &str, name: &str) -> Self {
        Self::QueueDoesNotExist {
            project: project.to_string(),
            name: name.to_string(),
        }
    }

    pub fn message_missing(project: &str, queue: &str, id: &str) -> Self {
        Self::MessageDoesNotExist {
            project: project.to_string(),
            queue: queue.to_string(),
            id: id.to_string(),
        }
    }

    pub fn claim_missing(project: &str, queue: &str, id: &str) -> Self {
        Self::ClaimDoesNotExist {
            project: project.to_string(),
            queue: queue.to_string(),
            id: id.to_string(),
        }
    }

    pub fn claim_conflict(project: &str, queue: &str) -> Self {
        Self::ClaimConflict {
            project: project.to_string(),
            queue: queue.to_string(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn connection(reason: impl Into<String>) -> Self {
        Self::ConnectionError {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::QueueDoesNotExist { .. }
                | Self::MessageDoesNotExist { .. }
                | Self::ClaimDoesNotExist { .. }
                | Self::SubscriptionDoesNotExist { .. }
                | Self::FlavorDoesNotExist { .. }
                | Self::PoolDoesNotExist { .. }
                | Self::QueueNotMapped { .. }
                | Self::NoPoolFound
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::ClaimConflict { .. }
                | Self::MessageConflict { .. }
                | Self::SubscriptionAlreadyExists
                | Self::PoolAlreadyExists
                | Self::MessageIsClaimed { .. }
                | Self::MessageIsClaimedBy { .. }
                | Self::MessageNotClaimed { .. }
        )
    }

    pub fn is_not_permitted(&self) -> bool {
        matches!(
            self,
            Self::NotPermitted { .. } | Self::PoolInUseByFlavor { .. }
        )
    }

    /// Transient failures, eligible for backoff-and-retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionError { .. })
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::connection(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("record encoding: {err}"))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::connection(err.to_string()),
            sqlx::Error::Database(db) => {
                let msg = db.message().to_lowercase();
                if msg.contains("locked") || msg.contains("busy") {
                    Self::connection(err.to_string())
                } else {
                    Self::Internal(err.to_string())
                }
            }
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        Self::Internal(err.to_string())
    }
}
