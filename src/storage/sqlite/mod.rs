//! Relational driver over sqlx (SQLite).
//!
//! The schema is bootstrapped at connect time. A single pooled connection
//! serializes writers, so every multi-statement operation runs inside one
//! transaction and the claim procedure is linearizable per queue. SQLITE
//! busy/locked conditions surface as transient `ConnectionError`s and feed
//! the claim-create retry budget.
//!
//! This driver also implements the control plane (catalogue, pools,
//! flavors), which persists sharding state across restarts.

mod claims;
mod control;
mod messages;
mod queues;
mod subscriptions;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::core::message::MessageRecord;
use crate::storage::utils::StorageTuning;
use crate::storage::{
    CatalogueController, ClaimController, ControlDriver, DataDriver, FlavorsController,
    MessageController, PoolsController, QueueController, Result, StorageError,
    SubscriptionController,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queues (
    project  TEXT    NOT NULL,
    name     TEXT    NOT NULL,
    metadata TEXT    NOT NULL,
    created  INTEGER NOT NULL,
    counter  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (project, name)
);

CREATE TABLE IF NOT EXISTS messages (
    project       TEXT    NOT NULL,
    queue         TEXT    NOT NULL,
    rank          INTEGER NOT NULL,
    id            TEXT    NOT NULL,
    ttl           INTEGER NOT NULL,
    created       INTEGER NOT NULL,
    expires       INTEGER NOT NULL,
    body          TEXT    NOT NULL,
    client        TEXT    NOT NULL,
    claim_id      TEXT,
    claim_expires INTEGER NOT NULL DEFAULT 0,
    claim_count   INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (project, queue, rank)
);

CREATE UNIQUE INDEX IF NOT EXISTS messages_by_id
    ON messages (project, queue, id);

CREATE TABLE IF NOT EXISTS claims (
    project TEXT    NOT NULL,
    queue   TEXT    NOT NULL,
    id      TEXT    NOT NULL,
    ttl     INTEGER NOT NULL,
    grace   INTEGER NOT NULL,
    created INTEGER NOT NULL,
    expires INTEGER NOT NULL,
    PRIMARY KEY (project, queue, id)
);

CREATE INDEX IF NOT EXISTS claims_by_expiry
    ON claims (project, queue, expires);

CREATE TABLE IF NOT EXISTS subscriptions (
    project    TEXT    NOT NULL,
    queue      TEXT    NOT NULL,
    id         TEXT    NOT NULL,
    subscriber TEXT    NOT NULL,
    ttl        INTEGER NOT NULL,
    expires    INTEGER NOT NULL,
    options    TEXT    NOT NULL,
    confirmed  INTEGER NOT NULL,
    PRIMARY KEY (project, queue, id)
);

CREATE UNIQUE INDEX IF NOT EXISTS subscriptions_by_uri
    ON subscriptions (project, queue, subscriber);

CREATE TABLE IF NOT EXISTS catalogue (
    project TEXT NOT NULL,
    queue   TEXT NOT NULL,
    pool    TEXT NOT NULL,
    PRIMARY KEY (project, queue)
);

CREATE TABLE IF NOT EXISTS pools (
    name    TEXT PRIMARY KEY,
    uri     TEXT NOT NULL UNIQUE,
    weight  INTEGER NOT NULL,
    flavor  TEXT,
    options TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS flavors (
    project      TEXT NOT NULL,
    name         TEXT NOT NULL,
    capabilities TEXT NOT NULL,
    PRIMARY KEY (project, name)
);
"#;

/// Relational driver; data and control planes share one pool.
pub struct SqliteDriver {
    pool: SqlitePool,
    tuning: StorageTuning,
}

impl SqliteDriver {
    /// Connects to `uri` (e.g. `sqlite:zaqar.db` or `sqlite::memory:`) and
    /// bootstraps the schema.
    pub async fn connect(uri: &str) -> Result<Self> {
        Self::connect_with(uri, StorageTuning::default()).await
    }

    pub async fn connect_with(uri: &str, tuning: StorageTuning) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(uri)
            .map_err(|err| StorageError::invalid(format!("bad sqlite uri {uri:?}: {err}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        // One connection keeps `:memory:` databases coherent and makes
        // writers queue instead of tripping over SQLITE_BUSY.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool, tuning })
    }
}

impl DataDriver for SqliteDriver {
    fn queues(&self) -> Arc<dyn QueueController> {
        Arc::new(queues::SqliteQueueController {
            pool: self.pool.clone(),
        })
    }

    fn messages(&self) -> Arc<dyn MessageController> {
        Arc::new(messages::SqliteMessageController {
            pool: self.pool.clone(),
        })
    }

    fn claims(&self) -> Arc<dyn ClaimController> {
        Arc::new(claims::SqliteClaimController {
            pool: self.pool.clone(),
            claim_retry_budget: self.tuning.claim_retry_budget,
        })
    }

    fn subscriptions(&self) -> Arc<dyn SubscriptionController> {
        Arc::new(subscriptions::SqliteSubscriptionController {
            pool: self.pool.clone(),
        })
    }
}

impl ControlDriver for SqliteDriver {
    fn catalogue(&self) -> Arc<dyn CatalogueController> {
        Arc::new(control::SqliteCatalogueController {
            pool: self.pool.clone(),
        })
    }

    fn pools(&self) -> Arc<dyn PoolsController> {
        Arc::new(control::SqlitePoolsController {
            pool: self.pool.clone(),
        })
    }

    fn flavors(&self) -> Arc<dyn FlavorsController> {
        Arc::new(control::SqliteFlavorsController {
            pool: self.pool.clone(),
        })
    }
}

/// Decodes a `messages` row.
pub(crate) fn row_to_message(row: &SqliteRow) -> Result<MessageRecord> {
    let body: String = row.try_get("body")?;
    let body: Value = serde_json::from_str(&body)?;

    Ok(MessageRecord {
        id: row.try_get("id")?,
        rank: row.try_get::<i64, _>("rank")? as u64,
        ttl: row.try_get::<i64, _>("ttl")? as u64,
        created: row.try_get::<i64, _>("created")? as u64,
        expires: row.try_get::<i64, _>("expires")? as u64,
        body,
        client_uuid: row.try_get("client")?,
        claim_id: row.try_get("claim_id")?,
        claim_expires: row.try_get::<i64, _>("claim_expires")? as u64,
        claim_count: row.try_get::<i64, _>("claim_count")? as u64,
    })
}

/// Writes the mutable claim-related message columns back.
pub(crate) async fn store_message_stamp<'e, E>(
    executor: E,
    project: &str,
    queue: &str,
    msg: &MessageRecord,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "UPDATE messages
            SET ttl = ?, expires = ?, claim_id = ?, claim_expires = ?, claim_count = ?
          WHERE project = ? AND queue = ? AND id = ?",
    )
    .bind(msg.ttl as i64)
    .bind(msg.expires as i64)
    .bind(&msg.claim_id)
    .bind(msg.claim_expires as i64)
    .bind(msg.claim_count as i64)
    .bind(project)
    .bind(queue)
    .bind(&msg.id)
    .execute(executor)
    .await?;
    Ok(())
}
