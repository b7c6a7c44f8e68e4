//! Driver loading, the per-URI driver registry, and retry helpers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::storage::{self, ControlDriver, DataDriver, Result, StorageError};

/// Policy for retrying transient (`ConnectionError`) failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Driver tuning derived from `[storage]` configuration.
#[derive(Debug, Clone, Copy)]
pub struct StorageTuning {
    /// Budget for the claim-create retry loop.
    pub claim_retry_budget: Duration,
    /// Policy for transient backend failures.
    pub reconnect: RetryPolicy,
}

impl Default for StorageTuning {
    fn default() -> Self {
        Self {
            claim_retry_budget: Duration::from_secs(10),
            reconnect: RetryPolicy::default(),
        }
    }
}

impl From<&StorageConfig> for StorageTuning {
    fn from(conf: &StorageConfig) -> Self {
        Self {
            claim_retry_budget: Duration::from_secs(conf.claim_retry_budget_secs),
            reconnect: RetryPolicy::new(
                conf.max_reconnect_attempts,
                Duration::from_millis(conf.reconnect_backoff_ms),
            ),
        }
    }
}

/// Runs `op` until it succeeds, fails non-transiently, or the attempt
/// budget runs out. Backoff doubles per attempt.
pub async fn retry_transient<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.backoff;
    let mut attempt = 0;

    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                attempt += 1;
                warn!(
                    "transient failure in {} (attempt {}/{}): {}",
                    label, attempt, policy.max_attempts, err
                );
                sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            other => return other,
        }
    }
}

/// The bounded watch-and-retry loop wrapped around claim creation.
///
/// Transient contention is retried until `budget` elapses (the deadline is
/// checked every iteration, keeping the loop promptly cancellable); after
/// that the caller sees `ClaimConflict`.
pub async fn retry_claim<T, F, Fut>(
    budget: Duration,
    project: &str,
    queue: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + budget;
    let mut backoff = Duration::from_millis(10);

    loop {
        match op().await {
            Err(err) if err.is_transient() => {
                if Instant::now() + backoff >= deadline {
                    debug!("claim retry budget exhausted for {project}/{queue}: {err}");
                    return Err(StorageError::claim_conflict(project, queue));
                }
                sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_millis(500));
            }
            other => return other,
        }
    }
}

/// Opens a data driver for `uri`, dispatching on the scheme.
pub async fn open_data_driver(uri: &str, tuning: StorageTuning) -> Result<Arc<dyn DataDriver>> {
    if uri.starts_with("memory:") {
        Ok(Arc::new(storage::memory::MemoryDriver::new()))
    } else if let Some(path) = uri.strip_prefix("redb://") {
        Ok(Arc::new(storage::redb::RedbDriver::open(path)?))
    } else if let Some(path) = uri.strip_prefix("fs://") {
        Ok(Arc::new(storage::fs::FsDriver::open(path)?))
    } else if uri.starts_with("sqlite:") {
        let driver = retry_transient(tuning.reconnect, "sqlite connect", || {
            storage::sqlite::SqliteDriver::connect_with(uri, tuning)
        })
        .await?;
        Ok(Arc::new(driver))
    } else {
        Err(StorageError::invalid(format!(
            "unsupported storage uri: {uri}"
        )))
    }
}

/// Opens a control driver (catalogue, pools, flavors) for `uri`.
pub async fn open_control_driver(uri: &str) -> Result<Arc<dyn ControlDriver>> {
    if uri.starts_with("memory:") {
        Ok(Arc::new(storage::memory::MemoryDriver::new()))
    } else if uri.starts_with("sqlite:") {
        Ok(Arc::new(storage::sqlite::SqliteDriver::connect(uri).await?))
    } else {
        Err(StorageError::invalid(format!(
            "unsupported control-store uri: {uri}"
        )))
    }
}

/// Process-wide cache of open data drivers, keyed by pool URI.
///
/// Connection state (sqlx pools, redb handles, memory stores) is shared by
/// everything that routes to the same URI.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: DashMap<String, Arc<dyn DataDriver>>,
    tuning: RwLock<StorageTuning>,
}

static DRIVERS: Lazy<DriverRegistry> = Lazy::new(DriverRegistry::new);

/// The process-wide registry; everything routing to the same pool URI
/// shares one driver (and therefore one connection pool).
pub fn driver_registry() -> &'static DriverRegistry {
    &DRIVERS
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applied to drivers opened after this call; set once at bootstrap.
    pub fn set_tuning(&self, tuning: StorageTuning) {
        *self.tuning.write() = tuning;
    }

    pub async fn get(&self, uri: &str) -> Result<Arc<dyn DataDriver>> {
        if let Some(driver) = self.drivers.get(uri) {
            return Ok(Arc::clone(&driver));
        }

        let tuning = *self.tuning.read();
        let driver = open_data_driver(uri, tuning).await?;
        let entry = self
            .drivers
            .entry(uri.to_string())
            .or_insert_with(|| driver);
        Ok(Arc::clone(&entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let out = retry_transient(policy, "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StorageError::connection("flaky"))
            } else {
                Ok(7u32)
            }
        })
        .await
        .unwrap();

        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_claim_budget_surfaces_claim_conflict() {
        let err = retry_claim(Duration::from_millis(20), "p", "q", || async {
            Err::<(), _>(StorageError::connection("contended"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::ClaimConflict { .. }));
    }

    #[tokio::test]
    async fn registry_reuses_drivers_by_uri() {
        let registry = DriverRegistry::new();
        let a = registry.get("memory://pool-a").await.unwrap();
        let b = registry.get("memory://pool-a").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.get("memory://pool-b").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
    }
}
