//! Shared helpers for the driver-conformance suites.
//!
//! Every data-plane test runs against all four backends; a `TestDriver`
//! keeps temp directories alive for the embedded stores.

use std::sync::Arc;

use tempfile::TempDir;

use zaqar::storage::fs::FsDriver;
use zaqar::storage::memory::MemoryDriver;
use zaqar::storage::redb::RedbDriver;
use zaqar::storage::sqlite::SqliteDriver;
use zaqar::storage::DataDriver;

pub struct TestDriver {
    pub name: &'static str,
    pub driver: Arc<dyn DataDriver>,
    _tmp: Option<TempDir>,
}

pub async fn all_drivers() -> Vec<TestDriver> {
    let mut drivers = Vec::new();

    drivers.push(TestDriver {
        name: "memory",
        driver: Arc::new(MemoryDriver::new()),
        _tmp: None,
    });

    let tmp = TempDir::new().expect("tempdir");
    let redb = RedbDriver::open(tmp.path().join("zaqar.redb")).expect("open redb");
    drivers.push(TestDriver {
        name: "redb",
        driver: Arc::new(redb),
        _tmp: Some(tmp),
    });

    let sqlite = SqliteDriver::connect("sqlite::memory:")
        .await
        .expect("connect sqlite");
    drivers.push(TestDriver {
        name: "sqlite",
        driver: Arc::new(sqlite),
        _tmp: None,
    });

    let tmp = TempDir::new().expect("tempdir");
    let fs = FsDriver::open(tmp.path()).expect("open fs driver");
    drivers.push(TestDriver {
        name: "fs",
        driver: Arc::new(fs),
        _tmp: Some(tmp),
    });

    drivers
}

pub fn body(n: u64) -> serde_json::Value {
    serde_json::json!({ "n": n })
}

pub const CLIENT_A: &str = "11111111-1111-4111-8111-111111111111";
pub const CLIENT_B: &str = "22222222-2222-4222-8222-222222222222";
