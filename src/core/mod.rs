//! Zaqar core logic.
//!
//! Pure, backend-independent pieces shared by every storage driver:
//! - `message` – message records, visibility predicates, list filtering
//! - `claim`   – claim records and the ttl/grace schedule arithmetic
//! - `select`  – weighted pool selection

pub mod claim;
pub mod message;
pub mod select;

/// Seconds since the unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}
