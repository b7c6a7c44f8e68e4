//! Claim records and the ttl/grace schedule shared by all drivers.
//!
//! Keeping the arithmetic in one place guarantees the four backends cannot
//! drift on the lease invariants: a claimed message must outlive the claim by
//! at least `grace` seconds so the worker still has a window to delete it
//! after the lease lapses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::message::MessageRecord;

/// A claim as persisted by a storage driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: String,
    pub ttl: u64,
    pub grace: u64,
    pub created: u64,
    pub expires: u64,
    pub message_ids: Vec<String>,
}

impl ClaimRecord {
    pub fn is_live(&self, now: u64) -> bool {
        self.expires > now
    }

    pub fn to_meta(&self, now: u64) -> ClaimMeta {
        // Age counts from the last (re)base of the expiry, as renewals
        // reset the lease.
        let update_time = self.expires - self.ttl;
        ClaimMeta {
            id: self.id.clone(),
            ttl: self.ttl,
            age: now.saturating_sub(update_time),
        }
    }
}

/// Wire representation of a claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimMeta {
    pub id: String,
    pub ttl: u64,
    pub age: u64,
}

/// The derived timestamps for one claim create or renewal.
#[derive(Debug, Clone, Copy)]
pub struct ClaimSchedule {
    pub now: u64,
    pub ttl: u64,
    pub grace: u64,
    pub claim_expires: u64,
    pub message_ttl: u64,
    pub message_expires: u64,
}

impl ClaimSchedule {
    pub fn new(now: u64, ttl: u64, grace: u64) -> Self {
        let claim_expires = now + ttl;
        Self {
            now,
            ttl,
            grace,
            claim_expires,
            message_ttl: ttl + grace,
            message_expires: claim_expires + grace,
        }
    }

    /// Binds `msg` to the claim and extends its lifetime so it survives
    /// until at least `message_expires`.
    pub fn stamp(&self, msg: &mut MessageRecord, claim_id: &str) {
        msg.claim_id = Some(claim_id.to_string());
        msg.claim_expires = self.claim_expires;

        if msg.expires < self.message_expires {
            msg.ttl = self.message_ttl;
            msg.expires = self.message_expires;
        }
    }
}

/// Unbinds `msg` from its claim, making it immediately visible.
pub fn release_message(msg: &mut MessageRecord, now: u64) {
    msg.claim_id = None;
    msg.claim_expires = now;
}

/// Dead-letter routing configured through queue metadata.
///
/// Present only when the metadata carries both `_max_claim_count` and
/// `_dead_letter_queue`; `_dead_letter_queue_messages_ttl` optionally
/// rewrites the TTL of diverted messages.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterPolicy {
    pub max_claim_count: u64,
    pub queue: String,
    pub ttl: Option<u64>,
}

impl DeadLetterPolicy {
    pub fn from_metadata(metadata: &Value) -> Option<Self> {
        let max_claim_count = metadata.get("_max_claim_count")?.as_u64()?;
        let queue = metadata.get("_dead_letter_queue")?.as_str()?.to_string();
        let ttl = metadata
            .get("_dead_letter_queue_messages_ttl")
            .and_then(Value::as_u64);

        Some(Self {
            max_claim_count,
            queue,
            ttl,
        })
    }

    /// True when one more claim would push the message over the limit.
    pub fn exhausted(&self, msg: &MessageRecord) -> bool {
        msg.claim_count >= self.max_claim_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schedule_extends_short_lived_messages() {
        let mut msg = MessageRecord::new(1, 10, json!("x"), "c", 1_000);
        let schedule = ClaimSchedule::new(1_000, 30, 60);

        schedule.stamp(&mut msg, "claim-1");

        assert_eq!(msg.claim_id.as_deref(), Some("claim-1"));
        assert_eq!(msg.claim_expires, 1_030);
        // created + ttl (1_010) < message_expires (1_090) → extended.
        assert_eq!(msg.expires, 1_090);
        assert_eq!(msg.ttl, 90);
    }

    #[test]
    fn schedule_leaves_long_lived_messages_alone() {
        let mut msg = MessageRecord::new(1, 3_600, json!("x"), "c", 1_000);
        let schedule = ClaimSchedule::new(1_000, 30, 60);

        schedule.stamp(&mut msg, "claim-1");

        assert_eq!(msg.expires, 4_600);
        assert_eq!(msg.ttl, 3_600);
    }

    #[test]
    fn release_makes_the_message_immediately_visible() {
        let mut msg = MessageRecord::new(1, 600, json!("x"), "c", 1_000);
        ClaimSchedule::new(1_000, 30, 60).stamp(&mut msg, "claim-1");

        release_message(&mut msg, 1_010);

        assert!(msg.is_visible(1_010));
        assert_eq!(msg.claim_expires, 1_010);
    }

    #[test]
    fn dead_letter_policy_requires_both_keys() {
        let full = json!({
            "_max_claim_count": 2,
            "_dead_letter_queue": "failed",
            "_dead_letter_queue_messages_ttl": 300,
        });
        let policy = DeadLetterPolicy::from_metadata(&full).unwrap();
        assert_eq!(policy.queue, "failed");
        assert_eq!(policy.ttl, Some(300));

        let partial = json!({"_max_claim_count": 2});
        assert_eq!(DeadLetterPolicy::from_metadata(&partial), None);
    }

    #[test]
    fn claim_age_counts_from_the_last_rebase() {
        let claim = ClaimRecord {
            id: "c".into(),
            ttl: 60,
            grace: 10,
            created: 1_000,
            expires: 1_200, // renewed at 1_140
            message_ids: vec![],
        };
        assert_eq!(claim.to_meta(1_150).age, 10);
    }
}
