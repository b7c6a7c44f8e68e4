//! Message records and the visibility rules applied when listing a queue.
//!
//! Every driver stores `MessageRecord` values (with its own encoding) and
//! converts them to `QueueMessage` for the wire. The predicates here are the
//! single source of truth for expiry, claim and echo filtering.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message as persisted by a storage driver.
///
/// `rank` is the per-queue FIFO position assigned at post time; markers are
/// its decimal rendering. `expires` is maintained alongside `ttl` so claim
/// grace extensions only touch the record, never the insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub id: String,
    pub rank: u64,
    pub ttl: u64,
    pub created: u64,
    pub expires: u64,
    pub body: Value,
    pub client_uuid: String,
    pub claim_id: Option<String>,
    /// Timestamp at which the current claim lapses; 0 when unclaimed.
    pub claim_expires: u64,
    /// How many claims this message has been part of (dead-letter input).
    pub claim_count: u64,
}

impl MessageRecord {
    pub fn new(rank: u64, ttl: u64, body: Value, client_uuid: &str, now: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            rank,
            ttl,
            created: now,
            expires: now + ttl,
            body,
            client_uuid: client_uuid.to_string(),
            claim_id: None,
            claim_expires: 0,
            claim_count: 0,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires
    }

    /// True iff the message is currently held by a live claim.
    pub fn is_claimed(&self, now: u64) -> bool {
        self.claim_id.is_some() && now < self.claim_expires
    }

    pub fn is_echo(&self, client_uuid: &str) -> bool {
        self.client_uuid == client_uuid
    }

    /// Visibility predicate for unclaimed listing.
    pub fn is_visible(&self, now: u64) -> bool {
        !self.is_expired(now) && !self.is_claimed(now)
    }

    pub fn to_basic(&self, now: u64) -> QueueMessage {
        QueueMessage {
            id: self.id.clone(),
            age: now.saturating_sub(self.created),
            ttl: self.ttl,
            body: self.body.clone(),
            claim_id: if self.is_claimed(now) {
                self.claim_id.clone()
            } else {
                None
            },
            claim_count: self.claim_count,
        }
    }
}

/// Wire representation of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub age: u64,
    pub ttl: u64,
    pub body: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    pub claim_count: u64,
}

/// Payload accepted by `MessageController::post`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub ttl: u64,
    pub body: Value,
}

/// Filter set applied to a listing pass, mirroring the request knobs.
#[derive(Debug, Clone)]
pub struct ListFilters {
    pub now: u64,
    pub echo: bool,
    pub include_claimed: bool,
    pub client_uuid: Option<String>,
}

impl ListFilters {
    /// Decides whether `msg` belongs in the listing.
    pub fn admits(&self, msg: &MessageRecord) -> bool {
        if msg.is_expired(self.now) {
            return false;
        }

        if !self.include_claimed && msg.is_claimed(self.now) {
            return false;
        }

        if !self.echo {
            if let Some(client) = &self.client_uuid {
                if msg.is_echo(client) {
                    return false;
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(rank: u64) -> MessageRecord {
        MessageRecord::new(rank, 60, json!({"n": rank}), "client-a", 1_000)
    }

    #[test]
    fn visibility_tracks_expiry_and_claims() {
        let mut msg = record(1);
        assert!(msg.is_visible(1_000));
        assert!(!msg.is_visible(1_060), "ttl elapsed");

        msg.claim_id = Some("c1".into());
        msg.claim_expires = 1_030;
        assert!(!msg.is_visible(1_010), "claimed");
        assert!(msg.is_visible(1_030), "claim lapsed at its expiry instant");
    }

    #[test]
    fn filters_suppress_echo_only_for_the_posting_client() {
        let msg = record(1);
        let mine = ListFilters {
            now: 1_001,
            echo: false,
            include_claimed: false,
            client_uuid: Some("client-a".into()),
        };
        let theirs = ListFilters {
            client_uuid: Some("client-b".into()),
            ..mine.clone()
        };

        assert!(!mine.admits(&msg));
        assert!(theirs.admits(&msg));
    }

    #[test]
    fn include_claimed_overrides_the_claim_filter() {
        let mut msg = record(2);
        msg.claim_id = Some("c1".into());
        msg.claim_expires = 2_000;

        let filters = ListFilters {
            now: 1_001,
            echo: true,
            include_claimed: true,
            client_uuid: None,
        };
        assert!(filters.admits(&msg));
    }

    #[test]
    fn basic_form_hides_lapsed_claims() {
        let mut msg = record(3);
        msg.claim_id = Some("c1".into());
        msg.claim_expires = 1_005;

        assert_eq!(msg.to_basic(1_001).claim_id.as_deref(), Some("c1"));
        assert_eq!(msg.to_basic(1_010).claim_id, None);
    }
}
