//! Push notifications for queue subscriptions.
//!
//! When messages land on a queue, every *confirmed* `http(s)://`
//! subscription receives one JSON POST with the batch. Dispatch is
//! fire-and-forget on spawned tasks with a bounded request timeout;
//! `mailto:` and `ws(s)://` subscribers are persisted but delivered by
//! external collaborators.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::NotifierConfig;
use crate::core::message::QueueMessage;
use crate::storage::{SubscriptionController, DEFAULT_SUBSCRIPTIONS_PER_PAGE};

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    require_confirmation: bool,
}

/// Protocols whose subscriptions start unconfirmed.
pub fn is_confirmable(subscriber: &str) -> bool {
    subscriber.starts_with("http://")
        || subscriber.starts_with("https://")
        || subscriber.starts_with("mailto:")
}

/// Subscriber URIs this service validates on create.
pub fn is_supported_subscriber(subscriber: &str) -> bool {
    is_confirmable(subscriber)
        || subscriber.starts_with("ws://")
        || subscriber.starts_with("wss://")
}

impl Notifier {
    pub fn new(conf: &NotifierConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(conf.request_timeout_ms))
            .build()
            .expect("notifier http client");

        Self {
            client,
            require_confirmation: conf.require_confirmation,
        }
    }

    /// Whether a new subscription for `subscriber` starts confirmed.
    pub fn initially_confirmed(&self, subscriber: &str) -> bool {
        !(self.require_confirmation && is_confirmable(subscriber))
    }

    /// Fans the posted batch out to the queue's subscribers.
    pub async fn notify_post(
        &self,
        subscriptions: Arc<dyn SubscriptionController>,
        project: &str,
        queue: &str,
        messages: Vec<QueueMessage>,
    ) {
        let mut marker: Option<String> = None;

        loop {
            let page = match subscriptions
                .list(
                    project,
                    queue,
                    marker.as_deref(),
                    DEFAULT_SUBSCRIPTIONS_PER_PAGE,
                )
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    warn!("subscription listing failed for {project}/{queue}: {err}");
                    return;
                }
            };

            let mut deliveries = Vec::new();
            for sub in &page.items {
                if !sub.confirmed {
                    debug!("skipping unconfirmed subscription {}", sub.id);
                    continue;
                }
                if !sub.subscriber.starts_with("http://")
                    && !sub.subscriber.starts_with("https://")
                {
                    // Delivered by an external collaborator.
                    continue;
                }

                let payload = json!({
                    "queue_name": queue,
                    "messages": messages,
                });
                let request = self.client.post(&sub.subscriber).json(&payload);
                let subscriber = sub.subscriber.clone();

                deliveries.push(async move {
                    match request.send().await {
                        Ok(response) if !response.status().is_success() => {
                            warn!(
                                "subscriber {} answered {}",
                                subscriber,
                                response.status()
                            );
                        }
                        Ok(_) => {}
                        Err(err) => warn!("notifying {} failed: {}", subscriber, err),
                    }
                });
            }
            join_all(deliveries).await;

            match page.marker {
                Some(next) => marker = Some(next),
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmable_protocols() {
        assert!(is_confirmable("http://example.com/hook"));
        assert!(is_confirmable("mailto:ops@example.com"));
        assert!(!is_confirmable("ws://example.com/sock"));
    }

    #[test]
    fn confirmation_policy_follows_config() {
        let strict = Notifier::new(&NotifierConfig {
            request_timeout_ms: 1_000,
            require_confirmation: true,
        });
        assert!(!strict.initially_confirmed("http://example.com/hook"));
        assert!(strict.initially_confirmed("ws://example.com/sock"));

        let lax = Notifier::new(&NotifierConfig {
            request_timeout_ms: 1_000,
            require_confirmation: false,
        });
        assert!(lax.initially_confirmed("http://example.com/hook"));
    }
}
