//! Queue of webhooks posted to the agent, retrievable by topic.

use crate::error::AgentError;
use crate::mailbox::{Mailbox, MailboxError, Predicate, WaitOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A webhook received on `POST /webhook/{topic}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    /// Topic taken from the request path.
    pub topic: String,
    /// Request body.
    pub payload: serde_json::Value,
    /// Arrival time.
    pub received_at: DateTime<Utc>,
}

fn topic_predicate(topic: Option<String>) -> Predicate<Webhook> {
    Arc::new(move |hook: &Webhook| topic.as_deref().map_or(true, |t| hook.topic == t))
}

/// Process-wide webhook store.
#[derive(Debug)]
pub struct WebhookQueue {
    mailbox: Mailbox<Webhook>,
}

impl WebhookQueue {
    /// Create a queue holding at most `capacity` unclaimed webhooks (0 = unbounded).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            mailbox: Mailbox::with_capacity(capacity),
        }
    }

    /// Store a webhook, or hand it to a waiting reader.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MailboxFull`] when the queue is at capacity.
    pub fn receive(&self, topic: String, payload: serde_json::Value) -> Result<(), AgentError> {
        let hook = Webhook {
            topic,
            payload,
            received_at: Utc::now(),
        };
        self.mailbox.append(hook).map_err(|e| match e {
            MailboxError::Full(capacity) => AgentError::MailboxFull(capacity),
            MailboxError::Closed => AgentError::Delivery("agent shutting down".to_string()),
        })
    }

    /// Remove and return all webhooks, or only those for `topic`.
    pub fn drain(&self, topic: Option<String>) -> Vec<Webhook> {
        self.mailbox.drain(&*topic_predicate(topic))
    }

    /// Remove the oldest webhook for `topic` without waiting.
    pub fn try_take(&self, topic: Option<String>) -> Option<Webhook> {
        self.mailbox.try_take(&*topic_predicate(topic))
    }

    /// Wait for a webhook for `topic` (any topic when `None`).
    pub async fn wait(
        &self,
        topic: Option<String>,
        timeout: Duration,
        cancel: impl Future<Output = ()>,
    ) -> WaitOutcome<Webhook> {
        self.mailbox
            .select_wait_until(topic_predicate(topic), Some(timeout), cancel)
            .await
    }

    /// Number of unclaimed webhooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mailbox.len()
    }

    /// Returns `true` if no webhooks are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mailbox.is_empty()
    }
}
