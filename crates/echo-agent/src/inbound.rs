//! Inbound mailbox items and the filters used to select them.

use crate::mailbox::Predicate;
use chrono::{DateTime, Utc};
use echo_common::Message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A message delivered to a connection, as stored in its mailbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    /// The unpacked message.
    pub message: Message,
    /// Base58 verkey of the authenticated sender.
    pub sender: Option<String>,
    /// Session the message arrived on, if it came over a socket.
    pub session_id: Option<String>,
    /// Arrival time.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Wrap a freshly unpacked message.
    #[must_use]
    pub fn new(message: Message, sender: Option<String>, session_id: Option<String>) -> Self {
        Self {
            message,
            sender,
            session_id,
            received_at: Utc::now(),
        }
    }
}

/// Selection criteria for mailbox reads. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessageFilter {
    /// Thread id (`~thread.thid`, falling back to `@id`).
    pub thid: Option<String>,
    /// Exact `@type`.
    pub msg_type: Option<String>,
    /// Session the message arrived on.
    pub session_id: Option<String>,
}

impl MessageFilter {
    /// Returns `true` if `item` satisfies every set criterion.
    ///
    /// The session criterion only rules out messages that arrived on a
    /// different session; HTTP and return-route deliveries still match.
    #[must_use]
    pub fn matches(&self, item: &InboundMessage) -> bool {
        self.matches_with(item, false)
    }

    /// Like [`matches`](Self::matches), but a set session criterion also
    /// rejects messages that did not arrive on a session.
    #[must_use]
    pub fn matches_strict(&self, item: &InboundMessage) -> bool {
        self.matches_with(item, true)
    }

    fn matches_with(&self, item: &InboundMessage, strict_session: bool) -> bool {
        if let Some(ref thid) = self.thid {
            if item.message.thread_id() != Some(thid.as_str()) {
                return false;
            }
        }
        if let Some(ref msg_type) = self.msg_type {
            if item.message.msg_type != *msg_type {
                return false;
            }
        }
        if let Some(ref session_id) = self.session_id {
            match item.session_id {
                Some(ref arrived_on) if arrived_on != session_id => return false,
                None if strict_session => return false,
                _ => {}
            }
        }
        true
    }

    /// Convert into a mailbox predicate for single-message reads.
    #[must_use]
    pub fn into_predicate(self) -> Predicate<InboundMessage> {
        Arc::new(move |item| self.matches(item))
    }

    /// Convert into a mailbox predicate using [`matches_strict`](Self::matches_strict).
    #[must_use]
    pub fn into_strict_predicate(self) -> Predicate<InboundMessage> {
        Arc::new(move |item| self.matches_strict(item))
    }
}
