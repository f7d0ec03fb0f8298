use crate::mailbox::MailboxError;
use echo_common::keys::KeyError;
use echo_common::EnvelopeError;
use thiserror::Error;

/// Errors surfaced by agent operations.
///
/// Each variant maps to one HTTP status in the API layer.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The connection seed is not exactly 32 bytes.
    #[error("invalid seed: {0}")]
    InvalidSeed(KeyError),
    /// The counterparty verkey is not a Base58 Ed25519 point.
    #[error("invalid their_vk: {0}")]
    InvalidKey(KeyError),
    /// The counterparty endpoint is not a usable URL.
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// The rejected endpoint.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },
    /// No connection with this id.
    #[error("no connection {0}")]
    ConnectionNotFound(String),
    /// No held key matches the envelope recipient.
    #[error("no connection for recipient key {0}")]
    UnknownRecipient(String),
    /// No session with this id.
    #[error("no session {0}")]
    SessionNotFound(String),
    /// An inbound envelope could not be opened or did not hold a message.
    #[error("could not unpack message: {0}")]
    Unpack(#[source] EnvelopeError),
    /// An outbound message could not be packed.
    #[error("could not pack message: {0}")]
    Pack(#[source] EnvelopeError),
    /// Outbound transmission failed or the endpoint answered non-2xx.
    #[error("delivery failed: {0}")]
    Delivery(String),
    /// The destination mailbox is at capacity.
    #[error("mailbox full ({0} entries)")]
    MailboxFull(usize),
}

impl AgentError {
    /// Short label used for the `reason` metric label and logs.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidSeed(_) => "invalid_seed",
            Self::InvalidKey(_) => "invalid_key",
            Self::InvalidEndpoint { .. } => "invalid_endpoint",
            Self::ConnectionNotFound(_) => "connection_not_found",
            Self::UnknownRecipient(_) => "unknown_recipient",
            Self::SessionNotFound(_) => "session_not_found",
            Self::Unpack(_) => "unpack",
            Self::Pack(_) => "pack",
            Self::Delivery(_) => "delivery",
            Self::MailboxFull(_) => "mailbox_full",
        }
    }

    /// Map a mailbox append failure for connection `id`.
    ///
    /// A closed mailbox means the connection was deleted while the message
    /// was in flight.
    pub(crate) fn from_mailbox(err: MailboxError, id: &str) -> Self {
        match err {
            MailboxError::Full(capacity) => Self::MailboxFull(capacity),
            MailboxError::Closed => Self::ConnectionNotFound(id.to_string()),
        }
    }
}
