//! Packing outbound messages and unpacking inbound envelopes against the
//! key material held in the [`Registry`].

use crate::error::AgentError;
use crate::registry::{Connection, Registry};
use echo_common::envelope::{self, Envelope, EnvelopeError};
use echo_common::{base58, Message, Verkey};
use std::sync::Arc;

/// An opened inbound envelope.
#[derive(Debug)]
pub struct Unpacked {
    /// Connection holding the recipient key.
    pub connection: Arc<Connection>,
    /// Decrypted message.
    pub message: Message,
    /// Authenticated sender verkey.
    pub sender: Verkey,
}

/// Serialize `message` and seal it from `connection`'s key to its counterparty.
///
/// # Errors
///
/// Returns [`AgentError::Pack`] if serialization or encryption fails.
pub fn pack(connection: &Connection, message: &Message) -> Result<Vec<u8>, AgentError> {
    let plaintext = message
        .to_vec()
        .map_err(|e| AgentError::Pack(EnvelopeError::Json(e)))?;
    envelope::pack(connection.signing_key(), connection.their_key(), &plaintext)
        .map_err(AgentError::Pack)
}

/// Open an inbound envelope with whichever connection holds its recipient key.
///
/// # Errors
///
/// Returns [`AgentError::Unpack`] for malformed envelopes, failed
/// authentication or a payload that is not a message, and
/// [`AgentError::UnknownRecipient`] when no connection holds the key.
pub fn unpack(registry: &Registry, bytes: &[u8]) -> Result<Unpacked, AgentError> {
    let parsed = Envelope::parse(bytes).map_err(AgentError::Unpack)?;
    let recipient = parsed.recipient_key().map_err(AgentError::Unpack)?;
    let connection = registry
        .resolve_by_recipient_key(&recipient)
        .ok_or_else(|| AgentError::UnknownRecipient(base58::encode(&recipient)))?;
    open_message(connection, &parsed)
}

/// Open an envelope that must be addressed to `connection`.
///
/// # Errors
///
/// As [`unpack`]; an envelope for any other key is [`AgentError::UnknownRecipient`].
pub fn unpack_for(connection: Arc<Connection>, bytes: &[u8]) -> Result<Unpacked, AgentError> {
    let parsed = Envelope::parse(bytes).map_err(AgentError::Unpack)?;
    open_message(connection, &parsed)
}

fn open_message(connection: Arc<Connection>, parsed: &Envelope) -> Result<Unpacked, AgentError> {
    let opened = envelope::open(connection.signing_key(), parsed).map_err(|e| match e {
        EnvelopeError::UnknownRecipient(key) => AgentError::UnknownRecipient(key),
        other => AgentError::Unpack(other),
    })?;
    let message = Message::from_slice(&opened.plaintext)
        .map_err(|e| AgentError::Unpack(EnvelopeError::Json(e)))?;
    Ok(Unpacked {
        connection,
        message,
        sender: opened.sender,
    })
}
