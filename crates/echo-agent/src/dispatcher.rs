//! Inbound delivery: unpack an envelope, find its connection, append to the mailbox.

use crate::codec::{self, Unpacked};
use crate::error::AgentError;
use crate::inbound::InboundMessage;
use crate::metrics::counters;
use crate::registry::{Connection, Registry};
use echo_common::base58;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where an inbound message ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// Receiving connection.
    pub connection_id: String,
    /// `@type` of the delivered message.
    pub msg_type: String,
}

/// Deliver envelope bytes received over HTTP.
///
/// Every envelope either lands in exactly one mailbox or is reported back as
/// an error; nothing is dropped silently.
///
/// # Errors
///
/// [`AgentError::Unpack`] for bad envelopes, [`AgentError::UnknownRecipient`]
/// when no connection holds the recipient key, [`AgentError::MailboxFull`]
/// when the mailbox is at capacity.
pub fn dispatch(registry: &Registry, bytes: &[u8], via: &'static str) -> Result<Delivered, AgentError> {
    let result = codec::unpack(registry, bytes).and_then(|unpacked| deliver(unpacked, None));
    record(result, via)
}

/// Deliver envelope bytes that arrived on a session bound to `connection`.
///
/// # Errors
///
/// As [`dispatch`], except the recipient must be `connection` itself.
pub fn dispatch_to(
    connection: Arc<Connection>,
    bytes: &[u8],
    session_id: &str,
) -> Result<Delivered, AgentError> {
    let result = codec::unpack_for(connection, bytes)
        .and_then(|unpacked| deliver(unpacked, Some(session_id.to_string())));
    record(result, "session")
}

fn deliver(unpacked: Unpacked, session_id: Option<String>) -> Result<Delivered, AgentError> {
    let Unpacked {
        connection,
        message,
        sender,
    } = unpacked;
    let delivered = Delivered {
        connection_id: connection.info.connection_id.clone(),
        msg_type: message.msg_type.clone(),
    };
    let item = InboundMessage::new(message, Some(base58::encode(&sender)), session_id);
    connection
        .mailbox
        .append(item)
        .map_err(|e| AgentError::from_mailbox(e, &delivered.connection_id))?;
    Ok(delivered)
}

fn record(
    result: Result<Delivered, AgentError>,
    via: &'static str,
) -> Result<Delivered, AgentError> {
    match &result {
        Ok(delivered) => {
            counters::messages_received_total(via);
            debug!(
                connection_id = %delivered.connection_id,
                msg_type = %delivered.msg_type,
                via,
                "message delivered"
            );
        }
        Err(e) => {
            counters::messages_rejected_total(e.reason());
            warn!(error = %e, via, "inbound message rejected");
        }
    }
    result
}
