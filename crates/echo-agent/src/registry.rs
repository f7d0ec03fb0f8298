use crate::error::AgentError;
use crate::inbound::InboundMessage;
use crate::mailbox::Mailbox;
use dashmap::DashMap;
use echo_common::keys;
use echo_common::{base58, Verkey};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Public description of a connection, as returned to the controlling client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Unique connection id.
    pub connection_id: String,
    /// Unqualified DID derived from `verkey`.
    pub did: String,
    /// Base58 verkey of this side of the connection.
    pub verkey: String,
    /// Base58 verkey of the counterparty.
    pub their_vk: String,
    /// Counterparty endpoint URL.
    pub endpoint: String,
}

/// A connection: identity, key material and the mailbox for its inbound messages.
pub struct Connection {
    /// Public description.
    pub info: ConnectionInfo,
    id: Uuid,
    signing_key: SigningKey,
    their_key: Verkey,
    /// Messages delivered to this connection and not yet consumed.
    pub mailbox: Mailbox<InboundMessage>,
}

impl Connection {
    /// Connection id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// This side's signing key.
    #[must_use]
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// This side's verkey.
    #[must_use]
    pub fn verkey(&self) -> Verkey {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The counterparty verkey.
    #[must_use]
    pub fn their_key(&self) -> &Verkey {
        &self.their_key
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("info", &self.info)
            .field("mailbox", &self.mailbox)
            .finish_non_exhaustive()
    }
}

/// Checks that an endpoint is an absolute http(s) or ws(s) URL with a host.
///
/// # Errors
///
/// Returns [`AgentError::InvalidEndpoint`] describing the problem.
pub fn validate_endpoint(endpoint: &str) -> Result<reqwest::Url, AgentError> {
    let invalid = |reason: String| AgentError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };
    let parsed = endpoint
        .parse::<reqwest::Url>()
        .map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" | "ws" | "wss" => {}
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(parsed)
}

/// Concurrent connection table with a recipient-key index.
#[derive(Debug)]
pub struct Registry {
    connections: DashMap<Uuid, Arc<Connection>>,
    by_verkey: DashMap<Verkey, Uuid>,
    mailbox_capacity: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Registry {
    /// Create an empty registry whose mailboxes hold at most
    /// `mailbox_capacity` unclaimed messages (0 = unbounded).
    #[must_use]
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            by_verkey: DashMap::new(),
            mailbox_capacity,
        }
    }

    /// Create and store a connection.
    ///
    /// The keypair is derived from `seed` when given, otherwise generated.
    /// If another connection already holds the same key, inbound envelopes
    /// for that key go to the newest one.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidSeed`], [`AgentError::InvalidKey`] or
    /// [`AgentError::InvalidEndpoint`]; nothing is stored in that case.
    pub fn create(
        &self,
        seed: Option<&str>,
        their_vk: &str,
        endpoint: &str,
    ) -> Result<Arc<Connection>, AgentError> {
        let signing_key = match seed {
            Some(seed) => keys::keypair_from_seed(seed.as_bytes()).map_err(AgentError::InvalidSeed)?,
            None => keys::generate_keypair(),
        };
        let their_key = keys::parse_verkey(their_vk).map_err(AgentError::InvalidKey)?;
        validate_endpoint(endpoint)?;

        let id = Uuid::new_v4();
        let verkey = signing_key.verifying_key().to_bytes();
        let connection = Arc::new(Connection {
            info: ConnectionInfo {
                connection_id: id.to_string(),
                did: base58::did_from_verkey(&verkey),
                verkey: base58::encode(&verkey),
                their_vk: their_vk.to_string(),
                endpoint: endpoint.to_string(),
            },
            id,
            signing_key,
            their_key,
            mailbox: Mailbox::with_capacity(self.mailbox_capacity),
        });

        self.connections.insert(id, connection.clone());
        self.by_verkey.insert(verkey, id);
        Ok(connection)
    }

    /// Look up a connection by id.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ConnectionNotFound`] for unknown or malformed ids.
    pub fn get(&self, id: &str) -> Result<Arc<Connection>, AgentError> {
        Uuid::parse_str(id)
            .ok()
            .and_then(|uuid| self.connections.get(&uuid).map(|e| e.value().clone()))
            .ok_or_else(|| AgentError::ConnectionNotFound(id.to_string()))
    }

    /// Find the connection holding the private key for `verkey`.
    #[must_use]
    pub fn resolve_by_recipient_key(&self, verkey: &Verkey) -> Option<Arc<Connection>> {
        let id = *self.by_verkey.get(verkey)?.value();
        self.connections.get(&id).map(|e| e.value().clone())
    }

    /// Remove a connection and close its mailbox.
    ///
    /// The key index entry is dropped only if it still points at this
    /// connection. Pending waits on the mailbox end as cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ConnectionNotFound`] if there is no such connection.
    pub fn remove(&self, id: &str) -> Result<Arc<Connection>, AgentError> {
        let (uuid, connection) = Uuid::parse_str(id)
            .ok()
            .and_then(|uuid| self.connections.remove(&uuid))
            .ok_or_else(|| AgentError::ConnectionNotFound(id.to_string()))?;
        self.by_verkey
            .remove_if(&connection.verkey(), |_k, v| *v == uuid);
        connection.mailbox.close();
        Ok(connection)
    }

    /// Snapshot of all connections, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .map(|e| e.value().info.clone())
            .collect();
        infos.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        infos
    }

    /// Number of connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if there are no connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Total unclaimed messages across all mailboxes.
    #[must_use]
    pub fn pending_messages(&self) -> usize {
        self.connections.iter().map(|e| e.value().mailbox.len()).sum()
    }
}
