//! Request and response bodies of the echo agent API.

use serde::{Deserialize, Serialize};

/// Body of `POST /connection`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConnection {
    /// 32-character seed for a deterministic keypair; random when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    /// Counterparty endpoint.
    pub endpoint: String,
    /// Base58 counterparty verkey.
    pub their_vk: String,
}

/// A connection as reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Connection id.
    pub connection_id: String,
    /// Agent-side DID.
    pub did: String,
    /// Agent-side Base58 verkey.
    pub verkey: String,
    /// Counterparty Base58 verkey.
    pub their_vk: String,
    /// Counterparty endpoint.
    pub endpoint: String,
}

/// An open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session id.
    pub session_id: String,
    /// Connection the session belongs to.
    pub connection_id: String,
}

/// A webhook the agent received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    /// Topic from the webhook path.
    pub topic: String,
    /// Webhook body.
    pub payload: serde_json::Value,
    /// RFC 3339 arrival time.
    pub received_at: String,
}

/// Query for `GET /message/{connection_id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageQuery {
    /// Match on thread id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thid: Option<String>,
    /// Match on `@type`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<String>,
    /// Match on the session the message arrived on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Block until a match arrives (default) or return 404 immediately.
    pub wait: bool,
    /// Seconds to wait; the agent default applies when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            thid: None,
            msg_type: None,
            session_id: None,
            wait: true,
            timeout: None,
        }
    }
}

impl MessageQuery {
    /// Match replies on thread `thid`.
    #[must_use]
    pub fn thread(thid: impl Into<String>) -> Self {
        Self {
            thid: Some(thid.into()),
            ..Self::default()
        }
    }

    /// Match messages of type `msg_type`.
    #[must_use]
    pub fn of_type(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: Some(msg_type.into()),
            ..Self::default()
        }
    }

    /// Set the wait timeout in seconds.
    #[must_use]
    pub fn timeout(mut self, secs: f64) -> Self {
        self.timeout = Some(secs);
        self
    }

    /// Return immediately instead of waiting.
    #[must_use]
    pub fn no_wait(mut self) -> Self {
        self.wait = false;
        self
    }
}
