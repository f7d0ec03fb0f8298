//! The agent message: a `@type` discriminator plus an open set of fields.
//!
//! Messages are passed through untouched. Unknown protocol fields survive a
//! deserialize/serialize cycle because everything except `@type` and `@id`
//! lives in a flattened JSON map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A protocol message exchanged between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// URI-shaped message type, e.g. `https://didcomm.org/basicmessage/1.0/message`.
    #[serde(rename = "@type")]
    pub msg_type: String,
    /// Message identifier, used as the thread id when no `~thread` decorator is set.
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// All remaining protocol-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Message {
    /// Create a message of the given type with a fresh `@id`.
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            id: Some(uuid::Uuid::new_v4().to_string()),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Assign a fresh `@id` if the message does not carry one.
    pub fn ensure_id(&mut self) -> &str {
        self.id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .as_str()
    }

    /// Look up a protocol field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Thread id: `~thread.thid` if present, otherwise the message's own `@id`.
    pub fn thread_id(&self) -> Option<&str> {
        self.fields
            .get("~thread")
            .and_then(|thread| thread.get("thid"))
            .and_then(Value::as_str)
            .or(self.id.as_deref())
    }

    /// Parse a message from a JSON object value.
    ///
    /// # Errors
    ///
    /// Fails if `value` is not an object or lacks a string `@type`.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Parse a message from raw JSON bytes.
    ///
    /// # Errors
    ///
    /// Fails if `bytes` is not a JSON object with a string `@type`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Fails only if a field value cannot be represented as JSON.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
