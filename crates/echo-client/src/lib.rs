//! Client for driving an echo agent over its HTTP API.
//!
//! ```no_run
//! # async fn demo() -> Result<(), echo_client::ClientError> {
//! use echo_client::{EchoClient, MessageQuery, NewConnection};
//!
//! let echo = EchoClient::new("http://localhost:3000")?;
//! let conn = echo
//!     .new_connection(&NewConnection {
//!         seed: Some("00000000000000000000000000000000".into()),
//!         endpoint: "http://localhost:3001".into(),
//!         their_vk: "GjZWsBLgZCR18aL468JAT7w9CZRiBnpxUPPgyQxh4voa".into(),
//!     })
//!     .await?;
//! let reply = echo.get_message(&conn.connection_id, &MessageQuery::default()).await?;
//! println!("{}", reply.msg_type);
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod models;

pub use echo_common::Message;
pub use models::{ConnectionInfo, MessageQuery, NewConnection, SessionInfo, Webhook};

use echo_common::types::WIRE_CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Extra time allowed on top of a server-side wait before the request itself times out.
const WAIT_MARGIN: Duration = Duration::from_secs(5);

/// Default wait the agent applies when none is given.
const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Longest server-side wait a request allows for.
const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Request timeout for a server-side wait of `secs`, mirroring how the agent
/// reads the value: non-finite means the default, negative means zero.
fn request_timeout(secs: Option<f64>) -> Duration {
    let wait = match secs {
        Some(secs) if secs.is_finite() => {
            Duration::try_from_secs_f64(secs.max(0.0)).map_or(MAX_WAIT, |d| d.min(MAX_WAIT))
        }
        _ => DEFAULT_WAIT,
    };
    wait.saturating_add(WAIT_MARGIN)
}

/// Errors returned by [`EchoClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The agent answered with a non-success status.
    #[error("{operation} failed with {status}: {detail}")]
    Status {
        /// What the client was doing.
        operation: &'static str,
        /// HTTP status.
        status: StatusCode,
        /// Error detail reported by the agent.
        detail: String,
    },
}

impl ClientError {
    /// HTTP status of a [`ClientError::Status`] error.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status(),
        }
    }

    /// Returns `true` if the agent gave up waiting for a matching message.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.status() == Some(StatusCode::REQUEST_TIMEOUT)
    }
}

/// Interact with a running echo agent.
#[derive(Debug, Clone)]
pub struct EchoClient {
    http: Client,
    base_url: String,
}

impl EchoClient {
    /// Create a client for the agent at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self::with_client(Client::builder().build()?, base_url))
    }

    /// Create a client that reuses an existing `reqwest` client.
    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    /// Base URL of the agent.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
            .unwrap_or(body);
        debug!(status = %status, "{} failed: {}", operation, detail);
        Err(ClientError::Status {
            operation,
            status,
            detail,
        })
    }

    async fn json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        Ok(self.send(operation, request).await?.json().await?)
    }

    /// Create a static connection.
    ///
    /// # Errors
    ///
    /// Fails with a 400 status for a bad seed, key or endpoint.
    pub async fn new_connection(&self, request: &NewConnection) -> Result<ConnectionInfo, ClientError> {
        self.json("new connection", self.http.post(self.url("/connection")).json(request))
            .await
    }

    /// Delete a connection, returning its id.
    ///
    /// # Errors
    ///
    /// Fails with a 404 status for an unknown connection.
    pub async fn delete_connection(&self, connection_id: &str) -> Result<String, ClientError> {
        self.json(
            "delete connection",
            self.http.delete(self.url(&format!("/connection/{connection_id}"))),
        )
        .await
    }

    /// List all connections.
    ///
    /// # Errors
    ///
    /// Fails on transport errors.
    pub async fn get_connections(&self) -> Result<Vec<ConnectionInfo>, ClientError> {
        self.json("get connections", self.http.get(self.url("/connections")))
            .await
    }

    /// Post a packed envelope to the agent as if it came from a counterparty.
    ///
    /// # Errors
    ///
    /// Fails with a 400 status for an undecryptable envelope and 404 when no
    /// connection holds the recipient key.
    pub async fn new_message(&self, packed: Vec<u8>) -> Result<(), ClientError> {
        self.send(
            "deliver message",
            self.http
                .post(self.url("/"))
                .header(reqwest::header::CONTENT_TYPE, WIRE_CONTENT_TYPE)
                .body(packed),
        )
        .await?;
        Ok(())
    }

    /// Remove and return every message received on a connection, optionally
    /// only those from one session.
    ///
    /// # Errors
    ///
    /// Fails with a 404 status for an unknown connection.
    pub async fn get_messages(
        &self,
        connection_id: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<Message>, ClientError> {
        let mut request = self.http.get(self.url(&format!("/messages/{connection_id}")));
        if let Some(session_id) = session_id {
            request = request.query(&[("session_id", session_id)]);
        }
        self.json("get messages", request).await
    }

    /// Retrieve one message matching `query`, waiting for it if asked to.
    ///
    /// # Errors
    ///
    /// Fails with 408 when nothing matched in time (see
    /// [`ClientError::is_timeout`]) and 404 for a non-waiting read that found
    /// nothing.
    pub async fn get_message(
        &self,
        connection_id: &str,
        query: &MessageQuery,
    ) -> Result<Message, ClientError> {
        self.json(
            "get message",
            self.http
                .get(self.url(&format!("/message/{connection_id}")))
                .query(query)
                .timeout(request_timeout(query.timeout)),
        )
        .await
    }

    /// Pack and send `message` to the connection's counterparty, returning
    /// it with its `@id` filled in.
    ///
    /// # Errors
    ///
    /// Fails with a 502 status if the counterparty could not be reached.
    pub async fn send_message(
        &self,
        connection_id: &str,
        message: &Message,
    ) -> Result<Message, ClientError> {
        self.json(
            "send message",
            self.http
                .post(self.url(&format!("/message/{connection_id}")))
                .json(message),
        )
        .await
    }

    /// Open a WebSocket session for a connection.
    ///
    /// # Errors
    ///
    /// Fails with a 400 status when no ws(s) endpoint is available.
    pub async fn open_session(
        &self,
        connection_id: &str,
        endpoint: Option<&str>,
    ) -> Result<SessionInfo, ClientError> {
        let mut request = self.http.get(self.url(&format!("/session/{connection_id}")));
        if let Some(endpoint) = endpoint {
            request = request.query(&[("endpoint", endpoint)]);
        }
        self.json("open session", request).await
    }

    /// Close a session, returning its id.
    ///
    /// # Errors
    ///
    /// Fails with a 404 status for an unknown session.
    pub async fn close_session(&self, session_id: &str) -> Result<String, ClientError> {
        self.json(
            "close session",
            self.http.delete(self.url(&format!("/session/{session_id}"))),
        )
        .await
    }

    /// Send `message` over an open session.
    ///
    /// # Errors
    ///
    /// Fails with a 404 status for an unknown session and 502 if its socket
    /// is not open.
    pub async fn send_message_to_session(
        &self,
        session_id: &str,
        message: &Message,
    ) -> Result<Message, ClientError> {
        self.json(
            "send session message",
            self.http
                .post(self.url(&format!("/message/session/{session_id}")))
                .json(message),
        )
        .await
    }

    /// Post a webhook to the agent.
    ///
    /// # Errors
    ///
    /// Fails on transport errors.
    pub async fn post_webhook(&self, topic: &str, payload: &serde_json::Value) -> Result<(), ClientError> {
        self.send(
            "post webhook",
            self.http.post(self.url(&format!("/webhook/{topic}"))).json(payload),
        )
        .await?;
        Ok(())
    }

    /// Remove and return all received webhooks, optionally for one topic.
    ///
    /// # Errors
    ///
    /// Fails on transport errors.
    pub async fn get_webhooks(&self, topic: Option<&str>) -> Result<Vec<Webhook>, ClientError> {
        let mut request = self.http.get(self.url("/webhooks"));
        if let Some(topic) = topic {
            request = request.query(&[("topic", topic)]);
        }
        self.json("get webhooks", request).await
    }

    /// Wait for a webhook, optionally for one topic.
    ///
    /// # Errors
    ///
    /// Fails with 408 when nothing arrived within `timeout`.
    pub async fn get_webhook(
        &self,
        topic: Option<&str>,
        timeout: Duration,
    ) -> Result<Webhook, ClientError> {
        let mut request = self
            .http
            .get(self.url("/webhook"))
            .query(&[("timeout", timeout.as_secs_f64().to_string())])
            .timeout(timeout.saturating_add(WAIT_MARGIN));
        if let Some(topic) = topic {
            request = request.query(&[("topic", topic)]);
        }
        self.json("get webhook", request).await
    }

    /// Agent state summary.
    ///
    /// # Errors
    ///
    /// Fails on transport errors.
    pub async fn debug_info(&self) -> Result<serde_json::Value, ClientError> {
        self.json("debug info", self.http.get(self.url("/debug"))).await
    }
}
