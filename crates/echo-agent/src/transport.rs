//! Outbound delivery of packed envelopes.

use crate::error::AgentError;
use async_trait::async_trait;
use echo_common::types::WIRE_CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Delivers packed envelopes to a counterparty endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// POST `packed` to `endpoint`.
    ///
    /// Returns the response body, which is empty unless the counterparty
    /// answered on the return route.
    async fn deliver(&self, endpoint: &str, packed: Vec<u8>) -> Result<Vec<u8>, AgentError>;
}

/// [`Transport`] over HTTP(S).
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    /// Build a transport whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            http: Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .timeout(timeout)
                .build()?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, endpoint: &str, packed: Vec<u8>) -> Result<Vec<u8>, AgentError> {
        let resp = self
            .http
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, WIRE_CONTENT_TYPE)
            .body(packed)
            .send()
            .await
            .map_err(|e| AgentError::Delivery(format!("POST {endpoint}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AgentError::Delivery(format!(
                "POST {endpoint} returned {status}"
            )));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| AgentError::Delivery(format!("reading response from {endpoint}: {e}")))?;
        debug!(status = %status, bytes = body.len(), "delivered to {}", endpoint);
        Ok(body.to_vec())
    }
}
