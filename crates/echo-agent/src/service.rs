//! The agent: connection management, outbound sends and selective retrieval.

use crate::codec;
use crate::config::AgentConfig;
use crate::dispatcher::{self, Delivered};
use crate::error::AgentError;
use crate::inbound::{InboundMessage, MessageFilter};
use crate::mailbox::WaitOutcome;
use crate::metrics::{counters, gauges, histograms, HealthState};
use crate::registry::{validate_endpoint, ConnectionInfo, Registry};
use crate::session::{Session, SessionInfo, Sessions};
use crate::transport::{HttpTransport, Transport};
use crate::webhook::{Webhook, WebhookQueue};
use echo_common::Message;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Request body for creating a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConnection {
    /// 32-character seed for a deterministic keypair; random when absent.
    #[serde(default)]
    pub seed: Option<String>,
    /// Counterparty endpoint.
    pub endpoint: String,
    /// Base58 counterparty verkey.
    pub their_vk: String,
}

/// Snapshot of agent state for `/debug`.
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    /// Number of connections.
    pub connections: usize,
    /// Unclaimed inbound messages across all connections.
    pub pending_messages: usize,
    /// Sessions that are connecting or open.
    pub sessions: usize,
    /// Sessions whose socket has closed but that are still tracked.
    pub closed_sessions: usize,
    /// Unclaimed webhooks.
    pub pending_webhooks: usize,
    /// Seconds since the agent started.
    pub uptime_secs: u64,
}

/// Shared agent state, handed to every HTTP handler.
pub struct Agent {
    config: AgentConfig,
    registry: Registry,
    sessions: Sessions,
    webhooks: WebhookQueue,
    transport: Arc<dyn Transport>,
    health: HealthState,
    shutdown: watch::Sender<bool>,
    started: Instant,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Create an agent that delivers through `transport`.
    #[must_use]
    pub fn new(config: AgentConfig, transport: Arc<dyn Transport>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry: Registry::new(config.mailbox_capacity),
            webhooks: WebhookQueue::new(config.mailbox_capacity),
            sessions: Sessions::default(),
            transport,
            health: HealthState::new(),
            shutdown,
            started: Instant::now(),
            config,
        }
    }

    /// Create an agent that delivers over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_http(config: AgentConfig) -> reqwest::Result<Self> {
        let transport = HttpTransport::new(config.send_duration())?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// Runtime configuration.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Connection table.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Readiness flag.
    #[must_use]
    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Completes once [`shutdown`](Self::shutdown) has been called.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown.subscribe();
        async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    }

    // ── Connections ─────────────────────────────────────────────────

    /// Create a static connection.
    ///
    /// # Errors
    ///
    /// See [`Registry::create`].
    pub fn new_connection(&self, request: &NewConnection) -> Result<ConnectionInfo, AgentError> {
        let connection = self.registry.create(
            request.seed.as_deref(),
            &request.their_vk,
            &request.endpoint,
        )?;
        counters::connections_created_total();
        gauges::connections_active(self.registry.len());
        info!(
            connection_id = %connection.info.connection_id,
            verkey = %connection.info.verkey,
            "connection created"
        );
        Ok(connection.info.clone())
    }

    /// Delete a connection, its mailbox and its sessions.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ConnectionNotFound`] for unknown ids.
    pub async fn delete_connection(&self, connection_id: &str) -> Result<String, AgentError> {
        let connection = self.registry.remove(connection_id)?;
        for session in self.sessions.remove_for_connection(connection_id) {
            session.close().await;
        }
        gauges::connections_active(self.registry.len());
        info!(connection_id = %connection_id, "connection deleted");
        Ok(connection.info.connection_id.clone())
    }

    /// All connections.
    #[must_use]
    pub fn list_connections(&self) -> Vec<ConnectionInfo> {
        self.registry.list()
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Deliver an envelope posted to the agent's endpoint.
    ///
    /// # Errors
    ///
    /// See [`dispatcher::dispatch`].
    pub fn receive(&self, bytes: &[u8]) -> Result<Delivered, AgentError> {
        dispatcher::dispatch(&self.registry, bytes, "http")
    }

    /// Wait for a message on `connection_id` matching `filter`.
    ///
    /// Ends early with [`WaitOutcome::Cancelled`] if the connection is
    /// deleted or the agent shuts down.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ConnectionNotFound`] for unknown ids.
    pub async fn wait_for_message(
        &self,
        connection_id: &str,
        filter: MessageFilter,
        timeout: Duration,
    ) -> Result<WaitOutcome<InboundMessage>, AgentError> {
        let connection = self.registry.get(connection_id)?;
        let started = Instant::now();
        let outcome = connection
            .mailbox
            .select_wait_until(filter.into_predicate(), Some(timeout), self.cancelled())
            .await;
        let label = match outcome {
            WaitOutcome::Received(_) => "received",
            WaitOutcome::Timeout => "timeout",
            WaitOutcome::Cancelled => "cancelled",
        };
        histograms::wait_seconds(label, started.elapsed().as_secs_f64());
        debug!(connection_id = %connection_id, outcome = label, "wait finished");
        Ok(outcome)
    }

    /// Take the oldest message matching `filter` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ConnectionNotFound`] for unknown ids.
    pub fn take_message(
        &self,
        connection_id: &str,
        filter: MessageFilter,
    ) -> Result<Option<InboundMessage>, AgentError> {
        let connection = self.registry.get(connection_id)?;
        Ok(connection.mailbox.try_take(&*filter.into_predicate()))
    }

    /// Remove and return every message matching `filter`, oldest first.
    ///
    /// A session criterion here only matches messages that arrived on that
    /// session.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ConnectionNotFound`] for unknown ids.
    pub fn get_messages(
        &self,
        connection_id: &str,
        filter: MessageFilter,
    ) -> Result<Vec<InboundMessage>, AgentError> {
        let connection = self.registry.get(connection_id)?;
        Ok(connection.mailbox.drain(&*filter.into_strict_predicate()))
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Pack `message` for the counterparty and POST it to their endpoint.
    ///
    /// A message without `@id` is given one. If the counterparty answers with
    /// a body, it is treated as an envelope on the return route and delivered
    /// like any other inbound message. Sends are not retried.
    ///
    /// # Errors
    ///
    /// [`AgentError::ConnectionNotFound`], [`AgentError::Pack`] or
    /// [`AgentError::Delivery`].
    pub async fn send_message(
        &self,
        connection_id: &str,
        mut message: Message,
    ) -> Result<Message, AgentError> {
        let connection = self.registry.get(connection_id)?;
        message.ensure_id();
        let packed = codec::pack(&connection, &message)?;

        let response = self
            .transport
            .deliver(&connection.info.endpoint, packed)
            .await
            .inspect_err(|e| counters::messages_rejected_total(e.reason()))?;
        counters::messages_sent_total("http");
        debug!(
            connection_id = %connection_id,
            msg_type = %message.msg_type,
            "message sent to {}",
            connection.info.endpoint
        );

        if !response.is_empty() {
            if let Err(e) = dispatcher::dispatch(&self.registry, &response, "return_route") {
                warn!(connection_id = %connection_id, error = %e, "return route response not delivered");
            }
        }
        Ok(message)
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Open a WebSocket session for `connection_id`.
    ///
    /// Uses `endpoint` when given, otherwise the connection's own endpoint,
    /// which must then be a ws(s) URL. Sessions whose socket has already
    /// closed stop being tracked.
    ///
    /// # Errors
    ///
    /// [`AgentError::ConnectionNotFound`] or [`AgentError::InvalidEndpoint`].
    pub fn open_session(
        &self,
        connection_id: &str,
        endpoint: Option<String>,
    ) -> Result<SessionInfo, AgentError> {
        let connection = self.registry.get(connection_id)?;
        let endpoint = endpoint.unwrap_or_else(|| connection.info.endpoint.clone());
        let url = validate_endpoint(&endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(AgentError::InvalidEndpoint {
                endpoint,
                reason: "sessions need a ws or wss endpoint".to_string(),
            });
        }
        let pruned = self.sessions.prune_closed();
        if pruned > 0 {
            debug!("dropped {} closed sessions", pruned);
        }
        let session = Session::open(connection, endpoint);
        let info = session.info.clone();
        self.sessions.insert(session);
        info!(session_id = %info.session_id, connection_id = %connection_id, "session opened");
        Ok(info)
    }

    /// Close a session.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::SessionNotFound`] for unknown ids.
    pub async fn close_session(&self, session_id: &str) -> Result<String, AgentError> {
        let session = self.sessions.remove(session_id)?;
        session.close().await;
        info!(session_id = %session_id, "session closed");
        Ok(session.info.session_id.clone())
    }

    /// Pack `message` and send it over a session, waiting for the socket to open.
    ///
    /// # Errors
    ///
    /// [`AgentError::SessionNotFound`], [`AgentError::Pack`] or
    /// [`AgentError::Delivery`] if the socket is not open.
    pub async fn send_to_session(
        &self,
        session_id: &str,
        mut message: Message,
    ) -> Result<Message, AgentError> {
        let session = self.sessions.get(session_id)?;
        message.ensure_id();
        let packed = codec::pack(session.connection(), &message)?;
        session.send(packed).await?;
        counters::messages_sent_total("session");
        debug!(session_id = %session_id, msg_type = %message.msg_type, "message sent on session");
        Ok(message)
    }

    // ── Webhooks ────────────────────────────────────────────────────

    /// Store a webhook.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MailboxFull`] when the queue is at capacity.
    pub fn receive_webhook(
        &self,
        topic: String,
        payload: serde_json::Value,
    ) -> Result<(), AgentError> {
        debug!(topic = %topic, "webhook received");
        self.webhooks.receive(topic, payload)?;
        counters::webhooks_received_total();
        Ok(())
    }

    /// Remove and return all webhooks, optionally only those for `topic`.
    #[must_use]
    pub fn get_webhooks(&self, topic: Option<String>) -> Vec<Webhook> {
        self.webhooks.drain(topic)
    }

    /// Take the oldest webhook for `topic` without waiting.
    #[must_use]
    pub fn take_webhook(&self, topic: Option<String>) -> Option<Webhook> {
        self.webhooks.try_take(topic)
    }

    /// Wait for a webhook for `topic`.
    pub async fn wait_for_webhook(
        &self,
        topic: Option<String>,
        timeout: Duration,
    ) -> WaitOutcome<Webhook> {
        self.webhooks.wait(topic, timeout, self.cancelled()).await
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Current state summary.
    #[must_use]
    pub fn debug_info(&self) -> DebugInfo {
        let closed_sessions = self.sessions.closed();
        DebugInfo {
            connections: self.registry.len(),
            pending_messages: self.registry.pending_messages(),
            sessions: self.sessions.len().saturating_sub(closed_sessions),
            closed_sessions,
            pending_webhooks: self.webhooks.len(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Stop serving: mark unready, end every pending wait and close sessions.
    pub async fn shutdown(&self) {
        self.health.set_ready(false);
        self.shutdown.send_replace(true);
        let sessions = self.sessions.remove_all();
        if !sessions.is_empty() {
            info!("closing {} sessions", sessions.len());
        }
        for session in sessions {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use echo_common::{base58, keys};
    use std::sync::Mutex;

    /// Records deliveries and answers with a canned body.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
        reply: Mutex<Option<Vec<u8>>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn deliver(&self, endpoint: &str, packed: Vec<u8>) -> Result<Vec<u8>, AgentError> {
            if self.fail {
                return Err(AgentError::Delivery("refused".into()));
            }
            self.sent.lock().unwrap().push((endpoint.to_string(), packed));
            Ok(self.reply.lock().unwrap().take().unwrap_or_default())
        }
    }

    fn agent_with(transport: Arc<RecordingTransport>) -> Agent {
        Agent::new(AgentConfig::default(), transport)
    }

    fn request(their_vk: String) -> NewConnection {
        NewConnection {
            seed: None,
            endpoint: "http://peer.example/inbox".to_string(),
            their_vk,
        }
    }

    fn random_vk() -> String {
        base58::encode(keys::generate_keypair().verifying_key().as_bytes())
    }

    #[tokio::test]
    async fn connection_lifecycle() {
        let agent = agent_with(Arc::default());
        let info = agent.new_connection(&request(random_vk())).unwrap();
        assert_eq!(agent.list_connections(), vec![info.clone()]);

        assert_eq!(
            agent.delete_connection(&info.connection_id).await.unwrap(),
            info.connection_id
        );
        assert!(agent.list_connections().is_empty());
        assert!(matches!(
            agent.delete_connection(&info.connection_id).await,
            Err(AgentError::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn send_packs_for_counterparty() {
        let transport = Arc::new(RecordingTransport::default());
        let agent = agent_with(transport.clone());
        let their_sk = keys::generate_keypair();
        let their_vk = base58::encode(their_sk.verifying_key().as_bytes());
        let info = agent.new_connection(&request(their_vk)).unwrap();

        let sent = agent
            .send_message(&info.connection_id, Message::new("https://didcomm.org/trust_ping/1.0/ping"))
            .await
            .unwrap();
        assert!(sent.id.is_some());

        let (endpoint, packed) = transport.sent.lock().unwrap().pop().unwrap();
        assert_eq!(endpoint, "http://peer.example/inbox");
        let opened = echo_common::envelope::unpack(&their_sk, &packed).unwrap();
        assert_eq!(Message::from_slice(&opened.plaintext).unwrap(), sent);
        assert_eq!(base58::encode(&opened.sender), info.verkey);
    }

    #[tokio::test]
    async fn send_failure_is_a_delivery_error() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let agent = agent_with(transport);
        let info = agent.new_connection(&request(random_vk())).unwrap();

        let err = agent
            .send_message(&info.connection_id, Message::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Delivery(_)));
    }

    #[tokio::test]
    async fn return_route_response_is_delivered() {
        let transport = Arc::new(RecordingTransport::default());
        let agent = agent_with(transport.clone());
        let their_sk = keys::keypair_from_seed(&[3u8; 32]).unwrap();
        let info = agent
            .new_connection(&request(base58::encode(their_sk.verifying_key().as_bytes())))
            .unwrap();

        let our_vk = keys::parse_verkey(&info.verkey).unwrap();
        let reply = Message::new("https://didcomm.org/trust_ping/1.0/ping_response");
        let packed_reply =
            echo_common::envelope::pack(&their_sk, &our_vk, &reply.to_vec().unwrap()).unwrap();
        *transport.reply.lock().unwrap() = Some(packed_reply);

        agent
            .send_message(&info.connection_id, Message::new("https://didcomm.org/trust_ping/1.0/ping"))
            .await
            .unwrap();

        let got = agent
            .take_message(&info.connection_id, MessageFilter::default())
            .unwrap()
            .unwrap();
        assert_eq!(got.message, reply);
    }

    #[tokio::test]
    async fn wait_is_cancelled_by_shutdown() {
        let agent = Arc::new(agent_with(Arc::default()));
        let info = agent.new_connection(&request(random_vk())).unwrap();

        let waiter = tokio::spawn({
            let agent = agent.clone();
            let id = info.connection_id.clone();
            async move {
                agent
                    .wait_for_message(&id, MessageFilter::default(), Duration::from_secs(30))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        agent.shutdown().await;

        assert_eq!(waiter.await.unwrap().unwrap(), WaitOutcome::Cancelled);
        assert!(!agent.health().is_ready());
    }

    #[tokio::test]
    async fn delete_cancels_pending_wait() {
        let agent = Arc::new(agent_with(Arc::default()));
        let info = agent.new_connection(&request(random_vk())).unwrap();

        let waiter = tokio::spawn({
            let agent = agent.clone();
            let id = info.connection_id.clone();
            async move {
                agent
                    .wait_for_message(&id, MessageFilter::default(), Duration::from_secs(30))
                    .await
            }
        });
        let connection = agent.registry().get(&info.connection_id).unwrap();
        while connection.mailbox.waiters() == 0 {
            tokio::task::yield_now().await;
        }
        agent.delete_connection(&info.connection_id).await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), WaitOutcome::Cancelled);
    }

    #[test]
    fn sessions_require_socket_endpoint() {
        let agent = agent_with(Arc::default());
        let info = agent.new_connection(&request(random_vk())).unwrap();
        let err = agent.open_session(&info.connection_id, None).unwrap_err();
        assert!(matches!(err, AgentError::InvalidEndpoint { .. }));
        assert!(matches!(
            agent.open_session("missing", Some("ws://localhost:1".into())),
            Err(AgentError::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let agent = agent_with(Arc::default());
        assert!(matches!(
            agent.send_to_session("nope", Message::new("t")).await,
            Err(AgentError::SessionNotFound(_))
        ));
        assert!(matches!(
            agent.close_session("nope").await,
            Err(AgentError::SessionNotFound(_))
        ));
    }
}
