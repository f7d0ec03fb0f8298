//! Long-lived WebSocket sessions to a counterparty.
//!
//! A session owns one socket. Binary (and text) frames read from it are
//! unpacked with the session's connection key and delivered to that
//! connection's mailbox tagged with the session id. Outbound messages are
//! packed and written as binary frames; senders wait for the socket to open.

use crate::dispatcher;
use crate::error::AgentError;
use crate::registry::Connection;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

const OUTBOUND_QUEUE: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Identifies an open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session id.
    pub session_id: String,
    /// Connection the session belongs to.
    pub connection_id: String,
}

/// Socket lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake in progress.
    Connecting,
    /// Frames can be sent.
    Open,
    /// Socket closed or never opened.
    Closed,
}

enum Outbound {
    Frame(Vec<u8>),
    Close,
}

/// One WebSocket session.
pub struct Session {
    /// Public description.
    pub info: SessionInfo,
    endpoint: String,
    connection: Arc<Connection>,
    state: watch::Receiver<SessionState>,
    outbound: mpsc::Sender<Outbound>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("info", &self.info)
            .field("endpoint", &self.endpoint)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Start connecting to `endpoint` in the background.
    #[must_use]
    pub fn open(connection: Arc<Connection>, endpoint: String) -> Arc<Self> {
        let info = SessionInfo {
            session_id: uuid::Uuid::new_v4().to_string(),
            connection_id: connection.info.connection_id.clone(),
        };
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);

        let session = Arc::new(Self {
            info,
            endpoint,
            connection,
            state: state_rx,
            outbound: outbound_tx,
            task: Mutex::new(None),
        });

        let handle = tokio::spawn(run_socket(
            session.connection.clone(),
            session.info.session_id.clone(),
            session.endpoint.clone(),
            state_tx,
            outbound_rx,
        ));
        if let Ok(mut task) = session.task.lock() {
            *task = Some(handle);
        }
        session
    }

    /// Current socket state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// The connection this session belongs to.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Write packed bytes as one binary frame, waiting for the socket to open.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Delivery`] if the socket failed to open or has closed.
    pub async fn send(&self, packed: Vec<u8>) -> Result<(), AgentError> {
        let mut state = self.state.clone();
        let opened = state
            .wait_for(|s| *s != SessionState::Connecting)
            .await
            .map(|s| *s == SessionState::Open)
            .unwrap_or(false);
        if !opened {
            return Err(AgentError::Delivery(format!(
                "session {} is not open",
                self.info.session_id
            )));
        }
        self.outbound
            .send(Outbound::Frame(packed))
            .await
            .map_err(|_| AgentError::Delivery(format!("session {} closed", self.info.session_id)))
    }

    /// Close the socket and stop the session task.
    pub async fn close(&self) {
        let _ = self.outbound.try_send(Outbound::Close);
        let handle = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut handle) = handle {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }
}

async fn run_socket(
    connection: Arc<Connection>,
    session_id: String,
    endpoint: String,
    state_tx: watch::Sender<SessionState>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) {
    debug!(session_id = %session_id, "connecting session to {}", endpoint);
    let ws = match tokio_tungstenite::connect_async(endpoint.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "session connect to {} failed", endpoint);
            state_tx.send_replace(SessionState::Closed);
            return;
        }
    };
    info!(session_id = %session_id, "session connected to {}", endpoint);
    state_tx.send_replace(SessionState::Open);
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(WsMessage::Binary(data))) => {
                        let _ = dispatcher::dispatch_to(connection.clone(), &data, &session_id);
                    }
                    Some(Ok(WsMessage::Text(text))) => {
                        let _ = dispatcher::dispatch_to(connection.clone(), text.as_bytes(), &session_id);
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if ws_tx.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "session socket error");
                        break;
                    }
                }
            }
            cmd = outbound_rx.recv() => {
                match cmd {
                    Some(Outbound::Frame(bytes)) => {
                        if let Err(e) = ws_tx.send(WsMessage::Binary(bytes)).await {
                            warn!(session_id = %session_id, error = %e, "session send failed");
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    state_tx.send_replace(SessionState::Closed);
    debug!(session_id = %session_id, "session closed");
}

/// Open sessions by id.
#[derive(Debug, Default)]
pub struct Sessions {
    sessions: DashMap<String, Arc<Session>>,
}

impl Sessions {
    /// Track a newly opened session.
    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.info.session_id.clone(), session);
    }

    /// Look up a session.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::SessionNotFound`] for unknown ids.
    pub fn get(&self, session_id: &str) -> Result<Arc<Session>, AgentError> {
        self.sessions
            .get(session_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))
    }

    /// Stop tracking a session and return it.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::SessionNotFound`] for unknown ids.
    pub fn remove(&self, session_id: &str) -> Result<Arc<Session>, AgentError> {
        self.sessions
            .remove(session_id)
            .map(|(_, session)| session)
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))
    }

    /// Remove and return every session belonging to `connection_id`.
    pub fn remove_for_connection(&self, connection_id: &str) -> Vec<Arc<Session>> {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.value().info.connection_id == connection_id)
            .map(|e| e.key().clone())
            .collect();
        ids.iter()
            .filter_map(|id| self.sessions.remove(id).map(|(_, s)| s))
            .collect()
    }

    /// Remove and return every session.
    pub fn remove_all(&self) -> Vec<Arc<Session>> {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter_map(|id| self.sessions.remove(id).map(|(_, s)| s))
            .collect()
    }

    /// Number of tracked sessions whose socket has closed.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.sessions
            .iter()
            .filter(|e| e.value().state() == SessionState::Closed)
            .count()
    }

    /// Stop tracking sessions whose socket has closed, returning how many went.
    pub fn prune_closed(&self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.state() != SessionState::Closed);
        before.saturating_sub(self.sessions.len())
    }

    /// Number of tracked sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no sessions are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
