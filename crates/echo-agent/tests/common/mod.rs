#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::{get, post};
use echo_agent::config::AgentConfig;
use echo_agent::Agent;
use echo_client::EchoClient;
use echo_common::{base58, envelope, keys, Message};
use ed25519_dalek::SigningKey;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

pub const ZERO_SEED: &str = "00000000000000000000000000000000";

pub fn test_config(listen: SocketAddr) -> AgentConfig {
    AgentConfig {
        listen,
        wait_timeout: 5.0,
        max_wait_timeout: 30.0,
        max_body: 1_048_576,
        mailbox_capacity: 0,
        send_timeout: 5,
    }
}

pub fn verkey_of(key: &SigningKey) -> String {
    base58::encode(key.verifying_key().as_bytes())
}

pub fn seeded_verkey(seed: &str) -> String {
    verkey_of(&keys::keypair_from_seed(seed.as_bytes()).unwrap())
}

async fn spawn_agent(config: AgentConfig, listener: TcpListener) -> Arc<Agent> {
    let agent = Arc::new(Agent::with_http(config).unwrap());
    let agent_clone = agent.clone();
    tokio::spawn(async move {
        if let Err(e) = echo_agent::run(listener, agent_clone).await {
            eprintln!("agent error in test: {e}");
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    agent
}

pub async fn start_agent() -> (SocketAddr, Arc<Agent>, EchoClient) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let agent = spawn_agent(test_config(addr), listener).await;
    (addr, agent, EchoClient::new(format!("http://{addr}")).unwrap())
}

pub async fn start_agent_with_capacity(capacity: usize) -> (SocketAddr, Arc<Agent>, EchoClient) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = test_config(addr);
    config.mailbox_capacity = capacity;
    let agent = spawn_agent(config, listener).await;
    (addr, agent, EchoClient::new(format!("http://{addr}")).unwrap())
}

/// Agent whose server stops when the returned sender fires.
pub async fn start_agent_with_shutdown() -> (SocketAddr, EchoClient, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let agent = Arc::new(Agent::with_http(test_config(addr)).unwrap());
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let shutdown = async {
            let _ = rx.await;
        };
        if let Err(e) = echo_agent::run_with_shutdown(listener, agent, shutdown).await {
            eprintln!("agent error in test: {e}");
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, EchoClient::new(format!("http://{addr}")).unwrap(), tx)
}

/// Port with nothing listening on it.
pub fn dead_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/")
}

/// The remote party of a connection: holds its own key, collects the
/// envelopes the agent posts to it and can answer on the return route.
pub struct Counterparty {
    pub addr: SocketAddr,
    pub key: SigningKey,
    inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    reply: Arc<Mutex<Option<Vec<u8>>>>,
}

type CounterpartyState = (mpsc::UnboundedSender<Vec<u8>>, Arc<Mutex<Option<Vec<u8>>>>);

async fn counterparty_inbox(
    State((tx, reply)): State<CounterpartyState>,
    body: Bytes,
) -> Vec<u8> {
    let _ = tx.send(body.to_vec());
    reply.lock().unwrap().take().unwrap_or_default()
}

impl Counterparty {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, inbox) = mpsc::unbounded_channel();
        let reply = Arc::new(Mutex::new(None));
        let app = axum::Router::new()
            .route("/", post(counterparty_inbox))
            .with_state((tx, reply.clone()));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            addr,
            key: keys::generate_keypair(),
            inbox,
            reply,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn verkey(&self) -> String {
        verkey_of(&self.key)
    }

    /// Pack `message` from this party to the agent-side key `recipient`.
    pub fn pack_for(&self, recipient: &str, message: &Message) -> Vec<u8> {
        let recipient = keys::parse_verkey(recipient).unwrap();
        envelope::pack(&self.key, &recipient, &message.to_vec().unwrap()).unwrap()
    }

    /// Answer the next delivery with `body`.
    pub fn reply_with(&self, body: Vec<u8>) {
        *self.reply.lock().unwrap() = Some(body);
    }

    /// Next message the agent delivered, with its sender verkey.
    pub async fn recv(&mut self) -> (Message, String) {
        let packed = tokio::time::timeout(Duration::from_secs(5), self.inbox.recv())
            .await
            .expect("timeout waiting for delivery")
            .unwrap();
        let opened = envelope::unpack(&self.key, &packed).unwrap();
        (
            Message::from_slice(&opened.plaintext).unwrap(),
            base58::encode(&opened.sender),
        )
    }
}

/// A WebSocket peer that answers every message with a `pong` on the same thread.
pub struct SocketPeer {
    pub addr: SocketAddr,
    pub key: SigningKey,
}

pub const PONG_TYPE: &str = "https://didcomm.org/trust_ping/1.0/ping_response";

async fn socket_peer_upgrade(
    State(key): State<Arc<SigningKey>>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| socket_peer_loop(socket, key))
}

async fn socket_peer_loop(mut socket: WebSocket, key: Arc<SigningKey>) {
    while let Some(Ok(frame)) = socket.recv().await {
        let WsMessage::Binary(data) = frame else {
            continue;
        };
        let opened = envelope::unpack(&key, &data).unwrap();
        let ping = Message::from_slice(&opened.plaintext).unwrap();
        let mut pong = Message::new(PONG_TYPE);
        pong.fields.insert(
            "~thread".into(),
            serde_json::json!({ "thid": ping.id.clone().unwrap_or_default() }),
        );
        let packed = envelope::pack(&key, &opened.sender, &pong.to_vec().unwrap()).unwrap();
        if socket.send(WsMessage::Binary(packed.into())).await.is_err() {
            break;
        }
    }
}

impl SocketPeer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let key = keys::generate_keypair();
        let app = axum::Router::new()
            .route("/ws", get(socket_peer_upgrade))
            .with_state(Arc::new(key.clone()));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, key }
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn verkey(&self) -> String {
        verkey_of(&self.key)
    }
}
