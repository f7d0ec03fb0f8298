//! HTTP surface of the agent.

use crate::error::AgentError;
use crate::inbound::MessageFilter;
use crate::mailbox::WaitOutcome;
use crate::registry::ConnectionInfo;
use crate::service::{Agent, DebugInfo, NewConnection};
use crate::session::SessionInfo;
use crate::webhook::Webhook;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use echo_common::Message;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

type AppState = Arc<Agent>;

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidSeed(_)
            | Self::InvalidKey(_)
            | Self::InvalidEndpoint { .. }
            | Self::Unpack(_) => StatusCode::BAD_REQUEST,
            Self::ConnectionNotFound(_) | Self::UnknownRecipient(_) | Self::SessionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Pack(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Delivery(_) => StatusCode::BAD_GATEWAY,
            Self::MailboxFull(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

/// Turn a wait result into a response: the item, 408 on timeout, 503 on cancel.
fn wait_response<T, R: serde::Serialize>(outcome: WaitOutcome<T>, body: impl FnOnce(T) -> R) -> Response {
    match outcome {
        WaitOutcome::Received(item) => Json(body(item)).into_response(),
        WaitOutcome::Timeout => detail(StatusCode::REQUEST_TIMEOUT, "timed out waiting for message"),
        WaitOutcome::Cancelled => detail(StatusCode::SERVICE_UNAVAILABLE, "wait cancelled"),
    }
}

fn default_wait() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    thid: Option<String>,
    msg_type: Option<String>,
    session_id: Option<String>,
    #[serde(default = "default_wait")]
    wait: bool,
    timeout: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WebhookQuery {
    topic: Option<String>,
    #[serde(default = "default_wait")]
    wait: bool,
    timeout: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TopicQuery {
    topic: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    endpoint: Option<String>,
}

/// Build the agent's router.
pub fn router(agent: AppState, metrics: Option<PrometheusHandle>) -> Router {
    let max_body = agent.config().max_body;
    Router::new()
        // Connections
        .route("/connection", post(new_connection))
        .route("/connection/{id}", delete(delete_connection))
        .route("/connections", get(get_connections))
        // Inbound wire traffic
        .route("/", post(receive_message))
        .route("/message", post(receive_message))
        // Retrieval and sending
        .route("/messages/{id}", get(get_messages))
        .route("/message/{id}", get(get_message).post(send_message))
        // Sessions
        .route("/session/{id}", get(open_session).delete(close_session))
        .route("/message/session/{session_id}", post(send_to_session))
        // Webhooks
        .route("/webhook/{*topic}", post(receive_webhook))
        .route("/webhooks", get(get_webhooks))
        .route("/webhook", get(get_webhook))
        // Introspection
        .route("/debug", get(debug_info))
        .route("/health", get(health))
        .route(
            "/metrics",
            get(move || {
                let h = metrics.clone();
                async move { h.map(|h| h.render()).unwrap_or_default() }
            }),
        )
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
        .with_state(agent)
}

async fn new_connection(
    State(agent): State<AppState>,
    Json(request): Json<NewConnection>,
) -> Result<Json<ConnectionInfo>, AgentError> {
    agent.new_connection(&request).map(Json)
}

async fn delete_connection(
    State(agent): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<String>, AgentError> {
    agent.delete_connection(&id).await.map(Json)
}

async fn get_connections(State(agent): State<AppState>) -> Json<Vec<ConnectionInfo>> {
    Json(agent.list_connections())
}

async fn receive_message(
    State(agent): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, AgentError> {
    agent.receive(&body)?;
    Ok(StatusCode::OK)
}

async fn get_messages(
    State(agent): State<AppState>,
    Path(id): Path<String>,
    Query(filter): Query<MessageFilter>,
) -> Result<Json<Vec<Message>>, AgentError> {
    let items = agent.get_messages(&id, filter)?;
    Ok(Json(items.into_iter().map(|item| item.message).collect()))
}

async fn get_message(
    State(agent): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MessageQuery>,
) -> Result<Response, AgentError> {
    let filter = MessageFilter {
        thid: query.thid,
        msg_type: query.msg_type,
        session_id: query.session_id,
    };
    if !query.wait {
        return Ok(match agent.take_message(&id, filter)? {
            Some(item) => Json(item.message).into_response(),
            None => detail(StatusCode::NOT_FOUND, "no matching message"),
        });
    }
    let timeout = agent.config().wait_duration(query.timeout);
    let outcome = agent.wait_for_message(&id, filter, timeout).await?;
    Ok(wait_response(outcome, |item| item.message))
}

async fn send_message(
    State(agent): State<AppState>,
    Path(id): Path<String>,
    Json(message): Json<Message>,
) -> Result<Json<Message>, AgentError> {
    agent.send_message(&id, message).await.map(Json)
}

async fn open_session(
    State(agent): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionInfo>, AgentError> {
    agent.open_session(&id, query.endpoint).map(Json)
}

async fn close_session(
    State(agent): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<String>, AgentError> {
    agent.close_session(&session_id).await.map(Json)
}

async fn send_to_session(
    State(agent): State<AppState>,
    Path(session_id): Path<String>,
    Json(message): Json<Message>,
) -> Result<Json<Message>, AgentError> {
    agent.send_to_session(&session_id, message).await.map(Json)
}

async fn receive_webhook(
    State(agent): State<AppState>,
    Path(topic): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<StatusCode, AgentError> {
    agent.receive_webhook(topic, payload)?;
    Ok(StatusCode::OK)
}

async fn get_webhooks(
    State(agent): State<AppState>,
    Query(query): Query<TopicQuery>,
) -> Json<Vec<Webhook>> {
    Json(agent.get_webhooks(query.topic))
}

async fn get_webhook(State(agent): State<AppState>, Query(query): Query<WebhookQuery>) -> Response {
    if !query.wait {
        return match agent.take_webhook(query.topic) {
            Some(hook) => Json(hook).into_response(),
            None => detail(StatusCode::NOT_FOUND, "no matching webhook"),
        };
    }
    let timeout = agent.config().wait_duration(query.timeout);
    let outcome = agent.wait_for_webhook(query.topic, timeout).await;
    wait_response(outcome, |hook| hook)
}

async fn debug_info(State(agent): State<AppState>) -> Json<DebugInfo> {
    Json(agent.debug_info())
}

async fn health(State(agent): State<AppState>) -> impl IntoResponse {
    agent.health().respond()
}
