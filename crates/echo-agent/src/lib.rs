//! Echo agent: a test double for a secure-messaging agent.
//!
//! Holds static connections, unpacks inbound envelopes into per-connection
//! mailboxes and lets a controlling client send messages and wait for
//! specific replies.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// HTTP routes and error-to-status mapping.
pub mod api;
/// Envelope packing and unpacking against held keys.
pub mod codec;
/// CLI argument parsing and agent configuration.
pub mod config;
/// Inbound delivery into mailboxes.
pub mod dispatcher;
/// Error types for agent operations.
pub mod error;
/// Mailbox items and retrieval filters.
pub mod inbound;
/// Selective, blocking message queue.
pub mod mailbox;
/// Prometheus metrics and health state.
pub mod metrics;
/// Connection table keyed by id and recipient key.
pub mod registry;
/// Accept loop and graceful shutdown.
pub mod server;
/// The agent service object.
pub mod service;
/// WebSocket sessions.
pub mod session;
/// Outbound envelope delivery.
pub mod transport;
/// Webhook queue.
pub mod webhook;

pub use error::AgentError;
pub use server::{run, run_with_shutdown};
pub use service::Agent;
