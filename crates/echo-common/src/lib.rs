//! Common types and utilities shared by the echo agent and its client.
//!
//! This crate provides:
//! - Base58 encoding of verification keys and DIDs ([`base58`])
//! - Ed25519 key derivation from seeds ([`keys`])
//! - Authenticated envelope packing and unpacking ([`envelope`])
//! - The open, `@type`-tagged agent message ([`message`])
//! - Protocol constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod base58;
pub mod envelope;
pub mod keys;
pub mod message;
pub mod types;

pub use envelope::EnvelopeError;
pub use message::Message;
pub use types::Verkey;
