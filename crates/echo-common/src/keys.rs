//! Ed25519 key material for connections.
//!
//! A connection's own keypair is either derived deterministically from a
//! 32-byte seed or generated from OS randomness. Counterparty keys arrive as
//! Base58 strings and are validated as curve points before use.

use crate::base58::{self, VerkeyDecodeError};
use crate::types::{Verkey, SEED_LEN};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

/// Errors from key derivation and verkey parsing.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The seed does not have the length the derivation expects.
    #[error("seed must be exactly {SEED_LEN} bytes, got {0}")]
    InvalidSeed(usize),
    /// The verkey string could not be decoded.
    #[error("invalid verkey: {0}")]
    Decode(#[from] VerkeyDecodeError),
    /// The decoded bytes are not a valid Ed25519 point.
    #[error("invalid verkey: {0}")]
    NotOnCurve(#[from] ed25519_dalek::SignatureError),
}

/// Derive a signing key from a caller-supplied seed.
///
/// The same seed always yields the same keypair.
///
/// # Errors
///
/// Returns [`KeyError::InvalidSeed`] if `seed` is not exactly 32 bytes.
///
/// # Examples
///
/// ```
/// let a = echo_common::keys::keypair_from_seed(&[0u8; 32]).unwrap();
/// let b = echo_common::keys::keypair_from_seed(&[0u8; 32]).unwrap();
/// assert_eq!(a.verifying_key(), b.verifying_key());
/// ```
pub fn keypair_from_seed(seed: &[u8]) -> Result<SigningKey, KeyError> {
    let seed: [u8; SEED_LEN] = seed
        .try_into()
        .map_err(|_| KeyError::InvalidSeed(seed.len()))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Generate a fresh Ed25519 keypair using OS randomness.
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Parse a Base58 verkey and check that it is a usable Ed25519 point.
///
/// # Errors
///
/// Returns [`KeyError`] if the string is not Base58, is not 32 bytes long,
/// or does not decode to a valid point.
pub fn parse_verkey(s: &str) -> Result<Verkey, KeyError> {
    let bytes = base58::decode_verkey(s)?;
    VerifyingKey::from_bytes(&bytes)?;
    Ok(bytes)
}
