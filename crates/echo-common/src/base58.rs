//! Base58 encoding and decoding of verification keys and DIDs.
//!
//! Wraps the `bs58` crate with helpers for the Ed25519 verkeys exchanged
//! between agents and for the short DIDs derived from them.

use crate::types::Verkey;
use thiserror::Error;

pub use bs58::decode::Error as DecodeError;

/// Errors that can occur when decoding a Base58-encoded verkey.
///
/// # Examples
///
/// ```
/// use echo_common::base58;
/// let short = base58::encode(&[1u8; 16]);
/// assert!(base58::decode_verkey(&short).is_err());
/// ```
#[derive(Debug, Error)]
pub enum VerkeyDecodeError {
    /// The input is not valid Base58.
    #[error("invalid base58: {0}")]
    Base58(#[from] DecodeError),
    /// The decoded bytes are not exactly 32 bytes.
    #[error("verkey must be exactly 32 bytes, got {0}")]
    WrongLength(usize),
}

/// Encodes raw bytes to a Base58 string.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

/// Decodes a Base58 string to raw bytes.
///
/// # Errors
///
/// Returns `DecodeError` if the input is not valid Base58.
pub fn decode(s: &str) -> Result<Vec<u8>, DecodeError> {
    bs58::decode(s).into_vec()
}

/// Decodes a Base58 string to a 32-byte verkey.
///
/// # Errors
///
/// Returns [`VerkeyDecodeError`] if the input is not valid Base58
/// or does not decode to exactly 32 bytes.
///
/// # Examples
///
/// ```
/// let verkey = [0x42u8; 32];
/// let encoded = echo_common::base58::encode(&verkey);
/// assert_eq!(echo_common::base58::decode_verkey(&encoded).unwrap(), verkey);
/// ```
pub fn decode_verkey(s: &str) -> Result<Verkey, VerkeyDecodeError> {
    let bytes = decode(s)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_: Vec<u8>| VerkeyDecodeError::WrongLength(len))
}

/// Derives the unqualified DID for a verkey: Base58 of its first 16 bytes.
#[must_use]
pub fn did_from_verkey(verkey: &Verkey) -> String {
    encode(&verkey[..16])
}
