//! Stateless per-message envelope encryption (HPKE Auth mode, RFC 9180).
//!
//! Every envelope is independently sealed/opened. The sender authenticates
//! itself with its Ed25519 keypair converted to X25519 for the HPKE Auth
//! operation mode, so a successful open proves both who sent the envelope and
//! that it was addressed to the recipient key that opened it.
//!
//! Ciphersuite: X25519-HKDF-SHA256 / HKDF-SHA256 / ChaCha20Poly1305
//!
//! The sealed bytes travel inside a small JSON envelope that names the
//! recipient and sender verkeys in Base58 so the receiving agent can pick the
//! right key before attempting to open it.

use crate::base58;
use crate::types::{Verkey, ENVELOPE_ALG, ENVELOPE_TYP};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hpke::aead::ChaCha20Poly1305;
use hpke::kdf::HkdfSha256;
use hpke::kem::X25519HkdfSha256;
use hpke::{Deserializable, Kem as KemTrait, Serializable};
use rand_core::TryRngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

type Kem = X25519HkdfSha256;

/// Size of the encapsulated key for X25519 (32 bytes).
const ENCAPPED_KEY_LEN: usize = 32;

/// Size of the ChaCha20Poly1305 tag.
const TAG_LEN: usize = 16;

/// Info string bound to this envelope version.
const INFO: &[u8] = b"echo-envelope-v1";

/// Prefix byte of the sealed payload.
pub const SEALED_PREFIX: u8 = 0x04;

/// Errors from envelope packing and unpacking.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// HPKE operation failed (including authentication failure on open).
    #[error("hpke: {0}")]
    Hpke(#[from] hpke::HpkeError),
    /// A key is not a valid Ed25519 curve point.
    #[error("invalid ed25519 key: {0}")]
    InvalidKey(#[from] ed25519_dalek::SignatureError),
    /// The envelope JSON is not well formed.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    /// The envelope structure or sealed payload is malformed.
    #[error("malformed envelope: {0}")]
    Malformed(&'static str),
    /// The envelope is addressed to a key this party does not hold.
    #[error("envelope addressed to unknown recipient {0}")]
    UnknownRecipient(String),
}

/// JSON wire form of a packed envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope media type.
    pub typ: String,
    /// Ciphersuite identifier.
    pub alg: String,
    /// Base58 verkey of the recipient.
    pub recipient: String,
    /// Base58 verkey of the sender.
    pub sender: String,
    /// Base64 sealed payload: `[0x04 | encapped_key (32B) | ciphertext+tag]`.
    pub ciphertext: String,
}

impl Envelope {
    /// Parse envelope JSON without opening it.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] if the bytes are not an envelope of a known type.
    pub fn parse(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self = serde_json::from_slice(bytes)?;
        if envelope.typ != ENVELOPE_TYP {
            return Err(EnvelopeError::Malformed("unsupported envelope typ"));
        }
        if envelope.alg != ENVELOPE_ALG {
            return Err(EnvelopeError::Malformed("unsupported envelope alg"));
        }
        Ok(envelope)
    }

    /// Decoded recipient verkey.
    ///
    /// # Errors
    ///
    /// Fails if the `recipient` header is not a Base58 32-byte key.
    pub fn recipient_key(&self) -> Result<Verkey, EnvelopeError> {
        base58::decode_verkey(&self.recipient)
            .map_err(|_| EnvelopeError::Malformed("recipient is not a verkey"))
    }

    /// Decoded sender verkey.
    ///
    /// # Errors
    ///
    /// Fails if the `sender` header is not a Base58 32-byte key.
    pub fn sender_key(&self) -> Result<Verkey, EnvelopeError> {
        base58::decode_verkey(&self.sender)
            .map_err(|_| EnvelopeError::Malformed("sender is not a verkey"))
    }

    fn aad(&self) -> Vec<u8> {
        format!("{}|{}|{}", self.typ, self.recipient, self.sender).into_bytes()
    }
}

/// Result of opening an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    /// Decrypted plaintext.
    pub plaintext: Vec<u8>,
    /// Authenticated sender verkey.
    pub sender: Verkey,
    /// Recipient verkey the envelope was opened with.
    pub recipient: Verkey,
}

/// Convert an Ed25519 `SigningKey` into an HPKE X25519 keypair.
fn ed25519_to_hpke_keypair(
    sk: &ed25519_dalek::SigningKey,
) -> Result<(<Kem as KemTrait>::PrivateKey, <Kem as KemTrait>::PublicKey), EnvelopeError> {
    let x_priv_bytes = Zeroizing::new(sk.to_scalar_bytes());
    let x_pub_bytes = sk.verifying_key().to_montgomery().to_bytes();
    let priv_key = <Kem as KemTrait>::PrivateKey::from_bytes(x_priv_bytes.as_ref())?;
    let pub_key = <Kem as KemTrait>::PublicKey::from_bytes(&x_pub_bytes)?;
    Ok((priv_key, pub_key))
}

/// Convert an Ed25519 verkey into an HPKE X25519 public key.
fn ed25519_pub_to_hpke(pub_bytes: &Verkey) -> Result<<Kem as KemTrait>::PublicKey, EnvelopeError> {
    let vk = ed25519_dalek::VerifyingKey::from_bytes(pub_bytes)?;
    let x_pub = vk.to_montgomery().to_bytes();
    Ok(<Kem as KemTrait>::PublicKey::from_bytes(&x_pub)?)
}

/// Seal `plaintext` from `sender_sk` to `recipient` and wrap it in an envelope.
///
/// Returns the envelope as JSON bytes, ready to be posted to an endpoint.
///
/// # Errors
///
/// Returns [`EnvelopeError`] if key conversion or encryption fails.
pub fn pack(
    sender_sk: &ed25519_dalek::SigningKey,
    recipient: &Verkey,
    plaintext: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    let (sender_priv, sender_pub) = ed25519_to_hpke_keypair(sender_sk)?;
    let recipient_pk = ed25519_pub_to_hpke(recipient)?;

    let mut envelope = Envelope {
        typ: ENVELOPE_TYP.to_string(),
        alg: ENVELOPE_ALG.to_string(),
        recipient: base58::encode(recipient),
        sender: base58::encode(sender_sk.verifying_key().as_bytes()),
        ciphertext: String::new(),
    };

    let (encapped_key, ciphertext) = hpke::single_shot_seal::<ChaCha20Poly1305, HkdfSha256, Kem, _>(
        &hpke::OpModeS::Auth((sender_priv, sender_pub)),
        &recipient_pk,
        INFO,
        plaintext,
        &envelope.aad(),
        &mut rand_core::OsRng.unwrap_err(),
    )?;

    let enc_bytes = encapped_key.to_bytes();
    let mut sealed = Vec::with_capacity(1 + enc_bytes.len() + ciphertext.len());
    sealed.push(SEALED_PREFIX);
    sealed.extend_from_slice(&enc_bytes);
    sealed.extend_from_slice(&ciphertext);
    envelope.ciphertext = BASE64.encode(sealed);

    Ok(serde_json::to_vec(&envelope)?)
}

/// Open a parsed envelope with the recipient's signing key.
///
/// # Errors
///
/// Returns [`EnvelopeError`] if `recipient_sk` does not match the envelope's
/// recipient, the payload is malformed, or decryption/authentication fails.
pub fn open(
    recipient_sk: &ed25519_dalek::SigningKey,
    envelope: &Envelope,
) -> Result<Opened, EnvelopeError> {
    let recipient = envelope.recipient_key()?;
    if recipient != recipient_sk.verifying_key().to_bytes() {
        return Err(EnvelopeError::UnknownRecipient(envelope.recipient.clone()));
    }
    let sender = envelope.sender_key()?;

    let sealed = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|_| EnvelopeError::Malformed("ciphertext is not base64"))?;
    let Some((&prefix, rest)) = sealed.split_first() else {
        return Err(EnvelopeError::Malformed("empty payload"));
    };
    if prefix != SEALED_PREFIX {
        return Err(EnvelopeError::Malformed("unexpected prefix byte"));
    }
    if rest.len() < ENCAPPED_KEY_LEN + TAG_LEN {
        return Err(EnvelopeError::Malformed("payload too short"));
    }
    let (enc_bytes, ciphertext) = rest.split_at(ENCAPPED_KEY_LEN);

    let encapped_key = <Kem as KemTrait>::EncappedKey::from_bytes(enc_bytes)?;
    let (recipient_priv, _recipient_pub) = ed25519_to_hpke_keypair(recipient_sk)?;
    let sender_pk = ed25519_pub_to_hpke(&sender)?;

    let plaintext = hpke::single_shot_open::<ChaCha20Poly1305, HkdfSha256, Kem>(
        &hpke::OpModeR::Auth(sender_pk),
        &recipient_priv,
        &encapped_key,
        INFO,
        ciphertext,
        &envelope.aad(),
    )?;

    Ok(Opened {
        plaintext,
        sender,
        recipient,
    })
}

/// Parse and open envelope bytes with the recipient's signing key.
///
/// # Errors
///
/// See [`Envelope::parse`] and [`open`].
pub fn unpack(
    recipient_sk: &ed25519_dalek::SigningKey,
    bytes: &[u8],
) -> Result<Opened, EnvelopeError> {
    open(recipient_sk, &Envelope::parse(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keypair;

    fn vk(sk: &ed25519_dalek::SigningKey) -> Verkey {
        sk.verifying_key().to_bytes()
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let alice = generate_keypair();
        let bob = generate_keypair();

        let packed = pack(&alice, &vk(&bob), b"hello from alice to bob").unwrap();
        let opened = unpack(&bob, &packed).unwrap();

        assert_eq!(opened.plaintext, b"hello from alice to bob");
        assert_eq!(opened.sender, vk(&alice));
        assert_eq!(opened.recipient, vk(&bob));
    }

    #[test]
    fn envelope_headers_name_both_parties() {
        let alice = generate_keypair();
        let bob = generate_keypair();

        let packed = pack(&alice, &vk(&bob), b"x").unwrap();
        let envelope = Envelope::parse(&packed).unwrap();

        assert_eq!(envelope.recipient_key().unwrap(), vk(&bob));
        assert_eq!(envelope.sender_key().unwrap(), vk(&alice));
    }

    #[test]
    fn wrong_recipient_is_unknown() {
        let alice = generate_keypair();
        let bob = generate_keypair();
        let charlie = generate_keypair();

        let packed = pack(&alice, &vk(&bob), b"secret").unwrap();
        let err = unpack(&charlie, &packed).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnknownRecipient(_)));
    }

    #[test]
    fn forged_sender_fails_authentication() {
        let alice = generate_keypair();
        let bob = generate_keypair();
        let mallory = generate_keypair();

        let packed = pack(&alice, &vk(&bob), b"secret").unwrap();
        let mut envelope = Envelope::parse(&packed).unwrap();
        envelope.sender = base58::encode(&vk(&mallory));

        assert!(matches!(
            open(&bob, &envelope).unwrap_err(),
            EnvelopeError::Hpke(_)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let alice = generate_keypair();
        let bob = generate_keypair();

        let packed = pack(&alice, &vk(&bob), b"secret").unwrap();
        let mut envelope = Envelope::parse(&packed).unwrap();
        let mut sealed = BASE64.decode(&envelope.ciphertext).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        envelope.ciphertext = BASE64.encode(sealed);

        assert!(open(&bob, &envelope).is_err());
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let alice = generate_keypair();
        let bob = generate_keypair();

        let packed = pack(&alice, &vk(&bob), b"secret").unwrap();
        let mut envelope = Envelope::parse(&packed).unwrap();
        envelope.ciphertext = BASE64.encode([SEALED_PREFIX; 11]);

        assert!(matches!(
            open(&bob, &envelope).unwrap_err(),
            EnvelopeError::Malformed("payload too short")
        ));
    }

    #[test]
    fn non_envelope_bytes_are_rejected() {
        assert!(matches!(
            Envelope::parse(b"not json").unwrap_err(),
            EnvelopeError::Json(_)
        ));
        let other = serde_json::json!({
            "typ": "something/else",
            "alg": ENVELOPE_ALG,
            "recipient": "",
            "sender": "",
            "ciphertext": ""
        });
        assert!(matches!(
            Envelope::parse(other.to_string().as_bytes()).unwrap_err(),
            EnvelopeError::Malformed(_)
        ));
    }

    #[test]
    fn multiple_envelopes_no_state() {
        let alice = generate_keypair();
        let bob = generate_keypair();

        for i in 0..10 {
            let msg = format!("message number {i}");
            let packed = pack(&alice, &vk(&bob), msg.as_bytes()).unwrap();
            assert_eq!(unpack(&bob, &packed).unwrap().plaintext, msg.as_bytes());
        }
    }
}
