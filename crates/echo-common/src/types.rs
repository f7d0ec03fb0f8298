//! Core type definitions and protocol constants.

/// A 32-byte Ed25519 verification key identifying one side of a connection.
pub type Verkey = [u8; 32];

/// Length in bytes of a key-derivation seed.
pub const SEED_LEN: usize = 32;

/// `typ` header carried by every packed envelope.
pub const ENVELOPE_TYP: &str = "application/echo-envelope+json";

/// `alg` header naming the HPKE ciphersuite used for the ciphertext.
pub const ENVELOPE_ALG: &str = "HPKE-Auth/X25519-HKDF-SHA256/HKDF-SHA256/ChaCha20Poly1305";

/// Content type used when posting packed envelopes to an agent endpoint.
pub const WIRE_CONTENT_TYPE: &str = "application/ssi-agent-wire";
