//! Protocol constants for the Mantle session lifecycle.
//!
//! These values are fixed by the protocol and MUST NOT be changed.

// =============================================================================
// KEY AGREEMENT
// =============================================================================

/// X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 shared secret size.
pub const SHARED_SECRET_SIZE: usize = 32;

// =============================================================================
// SESSION STATE STORE
// =============================================================================

/// XChaCha20-Poly1305 cache key size.
pub const STORE_KEY_SIZE: usize = 32;

/// XChaCha20 nonce size, prepended to every sealed state envelope.
pub const STORE_NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size.
pub const STORE_TAG_SIZE: usize = 16;

/// Store key prefix for the outbound (encode) session state.
pub const ENCODER_STATE_PREFIX: &str = "enc_";

/// Store key prefix for the inbound (decode) session state.
pub const DECODER_STATE_PREFIX: &str = "dec_";

// =============================================================================
// RESEED POLICY
// =============================================================================

/// Fraction of the engine's reseed interval at which a session must be
/// rotated through a fresh handshake.
pub const RESEED_THRESHOLD: f64 = 0.9;

// =============================================================================
// CHUNKED PIPELINE
// =============================================================================

/// Fixed chunk size for streamed payloads. The final chunk may be shorter.
pub const CHUNK_SIZE: usize = 1024;

/// Depth of the bounded pipe between the encode producer and the transport
/// consumer during streamed uploads.
pub const PIPE_DEPTH: usize = 8;

// =============================================================================
// WIRE CONTRACT
// =============================================================================

/// Out-of-band header carrying the client identifier on every
/// non-handshake request.
pub const CLIENT_ID_HEADER: &str = "x-client-id";
