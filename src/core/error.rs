//! Error types for the Mantle session lifecycle.
//!
//! The taxonomy distinguishes failures by recovery policy: only reseed
//! exhaustion and state-store corruption trigger automatic recovery
//! (re-handshake); everything else is surfaced to the caller.

use thiserror::Error;

/// Errors reported by a transform engine.
///
/// Any engine status other than success is fatal for the current call;
/// callers must not keep using a session handle after a failed
/// instantiate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// Supplied entropy is below the engine-declared minimum.
    #[error("entropy too short: got {got} bytes, engine requires {need}")]
    EntropyTooShort {
        /// Bytes supplied.
        got: usize,
        /// Engine minimum.
        need: usize,
    },

    /// Transformed data failed verification (corrupt or tampered input).
    #[error("transformed data failed verification")]
    VerificationFailed,

    /// Ciphertext is shorter than its verifier tag.
    #[error("ciphertext shorter than its verifier tag")]
    Truncated,

    /// State blob is malformed or from an incompatible engine.
    #[error("state blob is malformed or from an incompatible engine")]
    MalformedState,

    /// A chunked operation is already in progress on this session.
    #[error("a chunked operation is already in progress")]
    OperationInProgress,

    /// No chunked operation of the requested direction is in progress.
    #[error("no matching chunked operation in progress")]
    NoOperation,

    /// The session has been uninstantiated.
    #[error("session is not instantiated")]
    Uninstantiated,
}

/// Errors in the session state store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No cached state for this client and direction.
    #[error("no cached state for this client and direction")]
    Missing,

    /// Cached state failed authenticated decryption (tamper or key
    /// mismatch). Never returns wrong plaintext.
    #[error("cached state failed authenticated decryption")]
    DecryptionFailed,

    /// Sealed envelope is shorter than its nonce.
    #[error("sealed state envelope is shorter than its nonce")]
    Truncated,

    /// Sealing a state blob for the cache failed.
    #[error("failed to seal state for caching")]
    SealFailed,
}

/// Errors in the transport collaborator.
///
/// Surfaced to the caller as-is; the lifecycle layer never retries a
/// transport failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent.
    #[error("request failed: {0}")]
    Send(String),

    /// The response could not be read.
    #[error("failed to read response: {0}")]
    Receive(String),

    /// The response body was not a valid envelope.
    #[error("malformed response body: {0}")]
    Body(#[from] serde_json::Error),

    /// The server has no session for this client identifier.
    #[error("no server session for client {0}")]
    UnknownClient(String),
}

/// Errors during the key-agreement handshake.
///
/// A handshake failure is fatal to that client's session; no partial
/// state is persisted.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The server reported an application-level failure.
    #[error("server rejected handshake: {0}")]
    ServerRejected(String),

    /// Network send/receive failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A returned public key was not valid base64.
    #[error("public key is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    /// A returned public key decoded to the wrong length.
    #[error("public key has wrong length: {got} bytes")]
    InvalidKeyLength {
        /// Decoded length.
        got: usize,
    },

    /// The server timestamp could not be parsed as an unsigned integer.
    #[error("handshake timestamp is not an unsigned integer: {0}")]
    InvalidTimestamp(#[from] std::num::ParseIntError),

    /// The response envelope reported success but carried no data.
    #[error("handshake response carried no data")]
    MissingData,

    /// Transform session instantiation failed.
    #[error("transform instantiation failed: {0}")]
    Transform(#[from] TransformError),

    /// Initial session state could not be persisted.
    #[error("failed to persist session state: {0}")]
    Store(#[from] StoreError),
}

/// Errors during reseed-driven session rotation.
///
/// An uninstantiate failure during rotation is logged and not retried;
/// only a failed re-handshake surfaces here, leaving the session
/// unusable for this client without affecting others.
#[derive(Debug, Error)]
pub enum RotationError {
    /// The re-handshake that replaces the rotated sessions failed.
    #[error("re-handshake during rotation failed: {0}")]
    Handshake(#[from] HandshakeError),
}

/// Top-level errors for a client's request/response cycle.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Handshake failure.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server reported an application-level failure.
    #[error("server rejected request: {0}")]
    ServerRejected(String),

    /// The response envelope reported success but carried no data.
    #[error("response carried no data")]
    MissingData,

    /// Transform engine failure.
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// State store failure that survived a recovery handshake.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The response payload was not valid base64.
    #[error("response payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    /// A decoded text reply was not valid UTF-8.
    #[error("decoded reply is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Session rotation failure.
    #[error(transparent)]
    Rotation(#[from] RotationError),

    /// Reading the upload source failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport closed the upload pipe before the payload was
    /// fully produced.
    #[error("upload pipe closed early")]
    PipeClosed,

    /// A worker task failed to run to completion.
    #[error("worker task failed: {0}")]
    Task(String),
}
