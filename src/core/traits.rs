//! Seams for the transform engine collaborator.
//!
//! The lifecycle manager never looks inside a transform engine: it drives
//! sessions through [`TransformSession`], creates and restores them
//! through [`TransformFactory`], and treats exported state as an opaque
//! blob. The crate's [`engine`](crate::engine) module provides a
//! reference implementation; any conforming engine may be substituted.

use crate::core::TransformError;

/// Direction of a transform session relative to this endpoint.
///
/// Every client owns exactly one session per direction. The two are
/// mutually independent: their states are persisted under separate keys
/// and their reseed counters are checked independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Outbound: plaintext in, transformed data out.
    Encode,
    /// Inbound: transformed data in, plaintext out.
    Decode,
}

impl Direction {
    /// Store-key prefix for this direction.
    pub fn prefix(&self) -> &'static str {
        match self {
            Direction::Encode => crate::core::ENCODER_STATE_PREFIX,
            Direction::Decode => crate::core::DECODER_STATE_PREFIX,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Encode => write!(f, "encode"),
            Direction::Decode => write!(f, "decode"),
        }
    }
}

/// A stateful transform session.
///
/// Internal state evolves monotonically with every operation and cannot
/// be rolled back. Two sessions instantiated from the same entropy,
/// nonce, and identity stay in lockstep as long as every encoded message
/// is decoded exactly once, in order, by the paired session.
pub trait TransformSession: Send {
    /// Begin a chunked encode operation.
    fn start_encode(&mut self) -> Result<(), TransformError>;

    /// Transform one chunk in place. Output length equals input length;
    /// the operation's fixed overhead is emitted by
    /// [`finish_encode`](Self::finish_encode).
    fn encode_chunk(&mut self, chunk: &mut [u8]) -> Result<(), TransformError>;

    /// Complete a chunked encode operation, returning any trailing bytes
    /// to append to the transformed stream.
    fn finish_encode(&mut self) -> Result<Option<Vec<u8>>, TransformError>;

    /// Begin a chunked decode operation.
    fn start_decode(&mut self) -> Result<(), TransformError>;

    /// Consume one transformed chunk, returning the plaintext recovered
    /// so far. The engine may buffer; the returned slice can be shorter
    /// than the input (including empty).
    fn decode_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>, TransformError>;

    /// Complete a chunked decode operation, verifying the stream and
    /// returning any trailing plaintext.
    ///
    /// On failure the partial output of the operation is unusable:
    /// internal state has advanced past the failing input and cannot be
    /// rolled back.
    fn finish_decode(&mut self) -> Result<Option<Vec<u8>>, TransformError>;

    /// Encode a whole message in one call.
    ///
    /// The default composes the chunked operations, so a one-call encode
    /// is byte-identical to any chunked partition of the same payload.
    fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>, TransformError> {
        self.start_encode()?;
        let mut buf = data.to_vec();
        self.encode_chunk(&mut buf)?;
        if let Some(tail) = self.finish_encode()? {
            buf.extend_from_slice(&tail);
        }
        Ok(buf)
    }

    /// Decode a whole message in one call.
    fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>, TransformError> {
        self.start_decode()?;
        let mut out = self.decode_chunk(data)?;
        if let Some(tail) = self.finish_decode()? {
            out.extend_from_slice(&tail);
        }
        Ok(out)
    }

    /// Export the session state as an opaque blob.
    ///
    /// Restoring the blob through [`TransformFactory::restore`] yields a
    /// session behaviorally identical to this one at export time. An
    /// in-flight chunked operation is not captured.
    fn export_state(&self) -> Vec<u8>;

    /// Number of operations drawn against the internal DRBG since
    /// instantiation or restore.
    fn reseed_counter(&self) -> u64;

    /// Tear the session down, zeroing internal state. The handle must
    /// not be used afterwards.
    fn uninstantiate(&mut self) -> Result<(), TransformError>;
}

/// Creates and restores transform sessions.
pub trait TransformFactory: Send + Sync {
    /// The session type this factory produces.
    type Session: TransformSession + Send + 'static;

    /// Instantiate a fresh session from entropy, a nonce, and a
    /// personalization identity. A fresh session starts at reseed
    /// counter 0.
    fn instantiate(
        &self,
        entropy: &[u8],
        nonce: u64,
        identity: &str,
    ) -> Result<Self::Session, TransformError>;

    /// Reconstruct a session from a blob produced by
    /// [`TransformSession::export_state`].
    fn restore(&self, state: &[u8]) -> Result<Self::Session, TransformError>;

    /// Minimum entropy length accepted by
    /// [`instantiate`](Self::instantiate).
    fn min_entropy_bytes(&self) -> usize;

    /// Maximum number of operations a session may perform before its
    /// internal entropy must be refreshed via a new handshake.
    fn max_reseed_interval(&self) -> u64;

    /// Fixed per-operation overhead emitted by
    /// [`TransformSession::finish_encode`], used to pre-compute total
    /// content length before streaming.
    fn finish_encode_overhead(&self) -> usize;
}
