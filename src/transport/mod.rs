//! Transport seam and wire models.
//!
//! The lifecycle core consumes request/response mechanics through the
//! [`Transport`] trait and never constructs HTTP itself. Implementations
//! must carry the client identifier out-of-band on every non-handshake
//! request (see [`CLIENT_ID_HEADER`](crate::core::CLIENT_ID_HEADER)) and
//! own their own timeout policy. The in-process [`echo::EchoTransport`]
//! implements the server side of the protocol for integration tests.

pub mod echo;
mod wire;

use std::future::Future;

use tokio::sync::mpsc;

use crate::core::TransportError;

pub use wire::{now_millis, Envelope, HandshakeData, HandshakeRequest};

/// Request/response mechanics consumed by the lifecycle core.
pub trait Transport: Send + Sync {
    /// Submit a handshake to the server's handshake endpoint.
    fn handshake(
        &self,
        client_id: &str,
        request: HandshakeRequest,
    ) -> impl Future<Output = Result<Envelope<HandshakeData>, TransportError>> + Send;

    /// Send one transformed, base64-encoded message and return the
    /// server's envelope.
    fn send_message(
        &self,
        client_id: &str,
        payload: String,
    ) -> impl Future<Output = Result<Envelope<String>, TransportError>> + Send;

    /// Stream a transformed payload from a bounded pipe.
    ///
    /// `content_length` is the exact number of body bytes the pipe will
    /// yield (source length plus the engine's finish overhead); the
    /// transport consumes chunks concurrently with the producer filling
    /// the pipe.
    fn send_stream(
        &self,
        client_id: &str,
        content_length: u64,
        body: mpsc::Receiver<Vec<u8>>,
    ) -> impl Future<Output = Result<Envelope<String>, TransportError>> + Send;
}
