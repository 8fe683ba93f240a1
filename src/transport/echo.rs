//! In-process echo peer.
//!
//! Implements the server side of the protocol against an in-memory
//! session table, so the full lifecycle (handshake, message exchange,
//! streamed upload, rotation) can be exercised without a network. Wire
//! envelopes are round-tripped through JSON to follow the same
//! serialization path a real HTTP transport uses.
//!
//! Fault injection hooks let tests induce server-side rejections and
//! corrupted replies for a single client without touching the others.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::sync::mpsc;

use crate::core::{
    TransformFactory, TransformSession, TransportError, PUBLIC_KEY_SIZE,
};
use crate::crypto::{expand_entropy, ExchangeKeypair};
use crate::transport::{now_millis, Envelope, HandshakeData, HandshakeRequest, Transport};

/// A server-side fault to inject for one client. Each fault fires once
/// and is then cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reject the next handshake with a failure envelope.
    RejectHandshake,
    /// Reject the next message with a failure envelope.
    RejectMessage,
    /// Reply to the next message with bytes no decoder can verify.
    GarbageReply,
}

/// Server-side session pair for one client.
///
/// The server's decoder pairs the client's encoder and vice versa.
struct Peer<S> {
    encoder: S,
    decoder: S,
}

/// An in-process peer implementing [`Transport`].
pub struct EchoTransport<F: TransformFactory> {
    factory: F,
    peers: Mutex<HashMap<String, Peer<F::Session>>>,
    uploads: Mutex<HashMap<String, Vec<u8>>>,
    faults: Mutex<HashMap<String, Fault>>,
}

impl<F: TransformFactory> EchoTransport<F> {
    /// Create an echo peer that builds its sessions with `factory`.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            peers: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Arrange for `fault` to fire on this client's next matching request.
    pub fn inject_fault(&self, client_id: &str, fault: Fault) {
        self.faults
            .lock()
            .expect("fault table lock poisoned")
            .insert(client_id.to_string(), fault);
    }

    /// The plaintext the server recovered from this client's most recent
    /// streamed upload.
    pub fn last_upload(&self, client_id: &str) -> Option<Vec<u8>> {
        self.uploads
            .lock()
            .expect("upload table lock poisoned")
            .get(client_id)
            .cloned()
    }

    fn take_fault(&self, client_id: &str, expected: Fault) -> bool {
        let mut faults = self.faults.lock().expect("fault table lock poisoned");
        if faults.get(client_id) == Some(&expected) {
            faults.remove(client_id);
            true
        } else {
            false
        }
    }

    fn serve_handshake(
        &self,
        request: &HandshakeRequest,
    ) -> Result<Envelope<HandshakeData>, TransportError> {
        if self.take_fault(&request.conversation_id, Fault::RejectHandshake) {
            return Ok(Envelope::rejected("handshake rejected by server policy"));
        }

        let encoder_public = match decode_public_key(&request.client_encoder_public_key) {
            Some(key) => key,
            None => return Ok(Envelope::rejected("client encoder public key is invalid")),
        };
        let decoder_public = match decode_public_key(&request.client_decoder_public_key) {
            Some(key) => key,
            None => return Ok(Envelope::rejected("client decoder public key is invalid")),
        };

        let server_for_encoder = ExchangeKeypair::generate();
        let server_for_decoder = ExchangeKeypair::generate();
        let reply = HandshakeData {
            timestamp: now_millis(),
            conversation_id: request.conversation_id.clone(),
            server_encoder_public_key: BASE64.encode(server_for_encoder.public_key()),
            server_decoder_public_key: BASE64.encode(server_for_decoder.public_key()),
        };

        let nonce: u64 = reply
            .timestamp
            .parse()
            .map_err(|_| TransportError::Send("clock before the epoch".to_string()))?;
        let identity = &request.conversation_id;

        // The client's encoder entropy comes from its encoder exchange,
        // so that secret seeds the server-side decoder, and vice versa.
        let decoder_secret = server_for_encoder.derive_shared_secret(&encoder_public);
        let encoder_secret = server_for_decoder.derive_shared_secret(&decoder_public);

        let min_entropy = self.factory.min_entropy_bytes();
        let decoder = match self.factory.instantiate(
            &expand_entropy(&decoder_secret, min_entropy),
            nonce,
            identity,
        ) {
            Ok(session) => session,
            Err(error) => return Ok(Envelope::rejected(error.to_string())),
        };
        let encoder = match self.factory.instantiate(
            &expand_entropy(&encoder_secret, min_entropy),
            nonce,
            identity,
        ) {
            Ok(session) => session,
            Err(error) => return Ok(Envelope::rejected(error.to_string())),
        };

        self.peers
            .lock()
            .expect("peer table lock poisoned")
            .insert(identity.clone(), Peer { encoder, decoder });

        Ok(Envelope::ok(reply))
    }

    fn serve_message(&self, client_id: &str, payload: &str) -> Result<Envelope<String>, TransportError> {
        if self.take_fault(client_id, Fault::RejectMessage) {
            return Ok(Envelope::rejected("message rejected by server policy"));
        }
        if self.take_fault(client_id, Fault::GarbageReply) {
            return Ok(Envelope::ok(BASE64.encode([0xA5u8; 48])));
        }

        let raw = match BASE64.decode(payload) {
            Ok(raw) => raw,
            Err(_) => return Ok(Envelope::rejected("payload is not valid base64")),
        };

        let mut peers = self.peers.lock().expect("peer table lock poisoned");
        let peer = peers
            .get_mut(client_id)
            .ok_or_else(|| TransportError::UnknownClient(client_id.to_string()))?;

        let plain = match peer.decoder.decode(&raw) {
            Ok(plain) => plain,
            Err(error) => return Ok(Envelope::rejected(error.to_string())),
        };
        match peer.encoder.encode(&plain) {
            Ok(encoded) => Ok(Envelope::ok(BASE64.encode(encoded))),
            Err(error) => Ok(Envelope::rejected(error.to_string())),
        }
    }

    fn serve_upload(
        &self,
        client_id: &str,
        chunks: &[Vec<u8>],
        content_length: u64,
    ) -> Result<Envelope<String>, TransportError> {
        let received: u64 = chunks.iter().map(|c| c.len() as u64).sum();
        if received != content_length {
            return Ok(Envelope::rejected(format!(
                "content length mismatch: declared {content_length}, received {received}"
            )));
        }

        let mut peers = self.peers.lock().expect("peer table lock poisoned");
        let peer = peers
            .get_mut(client_id)
            .ok_or_else(|| TransportError::UnknownClient(client_id.to_string()))?;

        let plain = match decode_chunked(&mut peer.decoder, chunks) {
            Ok(plain) => plain,
            Err(error) => return Ok(Envelope::rejected(error.to_string())),
        };

        let reply_text = format!("Received {} bytes", plain.len());
        self.uploads
            .lock()
            .expect("upload table lock poisoned")
            .insert(client_id.to_string(), plain);

        match peer.encoder.encode(reply_text.as_bytes()) {
            Ok(encoded) => Ok(Envelope::ok(BASE64.encode(encoded))),
            Err(error) => Ok(Envelope::rejected(error.to_string())),
        }
    }
}

impl<F: TransformFactory> Transport for EchoTransport<F> {
    fn handshake(
        &self,
        _client_id: &str,
        request: HandshakeRequest,
    ) -> impl Future<Output = Result<Envelope<HandshakeData>, TransportError>> + Send {
        async move {
            // Round-trip through JSON to follow the real wire path.
            let request: HandshakeRequest =
                serde_json::from_str(&serde_json::to_string(&request)?)?;
            let envelope = self.serve_handshake(&request)?;
            Ok(serde_json::from_str(&serde_json::to_string(&envelope)?)?)
        }
    }

    fn send_message(
        &self,
        client_id: &str,
        payload: String,
    ) -> impl Future<Output = Result<Envelope<String>, TransportError>> + Send {
        async move {
            let envelope = self.serve_message(client_id, &payload)?;
            Ok(serde_json::from_str(&serde_json::to_string(&envelope)?)?)
        }
    }

    fn send_stream(
        &self,
        client_id: &str,
        content_length: u64,
        mut body: mpsc::Receiver<Vec<u8>>,
    ) -> impl Future<Output = Result<Envelope<String>, TransportError>> + Send {
        async move {
            // Drain the pipe as it fills; the producer runs concurrently
            // against the channel's bounded depth.
            let mut chunks = Vec::new();
            while let Some(chunk) = body.recv().await {
                chunks.push(chunk);
            }
            let envelope = self.serve_upload(client_id, &chunks, content_length)?;
            Ok(serde_json::from_str(&serde_json::to_string(&envelope)?)?)
        }
    }
}

fn decode_public_key(encoded: &str) -> Option<[u8; PUBLIC_KEY_SIZE]> {
    let bytes = BASE64.decode(encoded).ok()?;
    bytes.as_slice().try_into().ok()
}

fn decode_chunked<S: TransformSession>(
    session: &mut S,
    chunks: &[Vec<u8>],
) -> Result<Vec<u8>, crate::core::TransformError> {
    session.start_decode()?;
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend_from_slice(&session.decode_chunk(chunk)?);
    }
    if let Some(tail) = session.finish_decode()? {
        out.extend_from_slice(&tail);
    }
    Ok(out)
}
