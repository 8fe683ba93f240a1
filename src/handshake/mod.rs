//! Key-agreement handshake.
//!
//! Drives the exchange that establishes two independent shared secrets
//! (one per direction) with the server, instantiates the paired encode
//! and decode transform sessions from them, and persists their initial
//! state. Key-agreement secret material never outlives the handshake
//! call, and no partial state is persisted on failure.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::debug;

use crate::core::{
    Direction, HandshakeError, TransformFactory, TransformSession, PUBLIC_KEY_SIZE,
};
use crate::crypto::{expand_entropy, ExchangeKeypair};
use crate::session::SessionContext;
use crate::transport::{now_millis, HandshakeRequest, Transport};

/// Perform a full handshake for `client_id`.
///
/// Generates one single-use keypair per direction, submits both public
/// keys, derives the two shared secrets from the server's reply, and
/// replaces the client's cached session state wholesale with freshly
/// instantiated encode and decode sessions. The server's timestamp seeds
/// the nonce for both.
pub async fn perform_handshake<F, T>(
    ctx: &SessionContext<F, T>,
    client_id: &str,
) -> Result<(), HandshakeError>
where
    F: TransformFactory,
    T: Transport,
{
    debug!(client_id, "performing handshake");

    let encoder_exchange = ExchangeKeypair::generate();
    let decoder_exchange = ExchangeKeypair::generate();

    let request = HandshakeRequest {
        timestamp: now_millis(),
        conversation_id: client_id.to_string(),
        client_encoder_public_key: BASE64.encode(encoder_exchange.public_key()),
        client_decoder_public_key: BASE64.encode(decoder_exchange.public_key()),
    };

    let reply = ctx.transport().handshake(client_id, request).await?;
    if !reply.success {
        return Err(HandshakeError::ServerRejected(reply.message));
    }
    let data = reply.data.ok_or(HandshakeError::MissingData)?;

    let server_encoder_public = decode_public_key(&data.server_encoder_public_key)?;
    let server_decoder_public = decode_public_key(&data.server_decoder_public_key)?;
    let nonce: u64 = data.timestamp.parse()?;

    // One derivation per direction; the private contexts are consumed
    // here and the secrets are zeroized when they fall out of scope.
    let encoder_secret = encoder_exchange.derive_shared_secret(&server_encoder_public);
    let decoder_secret = decoder_exchange.derive_shared_secret(&server_decoder_public);

    let min_entropy = ctx.factory().min_entropy_bytes();
    let encoder = ctx.factory().instantiate(
        &expand_entropy(&encoder_secret, min_entropy),
        nonce,
        client_id,
    )?;
    let decoder = ctx.factory().instantiate(
        &expand_entropy(&decoder_secret, min_entropy),
        nonce,
        client_id,
    )?;

    ctx.learn_reseed_interval(ctx.factory().max_reseed_interval());

    ctx.store().put(client_id, Direction::Encode, &encoder.export_state())?;
    ctx.store().put(client_id, Direction::Decode, &decoder.export_state())?;

    debug!(client_id, "handshake complete");
    Ok(())
}

fn decode_public_key(encoded: &str) -> Result<[u8; PUBLIC_KEY_SIZE], HandshakeError> {
    let bytes = BASE64.decode(encoded)?;
    let got = bytes.len();
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| HandshakeError::InvalidKeyLength { got })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TransportError;
    use crate::engine::EngineFactory;
    use crate::transport::echo::{EchoTransport, Fault};
    use crate::transport::{Envelope, HandshakeData};
    use tokio::sync::mpsc;

    fn context_with_echo() -> SessionContext<EngineFactory, EchoTransport<EngineFactory>> {
        let factory = EngineFactory::default();
        let transport = EchoTransport::new(factory.clone());
        SessionContext::new(factory, transport)
    }

    #[tokio::test]
    async fn test_handshake_persists_both_states() {
        let ctx = context_with_echo();

        perform_handshake(&ctx, "client-1").await.unwrap();

        assert!(ctx.store().get("client-1", Direction::Encode).is_ok());
        assert!(ctx.store().get("client-1", Direction::Decode).is_ok());
        assert_eq!(ctx.reseed_interval(), Some(ctx.factory().max_reseed_interval()));
    }

    #[tokio::test]
    async fn test_server_rejection_surfaces_message() {
        let ctx = context_with_echo();
        ctx.transport().inject_fault("client-1", Fault::RejectHandshake);

        let result = perform_handshake(&ctx, "client-1").await;
        match result {
            Err(HandshakeError::ServerRejected(message)) => {
                assert!(message.contains("rejected"));
            }
            other => panic!("expected ServerRejected, got {other:?}"),
        }

        // No partial state persisted for the rejected client.
        assert!(ctx.store().get("client-1", Direction::Encode).is_err());
        assert!(ctx.store().get("client-1", Direction::Decode).is_err());
    }

    /// A transport whose handshake reply carries keys that are not
    /// valid base64.
    struct MangledKeyTransport;

    impl Transport for MangledKeyTransport {
        fn handshake(
            &self,
            _client_id: &str,
            request: HandshakeRequest,
        ) -> impl Future<Output = Result<Envelope<HandshakeData>, TransportError>> + Send {
            async move {
                Ok(Envelope::ok(HandshakeData {
                    timestamp: "1700000000000".to_string(),
                    conversation_id: request.conversation_id,
                    server_encoder_public_key: "!!not base64!!".to_string(),
                    server_decoder_public_key: "!!not base64!!".to_string(),
                }))
            }
        }

        fn send_message(
            &self,
            _client_id: &str,
            _payload: String,
        ) -> impl Future<Output = Result<Envelope<String>, TransportError>> + Send {
            async move { Err(TransportError::Send("not implemented".to_string())) }
        }

        fn send_stream(
            &self,
            _client_id: &str,
            _content_length: u64,
            _body: mpsc::Receiver<Vec<u8>>,
        ) -> impl Future<Output = Result<Envelope<String>, TransportError>> + Send {
            async move { Err(TransportError::Send("not implemented".to_string())) }
        }
    }

    #[tokio::test]
    async fn test_invalid_server_keys_fail_decode() {
        let ctx = SessionContext::new(EngineFactory::default(), MangledKeyTransport);

        let result = perform_handshake(&ctx, "client-1").await;
        assert!(matches!(result, Err(HandshakeError::Decode(_))));
    }

    /// A transport that always fails at the network layer.
    struct DeadTransport;

    impl Transport for DeadTransport {
        fn handshake(
            &self,
            _client_id: &str,
            _request: HandshakeRequest,
        ) -> impl Future<Output = Result<Envelope<HandshakeData>, TransportError>> + Send {
            async move { Err(TransportError::Send("connection refused".to_string())) }
        }

        fn send_message(
            &self,
            _client_id: &str,
            _payload: String,
        ) -> impl Future<Output = Result<Envelope<String>, TransportError>> + Send {
            async move { Err(TransportError::Send("connection refused".to_string())) }
        }

        fn send_stream(
            &self,
            _client_id: &str,
            _content_length: u64,
            _body: mpsc::Receiver<Vec<u8>>,
        ) -> impl Future<Output = Result<Envelope<String>, TransportError>> + Send {
            async move { Err(TransportError::Send("connection refused".to_string())) }
        }
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces() {
        let ctx = SessionContext::new(EngineFactory::default(), DeadTransport);

        let result = perform_handshake(&ctx, "client-1").await;
        assert!(matches!(result, Err(HandshakeError::Transport(_))));
    }
}
