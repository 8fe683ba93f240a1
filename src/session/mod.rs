//! Per-client session lifecycle.
//!
//! [`SessionContext`] owns the process-scoped shared state (engine
//! factory, transport, encrypted state store, the race-init-once reseed
//! interval) and is injected into every task rather than accessed as a
//! global. [`SessionManager`] drives one client's read/modify/write
//! cycle over that context: restore the session pair, run the
//! operation, check reseed counters, then persist or rotate.
//!
//! Unusable cached state (store miss, failed decryption, failed state
//! import) is never fatal: it is treated as a miss and recovered with a
//! fresh handshake before the cycle continues.

mod pipeline;
mod reseed;

pub use reseed::ReseedMonitor;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::{
    Direction, HandshakeError, SessionError, StoreError, TransformError, TransformFactory,
    TransformSession, PIPE_DEPTH,
};
use crate::handshake::perform_handshake;
use crate::store::StateStore;
use crate::transport::Transport;

/// Process-scoped state shared by every client task.
///
/// Constructed once at startup and injected into each task; the store's
/// cache key lives exactly as long as this context.
pub struct SessionContext<F, T> {
    factory: F,
    transport: T,
    store: StateStore,
    reseed_interval: OnceLock<u64>,
}

impl<F, T> SessionContext<F, T>
where
    F: TransformFactory,
    T: Transport,
{
    /// Create a context with a fresh state store.
    pub fn new(factory: F, transport: T) -> Self {
        Self {
            factory,
            transport,
            store: StateStore::new(),
            reseed_interval: OnceLock::new(),
        }
    }

    /// The transform engine factory.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// The transport collaborator.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The encrypted session state store.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Record the engine's reseed interval, learned from the first
    /// session to report it. Safe to race: setting the same learned
    /// value twice is idempotent, and the first value wins.
    pub fn learn_reseed_interval(&self, interval: u64) -> u64 {
        *self.reseed_interval.get_or_init(|| interval)
    }

    /// The cached reseed interval, if any session has reported it yet.
    pub fn reseed_interval(&self) -> Option<u64> {
        self.reseed_interval.get().copied()
    }
}

/// Why a cached session pair could not be restored. Either cause is
/// treated as a store miss and recovered via re-handshake.
#[derive(Debug, Error)]
enum RestoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

impl From<RestoreError> for SessionError {
    fn from(error: RestoreError) -> Self {
        match error {
            RestoreError::Store(e) => SessionError::Store(e),
            RestoreError::Transform(e) => SessionError::Transform(e),
        }
    }
}

/// Drives complete request/response cycles for any number of clients
/// over a shared [`SessionContext`].
///
/// A per-client async lock serializes each client's cycles, so the
/// encode and decode states are never read or written concurrently for
/// the same client; cycles for different clients proceed in parallel.
pub struct SessionManager<F: TransformFactory, T: Transport> {
    ctx: Arc<SessionContext<F, T>>,
    monitor: ReseedMonitor,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<F, T> SessionManager<F, T>
where
    F: TransformFactory,
    T: Transport,
{
    /// Create a manager with a fresh context.
    pub fn new(factory: F, transport: T) -> Self {
        Self {
            ctx: Arc::new(SessionContext::new(factory, transport)),
            monitor: ReseedMonitor::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The shared context.
    pub fn context(&self) -> &SessionContext<F, T> {
        &self.ctx
    }

    /// Perform (or redo) the handshake for `client_id`, replacing any
    /// cached session state wholesale.
    pub async fn handshake(&self, client_id: &str) -> Result<(), HandshakeError> {
        let _guard = self.client_lock(client_id).await;
        perform_handshake(&self.ctx, client_id).await
    }

    /// Run one full message cycle: encode `message`, send it, decode the
    /// reply, then persist or rotate the session pair.
    pub async fn exchange(&self, client_id: &str, message: &str) -> Result<String, SessionError> {
        let _guard = self.client_lock(client_id).await;
        let (mut encoder, mut decoder) = self.open_pair(client_id).await?;

        let encoded = encoder.encode(message.as_bytes())?;
        let reply = self
            .ctx
            .transport()
            .send_message(client_id, BASE64.encode(encoded))
            .await?;
        if !reply.success {
            return Err(SessionError::ServerRejected(reply.message));
        }
        let data = reply.data.ok_or(SessionError::MissingData)?;

        let decoded = decoder.decode(&BASE64.decode(data)?)?;
        let text = String::from_utf8(decoded)?;

        self.settle_pair(client_id, encoder, decoder).await?;
        Ok(text)
    }

    /// Stream `source_len` bytes from `reader` to the server, encoding
    /// chunk-by-chunk through a bounded pipe, and return the decoded
    /// reply payload.
    ///
    /// The declared content length sent to the transport is
    /// `source_len` plus the engine's fixed finish overhead.
    pub async fn upload<R>(
        &self,
        client_id: &str,
        reader: R,
        source_len: u64,
    ) -> Result<Vec<u8>, SessionError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let _guard = self.client_lock(client_id).await;
        let (encoder, mut decoder) = self.open_pair(client_id).await?;

        let content_length = source_len + self.ctx.factory().finish_encode_overhead() as u64;
        let (tx, rx) = mpsc::channel(PIPE_DEPTH);
        let producer = tokio::spawn(pipeline::encode_stream(encoder, reader, tx));

        let reply_result = self
            .ctx
            .transport()
            .send_stream(client_id, content_length, rx)
            .await;
        let (encoder, produce_result) = producer
            .await
            .map_err(|e| SessionError::Task(e.to_string()))?;

        let reply = reply_result?;
        produce_result?;
        if !reply.success {
            return Err(SessionError::ServerRejected(reply.message));
        }
        let data = reply.data.ok_or(SessionError::MissingData)?;

        let decoded = pipeline::decode_reply(&mut decoder, &BASE64.decode(data)?)?;

        self.settle_pair(client_id, encoder, decoder).await?;
        Ok(decoded)
    }

    /// Restore the client's session pair, recovering from unusable
    /// cached state (or a plain miss) with a fresh handshake.
    async fn open_pair(&self, client_id: &str) -> Result<(F::Session, F::Session), SessionError> {
        match self.restore_pair(client_id) {
            Ok(pair) => Ok(pair),
            Err(reason) => {
                debug!(client_id, error = %reason, "cached session state unusable, re-handshaking");
                perform_handshake(&self.ctx, client_id).await?;
                self.restore_pair(client_id).map_err(SessionError::from)
            }
        }
    }

    fn restore_pair(&self, client_id: &str) -> Result<(F::Session, F::Session), RestoreError> {
        let encoder = self
            .ctx
            .factory()
            .restore(&self.ctx.store().get(client_id, Direction::Encode)?)?;
        let decoder = self
            .ctx
            .factory()
            .restore(&self.ctx.store().get(client_id, Direction::Decode)?)?;
        Ok((encoder, decoder))
    }

    /// Persist the pair, or rotate it when either direction's reseed
    /// counter has crossed the threshold. The two counters are checked
    /// independently; rotation always replaces both sessions, since a
    /// handshake re-derives both directions.
    async fn settle_pair(
        &self,
        client_id: &str,
        encoder: F::Session,
        decoder: F::Session,
    ) -> Result<(), SessionError> {
        let interval = self
            .ctx
            .reseed_interval()
            .unwrap_or_else(|| self.ctx.factory().max_reseed_interval());

        let due = self.monitor.due(encoder.reseed_counter(), interval)
            || self.monitor.due(decoder.reseed_counter(), interval);
        if due {
            reseed::rotate(&self.ctx, client_id, encoder, decoder).await?;
        } else {
            self.ctx
                .store()
                .put(client_id, Direction::Encode, &encoder.export_state())?;
            self.ctx
                .store()
                .put(client_id, Direction::Decode, &decoder.export_state())?;
        }
        Ok(())
    }

    async fn client_lock(&self, client_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let cell = self
            .locks
            .lock()
            .expect("client lock table poisoned")
            .entry(client_id.to_string())
            .or_default()
            .clone();
        cell.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::engine::{EngineConfig, EngineFactory};
    use crate::transport::echo::EchoTransport;

    fn manager_with_interval(
        reseed_interval: u64,
    ) -> SessionManager<EngineFactory, EchoTransport<EngineFactory>> {
        let factory = EngineFactory::new(EngineConfig { reseed_interval });
        let transport = EchoTransport::new(factory.clone());
        SessionManager::new(factory, transport)
    }

    fn stored_reseed_counter(
        manager: &SessionManager<EngineFactory, EchoTransport<EngineFactory>>,
        client_id: &str,
        direction: Direction,
    ) -> u64 {
        let blob = manager.context().store().get(client_id, direction).unwrap();
        let session = manager.context().factory().restore(&blob).unwrap();
        session.reseed_counter()
    }

    #[tokio::test]
    async fn test_exchange_echoes_message() {
        let manager = manager_with_interval(1 << 16);
        manager.handshake("client-1").await.unwrap();

        let reply = manager.exchange("client-1", "hello").await.unwrap();
        assert_eq!(reply, "hello");
    }

    #[tokio::test]
    async fn test_exchange_without_prior_handshake_recovers() {
        let manager = manager_with_interval(1 << 16);

        // Store miss triggers an automatic handshake.
        let reply = manager.exchange("fresh-client", "first contact").await.unwrap();
        assert_eq!(reply, "first contact");
    }

    #[tokio::test]
    async fn test_state_persists_between_exchanges() {
        let manager = manager_with_interval(1 << 16);
        manager.handshake("client-1").await.unwrap();

        for i in 0..5 {
            let message = format!("message {i}");
            assert_eq!(manager.exchange("client-1", &message).await.unwrap(), message);
        }

        // Five completed cycles, one operation per direction per cycle.
        assert_eq!(stored_reseed_counter(&manager, "client-1", Direction::Encode), 5);
        assert_eq!(stored_reseed_counter(&manager, "client-1", Direction::Decode), 5);
    }

    #[tokio::test]
    async fn test_reseed_rotation_replaces_state() {
        let manager = manager_with_interval(4);
        manager.handshake("client-1").await.unwrap();

        // Trips 1-3 persist normally; trip 4 crosses 0.9 * 4 and rotates.
        for i in 0..4 {
            let message = format!("trip {i}");
            assert_eq!(manager.exchange("client-1", &message).await.unwrap(), message);
        }
        assert_eq!(stored_reseed_counter(&manager, "client-1", Direction::Encode), 0);
        assert_eq!(stored_reseed_counter(&manager, "client-1", Direction::Decode), 0);

        // Nothing after rotation depends on pre-rotation state.
        let reply = manager.exchange("client-1", "after rotation").await.unwrap();
        assert_eq!(reply, "after rotation");
    }

    #[tokio::test]
    async fn test_corrupt_state_triggers_recovery_handshake() {
        let manager = manager_with_interval(1 << 16);
        manager.handshake("client-1").await.unwrap();
        manager.context().store().tamper("client-1", Direction::Encode);

        let reply = manager.exchange("client-1", "still works").await.unwrap();
        assert_eq!(reply, "still works");
    }

    #[tokio::test]
    async fn test_upload_roundtrip() {
        let manager = manager_with_interval(1 << 16);
        manager.handshake("client-1").await.unwrap();

        let payload: Vec<u8> = (0..4321u32).map(|i| (i % 199) as u8).collect();
        let len = payload.len() as u64;
        let reply = manager
            .upload("client-1", Cursor::new(payload.clone()), len)
            .await
            .unwrap();

        assert_eq!(reply, format!("Received {} bytes", payload.len()).into_bytes());
        assert_eq!(
            manager.context().transport().last_upload("client-1").unwrap(),
            payload
        );
    }
}
