//! # Mantle Protocol
//!
//! Secure session lifecycle management for stateful transform channels.
//!
//! Mantle establishes a secure, stateful communication channel between a
//! client and a server. It provides:
//!
//! - **Handshake**: X25519 key agreement deriving one shared secret per
//!   direction, feeding two independent transform sessions
//! - **Persistence**: session state encrypted at rest under a
//!   process-wide key, restored on every cycle
//! - **Rotation**: reseed-counter monitoring with automatic re-handshake
//!   before the engine's DRBG exhausts its safe interval
//! - **Streaming**: chunked transforms through a bounded pipe with
//!   backpressure
//! - **Concurrency**: many independent client sessions in parallel over
//!   a shared, encrypted state cache
//!
//! The transform engine and the transport are collaborators behind
//! seams: [`core::TransformFactory`]/[`core::TransformSession`] and
//! [`transport::Transport`]. The crate ships a reference engine and an
//! in-process echo peer so the whole lifecycle runs standalone.
//!
//! ## Example
//!
//! ```rust
//! use mantle_protocol::prelude::*;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), SessionError> {
//!     let factory = EngineFactory::default();
//!     let transport = EchoTransport::new(factory.clone());
//!     let manager = SessionManager::new(factory, transport);
//!
//!     manager.handshake("client-1").await?;
//!     let reply = manager.exchange("client-1", "hello").await?;
//!     assert_eq!(reply, "hello");
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

// Core constants, errors, and engine seams (always included)
pub mod core;

// Key agreement
pub mod crypto;

// Reference transform engine
pub mod engine;

// Handshake coordination
pub mod handshake;

// Concurrent round orchestration
pub mod orchestrator;

// Per-client session lifecycle
pub mod session;

// Encrypted session state store
pub mod store;

// Transport seam, wire models, in-process echo peer
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;
    pub use crate::crypto::{expand_entropy, ExchangeKeypair};
    pub use crate::engine::{EngineConfig, EngineFactory, EngineSession};
    pub use crate::handshake::perform_handshake;
    pub use crate::orchestrator::{trip_message, ClientOutcome, Orchestrator};
    pub use crate::session::{ReseedMonitor, SessionContext, SessionManager};
    pub use crate::store::StateStore;
    pub use crate::transport::echo::EchoTransport;
    pub use crate::transport::{Envelope, HandshakeData, HandshakeRequest, Transport};
}

// Re-export commonly used items at crate root
pub use self::core::{Direction, HandshakeError, SessionError, TransformFactory, TransformSession};
pub use self::session::SessionManager;
