//! Key agreement and secret derivation for the handshake.

mod keys;

pub use keys::{expand_entropy, ExchangeKeypair};
