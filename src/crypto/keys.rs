//! Key agreement for the handshake.
//!
//! Each handshake uses two single-use X25519 keypairs, one per
//! direction. The private half is consumed when the shared secret is
//! derived, so key-agreement secret material cannot outlive the
//! handshake call; derived secrets are zeroized on drop.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use crate::core::{PUBLIC_KEY_SIZE, SHARED_SECRET_SIZE};

/// A single-use X25519 keypair for one handshake direction.
pub struct ExchangeKeypair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl ExchangeKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Get the public key.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Derive the shared secret with the peer's public key.
    ///
    /// Consumes the keypair: the private context is destroyed as part of
    /// derivation and cannot be reused.
    pub fn derive_shared_secret(
        self,
        peer_public: &[u8; PUBLIC_KEY_SIZE],
    ) -> Zeroizing<[u8; SHARED_SECRET_SIZE]> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        Zeroizing::new(shared.to_bytes())
    }
}

impl std::fmt::Debug for ExchangeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeKeypair")
            .field("public", &self.public)
            .field("secret", &"[redacted]")
            .finish()
    }
}

/// Expand a shared secret to the entropy length an engine requires.
///
/// HKDF-Expand only (no Extract step) with SHA-256; the shared secret is
/// treated as a PRK directly.
pub fn expand_entropy(
    secret: &[u8; SHARED_SECRET_SIZE],
    len: usize,
) -> Zeroizing<Vec<u8>> {
    let hk = Hkdf::<Sha256>::from_prk(secret)
        .expect("32 bytes is a valid PRK length for SHA-256 HKDF");
    let mut entropy = Zeroizing::new(vec![0u8; len]);
    hk.expand(b"mantle v1 session entropy", &mut entropy)
        .expect("engine entropy lengths are valid HKDF output lengths");
    entropy
}
