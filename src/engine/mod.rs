//! Reference transform engine.
//!
//! Implements the [`TransformFactory`]/[`TransformSession`] seams with a
//! forward-only design:
//!
//! - A 32-byte DRBG state seeded from entropy, nonce, and identity.
//! - Per operation, a one-time key is derived from the state; the payload
//!   is XORed with a BLAKE2s keystream and a 16-byte verifier tag over
//!   the transformed bytes is emitted by the finish call.
//! - After every completed operation the state is ratcheted with
//!   HKDF-SHA256 and the reseed counter advances, so state can never be
//!   rolled back to replay an earlier operation.
//!
//! Two sessions instantiated from the same entropy/nonce/identity produce
//! mirrored keystreams: the encode side of one pairs with the decode side
//! of the other. Exported state captures the committed state between
//! operations and round-trips exactly through [`EngineFactory::restore`].

use blake2::{Blake2s256, Digest};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::core::{Direction, TransformError, TransformFactory, TransformSession};

/// DRBG state size.
const STATE_SIZE: usize = 32;

/// Verifier tag size; also the fixed finish overhead of every encode
/// operation.
pub const TAG_SIZE: usize = 16;

/// Minimum entropy the engine accepts at instantiation.
pub const MIN_ENTROPY_BYTES: usize = 32;

/// Keystream block size (one BLAKE2s digest per block).
const BLOCK_SIZE: usize = 32;

/// Magic prefix of an exported state blob.
const STATE_MAGIC: &[u8; 4] = b"mtl1";

/// Exported state blob length: magic + state + op counter + reseed counter.
const STATE_BLOB_LEN: usize = 4 + STATE_SIZE + 8 + 8;

/// Default number of operations before the DRBG must be reseeded.
pub const DEFAULT_RESEED_INTERVAL: u64 = 1 << 16;

/// Engine tuning parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Operations allowed before the DRBG must be reseeded via a new
    /// handshake. Tests lower this to drive rotation deterministically.
    pub reseed_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reseed_interval: DEFAULT_RESEED_INTERVAL,
        }
    }
}

/// Factory producing [`EngineSession`]s.
#[derive(Debug, Clone, Default)]
pub struct EngineFactory {
    config: EngineConfig,
}

impl EngineFactory {
    /// Create a factory with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl TransformFactory for EngineFactory {
    type Session = EngineSession;

    fn instantiate(
        &self,
        entropy: &[u8],
        nonce: u64,
        identity: &str,
    ) -> Result<EngineSession, TransformError> {
        if entropy.len() < MIN_ENTROPY_BYTES {
            return Err(TransformError::EntropyTooShort {
                got: entropy.len(),
                need: MIN_ENTROPY_BYTES,
            });
        }

        let hk = Hkdf::<Sha256>::new(Some(&nonce.to_le_bytes()), entropy);
        let mut info = Vec::with_capacity(24 + identity.len());
        info.extend_from_slice(b"mantle v1 instantiate");
        info.extend_from_slice(identity.as_bytes());

        let mut state = [0u8; STATE_SIZE];
        hk.expand(&info, &mut state)
            .expect("32 bytes is a valid HKDF output length");

        Ok(EngineSession {
            state,
            op_counter: 0,
            reseed_counter: 0,
            live: true,
            op: None,
        })
    }

    fn restore(&self, blob: &[u8]) -> Result<EngineSession, TransformError> {
        if blob.len() != STATE_BLOB_LEN || &blob[..4] != STATE_MAGIC {
            return Err(TransformError::MalformedState);
        }

        let mut state = [0u8; STATE_SIZE];
        state.copy_from_slice(&blob[4..4 + STATE_SIZE]);
        let op_counter = u64::from_le_bytes(
            blob[4 + STATE_SIZE..4 + STATE_SIZE + 8]
                .try_into()
                .expect("slice length checked above"),
        );
        let reseed_counter = u64::from_le_bytes(
            blob[4 + STATE_SIZE + 8..]
                .try_into()
                .expect("slice length checked above"),
        );

        Ok(EngineSession {
            state,
            op_counter,
            reseed_counter,
            live: true,
            op: None,
        })
    }

    fn min_entropy_bytes(&self) -> usize {
        MIN_ENTROPY_BYTES
    }

    fn max_reseed_interval(&self) -> u64 {
        self.config.reseed_interval
    }

    fn finish_encode_overhead(&self) -> usize {
        TAG_SIZE
    }
}

/// An in-flight chunked operation.
struct ChunkOp {
    dir: Direction,
    key: [u8; STATE_SIZE],
    offset: u64,
    mac: Blake2s256,
    /// Decode only: trailing ciphertext withheld until finish, where the
    /// last [`TAG_SIZE`] bytes are verified as the tag.
    holdback: Vec<u8>,
}

impl ChunkOp {
    fn new(dir: Direction, key: [u8; STATE_SIZE]) -> Self {
        let mut mac = Blake2s256::new();
        mac.update(key);
        mac.update(b"tag");
        Self {
            dir,
            key,
            offset: 0,
            mac,
            holdback: Vec::new(),
        }
    }
}

impl Drop for ChunkOp {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// A reference transform session.
pub struct EngineSession {
    state: [u8; STATE_SIZE],
    op_counter: u64,
    reseed_counter: u64,
    live: bool,
    op: Option<ChunkOp>,
}

impl EngineSession {
    fn check_live(&self) -> Result<(), TransformError> {
        if self.live {
            Ok(())
        } else {
            Err(TransformError::Uninstantiated)
        }
    }

    fn start_op(&mut self, dir: Direction) -> Result<(), TransformError> {
        self.check_live()?;
        if self.op.is_some() {
            return Err(TransformError::OperationInProgress);
        }
        self.op = Some(ChunkOp::new(dir, derive_op_key(&self.state, self.op_counter)));
        Ok(())
    }

    fn take_op(&mut self, dir: Direction) -> Result<ChunkOp, TransformError> {
        self.check_live()?;
        if self.op.as_ref().map(|op| op.dir) != Some(dir) {
            return Err(TransformError::NoOperation);
        }
        Ok(self.op.take().expect("op presence checked above"))
    }

    /// Commit the completed operation: ratchet the state and advance the
    /// counters. Runs on decode failures too; a failed operation still
    /// consumed the DRBG.
    fn commit_op(&mut self) {
        ratchet(&mut self.state, self.op_counter);
        self.op_counter += 1;
        self.reseed_counter += 1;
    }
}

impl TransformSession for EngineSession {
    fn start_encode(&mut self) -> Result<(), TransformError> {
        self.start_op(Direction::Encode)
    }

    fn encode_chunk(&mut self, chunk: &mut [u8]) -> Result<(), TransformError> {
        self.check_live()?;
        let op = match &mut self.op {
            Some(op) if op.dir == Direction::Encode => op,
            _ => return Err(TransformError::NoOperation),
        };
        apply_keystream(&op.key, op.offset, chunk);
        op.mac.update(&chunk[..]);
        op.offset += chunk.len() as u64;
        Ok(())
    }

    fn finish_encode(&mut self) -> Result<Option<Vec<u8>>, TransformError> {
        let op = self.take_op(Direction::Encode)?;
        let tag = finalize_tag(op.mac.clone());
        self.commit_op();
        Ok(Some(tag.to_vec()))
    }

    fn start_decode(&mut self) -> Result<(), TransformError> {
        self.start_op(Direction::Decode)
    }

    fn decode_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>, TransformError> {
        self.check_live()?;
        let op = match &mut self.op {
            Some(op) if op.dir == Direction::Decode => op,
            _ => return Err(TransformError::NoOperation),
        };
        op.holdback.extend_from_slice(chunk);
        if op.holdback.len() <= TAG_SIZE {
            return Ok(Vec::new());
        }

        let release = op.holdback.len() - TAG_SIZE;
        let mut out: Vec<u8> = op.holdback.drain(..release).collect();
        op.mac.update(&out);
        apply_keystream(&op.key, op.offset, &mut out);
        op.offset += out.len() as u64;
        Ok(out)
    }

    fn finish_decode(&mut self) -> Result<Option<Vec<u8>>, TransformError> {
        let op = self.take_op(Direction::Decode)?;
        if op.holdback.len() < TAG_SIZE {
            self.commit_op();
            return Err(TransformError::Truncated);
        }

        let expected = finalize_tag(op.mac.clone());
        let matches = op.holdback[..] == expected[..];
        self.commit_op();
        if !matches {
            return Err(TransformError::VerificationFailed);
        }
        Ok(None)
    }

    fn export_state(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(STATE_BLOB_LEN);
        blob.extend_from_slice(STATE_MAGIC);
        blob.extend_from_slice(&self.state);
        blob.extend_from_slice(&self.op_counter.to_le_bytes());
        blob.extend_from_slice(&self.reseed_counter.to_le_bytes());
        blob
    }

    fn reseed_counter(&self) -> u64 {
        self.reseed_counter
    }

    fn uninstantiate(&mut self) -> Result<(), TransformError> {
        self.check_live()?;
        self.state.zeroize();
        self.op = None;
        self.live = false;
        Ok(())
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        self.state.zeroize();
    }
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("state", &"[redacted]")
            .field("op_counter", &self.op_counter)
            .field("reseed_counter", &self.reseed_counter)
            .field("live", &self.live)
            .finish()
    }
}

/// Derive the one-time key for operation `op_counter`.
///
/// The derivation depends only on the committed state and the operation
/// index, never on direction, so paired encode/decode sessions stay in
/// lockstep.
fn derive_op_key(state: &[u8; STATE_SIZE], op_counter: u64) -> [u8; STATE_SIZE] {
    let hk = Hkdf::<Sha256>::from_prk(state)
        .expect("32 bytes is a valid PRK length for SHA-256 HKDF");
    let mut info = Vec::with_capacity(20);
    info.extend_from_slice(b"mantle v1 op");
    info.extend_from_slice(&op_counter.to_le_bytes());

    let mut key = [0u8; STATE_SIZE];
    hk.expand(&info, &mut key)
        .expect("32 bytes is a valid HKDF output length");
    key
}

/// Ratchet the DRBG state forward after operation `op_counter`.
fn ratchet(state: &mut [u8; STATE_SIZE], op_counter: u64) {
    let hk = Hkdf::<Sha256>::from_prk(state)
        .expect("32 bytes is a valid PRK length for SHA-256 HKDF");
    let mut info = Vec::with_capacity(25);
    info.extend_from_slice(b"mantle v1 ratchet");
    info.extend_from_slice(&op_counter.to_le_bytes());

    let mut next = [0u8; STATE_SIZE];
    hk.expand(&info, &mut next)
        .expect("32 bytes is a valid HKDF output length");
    state.copy_from_slice(&next);
    next.zeroize();
}

/// XOR `buf` with the keystream for `key` starting at byte `offset`.
fn apply_keystream(key: &[u8; STATE_SIZE], offset: u64, buf: &mut [u8]) {
    let mut block = [0u8; BLOCK_SIZE];
    let mut block_index = u64::MAX;

    for (i, byte) in buf.iter_mut().enumerate() {
        let pos = offset + i as u64;
        let index = pos / BLOCK_SIZE as u64;
        if index != block_index {
            block = keystream_block(key, index);
            block_index = index;
        }
        *byte ^= block[(pos % BLOCK_SIZE as u64) as usize];
    }
    block.zeroize();
}

/// One 32-byte keystream block.
fn keystream_block(key: &[u8; STATE_SIZE], index: u64) -> [u8; BLOCK_SIZE] {
    let mut hasher = Blake2s256::new();
    hasher.update(key);
    hasher.update(b"ks");
    hasher.update(index.to_le_bytes());
    let digest = hasher.finalize();
    let mut block = [0u8; BLOCK_SIZE];
    block.copy_from_slice(&digest);
    block
}

/// Finalize the running MAC into a verifier tag.
fn finalize_tag(mac: Blake2s256) -> [u8; TAG_SIZE] {
    let digest = mac.finalize();
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&digest[..TAG_SIZE]);
    tag
}
