//! Session state store.
//!
//! Holds the serialized state blobs for every client's encode and decode
//! sessions, encrypted at rest with XChaCha20-Poly1305 under a
//! process-wide key. The key is generated at store construction and
//! never persisted: losing the process loses the cache, which is
//! acceptable because clients re-handshake on a store miss.
//!
//! Every write seals under a fresh random nonce, prepended to the
//! ciphertext; overwriting replaces the old envelope outright, so a
//! nonce is never reused for a key that can still be read. Entries have
//! no TTL; lifetime is bounded by process lifetime and rotation.

use std::collections::HashMap;
use std::sync::Mutex;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroize;

use crate::core::{Direction, StoreError, STORE_KEY_SIZE, STORE_NONCE_SIZE, STORE_TAG_SIZE};

/// Encrypted, process-scoped cache of session state blobs.
pub struct StateStore {
    key: [u8; STORE_KEY_SIZE],
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl StateStore {
    /// Create a store with a fresh random cache key.
    pub fn new() -> Self {
        let mut key = [0u8; STORE_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self {
            key,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Seal `state` and cache it for `client_id`/`direction`, replacing
    /// any previous entry.
    pub fn put(
        &self,
        client_id: &str,
        direction: Direction,
        state: &[u8],
    ) -> Result<(), StoreError> {
        let mut nonce = [0u8; STORE_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), state)
            .map_err(|_| StoreError::SealFailed)?;

        let mut envelope = Vec::with_capacity(STORE_NONCE_SIZE + ciphertext.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);

        self.entries
            .lock()
            .expect("state cache lock poisoned")
            .insert(entry_key(client_id, direction), envelope);
        Ok(())
    }

    /// Fetch and open the cached state for `client_id`/`direction`.
    ///
    /// Fails with [`StoreError::DecryptionFailed`] on tamper or key
    /// mismatch; never returns wrong plaintext.
    pub fn get(&self, client_id: &str, direction: Direction) -> Result<Vec<u8>, StoreError> {
        let envelope = self
            .entries
            .lock()
            .expect("state cache lock poisoned")
            .get(&entry_key(client_id, direction))
            .cloned()
            .ok_or(StoreError::Missing)?;

        if envelope.len() < STORE_NONCE_SIZE + STORE_TAG_SIZE {
            return Err(StoreError::Truncated);
        }
        let (nonce, ciphertext) = envelope.split_at(STORE_NONCE_SIZE);

        let cipher = XChaCha20Poly1305::new((&self.key).into());
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| StoreError::DecryptionFailed)
    }

    /// Drop both directions of a client's cached state.
    pub fn remove(&self, client_id: &str) {
        let mut entries = self.entries.lock().expect("state cache lock poisoned");
        entries.remove(&entry_key(client_id, Direction::Encode));
        entries.remove(&entry_key(client_id, Direction::Decode));
    }

    /// Flip one ciphertext byte of a cached entry, for corruption tests.
    #[cfg(test)]
    pub(crate) fn tamper(&self, client_id: &str, direction: Direction) {
        let mut entries = self.entries.lock().expect("state cache lock poisoned");
        let envelope = entries
            .get_mut(&entry_key(client_id, direction))
            .expect("entry to tamper must exist");
        let last = envelope.len() - 1;
        envelope[last] ^= 0xFF;
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StateStore {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

fn entry_key(client_id: &str, direction: Direction) -> String {
    format!("{}{}", direction.prefix(), client_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let store = StateStore::new();
        let state = b"opaque state blob";

        store.put("client-1", Direction::Encode, state).unwrap();
        let loaded = store.get("client-1", Direction::Encode).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_directions_are_independent() {
        let store = StateStore::new();

        store.put("client-1", Direction::Encode, b"enc state").unwrap();
        store.put("client-1", Direction::Decode, b"dec state").unwrap();

        assert_eq!(store.get("client-1", Direction::Encode).unwrap(), b"enc state");
        assert_eq!(store.get("client-1", Direction::Decode).unwrap(), b"dec state");
    }

    #[test]
    fn test_missing_entry() {
        let store = StateStore::new();
        assert_eq!(
            store.get("nobody", Direction::Encode),
            Err(StoreError::Missing)
        );
    }

    #[test]
    fn test_overwrite_replaces_old_entry() {
        let store = StateStore::new();

        store.put("client-1", Direction::Encode, b"old").unwrap();
        store.put("client-1", Direction::Encode, b"new").unwrap();
        assert_eq!(store.get("client-1", Direction::Encode).unwrap(), b"new");
    }

    #[test]
    fn test_tampered_entry_fails_decryption() {
        let store = StateStore::new();

        store.put("client-1", Direction::Encode, b"sensitive").unwrap();
        store.tamper("client-1", Direction::Encode);

        assert_eq!(
            store.get("client-1", Direction::Encode),
            Err(StoreError::DecryptionFailed)
        );
    }

    #[test]
    fn test_keys_differ_between_stores() {
        // A blob sealed by one process's store must not open in another's.
        let first = StateStore::new();
        let second = StateStore::new();

        first.put("client-1", Direction::Encode, b"state").unwrap();
        let envelope = first
            .entries
            .lock()
            .unwrap()
            .get(&entry_key("client-1", Direction::Encode))
            .cloned()
            .unwrap();
        second
            .entries
            .lock()
            .unwrap()
            .insert(entry_key("client-1", Direction::Encode), envelope);

        assert_eq!(
            second.get("client-1", Direction::Encode),
            Err(StoreError::DecryptionFailed)
        );
    }

    #[test]
    fn test_remove_clears_both_directions() {
        let store = StateStore::new();

        store.put("client-1", Direction::Encode, b"enc").unwrap();
        store.put("client-1", Direction::Decode, b"dec").unwrap();
        store.remove("client-1");

        assert_eq!(store.get("client-1", Direction::Encode), Err(StoreError::Missing));
        assert_eq!(store.get("client-1", Direction::Decode), Err(StoreError::Missing));
    }

    #[test]
    fn test_fresh_nonce_per_write() {
        let store = StateStore::new();

        store.put("client-1", Direction::Encode, b"same state").unwrap();
        let first = store
            .entries
            .lock()
            .unwrap()
            .get(&entry_key("client-1", Direction::Encode))
            .cloned()
            .unwrap();

        store.put("client-1", Direction::Encode, b"same state").unwrap();
        let second = store
            .entries
            .lock()
            .unwrap()
            .get(&entry_key("client-1", Direction::Encode))
            .cloned()
            .unwrap();

        assert_ne!(first[..STORE_NONCE_SIZE], second[..STORE_NONCE_SIZE]);
    }
}
