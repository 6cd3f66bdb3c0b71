//! Per-session encryption state
//!
//! Every session owns exactly one `EncryptionContext`. It starts
//! unestablished and receives a ChaCha20-Poly1305 key once the handshake
//! completes. Each sealed datagram uses a fresh random 96-bit nonce that
//! travels alongside the ciphertext.

use crate::error::{NetError, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::sync::{PoisonError, RwLock};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;

#[derive(Default)]
pub struct EncryptionContext {
    cipher: RwLock<Option<ChaCha20Poly1305>>,
}

impl fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("established", &self.is_established())
            .finish()
    }
}

impl EncryptionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context that is already keyed
    pub fn with_key(key: [u8; KEY_SIZE]) -> Self {
        let context = Self::new();
        context.establish(key);
        context
    }

    /// Installs a session key, replacing any previous one
    pub fn establish(&self, key: [u8; KEY_SIZE]) {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        *self.cipher.write().unwrap_or_else(PoisonError::into_inner) = Some(cipher);
    }

    /// Forgets the session key
    pub fn reset(&self) {
        *self.cipher.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_established(&self) -> bool {
        self.cipher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Encrypts `plaintext`, returning the nonce used and the ciphertext
    pub fn seal(&self, plaintext: &[u8]) -> Result<([u8; NONCE_SIZE], Vec<u8>)> {
        let guard = self.cipher.read().unwrap_or_else(PoisonError::into_inner);
        let cipher = guard.as_ref().ok_or(NetError::EncryptionNotEstablished)?;

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| NetError::EncryptionFailure)?;

        Ok((nonce, ciphertext))
    }

    pub fn open(&self, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let guard = self.cipher.read().unwrap_or_else(PoisonError::into_inner);
        let cipher = guard.as_ref().ok_or(NetError::EncryptionNotEstablished)?;

        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| NetError::DecryptionFailure)
    }
}
