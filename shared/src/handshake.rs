//! Key exchange behind the handshake packet
//!
//! Each side generates an ephemeral X25519 key pair, sends its public half in
//! a `HandshakePacket`, and derives the session key from the shared secret.
//! The secret is consumed on completion so a key pair is never reused.

use crate::encryption::KEY_SIZE;
use crate::error::{NetError, Result};
use crate::packet::HandshakePacket;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret};

const KEY_LABEL: &[u8] = b"veloce session key v1";

pub struct KeyExchange {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl KeyExchange {
    pub fn new() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// The packet announcing this side's public key
    pub fn packet(&self) -> HandshakePacket {
        HandshakePacket {
            public_key: self.public_key(),
        }
    }

    /// Combines our secret with the peer's public key into a session key
    pub fn complete(self, peer: &HandshakePacket) -> Result<[u8; KEY_SIZE]> {
        let peer_public = PublicKey::from(peer.public_key);
        let shared = self.secret.diffie_hellman(&peer_public);

        if !shared.was_contributory() {
            return Err(NetError::Handshake(
                "peer sent a low-order public key".into(),
            ));
        }

        Ok(derive_session_key(&shared))
    }
}

impl Default for KeyExchange {
    fn default() -> Self {
        Self::new()
    }
}

fn derive_session_key(shared: &SharedSecret) -> [u8; KEY_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(KEY_LABEL);
    hasher.update(shared.as_bytes());
    hasher.finalize().into()
}
