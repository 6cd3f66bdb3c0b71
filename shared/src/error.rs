//! Error types shared by every layer of the protocol engine
//!
//! Errors fall into a few groups:
//! - **Lifecycle**: cancellation during shutdown, invalid state transitions
//! - **Wire**: I/O failures, malformed or unregistered packets
//! - **Security**: encryption failures and handshake problems
//! - **Sessions**: lookup and creation failures in the session registry
//!
//! Cancellation is expected during shutdown and is never logged as a failure
//! by the channel loops.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Packet type {0} is not registered")]
    UnregisteredType(&'static str),

    #[error("No packet registered under tag {tag} in family '{family}'")]
    UnknownTag { family: String, tag: u32 },

    #[error("Packet type {type_name} is already registered under family '{family}'")]
    RegistrationConflict {
        type_name: &'static str,
        family: &'static str,
    },

    #[error("Packet family name '{0}' is used by two different family types")]
    FamilyConflict(&'static str),

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption context is not established")]
    EncryptionNotEstablished,

    #[error("Unencrypted {0} packet rejected on a secured session")]
    UnsecuredPacket(&'static str),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Session was not found")]
    SessionNotFound,

    #[error("Session creation failed for {0}")]
    SessionCreation(SocketAddr),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel is not connected")]
    NotConnected,

    #[error("Invalid lifecycle transition: {0}")]
    InvalidState(String),
}

impl NetError {
    /// Returns true for the error kind that signals an orderly shutdown
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NetError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, NetError>;
