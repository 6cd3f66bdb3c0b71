//! # Veloce Protocol Engine
//!
//! Core of a UDP networking engine for real-time multiplayer games. This crate
//! holds everything the server and client channels have in common: the
//! transport, per-session encryption, the packet model and its type registry,
//! the session registry, the receive pipeline and the ticking clock.
//!
//! ## Packet Flow
//!
//! ### Inbound
//! The transport receives a datagram, the channel's listen loop enqueues it,
//! and the process loop drains the queue in arrival order. For each datagram
//! the owning session is resolved (or registered on first sight) and the
//! interceptor decodes it with that session's encryption context, then routes
//! it by kind to the matching event or to the generic packet handler.
//!
//! ### Outbound
//! A packet is checked against the session's health, encoded through the
//! registry, sealed with the session key and handed to the transport.
//!
//! ## Module Organization
//!
//! - `transport`: UDP socket with a close signal
//! - `encryption`, `handshake`: session keys and authenticated framing
//! - `packet`, `registry`, `serializer`: the wire model
//! - `session`: endpoint-keyed session registry
//! - `events`, `interceptor`: dispatch of decoded packets
//! - `channel`: listen/process loops, gate and cancellation
//! - `clock`: fixed-rate ticks with missed-tick detection
//! - `config`, `error`: ambient configuration and the shared error type
//! - `gameplay`: demo packets used by the bundled binaries
//!
//! ## Registering Game Packets
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use shared::{PacketFamily, PacketRegistry};
//!
//! struct Combat;
//! impl PacketFamily for Combat {
//!     const NAME: &'static str = "combat";
//! }
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Attack {
//!     target: u32,
//! }
//!
//! let registry = PacketRegistry::new();
//! assert_eq!(registry.register::<Combat, Attack>().unwrap(), 100);
//! ```

pub mod channel;
pub mod clock;
pub mod config;
pub mod encryption;
pub mod error;
pub mod events;
pub mod gameplay;
pub mod handshake;
pub mod interceptor;
pub mod packet;
pub mod registry;
pub mod serializer;
pub mod session;
pub mod transport;

pub use channel::Channel;
pub use clock::{ClockState, Tick, TickMissed, TickingClock};
pub use config::{ClientConfig, ServerConfig};
pub use encryption::EncryptionContext;
pub use error::{NetError, Result};
pub use events::{Listeners, PacketEvent};
pub use handshake::KeyExchange;
pub use interceptor::{PacketHandler, PacketInterceptor};
pub use packet::{
    ConnectPacket, DisconnectPacket, EventPacket, HandshakePacket, HeartbeatPacket, Packet,
    PacketFamily, PacketKind, Payload, ReconnectPacket,
};
pub use registry::{PacketRegistry, WireTag};
pub use serializer::PacketSerializer;
pub use session::{Session, SessionHandler, SessionId};
pub use transport::{Datagram, UdpTransport};

/// Milliseconds since the Unix epoch, as carried by heartbeats
pub fn timestamp_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
