//! # Game Client Library
//!
//! Client side of the Veloce protocol engine. A `ClientChannel` talks to one
//! server: it runs the handshake, keeps the session alive with heartbeats and
//! sends game packets stamped with the player's identity.
//!
//! ## Connection Lifecycle
//!
//! ### Connect
//! `connect()` sends the client's public key and suspends until the server's
//! reply has established the session key. Only then is the Connect packet
//! sent; from that point every packet is sealed.
//!
//! ### Heartbeat
//! While the session is healthy a Heartbeat is sent every
//! `heartbeat_interval`, which keeps the server from expiring the session.
//!
//! ### Reconnect and Disconnect
//! `reconnect()` repeats the key exchange and announces the returning player.
//! `disconnect()` says goodbye and tears the channel down for good.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::ClientChannel;
//! use shared::gameplay::{self, PositionUpdate};
//! use shared::{ClientConfig, PacketRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(PacketRegistry::new());
//!     gameplay::register_packets(&registry)?;
//!
//!     let client = ClientChannel::bind(
//!         "127.0.0.1:8080".parse()?,
//!         ClientConfig::new("player-1"),
//!         registry,
//!     )
//!     .await?;
//!
//!     client.connect().await?;
//!     client.send_event(PositionUpdate { x: 1.0, y: 0.0, z: 2.0 }).await?;
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod network;

pub use network::ClientChannel;
