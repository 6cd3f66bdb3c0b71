//! # Game Server Library
//!
//! Server side of the Veloce protocol engine. A `ServerChannel` binds one UDP
//! endpoint, tracks a session per remote endpoint and drives the fixed-rate
//! tick loop the game simulation hangs off.
//!
//! ## Core Responsibilities
//!
//! ### Connection Lifecycle
//! - Handshakes are answered automatically and secure the session
//! - Disconnect packets remove the session
//! - Sessions idle past the configured timeout are swept
//!
//! ### Outbound Traffic
//! `send` targets one session and `broadcast` every session of a snapshot.
//! Sessions that have not completed the handshake only accept handshake
//! packets; anything else is dropped with a warning.
//!
//! ### Ticking
//! The server clock fires at the configured interval, independent of network
//! I/O, and reports ticks whose listeners overran the interval.
//!
//! ## Lifecycle
//!
//! `Unknown → Starting → Online` on `start()`, `Online → Stopping → Offline`
//! on `stop()`. A stopped server can be started again on the same address.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::ServerChannel;
//! use shared::{gameplay, PacketRegistry, ServerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(PacketRegistry::new());
//!     gameplay::register_packets(&registry)?;
//!
//!     let server = ServerChannel::bind("127.0.0.1:8080", ServerConfig::default(), registry).await?;
//!     server.clock().on_tick(|tick| log::trace!("tick {}", tick.number));
//!     server.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod network;

pub use network::{ServerChannel, ServerState, ServerStatus};
