//! Packet model shared by client and server
//!
//! Control traffic is a closed set of kinds (handshake, heartbeat, connect,
//! disconnect, reconnect). Everything else travels as an `EventPacket` whose
//! payload is any type registered with the `PacketRegistry`, so gameplay code
//! can define its own packets without touching this crate.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Marker for a base-type family of event payloads.
///
/// Tags are allocated per family, so two families may both use tag 100.
pub trait PacketFamily: 'static {
    /// Name written on the wire to identify the family
    const NAME: &'static str;
}

/// Object-safe view of a gameplay payload.
///
/// Implemented automatically for every serde type that is also `Debug`,
/// `Clone` and `PartialEq`.
pub trait Payload: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
    fn encode(&self) -> Result<Vec<u8>>;
    fn clone_payload(&self) -> Box<dyn Payload>;
    fn eq_payload(&self, other: &dyn Payload) -> bool;
}

impl<T> Payload for T
where
    T: Serialize + DeserializeOwned + fmt::Debug + Clone + PartialEq + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn clone_payload(&self) -> Box<dyn Payload> {
        Box::new(self.clone())
    }

    fn eq_payload(&self, other: &dyn Payload) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |other| self == other)
    }
}

/// Key exchange message; always framed without encryption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePacket {
    pub public_key: [u8; 32],
}

/// Liveness signal, timestamped in milliseconds since the Unix epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPacket {
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPacket {
    pub player_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectPacket {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPacket {
    pub player_id: String,
}

/// Game packet carrying a registered payload and the player it belongs to
#[derive(Debug)]
pub struct EventPacket {
    pub player_id: String,
    payload: Box<dyn Payload>,
}

impl EventPacket {
    pub fn new<P: Payload>(player_id: impl Into<String>, payload: P) -> Self {
        Self {
            player_id: player_id.into(),
            payload: Box::new(payload),
        }
    }

    pub(crate) fn from_boxed(player_id: String, payload: Box<dyn Payload>) -> Self {
        Self { player_id, payload }
    }

    /// Returns the payload if it is of type `P`
    pub fn payload<P: Payload>(&self) -> Option<&P> {
        self.payload.as_any().downcast_ref::<P>()
    }

    pub fn payload_dyn(&self) -> &dyn Payload {
        self.payload.as_ref()
    }

    pub fn is<P: Payload>(&self) -> bool {
        self.payload.as_any().is::<P>()
    }
}

impl Clone for EventPacket {
    fn clone(&self) -> Self {
        Self {
            player_id: self.player_id.clone(),
            payload: self.payload.clone_payload(),
        }
    }
}

impl PartialEq for EventPacket {
    fn eq(&self, other: &Self) -> bool {
        self.player_id == other.player_id && self.payload.eq_payload(other.payload.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Handshake,
    Heartbeat,
    Connect,
    Disconnect,
    Reconnect,
    Event,
}

impl PacketKind {
    pub fn name(self) -> &'static str {
        match self {
            PacketKind::Handshake => "handshake",
            PacketKind::Heartbeat => "heartbeat",
            PacketKind::Connect => "connect",
            PacketKind::Disconnect => "disconnect",
            PacketKind::Reconnect => "reconnect",
            PacketKind::Event => "event",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Handshake(HandshakePacket),
    Heartbeat(HeartbeatPacket),
    Connect(ConnectPacket),
    Disconnect(DisconnectPacket),
    Reconnect(ReconnectPacket),
    Event(EventPacket),
}

impl Packet {
    pub fn event<P: Payload>(player_id: impl Into<String>, payload: P) -> Self {
        Packet::Event(EventPacket::new(player_id, payload))
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Handshake(_) => PacketKind::Handshake,
            Packet::Heartbeat(_) => PacketKind::Heartbeat,
            Packet::Connect(_) => PacketKind::Connect,
            Packet::Disconnect(_) => PacketKind::Disconnect,
            Packet::Reconnect(_) => PacketKind::Reconnect,
            Packet::Event(_) => PacketKind::Event,
        }
    }

    pub fn is_handshake(&self) -> bool {
        matches!(self, Packet::Handshake(_))
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Event(event) => write!(
                f,
                "{} - Player:[{}]",
                event.payload.type_name(),
                event.player_id
            ),
            other => f.write_str(other.kind().name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Jump {
        height: f32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Crouch;

    #[test]
    fn test_event_payload_downcast() {
        let event = EventPacket::new("player-1", Jump { height: 2.5 });

        assert!(event.is::<Jump>());
        assert_eq!(event.payload::<Jump>(), Some(&Jump { height: 2.5 }));
        assert!(event.payload::<Crouch>().is_none());
    }

    #[test]
    fn test_event_equality_compares_payloads() {
        let a = Packet::event("p", Jump { height: 1.0 });
        let b = Packet::event("p", Jump { height: 1.0 });
        let c = Packet::event("p", Jump { height: 3.0 });
        let d = Packet::event("p", Crouch);
        let e = Packet::event("q", Jump { height: 1.0 });

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_ne!(a, e);
    }

    #[test]
    fn test_event_clone_is_deep() {
        let original = Packet::event("p", Jump { height: 4.0 });
        let copy = original.clone();
        assert_eq!(original, copy);
    }

    #[test]
    fn test_packet_kinds() {
        let handshake = Packet::Handshake(HandshakePacket { public_key: [0; 32] });
        assert!(handshake.is_handshake());
        assert_eq!(handshake.kind(), PacketKind::Handshake);

        let heartbeat = Packet::Heartbeat(HeartbeatPacket { timestamp: 1 });
        assert!(!heartbeat.is_handshake());
        assert_eq!(heartbeat.kind().name(), "heartbeat");

        assert_eq!(Packet::event("p", Crouch).kind(), PacketKind::Event);
    }

    #[test]
    fn test_display_includes_player() {
        let packet = Packet::event("player-7", Crouch);
        let text = packet.to_string();
        assert!(text.contains("Crouch"));
        assert!(text.contains("Player:[player-7]"));
    }
}
