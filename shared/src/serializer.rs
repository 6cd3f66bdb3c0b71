//! Packet serialization and framing
//!
//! A packet is first encoded into a `WirePacket` (event payloads are encoded
//! through the registry and carry their family and tag), then wrapped in an
//! `Envelope`. Handshake packets, and any packet sent before the session key
//! exists, use a plain envelope; everything else is sealed with the session's
//! encryption context.
//!
//! Reading reverses the steps: unwrap the envelope, decrypt if sealed, then
//! resolve the payload type from the registry.

use crate::encryption::{EncryptionContext, NONCE_SIZE};
use crate::error::{NetError, Result};
use crate::packet::{
    ConnectPacket, DisconnectPacket, EventPacket, HandshakePacket, HeartbeatPacket, Packet,
    ReconnectPacket,
};
use crate::registry::PacketRegistry;
use crate::transport::MAX_DATAGRAM_SIZE;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
enum WirePacket {
    Handshake(HandshakePacket),
    Heartbeat(HeartbeatPacket),
    Connect(ConnectPacket),
    Disconnect(DisconnectPacket),
    Reconnect(ReconnectPacket),
    Event {
        family: String,
        tag: u32,
        player_id: String,
        body: Vec<u8>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
enum Envelope {
    Plain(Vec<u8>),
    Sealed {
        nonce: [u8; NONCE_SIZE],
        ciphertext: Vec<u8>,
    },
}

#[derive(Clone)]
pub struct PacketSerializer {
    registry: Arc<PacketRegistry>,
}

impl PacketSerializer {
    pub fn new(registry: Arc<PacketRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.registry
    }

    /// Encodes `packet` into a datagram for the session owning `encryption`
    pub fn write(&self, packet: &Packet, encryption: &EncryptionContext) -> Result<Vec<u8>> {
        let wire = self.encode_wire(packet)?;
        let body = bincode::serialize(&wire)?;

        let envelope = if packet.is_handshake() || !encryption.is_established() {
            Envelope::Plain(body)
        } else {
            let (nonce, ciphertext) = encryption.seal(&body)?;
            Envelope::Sealed { nonce, ciphertext }
        };

        let data = bincode::serialize(&envelope)?;
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(NetError::OversizedPacket(data.len()));
        }
        Ok(data)
    }

    /// Decodes a datagram received on the session owning `encryption`
    pub fn read(&self, data: &[u8], encryption: &EncryptionContext) -> Result<Packet> {
        let envelope: Envelope = bincode::deserialize(data)?;

        match envelope {
            Envelope::Plain(body) => {
                let packet = self.decode_wire(bincode::deserialize(&body)?)?;
                // Once keyed, only handshakes may arrive in the clear
                if encryption.is_established() && !packet.is_handshake() {
                    return Err(NetError::UnsecuredPacket(packet.kind().name()));
                }
                Ok(packet)
            }
            Envelope::Sealed { nonce, ciphertext } => {
                let body = encryption.open(&nonce, &ciphertext)?;
                self.decode_wire(bincode::deserialize(&body)?)
            }
        }
    }

    fn encode_wire(&self, packet: &Packet) -> Result<WirePacket> {
        Ok(match packet {
            Packet::Handshake(p) => WirePacket::Handshake(p.clone()),
            Packet::Heartbeat(p) => WirePacket::Heartbeat(p.clone()),
            Packet::Connect(p) => WirePacket::Connect(p.clone()),
            Packet::Disconnect(p) => WirePacket::Disconnect(p.clone()),
            Packet::Reconnect(p) => WirePacket::Reconnect(p.clone()),
            Packet::Event(event) => {
                let payload = event.payload_dyn();
                let wire_tag = self.registry.tag_of(payload)?;
                WirePacket::Event {
                    family: wire_tag.family.to_string(),
                    tag: wire_tag.tag,
                    player_id: event.player_id.clone(),
                    body: payload.encode()?,
                }
            }
        })
    }

    fn decode_wire(&self, wire: WirePacket) -> Result<Packet> {
        Ok(match wire {
            WirePacket::Handshake(p) => Packet::Handshake(p),
            WirePacket::Heartbeat(p) => Packet::Heartbeat(p),
            WirePacket::Connect(p) => Packet::Connect(p),
            WirePacket::Disconnect(p) => Packet::Disconnect(p),
            WirePacket::Reconnect(p) => Packet::Reconnect(p),
            WirePacket::Event {
                family,
                tag,
                player_id,
                body,
            } => {
                let payload = self.registry.decode(&family, tag, &body)?;
                Packet::Event(EventPacket::from_boxed(player_id, payload))
            }
        })
    }
}
