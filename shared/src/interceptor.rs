//! Decoding and dispatch of received datagrams
//!
//! The interceptor decodes a datagram with the session's encryption context
//! and routes it by kind: each control packet fires its own event, and every
//! event packet goes to the installed `PacketHandler`. Server and client
//! channels each own one.

use crate::encryption::EncryptionContext;
use crate::error::Result;
use crate::events::{Listeners, PacketEvent};
use crate::packet::{
    ConnectPacket, DisconnectPacket, EventPacket, HandshakePacket, HeartbeatPacket, Packet,
    PacketKind, ReconnectPacket,
};
use crate::serializer::PacketSerializer;
use crate::transport::Datagram;
use log::debug;
use std::sync::{Arc, PoisonError, RwLock};

/// Receives event packets, the extension point for gameplay code
pub trait PacketHandler: Send + Sync {
    fn handle(&self, event: &PacketEvent<EventPacket>);
}

impl<F> PacketHandler for F
where
    F: Fn(&PacketEvent<EventPacket>) + Send + Sync,
{
    fn handle(&self, event: &PacketEvent<EventPacket>) {
        self(event)
    }
}

/// Handler used until a collaborator installs one
struct DiscardHandler;

impl PacketHandler for DiscardHandler {
    fn handle(&self, event: &PacketEvent<EventPacket>) {
        debug!(
            "No handler installed, discarding {} from {}",
            event.packet.payload_dyn().type_name(),
            event.sender
        );
    }
}

pub struct PacketInterceptor {
    deserializer: PacketSerializer,
    handshake: Listeners<PacketEvent<HandshakePacket>>,
    heartbeat: Listeners<PacketEvent<HeartbeatPacket>>,
    connect: Listeners<PacketEvent<ConnectPacket>>,
    disconnect: Listeners<PacketEvent<DisconnectPacket>>,
    reconnect: Listeners<PacketEvent<ReconnectPacket>>,
    handler: RwLock<Arc<dyn PacketHandler>>,
}

impl PacketInterceptor {
    pub fn new(deserializer: PacketSerializer) -> Self {
        Self {
            deserializer,
            handshake: Listeners::new(),
            heartbeat: Listeners::new(),
            connect: Listeners::new(),
            disconnect: Listeners::new(),
            reconnect: Listeners::new(),
            handler: RwLock::new(Arc::new(DiscardHandler)),
        }
    }

    pub fn on_handshake<F>(&self, f: F)
    where
        F: Fn(&PacketEvent<HandshakePacket>) + Send + Sync + 'static,
    {
        self.handshake.subscribe(f);
    }

    pub fn on_heartbeat<F>(&self, f: F)
    where
        F: Fn(&PacketEvent<HeartbeatPacket>) + Send + Sync + 'static,
    {
        self.heartbeat.subscribe(f);
    }

    pub fn on_connect<F>(&self, f: F)
    where
        F: Fn(&PacketEvent<ConnectPacket>) + Send + Sync + 'static,
    {
        self.connect.subscribe(f);
    }

    pub fn on_disconnect<F>(&self, f: F)
    where
        F: Fn(&PacketEvent<DisconnectPacket>) + Send + Sync + 'static,
    {
        self.disconnect.subscribe(f);
    }

    pub fn on_reconnect<F>(&self, f: F)
    where
        F: Fn(&PacketEvent<ReconnectPacket>) + Send + Sync + 'static,
    {
        self.reconnect.subscribe(f);
    }

    /// Replaces the handler that receives event packets
    pub fn set_handler<H: PacketHandler + 'static>(&self, handler: H) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(handler);
    }

    /// Decodes `datagram` and dispatches it.
    ///
    /// Returns the kind of packet that was dispatched. Decode failures are
    /// returned to the caller and nothing is dispatched.
    pub fn accept(&self, datagram: Datagram, encryption: &EncryptionContext) -> Result<PacketKind> {
        let packet = self.deserializer.read(&datagram.data, encryption)?;
        let sender = datagram.sender;
        let kind = packet.kind();

        debug!("Received {} from {}", packet, sender);

        match packet {
            Packet::Handshake(packet) => {
                self.handshake.emit(&PacketEvent { sender, packet });
            }
            Packet::Heartbeat(packet) => {
                self.heartbeat.emit(&PacketEvent { sender, packet });
            }
            Packet::Connect(packet) => {
                self.connect.emit(&PacketEvent { sender, packet });
            }
            Packet::Disconnect(packet) => {
                self.disconnect.emit(&PacketEvent { sender, packet });
            }
            Packet::Reconnect(packet) => {
                self.reconnect.emit(&PacketEvent { sender, packet });
            }
            Packet::Event(packet) => {
                let handler = Arc::clone(
                    &self.handler.read().unwrap_or_else(PoisonError::into_inner),
                );
                handler.handle(&PacketEvent { sender, packet });
            }
        }

        Ok(kind)
    }
}
