//! Demo gameplay packets used by the bundled binaries
//!
//! Both ends must call `register_packets` before exchanging these types so
//! their tags line up.

use crate::error::Result;
use crate::packet::PacketFamily;
use crate::registry::PacketRegistry;
use serde::{Deserialize, Serialize};

/// Family of the demo game packets
pub struct GamePackets;

impl PacketFamily for GamePackets {
    const NAME: &'static str = "game";
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
}

/// Registers every demo packet, in wire order
pub fn register_packets(registry: &PacketRegistry) -> Result<()> {
    registry.register::<GamePackets, PositionUpdate>()?;
    registry.register::<GamePackets, ChatMessage>()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WireTag;

    #[test]
    fn test_demo_packets_have_stable_tags() {
        let registry = PacketRegistry::new();
        register_packets(&registry).unwrap();
        register_packets(&registry).unwrap();

        assert_eq!(
            registry.tag_for::<PositionUpdate>(),
            Some(WireTag {
                family: "game",
                tag: 100
            })
        );
        assert_eq!(registry.tag_for::<ChatMessage>().map(|t| t.tag), Some(101));
        assert_eq!(registry.len(), 2);
    }
}
