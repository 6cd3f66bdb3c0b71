//! Packet type registry
//!
//! Maps concrete payload types to wire tags, scoped per packet family. The
//! first type registered under a family receives tag 100, the next 101, and
//! so on. Tags never change for the lifetime of the registry.
//!
//! Both ends of a connection must register the same types in the same order
//! before any traffic of those types is exchanged. The registry is an owned
//! object shared through `Arc`, not process-wide state.

use crate::error::{NetError, Result};
use crate::packet::{PacketFamily, Payload};
use log::debug;
use serde::de::DeserializeOwned;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Tag assigned to the first type of every family
pub const FIRST_TAG: u32 = 100;

type DecodeFn = fn(&[u8]) -> Result<Box<dyn Payload>>;

fn decode_as<T: Payload + DeserializeOwned>(bytes: &[u8]) -> Result<Box<dyn Payload>> {
    let value: T = bincode::deserialize(bytes)?;
    Ok(Box::new(value))
}

/// Wire identity of a registered payload type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireTag {
    pub family: &'static str,
    pub tag: u32,
}

struct Registration {
    type_name: &'static str,
    decode: DecodeFn,
}

struct FamilyTable {
    family_type: TypeId,
    next_tag: u32,
    by_tag: HashMap<u32, Registration>,
}

#[derive(Default)]
struct Tables {
    families: HashMap<&'static str, FamilyTable>,
    by_type: HashMap<TypeId, WireTag>,
}

#[derive(Default)]
pub struct PacketRegistry {
    tables: RwLock<Tables>,
}

impl PacketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under family `F` and returns its tag.
    ///
    /// Registering the same pair again returns the existing tag without
    /// consuming a new one. Registering `T` under a second family fails.
    pub fn register<F, T>(&self) -> Result<u32>
    where
        F: PacketFamily,
        T: Payload + DeserializeOwned,
    {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let type_name = std::any::type_name::<T>();

        if let Some(existing) = tables.by_type.get(&TypeId::of::<T>()) {
            if existing.family == F::NAME {
                return Ok(existing.tag);
            }
            return Err(NetError::RegistrationConflict {
                type_name,
                family: existing.family,
            });
        }

        let table = tables
            .families
            .entry(F::NAME)
            .or_insert_with(|| FamilyTable {
                family_type: TypeId::of::<F>(),
                next_tag: FIRST_TAG,
                by_tag: HashMap::new(),
            });

        if table.family_type != TypeId::of::<F>() {
            return Err(NetError::FamilyConflict(F::NAME));
        }

        let tag = table.next_tag;
        table.next_tag += 1;
        table.by_tag.insert(
            tag,
            Registration {
                type_name,
                decode: decode_as::<T>,
            },
        );
        tables.by_type.insert(
            TypeId::of::<T>(),
            WireTag {
                family: F::NAME,
                tag,
            },
        );

        debug!("Registered {} as {}:{}", type_name, F::NAME, tag);
        Ok(tag)
    }

    /// Looks up the wire identity of a payload value
    pub fn tag_of(&self, payload: &dyn Payload) -> Result<WireTag> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables
            .by_type
            .get(&payload.as_any().type_id())
            .copied()
            .ok_or(NetError::UnregisteredType(payload.type_name()))
    }

    pub fn tag_for<T: Payload>(&self) -> Option<WireTag> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Decodes a payload body using the type registered at `family:tag`
    pub fn decode(&self, family: &str, tag: u32, body: &[u8]) -> Result<Box<dyn Payload>> {
        let decode = {
            let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
            tables
                .families
                .get(family)
                .and_then(|table| table.by_tag.get(&tag))
                .map(|registration| registration.decode)
                .ok_or_else(|| NetError::UnknownTag {
                    family: family.to_string(),
                    tag,
                })?
        };

        decode(body)
    }

    /// Name of the type registered at `family:tag`, for diagnostics
    pub fn type_name(&self, family: &str, tag: u32) -> Option<&'static str> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables
            .families
            .get(family)
            .and_then(|table| table.by_tag.get(&tag))
            .map(|registration| registration.type_name)
    }

    /// Number of registered payload types across all families
    pub fn len(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_type
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::thread;

    struct Movement;
    impl PacketFamily for Movement {
        const NAME: &'static str = "movement";
    }

    struct Combat;
    impl PacketFamily for Combat {
        const NAME: &'static str = "combat";
    }

    struct FakeMovement;
    impl PacketFamily for FakeMovement {
        const NAME: &'static str = "movement";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Walk {
        speed: f32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Run {
        speed: f32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Jump;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Attack {
        target: u32,
    }

    #[test]
    fn test_tags_start_at_100_and_increment() {
        let registry = PacketRegistry::new();

        assert_eq!(registry.register::<Movement, Walk>().unwrap(), 100);
        assert_eq!(registry.register::<Movement, Run>().unwrap(), 101);
        assert_eq!(registry.register::<Movement, Jump>().unwrap(), 102);
    }

    #[test]
    fn test_families_have_independent_counters() {
        let registry = PacketRegistry::new();

        registry.register::<Movement, Walk>().unwrap();
        registry.register::<Movement, Run>().unwrap();
        let attack = registry.register::<Combat, Attack>().unwrap();

        assert_eq!(attack, 100);
        assert_eq!(
            registry.tag_for::<Attack>(),
            Some(WireTag {
                family: "combat",
                tag: 100
            })
        );
    }

    #[test]
    fn test_reregistration_is_idempotent() {
        let registry = PacketRegistry::new();

        assert_eq!(registry.register::<Movement, Walk>().unwrap(), 100);
        assert_eq!(registry.register::<Movement, Walk>().unwrap(), 100);
        assert_eq!(registry.register::<Movement, Run>().unwrap(), 101);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_type_in_two_families_rejected() {
        let registry = PacketRegistry::new();
        registry.register::<Movement, Walk>().unwrap();

        let result = registry.register::<Combat, Walk>();
        assert!(matches!(
            result,
            Err(NetError::RegistrationConflict { family: "movement", .. })
        ));
    }

    #[test]
    fn test_family_name_clash_rejected() {
        let registry = PacketRegistry::new();
        registry.register::<Movement, Walk>().unwrap();

        let result = registry.register::<FakeMovement, Run>();
        assert!(matches!(result, Err(NetError::FamilyConflict("movement"))));
    }

    #[test]
    fn test_decode_registered_payload() {
        let registry = PacketRegistry::new();
        registry.register::<Movement, Walk>().unwrap();

        let body = bincode::serialize(&Walk { speed: 3.5 }).unwrap();
        let payload = registry.decode("movement", 100, &body).unwrap();

        assert_eq!(
            payload.as_any().downcast_ref::<Walk>(),
            Some(&Walk { speed: 3.5 })
        );
        assert!(registry.type_name("movement", 100).unwrap().ends_with("Walk"));
    }

    #[test]
    fn test_unknown_tag_and_type() {
        let registry = PacketRegistry::new();

        assert!(matches!(
            registry.decode("movement", 100, &[]),
            Err(NetError::UnknownTag { tag: 100, .. })
        ));
        assert!(matches!(
            registry.tag_of(&Walk { speed: 1.0 }),
            Err(NetError::UnregisteredType(_))
        ));
    }

    #[test]
    fn test_concurrent_registration_assigns_unique_tags() {
        let registry = Arc::new(PacketRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    if i % 2 == 0 {
                        registry.register::<Movement, Walk>().unwrap()
                    } else {
                        registry.register::<Movement, Run>().unwrap()
                    }
                })
            })
            .collect();

        let mut tags: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        tags.sort_unstable();
        tags.dedup();

        assert_eq!(tags, vec![100, 101]);
        assert_eq!(registry.len(), 2);
    }
}
