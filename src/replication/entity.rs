//! # Replicated Entities
//!
//! Numeric entity identity, the capability interface every replicable
//! entity implements, and the kind-tag factory used to instantiate entities
//! received from the wire.
//!
//! ## Id Space
//! An [`EntityId`] is a 32-bit key. The top two bits encode the entity's
//! [`EntityCategory`] so the category can be inferred from the id alone,
//! without a lookup; the remaining 30 bits are the index. The all-ones value
//! is the reserved "invalid/unassigned" sentinel.

use crate::core::packet::Packet;
use crate::core::wire::{WireDecode, WireEncode};
use crate::error::{ProtocolError, Result};
use crate::registry::Identity;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

const CATEGORY_SHIFT: u32 = 30;
const INDEX_MASK: u32 = (1 << CATEGORY_SHIFT) - 1;

/// Which side of the connection owns an entity's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntityCategory {
    /// Authoritative on the server, replicated to every client.
    ServerAuthoritative = 0,
    /// Replicated but cosmetic; safe to drop on overload.
    Decorative = 1,
    /// Exists only on one client, never sent by the server.
    ClientLocal = 2,
}

impl EntityCategory {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(EntityCategory::ServerAuthoritative),
            1 => Some(EntityCategory::Decorative),
            2 => Some(EntityCategory::ClientLocal),
            _ => None,
        }
    }
}

/// 32-bit replicated-entity key with the category folded into the top bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u32);

impl EntityId {
    /// Reserved sentinel: invalid/unassigned.
    pub const INVALID: EntityId = EntityId(u32::MAX);

    /// Build an id from a category and a 30-bit index.
    pub fn compose(category: EntityCategory, index: u32) -> Result<Self> {
        if index > INDEX_MASK {
            return Err(ProtocolError::InvalidEntityId(index));
        }
        Ok(EntityId((u32::from(category.tag()) << CATEGORY_SHIFT) | index))
    }

    /// Reinterpret a raw wire value. No validation; use
    /// [`is_valid`](Self::is_valid) before trusting it.
    pub fn from_raw(raw: u32) -> Self {
        EntityId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    /// The category encoded in the top bits; `None` for the reserved fourth
    /// bit pattern.
    pub fn category(self) -> Option<EntityCategory> {
        EntityCategory::from_tag((self.0 >> CATEGORY_SHIFT) as u8)
    }

    /// Whether this id may identify an entity: not the sentinel and not in
    /// the reserved category range.
    pub fn is_valid(self) -> bool {
        self != Self::INVALID && self.category().is_some()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl WireEncode for EntityId {
    fn encode(&self, packet: &mut Packet) {
        packet.pack(&self.0);
    }
}

impl WireDecode for EntityId {
    fn decode(packet: &mut Packet) -> Result<Self> {
        Ok(EntityId(u32::decode(packet)?))
    }
}

/// Explicit context threaded through serialize/deserialize calls, replacing
/// ambient process-wide managers. Holds whatever shared services entity
/// implementations need to look up while encoding themselves.
#[derive(Default)]
pub struct ReplicationContext {
    resources: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ReplicationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared service; replaces any previous instance of the
    /// same type.
    pub fn insert<R: Any + Send + Sync>(&mut self, resource: R) {
        self.resources.insert(TypeId::of::<R>(), Box::new(resource));
    }

    pub fn get<R: Any + Send + Sync>(&self) -> Option<&R> {
        self.resources
            .get(&TypeId::of::<R>())
            .and_then(|r| r.downcast_ref())
    }
}

impl fmt::Debug for ReplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationContext")
            .field("resources", &self.resources.len())
            .finish()
    }
}

/// Capability interface of a replicated-value container.
///
/// The protocol only ever asks an entity "do you need to be sent to this
/// observer" and "serialize/deserialize yourself"; how the container tracks
/// per-field dirtiness internally is its own business.
pub trait ReplicatedEntity: Send {
    /// Type tag used by the factory to instantiate this entity on the
    /// receiving side.
    fn kind_tag(&self) -> u8;

    /// Write this entity's replicated-value set into the packet.
    fn serialize(&self, packet: &mut Packet, ctx: &ReplicationContext);

    /// Apply a replicated-value set read from the packet.
    fn deserialize(&mut self, packet: &mut Packet, ctx: &ReplicationContext) -> Result<()>;

    /// Whether any replicated value still needs to be sent to `observer`.
    fn is_dirty_for(&self, observer: &Identity) -> bool;

    /// Record that `observer` has received the current values.
    fn mark_clean_for(&mut self, observer: &Identity);

    /// Flag every replicated value as pending for `observer`.
    fn mark_dirty_for(&mut self, observer: &Identity);

    /// Flag every replicated value as pending for all observers.
    fn mark_dirty_for_all(&mut self);

    /// An observer explicitly asked for a resend of the fields in `mask`,
    /// regardless of dirtiness. Containers that track per-field masks can
    /// override; the default resends everything.
    fn mark_needed(&mut self, observer: &Identity, _field_mask: u32) {
        self.mark_dirty_for(observer);
    }
}

type FactoryFn = fn() -> Box<dyn ReplicatedEntity>;

/// Registry of kind tags to factory functions, replacing source-level
/// runtime type lookup on the receiving side.
#[derive(Default)]
pub struct EntityFactory {
    factories: HashMap<u8, FactoryFn>,
}

impl EntityFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a kind tag. Re-registering a tag replaces the
    /// previous factory.
    pub fn register(&mut self, kind_tag: u8, factory: FactoryFn) {
        if self.factories.insert(kind_tag, factory).is_some() {
            warn!(kind_tag, "entity factory re-registered for kind tag");
        }
    }

    /// Instantiate a default entity of the given kind.
    pub fn create(&self, kind_tag: u8) -> Result<Box<dyn ReplicatedEntity>> {
        self.factories
            .get(&kind_tag)
            .map(|f| f())
            .ok_or(ProtocolError::UnknownEntityKind(kind_tag))
    }

    pub fn knows(&self, kind_tag: u8) -> bool {
        self.factories.contains_key(&kind_tag)
    }
}

impl fmt::Debug for EntityFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityFactory")
            .field("kinds", &self.factories.len())
            .finish()
    }
}
