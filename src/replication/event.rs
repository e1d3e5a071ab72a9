//! # Structural Scene Events
//!
//! Entity created/deleted/signaled notifications travel on a side channel
//! keyed by client identity, independent of the value-delta channel, and are
//! delivered strictly FIFO per client. They are not deduplicated against the
//! value stream: an entity can be reported created even if none of its
//! fields changed in the same tick.

use crate::core::packet::Packet;
use crate::core::wire::{WireDecode, WireEncode};
use crate::error::{ProtocolError, Result};
use crate::replication::entity::EntityId;

/// Structural transition kind carried by a [`SceneNetEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SceneEventKind {
    Created = 1,
    Deleted = 2,
    Signaled = 3,
}

impl SceneEventKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(SceneEventKind::Created),
            2 => Some(SceneEventKind::Deleted),
            3 => Some(SceneEventKind::Signaled),
            _ => None,
        }
    }
}

/// One structural event: kind, subject entity, and an optional signed byte
/// payload (used by `Signaled` to carry a small application code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneNetEvent {
    pub kind: SceneEventKind,
    pub id: EntityId,
    pub payload: Option<i8>,
}

impl SceneNetEvent {
    pub fn created(id: EntityId) -> Self {
        Self {
            kind: SceneEventKind::Created,
            id,
            payload: None,
        }
    }

    pub fn deleted(id: EntityId) -> Self {
        Self {
            kind: SceneEventKind::Deleted,
            id,
            payload: None,
        }
    }

    pub fn signaled(id: EntityId, payload: i8) -> Self {
        Self {
            kind: SceneEventKind::Signaled,
            id,
            payload: Some(payload),
        }
    }
}

impl WireEncode for SceneNetEvent {
    fn encode(&self, packet: &mut Packet) {
        packet.pack(&self.kind.tag());
        packet.pack(&self.id);
        match self.payload {
            Some(p) => {
                packet.pack(&1u8);
                packet.pack(&p);
            }
            None => packet.pack(&0u8),
        }
    }
}

impl WireDecode for SceneNetEvent {
    fn decode(packet: &mut Packet) -> Result<Self> {
        let tag = u8::decode(packet)?;
        let kind = SceneEventKind::from_tag(tag).ok_or_else(|| {
            packet.invalidate();
            ProtocolError::rule("event-kind", format!("invalid event kind tag: {tag}"))
        })?;
        let id = EntityId::decode(packet)?;
        let payload = match bool::decode(packet)? {
            true => Some(i8::decode(packet)?),
            false => None,
        };
        Ok(Self { kind, id, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::entity::EntityCategory;

    fn id(index: u32) -> EntityId {
        EntityId::compose(EntityCategory::ServerAuthoritative, index).expect("id")
    }

    #[test]
    fn test_event_roundtrips() {
        let events = [
            SceneNetEvent::created(id(1)),
            SceneNetEvent::deleted(id(2)),
            SceneNetEvent::signaled(id(3), -5),
        ];

        let mut packet = Packet::new();
        for event in &events {
            packet.pack(event);
        }
        for event in &events {
            assert_eq!(packet.unpack::<SceneNetEvent>().expect("decode"), *event);
        }
        assert_eq!(packet.remaining(), 0);
    }

    #[test]
    fn test_invalid_kind_tag_rejected() {
        let mut packet = Packet::new();
        packet.pack(&9u8);
        packet.pack(&id(1));
        packet.pack(&0u8);

        let err = packet.unpack::<SceneNetEvent>().unwrap_err();
        assert!(matches!(err, ProtocolError::RuleViolation { .. }));
        assert!(!packet.is_valid());
    }

    #[test]
    fn test_truncated_payload_poisons() {
        let mut packet = Packet::new();
        packet.pack(&SceneEventKind::Signaled.tag());
        packet.pack(&id(1));
        packet.pack(&1u8); // claims a payload byte that is missing

        assert!(packet.unpack::<SceneNetEvent>().is_err());
        assert!(!packet.is_valid());
    }
}
