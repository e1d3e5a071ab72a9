//! # Scene Replication
//!
//! Keeps a server's authoritative object graph in sync with many
//! independent clients using full snapshots and incremental deltas.
//!
//! ## Components
//! - **Entity**: numeric ids with category bits, the `ReplicatedEntity`
//!   capability trait, and the kind-tag factory
//! - **Event**: the structural created/deleted/signaled side channel
//! - **Engine**: per-client sync bookkeeping, frame pack/unpack, checkup
//!
//! ## Wire Format
//! Every frame starts with the same header:
//! ```text
//! [Magic(4)] [Version(1)] [FrameKind(1)] [frame body...]
//! ```
//! The receiver validates all three before touching the body; a mismatch
//! poisons the packet.

pub mod engine;
pub mod entity;
pub mod event;

use crate::config::{MAGIC_BYTES, PROTOCOL_VERSION};
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};

/// Discriminant of the four frame types the engine produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    FullSync = 1,
    Delta = 2,
    Events = 3,
    NeededUpdate = 4,
}

impl FrameKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(FrameKind::FullSync),
            2 => Some(FrameKind::Delta),
            3 => Some(FrameKind::Events),
            4 => Some(FrameKind::NeededUpdate),
            _ => None,
        }
    }
}

/// Append the common frame header.
pub fn write_header(packet: &mut Packet, kind: FrameKind) {
    packet.append(&MAGIC_BYTES);
    packet.pack(&PROTOCOL_VERSION);
    packet.pack(&kind.tag());
}

/// Validate the common frame header and return the frame kind, for routing
/// a received packet to the right unpack operation.
pub fn read_header(packet: &mut Packet) -> Result<FrameKind> {
    let magic = packet.read_array::<4>()?;
    if magic != MAGIC_BYTES {
        packet.invalidate();
        return Err(ProtocolError::InvalidHeader);
    }
    let version = packet.unpack::<u8>()?;
    if version != PROTOCOL_VERSION {
        packet.invalidate();
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let tag = packet.unpack::<u8>()?;
    FrameKind::from_tag(tag).ok_or_else(|| {
        packet.invalidate();
        ProtocolError::InvalidHeader
    })
}

/// Validate the header and require a specific frame kind.
pub(crate) fn expect_header(packet: &mut Packet, expected: FrameKind) -> Result<()> {
    let kind = read_header(packet)?;
    if kind != expected {
        packet.invalidate();
        return Err(ProtocolError::InvalidHeader);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        for kind in [
            FrameKind::FullSync,
            FrameKind::Delta,
            FrameKind::Events,
            FrameKind::NeededUpdate,
        ] {
            let mut packet = Packet::new();
            write_header(&mut packet, kind);
            assert_eq!(read_header(&mut packet).expect("header"), kind);
        }
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut packet = Packet::from_bytes(&[0xFF, 0xFF, 0xFF, 0xFF, 1, 1]);
        assert!(matches!(
            read_header(&mut packet).unwrap_err(),
            ProtocolError::InvalidHeader
        ));
        assert!(!packet.is_valid());
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut packet = Packet::new();
        packet.append(&MAGIC_BYTES);
        packet.pack(&99u8);
        packet.pack(&FrameKind::Delta.tag());
        assert!(matches!(
            read_header(&mut packet).unwrap_err(),
            ProtocolError::UnsupportedVersion(99)
        ));
    }

    #[test]
    fn test_unknown_frame_kind_rejected() {
        let mut packet = Packet::new();
        packet.append(&MAGIC_BYTES);
        packet.pack(&PROTOCOL_VERSION);
        packet.pack(&0xEEu8);
        assert!(read_header(&mut packet).is_err());
        assert!(!packet.is_valid());
    }
}
