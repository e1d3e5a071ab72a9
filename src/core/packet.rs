//! # Packet Buffer
//!
//! Growable byte buffer with independent write and read cursors and a
//! permanent validity flag.
//!
//! A [`Packet`] is filled by one producer (append/pack) and consumed by zero
//! or more readers (read/unpack). Reads are non-destructive and cursor-based;
//! the cursor can be reset to re-read from the start.
//!
//! ## Poisoning
//! The first malformed read — fewer bytes remaining than requested, an
//! out-of-bounds random access, or a value that fails decoding — clears the
//! validity flag permanently. Every later extraction returns
//! [`ProtocolError::PoisonedPacket`] without touching the cursor. There is no
//! recovery path other than discarding the packet; this is what keeps a
//! truncated or hostile frame from ever reading past its end.
//!
//! ## Byte Order
//! `append`/`read` copy bytes verbatim. `pack`/`unpack` go through
//! [`WireEncode`]/[`WireDecode`], which convert every multi-byte primitive to
//! and from network byte order (big-endian).

use crate::config::LENGTH_PREFIX_BYTES;
use crate::core::wire::{WireDecode, WireEncode};
use crate::error::{ProtocolError, Result};
use bytes::Bytes;

/// Byte buffer with a monotonic write position, a movable read cursor, and a
/// validity flag that is cleared forever on the first malformed read.
#[derive(Debug, Clone)]
pub struct Packet {
    buf: Vec<u8>,
    read_pos: usize,
    valid: bool,
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl Packet {
    /// Create an empty packet.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            read_pos: 0,
            valid: true,
        }
    }

    /// Create an empty packet with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            read_pos: 0,
            valid: true,
        }
    }

    /// Wrap bytes received from a peer for extraction.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            buf: bytes.to_vec(),
            read_pos: 0,
            valid: true,
        }
    }

    /// Total number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes left between the read cursor and the write position.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.read_pos
    }

    /// Current read cursor position.
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Whether the packet is still extractable.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Permanently clear the validity flag. Called internally on every
    /// malformed read; public so validation layers can poison a packet whose
    /// content failed a semantic check.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Move the read cursor back to the start of the buffer.
    pub fn reset_read(&mut self) {
        self.read_pos = 0;
    }

    /// Move the read cursor to an absolute position, e.g. to replay a span
    /// of the buffer that was already read once for validation.
    ///
    /// # Errors
    /// Returns [`ProtocolError::OutOfBounds`] if `pos` exceeds the current
    /// size. The packet is not poisoned: seeking is a local cursor
    /// operation, not an extraction from untrusted bytes.
    pub fn seek_read(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(ProtocolError::OutOfBounds {
                pos,
                len: 0,
                size: self.buf.len(),
            });
        }
        self.read_pos = pos;
        Ok(())
    }

    /// View the full written contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the packet into a cheaply-cloneable frame for the transport.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }

    /// Copy raw bytes to the end of the buffer, no byte-order conversion.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Encode a value in network byte order and append it.
    pub fn pack<T: WireEncode + ?Sized>(&mut self, value: &T) {
        value.encode(self);
    }

    /// Copy `out.len()` raw bytes from the read cursor, advancing it.
    ///
    /// # Errors
    /// Fails without mutating the cursor — and poisons the packet — if fewer
    /// bytes remain than requested.
    pub fn read(&mut self, out: &mut [u8]) -> Result<()> {
        if !self.valid {
            return Err(ProtocolError::PoisonedPacket);
        }
        let remaining = self.remaining();
        if out.len() > remaining {
            self.valid = false;
            return Err(ProtocolError::Underrun {
                requested: out.len(),
                remaining,
            });
        }
        out.copy_from_slice(&self.buf[self.read_pos..self.read_pos + out.len()]);
        self.read_pos += out.len();
        Ok(())
    }

    /// Fixed-size counterpart of [`read`](Self::read).
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        self.read(&mut out)?;
        Ok(out)
    }

    /// Decode a value from network byte order at the read cursor.
    ///
    /// # Errors
    /// Returns [`ProtocolError::PoisonedPacket`] once the packet has been
    /// invalidated, or the decoding failure that invalidated it.
    pub fn unpack<T: WireDecode>(&mut self) -> Result<T> {
        if !self.valid {
            return Err(ProtocolError::PoisonedPacket);
        }
        T::decode(self)
    }

    /// Peek the shared length field at the read cursor without consuming it.
    ///
    /// Used by the extraction layer to validate a declared length before the
    /// matching read is attempted.
    pub fn peek_length(&mut self) -> Result<u32> {
        if !self.valid {
            return Err(ProtocolError::PoisonedPacket);
        }
        if self.remaining() < LENGTH_PREFIX_BYTES {
            let remaining = self.remaining();
            self.valid = false;
            return Err(ProtocolError::Underrun {
                requested: LENGTH_PREFIX_BYTES,
                remaining,
            });
        }
        let b = &self.buf[self.read_pos..self.read_pos + LENGTH_PREFIX_BYTES];
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Overwrite previously written bytes at `pos`, e.g. a reserved count
    /// slot that is back-patched once the real count is known.
    ///
    /// # Errors
    /// Returns [`ProtocolError::OutOfBounds`] if `pos + data.len()` exceeds
    /// the current size. The packet is not poisoned: patching is a producer
    /// operation, not an extraction from untrusted bytes.
    pub fn write_at(&mut self, pos: usize, data: &[u8]) -> Result<()> {
        let end = pos
            .checked_add(data.len())
            .ok_or(ProtocolError::OutOfBounds {
                pos,
                len: data.len(),
                size: self.buf.len(),
            })?;
        if end > self.buf.len() {
            return Err(ProtocolError::OutOfBounds {
                pos,
                len: data.len(),
                size: self.buf.len(),
            });
        }
        self.buf[pos..end].copy_from_slice(data);
        Ok(())
    }

    /// Encode a value in network byte order over previously written bytes.
    pub fn pack_at<T: WireEncode>(&mut self, pos: usize, value: &T) -> Result<()> {
        let mut scratch = Packet::new();
        value.encode(&mut scratch);
        self.write_at(pos, scratch.as_slice())
    }

    /// Random-access raw read that does not move the cursor.
    ///
    /// # Errors
    /// Poisons the packet and fails if `pos + out.len()` exceeds the current
    /// size.
    pub fn read_at(&mut self, pos: usize, out: &mut [u8]) -> Result<()> {
        if !self.valid {
            return Err(ProtocolError::PoisonedPacket);
        }
        let end = match pos.checked_add(out.len()) {
            Some(end) if end <= self.buf.len() => end,
            _ => {
                self.valid = false;
                return Err(ProtocolError::OutOfBounds {
                    pos,
                    len: out.len(),
                    size: self.buf.len(),
                });
            }
        };
        out.copy_from_slice(&self.buf[pos..end]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_append_then_read_roundtrip() {
        let mut packet = Packet::new();
        packet.append(&[1, 2, 3, 4]);

        let mut out = [0u8; 4];
        packet.read(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(packet.remaining(), 0);
    }

    #[test]
    fn test_underrun_poisons_permanently() {
        let mut packet = Packet::from_bytes(&[1, 2]);
        let mut out = [0u8; 4];

        let err = packet.read(&mut out).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Underrun {
                requested: 4,
                remaining: 2
            }
        ));
        assert!(!packet.is_valid());

        // Even a read that would fit now fails, and the cursor is untouched.
        let mut small = [0u8; 1];
        assert!(matches!(
            packet.read(&mut small).unwrap_err(),
            ProtocolError::PoisonedPacket
        ));
        assert_eq!(packet.read_pos(), 0);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_reset_read_allows_rereading() {
        let mut packet = Packet::new();
        packet.pack(&0xDEAD_BEEFu32);

        assert_eq!(packet.unpack::<u32>().unwrap(), 0xDEAD_BEEF);
        packet.reset_read();
        assert_eq!(packet.unpack::<u32>().unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_seek_read_replays_a_span() {
        let mut packet = Packet::new();
        packet.pack(&1u32);
        packet.pack(&2u32);

        assert_eq!(packet.unpack::<u32>().unwrap(), 1);
        let mark = packet.read_pos();
        assert_eq!(packet.unpack::<u32>().unwrap(), 2);

        packet.seek_read(mark).unwrap();
        assert_eq!(packet.unpack::<u32>().unwrap(), 2);

        let err = packet.seek_read(packet.len() + 1).unwrap_err();
        assert!(matches!(err, ProtocolError::OutOfBounds { .. }));
        assert!(packet.is_valid());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_peek_length_does_not_consume() {
        let mut packet = Packet::new();
        packet.pack(&7u32);
        packet.append(b"payload");

        assert_eq!(packet.peek_length().unwrap(), 7);
        assert_eq!(packet.read_pos(), 0);
        assert_eq!(packet.unpack::<u32>().unwrap(), 7);
    }

    #[test]
    fn test_peek_length_short_buffer_poisons() {
        let mut packet = Packet::from_bytes(&[0, 0]);
        assert!(packet.peek_length().is_err());
        assert!(!packet.is_valid());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_write_at_patches_reserved_slot() {
        let mut packet = Packet::new();
        let slot = packet.len();
        packet.pack(&0u32); // placeholder
        packet.pack(&0xAAu8);

        packet.pack_at(slot, &3u32).unwrap();
        assert_eq!(packet.unpack::<u32>().unwrap(), 3);
        assert_eq!(packet.unpack::<u8>().unwrap(), 0xAA);
    }

    #[test]
    fn test_write_at_out_of_bounds_rejected() {
        let mut packet = Packet::new();
        packet.append(&[0; 4]);
        let err = packet.write_at(2, &[0; 4]).unwrap_err();
        assert!(matches!(err, ProtocolError::OutOfBounds { .. }));
        // Producer-side failure: the packet stays readable.
        assert!(packet.is_valid());
    }

    #[test]
    fn test_read_at_out_of_bounds_poisons() {
        let mut packet = Packet::from_bytes(&[1, 2, 3]);
        let mut out = [0u8; 4];
        assert!(packet.read_at(1, &mut out).is_err());
        assert!(!packet.is_valid());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_into_bytes_preserves_contents() {
        let mut packet = Packet::new();
        packet.pack(&0x0102u16);
        let bytes = packet.into_bytes();
        assert_eq!(&bytes[..], &[0x01, 0x02]);
    }
}
