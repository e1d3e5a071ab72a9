//! # Wire Encoding
//!
//! Network-byte-order encoding and decoding for every primitive the protocol
//! replicates: booleans, fixed-width integers, floats, bounded text, fixed
//! numeric vectors, and length-prefixed homogeneous sequences.
//!
//! ## Wire Format
//! - Multi-byte primitives are big-endian on the wire; the sender converts
//!   from host order on write and the receiver converts back on read.
//! - Strings and sequences carry a `u32` length/count prefix — the single
//!   shared length type of the whole protocol.
//! - Floats travel as their IEEE-754 bit patterns, so round trips are
//!   bit-exact (NaN payloads included).
//!
//! ## Security
//! Decoders verify a declared length against the bytes actually remaining
//! before allocating anything; a declared-oversized string or sequence is an
//! underrun, never a large allocation.

use crate::core::packet::Packet;
use crate::error::{rules, ProtocolError, Result};

/// Conversion of a value into its network-byte-order wire form.
pub trait WireEncode {
    fn encode(&self, packet: &mut Packet);
}

/// Reconstruction of a value from its wire form at the packet's read cursor.
///
/// Implementations must never read past the buffer: every failure poisons the
/// packet and returns an error instead.
pub trait WireDecode: Sized {
    fn decode(packet: &mut Packet) -> Result<Self>;
}

macro_rules! impl_wire_number {
    ($t:ty, $n:literal) => {
        impl WireEncode for $t {
            fn encode(&self, packet: &mut Packet) {
                packet.append(&self.to_be_bytes());
            }
        }

        impl WireDecode for $t {
            fn decode(packet: &mut Packet) -> Result<Self> {
                Ok(<$t>::from_be_bytes(packet.read_array::<$n>()?))
            }
        }
    };
}

impl_wire_number!(u8, 1);
impl_wire_number!(u16, 2);
impl_wire_number!(u32, 4);
impl_wire_number!(u64, 8);
impl_wire_number!(i8, 1);
impl_wire_number!(i16, 2);
impl_wire_number!(i32, 4);
impl_wire_number!(i64, 8);

impl WireEncode for f32 {
    fn encode(&self, packet: &mut Packet) {
        packet.append(&self.to_bits().to_be_bytes());
    }
}

impl WireDecode for f32 {
    fn decode(packet: &mut Packet) -> Result<Self> {
        Ok(f32::from_bits(u32::decode(packet)?))
    }
}

impl WireEncode for f64 {
    fn encode(&self, packet: &mut Packet) {
        packet.append(&self.to_bits().to_be_bytes());
    }
}

impl WireDecode for f64 {
    fn decode(packet: &mut Packet) -> Result<Self> {
        Ok(f64::from_bits(u64::decode(packet)?))
    }
}

impl WireEncode for bool {
    fn encode(&self, packet: &mut Packet) {
        packet.append(&[u8::from(*self)]);
    }
}

impl WireDecode for bool {
    fn decode(packet: &mut Packet) -> Result<Self> {
        match packet.read_array::<1>()?[0] {
            0 => Ok(false),
            1 => Ok(true),
            // Anything else is an encoding the protocol never produces.
            other => {
                packet.invalidate();
                Err(ProtocolError::rule(
                    "bool",
                    format!("invalid boolean byte: {other:#04x}"),
                ))
            }
        }
    }
}

impl WireEncode for String {
    fn encode(&self, packet: &mut Packet) {
        packet.pack(&(self.len() as u32));
        packet.append(self.as_bytes());
    }
}

impl WireDecode for String {
    fn decode(packet: &mut Packet) -> Result<Self> {
        let len = u32::decode(packet)? as usize;
        if len > packet.remaining() {
            let remaining = packet.remaining();
            packet.invalidate();
            return Err(ProtocolError::Underrun {
                requested: len,
                remaining,
            });
        }
        let mut bytes = vec![0u8; len];
        packet.read(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| {
            packet.invalidate();
            ProtocolError::rule(
                rules::MUST_BE_VALID_UTF8,
                format!("string payload is not valid UTF-8: {e}"),
            )
        })
    }
}

impl WireEncode for &str {
    fn encode(&self, packet: &mut Packet) {
        packet.pack(&(self.len() as u32));
        packet.append(self.as_bytes());
    }
}

impl<T: WireEncode> WireEncode for Vec<T> {
    fn encode(&self, packet: &mut Packet) {
        packet.pack(&(self.len() as u32));
        for item in self {
            item.encode(packet);
        }
    }
}

impl<T: WireDecode> WireDecode for Vec<T> {
    fn decode(packet: &mut Packet) -> Result<Self> {
        let count = u32::decode(packet)? as usize;
        // Every element occupies at least one byte on the wire, so a count
        // above the remaining byte total is a lie about the payload.
        if count > packet.remaining() {
            let remaining = packet.remaining();
            packet.invalidate();
            return Err(ProtocolError::Underrun {
                requested: count,
                remaining,
            });
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(T::decode(packet)?);
        }
        Ok(out)
    }
}

impl<const N: usize> WireEncode for [f32; N] {
    fn encode(&self, packet: &mut Packet) {
        for v in self {
            v.encode(packet);
        }
    }
}

impl<const N: usize> WireDecode for [f32; N] {
    fn decode(packet: &mut Packet) -> Result<Self> {
        let mut out = [0f32; N];
        for v in &mut out {
            *v = f32::decode(packet)?;
        }
        Ok(out)
    }
}
