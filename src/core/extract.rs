//! # Rule-Chain Extraction
//!
//! Fluent validation pipeline over a [`Packet`], so that security-relevant
//! field-by-field checks cannot accidentally be skipped.
//!
//! Each rule consumes the chain by value, applies one predicate, and either
//! returns the chain unchanged or fails it with a structured error carrying
//! the rule's name and a human-readable message. After the first failure
//! every later rule is a no-op; the terminal collapses the chain into a
//! `Result`.
//!
//! ## Size rules run before the payload is touched
//! `size_range` and `size_must_equal` peek the length prefix at the cursor
//! *before* the matching read is attempted, so a peer claiming an absurd
//! string or sequence length is rejected without allocating or copying a
//! single payload byte.
//!
//! ## Example
//! ```
//! use scenesync::core::packet::Packet;
//!
//! let mut packet = Packet::new();
//! packet.pack(&String::from("player-one"));
//! packet.pack(&42u16);
//!
//! let name = packet
//!     .extract::<String>()
//!     .size_range(1, 64)
//!     .must_be_valid_utf8()
//!     .end()?;
//! let slot = packet.extract::<u16>().range(0, 128).end()?;
//! assert_eq!(name, "player-one");
//! assert_eq!(slot, 42);
//! # Ok::<(), scenesync::error::ProtocolError>(())
//! ```
//!
//! A failed chain also poisons the underlying packet, so surrounding code
//! cannot keep extracting from bytes that already proved malformed. No chain
//! path panics or reads out of bounds.

use crate::config::LENGTH_PREFIX_BYTES;
use crate::core::packet::Packet;
use crate::core::wire::WireDecode;
use crate::error::{rules, ProtocolError, Result};
use std::fmt::Debug;

impl Packet {
    /// Begin a rule chain for the next value at the read cursor. Nothing is
    /// consumed until a rule or terminal needs the value.
    pub fn extract<T: WireDecode>(&mut self) -> FieldChain<'_, T> {
        FieldChain {
            packet: self,
            value: None,
            error: None,
        }
    }
}

/// One in-flight extraction: either a not-yet-read slot, a concretely
/// extracted value, or a failure. Lives for a single decode expression.
#[must_use = "a rule chain does nothing until a terminal consumes it"]
pub struct FieldChain<'p, T: WireDecode> {
    packet: &'p mut Packet,
    value: Option<T>,
    error: Option<ProtocolError>,
}

impl<'p, T: WireDecode> FieldChain<'p, T> {
    /// Whether a previous rule already failed the chain.
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// Perform the unpack and store the result. Idempotent: calling it again
    /// while the chain is alive does not consume more bytes.
    pub fn extract(mut self) -> Self {
        self.ensure_extracted();
        self
    }

    fn ensure_extracted(&mut self) {
        if self.error.is_none() && self.value.is_none() {
            match self.packet.unpack::<T>() {
                Ok(v) => self.value = Some(v),
                Err(e) => self.error = Some(e),
            }
        }
    }

    fn fail(mut self, rule: &str, message: String) -> Self {
        if self.error.is_none() {
            self.packet.invalidate();
            self.error = Some(ProtocolError::rule(rule, message));
        }
        self
    }

    /// Peek the length prefix and require `min <= length <= max`, rejecting
    /// any declared length that exceeds the bytes actually remaining. Must
    /// run before the value is extracted.
    pub fn size_range(mut self, min: u32, max: u32) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.value.is_some() {
            return self.fail(
                rules::SIZE_RANGE,
                String::from("size rule applied after the value was extracted"),
            );
        }
        match self.packet.peek_length() {
            Ok(len) => {
                let payload = self.packet.remaining().saturating_sub(LENGTH_PREFIX_BYTES);
                if len as usize > payload {
                    self.fail(
                        rules::SIZE_RANGE,
                        format!("declared length {len} exceeds {payload} remaining bytes"),
                    )
                } else if len < min || len > max {
                    self.fail(
                        rules::SIZE_RANGE,
                        format!("length {len} outside [{min}, {max}]"),
                    )
                } else {
                    self
                }
            }
            Err(e) => {
                self.error = Some(e);
                self
            }
        }
    }

    /// Peek the length prefix and require it to equal `expected` exactly.
    pub fn size_must_equal(mut self, expected: u32) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.value.is_some() {
            return self.fail(
                rules::SIZE_MUST_EQUAL,
                String::from("size rule applied after the value was extracted"),
            );
        }
        match self.packet.peek_length() {
            Ok(len) => {
                let payload = self.packet.remaining().saturating_sub(LENGTH_PREFIX_BYTES);
                if len as usize > payload {
                    self.fail(
                        rules::SIZE_MUST_EQUAL,
                        format!("declared length {len} exceeds {payload} remaining bytes"),
                    )
                } else if len != expected {
                    self.fail(
                        rules::SIZE_MUST_EQUAL,
                        format!("length {len}, expected {expected}"),
                    )
                } else {
                    self
                }
            }
            Err(e) => {
                self.error = Some(e);
                self
            }
        }
    }

    /// Run `f` only while the chain has not failed; its error fails the
    /// chain like any rule.
    pub fn and_then<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&T, &mut Packet) -> Result<()>,
    {
        self.ensure_extracted();
        if self.error.is_none() {
            if let Some(value) = self.value.as_ref() {
                if let Err(e) = f(value, self.packet) {
                    self.packet.invalidate();
                    self.error = Some(e);
                }
            }
        }
        self
    }

    /// Commit the value into caller storage, consuming the chain's own copy.
    pub fn apply(mut self, dest: &mut T) -> Result<()> {
        self.ensure_extracted();
        match (self.value.take(), self.error.take()) {
            (Some(v), None) => {
                *dest = v;
                Ok(())
            }
            (_, Some(e)) => Err(e),
            // ensure_extracted always fills one of the two.
            (None, None) => Err(ProtocolError::PoisonedPacket),
        }
    }

    /// Collapse the chain: the extracted value on success, the first rule or
    /// codec error otherwise.
    pub fn end(mut self) -> Result<T> {
        self.ensure_extracted();
        match (self.value.take(), self.error.take()) {
            (Some(v), None) => Ok(v),
            (_, Some(e)) => Err(e),
            (None, None) => Err(ProtocolError::PoisonedPacket),
        }
    }

    /// Like [`end`](Self::end), but additionally demands the read cursor has
    /// reached the end of the packet, catching trailing garbage.
    pub fn finish(mut self) -> Result<T> {
        self.ensure_extracted();
        if self.error.is_none() && self.packet.remaining() != 0 {
            let remaining = self.packet.remaining();
            self.packet.invalidate();
            self.error = Some(ProtocolError::rule(
                rules::TRAILING_BYTES,
                format!("{remaining} unread bytes after the final field"),
            ));
        }
        self.end()
    }
}

impl<'p, T: WireDecode + PartialOrd + Debug> FieldChain<'p, T> {
    /// Require `min <= value <= max` (inclusive).
    pub fn range(mut self, min: T, max: T) -> Self {
        self.ensure_extracted();
        if self.error.is_some() {
            return self;
        }
        match self.value.as_ref() {
            Some(v) if *v < min || *v > max => {
                let msg = format!("value {v:?} outside [{min:?}, {max:?}]");
                self.fail(rules::RANGE, msg)
            }
            _ => self,
        }
    }

    /// Require `value < bound`.
    pub fn strict_less(mut self, bound: T) -> Self {
        self.ensure_extracted();
        if self.error.is_some() {
            return self;
        }
        match self.value.as_ref() {
            Some(v) if *v >= bound => {
                let msg = format!("value {v:?} not strictly below {bound:?}");
                self.fail(rules::STRICT_LESS, msg)
            }
            _ => self,
        }
    }

    /// Require `value <= bound`.
    pub fn less(mut self, bound: T) -> Self {
        self.ensure_extracted();
        if self.error.is_some() {
            return self;
        }
        match self.value.as_ref() {
            Some(v) if *v > bound => {
                let msg = format!("value {v:?} above bound {bound:?}");
                self.fail(rules::LESS, msg)
            }
            _ => self,
        }
    }
}

impl<'p, T: WireDecode + PartialEq + Debug> FieldChain<'p, T> {
    /// Require the value to equal `expected` exactly.
    pub fn must_equal(mut self, expected: T) -> Self {
        self.ensure_extracted();
        if self.error.is_some() {
            return self;
        }
        match self.value.as_ref() {
            Some(v) if *v != expected => {
                let msg = format!("value {v:?}, expected {expected:?}");
                self.fail(rules::MUST_EQUAL, msg)
            }
            _ => self,
        }
    }
}

impl<'p, T: WireDecode + AsRef<[u8]>> FieldChain<'p, T> {
    /// Require the extracted bytes to be well-formed UTF-8.
    pub fn must_be_valid_utf8(mut self) -> Self {
        self.ensure_extracted();
        if self.error.is_some() {
            return self;
        }
        match self.value.as_ref() {
            Some(v) => match std::str::from_utf8(v.as_ref()) {
                Ok(_) => self,
                Err(e) => {
                    let msg = format!("payload is not valid UTF-8: {e}");
                    self.fail(rules::MUST_BE_VALID_UTF8, msg)
                }
            },
            None => self,
        }
    }
}

impl<'p> FieldChain<'p, u32> {
    /// Run `f` exactly `value` times, lending the packet to each iteration
    /// and short-circuiting on its first error.
    ///
    /// The bound is always an already-extracted (and therefore already
    /// size-validated) count; raw attacker integers never drive this loop
    /// directly.
    pub fn and_for_each<F>(mut self, mut f: F) -> Self
    where
        F: FnMut(u32, &mut Packet) -> Result<()>,
    {
        self.ensure_extracted();
        if self.error.is_some() {
            return self;
        }
        let count = match self.value {
            Some(count) => count,
            None => return self,
        };
        for index in 0..count {
            if let Err(e) = f(index, self.packet) {
                self.packet.invalidate();
                self.error = Some(e);
                break;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_range_accepts_and_rejects() {
        let mut packet = Packet::new();
        packet.pack(&10u16);
        packet.pack(&10u16);

        assert_eq!(packet.extract::<u16>().range(0, 20).end().unwrap(), 10);

        let err = packet.extract::<u16>().range(0, 5).end().unwrap_err();
        assert!(matches!(err, ProtocolError::RuleViolation { ref rule, .. } if rule == rules::RANGE));
        assert!(!packet.is_valid());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_must_equal_and_less_bounds() {
        let mut packet = Packet::new();
        packet.pack(&7u8);
        packet.pack(&7u8);
        packet.pack(&7u8);
        packet.pack(&7u8);

        assert_eq!(packet.extract::<u8>().must_equal(7).end().unwrap(), 7);
        assert_eq!(packet.extract::<u8>().less(7).end().unwrap(), 7);
        assert!(packet.extract::<u8>().strict_less(7).end().is_err());
        // Chain failure poisoned the packet; nothing more can be read.
        assert!(matches!(
            packet.extract::<u8>().end().unwrap_err(),
            ProtocolError::PoisonedPacket
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_size_range_peeks_without_consuming_payload() {
        let mut packet = Packet::new();
        packet.pack(&String::from("abcdef"));

        // Too long: rejected before the payload is read.
        let err = packet
            .extract::<String>()
            .size_range(0, 3)
            .end()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::RuleViolation { ref rule, .. } if rule == rules::SIZE_RANGE));
    }

    #[test]
    fn test_size_rule_rejects_declared_length_lie() {
        let mut packet = Packet::new();
        packet.pack(&500u32); // claims 500 payload bytes
        packet.append(b"abc");

        let err = packet
            .extract::<String>()
            .size_range(0, 1000)
            .end()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::RuleViolation { ref rule, .. } if rule == rules::SIZE_RANGE));
        assert!(!packet.is_valid());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_size_must_equal() {
        let mut packet = Packet::new();
        packet.pack(&vec![1u8, 2, 3]);

        let v = packet
            .extract::<Vec<u8>>()
            .size_must_equal(3)
            .end()
            .unwrap();
        assert_eq!(v, vec![1, 2, 3]);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_apply_commits_into_caller_storage() {
        let mut packet = Packet::new();
        packet.pack(&99u32);

        let mut dest = 0u32;
        packet.extract::<u32>().less(100).apply(&mut dest).unwrap();
        assert_eq!(dest, 99);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_and_for_each_bounded_loop() {
        let mut packet = Packet::new();
        packet.pack(&3u32);
        packet.pack(&10u16);
        packet.pack(&20u16);
        packet.pack(&30u16);

        let mut sum = 0u32;
        let count = packet
            .extract::<u32>()
            .less(16)
            .and_for_each(|_, p| {
                sum += u32::from(p.extract::<u16>().less(100).end()?);
                Ok(())
            })
            .end()
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(sum, 60);
    }

    #[test]
    fn test_and_for_each_short_circuits_on_truncation() {
        let mut packet = Packet::new();
        packet.pack(&3u32);
        packet.pack(&10u16); // two elements missing

        let result = packet
            .extract::<u32>()
            .less(16)
            .and_for_each(|_, p| p.extract::<u16>().end().map(|_| ()))
            .end();
        assert!(result.is_err());
        assert!(!packet.is_valid());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_finish_rejects_trailing_garbage() {
        let mut packet = Packet::new();
        packet.pack(&1u8);
        packet.append(&[0xCC]);

        let err = packet.extract::<u8>().finish().unwrap_err();
        assert!(matches!(err, ProtocolError::RuleViolation { ref rule, .. } if rule == rules::TRAILING_BYTES));

        let mut clean = Packet::new();
        clean.pack(&1u8);
        assert_eq!(clean.extract::<u8>().finish().unwrap(), 1);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_utf8_rule_on_raw_bytes() {
        let mut packet = Packet::new();
        packet.pack(&vec![0xFFu8, 0xFE]);

        let err = packet
            .extract::<Vec<u8>>()
            .must_be_valid_utf8()
            .end()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::RuleViolation { ref rule, .. } if rule == rules::MUST_BE_VALID_UTF8));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_extract_is_idempotent() {
        let mut packet = Packet::new();
        packet.pack(&5u8);
        packet.pack(&6u8);

        let v = packet.extract::<u8>().extract().extract().end().unwrap();
        assert_eq!(v, 5);
        assert_eq!(packet.remaining(), 1);
    }
}
