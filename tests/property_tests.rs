//! Property-based tests using proptest
//!
//! These tests validate codec and safety invariants across a wide range of
//! randomly generated inputs, ensuring robust behavior under all conditions.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use scenesync::config::MAX_DECOMPRESSED_SIZE;
use scenesync::utils::compression::{compress, decompress, CompressionKind};
use scenesync::{Packet, ProtocolError};

// Property: primitive values round-trip through the packet unchanged
proptest! {
    #[test]
    fn prop_u32_roundtrip(value in any::<u32>()) {
        let mut packet = Packet::new();
        packet.pack(&value);
        prop_assert_eq!(packet.unpack::<u32>().expect("decode"), value);
        prop_assert_eq!(packet.remaining(), 0);
    }
}

proptest! {
    #[test]
    fn prop_i64_roundtrip(value in any::<i64>()) {
        let mut packet = Packet::new();
        packet.pack(&value);
        prop_assert_eq!(packet.unpack::<i64>().expect("decode"), value);
    }
}

// Property: floats round-trip bit-exactly, including NaN payloads
proptest! {
    #[test]
    fn prop_f64_bit_exact_roundtrip(bits in any::<u64>()) {
        let value = f64::from_bits(bits);
        let mut packet = Packet::new();
        packet.pack(&value);
        let decoded = packet.unpack::<f64>().expect("decode");
        prop_assert_eq!(decoded.to_bits(), bits);
    }
}

// Property: strings round-trip unchanged
proptest! {
    #[test]
    fn prop_string_roundtrip(value in ".{0,256}") {
        let mut packet = Packet::new();
        packet.pack(&value);
        prop_assert_eq!(packet.unpack::<String>().expect("decode"), value);
    }
}

// Property: sequences round-trip unchanged
proptest! {
    #[test]
    fn prop_vec_roundtrip(values in prop::collection::vec(any::<u16>(), 0..512)) {
        let mut packet = Packet::new();
        packet.pack(&values);
        prop_assert_eq!(packet.unpack::<Vec<u16>>().expect("decode"), values);
    }
}

// Property: decoding arbitrary bytes never panics, and a failed read
// poisons the packet permanently
proptest! {
    #[test]
    fn prop_arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut packet = Packet::from_bytes(&data);
        let _ = packet.unpack::<u64>();
        let _ = packet.unpack::<String>();
        let _ = packet.unpack::<Vec<u32>>();
        if !packet.is_valid() {
            prop_assert!(matches!(
                packet.unpack::<u8>().unwrap_err(),
                ProtocolError::PoisonedPacket
            ));
        }
    }
}

// Property: truncating a valid packet at any offset fails cleanly instead
// of misreading
proptest! {
    #[test]
    fn prop_truncation_at_any_offset_is_safe(
        value in any::<u64>(),
        text in "[a-z]{1,32}",
        cut in 0usize..8,
    ) {
        let mut packet = Packet::new();
        packet.pack(&value);
        packet.pack(&text);
        let bytes = packet.as_slice();
        // At least 13 bytes are present (u64 + length prefix + 1 char), so
        // dropping 1..=8 always cuts real payload.
        let keep = bytes.len() - 1 - cut;

        let mut truncated = Packet::from_bytes(&bytes[..keep]);
        let mut failed = false;
        if let Ok(v) = truncated.unpack::<u64>() {
            prop_assert_eq!(v, value);
            match truncated.unpack::<String>() {
                Ok(s) => prop_assert_eq!(s, text),
                Err(_) => failed = true,
            }
        } else {
            failed = true;
        }
        // Something was cut, so at least one read must have failed, and the
        // failure must have poisoned the packet.
        prop_assert!(failed);
        prop_assert!(!truncated.is_valid());
    }
}

// Property: a length prefix claiming more than the remaining bytes is
// rejected before any allocation
proptest! {
    #[test]
    fn prop_length_lie_rejected(claim in 1u32..u32::MAX, tail in prop::collection::vec(any::<u8>(), 0..16)) {
        prop_assume!(claim as usize > tail.len());
        let mut packet = Packet::new();
        packet.pack(&claim);
        packet.append(&tail);

        prop_assert!(packet.unpack::<String>().is_err());
        prop_assert!(!packet.is_valid());
    }
}

// Property: LZ4 compression round-trip preserves data
proptest! {
    #[test]
    fn prop_lz4_roundtrip(data in prop::collection::vec(any::<u8>(), 0..50000)) {
        let compressed = compress(&data, CompressionKind::Lz4).expect("compress");
        let decompressed = decompress(&compressed, CompressionKind::Lz4, MAX_DECOMPRESSED_SIZE)
            .expect("decompress");
        prop_assert_eq!(decompressed, data);
    }
}

// Property: Zstd compression round-trip preserves data
proptest! {
    #[test]
    fn prop_zstd_roundtrip(data in prop::collection::vec(any::<u8>(), 0..50000)) {
        let compressed = compress(&data, CompressionKind::Zstd).expect("compress");
        let decompressed = decompress(&compressed, CompressionKind::Zstd, MAX_DECOMPRESSED_SIZE)
            .expect("decompress");
        prop_assert_eq!(decompressed, data);
    }
}

// Property: decompressing arbitrary bytes returns an error or bounded
// output, never panics and never exceeds the bound
proptest! {
    #[test]
    fn prop_decompression_is_bounded(data in prop::collection::vec(any::<u8>(), 0..1024)) {
        for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
            if let Ok(out) = decompress(&data, kind, 4096) {
                prop_assert!(out.len() <= 4096);
            }
        }
    }
}

// Property: rule-chain bounds hold for every input
proptest! {
    #[test]
    fn prop_range_rule_matches_plain_comparison(value in any::<u32>()) {
        let mut packet = Packet::new();
        packet.pack(&value);
        let result = packet.extract::<u32>().range(100, 200).end();
        prop_assert_eq!(result.is_ok(), (100..=200).contains(&value));
        if result.is_err() {
            prop_assert!(!packet.is_valid());
        }
    }
}
