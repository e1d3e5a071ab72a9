//! # Error Types
//!
//! Comprehensive error handling for the replication protocol core.
//!
//! This module defines all error variants that can occur while encoding,
//! validating, or applying replicated state, from low-level codec underruns
//! to replication counter mismatches.
//!
//! ## Error Categories
//! - **Codec Errors**: underruns, poisoned packets, out-of-bounds patches
//! - **Rule Violations**: a value was extractable but failed a semantic check
//! - **Replication Errors**: counter gaps, unknown entity kinds or ids
//! - **Compression Errors**: decompression failures, output bound violations
//!
//! Every variant produced from peer-supplied bytes is recoverable: the
//! affected packet is discarded and the caller decides whether to drop the
//! peer. The one fatal condition in the crate — iterating a registry with a
//! lock token from a different registry — is a `panic!`, not an error value,
//! because it indicates a local logic bug rather than adversarial input.
//!
//! All errors implement `std::error::Error` for interoperability.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Names of the built-in extraction rules, used in [`ProtocolError::RuleViolation`].
pub mod rules {
    pub const RANGE: &str = "range";
    pub const MUST_EQUAL: &str = "must_equal";
    pub const STRICT_LESS: &str = "strict_less";
    pub const LESS: &str = "less";
    pub const SIZE_RANGE: &str = "size_range";
    pub const SIZE_MUST_EQUAL: &str = "size_must_equal";
    pub const MUST_BE_VALID_UTF8: &str = "must_be_valid_utf8";
    pub const TRAILING_BYTES: &str = "trailing-bytes";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    /// Fewer bytes remained in the packet than the read requested.
    /// The packet is poisoned; discard it.
    #[error("codec underrun: requested {requested} bytes, {remaining} remain")]
    Underrun { requested: usize, remaining: usize },

    /// A read was attempted on a packet whose validity flag was already
    /// cleared by an earlier malformed read.
    #[error("packet is poisoned; no further reads are possible")]
    PoisonedPacket,

    /// A patch or random-access read fell outside the packet's current size.
    #[error("out-of-bounds access at {pos} (+{len}) in packet of {size} bytes")]
    OutOfBounds { pos: usize, len: usize, size: usize },

    /// A value was structurally extractable but failed a semantic predicate.
    #[error("rule '{rule}' violated: {message}")]
    RuleViolation { rule: String, message: String },

    /// A delta frame's counter range does not continue from the receiver's
    /// remembered counter; recover by requesting a full snapshot.
    #[error("replication desync: have counter {have}, frame starts at {frame_start}")]
    Desync { have: u16, frame_start: u16 },

    #[error("invalid frame header")]
    InvalidHeader,

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("unknown entity kind tag: {0}")]
    UnknownEntityKind(u8),

    #[error("unknown entity id: {0}")]
    UnknownEntity(u32),

    #[error("invalid entity id: {0}")]
    InvalidEntityId(u32),

    /// The peer is already present in (or absent from) the registry the
    /// operation targets.
    #[error("registry transfer failed: {0}")]
    TransferFailed(String),

    /// A delta was requested for a client that has never received a full
    /// snapshot.
    #[error("client {0} is not synced; send a full snapshot first")]
    UnsyncedClient(String),

    #[error("decompression failed")]
    DecompressionFailure,

    /// Declared or actual decompressed size exceeds the configured bound.
    /// Treated by callers exactly like a codec underrun: discard the frame.
    #[error("decompressed size would exceed bound of {bound} bytes")]
    DecompressionBoundExceeded { bound: usize },

    #[error("compression failed")]
    CompressionFailure,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Build a rule violation from a rule name and message.
    pub fn rule(rule: &str, message: impl Into<String>) -> Self {
        ProtocolError::RuleViolation {
            rule: rule.to_string(),
            message: message.into(),
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
