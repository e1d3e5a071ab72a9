//! # Core Protocol Components
//!
//! Low-level packet handling, wire encoding, and validated extraction.
//!
//! This module is the foundation the replication layers build on: a cursor
//! tracking byte buffer, host/network byte-order conversion for every
//! primitive, and the rule-chain layer that validates untrusted bytes.
//!
//! ## Components
//! - **Packet**: growable buffer with write/read cursors and a permanent
//!   poison flag
//! - **Wire**: big-endian encode/decode for primitives and length-prefixed
//!   sequences
//! - **Extract**: fluent, short-circuiting validation over a packet
//!
//! ## Security
//! - Declared lengths are checked against remaining bytes before allocation
//! - A malformed read poisons the packet permanently; nothing ever reads
//!   past the buffer

pub mod extract;
pub mod packet;
pub mod wire;
