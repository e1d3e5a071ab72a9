//! # SceneSync
//!
//! State-replication protocol core for real-time 2D engines.
//!
//! SceneSync keeps a server's authoritative scene and many independent
//! clients converging on the same entity state over an unreliable network:
//! full snapshots establish a baseline, counter-ranged deltas carry only
//! what changed, and a structural event side channel reports entity
//! creation, deletion, and application signals.
//!
//! ## Architecture
//! - **Core codec** ([`core`]): big-endian packet buffer with independent
//!   write/read cursors and a permanent poison flag, wire traits for
//!   primitive and composite values, and the fluent rule-chain extractor
//!   for zero-trust input validation
//! - **Registry** ([`registry`]): concurrent client registry keyed by
//!   network identity, with explicit lock tokens for iteration
//! - **Replication** ([`replication`]): entity identity and capability
//!   traits, the structural event channel, and the sync engine itself
//! - **Transport** ([`transport`]): the outgoing-delivery seam; the core
//!   never performs I/O
//! - **Utilities** ([`utils`]): bounded compression and structured logging
//!
//! ## Security
//! Every byte off the wire is hostile until validated: short reads poison
//! the packet permanently, declared lengths are checked against remaining
//! bytes before allocation, and decompression output is bounded before the
//! first buffer is created.
//!
//! ## Example
//! ```
//! use scenesync::{Packet, ProtocolError};
//!
//! let mut packet = Packet::new();
//! packet.pack(&42u32);
//! packet.pack(&"hello");
//!
//! assert_eq!(packet.unpack::<u32>().unwrap(), 42);
//! assert_eq!(packet.unpack::<String>().unwrap(), "hello");
//! assert_eq!(packet.remaining(), 0);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod registry;
pub mod replication;
pub mod transport;
pub mod utils;

pub use crate::config::ReplicationConfig;
pub use crate::core::extract::FieldChain;
pub use crate::core::packet::Packet;
pub use crate::core::wire::{WireDecode, WireEncode};
pub use crate::error::{ProtocolError, Result};
pub use crate::registry::{ClientRegistry, Identity, RegistryLock};
pub use crate::replication::engine::{DeltaOutcome, SceneReplication, SyncState};
pub use crate::replication::entity::{
    EntityCategory, EntityFactory, EntityId, ReplicatedEntity, ReplicationContext,
};
pub use crate::replication::event::{SceneEventKind, SceneNetEvent};
pub use crate::replication::FrameKind;
pub use crate::transport::{LoopbackTransport, Transport};
