//! # Utility Modules
//!
//! Supporting utilities used throughout the replication core.
//!
//! ## Components
//! - **Compression**: LZ4 and Zstd with strict decompression bounds
//! - **Logging**: Structured logging configuration
//!
//! ## Security
//! Decompression bomb protection: claimed output sizes are validated
//! against a hard bound before any allocation.

pub mod compression;
pub mod logging;

pub use compression::{compress, decompress, maybe_compress, maybe_decompress, CompressionKind};
