//! # Frame Compression
//!
//! Optional LZ4 and Zstd compression for replication frames, with strict
//! decompression bounds.
//!
//! ## Security
//! Decompression never allocates based on a peer-supplied size alone: the
//! claimed output size is checked against the caller's bound before any
//! buffer is created, and streaming decompression re-checks the bound on
//! every chunk. A frame claiming a multi-gigabyte output is rejected for a
//! few bytes of work.

use crate::config::MAX_DECOMPRESSED_SIZE;
use crate::error::{ProtocolError, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionKind {
    Lz4,
    Zstd,
}

/// Compress a full frame with the given algorithm.
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if the encoder fails.
pub fn compress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, 1)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            Ok(out)
        }
    }
}

/// Decompress a frame, refusing to produce more than `max_size` bytes.
///
/// # Errors
/// - `ProtocolError::DecompressionBoundExceeded` if the claimed or actual
///   output exceeds `max_size`
/// - `ProtocolError::DecompressionFailure` if the payload is malformed
pub fn decompress(data: &[u8], kind: CompressionKind, max_size: usize) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => {
            // lz4_flex prepends the uncompressed size as 4 little-endian
            // bytes; validate the claim before it drives an allocation.
            if data.len() < 4 {
                return Err(ProtocolError::DecompressionFailure);
            }
            let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed_size > max_size {
                return Err(ProtocolError::DecompressionBoundExceeded { bound: max_size });
            }

            let decompressed = lz4_flex::decompress_size_prepended(data)
                .map_err(|_| ProtocolError::DecompressionFailure)?;
            if decompressed.len() > max_size {
                return Err(ProtocolError::DecompressionBoundExceeded { bound: max_size });
            }
            Ok(decompressed)
        }
        CompressionKind::Zstd => {
            let mut reader =
                zstd::stream::Decoder::new(data).map_err(|_| ProtocolError::DecompressionFailure)?;

            // Read in chunks so the bound holds even when the zstd header
            // lies about the content size.
            use std::io::Read;
            let mut out = Vec::new();
            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        out.extend_from_slice(&buffer[..n]);
                        if out.len() > max_size {
                            return Err(ProtocolError::DecompressionBoundExceeded {
                                bound: max_size,
                            });
                        }
                    }
                    Err(_) => return Err(ProtocolError::DecompressionFailure),
                }
            }
            Ok(out)
        }
    }
}

/// Compress the frame if it meets the configured threshold, otherwise pass
/// it through. Returns the output and whether compression was applied.
pub fn maybe_compress(
    data: &[u8],
    kind: CompressionKind,
    threshold_bytes: usize,
) -> Result<(Vec<u8>, bool)> {
    if data.len() < threshold_bytes {
        Ok((data.to_vec(), false))
    } else {
        Ok((compress(data, kind)?, true))
    }
}

/// Decompress the frame only if the sender flagged it compressed. The bound
/// is the crate-wide [`MAX_DECOMPRESSED_SIZE`].
pub fn maybe_decompress(data: &[u8], kind: CompressionKind, was_compressed: bool) -> Result<Vec<u8>> {
    if was_compressed {
        decompress(data, kind, MAX_DECOMPRESSED_SIZE)
    } else {
        Ok(data.to_vec())
    }
}
