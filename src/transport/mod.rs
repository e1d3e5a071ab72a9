//! # Transport Seam
//!
//! The replication core is transport-agnostic: it is handed a specific
//! connection's send primitive from outside and never performs I/O itself.
//! [`Transport`] is that seam; the registry's broadcast helpers and the
//! replication tick hand fully built frames to it per peer.
//!
//! [`LoopbackTransport`] is an in-memory implementation backed by
//! per-identity queues, used by the test suites and local demos.

use crate::error::{ProtocolError, Result};
use crate::registry::Identity;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Outgoing delivery primitive supplied by the embedding engine.
pub trait Transport: Send + Sync {
    /// Hand one frame off for delivery to a single peer. Delivery itself
    /// (queuing, retries, teardown of stalled peers) is the transport's
    /// business, not the core's.
    fn send_to(&self, target: &Identity, frame: Bytes) -> Result<()>;
}

/// In-memory transport delivering frames into per-identity FIFO queues.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    queues: Mutex<HashMap<Identity, VecDeque<Bytes>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Identity, VecDeque<Bytes>>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pop the oldest frame queued for `target`, if any.
    pub fn recv(&self, target: &Identity) -> Option<Bytes> {
        self.lock().get_mut(target).and_then(VecDeque::pop_front)
    }

    /// Drain every frame queued for `target`, oldest first.
    pub fn drain(&self, target: &Identity) -> Vec<Bytes> {
        self.lock()
            .get_mut(target)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Number of frames queued for `target`.
    pub fn pending(&self, target: &Identity) -> usize {
        self.lock().get(target).map_or(0, VecDeque::len)
    }
}

impl Transport for LoopbackTransport {
    fn send_to(&self, target: &Identity, frame: Bytes) -> Result<()> {
        if frame.is_empty() {
            return Err(ProtocolError::TransportError(String::from(
                "refusing to send an empty frame",
            )));
        }
        self.lock().entry(*target).or_default().push_back(frame);
        Ok(())
    }
}
