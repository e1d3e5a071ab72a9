//! # Client Identity & Registry
//!
//! Thread-safe membership tracking for exactly the set of currently
//! connected peers.
//!
//! [`Identity`] is the address + port pair that keys per-client data
//! everywhere in the protocol. [`ClientRegistry`] maps identities to
//! shared-ownership handles of opaque per-connection state, optionally
//! recording connect/disconnect transitions into an event log drained
//! explicitly by the owner.
//!
//! ## Locking Discipline
//! Point operations (`add`, `remove`, `get`, broadcast) are individually
//! atomic under the internal lock. Bulk iteration and bulk mutation require
//! an explicit lock token from [`ClientRegistry::acquire`]; every method
//! that accepts a token verifies it actually guards *this* registry and
//! panics otherwise. A "wrong lock" bug is a local logic defect and must be
//! loud, never a silent race.

use crate::core::packet::Packet;
use crate::core::wire::{WireDecode, WireEncode};
use crate::error::{ProtocolError, Result};
use crate::transport::Transport;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Address + port pair identifying one connected peer. Two identities are
/// equal iff both address and port match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    addr: IpAddr,
    port: u16,
}

const IDENTITY_TAG_V4: u8 = 4;
const IDENTITY_TAG_V6: u8 = 6;

impl Identity {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

impl From<SocketAddr> for Identity {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl WireEncode for Identity {
    fn encode(&self, packet: &mut Packet) {
        match self.addr {
            IpAddr::V4(ip) => {
                packet.pack(&IDENTITY_TAG_V4);
                packet.append(&ip.octets());
            }
            IpAddr::V6(ip) => {
                packet.pack(&IDENTITY_TAG_V6);
                packet.append(&ip.octets());
            }
        }
        packet.pack(&self.port);
    }
}

impl WireDecode for Identity {
    fn decode(packet: &mut Packet) -> Result<Self> {
        let tag = u8::decode(packet)?;
        let addr = match tag {
            IDENTITY_TAG_V4 => IpAddr::V4(Ipv4Addr::from(packet.read_array::<4>()?)),
            IDENTITY_TAG_V6 => IpAddr::V6(Ipv6Addr::from(packet.read_array::<16>()?)),
            other => {
                packet.invalidate();
                return Err(ProtocolError::rule(
                    "identity",
                    format!("invalid address family tag: {other}"),
                ));
            }
        };
        let port = u16::decode(packet)?;
        Ok(Self::new(addr, port))
    }
}

/// Connect/disconnect transition, appended to the registry's event log only
/// while watching is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientListEvent {
    Connected(Identity),
    Disconnected(Identity),
}

impl ClientListEvent {
    pub fn identity(&self) -> Identity {
        match self {
            ClientListEvent::Connected(id) | ClientListEvent::Disconnected(id) => *id,
        }
    }
}

struct RegistryInner<C> {
    clients: HashMap<Identity, Arc<C>>,
    events: VecDeque<ClientListEvent>,
    watching: bool,
}

impl<C> RegistryInner<C> {
    fn record(&mut self, event: ClientListEvent) {
        if self.watching {
            self.events.push_back(event);
        }
    }
}

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Concurrent map from [`Identity`] to per-connection state.
///
/// The registry only needs shared-ownership handles to the per-connection
/// objects, never their internals; `C` is opaque here.
pub struct ClientRegistry<C> {
    id: u64,
    inner: Mutex<RegistryInner<C>>,
}

/// Lock token returned by [`ClientRegistry::acquire`]. Holding one makes the
/// caller's critical section visible in the type system; every bulk method
/// verifies the token against the registry it is passed to.
pub struct RegistryLock<'r, C> {
    registry_id: u64,
    guard: MutexGuard<'r, RegistryInner<C>>,
}

impl<C> Default for ClientRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ClientRegistry<C> {
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(RegistryInner {
                clients: HashMap::new(),
                events: VecDeque::new(),
                watching: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner<C>> {
        // A poisoned mutex means a panic elsewhere already took the process
        // into undefined territory; recover the data and keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_token(&self, token_registry_id: u64) {
        if token_registry_id != self.id {
            panic!(
                "registry lock token mismatch: token guards registry {} but was passed to registry {}",
                token_registry_id, self.id
            );
        }
    }

    /// Insert a peer. Returns `false` (and changes nothing) if the identity
    /// is already present.
    pub fn add(&self, identity: Identity, client: Arc<C>) -> bool {
        let mut inner = self.lock();
        if inner.clients.contains_key(&identity) {
            return false;
        }
        inner.clients.insert(identity, client);
        inner.record(ClientListEvent::Connected(identity));
        debug!(%identity, "client added to registry");
        true
    }

    /// Remove a peer, returning its handle if it was present.
    pub fn remove(&self, identity: &Identity) -> Option<Arc<C>> {
        let mut inner = self.lock();
        let removed = inner.clients.remove(identity);
        if removed.is_some() {
            inner.record(ClientListEvent::Disconnected(*identity));
            debug!(%identity, "client removed from registry");
        }
        removed
    }

    pub fn get(&self, identity: &Identity) -> Option<Arc<C>> {
        self.lock().clients.get(identity).cloned()
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.lock().clients.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().clients.is_empty()
    }

    /// Enable or disable the connect/disconnect event log.
    pub fn set_watching(&self, watching: bool) {
        self.lock().watching = watching;
    }

    /// Drain all queued connect/disconnect events, oldest first. The queue
    /// is never cleared implicitly.
    pub fn drain_events(&self) -> Vec<ClientListEvent> {
        self.lock().events.drain(..).collect()
    }

    /// Snapshot of all currently connected identities, taken atomically.
    pub fn identities(&self) -> Vec<Identity> {
        self.lock().clients.keys().copied().collect()
    }

    /// Acquire the registry's lock for bulk iteration or mutation. The
    /// returned token must be passed back into [`iter`](Self::iter) and
    /// [`remove_locked`](Self::remove_locked).
    pub fn acquire(&self) -> RegistryLock<'_, C> {
        RegistryLock {
            registry_id: self.id,
            guard: self.lock(),
        }
    }

    /// Iterate all peers under an explicit lock token.
    ///
    /// # Panics
    /// Panics if `token` was acquired from a different registry.
    pub fn iter<'a>(
        &self,
        token: &'a RegistryLock<'_, C>,
    ) -> impl Iterator<Item = (&'a Identity, &'a Arc<C>)> {
        self.check_token(token.registry_id);
        token.guard.clients.iter()
    }

    /// Remove a peer while already holding the registry's lock.
    ///
    /// # Panics
    /// Panics if `token` was acquired from a different registry.
    pub fn remove_locked(
        &self,
        token: &mut RegistryLock<'_, C>,
        identity: &Identity,
    ) -> Option<Arc<C>> {
        self.check_token(token.registry_id);
        let removed = token.guard.clients.remove(identity);
        if removed.is_some() {
            token.guard.record(ClientListEvent::Disconnected(*identity));
        }
        removed
    }

    /// Atomically transfer one peer into another registry, holding both
    /// locks for the duration. Fails if the destination already holds the
    /// identity or this registry does not.
    pub fn move_to(&self, destination: &ClientRegistry<C>, identity: &Identity) -> Result<()> {
        if self.id == destination.id {
            return Err(ProtocolError::TransferFailed(format!(
                "cannot move {identity} into the registry that already owns it"
            )));
        }

        // Lock in a globally consistent order to avoid deadlock.
        let (mut first, mut second) = if self.id < destination.id {
            let a = self.lock();
            let b = destination.lock();
            (a, b)
        } else {
            let b = destination.lock();
            let a = self.lock();
            (a, b)
        };
        let (source, dest) = if self.id < destination.id {
            (&mut first, &mut second)
        } else {
            (&mut second, &mut first)
        };

        if dest.clients.contains_key(identity) {
            return Err(ProtocolError::TransferFailed(format!(
                "destination registry already holds {identity}"
            )));
        }
        let client = source.clients.remove(identity).ok_or_else(|| {
            ProtocolError::TransferFailed(format!("source registry does not hold {identity}"))
        })?;
        source.record(ClientListEvent::Disconnected(*identity));
        dest.clients.insert(*identity, client);
        dest.record(ClientListEvent::Connected(*identity));
        debug!(%identity, "client moved between registries");
        Ok(())
    }

    /// Hand one frame to the transport for every connected peer, iterating
    /// under the lock. Individual delivery failures are logged and skipped;
    /// returns the number of peers the frame was handed off for.
    pub fn send_to_all(&self, transport: &dyn Transport, frame: &Bytes) -> usize {
        let inner = self.lock();
        let mut sent = 0;
        for identity in inner.clients.keys() {
            match transport.send_to(identity, frame.clone()) {
                Ok(()) => sent += 1,
                Err(e) => warn!(%identity, error = %e, "broadcast delivery failed"),
            }
        }
        sent
    }
}
