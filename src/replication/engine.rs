//! # Replication Engine
//!
//! Owns the authoritative collection of replicated entities and keeps every
//! observing client converging on it.
//!
//! Each observed client moves through three states: unsynced (nothing sent
//! yet), full-synced (received one complete snapshot), and delta-tracking
//! (receiving incremental frames). A full snapshot resets the client's
//! remembered update counter to the sender's current one; every delta frame
//! carries the counter range `{previous, current}` it covers, so a receiver
//! that missed a tick detects the gap and falls back to requesting a fresh
//! snapshot instead of applying a delta against stale state.
//!
//! The engine is not internally synchronized: it is driven by a single
//! replication-tick owner (typically the server's main loop), while the
//! [`ClientRegistry`] it consults supplies its own synchronization for
//! connects and disconnects arriving from network I/O.

use crate::config::CodecConfig;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::registry::{ClientRegistry, Identity};
use crate::replication::entity::{
    EntityCategory, EntityFactory, EntityId, ReplicatedEntity, ReplicationContext,
};
use crate::replication::event::SceneNetEvent;
use crate::replication::{expect_header, write_header, FrameKind};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, trace, warn};

/// Minimum wire size of one full-sync entity record (id + category + kind).
const FULL_ENTITY_MIN_BYTES: usize = 6;
/// Minimum wire size of one delta entity record (id only).
const DELTA_ENTITY_MIN_BYTES: usize = 4;
/// Wire size of one structural event (kind + id + payload flag).
const EVENT_MIN_BYTES: usize = 6;
/// Wire size of one needed-update request (id + field mask).
const NEEDED_UPDATE_BYTES: usize = 8;

/// Wrapping comparison over the 16-bit update-counter space: `a` is ahead
/// of `b` if it is within the forward half of the ring.
fn sequence_greater_than(a: u16, b: u16) -> bool {
    ((a > b) && (a - b <= 32768)) || ((a < b) && (b - a > 32768))
}

/// Per-client sync progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No snapshot sent or received yet; deltas are meaningless.
    Unsynced,
    /// One complete snapshot exchanged; counter is current.
    FullSynced,
    /// Receiving/being sent incremental frames.
    DeltaTracking,
}

/// Bookkeeping the engine keeps for one observed client.
#[derive(Debug)]
pub struct PerClientSync {
    state: SyncState,
    last_update_count: u16,
    pending_events: VecDeque<SceneNetEvent>,
    forced: HashSet<EntityId>,
}

impl PerClientSync {
    fn new() -> Self {
        Self {
            state: SyncState::Unsynced,
            last_update_count: 0,
            pending_events: VecDeque::new(),
            forced: HashSet::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// The last update counter this client is known to be current with.
    pub fn last_update_count(&self) -> u16 {
        self.last_update_count
    }

    pub fn pending_event_count(&self) -> usize {
        self.pending_events.len()
    }
}

/// Result of applying a received delta frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// The frame continued our counter and its values were applied.
    Applied { entities: usize },
    /// The frame covered ticks we already have; parsed state untouched.
    Stale,
}

/// Authoritative entity set plus per-client replication bookkeeping.
pub struct SceneReplication {
    entities: BTreeMap<EntityId, Box<dyn ReplicatedEntity>>,
    clients: HashMap<Identity, PerClientSync>,
    update_count: u16,
    factory: EntityFactory,
    context: ReplicationContext,
    config: CodecConfig,
}

impl Default for SceneReplication {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneReplication {
    pub fn new() -> Self {
        Self::with_config(CodecConfig::default())
    }

    pub fn with_config(config: CodecConfig) -> Self {
        Self {
            entities: BTreeMap::new(),
            clients: HashMap::new(),
            update_count: 0,
            factory: EntityFactory::new(),
            context: ReplicationContext::new(),
            config,
        }
    }

    /// Register a factory for entities of the given kind tag, used when a
    /// snapshot introduces an entity this side has never seen and for the
    /// scratch instances delta validation parses into.
    pub fn register_kind(&mut self, kind_tag: u8, factory: fn() -> Box<dyn ReplicatedEntity>) {
        self.factory.register(kind_tag, factory);
    }

    pub fn context(&self) -> &ReplicationContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ReplicationContext {
        &mut self.context
    }

    /// Current update counter; incremented once per replication tick.
    pub fn update_count(&self) -> u16 {
        self.update_count
    }

    /// Advance the tick counter, returning the new value.
    pub fn advance_tick(&mut self) -> u16 {
        self.update_count = self.update_count.wrapping_add(1);
        self.update_count
    }

    /// Bookkeeping for one client, if it is tracked.
    pub fn client_sync(&self, identity: &Identity) -> Option<&PerClientSync> {
        self.clients.get(identity)
    }

    // ------------------------------------------------------------------
    // Entity collection
    // ------------------------------------------------------------------

    /// Insert (or replace) an entity under `id`.
    pub fn insert_entity(&mut self, id: EntityId, entity: Box<dyn ReplicatedEntity>) -> Result<()> {
        if !id.is_valid() {
            return Err(ProtocolError::InvalidEntityId(id.raw()));
        }
        if self.entities.insert(id, entity).is_some() {
            debug!(%id, "entity replaced in scene");
        }
        Ok(())
    }

    pub fn remove_entity(&mut self, id: &EntityId) -> Option<Box<dyn ReplicatedEntity>> {
        self.entities.remove(id)
    }

    pub fn entity(&self, id: &EntityId) -> Option<&dyn ReplicatedEntity> {
        self.entities.get(id).map(|e| e.as_ref())
    }

    pub fn entity_mut(&mut self, id: &EntityId) -> Option<&mut (dyn ReplicatedEntity + '_)> {
        self.entities.get_mut(id).map(|e| &mut **e as &mut dyn ReplicatedEntity)
    }

    pub fn contains_entity(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// Wrapping sum of all present entity ids: an order-independent,
    /// deliberately weak out-of-sync detector, not an integrity guarantee.
    pub fn checksum(&self) -> u32 {
        self.entities
            .keys()
            .fold(0u32, |acc, id| acc.wrapping_add(id.raw()))
    }

    /// Reject frames above the configured cap before any parsing.
    fn check_frame_size(&self, packet: &Packet) -> Result<()> {
        if packet.len() > self.config.max_frame_size {
            return Err(ProtocolError::OversizedFrame(packet.len()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Full snapshots
    // ------------------------------------------------------------------

    /// Pack a complete snapshot of the scene for `target` and reset that
    /// client's bookkeeping to "current as of this counter".
    pub fn pack_full(&mut self, packet: &mut Packet, target: &Identity) -> Result<()> {
        write_header(packet, FrameKind::FullSync);
        packet.pack(&self.update_count);
        packet.pack(&(self.entities.len() as u32));
        for (id, entity) in &self.entities {
            packet.pack(id);
            // The category is derivable from the id; it still travels so the
            // receiver can cross-check without trusting its own decoding.
            packet.pack(&id.category().map(EntityCategory::tag).unwrap_or_default());
            packet.pack(&entity.kind_tag());
            entity.serialize(packet, &self.context);
        }

        for entity in self.entities.values_mut() {
            entity.mark_clean_for(target);
        }
        let sync = self.clients.entry(*target).or_insert_with(PerClientSync::new);
        sync.state = SyncState::FullSynced;
        sync.last_update_count = self.update_count;
        sync.pending_events.clear();
        sync.forced.clear();
        debug!(%target, counter = self.update_count, entities = self.entities.len(), "full snapshot packed");
        Ok(())
    }

    /// Consume a complete snapshot from `from`, replacing the replicated
    /// portion of the local scene with it.
    pub fn unpack_full(&mut self, packet: &mut Packet, from: &Identity) -> Result<()> {
        self.check_frame_size(packet)?;
        expect_header(packet, FrameKind::FullSync)?;
        let counter = packet.unpack::<u16>()?;

        let mut seen: HashSet<EntityId> = HashSet::new();
        packet
            .extract::<u32>()
            .less(self.config.max_sequence_len)
            .and_then(|&count, p| {
                if count as usize * FULL_ENTITY_MIN_BYTES > p.remaining() {
                    Err(ProtocolError::rule(
                        "entity-count",
                        format!("{count} entities cannot fit in {} bytes", p.remaining()),
                    ))
                } else {
                    Ok(())
                }
            })
            .and_for_each(|_, p| {
                let id = p.unpack::<EntityId>()?;
                if !id.is_valid() {
                    p.invalidate();
                    return Err(ProtocolError::InvalidEntityId(id.raw()));
                }
                let category = p.unpack::<u8>()?;
                if Some(category) != id.category().map(EntityCategory::tag) {
                    p.invalidate();
                    return Err(ProtocolError::rule(
                        "category",
                        format!("category tag {category} does not match id {id}"),
                    ));
                }
                let kind = p.unpack::<u8>()?;
                let reuse = matches!(self.entities.get(&id), Some(e) if e.kind_tag() == kind);
                if reuse {
                    if let Some(entity) = self.entities.get_mut(&id) {
                        entity.deserialize(p, &self.context)?;
                    }
                } else {
                    let mut entity = self.factory.create(kind)?;
                    entity.deserialize(p, &self.context)?;
                    self.entities.insert(id, entity);
                }
                seen.insert(id);
                Ok(())
            })
            .end()?;

        // The snapshot is the complete replicated set; anything absent from
        // it is gone, except entities this side owns locally.
        self.entities
            .retain(|id, _| seen.contains(id) || id.category() == Some(EntityCategory::ClientLocal));

        let sync = self.clients.entry(*from).or_insert_with(PerClientSync::new);
        sync.state = SyncState::FullSynced;
        sync.last_update_count = counter;
        sync.pending_events.clear();
        sync.forced.clear();
        debug!(%from, counter, entities = seen.len(), "full snapshot applied");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Incremental deltas
    // ------------------------------------------------------------------

    /// Pack the entities that are dirty for `target` (or explicitly
    /// requested by it) as a delta covering the counter range from the
    /// client's last known tick to the current one. Returns the number of
    /// entities packed.
    pub fn pack_delta(&mut self, packet: &mut Packet, target: &Identity) -> Result<usize> {
        let (prev, forced) = match self.clients.get(target) {
            Some(sync) if sync.state != SyncState::Unsynced => {
                (sync.last_update_count, sync.forced.clone())
            }
            _ => return Err(ProtocolError::UnsyncedClient(target.to_string())),
        };
        let curr = self.update_count;

        write_header(packet, FrameKind::Delta);
        packet.pack(&prev);
        packet.pack(&curr);
        let count_slot = packet.len();
        packet.pack(&0u32); // back-patched below

        let mut packed: Vec<EntityId> = Vec::new();
        for (id, entity) in &self.entities {
            if entity.is_dirty_for(target) || forced.contains(id) {
                packet.pack(id);
                entity.serialize(packet, &self.context);
                packed.push(*id);
            }
        }
        packet.pack_at(count_slot, &(packed.len() as u32))?;

        for id in &packed {
            if let Some(entity) = self.entities.get_mut(id) {
                entity.mark_clean_for(target);
            }
        }
        if let Some(sync) = self.clients.get_mut(target) {
            sync.forced.clear();
            sync.last_update_count = curr;
            sync.state = SyncState::DeltaTracking;
        }
        trace!(%target, prev, curr, entities = packed.len(), "delta packed");
        Ok(packed.len())
    }

    /// Apply a delta frame received from `from`.
    ///
    /// The frame is fully validated against scratch instances before any
    /// live entity is touched, so a frame that turns out to be malformed
    /// partway through leaves the scene exactly as it was.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Desync`] when the frame's range starts ahead
    /// of the counter we remember — the caller must request a full snapshot
    /// rather than apply anything. A duplicate of an already-applied frame
    /// is reported as [`DeltaOutcome::Stale`], never an error.
    pub fn unpack_delta(&mut self, packet: &mut Packet, from: &Identity) -> Result<DeltaOutcome> {
        self.check_frame_size(packet)?;
        expect_header(packet, FrameKind::Delta)?;
        let prev = packet.unpack::<u16>()?;
        let curr = packet.unpack::<u16>()?;

        let last = match self.clients.get(from) {
            Some(sync) if sync.state != SyncState::Unsynced => sync.last_update_count,
            _ => {
                return Err(ProtocolError::Desync {
                    have: 0,
                    frame_start: prev,
                })
            }
        };

        if prev != last {
            if sequence_greater_than(curr, last) {
                // We missed at least one tick; applying this frame would
                // layer new values over stale state.
                warn!(%from, last, prev, curr, "delta gap detected; full sync required");
                return Err(ProtocolError::Desync {
                    have: last,
                    frame_start: prev,
                });
            }
            debug!(%from, last, prev, curr, "stale delta ignored");
            return Ok(DeltaOutcome::Stale);
        }
        if !sequence_greater_than(curr, last) && curr != last {
            debug!(%from, last, prev, curr, "stale delta ignored");
            return Ok(DeltaOutcome::Stale);
        }

        // Validation pass: every record is parsed into a scratch instance
        // of the target entity's kind, so the live scene stays untouched if
        // the frame fails partway through.
        let body_start = packet.read_pos();
        let count = packet
            .extract::<u32>()
            .less(self.config.max_sequence_len)
            .and_then(|&count, p| {
                if count as usize * DELTA_ENTITY_MIN_BYTES > p.remaining() {
                    Err(ProtocolError::rule(
                        "entity-count",
                        format!("{count} entities cannot fit in {} bytes", p.remaining()),
                    ))
                } else {
                    Ok(())
                }
            })
            .and_for_each(|_, p| {
                let id = p.unpack::<EntityId>()?;
                if !id.is_valid() {
                    p.invalidate();
                    return Err(ProtocolError::InvalidEntityId(id.raw()));
                }
                let kind = match self.entities.get(&id) {
                    Some(entity) => entity.kind_tag(),
                    None => {
                        p.invalidate();
                        return Err(ProtocolError::UnknownEntity(id.raw()));
                    }
                };
                let mut scratch = self.factory.create(kind)?;
                scratch.deserialize(p, &self.context)
            })
            .end()?;

        // Commit pass: replay the validated records into the live entities.
        packet.seek_read(body_start)?;
        packet.unpack::<u32>()?;
        for _ in 0..count {
            let id = packet.unpack::<EntityId>()?;
            if let Some(entity) = self.entities.get_mut(&id) {
                entity.deserialize(packet, &self.context)?;
            }
        }

        if let Some(sync) = self.clients.get_mut(from) {
            sync.last_update_count = curr;
            sync.state = SyncState::DeltaTracking;
        }
        trace!(%from, prev, curr, entities = count, "delta applied");
        Ok(DeltaOutcome::Applied {
            entities: count as usize,
        })
    }

    // ------------------------------------------------------------------
    // Explicit resend requests
    // ------------------------------------------------------------------

    /// Pack a request asking the peer to resend specific fields regardless
    /// of its dirty flags. Covers the case where local state was reset
    /// independently of the replication counter.
    pub fn pack_needed_update(
        &self,
        packet: &mut Packet,
        requests: &[(EntityId, u32)],
    ) -> Result<()> {
        write_header(packet, FrameKind::NeededUpdate);
        packet.pack(&(requests.len() as u32));
        for (id, field_mask) in requests {
            packet.pack(id);
            packet.pack(field_mask);
        }
        Ok(())
    }

    /// Consume a resend request from `from`, marking the named entities for
    /// forced inclusion in that client's next delta. Requests for entities
    /// that no longer exist are skipped. Returns the number applied.
    pub fn unpack_needed_update(&mut self, packet: &mut Packet, from: &Identity) -> Result<usize> {
        self.check_frame_size(packet)?;
        expect_header(packet, FrameKind::NeededUpdate)?;
        let mut applied = 0usize;
        packet
            .extract::<u32>()
            .less(self.config.max_sequence_len)
            .and_then(|&count, p| {
                if count as usize * NEEDED_UPDATE_BYTES > p.remaining() {
                    Err(ProtocolError::rule(
                        "request-count",
                        format!("{count} requests cannot fit in {} bytes", p.remaining()),
                    ))
                } else {
                    Ok(())
                }
            })
            .and_for_each(|_, p| {
                let id = p.unpack::<EntityId>()?;
                let field_mask = p.unpack::<u32>()?;
                if !id.is_valid() {
                    p.invalidate();
                    return Err(ProtocolError::InvalidEntityId(id.raw()));
                }
                match self.entities.get_mut(&id) {
                    Some(entity) => {
                        entity.mark_needed(from, field_mask);
                        if let Some(sync) = self.clients.get_mut(from) {
                            sync.forced.insert(id);
                        }
                        applied += 1;
                    }
                    None => warn!(%id, %from, "needed-update for unknown entity skipped"),
                }
                Ok(())
            })
            .end()?;
        Ok(applied)
    }

    // ------------------------------------------------------------------
    // Structural events
    // ------------------------------------------------------------------

    /// Queue a structural event for one client, or for every tracked client
    /// when `target` is `None`.
    pub fn push_event(&mut self, target: Option<&Identity>, event: SceneNetEvent) {
        match target {
            Some(identity) => match self.clients.get_mut(identity) {
                Some(sync) => sync.pending_events.push_back(event),
                None => warn!(%identity, "event pushed for untracked client dropped"),
            },
            None => {
                for sync in self.clients.values_mut() {
                    sync.pending_events.push_back(event);
                }
            }
        }
    }

    /// Flush `target`'s pending events into the packet, oldest first. The
    /// queue is not drained here; call
    /// [`clear_pending_events`](Self::clear_pending_events) once the frame
    /// has actually been handed to the transport.
    pub fn pack_events(&self, packet: &mut Packet, target: &Identity) -> Result<usize> {
        write_header(packet, FrameKind::Events);
        let events = self
            .clients
            .get(target)
            .map(|sync| &sync.pending_events)
            .filter(|events| !events.is_empty());
        match events {
            Some(events) => {
                packet.pack(&(events.len() as u32));
                for event in events {
                    packet.pack(event);
                }
                Ok(events.len())
            }
            None => {
                packet.pack(&0u32);
                Ok(0)
            }
        }
    }

    /// Drop `target`'s queued events after the frame carrying them was
    /// flushed.
    pub fn clear_pending_events(&mut self, target: &Identity) {
        if let Some(sync) = self.clients.get_mut(target) {
            sync.pending_events.clear();
        }
    }

    /// Consume an events frame, returning the validated events strictly in
    /// the order they were queued by the sender. Routing them into the
    /// local object model is the caller's job.
    pub fn unpack_events(&mut self, packet: &mut Packet) -> Result<Vec<SceneNetEvent>> {
        self.check_frame_size(packet)?;
        expect_header(packet, FrameKind::Events)?;
        let mut events = Vec::new();
        packet
            .extract::<u32>()
            .less(self.config.max_sequence_len)
            .and_then(|&count, p| {
                if count as usize * EVENT_MIN_BYTES > p.remaining() {
                    Err(ProtocolError::rule(
                        "event-count",
                        format!("{count} events cannot fit in {} bytes", p.remaining()),
                    ))
                } else {
                    Ok(())
                }
            })
            .and_for_each(|_, p| {
                events.push(p.unpack::<SceneNetEvent>()?);
                Ok(())
            })
            .end()?;
        Ok(events)
    }

    // ------------------------------------------------------------------
    // Client bookkeeping maintenance
    // ------------------------------------------------------------------

    /// Reconcile the engine's per-client bookkeeping against the live
    /// registry: newly seen identities get fresh bookkeeping with every
    /// entity flagged must-send-once, vanished identities are dropped, and
    /// `force` resets every survivor as if newly connected.
    pub fn clients_checkup<C>(&mut self, registry: &ClientRegistry<C>, force: bool) {
        let live = registry.identities();
        let live_set: HashSet<Identity> = live.iter().copied().collect();
        self.clients.retain(|identity, _| {
            let keep = live_set.contains(identity);
            if !keep {
                debug!(%identity, "dropping bookkeeping for departed client");
            }
            keep
        });
        for identity in live {
            if force || !self.clients.contains_key(&identity) {
                self.clients.insert(identity, PerClientSync::new());
                for entity in self.entities.values_mut() {
                    entity.mark_dirty_for(&identity);
                }
                debug!(%identity, force, "client bookkeeping reset");
            }
        }
    }

    /// Forget everything known about `identity`'s sync progress; the next
    /// exchange with it must be a full snapshot.
    pub fn force_uncheck_client(&mut self, identity: &Identity) {
        if let Some(sync) = self.clients.get_mut(identity) {
            *sync = PerClientSync::new();
        }
    }
}
