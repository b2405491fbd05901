// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant Discovery Protocol engine.
//!
//! Announces the local participant on a schedule, ingests remote DATA(p),
//! drives leases, and feeds EDP/WLP on every proxy-store mutation. The
//! engine has two flavors behind one state machine: simple (peer-to-peer
//! announcements, this module) and server (mediated discovery, the
//! [`server`] module layered on the shared paths here).
//!
//! State machine: `Init -> Announcing -> Running -> Draining -> Terminated`.

pub mod server;

use crate::builtin::endpoint::{RemoteReaderAttributes, RemoteWriterAttributes};
use crate::builtin::data::ParticipantProxyData;
use crate::core::cache::{CacheChange, ChangeKind};
use crate::core::rt::{CancelToken, TimedEvent};
use crate::core::types::entity_ids::{
    DISC_BUILTIN_ENDPOINT_PARTICIPANT_ANNOUNCER, DISC_BUILTIN_ENDPOINT_PARTICIPANT_DETECTOR,
    DISC_BUILTIN_ENDPOINT_PUBLICATIONS_ANNOUNCER, DISC_BUILTIN_ENDPOINT_PUBLICATIONS_DETECTOR,
    DISC_BUILTIN_ENDPOINT_SUBSCRIPTIONS_ANNOUNCER, DISC_BUILTIN_ENDPOINT_SUBSCRIPTIONS_DETECTOR,
    ENTITYID_SEDP_PUBLICATIONS_READER, ENTITYID_SEDP_PUBLICATIONS_WRITER,
    ENTITYID_SEDP_SUBSCRIPTIONS_READER, ENTITYID_SEDP_SUBSCRIPTIONS_WRITER, ENTITYID_SPDP_READER,
    ENTITYID_SPDP_WRITER,
};
use crate::core::types::{Guid, GuidPrefix, Locator};
use crate::dds::Result;
use crate::discovery::{edp, DiscoveryContext, DiscoveryEvent, DiscoveryState, RemovalReason};
use crate::liveliness;
use crate::transport::BuiltinMessage;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Lease scan granularity: expired participants are detected within one
/// tick of the lease elapsing.
pub const LEASE_SCAN_PERIOD: Duration = Duration::from_millis(250);

/// PDP lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdpMachine {
    Init,
    /// Initial burst toward the initial peers and multicast group.
    Announcing { sent: u32 },
    /// Steady-state periodic resend.
    Running,
    /// Local disposal announced, waiting for teardown.
    Draining,
    Terminated,
}

/// Convergence bookkeeping toward a fleet of discovery servers (used by
/// both the client and the server role).
pub struct SyncState {
    /// Servers that echoed our own DATA(p) back through their writer.
    pub echoed_by: HashSet<GuidPrefix>,
    /// Set once phase 1 (all servers acked and echoed us) completes.
    pub converged: bool,
}

/// PDP engine state, guarded by the participant discovery mutex.
pub struct PdpState {
    pub machine: PdpMachine,
    pub(crate) announce_token: Option<CancelToken>,
    pub(crate) lease_event: Option<Arc<TimedEvent>>,
    pub sync: Option<SyncState>,
    pub server: Option<server::ServerState>,
}

impl PdpState {
    pub fn new() -> Self {
        Self {
            machine: PdpMachine::Init,
            announce_token: None,
            lease_event: None,
            sync: None,
            server: None,
        }
    }
}

impl Default for PdpState {
    fn default() -> Self {
        Self::new()
    }
}

/// True when EDP matching for `prefix` is deferred by the server variant
/// (phase-2 gating: the participant is still pending in `_p2match`).
pub(crate) fn edp_gated(state: &DiscoveryState, prefix: &GuidPrefix) -> bool {
    state
        .pdp
        .server
        .as_ref()
        .map(|s| s.p2match.contains(prefix))
        .unwrap_or(false)
}

/// Participant Discovery Protocol engine facade.
pub struct PdpEngine {
    ctx: Arc<DiscoveryContext>,
}

impl PdpEngine {
    pub fn new(ctx: Arc<DiscoveryContext>) -> Self {
        Self { ctx }
    }

    /// Start discovery: initial burst, lease scan, and (for the server
    /// variant) the server sync event.
    pub fn enable(&self) -> Result<()> {
        crate::trace_fn!("PdpEngine::enable");
        {
            let mut state = self.ctx.state.lock();
            if state.pdp.machine != PdpMachine::Init {
                return Err(crate::dds::Error::InvalidState(
                    "PDP already enabled".to_string(),
                ));
            }
            state.pdp.machine = PdpMachine::Announcing { sent: 0 };

            // Server/client roles know their fleet up front: install the
            // servers' built-in PDP endpoints so the reliable paths work
            // before any DATA(p) is heard from them.
            if !self.ctx.config.known_servers().is_empty() {
                state.pdp.sync = Some(SyncState {
                    echoed_by: HashSet::new(),
                    converged: false,
                });
                for srv in self.ctx.config.known_servers() {
                    install_pdp_peer(&self.ctx, srv.guid_prefix, &[srv.metatraffic_locator]);
                }
            }
            if self.ctx.config.is_server() {
                server::init_server_state(&self.ctx, &mut state)?;
            }

            // First announcement carries a fresh change.
            announce_participant_state(&self.ctx, &mut state, true, false)?;
            if let PdpMachine::Announcing { ref mut sent } = state.pdp.machine {
                *sent = 1;
            }
        }

        schedule_announce(&self.ctx);

        // Periodic lease scan: expired peers are evicted within one tick.
        let weak = self.ctx.self_weak.clone();
        let lease_event = TimedEvent::new(
            Arc::clone(&self.ctx.driver),
            LEASE_SCAN_PERIOD,
            move || {
                let Some(ctx) = weak.upgrade() else { return };
                let mut state = ctx.state.lock();
                lease_tick(&ctx, &mut state, Instant::now());
            },
        );
        lease_event.restart_timer();
        self.ctx.state.lock().pdp.lease_event = Some(lease_event);
        Ok(())
    }

    /// Force an announcement of the local participant state.
    pub fn announce_participant_state(&self, new_change: bool, dispose: bool) -> Result<()> {
        let mut state = self.ctx.state.lock();
        announce_participant_state(&self.ctx, &mut state, new_change, dispose)
    }

    /// Ingest one change from the PDP built-in reader.
    pub fn process_pdp_change(&self, change: &CacheChange) {
        let mut state = self.ctx.state.lock();
        process_pdp_change(&self.ctx, &mut state, change);
    }

    /// One lease scan pass; returns the evicted prefixes.
    pub fn lease_tick(&self, now: Instant) -> Vec<GuidPrefix> {
        let mut state = self.ctx.state.lock();
        lease_tick(&self.ctx, &mut state, now)
    }

    /// Remove a remote participant and everything it owns.
    pub fn remove_remote_participant(&self, prefix: &GuidPrefix, reason: RemovalReason) {
        let mut state = self.ctx.state.lock();
        remove_remote_participant(&self.ctx, &mut state, prefix, reason);
    }

    /// Run a server synchronization pass immediately instead of waiting
    /// for the timed event (new matching or trimming work arrived).
    /// No-op for the simple variant.
    pub fn awaken_server_thread(&self) {
        if self.ctx.state.lock().pdp.server.is_none() {
            return;
        }
        server::on_sync_tick(&self.ctx);
    }

    /// Announce local disposal and stop announcing.
    pub fn disable(&self) {
        crate::trace_fn!("PdpEngine::disable");
        let mut state = self.ctx.state.lock();
        if matches!(
            state.pdp.machine,
            PdpMachine::Terminated | PdpMachine::Draining
        ) {
            return;
        }
        state.pdp.machine = PdpMachine::Draining;
        if let Err(err) = announce_participant_state(&self.ctx, &mut state, true, true) {
            log::warn!("[PDP] disposal announcement failed: {}", err);
        }
        if let Some(token) = state.pdp.announce_token.take() {
            token.cancel();
        }
        if let Some(event) = state.pdp.lease_event.take() {
            event.cancel_timer();
        }
        if let Some(server) = state.pdp.server.as_mut() {
            if let Some(token) = server.sync_token.take() {
                token.cancel();
            }
        }
        state.pdp.machine = PdpMachine::Terminated;
    }
}

// ===== Announcement path =====

/// Self-rescheduling announce tick. The interval follows the machine:
/// burst spacing while Announcing, the steady period while Running.
fn schedule_announce(ctx: &Arc<DiscoveryContext>) {
    let delay = {
        let state = ctx.state.lock();
        match state.pdp.machine {
            PdpMachine::Announcing { .. } => ctx.config.initial_announcement_period,
            PdpMachine::Running => ctx.config.announcement_period,
            _ => return,
        }
    };
    let weak: Weak<DiscoveryContext> = Arc::downgrade(ctx);
    let token = ctx.driver.schedule_after(
        delay,
        Box::new(move || {
            let Some(ctx) = weak.upgrade() else { return };
            on_announce_tick(&ctx);
            schedule_announce(&ctx);
        }),
    );
    ctx.state.lock().pdp.announce_token = Some(token);
}

fn on_announce_tick(ctx: &Arc<DiscoveryContext>) {
    let mut state = ctx.state.lock();
    match state.pdp.machine {
        PdpMachine::Announcing { sent } => {
            // Burst re-sends the same change to beat packet loss.
            if let Err(err) = announce_participant_state(ctx, &mut state, false, false) {
                log::debug!("[PDP] burst announcement failed: {}", err);
            }
            let sent = sent + 1;
            state.pdp.machine = if sent >= ctx.config.initial_announcement_count {
                log::debug!("[PDP] initial burst complete, entering steady state");
                PdpMachine::Running
            } else {
                PdpMachine::Announcing { sent }
            };
        }
        PdpMachine::Running => {
            if let Err(err) = announce_participant_state(ctx, &mut state, false, false) {
                log::debug!("[PDP] periodic announcement failed: {}", err);
            }
        }
        _ => {}
    }
}

/// Write (or re-send) the local DATA(p).
///
/// - `new_change=true, dispose=false`: fresh change, current proxy payload.
/// - `new_change=false`: re-send the most recent change, same sequence.
/// - `dispose=true`: NOT_ALIVE_DISPOSED_UNREGISTERED, key-only content.
pub(crate) fn announce_participant_state(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    new_change: bool,
    dispose: bool,
) -> Result<()> {
    crate::trace_fn!("pdp::announce_participant_state");
    let local_key = state.store.local().key();

    let change = {
        let mut writer = ctx.endpoints.pdp.writer.lock();
        if dispose {
            let change =
                writer.new_change(ChangeKind::NotAliveDisposedUnregistered, local_key, Vec::new());
            writer.add_change(change.clone())?;
            change
        } else if new_change {
            let payload = state.store.local().build_data_p();
            let change = writer.new_change(ChangeKind::Alive, local_key, payload);
            writer.add_change(change.clone())?;
            change
        } else {
            match writer
                .history()
                .latest_change_for_instance(&local_key)
                .cloned()
            {
                Some(change) => {
                    writer.redeliver(change.sequence_number);
                    change
                }
                None => {
                    // Nothing to re-send yet: fall back to a fresh change.
                    let payload = state.store.local().build_data_p();
                    let change = writer.new_change(ChangeKind::Alive, local_key, payload);
                    writer.add_change(change.clone())?;
                    change
                }
            }
        }
    };

    spray_announcement(ctx, &change);
    server::after_local_announcement(ctx, state);
    Ok(())
}

/// Stateless SPDP leg: push the announcement at the initial peers, the
/// configured servers, and the metatraffic multicast group, matched or not.
fn spray_announcement(ctx: &DiscoveryContext, change: &CacheChange) {
    let mut destinations: Vec<Locator> = ctx.config.initial_peers.clone();
    for srv in ctx.config.known_servers() {
        destinations.push(srv.metatraffic_locator);
    }
    destinations.extend(ctx.config.effective_metatraffic_multicast());
    destinations.sort();
    destinations.dedup();

    let message = BuiltinMessage::Data {
        reader_entity: ENTITYID_SPDP_READER,
        change: change.clone(),
        first_available: change.sequence_number,
        last_available: change.sequence_number,
    };
    if let Err(err) = ctx.transport.send(&destinations, &message) {
        // Transient I/O: the change is in history, reliable resend covers it.
        log::debug!("[PDP] announcement spray failed: {}", err);
    }
}

// ===== Ingest path =====

pub(crate) fn process_pdp_change(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    change: &CacheChange,
) {
    crate::trace_fn!("pdp::process_pdp_change");
    if change.kind.is_disposal() {
        let guid = Guid::from_bytes(change.instance_handle);
        remove_remote_participant(ctx, state, &guid.prefix, RemovalReason::Disposed);
        return;
    }

    let data = match ParticipantProxyData::parse_data_p(&change.serialized_payload) {
        Ok(data) => data,
        Err(err) => {
            // Peer inconsistency: drop the sample, keep the peer.
            log::warn!("[PDP] dropping malformed DATA(p): {}", err);
            return;
        }
    };

    if data.domain_id != ctx.config.domain_id {
        log::debug!(
            "[PDP] ignoring participant {} from domain {}",
            data.guid,
            data.domain_id
        );
        return;
    }

    let prefix = data.guid_prefix();
    if prefix == state.store.local_prefix() {
        // Our own announcement echoed back: evidence a server ingested us.
        if let Some(sync) = state.pdp.sync.as_mut() {
            sync.echoed_by.insert(change.writer_guid.prefix);
        }
        return;
    }

    let mut fresh = data;
    fresh.is_server_peer = ctx
        .config
        .known_servers()
        .iter()
        .any(|s| s.guid_prefix == prefix);

    let endpoints_mask = fresh.available_builtin_endpoints;
    let previous_mask = state
        .store
        .lookup(&prefix)
        .map(|p| p.available_builtin_endpoints);

    match state.store.insert_or_update(fresh) {
        crate::discovery::InsertResult::New => {
            let ppd = state
                .store
                .lookup(&prefix)
                .expect("present, just inserted")
                .clone();
            log::debug!(
                "[PDP] discovered participant {} (mask=0x{:08x})",
                ppd.guid,
                endpoints_mask
            );
            assign_remote_endpoints(ctx, &ppd, endpoints_mask);
            liveliness::assign_remote_endpoints(ctx, &ppd);
            ctx.notify(DiscoveryEvent::ParticipantDiscovered { guid: ppd.guid });

            if state.pdp.server.is_some() {
                server::on_participant_discovered(ctx, state, &ppd, change);
            } else {
                edp::match_participant_endpoints(ctx, state, &prefix);
            }
        }
        crate::discovery::InsertResult::Updated => {
            let ppd = state
                .store
                .lookup(&prefix)
                .expect("present, just updated")
                .clone();
            // Endpoint-set delta: add and remove exactly what changed,
            // never blindly re-match everything.
            let old_mask = previous_mask.unwrap_or(0);
            let added = endpoints_mask & !old_mask;
            let removed = old_mask & !endpoints_mask;
            if added != 0 {
                assign_remote_endpoints(ctx, &ppd, added);
            }
            if removed != 0 {
                remove_remote_endpoint_peers(ctx, &prefix, removed);
            }
            if added != 0 || removed != 0 {
                liveliness::assign_remote_endpoints(ctx, &ppd);
            }
            ctx.notify(DiscoveryEvent::ParticipantUpdated { guid: ppd.guid });
            if state.pdp.server.is_some() {
                server::on_participant_updated(ctx, state, &ppd, change);
            }
        }
        crate::discovery::InsertResult::Unchanged => {
            // Lease renewed inside the store. A server still relays the
            // refresh when it came straight from the origin (never when it
            // arrived via another server, or relays would loop forever).
            if state.pdp.server.is_some() && change.writer_guid.prefix == prefix {
                server::on_participant_refreshed(ctx, state, &prefix, change);
            }
        }
    }
}

// ===== Lease management =====

pub(crate) fn lease_tick(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    now: Instant,
) -> Vec<GuidPrefix> {
    let expired = state.store.lease_tick(now);
    for prefix in &expired {
        log::debug!("[PDP] lease expired for {:02x?}", prefix);
        remove_remote_participant(ctx, state, prefix, RemovalReason::LeaseExpired);
    }
    edp::prune_pending(state, now);
    expired
}

// ===== Removal path =====

/// Tear down a remote participant: unmatch EDP and WLP, drop the built-in
/// peer entries, then destroy the store entry. Idempotent.
pub(crate) fn remove_remote_participant(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    prefix: &GuidPrefix,
    reason: RemovalReason,
) {
    crate::trace_fn!("pdp::remove_remote_participant");
    let Some(ppd) = state.store.lookup(prefix).cloned() else {
        // Stale operation on an already-evicted participant: no-op.
        return;
    };
    if prefix == &state.store.local_prefix() {
        return;
    }
    log::debug!("[PDP] removing participant {} ({:?})", ppd.guid, reason);

    // Owned endpoint proxies are disposed first so EDP and WLP confirm
    // unmatching before the store entry dies. Liveliness subtractions go
    // out while the reader matches still exist.
    liveliness::on_remote_participant_removed(ctx, state, &ppd);
    edp::unmatch_participant(ctx, state, prefix);
    liveliness::remove_remote_endpoints(ctx, &ppd);
    remove_remote_endpoint_peers(ctx, prefix, u32::MAX);

    if state.pdp.server.is_some() {
        server::on_participant_removed(ctx, state, &ppd);
    }
    if let Some(sync) = state.pdp.sync.as_mut() {
        sync.echoed_by.remove(prefix);
    }

    state.store.remove(prefix);
    ctx.notify(DiscoveryEvent::ParticipantRemoved {
        guid: ppd.guid,
        reason,
    });
}

// ===== Built-in peer wiring =====

/// Install the remote PDP endpoints of a known server before any DATA(p)
/// was heard from it (the fleet is configured, not discovered).
fn install_pdp_peer(ctx: &DiscoveryContext, prefix: GuidPrefix, locators: &[Locator]) {
    ctx.endpoints
        .pdp
        .reader
        .lock()
        .matched_writer_add(RemoteWriterAttributes {
            guid: Guid::new(prefix, ENTITYID_SPDP_WRITER),
            unicast_locators: locators.to_vec(),
            multicast_locators: Vec::new(),
        });
    ctx.endpoints
        .pdp
        .writer
        .lock()
        .matched_reader_add(RemoteReaderAttributes {
            guid: Guid::new(prefix, ENTITYID_SPDP_READER),
            unicast_locators: locators.to_vec(),
            multicast_locators: Vec::new(),
            expects_inline_qos: false,
        });
}

/// Install the remote built-in endpoints advertised by `mask` as matched
/// peers on the corresponding local built-in endpoints.
pub(crate) fn assign_remote_endpoints(
    ctx: &DiscoveryContext,
    ppd: &ParticipantProxyData,
    mask: u32,
) {
    crate::trace_fn!("pdp::assign_remote_endpoints");
    let prefix = ppd.guid_prefix();
    let unicast = ppd.metatraffic_unicast_locators.clone();
    let multicast = ppd.metatraffic_multicast_locators.clone();

    let writer_attrs = |entity| RemoteWriterAttributes {
        guid: Guid::new(prefix, entity),
        unicast_locators: unicast.clone(),
        multicast_locators: multicast.clone(),
    };
    let reader_attrs = |entity| RemoteReaderAttributes {
        guid: Guid::new(prefix, entity),
        unicast_locators: unicast.clone(),
        multicast_locators: multicast.clone(),
        expects_inline_qos: ppd.expects_inline_qos,
    };

    if mask & DISC_BUILTIN_ENDPOINT_PARTICIPANT_ANNOUNCER != 0 {
        ctx.endpoints
            .pdp
            .reader
            .lock()
            .matched_writer_add(writer_attrs(ENTITYID_SPDP_WRITER));
    }
    if mask & DISC_BUILTIN_ENDPOINT_PARTICIPANT_DETECTOR != 0 {
        ctx.endpoints
            .pdp
            .writer
            .lock()
            .matched_reader_add(reader_attrs(ENTITYID_SPDP_READER));
    }
    if mask & DISC_BUILTIN_ENDPOINT_PUBLICATIONS_ANNOUNCER != 0 {
        ctx.endpoints
            .edp_publications
            .reader
            .lock()
            .matched_writer_add(writer_attrs(ENTITYID_SEDP_PUBLICATIONS_WRITER));
    }
    if mask & DISC_BUILTIN_ENDPOINT_PUBLICATIONS_DETECTOR != 0 {
        ctx.endpoints
            .edp_publications
            .writer
            .lock()
            .matched_reader_add(reader_attrs(ENTITYID_SEDP_PUBLICATIONS_READER));
    }
    if mask & DISC_BUILTIN_ENDPOINT_SUBSCRIPTIONS_ANNOUNCER != 0 {
        ctx.endpoints
            .edp_subscriptions
            .reader
            .lock()
            .matched_writer_add(writer_attrs(ENTITYID_SEDP_SUBSCRIPTIONS_WRITER));
    }
    if mask & DISC_BUILTIN_ENDPOINT_SUBSCRIPTIONS_DETECTOR != 0 {
        ctx.endpoints
            .edp_subscriptions
            .writer
            .lock()
            .matched_reader_add(reader_attrs(ENTITYID_SEDP_SUBSCRIPTIONS_READER));
    }
    // WLP and the secure variants are paired by the liveliness engine and
    // the security plugin respectively.
}

/// Remove the built-in peer entries selected by `mask` (u32::MAX removes
/// every pairing, used at participant teardown).
pub(crate) fn remove_remote_endpoint_peers(
    ctx: &DiscoveryContext,
    prefix: &GuidPrefix,
    mask: u32,
) {
    crate::trace_fn!("pdp::remove_remote_endpoint_peers");
    if mask & DISC_BUILTIN_ENDPOINT_PARTICIPANT_ANNOUNCER != 0 {
        ctx.endpoints
            .pdp
            .reader
            .lock()
            .matched_writer_remove(&Guid::new(*prefix, ENTITYID_SPDP_WRITER));
    }
    if mask & DISC_BUILTIN_ENDPOINT_PARTICIPANT_DETECTOR != 0 {
        ctx.endpoints
            .pdp
            .writer
            .lock()
            .matched_reader_remove(&Guid::new(*prefix, ENTITYID_SPDP_READER));
    }
    if mask & DISC_BUILTIN_ENDPOINT_PUBLICATIONS_ANNOUNCER != 0 {
        ctx.endpoints
            .edp_publications
            .reader
            .lock()
            .matched_writer_remove(&Guid::new(*prefix, ENTITYID_SEDP_PUBLICATIONS_WRITER));
    }
    if mask & DISC_BUILTIN_ENDPOINT_PUBLICATIONS_DETECTOR != 0 {
        ctx.endpoints
            .edp_publications
            .writer
            .lock()
            .matched_reader_remove(&Guid::new(*prefix, ENTITYID_SEDP_PUBLICATIONS_READER));
    }
    if mask & DISC_BUILTIN_ENDPOINT_SUBSCRIPTIONS_ANNOUNCER != 0 {
        ctx.endpoints
            .edp_subscriptions
            .reader
            .lock()
            .matched_writer_remove(&Guid::new(*prefix, ENTITYID_SEDP_SUBSCRIPTIONS_WRITER));
    }
    if mask & DISC_BUILTIN_ENDPOINT_SUBSCRIPTIONS_DETECTOR != 0 {
        ctx.endpoints
            .edp_subscriptions
            .writer
            .lock()
            .matched_reader_remove(&Guid::new(*prefix, ENTITYID_SEDP_SUBSCRIPTIONS_READER));
    }
}
