// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint Discovery Protocol engine.
//!
//! Advertises local writer/reader descriptors as DATA(w)/DATA(r) on the
//! SEDP built-in endpoints, ingests remote descriptors, and drives
//! compatibility matching between local and remote endpoints. Samples whose
//! owning participant is not yet known (or is gated by a discovery server)
//! are parked in a pending queue bounded by the participant lease.

pub mod matching;

use crate::builtin::data::{ReaderProxyData, WriterProxyData};
use crate::builtin::BuiltinEndpointPair;
use crate::core::cache::{CacheChange, ChangeKind};
use crate::core::types::{Guid, GuidPrefix};
use crate::dds::Result;
use crate::discovery::{pdp, DiscoveryContext, DiscoveryEvent, DiscoveryState};
use crate::liveliness;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

/// Cap on parked samples; beyond this the oldest are dropped.
const PENDING_LIMIT: usize = 512;

pub(crate) enum PendingProxy {
    Writer(WriterProxyData),
    Reader(ReaderProxyData),
}

pub(crate) struct PendingSample {
    pub received_at: Instant,
    pub proxy: PendingProxy,
}

/// EDP tables, guarded by the participant discovery mutex.
#[derive(Default)]
pub struct EdpState {
    pub local_writers: HashMap<Guid, WriterProxyData>,
    pub local_readers: HashMap<Guid, ReaderProxyData>,
    /// Installed (writer, reader) matches; at least one side is local.
    pub matches: HashSet<(Guid, Guid)>,
    pub(crate) pending: Vec<PendingSample>,
}

impl EdpState {
    /// Local readers currently matched to the given writer.
    pub fn local_readers_matched_to(&self, writer: &Guid) -> Vec<Guid> {
        self.matches
            .iter()
            .filter(|(w, r)| w == writer && self.local_readers.contains_key(r))
            .map(|(_, r)| *r)
            .collect()
    }

    pub fn is_matched(&self, writer: &Guid, reader: &Guid) -> bool {
        self.matches.contains(&(*writer, *reader))
    }
}

/// EDP engine facade: locks the context and delegates to the free
/// functions below (which PDP also calls under its own lock hold).
pub struct EdpEngine {
    ctx: Arc<DiscoveryContext>,
}

impl EdpEngine {
    pub fn new(ctx: Arc<DiscoveryContext>) -> Self {
        Self { ctx }
    }

    /// Advertise a newly created local writer and match it.
    pub fn register_local_writer(&self, data: WriterProxyData) -> Result<()> {
        let mut state = self.ctx.state.lock();
        register_local_writer(&self.ctx, &mut state, data)
    }

    /// Dispose a destroyed local writer and unmatch it.
    pub fn unregister_local_writer(&self, guid: &Guid) -> Result<()> {
        let mut state = self.ctx.state.lock();
        unregister_local_writer(&self.ctx, &mut state, guid)
    }

    /// Advertise a newly created local reader and match it.
    pub fn register_local_reader(&self, data: ReaderProxyData) -> Result<()> {
        let mut state = self.ctx.state.lock();
        register_local_reader(&self.ctx, &mut state, data)
    }

    /// Dispose a destroyed local reader and unmatch it.
    pub fn unregister_local_reader(&self, guid: &Guid) -> Result<()> {
        let mut state = self.ctx.state.lock();
        unregister_local_reader(&self.ctx, &mut state, guid)
    }

    /// Ingest one change from the SEDP publications reader.
    pub fn process_publication_change(&self, change: &CacheChange) {
        let mut state = self.ctx.state.lock();
        process_publication_change(&self.ctx, &mut state, change);
    }

    /// Ingest one change from the SEDP subscriptions reader.
    pub fn process_subscription_change(&self, change: &CacheChange) {
        let mut state = self.ctx.state.lock();
        process_subscription_change(&self.ctx, &mut state, change);
    }
}

/// The SEDP pair descriptors travel over: secure when discovery is
/// protected, plain otherwise.
fn publications_pair(ctx: &DiscoveryContext) -> &BuiltinEndpointPair {
    match (&ctx.endpoints.secure, &ctx.config.security) {
        (Some(secure), Some(attrs)) if attrs.is_discovery_protected => &secure.edp_publications,
        _ => &ctx.endpoints.edp_publications,
    }
}

fn subscriptions_pair(ctx: &DiscoveryContext) -> &BuiltinEndpointPair {
    match (&ctx.endpoints.secure, &ctx.config.security) {
        (Some(secure), Some(attrs)) if attrs.is_discovery_protected => &secure.edp_subscriptions,
        _ => &ctx.endpoints.edp_subscriptions,
    }
}

// ===== Local endpoint lifecycle =====

pub(crate) fn register_local_writer(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    data: WriterProxyData,
) -> Result<()> {
    crate::trace_fn!("edp::register_local_writer");
    let guid = data.guid;
    log::debug!(
        "[EDP] local writer {} on topic '{}' ({})",
        guid,
        data.topic_name,
        data.type_name
    );

    let payload = data.build_data_w();
    state.edp.local_writers.insert(guid, data.clone());
    liveliness::add_local_writer(ctx, state, &data);

    {
        let mut writer = publications_pair(ctx).writer.lock();
        let change = writer.new_change(ChangeKind::Alive, guid.instance_handle(), payload);
        writer.add_change(change)?;
    }

    rematch_local_writer(ctx, state, &guid);
    Ok(())
}

pub(crate) fn unregister_local_writer(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    guid: &Guid,
) -> Result<()> {
    crate::trace_fn!("edp::unregister_local_writer");
    let Some(data) = state.edp.local_writers.remove(guid) else {
        return Ok(());
    };
    liveliness::remove_local_writer(ctx, state, &data);

    {
        let mut writer = publications_pair(ctx).writer.lock();
        let change = writer.new_change(
            ChangeKind::NotAliveDisposedUnregistered,
            guid.instance_handle(),
            Vec::new(),
        );
        writer.add_change(change)?;
    }

    let stale: Vec<_> = state
        .edp
        .matches
        .iter()
        .filter(|(w, _)| w == guid)
        .copied()
        .collect();
    for pair in stale {
        remove_match(ctx, state, pair);
    }
    Ok(())
}

pub(crate) fn register_local_reader(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    data: ReaderProxyData,
) -> Result<()> {
    crate::trace_fn!("edp::register_local_reader");
    let guid = data.guid;
    log::debug!(
        "[EDP] local reader {} on topic '{}' ({})",
        guid,
        data.topic_name,
        data.type_name
    );

    let payload = data.build_data_r();
    liveliness::add_local_reader(state, &data);
    state.edp.local_readers.insert(guid, data);

    {
        let mut writer = subscriptions_pair(ctx).writer.lock();
        let change = writer.new_change(ChangeKind::Alive, guid.instance_handle(), payload);
        writer.add_change(change)?;
    }

    rematch_local_reader(ctx, state, &guid);
    Ok(())
}

pub(crate) fn unregister_local_reader(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    guid: &Guid,
) -> Result<()> {
    crate::trace_fn!("edp::unregister_local_reader");
    if state.edp.local_readers.remove(guid).is_none() {
        return Ok(());
    }

    {
        let mut writer = subscriptions_pair(ctx).writer.lock();
        let change = writer.new_change(
            ChangeKind::NotAliveDisposedUnregistered,
            guid.instance_handle(),
            Vec::new(),
        );
        writer.add_change(change)?;
    }

    let stale: Vec<_> = state
        .edp
        .matches
        .iter()
        .filter(|(_, r)| r == guid)
        .copied()
        .collect();
    for pair in stale {
        remove_match(ctx, state, pair);
    }
    Ok(())
}

// ===== Remote descriptor ingest =====

pub(crate) fn process_publication_change(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    change: &CacheChange,
) {
    crate::trace_fn!("edp::process_publication_change");
    if change.kind.is_disposal() {
        let guid = Guid::from_bytes(change.instance_handle);
        remove_remote_writer(ctx, state, &guid);
        return;
    }
    match WriterProxyData::parse_data_w(&change.serialized_payload) {
        Ok(data) => ingest_remote_writer(ctx, state, data),
        Err(err) => {
            // Peer inconsistency: drop the sample, keep the peer.
            log::warn!("[EDP] dropping malformed DATA(w): {}", err);
        }
    }
}

pub(crate) fn process_subscription_change(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    change: &CacheChange,
) {
    crate::trace_fn!("edp::process_subscription_change");
    if change.kind.is_disposal() {
        let guid = Guid::from_bytes(change.instance_handle);
        remove_remote_reader(ctx, state, &guid);
        return;
    }
    match ReaderProxyData::parse_data_r(&change.serialized_payload) {
        Ok(data) => ingest_remote_reader(ctx, state, data),
        Err(err) => {
            log::warn!("[EDP] dropping malformed DATA(r): {}", err);
        }
    }
}

fn park_pending(state: &mut DiscoveryState, proxy: PendingProxy) {
    if state.edp.pending.len() >= PENDING_LIMIT {
        log::warn!("[EDP] pending queue full, dropping oldest sample");
        state.edp.pending.remove(0);
    }
    state.edp.pending.push(PendingSample {
        received_at: Instant::now(),
        proxy,
    });
}

fn ingest_remote_writer(ctx: &DiscoveryContext, state: &mut DiscoveryState, data: WriterProxyData) {
    let prefix = data.guid.prefix;
    if state.store.lookup(&prefix).is_none() || pdp::edp_gated(state, &prefix) {
        // PDP has not caught up (or a server defers this client): park the
        // sample until the participant is admitted.
        park_pending(state, PendingProxy::Writer(data));
        return;
    }

    let entity = data.guid.entity_id;
    let known = {
        let ppd = state
            .store
            .lookup_mut(&prefix)
            .expect("participant present, checked above");
        // Whole-record atomic replacement; topic is immutable in place.
        ppd.writers.insert(entity, data.clone()).is_some()
    };
    if !known {
        ctx.notify(DiscoveryEvent::WriterDiscovered {
            guid: data.guid,
            topic_name: data.topic_name.clone(),
        });
    }
    rematch_remote_writer(ctx, state, &data);
}

fn ingest_remote_reader(ctx: &DiscoveryContext, state: &mut DiscoveryState, data: ReaderProxyData) {
    let prefix = data.guid.prefix;
    if state.store.lookup(&prefix).is_none() || pdp::edp_gated(state, &prefix) {
        park_pending(state, PendingProxy::Reader(data));
        return;
    }

    let entity = data.guid.entity_id;
    let known = {
        let ppd = state
            .store
            .lookup_mut(&prefix)
            .expect("participant present, checked above");
        ppd.readers.insert(entity, data.clone()).is_some()
    };
    if !known {
        ctx.notify(DiscoveryEvent::ReaderDiscovered {
            guid: data.guid,
            topic_name: data.topic_name.clone(),
        });
    }
    rematch_remote_reader(ctx, state, &data);
}

fn remove_remote_writer(ctx: &DiscoveryContext, state: &mut DiscoveryState, guid: &Guid) {
    let removed = state
        .store
        .lookup_mut(&guid.prefix)
        .and_then(|ppd| ppd.writers.remove(&guid.entity_id));
    if removed.is_none() {
        // Owning participant already gone: drop per failure semantics.
        return;
    }
    // Liveliness subtraction first, while the reader matches still exist.
    liveliness::on_remote_writer_removed(ctx, state, guid);
    let stale: Vec<_> = state
        .edp
        .matches
        .iter()
        .filter(|(w, _)| w == guid)
        .copied()
        .collect();
    for pair in stale {
        remove_match(ctx, state, pair);
    }
    ctx.notify(DiscoveryEvent::WriterRemoved { guid: *guid });
}

fn remove_remote_reader(ctx: &DiscoveryContext, state: &mut DiscoveryState, guid: &Guid) {
    let removed = state
        .store
        .lookup_mut(&guid.prefix)
        .and_then(|ppd| ppd.readers.remove(&guid.entity_id));
    if removed.is_none() {
        return;
    }
    let stale: Vec<_> = state
        .edp
        .matches
        .iter()
        .filter(|(_, r)| r == guid)
        .copied()
        .collect();
    for pair in stale {
        remove_match(ctx, state, pair);
    }
    ctx.notify(DiscoveryEvent::ReaderRemoved { guid: *guid });
}

// ===== Matching =====

fn add_match(ctx: &DiscoveryContext, state: &mut DiscoveryState, pair: (Guid, Guid)) {
    if !state.edp.matches.insert(pair) {
        return;
    }
    let (writer, reader) = pair;
    log::debug!("[EDP-MATCH] installed {} <-> {}", writer, reader);
    if state.edp.local_writers.contains_key(&writer) {
        ctx.notify(DiscoveryEvent::PublicationMatched { writer, reader });
    }
    if state.edp.local_readers.contains_key(&reader) {
        ctx.notify(DiscoveryEvent::SubscriptionMatched { reader, writer });
    }
}

fn remove_match(ctx: &DiscoveryContext, state: &mut DiscoveryState, pair: (Guid, Guid)) {
    if !state.edp.matches.remove(&pair) {
        return;
    }
    let (writer, reader) = pair;
    log::debug!("[EDP-MATCH] removed {} <-> {}", writer, reader);
    if state.edp.local_writers.contains_key(&writer) {
        ctx.notify(DiscoveryEvent::PublicationUnmatched { writer, reader });
    }
    if state.edp.local_readers.contains_key(&reader) {
        ctx.notify(DiscoveryEvent::SubscriptionUnmatched { reader, writer });
    }
}

/// Prefixes whose EDP matching is currently deferred by a server.
fn gated_prefixes(state: &DiscoveryState) -> HashSet<GuidPrefix> {
    state
        .pdp
        .server
        .as_ref()
        .map(|s| s.p2match.clone())
        .unwrap_or_default()
}

/// Re-evaluate one local writer against every visible reader.
fn rematch_local_writer(ctx: &DiscoveryContext, state: &mut DiscoveryState, guid: &Guid) {
    let Some(writer) = state.edp.local_writers.get(guid).cloned() else {
        return;
    };
    let local_prefix = state.store.local_prefix();
    let gated = gated_prefixes(state);
    let mut decisions: Vec<((Guid, Guid), bool)> = Vec::new();

    for reader in state.edp.local_readers.values() {
        decisions.push(((writer.guid, reader.guid), matching::is_compatible(&writer, reader)));
    }
    state.store.foreach_alive(|ppd| {
        let prefix = ppd.guid_prefix();
        if prefix == local_prefix || gated.contains(&prefix) {
            return;
        }
        for reader in ppd.readers.values() {
            decisions.push(((writer.guid, reader.guid), matching::is_compatible(&writer, reader)));
        }
    });

    for (pair, compatible) in decisions {
        if compatible {
            add_match(ctx, state, pair);
        } else {
            remove_match(ctx, state, pair);
        }
    }
}

/// Re-evaluate one local reader against every visible writer.
fn rematch_local_reader(ctx: &DiscoveryContext, state: &mut DiscoveryState, guid: &Guid) {
    let Some(reader) = state.edp.local_readers.get(guid).cloned() else {
        return;
    };
    let local_prefix = state.store.local_prefix();
    let gated = gated_prefixes(state);
    let mut decisions: Vec<((Guid, Guid), bool)> = Vec::new();

    for writer in state.edp.local_writers.values() {
        decisions.push(((writer.guid, reader.guid), matching::is_compatible(writer, &reader)));
    }
    state.store.foreach_alive(|ppd| {
        let prefix = ppd.guid_prefix();
        if prefix == local_prefix || gated.contains(&prefix) {
            return;
        }
        for writer in ppd.writers.values() {
            decisions.push(((writer.guid, reader.guid), matching::is_compatible(writer, &reader)));
        }
    });

    for (pair, compatible) in decisions {
        if compatible {
            add_match(ctx, state, pair);
        } else {
            remove_match(ctx, state, pair);
        }
    }
}

/// Re-evaluate a remote writer against every local reader.
fn rematch_remote_writer(ctx: &DiscoveryContext, state: &mut DiscoveryState, data: &WriterProxyData) {
    let decisions: Vec<((Guid, Guid), bool)> = state
        .edp
        .local_readers
        .values()
        .map(|reader| {
            (
                (data.guid, reader.guid),
                matching::is_compatible(data, reader),
            )
        })
        .collect();
    for (pair, compatible) in decisions {
        if compatible {
            add_match(ctx, state, pair);
        } else {
            remove_match(ctx, state, pair);
        }
    }
}

/// Re-evaluate a remote reader against every local writer.
fn rematch_remote_reader(ctx: &DiscoveryContext, state: &mut DiscoveryState, data: &ReaderProxyData) {
    let decisions: Vec<((Guid, Guid), bool)> = state
        .edp
        .local_writers
        .values()
        .map(|writer| {
            (
                (writer.guid, data.guid),
                matching::is_compatible(writer, data),
            )
        })
        .collect();
    for (pair, compatible) in decisions {
        if compatible {
            add_match(ctx, state, pair);
        } else {
            remove_match(ctx, state, pair);
        }
    }
}

// ===== PDP integration =====

/// Match every endpoint proxy owned by a participant (gate just cleared or
/// participant fully admitted).
pub(crate) fn match_participant_endpoints(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    prefix: &GuidPrefix,
) {
    crate::trace_fn!("edp::match_participant_endpoints");
    drain_pending_for(ctx, state, prefix);
    let (writers, readers) = match state.store.lookup(prefix) {
        Some(ppd) => (
            ppd.writers.values().cloned().collect::<Vec<_>>(),
            ppd.readers.values().cloned().collect::<Vec<_>>(),
        ),
        None => return,
    };
    for writer in &writers {
        rematch_remote_writer(ctx, state, writer);
    }
    for reader in &readers {
        rematch_remote_reader(ctx, state, reader);
    }
}

/// Tear down every match involving endpoints of a participant, then drop
/// its parked samples. Runs before the store entry is destroyed.
pub(crate) fn unmatch_participant(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    prefix: &GuidPrefix,
) {
    crate::trace_fn!("edp::unmatch_participant");
    let stale: Vec<_> = state
        .edp
        .matches
        .iter()
        .filter(|(w, r)| &w.prefix == prefix || &r.prefix == prefix)
        .copied()
        .collect();
    for pair in stale {
        remove_match(ctx, state, pair);
    }
    state.edp.pending.retain(|p| match &p.proxy {
        PendingProxy::Writer(w) => &w.guid.prefix != prefix,
        PendingProxy::Reader(r) => &r.guid.prefix != prefix,
    });
}

/// Re-ingest samples that were parked waiting for this participant.
pub(crate) fn drain_pending_for(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    prefix: &GuidPrefix,
) {
    let (ready, rest): (Vec<_>, Vec<_>) =
        state.edp.pending.drain(..).partition(|p| match &p.proxy {
            PendingProxy::Writer(w) => &w.guid.prefix == prefix,
            PendingProxy::Reader(r) => &r.guid.prefix == prefix,
        });
    state.edp.pending = rest;
    for sample in ready {
        match sample.proxy {
            PendingProxy::Writer(data) => ingest_remote_writer(ctx, state, data),
            PendingProxy::Reader(data) => ingest_remote_reader(ctx, state, data),
        }
    }
}

/// Drop parked samples older than the participant lease.
pub(crate) fn prune_pending(state: &mut DiscoveryState, now: Instant) {
    let lease = state.store.local().lease_duration;
    state
        .edp
        .pending
        .retain(|p| now.duration_since(p.received_at) <= lease);
}
