// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer Liveliness Protocol engine.
//!
//! Local writers are bucketed by liveliness kind. AUTOMATIC writers share
//! one assertion timer, MANUAL_BY_PARTICIPANT writers share another that
//! only re-sends what the application explicitly asserted;
//! MANUAL_BY_TOPIC writers assert through their own data path and are only
//! tracked here. Each shared timer runs at the minimum announcement period
//! of its bucket.
//!
//! Two [`manager::LivelinessManager`]s track absolute deadlines: the
//! publisher side feeds `liveliness_lost`, the subscriber side consumes
//! WLP assertions and feeds `liveliness_changed` to matched readers.

pub mod manager;

use crate::builtin::data::endpoint_proxy::{ReaderProxyData, WriterProxyData};
use crate::builtin::data::{ParticipantMessageData, TOPIC_PARTICIPANT_MESSAGE_SECURE};
use crate::builtin::endpoint::{RemoteReaderAttributes, RemoteWriterAttributes};
use crate::builtin::data::participant_proxy::ParticipantProxyData;
use crate::builtin::BuiltinEndpointPair;
use crate::core::cache::{CacheChange, ChangeKind};
use crate::core::rt::TimedEvent;
use crate::core::types::entity_ids::{
    BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_DATA_READER,
    BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_DATA_WRITER,
    BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_SECURE_DATA_READER,
    BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_SECURE_DATA_WRITER,
    DISC_BUILTIN_ENDPOINT_PARTICIPANT_DETECTOR, ENTITYID_READER_LIVELINESS,
    ENTITYID_READER_LIVELINESS_SECURE, ENTITYID_WRITER_LIVELINESS,
    ENTITYID_WRITER_LIVELINESS_SECURE,
};
use crate::core::types::{Guid, SequenceNumber};
use crate::dds::qos::{EndpointQos, LivelinessKind, DURATION_INFINITE};
use crate::discovery::{
    DiscoveryContext, DiscoveryEvent, DiscoveryState, LivelinessChangedStatus,
    LivelinessLostStatus,
};
use manager::{LivelinessManager, LivelinessTransition};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Deadline scan granularity for both liveliness managers.
pub const LIVELINESS_CHECK_PERIOD: Duration = Duration::from_millis(100);

/// WLP state, guarded by the participant discovery mutex.
pub struct WlpState {
    pub automatic_writers: Vec<Guid>,
    pub manual_by_participant_writers: Vec<Guid>,
    pub manual_by_topic_writers: Vec<Guid>,
    /// Fast path: at least one local reader requested AUTOMATIC liveliness.
    pub automatic_readers: bool,
    pub(crate) automatic_event: Option<Arc<TimedEvent>>,
    pub(crate) manual_event: Option<Arc<TimedEvent>>,
    pub(crate) check_event: Option<Arc<TimedEvent>>,
    pub(crate) min_automatic_period: Option<Duration>,
    pub(crate) min_manual_period: Option<Duration>,
    /// Last explicit MANUAL_BY_PARTICIPANT assertion, re-sent by the timer.
    pub(crate) last_manual_assertion: Option<SequenceNumber>,
    pub pub_manager: LivelinessManager,
    pub sub_manager: LivelinessManager,
    pub writer_lost_status: HashMap<Guid, LivelinessLostStatus>,
    pub reader_changed_status: HashMap<Guid, LivelinessChangedStatus>,
}

impl WlpState {
    pub fn new() -> Self {
        Self {
            automatic_writers: Vec::new(),
            manual_by_participant_writers: Vec::new(),
            manual_by_topic_writers: Vec::new(),
            automatic_readers: false,
            automatic_event: None,
            manual_event: None,
            check_event: None,
            min_automatic_period: None,
            min_manual_period: None,
            last_manual_assertion: None,
            pub_manager: LivelinessManager::new(),
            sub_manager: LivelinessManager::new(),
            writer_lost_status: HashMap::new(),
            reader_changed_status: HashMap::new(),
        }
    }
}

impl Default for WlpState {
    fn default() -> Self {
        Self::new()
    }
}

/// WLP engine facade.
pub struct WlpEngine {
    ctx: Arc<DiscoveryContext>,
}

impl WlpEngine {
    pub fn new(ctx: Arc<DiscoveryContext>) -> Self {
        Self { ctx }
    }

    /// Start the deadline scan.
    pub fn enable(&self) {
        enable(&self.ctx);
    }

    /// Stop the timers.
    pub fn disable(&self) {
        let mut state = self.ctx.state.lock();
        for event in [
            state.wlp.automatic_event.take(),
            state.wlp.manual_event.take(),
            state.wlp.check_event.take(),
        ]
        .into_iter()
        .flatten()
        {
            event.cancel_timer();
        }
    }

    /// Explicit application assert for every MANUAL_BY_PARTICIPANT writer.
    pub fn assert_liveliness_manual_by_participant(&self) -> bool {
        let mut state = self.ctx.state.lock();
        assert_liveliness_manual_by_participant(&self.ctx, &mut state)
    }

    /// Explicit assert for one local writer (MANUAL_BY_TOPIC path).
    pub fn assert_liveliness(&self, writer: &Guid) -> bool {
        let mut state = self.ctx.state.lock();
        state.wlp.pub_manager.assert_writer(writer);
        state.wlp.pub_manager.is_tracked(writer)
    }

    /// Ingest one change from the WLP built-in reader.
    pub fn process_wlp_change(&self, change: &CacheChange) {
        let mut state = self.ctx.state.lock();
        process_wlp_change(&self.ctx, &mut state, change);
    }
}

pub(crate) fn enable(ctx: &Arc<DiscoveryContext>) {
    let weak: Weak<DiscoveryContext> = Arc::downgrade(ctx);
    let event = TimedEvent::new(
        Arc::clone(&ctx.driver),
        LIVELINESS_CHECK_PERIOD,
        move || {
            if let Some(ctx) = weak.upgrade() {
                on_liveliness_check(&ctx);
            }
        },
    );
    event.restart_timer();
    ctx.state.lock().wlp.check_event = Some(event);
}

/// The WLP pair assertions travel over: secure when liveliness protection
/// is on, plain otherwise.
fn wlp_pair(ctx: &DiscoveryContext) -> &BuiltinEndpointPair {
    match (&ctx.endpoints.secure, &ctx.config.security) {
        (Some(secure), Some(attrs)) if attrs.is_liveliness_protected => &secure.wlp,
        _ => &ctx.endpoints.wlp,
    }
}

// ===== Local writer bookkeeping =====

/// Register a local writer with the protocol (called on EDP registration).
pub(crate) fn add_local_writer(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    data: &WriterProxyData,
) {
    crate::trace_fn!("wlp::add_local_writer");
    let liveliness = data.qos.liveliness;
    let guid = data.guid;
    log::debug!(
        "[WLP] adding local writer {} ({:?}, lease {:?})",
        guid,
        liveliness.kind,
        liveliness.lease_duration
    );

    match liveliness.kind {
        LivelinessKind::Automatic => {
            state.wlp.automatic_writers.push(guid);
            update_assertion_timer(ctx, state, LivelinessKind::Automatic);
        }
        LivelinessKind::ManualByParticipant => {
            state.wlp.manual_by_participant_writers.push(guid);
            update_assertion_timer(ctx, state, LivelinessKind::ManualByParticipant);
        }
        LivelinessKind::ManualByTopic => {
            // Own lease, own assertions through the writer's data path.
            state.wlp.manual_by_topic_writers.push(guid);
        }
    }
    if liveliness.lease_duration != DURATION_INFINITE {
        // Publisher side: the lease is armed immediately.
        state
            .wlp
            .pub_manager
            .add_writer(guid, liveliness.kind, liveliness.lease_duration, true);
    }
}

/// Remove a local writer from the protocol (called on EDP unregistration).
pub(crate) fn remove_local_writer(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    data: &WriterProxyData,
) {
    crate::trace_fn!("wlp::remove_local_writer");
    let liveliness = data.qos.liveliness;
    let guid = data.guid;

    match liveliness.kind {
        LivelinessKind::Automatic => {
            state.wlp.automatic_writers.retain(|g| g != &guid);
            update_assertion_timer(ctx, state, LivelinessKind::Automatic);
        }
        LivelinessKind::ManualByParticipant => {
            state.wlp.manual_by_participant_writers.retain(|g| g != &guid);
            update_assertion_timer(ctx, state, LivelinessKind::ManualByParticipant);
        }
        LivelinessKind::ManualByTopic => {
            state.wlp.manual_by_topic_writers.retain(|g| g != &guid);
        }
    }
    if liveliness.lease_duration != DURATION_INFINITE {
        state
            .wlp
            .pub_manager
            .remove_writer(&guid, liveliness.kind, liveliness.lease_duration);
    }
    state.wlp.writer_lost_status.remove(&guid);
}

/// Recompute a bucket's shared timer from its current members.
///
/// The timer runs at the bucket minimum. When a shorter period joins and
/// the currently scheduled wake-up is later than the new period, the timer
/// is cancelled and restarted immediately; when the bucket empties, the
/// timer is cancelled.
fn update_assertion_timer(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    kind: LivelinessKind,
) {
    let bucket: &[Guid] = match kind {
        LivelinessKind::Automatic => &state.wlp.automatic_writers,
        LivelinessKind::ManualByParticipant => &state.wlp.manual_by_participant_writers,
        LivelinessKind::ManualByTopic => return,
    };

    let min_period = bucket
        .iter()
        .filter_map(|g| state.edp.local_writers.get(g))
        .map(|w| w.qos.liveliness.announcement_period)
        .filter(|p| *p != DURATION_INFINITE)
        .min();

    let (event_slot, min_slot) = match kind {
        LivelinessKind::Automatic => (
            &mut state.wlp.automatic_event,
            &mut state.wlp.min_automatic_period,
        ),
        LivelinessKind::ManualByParticipant => {
            (&mut state.wlp.manual_event, &mut state.wlp.min_manual_period)
        }
        LivelinessKind::ManualByTopic => unreachable!("early-returned above"),
    };

    let Some(period) = min_period else {
        // Bucket empty (or all-infinite): stop the timer.
        if let Some(event) = event_slot.take() {
            event.cancel_timer();
        }
        *min_slot = None;
        return;
    };

    match event_slot {
        None => {
            let weak: Weak<DiscoveryContext> = ctx.self_weak.clone();
            let callback = move || {
                let Some(ctx) = weak.upgrade() else { return };
                match kind {
                    LivelinessKind::Automatic => on_automatic_assertion(&ctx),
                    LivelinessKind::ManualByParticipant => on_manual_assertion_resend(&ctx),
                    LivelinessKind::ManualByTopic => {}
                }
            };
            let event = TimedEvent::new(Arc::clone(&ctx.driver), period, callback);
            event.restart_timer();
            *event_slot = Some(event);
            *min_slot = Some(period);
        }
        Some(event) => {
            event.update_interval(period);
            if min_slot.map(|m| period < m).unwrap_or(true) {
                // Shorter period joined: do not wait out the old interval.
                if event.remaining_time().map(|r| r > period).unwrap_or(true) {
                    event.cancel_timer();
                    event.restart_timer();
                }
            }
            *min_slot = Some(period);
        }
    }
}

// ===== Assertion publishing =====

/// Publish one assertion sample for all writers of `kind` under the local
/// participant. Returns the sequence number written.
fn send_assertion(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    kind: LivelinessKind,
) -> Option<SequenceNumber> {
    let message = ParticipantMessageData::assertion(state.store.local_prefix(), kind)?;
    let payload = message.serialize();
    let key = message.key();

    let mut writer = wlp_pair(ctx).writer.lock();
    let change = writer.new_change(ChangeKind::Alive, key, payload);
    let seq = change.sequence_number;
    match writer.add_change(change) {
        Ok(()) => Some(seq),
        Err(err) => {
            log::debug!("[WLP] assertion write failed: {}", err);
            None
        }
    }
}

/// Automatic bucket tick: one sample renews every AUTOMATIC writer.
pub(crate) fn on_automatic_assertion(ctx: &Arc<DiscoveryContext>) {
    crate::trace_fn!("wlp::on_automatic_assertion");
    let mut state = ctx.state.lock();
    if state.wlp.automatic_writers.is_empty() {
        return;
    }
    send_assertion(ctx, &mut state, LivelinessKind::Automatic);
    // Publisher side only reports losses; recoveries renew silently.
    state.wlp.pub_manager.assert_kind(LivelinessKind::Automatic);
}

/// Manual bucket tick: merely re-send the most recent explicit assertion
/// to fight packet loss. No renewal happens here, and a stale assertion
/// (every MANUAL_BY_PARTICIPANT writer already past its lease) is not
/// re-sent: the loss must propagate to the matched readers.
pub(crate) fn on_manual_assertion_resend(ctx: &Arc<DiscoveryContext>) {
    crate::trace_fn!("wlp::on_manual_assertion_resend");
    let state = ctx.state.lock();
    let still_current = state
        .wlp
        .manual_by_participant_writers
        .iter()
        .any(|g| state.wlp.pub_manager.is_alive(g));
    if !still_current {
        return;
    }
    if let Some(seq) = state.wlp.last_manual_assertion {
        wlp_pair(ctx).writer.lock().redeliver(seq);
    }
}

/// Application-driven assert of every MANUAL_BY_PARTICIPANT writer.
pub(crate) fn assert_liveliness_manual_by_participant(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
) -> bool {
    crate::trace_fn!("wlp::assert_liveliness_manual_by_participant");
    if state.wlp.manual_by_participant_writers.is_empty() {
        return false;
    }
    state.wlp.last_manual_assertion =
        send_assertion(ctx, state, LivelinessKind::ManualByParticipant);
    state
        .wlp
        .pub_manager
        .assert_kind(LivelinessKind::ManualByParticipant);
    true
}

// ===== Subscriber side =====

/// Ingest one WLP sample: renew every writer of the announced kind under
/// the asserting participant and route the resulting transitions.
pub(crate) fn process_wlp_change(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    change: &CacheChange,
) {
    crate::trace_fn!("wlp::process_wlp_change");
    if change.kind.is_disposal() {
        return;
    }
    let message = match ParticipantMessageData::parse(&change.serialized_payload) {
        Ok(message) => message,
        Err(err) => {
            log::warn!("[WLP] dropping malformed ParticipantMessageData: {}", err);
            return;
        }
    };
    let Some(kind) = message.liveliness_kind() else {
        // Foreign message kinds on this topic are tolerated.
        return;
    };
    if kind == LivelinessKind::Automatic && !state.wlp.automatic_readers {
        // Nobody here asked for AUTOMATIC liveliness.
        return;
    }

    // One assertion covers every writer of that kind under the sender.
    let writers: Vec<(Guid, Duration)> = state
        .store
        .lookup(&message.guid_prefix)
        .map(|ppd| {
            ppd.writers
                .values()
                .filter(|w| w.qos.liveliness.kind == kind)
                .filter(|w| w.qos.liveliness.lease_duration != DURATION_INFINITE)
                .map(|w| (w.guid, w.qos.liveliness.lease_duration))
                .collect()
        })
        .unwrap_or_default();

    let mut transitions = Vec::new();
    for (guid, lease) in writers {
        // Tracking starts at the first assertion seen for a writer; the
        // writer enters the alive count on that edge.
        state.wlp.sub_manager.add_writer(guid, kind, lease, false);
        if let Some(t) = state.wlp.sub_manager.assert_writer(&guid) {
            transitions.push(t);
        }
    }
    for transition in transitions {
        route_subscriber_transition(ctx, state, &transition);
    }
}

/// Deliver one subscriber-side transition to every local reader that is
/// matched to the writer and shares its (kind, lease) pair.
fn route_subscriber_transition(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    transition: &LivelinessTransition,
) {
    let readers: Vec<Guid> = state
        .edp
        .local_readers_matched_to(&transition.guid)
        .into_iter()
        .filter(|r| {
            state
                .edp
                .local_readers
                .get(r)
                .map(|data| {
                    data.qos.liveliness.kind == transition.kind
                        && data.qos.liveliness.lease_duration == transition.lease
                })
                .unwrap_or(false)
        })
        .collect();

    for reader in readers {
        let status = state.wlp.reader_changed_status.entry(reader).or_default();
        status.alive_count += transition.alive_change;
        status.alive_count_change += transition.alive_change;
        status.not_alive_count += transition.not_alive_change;
        status.not_alive_count_change += transition.not_alive_change;
        status.last_publication_handle = transition.guid.instance_handle();
        let snapshot = *status;
        // Deltas reset once the notification is out.
        status.alive_count_change = 0;
        status.not_alive_count_change = 0;

        ctx.notify(DiscoveryEvent::LivelinessChanged {
            reader,
            writer: transition.guid,
            kind: transition.kind,
            status: snapshot,
        });
    }
}

/// Deadline scan over both managers.
pub(crate) fn on_liveliness_check(ctx: &Arc<DiscoveryContext>) {
    let mut state = ctx.state.lock();
    let now = Instant::now();

    let lost = state.wlp.pub_manager.check(now);
    for transition in lost {
        let status = state
            .wlp
            .writer_lost_status
            .entry(transition.guid)
            .or_default();
        status.total_count += 1;
        status.total_count_change += 1;
        let snapshot = *status;
        status.total_count_change = 0;
        log::debug!("[WLP] local writer {} lost liveliness", transition.guid);
        ctx.notify(DiscoveryEvent::LivelinessLost {
            writer: transition.guid,
            status: snapshot,
        });
    }

    let expired = state.wlp.sub_manager.check(now);
    for transition in expired {
        route_subscriber_transition(ctx, &mut state, &transition);
    }
}

// ===== Remote endpoint pairing and teardown =====

/// A matched remote writer disappeared: emit the count subtraction to its
/// readers, then forget it. Runs BEFORE the EDP match set is torn down.
pub(crate) fn on_remote_writer_removed(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    writer: &Guid,
) {
    let transitions = state.wlp.sub_manager.remove_writer_any(writer);
    for transition in transitions {
        route_subscriber_transition(ctx, state, &transition);
    }
}

/// Participant teardown: subtract every writer it owned.
pub(crate) fn on_remote_participant_removed(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    ppd: &ParticipantProxyData,
) {
    let writers: Vec<Guid> = ppd.writers.values().map(|w| w.guid).collect();
    for writer in writers {
        on_remote_writer_removed(ctx, state, &writer);
    }
}

/// Install the remote WLP endpoints advertised by the participant's
/// bitmask on the local WLP pair. Secure variants go through the security
/// plugin's verdict; a declined endpoint is not matched and not retried.
pub(crate) fn assign_remote_endpoints(ctx: &DiscoveryContext, ppd: &ParticipantProxyData) {
    crate::trace_fn!("wlp::assign_remote_endpoints");
    let endp = ppd.available_builtin_endpoints;
    // Peers that advertise PDP at all are assumed to run the WLP pair;
    // some stacks omit the ParticipantMessage bits.
    let partdet = endp & DISC_BUILTIN_ENDPOINT_PARTICIPANT_DETECTOR;
    let prefix = ppd.guid_prefix();
    let unicast = ppd.metatraffic_unicast_locators.clone();
    let multicast = ppd.metatraffic_multicast_locators.clone();

    if endp & BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_DATA_WRITER != 0 || partdet != 0 {
        ctx.endpoints
            .wlp
            .reader
            .lock()
            .matched_writer_add(RemoteWriterAttributes {
                guid: Guid::new(prefix, ENTITYID_WRITER_LIVELINESS),
                unicast_locators: unicast.clone(),
                multicast_locators: multicast.clone(),
            });
    }
    if endp & BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_DATA_READER != 0 || partdet != 0 {
        ctx.endpoints
            .wlp
            .writer
            .lock()
            .matched_reader_add(RemoteReaderAttributes {
                guid: Guid::new(prefix, ENTITYID_READER_LIVELINESS),
                unicast_locators: unicast.clone(),
                multicast_locators: multicast.clone(),
                expects_inline_qos: false,
            });
    }

    let Some(secure) = ctx.endpoints.secure.as_ref() else {
        return;
    };
    let Some(plugin) = ctx.security_plugin.as_ref() else {
        return;
    };

    if endp & BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_SECURE_DATA_WRITER != 0 {
        let mut remote = WriterProxyData::new(
            Guid::new(prefix, ENTITYID_WRITER_LIVELINESS_SECURE),
            TOPIC_PARTICIPANT_MESSAGE_SECURE,
            "ParticipantMessageData",
        );
        remote.qos = EndpointQos::builtin();
        remote.unicast_locators = unicast.clone();
        remote.multicast_locators = multicast.clone();
        let local_reader = secure.wlp.reader.lock().guid();
        if plugin.discovered_builtin_writer(local_reader, ppd.guid, &remote) {
            secure
                .wlp
                .reader
                .lock()
                .matched_writer_add(RemoteWriterAttributes {
                    guid: remote.guid,
                    unicast_locators: remote.unicast_locators.clone(),
                    multicast_locators: remote.multicast_locators.clone(),
                });
        } else {
            log::warn!(
                "[WLP] security plugin declined secure writer of {}",
                ppd.guid
            );
        }
    }
    if endp & BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_SECURE_DATA_READER != 0 {
        let mut remote = ReaderProxyData::new(
            Guid::new(prefix, ENTITYID_READER_LIVELINESS_SECURE),
            TOPIC_PARTICIPANT_MESSAGE_SECURE,
            "ParticipantMessageData",
        );
        remote.qos = EndpointQos::builtin();
        remote.unicast_locators = unicast.clone();
        remote.multicast_locators = multicast;
        let local_writer = secure.wlp.writer.lock().guid();
        if plugin.discovered_builtin_reader(local_writer, ppd.guid, &remote) {
            secure
                .wlp
                .writer
                .lock()
                .matched_reader_add(RemoteReaderAttributes {
                    guid: remote.guid,
                    unicast_locators: remote.unicast_locators.clone(),
                    multicast_locators: remote.multicast_locators.clone(),
                    expects_inline_qos: false,
                });
        } else {
            log::warn!(
                "[WLP] security plugin declined secure reader of {}",
                ppd.guid
            );
        }
    }
}

/// Drop the WLP pairings of a departed participant. Strictly paired with
/// [`assign_remote_endpoints`].
pub(crate) fn remove_remote_endpoints(ctx: &DiscoveryContext, ppd: &ParticipantProxyData) {
    crate::trace_fn!("wlp::remove_remote_endpoints");
    let prefix = ppd.guid_prefix();
    ctx.endpoints
        .wlp
        .reader
        .lock()
        .matched_writer_remove(&Guid::new(prefix, ENTITYID_WRITER_LIVELINESS));
    ctx.endpoints
        .wlp
        .writer
        .lock()
        .matched_reader_remove(&Guid::new(prefix, ENTITYID_READER_LIVELINESS));
    if let Some(secure) = ctx.endpoints.secure.as_ref() {
        secure
            .wlp
            .reader
            .lock()
            .matched_writer_remove(&Guid::new(prefix, ENTITYID_WRITER_LIVELINESS_SECURE));
        secure
            .wlp
            .writer
            .lock()
            .matched_reader_remove(&Guid::new(prefix, ENTITYID_READER_LIVELINESS_SECURE));
    }
}

/// Track whether any local reader runs AUTOMATIC liveliness (fast path for
/// assertion routing).
pub(crate) fn add_local_reader(state: &mut DiscoveryState, data: &ReaderProxyData) {
    if data.qos.liveliness.kind == LivelinessKind::Automatic {
        state.wlp.automatic_readers = true;
    }
}
