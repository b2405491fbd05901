// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant assembly.
//!
//! Wires the built-in endpoint factory, the discovery engines, the WLP
//! engine, the timer driver, and the metatraffic receive thread into one
//! object. All periodic work runs on the shared timed-event thread; the
//! receive thread delivers incoming built-in messages to the engines under
//! the participant discovery mutex.

use crate::builtin::data::{ReaderProxyData, WriterProxyData};
use crate::builtin::factory::BuiltinEndpointFactory;
use crate::config::RtpsConfig;
use crate::core::rt::TimerDriver;
use crate::core::types::entity_ids::{
    ENTITYID_READER_LIVELINESS, ENTITYID_READER_LIVELINESS_SECURE,
    ENTITYID_SEDP_PUBLICATIONS_READER, ENTITYID_SEDP_PUBLICATIONS_SECURE_READER,
    ENTITYID_SEDP_PUBLICATIONS_SECURE_WRITER, ENTITYID_SEDP_PUBLICATIONS_WRITER,
    ENTITYID_SEDP_SUBSCRIPTIONS_READER, ENTITYID_SEDP_SUBSCRIPTIONS_SECURE_READER,
    ENTITYID_SEDP_SUBSCRIPTIONS_SECURE_WRITER, ENTITYID_SEDP_SUBSCRIPTIONS_WRITER,
    ENTITYID_SPDP_READER, ENTITYID_SPDP_SECURE_READER, ENTITYID_SPDP_SECURE_WRITER,
    ENTITYID_SPDP_WRITER, ENTITYID_WRITER_LIVELINESS, ENTITYID_WRITER_LIVELINESS_SECURE,
    ENTITYID_PARTICIPANT,
};
use crate::core::types::{EntityId, Guid, GuidPrefix, VENDOR_ID_RTDDS};
use crate::dds::qos::EndpointQos;
use crate::dds::Result;
use crate::discovery::edp::EdpEngine;
use crate::discovery::pdp::PdpEngine;
use crate::discovery::store::ParticipantProxyStore;
use crate::discovery::{DiscoveryContext, DiscoveryEvent, DiscoveryState};
use crate::builtin::data::ParticipantProxyData;
use crate::liveliness::{WlpEngine, WlpState};
use crate::security::PermissiveSecurityPlugin;
use crate::transport::{BuiltinMessage, TransportAttachment};
use crossbeam_channel::{unbounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// An RTPS participant running the built-in discovery and liveliness
/// protocols.
///
/// # Example
///
/// ```no_run
/// use rtdds::{MemTransport, Participant, RtpsConfig};
///
/// let hub = MemTransport::hub();
/// let participant = Participant::new(RtpsConfig::default(), hub.attach())?;
/// println!("local GUID: {}", participant.guid());
/// participant.shutdown();
/// # Ok::<(), rtdds::Error>(())
/// ```
pub struct Participant {
    ctx: Arc<DiscoveryContext>,
    pdp: PdpEngine,
    edp: EdpEngine,
    wlp: WlpEngine,
    events_rx: Receiver<DiscoveryEvent>,
    receive_shutdown: Arc<AtomicBool>,
    receive_thread: Option<JoinHandle<()>>,
    next_entity: AtomicU32,
}

impl Participant {
    /// Create a participant with a generated GUID prefix.
    pub fn new(config: RtpsConfig, attachment: TransportAttachment) -> Result<Self> {
        Self::with_guid_prefix(config, attachment, generate_guid_prefix())
    }

    /// Create a participant with a caller-chosen GUID prefix.
    pub fn with_guid_prefix(
        config: RtpsConfig,
        mut attachment: TransportAttachment,
        guid_prefix: GuidPrefix,
    ) -> Result<Self> {
        crate::trace_fn!("Participant::with_guid_prefix");
        config.validate()?;

        let metatraffic_unicast = config.effective_metatraffic_unicast();
        let metatraffic_multicast = config.effective_metatraffic_multicast();
        let mut bound = metatraffic_unicast.clone();
        bound.extend(metatraffic_multicast.iter().copied());
        let inbound = attachment.bind(&bound);

        let transport: Arc<dyn crate::transport::MetatrafficSend> = Arc::new(attachment);
        // FatalInit policy: a failed endpoint set aborts construction here.
        let endpoints =
            BuiltinEndpointFactory::create(guid_prefix, &config, Arc::clone(&transport))?;

        let mut local = ParticipantProxyData::new(
            guid_prefix,
            config.domain_id,
            config.lease_duration,
        );
        local.available_builtin_endpoints = endpoints.available_mask;
        local.metatraffic_unicast_locators = metatraffic_unicast;
        local.metatraffic_multicast_locators = metatraffic_multicast;
        local.default_unicast_locators = config.default_unicast_locators.clone();
        local.default_multicast_locators = config.default_multicast_locators.clone();

        let (events_tx, events_rx) = unbounded();
        let driver = TimerDriver::new();
        let security_plugin = config
            .security
            .map(|_| Arc::new(PermissiveSecurityPlugin) as Arc<dyn crate::security::SecurityPlugin>);

        let local_guid = Guid::new(guid_prefix, ENTITYID_PARTICIPANT);
        let ctx = Arc::new_cyclic(|self_weak| DiscoveryContext {
            config,
            local_guid,
            endpoints,
            state: parking_lot::Mutex::new(DiscoveryState {
                store: ParticipantProxyStore::new(local),
                pdp: crate::discovery::pdp::PdpState::new(),
                edp: crate::discovery::edp::EdpState::default(),
                wlp: WlpState::new(),
            }),
            events: events_tx,
            driver,
            transport,
            security_plugin,
            self_weak: self_weak.clone(),
        });

        let pdp = PdpEngine::new(Arc::clone(&ctx));
        let edp = EdpEngine::new(Arc::clone(&ctx));
        let wlp = WlpEngine::new(Arc::clone(&ctx));

        let receive_shutdown = Arc::new(AtomicBool::new(false));
        let receive_thread = {
            let ctx = Arc::clone(&ctx);
            let shutdown = Arc::clone(&receive_shutdown);
            thread::Builder::new()
                .name("rtdds-metatraffic-rx".to_string())
                .spawn(move || receive_loop(ctx, inbound, shutdown))
                .map_err(crate::dds::Error::IoError)?
        };

        wlp.enable();
        pdp.enable()?;

        log::debug!("[participant] {} up", local_guid);
        Ok(Self {
            ctx,
            pdp,
            edp,
            wlp,
            events_rx,
            receive_shutdown,
            receive_thread: Some(receive_thread),
            next_entity: AtomicU32::new(1),
        })
    }

    pub fn guid(&self) -> Guid {
        self.ctx.local_guid
    }

    /// Notification stream (discovery, matching, liveliness).
    pub fn events(&self) -> Receiver<DiscoveryEvent> {
        self.events_rx.clone()
    }

    // ===== User endpoint registration (EDP surface) =====

    /// Advertise a local data writer; returns its GUID.
    pub fn create_writer(
        &self,
        topic_name: &str,
        type_name: &str,
        qos: EndpointQos,
    ) -> Result<Guid> {
        // User writer with key: entity kind 0x02.
        let guid = Guid::new(self.guid().prefix, self.allocate_entity(0x02));
        let mut data = WriterProxyData::new(guid, topic_name, type_name);
        data.qos = qos;
        data.unicast_locators = self.ctx.config.default_unicast_locators.clone();
        self.edp.register_local_writer(data)?;
        Ok(guid)
    }

    /// Dispose a local data writer.
    pub fn delete_writer(&self, guid: &Guid) -> Result<()> {
        self.edp.unregister_local_writer(guid)
    }

    /// Advertise a local data reader; returns its GUID.
    pub fn create_reader(
        &self,
        topic_name: &str,
        type_name: &str,
        qos: EndpointQos,
    ) -> Result<Guid> {
        // User reader with key: entity kind 0x07.
        let guid = Guid::new(self.guid().prefix, self.allocate_entity(0x07));
        let mut data = ReaderProxyData::new(guid, topic_name, type_name);
        data.qos = qos;
        data.unicast_locators = self.ctx.config.default_unicast_locators.clone();
        self.edp.register_local_reader(data)?;
        Ok(guid)
    }

    /// Dispose a local data reader.
    pub fn delete_reader(&self, guid: &Guid) -> Result<()> {
        self.edp.unregister_local_reader(guid)
    }

    fn allocate_entity(&self, kind: u8) -> EntityId {
        let id = self.next_entity.fetch_add(1, Ordering::Relaxed);
        let [_, b0, b1, b2] = id.to_be_bytes();
        [b0, b1, b2, kind]
    }

    // ===== Discovery / liveliness surface =====

    /// Force a PDP announcement (`announceParticipantState`).
    pub fn announce_participant_state(&self, new_change: bool, dispose: bool) -> Result<()> {
        self.pdp.announce_participant_state(new_change, dispose)
    }

    /// Renew liveliness of every MANUAL_BY_PARTICIPANT writer.
    pub fn assert_liveliness_manual_by_participant(&self) -> bool {
        self.wlp.assert_liveliness_manual_by_participant()
    }

    /// Renew liveliness of one writer (MANUAL_BY_TOPIC path).
    pub fn assert_liveliness(&self, writer: &Guid) -> bool {
        self.wlp.assert_liveliness(writer)
    }

    // ===== Introspection (snapshot copies, no lock leaks) =====

    /// GUIDs of all known participants, local included.
    pub fn known_participants(&self) -> Vec<Guid> {
        let state = self.ctx.state.lock();
        let mut guids = Vec::with_capacity(state.store.len());
        state.store.foreach_alive(|p| guids.push(p.guid));
        guids
    }

    /// True when the given participant prefix is currently known and alive.
    pub fn knows_participant(&self, prefix: &GuidPrefix) -> bool {
        let state = self.ctx.state.lock();
        state
            .store
            .lookup(prefix)
            .map(|p| p.is_alive)
            .unwrap_or(false)
    }

    /// True when the (writer, reader) match is currently installed.
    pub fn is_matched(&self, writer: &Guid, reader: &Guid) -> bool {
        self.ctx.state.lock().edp.is_matched(writer, reader)
    }

    /// Current liveliness-changed counters of a local reader.
    pub fn liveliness_changed_status(
        &self,
        reader: &Guid,
    ) -> crate::discovery::LivelinessChangedStatus {
        self.ctx
            .state
            .lock()
            .wlp
            .reader_changed_status
            .get(reader)
            .copied()
            .unwrap_or_default()
    }

    /// Current liveliness-lost counters of a local writer.
    pub fn liveliness_lost_status(&self, writer: &Guid) -> crate::discovery::LivelinessLostStatus {
        self.ctx
            .state
            .lock()
            .wlp
            .writer_lost_status
            .get(writer)
            .copied()
            .unwrap_or_default()
    }

    /// Announce disposal, stop the engines, and join the worker threads.
    pub fn shutdown(mut self) {
        self.shutdown_in_place();
    }

    fn shutdown_in_place(&mut self) {
        crate::trace_fn!("Participant::shutdown_in_place");
        if self.receive_thread.is_none() {
            return;
        }
        self.pdp.disable();
        self.wlp.disable();
        self.ctx.driver.shutdown();
        self.receive_shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.receive_thread.take() {
            let _ = handle.join();
        }
        log::debug!("[participant] {} down", self.ctx.local_guid);
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        self.shutdown_in_place();
    }
}

/// Deterministic-enough GUID prefix: vendor id, host entropy, process id,
/// and a timestamp (RTPS v2.2 Sec.8.2.4.2 leaves the scheme to vendors).
fn generate_guid_prefix() -> GuidPrefix {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let pid = std::process::id();
    let nanos = now.as_nanos() as u64;

    let mut prefix = [0u8; 12];
    prefix[0..2].copy_from_slice(&VENDOR_ID_RTDDS);
    prefix[2..6].copy_from_slice(&pid.to_be_bytes());
    prefix[6..12].copy_from_slice(&nanos.to_be_bytes()[2..8]);
    prefix
}

// ===== Receive path =====

fn receive_loop(
    ctx: Arc<DiscoveryContext>,
    inbound: Receiver<BuiltinMessage>,
    shutdown: Arc<AtomicBool>,
) {
    // Chunked waits keep shutdown latency under ~50ms.
    while !shutdown.load(Ordering::Relaxed) {
        match inbound.recv_timeout(Duration::from_millis(50)) {
            Ok(message) => demux(&ctx, message),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Route one inbound message to its built-in endpoint, then hand accepted
/// changes to the owning engine. The participant mutex is taken before the
/// endpoint lock (lock order).
fn demux(ctx: &Arc<DiscoveryContext>, message: BuiltinMessage) {
    crate::trace_fn!("participant::demux");
    match message {
        BuiltinMessage::Data {
            reader_entity,
            change,
            last_available,
            ..
        } => {
            let mut state = ctx.state.lock();
            let pair = match reader_entity {
                ENTITYID_SPDP_READER => Some((&ctx.endpoints.pdp, Proto::Pdp)),
                ENTITYID_SEDP_PUBLICATIONS_READER => {
                    Some((&ctx.endpoints.edp_publications, Proto::EdpPublications))
                }
                ENTITYID_SEDP_SUBSCRIPTIONS_READER => {
                    Some((&ctx.endpoints.edp_subscriptions, Proto::EdpSubscriptions))
                }
                ENTITYID_READER_LIVELINESS => Some((&ctx.endpoints.wlp, Proto::Wlp)),
                ENTITYID_SPDP_SECURE_READER => {
                    ctx.endpoints.secure.as_ref().map(|s| (&s.pdp, Proto::Pdp))
                }
                ENTITYID_SEDP_PUBLICATIONS_SECURE_READER => ctx
                    .endpoints
                    .secure
                    .as_ref()
                    .map(|s| (&s.edp_publications, Proto::EdpPublications)),
                ENTITYID_SEDP_SUBSCRIPTIONS_SECURE_READER => ctx
                    .endpoints
                    .secure
                    .as_ref()
                    .map(|s| (&s.edp_subscriptions, Proto::EdpSubscriptions)),
                ENTITYID_READER_LIVELINESS_SECURE => {
                    ctx.endpoints.secure.as_ref().map(|s| (&s.wlp, Proto::Wlp))
                }
                other => {
                    log::debug!(
                        "[participant] DATA for unknown reader entity {:02x?}",
                        other
                    );
                    None
                }
            };
            let Some((pair, proto)) = pair else { return };
            let accepted = pair.reader.lock().process_data(change, last_available);
            let Some(change) = accepted else { return };
            match proto {
                Proto::Pdp => {
                    crate::discovery::pdp::process_pdp_change(ctx, &mut state, &change)
                }
                Proto::EdpPublications => {
                    crate::discovery::edp::process_publication_change(ctx, &mut state, &change)
                }
                Proto::EdpSubscriptions => {
                    crate::discovery::edp::process_subscription_change(ctx, &mut state, &change)
                }
                Proto::Wlp => crate::liveliness::process_wlp_change(ctx, &mut state, &change),
            }
        }
        BuiltinMessage::AckNack {
            reader_guid,
            writer_entity,
            acked_up_to,
        } => {
            let writer = match writer_entity {
                ENTITYID_SPDP_WRITER => Some(&ctx.endpoints.pdp.writer),
                ENTITYID_SEDP_PUBLICATIONS_WRITER => Some(&ctx.endpoints.edp_publications.writer),
                ENTITYID_SEDP_SUBSCRIPTIONS_WRITER => {
                    Some(&ctx.endpoints.edp_subscriptions.writer)
                }
                ENTITYID_WRITER_LIVELINESS => Some(&ctx.endpoints.wlp.writer),
                ENTITYID_SPDP_SECURE_WRITER => {
                    ctx.endpoints.secure.as_ref().map(|s| &s.pdp.writer)
                }
                ENTITYID_SEDP_PUBLICATIONS_SECURE_WRITER => ctx
                    .endpoints
                    .secure
                    .as_ref()
                    .map(|s| &s.edp_publications.writer),
                ENTITYID_SEDP_SUBSCRIPTIONS_SECURE_WRITER => ctx
                    .endpoints
                    .secure
                    .as_ref()
                    .map(|s| &s.edp_subscriptions.writer),
                ENTITYID_WRITER_LIVELINESS_SECURE => {
                    ctx.endpoints.secure.as_ref().map(|s| &s.wlp.writer)
                }
                _ => None,
            };
            if let Some(writer) = writer {
                writer.lock().process_acknack(&reader_guid, acked_up_to);
            }
        }
    }
}

enum Proto {
    Pdp,
    EdpPublications,
    EdpSubscriptions,
    Wlp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemTransport;

    #[test]
    fn test_generate_guid_prefix_vendor_and_uniqueness() {
        let a = generate_guid_prefix();
        let b = generate_guid_prefix();
        assert_eq!(&a[0..2], &VENDOR_ID_RTDDS);
        assert_ne!(a, b);
    }

    #[test]
    fn test_participant_up_down() {
        let hub = MemTransport::hub();
        let participant =
            Participant::new(RtpsConfig::default(), hub.attach()).expect("participant");
        assert_eq!(participant.guid().entity_id, ENTITYID_PARTICIPANT);
        assert!(participant.knows_participant(&participant.guid().prefix));
        participant.shutdown();
    }

    #[test]
    fn test_entity_allocation_kinds() {
        let hub = MemTransport::hub();
        let participant = Participant::new(
            RtpsConfig {
                participant_id: 7,
                ..RtpsConfig::default()
            },
            hub.attach(),
        )
        .expect("participant");
        let writer = participant
            .create_writer("T", "t", EndpointQos::default())
            .expect("writer");
        let reader = participant
            .create_reader("T", "t", EndpointQos::default())
            .expect("reader");
        assert_eq!(writer.entity_id[3], 0x02);
        assert_eq!(reader.entity_id[3], 0x07);
        assert_ne!(writer.entity_id, reader.entity_id);
        participant.shutdown();
    }
}
