// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in stateful writer and reader.
//!
//! Every built-in endpoint is RELIABLE, TRANSIENT_LOCAL, and keyed. The
//! writer pushes each change to its matched readers and tracks per-reader
//! acknowledgments; adding a matched reader replays the whole history so
//! late joiners see the current view. The reader enforces source order per
//! remote writer and acknowledges what it received.
//!
//! The full user-data reliability machinery (heartbeat/gap timers,
//! fragmentation) lives in the layer this crate treats as an external
//! collaborator; the ack range piggybacks on DATA here.

use crate::core::cache::{CacheChange, ChangeKind, HistoryAttributes, ReaderHistory, WriterHistory};
use crate::core::types::{Guid, InstanceHandle, Locator, SequenceNumber};
use crate::dds::{Error, Result};
use crate::transport::{BuiltinMessage, MetatrafficSend};
use std::sync::Arc;

/// Addressing info for a remote built-in reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteReaderAttributes {
    pub guid: Guid,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
    pub expects_inline_qos: bool,
}

/// Addressing info for a remote built-in writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteWriterAttributes {
    pub guid: Guid,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
}

struct ReaderProxy {
    attributes: RemoteReaderAttributes,
    /// Highest contiguous sequence this reader acknowledged.
    acked_up_to: SequenceNumber,
}

/// Reliable transient-local built-in writer.
pub struct BuiltinWriter {
    guid: Guid,
    history: WriterHistory,
    matched_readers: Vec<ReaderProxy>,
    transport: Arc<dyn MetatrafficSend>,
    /// Set when the participant's throughput controller is finite; dispatch
    /// then defers to the flow-control layer instead of pushing inline.
    asynchronous: bool,
}

impl BuiltinWriter {
    pub fn new(
        guid: Guid,
        attributes: HistoryAttributes,
        transport: Arc<dyn MetatrafficSend>,
        asynchronous: bool,
    ) -> Self {
        Self {
            guid,
            history: WriterHistory::new(attributes),
            matched_readers: Vec::new(),
            transport,
            asynchronous,
        }
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    // ===== Matched readers =====

    /// Install (or refresh) a matched remote reader.
    ///
    /// The whole history is replayed to the new reader: built-in endpoints
    /// are TRANSIENT_LOCAL, so a late joiner must see the current view.
    pub fn matched_reader_add(&mut self, attributes: RemoteReaderAttributes) {
        crate::trace_fn!("BuiltinWriter::matched_reader_add");
        if let Some(existing) = self
            .matched_readers
            .iter_mut()
            .find(|p| p.attributes.guid == attributes.guid)
        {
            existing.attributes = attributes;
            return;
        }
        log::debug!(
            "[builtin-writer] {} matched reader {}",
            self.guid,
            attributes.guid
        );
        let proxy = ReaderProxy {
            attributes,
            acked_up_to: 0,
        };
        for change in self.history.changes() {
            self.dispatch_to(&proxy, change);
        }
        self.matched_readers.push(proxy);
    }

    /// Remove a matched reader. Idempotent.
    pub fn matched_reader_remove(&mut self, reader_guid: &Guid) -> bool {
        let before = self.matched_readers.len();
        self.matched_readers
            .retain(|p| &p.attributes.guid != reader_guid);
        before != self.matched_readers.len()
    }

    pub fn matched_reader_is_matched(&self, reader_guid: &Guid) -> bool {
        self.matched_readers
            .iter()
            .any(|p| &p.attributes.guid == reader_guid)
    }

    pub fn matched_readers(&self) -> impl Iterator<Item = &RemoteReaderAttributes> {
        self.matched_readers.iter().map(|p| &p.attributes)
    }

    // ===== Writing =====

    /// Build a change carrying the next sequence number.
    pub fn new_change(
        &mut self,
        kind: ChangeKind,
        instance_handle: InstanceHandle,
        serialized_payload: Vec<u8>,
    ) -> CacheChange {
        self.history
            .new_change(kind, self.guid, instance_handle, serialized_payload)
    }

    /// Store a change and push it to every matched reader.
    ///
    /// When the history is at its cap, the oldest fully-acknowledged change
    /// is recycled first. A full history with nothing acknowledged surfaces
    /// `ResourceLimitExceeded`; the caller decides whether that is fatal.
    pub fn add_change(&mut self, change: CacheChange) -> Result<()> {
        crate::trace_fn!("BuiltinWriter::add_change");
        if self.history.is_full() && !self.recycle_one() {
            return Err(Error::ResourceLimitExceeded(format!(
                "writer {} history full, nothing acknowledged",
                self.guid
            )));
        }
        self.history.add_change(change.clone())?;
        self.dispatch(&change);
        Ok(())
    }

    /// Re-send an already stored change (same sequence number).
    pub fn redeliver(&self, sequence_number: SequenceNumber) -> bool {
        match self.history.get_change(sequence_number) {
            Some(change) => {
                let change = change.clone();
                self.dispatch(&change);
                true
            }
            None => false,
        }
    }

    fn dispatch(&self, change: &CacheChange) {
        for proxy in &self.matched_readers {
            self.dispatch_to(proxy, change);
        }
    }

    fn dispatch_to(&self, proxy: &ReaderProxy, change: &CacheChange) {
        let destinations: &[Locator] = if proxy.attributes.unicast_locators.is_empty() {
            &proxy.attributes.multicast_locators
        } else {
            &proxy.attributes.unicast_locators
        };
        let message = BuiltinMessage::Data {
            reader_entity: proxy.attributes.guid.entity_id,
            change: change.clone(),
            first_available: self.history.min_sequence().unwrap_or(change.sequence_number),
            last_available: self.history.max_sequence().unwrap_or(change.sequence_number),
        };
        if let Err(err) = self.transport.send(destinations, &message) {
            // Transient I/O: the change stays in history and is re-sent
            // under reliable protocol rules; not surfaced to the caller.
            log::debug!(
                "[builtin-writer] {} dispatch to {} failed: {}",
                self.guid,
                proxy.attributes.guid,
                err
            );
        }
    }

    /// Recycle the oldest change acknowledged by every matched reader.
    fn recycle_one(&mut self) -> bool {
        let Some(min_seq) = self.history.min_sequence() else {
            return false;
        };
        if self.change_acked_by_all(min_seq) {
            self.history.remove_min_change();
            return true;
        }
        false
    }

    // ===== Acknowledgments =====

    /// Ingest an ACKNACK from a matched reader.
    pub fn process_acknack(&mut self, reader_guid: &Guid, acked_up_to: SequenceNumber) {
        if let Some(proxy) = self
            .matched_readers
            .iter_mut()
            .find(|p| &p.attributes.guid == reader_guid)
        {
            if acked_up_to > proxy.acked_up_to {
                proxy.acked_up_to = acked_up_to;
            }
        }
    }

    /// True when every matched reader acknowledged `sequence_number`.
    ///
    /// Vacuously true with no matched readers.
    pub fn change_acked_by_all(&self, sequence_number: SequenceNumber) -> bool {
        self.matched_readers
            .iter()
            .all(|p| p.acked_up_to >= sequence_number)
    }

    /// True when `reader_guid` acknowledged `sequence_number`.
    pub fn change_acked_by(&self, reader_guid: &Guid, sequence_number: SequenceNumber) -> bool {
        self.matched_readers
            .iter()
            .any(|p| &p.attributes.guid == reader_guid && p.acked_up_to >= sequence_number)
    }

    // ===== History access (PDP server trim, announce re-send) =====

    pub fn history(&self) -> &WriterHistory {
        &self.history
    }

    pub fn remove_change(&mut self, sequence_number: SequenceNumber) -> bool {
        self.history.remove_change(sequence_number)
    }

    /// Re-insert a change recovered from persistence (no dispatch).
    pub fn history_restore(&mut self, change: CacheChange) {
        self.history.restore_change(change);
    }

    /// Store a change produced elsewhere under a fresh local sequence
    /// number (server relays client DATA(p) this way).
    pub fn add_relayed_change(&mut self, change: &CacheChange) -> Result<SequenceNumber> {
        let relayed = self.new_change(
            change.kind,
            change.instance_handle,
            change.serialized_payload.clone(),
        );
        let seq = relayed.sequence_number;
        self.add_change(relayed)?;
        Ok(seq)
    }
}

struct WriterProxy {
    attributes: RemoteWriterAttributes,
    /// Highest sequence number accepted from this writer.
    last_received: SequenceNumber,
}

/// Reliable built-in reader.
pub struct BuiltinReader {
    guid: Guid,
    history: ReaderHistory,
    matched_writers: Vec<WriterProxy>,
    transport: Arc<dyn MetatrafficSend>,
    /// PDP readers bootstrap discovery and therefore accept DATA from
    /// writers that are not yet matched; SEDP/WLP readers do not.
    accept_unmatched: bool,
    pub expects_inline_qos: bool,
}

impl BuiltinReader {
    pub fn new(
        guid: Guid,
        attributes: HistoryAttributes,
        transport: Arc<dyn MetatrafficSend>,
        accept_unmatched: bool,
    ) -> Self {
        Self {
            guid,
            history: ReaderHistory::new(attributes),
            matched_writers: Vec::new(),
            transport,
            accept_unmatched,
            expects_inline_qos: true,
        }
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    // ===== Matched writers =====

    pub fn matched_writer_add(&mut self, attributes: RemoteWriterAttributes) {
        crate::trace_fn!("BuiltinReader::matched_writer_add");
        if let Some(existing) = self
            .matched_writers
            .iter_mut()
            .find(|p| p.attributes.guid == attributes.guid)
        {
            existing.attributes = attributes;
            return;
        }
        log::debug!(
            "[builtin-reader] {} matched writer {}",
            self.guid,
            attributes.guid
        );
        self.matched_writers.push(WriterProxy {
            attributes,
            last_received: 0,
        });
    }

    /// Remove a matched writer and its received changes. Idempotent.
    pub fn matched_writer_remove(&mut self, writer_guid: &Guid) -> bool {
        let before = self.matched_writers.len();
        self.matched_writers
            .retain(|p| &p.attributes.guid != writer_guid);
        if before != self.matched_writers.len() {
            self.history.remove_changes_from(writer_guid);
            true
        } else {
            false
        }
    }

    pub fn matched_writer_is_matched(&self, writer_guid: &Guid) -> bool {
        self.matched_writers
            .iter()
            .any(|p| &p.attributes.guid == writer_guid)
    }

    // ===== Receive path =====

    /// Ingest a DATA submessage.
    ///
    /// Returns the change when it is in source order. A re-sent change with
    /// the CURRENT sequence number is accepted again (lease renewal and
    /// liveliness re-assertions ride on redelivery); strictly lower
    /// sequences and, for stateful readers, unmatched writers are dropped.
    /// An ACKNACK goes back to matched writers either way.
    pub fn process_data(
        &mut self,
        change: CacheChange,
        last_available: SequenceNumber,
    ) -> Option<CacheChange> {
        crate::trace_fn!("BuiltinReader::process_data");
        let writer_guid = change.writer_guid;
        let matched = self
            .matched_writers
            .iter_mut()
            .find(|p| p.attributes.guid == writer_guid);

        let accepted = match matched {
            Some(proxy) => {
                if change.sequence_number < proxy.last_received {
                    // Strictly older than what we have: ignore.
                    None
                } else {
                    proxy.last_received = change.sequence_number;
                    Some(change)
                }
            }
            None if self.accept_unmatched => Some(change),
            None => {
                log::debug!(
                    "[builtin-reader] {} dropping DATA from unmatched writer {}",
                    self.guid,
                    writer_guid
                );
                None
            }
        };

        if let Some(change) = &accepted {
            // History keeps one copy per (writer, sequence); acceptance does
            // not depend on it.
            self.history.add_change(change.clone());
        }
        self.acknowledge(&writer_guid, last_available);
        accepted
    }

    /// Acknowledge receipt back to a matched writer.
    fn acknowledge(&self, writer_guid: &Guid, _last_available: SequenceNumber) {
        let Some(proxy) = self
            .matched_writers
            .iter()
            .find(|p| &p.attributes.guid == writer_guid)
        else {
            return;
        };
        let destinations: &[Locator] = if proxy.attributes.unicast_locators.is_empty() {
            &proxy.attributes.multicast_locators
        } else {
            &proxy.attributes.unicast_locators
        };
        let message = BuiltinMessage::AckNack {
            reader_guid: self.guid,
            writer_entity: writer_guid.entity_id,
            acked_up_to: proxy.last_received,
        };
        if let Err(err) = self.transport.send(destinations, &message) {
            log::debug!(
                "[builtin-reader] {} acknack to {} failed: {}",
                self.guid,
                writer_guid,
                err
            );
        }
    }

    pub fn history(&self) -> &ReaderHistory {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::entity_ids::{ENTITYID_SPDP_READER, ENTITYID_SPDP_WRITER};
    use crate::transport::MemTransport;
    use std::net::Ipv4Addr;

    fn test_transport() -> Arc<dyn MetatrafficSend> {
        Arc::new(MemTransport::hub().attach())
    }

    fn writer() -> BuiltinWriter {
        BuiltinWriter::new(
            Guid::new([1; 12], ENTITYID_SPDP_WRITER),
            HistoryAttributes::builtin_writer(),
            test_transport(),
            false,
        )
    }

    fn remote_reader(prefix: u8) -> RemoteReaderAttributes {
        RemoteReaderAttributes {
            guid: Guid::new([prefix; 12], ENTITYID_SPDP_READER),
            unicast_locators: vec![Locator::udpv4(Ipv4Addr::LOCALHOST, 7410 + prefix as u16)],
            multicast_locators: Vec::new(),
            expects_inline_qos: false,
        }
    }

    #[test]
    fn test_writer_matched_reader_add_remove_idempotent() {
        let mut w = writer();
        w.matched_reader_add(remote_reader(2));
        w.matched_reader_add(remote_reader(2)); // Refresh, not duplicate
        assert_eq!(w.matched_readers().count(), 1);

        assert!(w.matched_reader_remove(&remote_reader(2).guid));
        assert!(!w.matched_reader_remove(&remote_reader(2).guid));
    }

    #[test]
    fn test_writer_acked_by_all() {
        let mut w = writer();
        w.matched_reader_add(remote_reader(2));
        w.matched_reader_add(remote_reader(3));
        let change = w.new_change(ChangeKind::Alive, [0; 16], vec![1]);
        w.add_change(change).unwrap();

        assert!(!w.change_acked_by_all(1));
        w.process_acknack(&remote_reader(2).guid, 1);
        assert!(w.change_acked_by(&remote_reader(2).guid, 1));
        assert!(!w.change_acked_by_all(1));
        w.process_acknack(&remote_reader(3).guid, 1);
        assert!(w.change_acked_by_all(1));
    }

    #[test]
    fn test_writer_recycles_only_acked() {
        let mut w = BuiltinWriter::new(
            Guid::new([1; 12], ENTITYID_SPDP_WRITER),
            HistoryAttributes {
                initial_reserved_caches: 1,
                maximum_reserved_caches: 2,
                payload_max_size: 64,
            },
            test_transport(),
            false,
        );
        w.matched_reader_add(remote_reader(2));
        for _ in 0..2 {
            let c = w.new_change(ChangeKind::Alive, [0; 16], vec![]);
            w.add_change(c).unwrap();
        }
        // Nothing acknowledged: the third add must fail.
        let c = w.new_change(ChangeKind::Alive, [0; 16], vec![]);
        assert!(w.add_change(c).is_err());

        // After the oldest is acknowledged it is recycled.
        w.process_acknack(&remote_reader(2).guid, 1);
        let c = w.new_change(ChangeKind::Alive, [0; 16], vec![]);
        assert!(w.add_change(c).is_ok());
        assert_eq!(w.history().min_sequence(), Some(2));
    }

    #[test]
    fn test_transient_local_replay_on_late_join() {
        let hub = MemTransport::hub();
        let mut reader_side = hub.attach();
        let locator = Locator::udpv4(Ipv4Addr::LOCALHOST, 7500);
        let rx = reader_side.bind(&[locator]);

        let mut w = BuiltinWriter::new(
            Guid::new([1; 12], ENTITYID_SPDP_WRITER),
            HistoryAttributes::builtin_writer(),
            Arc::new(hub.attach()),
            false,
        );
        // History filled before the reader matches.
        for i in 0..3u8 {
            let c = w.new_change(ChangeKind::Alive, [i; 16], vec![i]);
            w.add_change(c).unwrap();
        }
        w.matched_reader_add(RemoteReaderAttributes {
            guid: Guid::new([9; 12], ENTITYID_SPDP_READER),
            unicast_locators: vec![locator],
            multicast_locators: Vec::new(),
            expects_inline_qos: false,
        });

        let replayed: Vec<_> = rx.try_iter().collect();
        assert_eq!(replayed.len(), 3, "late joiner sees the full history");
    }

    #[test]
    fn test_reader_source_order_per_writer() {
        let mut r = BuiltinReader::new(
            Guid::new([2; 12], ENTITYID_SPDP_READER),
            HistoryAttributes::builtin_reader(),
            test_transport(),
            false,
        );
        let writer_guid = Guid::new([1; 12], ENTITYID_SPDP_WRITER);
        r.matched_writer_add(RemoteWriterAttributes {
            guid: writer_guid,
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
        });

        let make = |seq| CacheChange {
            kind: ChangeKind::Alive,
            writer_guid,
            instance_handle: [0; 16],
            sequence_number: seq,
            serialized_payload: vec![],
        };
        assert!(r.process_data(make(2), 2).is_some());
        // Strictly lower sequence from the same source is ignored.
        assert!(r.process_data(make(1), 2).is_none());
        // Redelivery of the current sequence is accepted again (renewal).
        assert!(r.process_data(make(2), 2).is_some());
        assert!(r.process_data(make(3), 3).is_some());
    }

    #[test]
    fn test_stateful_reader_drops_unmatched() {
        let mut r = BuiltinReader::new(
            Guid::new([2; 12], ENTITYID_SPDP_READER),
            HistoryAttributes::builtin_reader(),
            test_transport(),
            false,
        );
        let change = CacheChange {
            kind: ChangeKind::Alive,
            writer_guid: Guid::new([1; 12], ENTITYID_SPDP_WRITER),
            instance_handle: [0; 16],
            sequence_number: 1,
            serialized_payload: vec![],
        };
        assert!(r.process_data(change, 1).is_none());
    }

    #[test]
    fn test_pdp_reader_accepts_unmatched() {
        let mut r = BuiltinReader::new(
            Guid::new([2; 12], ENTITYID_SPDP_READER),
            HistoryAttributes::builtin_reader(),
            test_transport(),
            true,
        );
        let change = CacheChange {
            kind: ChangeKind::Alive,
            writer_guid: Guid::new([1; 12], ENTITYID_SPDP_WRITER),
            instance_handle: [0; 16],
            sequence_number: 1,
            serialized_payload: vec![],
        };
        assert!(r.process_data(change, 1).is_some());
    }

    #[test]
    fn test_reader_unmatch_drops_history() {
        let mut r = BuiltinReader::new(
            Guid::new([2; 12], ENTITYID_SPDP_READER),
            HistoryAttributes::builtin_reader(),
            test_transport(),
            false,
        );
        let writer_guid = Guid::new([1; 12], ENTITYID_SPDP_WRITER);
        r.matched_writer_add(RemoteWriterAttributes {
            guid: writer_guid,
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
        });
        let change = CacheChange {
            kind: ChangeKind::Alive,
            writer_guid,
            instance_handle: [0; 16],
            sequence_number: 1,
            serialized_payload: vec![],
        };
        r.process_data(change, 1);
        assert_eq!(r.history().len(), 1);
        assert!(r.matched_writer_remove(&writer_guid));
        assert!(r.history().is_empty());
    }

    #[test]
    fn test_writer_relay_assigns_fresh_sequence() {
        let mut w = writer();
        let foreign = CacheChange {
            kind: ChangeKind::Alive,
            writer_guid: Guid::new([8; 12], ENTITYID_SPDP_WRITER),
            instance_handle: [8; 16],
            sequence_number: 42,
            serialized_payload: vec![1, 2, 3],
        };
        let seq = w.add_relayed_change(&foreign).unwrap();
        assert_eq!(seq, 1); // Local numbering, not the origin's
        let stored = w.history().get_change(1).unwrap();
        assert_eq!(stored.writer_guid, w.guid());
        assert_eq!(stored.instance_handle, [8; 16]);
        assert_eq!(stored.serialized_payload, vec![1, 2, 3]);
    }
}
