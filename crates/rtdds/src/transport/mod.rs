// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metatraffic transport seam.
//!
//! Real deployments plug UDP/TCP/SHM adapters in here; those adapters are
//! external collaborators and not part of this crate. What discovery needs
//! is locator-addressed delivery of built-in messages, which
//! [`MemTransport`] provides in-process. Delivery is fire-and-forget like
//! UDP: unknown locators drop silently, reliability lives in the endpoint
//! layer above.

use crate::core::cache::CacheChange;
use crate::core::types::{EntityId, Guid, Locator, SequenceNumber};
use crate::dds::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// One message on the metatraffic plane.
///
/// The wire framing (RTPS header, submessage encoding) belongs to the
/// transport adapters; at this seam messages are already demarshalled.
#[derive(Debug, Clone)]
pub enum BuiltinMessage {
    /// DATA submessage from a built-in writer, with the heartbeat range
    /// piggybacked so the receiving reader can acknowledge.
    Data {
        reader_entity: EntityId,
        change: CacheChange,
        first_available: SequenceNumber,
        last_available: SequenceNumber,
    },
    /// ACKNACK from a built-in reader back to the writer.
    AckNack {
        reader_guid: Guid,
        writer_entity: EntityId,
        /// Highest sequence number received in order from this writer.
        acked_up_to: SequenceNumber,
    },
}

/// Locator-addressed send capability handed to the built-in endpoints.
pub trait MetatrafficSend: Send + Sync {
    /// Dispatch `message` to every destination locator. Unreachable
    /// destinations are dropped silently (UDP semantics).
    fn send(&self, destinations: &[Locator], message: &BuiltinMessage) -> Result<()>;
}

type Routes = HashMap<Locator, Vec<(u64, Sender<BuiltinMessage>)>>;

/// In-process metatraffic hub.
///
/// Each participant [`attach`](MemTransport::attach)es, binds its locators,
/// and drains the returned channel from its receive thread. Multiple
/// participants may bind the same (multicast) locator.
pub struct MemTransport {
    routes: RwLock<Routes>,
    next_attachment_id: AtomicU64,
    self_weak: Weak<MemTransport>,
}

impl MemTransport {
    /// Create a hub shared by every participant of a domain.
    pub fn hub() -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            routes: RwLock::new(HashMap::new()),
            next_attachment_id: AtomicU64::new(1),
            self_weak: self_weak.clone(),
        })
    }

    /// Create a per-participant attachment.
    pub fn attach(&self) -> TransportAttachment {
        TransportAttachment {
            hub: self
                .self_weak
                .upgrade()
                .expect("hub outlives the reference this was called through"),
            id: self.next_attachment_id.fetch_add(1, Ordering::Relaxed),
            bound: Vec::new(),
        }
    }

    fn prune(&self, attachment_id: u64) {
        let mut routes = self.routes.write();
        for senders in routes.values_mut() {
            senders.retain(|(id, _)| *id != attachment_id);
        }
        routes.retain(|_, senders| !senders.is_empty());
    }
}

/// A participant's handle on the hub.
pub struct TransportAttachment {
    hub: Arc<MemTransport>,
    id: u64,
    bound: Vec<Locator>,
}

impl TransportAttachment {
    /// Bind the given locators and return the inbound channel.
    ///
    /// All locators of one participant share a single channel; its receive
    /// thread drains the channel and demultiplexes by destination entity.
    pub fn bind(&mut self, locators: &[Locator]) -> Receiver<BuiltinMessage> {
        let (tx, rx) = unbounded();
        let mut routes = self.hub.routes.write();
        for locator in locators {
            routes.entry(*locator).or_default().push((self.id, tx.clone()));
            self.bound.push(*locator);
        }
        rx
    }

    /// Remove this participant's bindings. Further sends to them drop.
    pub fn unbind_all(&mut self) {
        self.bound.clear();
        self.hub.prune(self.id);
    }
}

impl MetatrafficSend for TransportAttachment {
    fn send(&self, destinations: &[Locator], message: &BuiltinMessage) -> Result<()> {
        crate::trace_fn!("TransportAttachment::send");
        let mut dead = Vec::new();
        {
            let routes = self.hub.routes.read();
            for locator in destinations {
                let Some(senders) = routes.get(locator) else {
                    // Nobody bound: UDP would drop the datagram too.
                    continue;
                };
                for (id, sender) in senders {
                    if sender.send(message.clone()).is_err() {
                        dead.push(*id);
                    }
                }
            }
        }
        // Shut-down participants disconnect their channel; drop their routes
        // so the table does not accumulate dead ends.
        for id in dead {
            self.hub.prune(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::ChangeKind;
    use std::net::Ipv4Addr;

    fn probe_change(seq: SequenceNumber) -> CacheChange {
        CacheChange {
            kind: ChangeKind::Alive,
            writer_guid: Guid::new([1; 12], [0, 1, 0, 0xc2]),
            instance_handle: [0; 16],
            sequence_number: seq,
            serialized_payload: vec![seq as u8],
        }
    }

    fn data_message(seq: SequenceNumber) -> BuiltinMessage {
        BuiltinMessage::Data {
            reader_entity: [0, 1, 0, 0xc7],
            change: probe_change(seq),
            first_available: 1,
            last_available: seq,
        }
    }

    #[test]
    fn test_unicast_delivery() {
        let hub = MemTransport::hub();
        let sender_side = hub.attach();
        let mut receiver_side = hub.attach();

        let locator = Locator::udpv4(Ipv4Addr::LOCALHOST, 7410);
        let rx = receiver_side.bind(&[locator]);

        sender_side.send(&[locator], &data_message(1)).unwrap();
        let received = rx.try_recv().expect("delivered");
        match received {
            BuiltinMessage::Data { change, .. } => assert_eq!(change.sequence_number, 1),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_unknown_locator_drops_silently() {
        let hub = MemTransport::hub();
        let sender_side = hub.attach();
        let nowhere = Locator::udpv4(Ipv4Addr::new(10, 9, 9, 9), 1);
        assert!(sender_side.send(&[nowhere], &data_message(1)).is_ok());
    }

    #[test]
    fn test_multicast_fanout() {
        let hub = MemTransport::hub();
        let sender_side = hub.attach();
        let mut a = hub.attach();
        let mut b = hub.attach();

        let group = Locator::udpv4(Ipv4Addr::new(239, 255, 0, 1), 7400);
        let rx_a = a.bind(&[group]);
        let rx_b = b.bind(&[group]);

        sender_side.send(&[group], &data_message(7)).unwrap();
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_unbind_stops_delivery() {
        let hub = MemTransport::hub();
        let sender_side = hub.attach();
        let mut receiver_side = hub.attach();
        let locator = Locator::udpv4(Ipv4Addr::LOCALHOST, 7414);
        let rx = receiver_side.bind(&[locator]);

        receiver_side.unbind_all();
        sender_side.send(&[locator], &data_message(1)).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let hub = MemTransport::hub();
        let sender_side = hub.attach();
        let mut gone = hub.attach();
        let locator = Locator::udpv4(Ipv4Addr::LOCALHOST, 7412);
        let rx = gone.bind(&[locator]);
        drop(rx);

        sender_side.send(&[locator], &data_message(1)).unwrap();
        assert!(hub.routes.read().get(&locator).is_none());
    }
}
