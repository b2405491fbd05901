// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery engines: participant discovery (PDP) and endpoint
//! discovery/matching (EDP), over the participant proxy store.
//!
//! # Locking
//!
//! One participant-level mutex guards the whole [`DiscoveryState`] (proxy
//! store, EDP tables, WLP buckets). Endpoint locks are acquired strictly
//! after it, status updates last: Participant > Endpoint > Status.
//! Consumers receive notifications through a channel instead of callbacks
//! holding back-pointers, so nothing re-enters the engines from below.

pub mod edp;
pub mod pdp;
pub mod store;

use crate::builtin::BuiltinEndpoints;
use crate::config::RtpsConfig;
use crate::core::rt::TimerDriver;
use crate::core::types::Guid;
use crate::dds::qos::LivelinessKind;
use crate::liveliness::WlpState;
use crate::security::SecurityPlugin;
use crate::transport::MetatrafficSend;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

pub use store::{InsertResult, ParticipantProxyStore};

/// Why a participant left the proxy store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// DATA(p) with a NOT_ALIVE kind was received.
    Disposed,
    /// The lease elapsed without renewal.
    LeaseExpired,
    /// Local shutdown.
    Shutdown,
}

/// Publisher-side liveliness loss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivelinessLostStatus {
    pub total_count: u32,
    pub total_count_change: u32,
}

/// Subscriber-side liveliness counters (level and delta).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivelinessChangedStatus {
    pub alive_count: i32,
    pub not_alive_count: i32,
    pub alive_count_change: i32,
    pub not_alive_count_change: i32,
    pub last_publication_handle: [u8; 16],
}

/// Notifications drained by the embedding layer.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    ParticipantDiscovered {
        guid: Guid,
    },
    ParticipantUpdated {
        guid: Guid,
    },
    ParticipantRemoved {
        guid: Guid,
        reason: RemovalReason,
    },
    WriterDiscovered {
        guid: Guid,
        topic_name: String,
    },
    ReaderDiscovered {
        guid: Guid,
        topic_name: String,
    },
    WriterRemoved {
        guid: Guid,
    },
    ReaderRemoved {
        guid: Guid,
    },
    /// A local writer and a remote reader became compatible.
    PublicationMatched {
        writer: Guid,
        reader: Guid,
    },
    PublicationUnmatched {
        writer: Guid,
        reader: Guid,
    },
    /// A local reader and a remote writer became compatible.
    SubscriptionMatched {
        reader: Guid,
        writer: Guid,
    },
    SubscriptionUnmatched {
        reader: Guid,
        writer: Guid,
    },
    /// A matched writer's liveliness changed, as seen by a local reader.
    LivelinessChanged {
        reader: Guid,
        writer: Guid,
        kind: LivelinessKind,
        status: LivelinessChangedStatus,
    },
    /// A local writer missed its own lease.
    LivelinessLost {
        writer: Guid,
        status: LivelinessLostStatus,
    },
}

/// All mutable discovery state, guarded by the participant mutex.
pub struct DiscoveryState {
    pub store: ParticipantProxyStore,
    pub pdp: pdp::PdpState,
    pub edp: edp::EdpState,
    pub wlp: WlpState,
}

/// Shared, immutable-after-init discovery context.
///
/// Every engine and timed event holds an `Arc` of this; the single mutex
/// inside serializes all mutation.
pub struct DiscoveryContext {
    pub config: RtpsConfig,
    pub local_guid: Guid,
    pub endpoints: BuiltinEndpoints,
    pub state: Mutex<DiscoveryState>,
    pub events: Sender<DiscoveryEvent>,
    pub driver: Arc<TimerDriver>,
    /// Raw metatraffic access for the stateless SPDP spray (initial peers,
    /// multicast); the reliable paths go through the built-in writers.
    pub transport: Arc<dyn MetatrafficSend>,
    pub security_plugin: Option<Arc<dyn SecurityPlugin>>,
    /// Self-reference for timer callbacks (set via `Arc::new_cyclic`);
    /// events hold this weakly so they never keep the context alive.
    pub(crate) self_weak: Weak<DiscoveryContext>,
}

impl DiscoveryContext {
    /// Push a notification; consumers drain at their own pace.
    pub(crate) fn notify(&self, event: DiscoveryEvent) {
        // An embedding layer that dropped its receiver simply stops
        // listening; discovery keeps running.
        let _ = self.events.send(event);
    }
}
