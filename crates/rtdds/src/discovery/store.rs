// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant proxy store.
//!
//! Keyed by GUID prefix, at most one proxy per prefix. The local
//! participant's proxy is always present and its lease never expires.
//! The store itself carries no lock: every mutation happens under the
//! participant discovery mutex owned by [`super::DiscoveryContext`].

use crate::builtin::data::ParticipantProxyData;
use crate::core::types::GuidPrefix;
use std::collections::HashMap;
use std::time::Instant;

/// Outcome of [`ParticipantProxyStore::insert_or_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// First sample from this prefix; EDP matching must be scheduled.
    New,
    /// Known prefix, wire-visible content changed.
    Updated,
    /// Known prefix, content identical; only the lease was renewed.
    Unchanged,
}

/// Concurrency-agnostic table of participant proxies.
pub struct ParticipantProxyStore {
    local_prefix: GuidPrefix,
    participants: HashMap<GuidPrefix, ParticipantProxyData>,
}

impl ParticipantProxyStore {
    /// Create the store seeded with the local participant's proxy.
    pub fn new(local: ParticipantProxyData) -> Self {
        let local_prefix = local.guid_prefix();
        let mut participants = HashMap::new();
        participants.insert(local_prefix, local);
        Self {
            local_prefix,
            participants,
        }
    }

    pub fn local_prefix(&self) -> GuidPrefix {
        self.local_prefix
    }

    /// The local participant's proxy. Always present.
    pub fn local(&self) -> &ParticipantProxyData {
        self.participants
            .get(&self.local_prefix)
            .expect("local proxy is seeded at construction and never removed")
    }

    pub fn local_mut(&mut self) -> &mut ParticipantProxyData {
        self.participants
            .get_mut(&self.local_prefix)
            .expect("local proxy is seeded at construction and never removed")
    }

    /// Insert a fresh remote proxy or fold it into the existing one.
    ///
    /// Renews the lease in both the Updated and Unchanged cases; locator
    /// lists replace wholesale on update.
    pub fn insert_or_update(&mut self, fresh: ParticipantProxyData) -> InsertResult {
        crate::trace_fn!("ParticipantProxyStore::insert_or_update");
        let prefix = fresh.guid_prefix();
        match self.participants.get_mut(&prefix) {
            Some(existing) => {
                existing.renew_lease();
                existing.is_alive = true;
                if existing.differs_from(&fresh) {
                    existing.update_from(&fresh);
                    InsertResult::Updated
                } else {
                    InsertResult::Unchanged
                }
            }
            None => {
                let mut fresh = fresh;
                fresh.renew_lease();
                fresh.is_alive = true;
                self.participants.insert(prefix, fresh);
                InsertResult::New
            }
        }
    }

    pub fn lookup(&self, prefix: &GuidPrefix) -> Option<&ParticipantProxyData> {
        self.participants.get(prefix)
    }

    pub fn lookup_mut(&mut self, prefix: &GuidPrefix) -> Option<&mut ParticipantProxyData> {
        self.participants.get_mut(prefix)
    }

    /// Delete a remote proxy. Idempotent; the local proxy is never removed.
    ///
    /// The caller (PDP) tears down endpoint matches BEFORE calling this, so
    /// EDP and WLP have confirmed unmatching by the time the entry dies.
    pub fn remove(&mut self, prefix: &GuidPrefix) -> Option<ParticipantProxyData> {
        if prefix == &self.local_prefix {
            return None;
        }
        self.participants.remove(prefix)
    }

    /// Snapshot iteration over live proxies (local included).
    pub fn foreach_alive<F: FnMut(&ParticipantProxyData)>(&self, mut f: F) {
        for data in self.participants.values() {
            if data.is_alive {
                f(data);
            }
        }
    }

    /// Advance the lease clock; returns the prefixes whose lease expired.
    ///
    /// The local participant is exempt. Callers feed each returned prefix
    /// to the PDP removal path with reason LeaseExpired.
    pub fn lease_tick(&mut self, now: Instant) -> Vec<GuidPrefix> {
        let local = self.local_prefix;
        self.participants
            .values()
            .filter(|p| p.guid_prefix() != local && p.is_alive && p.lease_expired(now))
            .map(|p| p.guid_prefix())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Prefixes of all known remote participants.
    pub fn remote_prefixes(&self) -> Vec<GuidPrefix> {
        self.participants
            .keys()
            .filter(|p| **p != self.local_prefix)
            .copied()
            .collect()
    }
}
