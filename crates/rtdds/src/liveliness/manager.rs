// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-writer liveliness deadline tracking.
//!
//! One manager instance serves the publisher side (local writers, feeding
//! `liveliness_lost`) and another the subscriber side (remote writers,
//! feeding `liveliness_changed`). The manager is pure bookkeeping: callers
//! drive it with asserts and clock ticks and route the returned
//! transitions; it never takes locks or fires callbacks itself.
//!
//! A writer is in one of three states. Publisher-side writers start ALIVE
//! (their lease is armed at registration); subscriber-side writers start
//! NOT_ASSERTED and only enter the counts at their first observed
//! assertion.

use crate::core::types::Guid;
use crate::dds::qos::{LivelinessKind, DURATION_INFINITE};
use std::time::{Duration, Instant};

/// Liveliness state of one tracked writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterAliveness {
    /// Never asserted; occupies neither count.
    NotAsserted,
    Alive,
    NotAlive,
}

/// An alive/not-alive edge for one tracked writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivelinessTransition {
    pub guid: Guid,
    pub kind: LivelinessKind,
    pub lease: Duration,
    pub alive_change: i32,
    pub not_alive_change: i32,
}

struct WriterRecord {
    guid: Guid,
    kind: LivelinessKind,
    lease: Duration,
    deadline: Option<Instant>,
    status: WriterAliveness,
}

/// Tracks absolute deadlines for a set of writers.
#[derive(Default)]
pub struct LivelinessManager {
    writers: Vec<WriterRecord>,
}

impl LivelinessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a writer.
    ///
    /// `initially_alive` arms the lease right away (publisher side); the
    /// subscriber side passes false and waits for the first assertion.
    /// Returns false when the (guid, kind, lease) triple is already
    /// tracked.
    pub fn add_writer(
        &mut self,
        guid: Guid,
        kind: LivelinessKind,
        lease: Duration,
        initially_alive: bool,
    ) -> bool {
        if self
            .writers
            .iter()
            .any(|w| w.guid == guid && w.kind == kind && w.lease == lease)
        {
            return false;
        }
        let (status, deadline) = if initially_alive {
            (WriterAliveness::Alive, arm(lease))
        } else {
            (WriterAliveness::NotAsserted, None)
        };
        self.writers.push(WriterRecord {
            guid,
            kind,
            lease,
            deadline,
            status,
        });
        true
    }

    /// Stop tracking a writer; returns the state it was in.
    pub fn remove_writer(
        &mut self,
        guid: &Guid,
        kind: LivelinessKind,
        lease: Duration,
    ) -> Option<WriterAliveness> {
        let index = self
            .writers
            .iter()
            .position(|w| &w.guid == guid && w.kind == kind && w.lease == lease)?;
        Some(self.writers.swap_remove(index).status)
    }

    /// Drop every record for a writer, emitting the subtraction for the
    /// count it occupied.
    pub fn remove_writer_any(&mut self, guid: &Guid) -> Vec<LivelinessTransition> {
        let mut removed = Vec::new();
        self.writers.retain(|w| {
            if &w.guid == guid {
                match w.status {
                    WriterAliveness::Alive => removed.push(LivelinessTransition {
                        guid: w.guid,
                        kind: w.kind,
                        lease: w.lease,
                        alive_change: -1,
                        not_alive_change: 0,
                    }),
                    WriterAliveness::NotAlive => removed.push(LivelinessTransition {
                        guid: w.guid,
                        kind: w.kind,
                        lease: w.lease,
                        alive_change: 0,
                        not_alive_change: -1,
                    }),
                    WriterAliveness::NotAsserted => {}
                }
                false
            } else {
                true
            }
        });
        removed
    }

    /// Push one writer's deadline forward.
    ///
    /// A missed tick does not matter: the next assert is always valid, a
    /// first assert enters the alive count, and a NOT_ALIVE writer
    /// recovers.
    pub fn assert_writer(&mut self, guid: &Guid) -> Option<LivelinessTransition> {
        let writer = self.writers.iter_mut().find(|w| &w.guid == guid)?;
        Self::renew(writer)
    }

    /// Assert every tracked writer of the given kind.
    pub fn assert_kind(&mut self, kind: LivelinessKind) -> Vec<LivelinessTransition> {
        self.writers
            .iter_mut()
            .filter(|w| w.kind == kind)
            .filter_map(Self::renew)
            .collect()
    }

    fn renew(writer: &mut WriterRecord) -> Option<LivelinessTransition> {
        writer.deadline = arm(writer.lease);
        let transition = match writer.status {
            WriterAliveness::Alive => None,
            WriterAliveness::NotAsserted => Some(LivelinessTransition {
                guid: writer.guid,
                kind: writer.kind,
                lease: writer.lease,
                alive_change: 1,
                not_alive_change: 0,
            }),
            WriterAliveness::NotAlive => Some(LivelinessTransition {
                guid: writer.guid,
                kind: writer.kind,
                lease: writer.lease,
                alive_change: 1,
                not_alive_change: -1,
            }),
        };
        writer.status = WriterAliveness::Alive;
        transition
    }

    /// Expire every deadline at or before `now`.
    pub fn check(&mut self, now: Instant) -> Vec<LivelinessTransition> {
        let mut lost = Vec::new();
        for writer in &mut self.writers {
            let expired = writer.status == WriterAliveness::Alive
                && writer.deadline.map(|d| d <= now).unwrap_or(false);
            if expired {
                writer.status = WriterAliveness::NotAlive;
                lost.push(LivelinessTransition {
                    guid: writer.guid,
                    kind: writer.kind,
                    lease: writer.lease,
                    alive_change: -1,
                    not_alive_change: 1,
                });
            }
        }
        lost
    }

    pub fn is_tracked(&self, guid: &Guid) -> bool {
        self.writers.iter().any(|w| &w.guid == guid)
    }

    pub fn is_alive(&self, guid: &Guid) -> bool {
        self.writers
            .iter()
            .any(|w| &w.guid == guid && w.status == WriterAliveness::Alive)
    }

    pub fn kind_of(&self, guid: &Guid) -> Option<(LivelinessKind, Duration)> {
        self.writers
            .iter()
            .find(|w| &w.guid == guid)
            .map(|w| (w.kind, w.lease))
    }
}

fn arm(lease: Duration) -> Option<Instant> {
    if lease == DURATION_INFINITE {
        None
    } else {
        Some(Instant::now() + lease)
    }
}
