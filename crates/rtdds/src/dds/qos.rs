// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS policies consulted by the discovery and liveliness engines.
//!
//! Only the request-vs-offered (RxO) relevant policies are modeled here;
//! purely local policies (resource limits, time-based filter) never reach
//! the wire and are out of scope.

use std::time::Duration;

/// Lease/period value treated as "infinite" (DDS v1.4 Duration_t infinity).
pub const DURATION_INFINITE: Duration = Duration::from_secs(u64::MAX);

/// RELIABILITY QoS kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    BestEffort,
    Reliable,
}

/// DURABILITY QoS kind, ordered on the RxO lattice
/// VOLATILE < TRANSIENT_LOCAL < TRANSIENT < PERSISTENT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Volatile,
    TransientLocal,
    Transient,
    Persistent,
}

impl Durability {
    /// Rank on the RxO lattice (offered must be >= requested).
    pub fn rank(self) -> u8 {
        match self {
            Durability::Volatile => 0,
            Durability::TransientLocal => 1,
            Durability::Transient => 2,
            Durability::Persistent => 3,
        }
    }
}

/// HISTORY QoS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum History {
    KeepLast(u32),
    KeepAll,
}

/// DEADLINE QoS policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub period: Duration,
}

impl Deadline {
    #[must_use]
    pub fn from_millis(ms: u64) -> Self {
        Self {
            period: Duration::from_millis(ms),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self {
            period: DURATION_INFINITE,
        }
    }
}

/// OWNERSHIP QoS kind. Must match exactly between writer and reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Shared,
    Exclusive,
}

/// LIVELINESS QoS kind, ordered on the RxO lattice
/// AUTOMATIC < MANUAL_BY_PARTICIPANT < MANUAL_BY_TOPIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LivelinessKind {
    Automatic,
    ManualByParticipant,
    ManualByTopic,
}

impl LivelinessKind {
    /// Rank on the RxO lattice (offered must be >= requested).
    pub fn rank(self) -> u8 {
        match self {
            LivelinessKind::Automatic => 0,
            LivelinessKind::ManualByParticipant => 1,
            LivelinessKind::ManualByTopic => 2,
        }
    }
}

/// LIVELINESS QoS policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveliness {
    pub kind: LivelinessKind,
    pub lease_duration: Duration,
    /// How often the writer's liveliness is asserted. Only meaningful for
    /// AUTOMATIC and MANUAL_BY_PARTICIPANT writers, which share per-kind
    /// assertion timers.
    pub announcement_period: Duration,
}

impl Default for Liveliness {
    fn default() -> Self {
        Self {
            kind: LivelinessKind::Automatic,
            lease_duration: DURATION_INFINITE,
            announcement_period: DURATION_INFINITE,
        }
    }
}

impl Liveliness {
    #[must_use]
    pub fn new(kind: LivelinessKind, lease_duration: Duration) -> Self {
        // Announcement at a third of the lease keeps two losses survivable.
        let announcement_period = if lease_duration == DURATION_INFINITE {
            DURATION_INFINITE
        } else {
            lease_duration / 3
        };
        Self {
            kind,
            lease_duration,
            announcement_period,
        }
    }

    #[must_use]
    pub fn automatic(lease_duration: Duration) -> Self {
        Self::new(LivelinessKind::Automatic, lease_duration)
    }

    #[must_use]
    pub fn manual_by_participant(lease_duration: Duration) -> Self {
        Self::new(LivelinessKind::ManualByParticipant, lease_duration)
    }

    #[must_use]
    pub fn manual_by_topic(lease_duration: Duration) -> Self {
        Self::new(LivelinessKind::ManualByTopic, lease_duration)
    }

    #[must_use]
    pub fn with_announcement_period(mut self, period: Duration) -> Self {
        self.announcement_period = period;
        self
    }

    #[must_use]
    pub fn is_infinite(&self) -> bool {
        self.lease_duration == DURATION_INFINITE
    }

    /// RxO check: offered (writer, self) vs requested (reader).
    ///
    /// Requested kind must be <= offered kind on the lattice, and the
    /// reader's lease must be >= the writer's lease.
    #[must_use]
    pub fn is_compatible_with(&self, requested: &Liveliness) -> bool {
        requested.kind.rank() <= self.kind.rank()
            && requested.lease_duration >= self.lease_duration
    }
}

/// PARTITION QoS: set of partition names, empty set meaning the default
/// "" partition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Partition {
    pub names: Vec<String>,
}

impl Partition {
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    #[must_use]
    pub fn single(name: &str) -> Self {
        Self {
            names: vec![name.to_string()],
        }
    }

    /// True when no explicit partition is set (the default "" partition).
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.names.is_empty() || self.names.iter().all(|n| n.is_empty())
    }

    /// RxO check: both default, or a non-empty intersection.
    #[must_use]
    pub fn intersects(&self, other: &Partition) -> bool {
        match (self.is_default(), other.is_default()) {
            (true, true) => true,
            (true, false) | (false, true) => false,
            (false, false) => self.names.iter().any(|n| other.names.contains(n)),
        }
    }
}

/// Aggregate endpoint QoS carried in DATA(w)/DATA(r) descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointQos {
    pub reliability: Reliability,
    pub durability: Durability,
    pub history: History,
    pub deadline: Deadline,
    pub ownership: Ownership,
    pub liveliness: Liveliness,
    pub partition: Partition,
}

impl Default for EndpointQos {
    fn default() -> Self {
        Self {
            reliability: Reliability::BestEffort,
            durability: Durability::Volatile,
            history: History::KeepLast(1),
            deadline: Deadline::default(),
            ownership: Ownership::Shared,
            liveliness: Liveliness::default(),
            partition: Partition::default(),
        }
    }
}

impl EndpointQos {
    /// QoS contract of every built-in endpoint: reliable, transient-local.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            reliability: Reliability::Reliable,
            durability: Durability::TransientLocal,
            history: History::KeepAll,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durability_lattice_order() {
        assert!(Durability::Volatile.rank() < Durability::TransientLocal.rank());
        assert!(Durability::TransientLocal.rank() < Durability::Transient.rank());
        assert!(Durability::Transient.rank() < Durability::Persistent.rank());
    }

    #[test]
    fn test_liveliness_kind_lattice_order() {
        assert!(LivelinessKind::Automatic.rank() < LivelinessKind::ManualByParticipant.rank());
        assert!(
            LivelinessKind::ManualByParticipant.rank() < LivelinessKind::ManualByTopic.rank()
        );
    }

    #[test]
    fn test_liveliness_compat_kind_lattice() {
        let offered = Liveliness::manual_by_topic(Duration::from_secs(5));
        let requested = Liveliness::automatic(Duration::from_secs(5));
        // Stronger offered kind satisfies a weaker request, not vice versa.
        assert!(offered.is_compatible_with(&requested));
        assert!(!requested.is_compatible_with(&offered));
    }

    #[test]
    fn test_liveliness_compat_lease() {
        let offered = Liveliness::automatic(Duration::from_secs(5));
        let requested_longer = Liveliness::automatic(Duration::from_secs(10));
        let requested_shorter = Liveliness::automatic(Duration::from_secs(2));
        assert!(offered.is_compatible_with(&requested_longer));
        assert!(!offered.is_compatible_with(&requested_shorter));
    }

    #[test]
    fn test_liveliness_default_announcement_period() {
        let policy = Liveliness::automatic(Duration::from_secs(3));
        assert_eq!(policy.announcement_period, Duration::from_secs(1));
        assert!(Liveliness::default().announcement_period == DURATION_INFINITE);
    }

    #[test]
    fn test_partition_default_rules() {
        let default = Partition::default();
        let named = Partition::single("sensor");
        assert!(default.intersects(&Partition::default()));
        assert!(!default.intersects(&named)); // Only one default -> no match
        assert!(named.intersects(&Partition::single("sensor")));
        assert!(!named.intersects(&Partition::single("actuator")));
    }

    #[test]
    fn test_partition_intersection() {
        let a = Partition::new(vec!["sensor".into(), "actuator".into()]);
        let b = Partition::single("actuator");
        assert!(a.intersects(&b));
    }

    #[test]
    fn test_builtin_qos_contract() {
        let qos = EndpointQos::builtin();
        assert_eq!(qos.reliability, Reliability::Reliable);
        assert_eq!(qos.durability, Durability::TransientLocal);
    }
}
