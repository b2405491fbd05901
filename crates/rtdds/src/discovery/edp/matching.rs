// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint compatibility checking (RxO - Request vs Offered).
//!
//! Implements DDS v1.4 Sec.2.2.3 QoS compatibility rules to decide whether
//! a writer and a reader on the same topic can communicate.
//!
//! # Compatibility Rules
//!
//! | Policy      | Rule                                                    |
//! |-------------|---------------------------------------------------------|
//! | Topic/Type  | Exact (opaque byte comparison)                          |
//! | Reliability | Writer >= Reader (Reliable > BestEffort)                |
//! | Durability  | Writer >= Reader (Volatile < TransientLocal < Transient < Persistent) |
//! | History     | Writer depth >= Reader depth                            |
//! | Deadline    | Writer period <= Reader period                          |
//! | Ownership   | Must match exactly                                      |
//! | Liveliness  | Writer kind >= Reader kind, writer lease <= reader lease |
//! | Partition   | Must have intersection (empty set = default partition)  |

use crate::builtin::data::{ReaderProxyData, WriterProxyData};
use crate::dds::qos::{History, Reliability};

/// Topic and type names must both match exactly.
pub(crate) fn is_same_topic(writer: &WriterProxyData, reader: &ReaderProxyData) -> bool {
    writer.topic_name == reader.topic_name && writer.type_name == reader.type_name
}

/// Full RxO check between an offered (writer) and requested (reader) side.
///
/// Topic and type are checked first; all QoS policies must then pass.
pub(crate) fn is_compatible(writer: &WriterProxyData, reader: &ReaderProxyData) -> bool {
    crate::trace_fn!("edp::matching::is_compatible");
    if !is_same_topic(writer, reader) {
        return false;
    }
    let writer_qos = &writer.qos;
    let reader_qos = &reader.qos;

    // 1. Reliability: reader must not request RELIABLE from a BEST_EFFORT
    //    writer.
    let reliability_ok = !matches!(
        (&writer_qos.reliability, &reader_qos.reliability),
        (Reliability::BestEffort, Reliability::Reliable)
    );
    if !reliability_ok {
        log::debug!(
            "[EDP-MATCH] Reliability mismatch (writer={:?}, reader={:?})",
            writer_qos.reliability,
            reader_qos.reliability
        );
        return false;
    }

    // 2. Durability: requested <= offered on the lattice.
    if writer_qos.durability.rank() < reader_qos.durability.rank() {
        log::debug!(
            "[EDP-MATCH] Durability mismatch (writer={:?}, reader={:?})",
            writer_qos.durability,
            reader_qos.durability
        );
        return false;
    }

    // 3. History: writer must retain at least what the reader asks for.
    let history_ok = match (reader_qos.history, writer_qos.history) {
        (History::KeepLast(r_keep), History::KeepLast(w_keep)) => w_keep >= r_keep,
        (History::KeepLast(_), History::KeepAll) => true,
        (History::KeepAll, History::KeepAll) => true,
        (History::KeepAll, History::KeepLast(_)) => false,
    };
    if !history_ok {
        log::debug!(
            "[EDP-MATCH] History mismatch (writer={:?}, reader={:?})",
            writer_qos.history,
            reader_qos.history
        );
        return false;
    }

    // 4. Deadline: reader's requested period >= writer's offered period.
    if writer_qos.deadline.period > reader_qos.deadline.period {
        log::debug!(
            "[EDP-MATCH] Deadline mismatch (writer={:?}, reader={:?})",
            writer_qos.deadline,
            reader_qos.deadline
        );
        return false;
    }

    // 5. Ownership: kinds must match exactly.
    if writer_qos.ownership != reader_qos.ownership {
        log::debug!(
            "[EDP-MATCH] Ownership mismatch (writer={:?}, reader={:?})",
            writer_qos.ownership,
            reader_qos.ownership
        );
        return false;
    }

    // 6. Liveliness: requested kind <= offered kind on the lattice, and
    //    reader lease >= writer lease.
    if !writer_qos.liveliness.is_compatible_with(&reader_qos.liveliness) {
        log::debug!(
            "[EDP-MATCH] Liveliness mismatch (writer={:?}, reader={:?})",
            writer_qos.liveliness,
            reader_qos.liveliness
        );
        return false;
    }

    // 7. Partition: non-empty intersection, empty set meaning "".
    if !writer_qos.partition.intersects(&reader_qos.partition) {
        log::debug!(
            "[EDP-MATCH] Partition mismatch (writer={:?}, reader={:?})",
            writer_qos.partition,
            reader_qos.partition
        );
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Guid;
    use crate::dds::qos::{
        Deadline, Durability, History, Liveliness, Ownership, Partition, Reliability,
    };
    use std::time::Duration;

    fn writer() -> WriterProxyData {
        WriterProxyData::new(Guid::new([1; 12], [0, 0, 0x10, 0x02]), "T", "t")
    }

    fn reader() -> ReaderProxyData {
        ReaderProxyData::new(Guid::new([2; 12], [0, 0, 0x10, 0x07]), "T", "t")
    }

    #[test]
    fn test_same_topic_and_defaults_compatible() {
        assert!(is_compatible(&writer(), &reader()));
    }

    #[test]
    fn test_topic_name_mismatch() {
        let mut r = reader();
        r.topic_name = "Other".into();
        assert!(!is_compatible(&writer(), &r));
    }

    #[test]
    fn test_type_name_mismatch() {
        let mut r = reader();
        r.type_name = "other_t".into();
        assert!(!is_compatible(&writer(), &r));
    }

    #[test]
    fn test_reliability_best_effort_writer_reliable_reader_incompatible() {
        let mut w = writer();
        w.qos.reliability = Reliability::BestEffort;
        let mut r = reader();
        r.qos.reliability = Reliability::Reliable;
        assert!(!is_compatible(&w, &r));
    }

    #[test]
    fn test_reliability_reliable_writer_any_reader_compatible() {
        let mut w = writer();
        w.qos.reliability = Reliability::Reliable;
        let mut r = reader();
        r.qos.reliability = Reliability::BestEffort;
        assert!(is_compatible(&w, &r));
        r.qos.reliability = Reliability::Reliable;
        assert!(is_compatible(&w, &r));
    }

    #[test]
    fn test_durability_lattice() {
        let mut w = writer();
        let mut r = reader();
        w.qos.durability = Durability::TransientLocal;
        r.qos.durability = Durability::Volatile;
        assert!(is_compatible(&w, &r)); // Offered above requested

        w.qos.durability = Durability::Volatile;
        r.qos.durability = Durability::Persistent;
        assert!(!is_compatible(&w, &r)); // Requested above offered
    }

    #[test]
    fn test_history_depth() {
        let mut w = writer();
        let mut r = reader();
        w.qos.history = History::KeepLast(10);
        r.qos.history = History::KeepLast(5);
        assert!(is_compatible(&w, &r));

        r.qos.history = History::KeepLast(20);
        assert!(!is_compatible(&w, &r));

        w.qos.history = History::KeepAll;
        assert!(is_compatible(&w, &r));

        w.qos.history = History::KeepLast(100);
        r.qos.history = History::KeepAll;
        assert!(!is_compatible(&w, &r));
    }

    #[test]
    fn test_deadline_periods() {
        let mut w = writer();
        let mut r = reader();
        w.qos.deadline = Deadline::from_millis(100);
        r.qos.deadline = Deadline::from_millis(200);
        assert!(is_compatible(&w, &r)); // Faster writer satisfies slower reader

        w.qos.deadline = Deadline::from_millis(500);
        assert!(!is_compatible(&w, &r));
    }

    #[test]
    fn test_ownership_exact_match() {
        let mut w = writer();
        let mut r = reader();
        w.qos.ownership = Ownership::Exclusive;
        r.qos.ownership = Ownership::Shared;
        assert!(!is_compatible(&w, &r));
        r.qos.ownership = Ownership::Exclusive;
        assert!(is_compatible(&w, &r));
    }

    #[test]
    fn test_liveliness_kind_lattice() {
        let mut w = writer();
        let mut r = reader();
        // S4 scenario: AUTOMATIC writer, MANUAL_BY_TOPIC reader -> no match.
        w.qos.liveliness = Liveliness::automatic(Duration::from_secs(5));
        r.qos.liveliness = Liveliness::manual_by_topic(Duration::from_secs(5));
        assert!(!is_compatible(&w, &r));

        // Reader reconfigured to AUTOMATIC -> match.
        r.qos.liveliness = Liveliness::automatic(Duration::from_secs(5));
        assert!(is_compatible(&w, &r));
    }

    #[test]
    fn test_liveliness_lease_ordering() {
        let mut w = writer();
        let mut r = reader();
        w.qos.liveliness = Liveliness::automatic(Duration::from_secs(10));
        r.qos.liveliness = Liveliness::automatic(Duration::from_secs(5));
        assert!(!is_compatible(&w, &r)); // Reader lease below writer lease
    }

    #[test]
    fn test_partition_rules() {
        let mut w = writer();
        let mut r = reader();
        w.qos.partition = Partition::single("cell_a");
        r.qos.partition = Partition::default();
        assert!(!is_compatible(&w, &r));

        r.qos.partition = Partition::new(vec!["cell_a".into(), "cell_b".into()]);
        assert!(is_compatible(&w, &r));
    }
}
