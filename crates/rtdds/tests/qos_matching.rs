// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RxO matching across the wire: incompatible QoS stays unmatched, and a
//! reconfigured endpoint matches purely from cached EDP state.

use rtdds::config::{metatraffic_unicast_port, RtpsConfig};
use rtdds::core::types::Locator;
use rtdds::dds::qos::{Durability, EndpointQos, Liveliness, Reliability};
use rtdds::{MemTransport, Participant};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

fn fast_config(participant_id: u8, peer_ids: &[u8]) -> RtpsConfig {
    RtpsConfig {
        participant_id,
        initial_peers: peer_ids
            .iter()
            .map(|id| {
                Locator::udpv4(Ipv4Addr::LOCALHOST, metatraffic_unicast_port(0, *id))
            })
            .collect(),
        announcement_period: Duration::from_millis(150),
        lease_duration: Duration::from_secs(5),
        initial_announcement_count: 5,
        initial_announcement_period: Duration::from_millis(50),
        ..RtpsConfig::default()
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_liveliness_kind_mismatch_then_reconfigure() {
    // S4: AUTOMATIC writer vs MANUAL_BY_TOPIC reader violates the kind
    // lattice; after the reader is recreated as AUTOMATIC the match appears
    // from cached EDP state, with no new participant discovery involved.
    let hub = MemTransport::hub();
    let a = Participant::with_guid_prefix(fast_config(0, &[1]), hub.attach(), [0x41; 12])
        .expect("participant A");
    let b = Participant::with_guid_prefix(fast_config(1, &[0]), hub.attach(), [0x42; 12])
        .expect("participant B");

    let writer = a
        .create_writer(
            "T",
            "t",
            EndpointQos {
                liveliness: Liveliness::automatic(Duration::from_secs(5)),
                ..EndpointQos::default()
            },
        )
        .expect("writer");
    let bad_reader = b
        .create_reader(
            "T",
            "t",
            EndpointQos {
                liveliness: Liveliness::manual_by_topic(Duration::from_secs(5)),
                ..EndpointQos::default()
            },
        )
        .expect("reader");

    assert!(wait_until(Duration::from_secs(1), || b
        .knows_participant(&[0x41; 12])));
    std::thread::sleep(Duration::from_millis(600));
    assert!(!a.is_matched(&writer, &bad_reader), "kind lattice violated");
    assert!(!b.is_matched(&writer, &bad_reader));

    b.delete_reader(&bad_reader).expect("delete reader");
    let good_reader = b
        .create_reader(
            "T",
            "t",
            EndpointQos {
                liveliness: Liveliness::automatic(Duration::from_secs(5)),
                ..EndpointQos::default()
            },
        )
        .expect("reconfigured reader");

    assert!(
        wait_until(Duration::from_secs(2), || {
            a.is_matched(&writer, &good_reader) && b.is_matched(&writer, &good_reader)
        }),
        "reconfigured reader did not match"
    );

    a.shutdown();
    b.shutdown();
}

#[test]
fn test_reliability_and_durability_rxo() {
    let hub = MemTransport::hub();
    let a = Participant::with_guid_prefix(fast_config(2, &[3]), hub.attach(), [0x43; 12])
        .expect("participant A");
    let b = Participant::with_guid_prefix(fast_config(3, &[2]), hub.attach(), [0x44; 12])
        .expect("participant B");

    // BEST_EFFORT writer cannot serve a RELIABLE reader.
    let weak_writer = a
        .create_writer(
            "telemetry",
            "t",
            EndpointQos {
                reliability: Reliability::BestEffort,
                ..EndpointQos::default()
            },
        )
        .expect("writer");
    let demanding_reader = b
        .create_reader(
            "telemetry",
            "t",
            EndpointQos {
                reliability: Reliability::Reliable,
                durability: Durability::TransientLocal,
                ..EndpointQos::default()
            },
        )
        .expect("reader");

    assert!(wait_until(Duration::from_secs(1), || b
        .knows_participant(&[0x43; 12])));
    std::thread::sleep(Duration::from_millis(500));
    assert!(!b.is_matched(&weak_writer, &demanding_reader));

    // An offering writer satisfies both requests.
    let strong_writer = a
        .create_writer(
            "telemetry",
            "t",
            EndpointQos {
                reliability: Reliability::Reliable,
                durability: Durability::TransientLocal,
                ..EndpointQos::default()
            },
        )
        .expect("strong writer");
    assert!(
        wait_until(Duration::from_secs(2), || b
            .is_matched(&strong_writer, &demanding_reader)),
        "compatible writer did not match"
    );
    assert!(!b.is_matched(&weak_writer, &demanding_reader));

    a.shutdown();
    b.shutdown();
}

#[test]
fn test_writer_disposal_unmatches_remotely() {
    let hub = MemTransport::hub();
    let a = Participant::with_guid_prefix(fast_config(4, &[5]), hub.attach(), [0x45; 12])
        .expect("participant A");
    let b = Participant::with_guid_prefix(fast_config(5, &[4]), hub.attach(), [0x46; 12])
        .expect("participant B");

    let writer = a
        .create_writer("T", "t", EndpointQos::default())
        .expect("writer");
    let reader = b
        .create_reader("T", "t", EndpointQos::default())
        .expect("reader");
    assert!(wait_until(Duration::from_secs(2), || b
        .is_matched(&writer, &reader)));

    a.delete_writer(&writer).expect("delete writer");
    assert!(
        wait_until(Duration::from_secs(2), || !b.is_matched(&writer, &reader)),
        "disposed writer stayed matched at B"
    );

    a.shutdown();
    b.shutdown();
}
