// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer liveliness over the wire: assertion renewal, loss on a lapsed
//! lease, and recovery.

use rtdds::config::{metatraffic_unicast_port, RtpsConfig};
use rtdds::core::types::Locator;
use rtdds::dds::qos::{EndpointQos, Liveliness};
use rtdds::discovery::DiscoveryEvent;
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
fn test_automatic_liveliness_stays_alive() {
    // The shared AUTOMATIC timer keeps asserting without application help.
    let hub = MemTransport::hub();
    let a = Participant::with_guid_prefix(fast_config(0, &[1]), hub.attach(), [0x51; 12])
        .expect("participant A");
    let b = Participant::with_guid_prefix(fast_config(1, &[0]), hub.attach(), [0x52; 12])
        .expect("participant B");

    let liveliness = Liveliness::automatic(Duration::from_millis(600))
        .with_announcement_period(Duration::from_millis(150));
    let qos = EndpointQos {
        liveliness,
        ..EndpointQos::default()
    };
    let writer = a.create_writer("T", "t", qos.clone()).expect("writer");
    let reader = b.create_reader("T", "t", qos).expect("reader");

    assert!(wait_until(Duration::from_secs(2), || b
        .is_matched(&writer, &reader)));
    assert!(
        wait_until(Duration::from_secs(2), || {
            b.liveliness_changed_status(&reader).alive_count == 1
        }),
        "automatic assertion never arrived"
    );

    // Several leases later the writer is still alive: the timer renews it.
    std::thread::sleep(Duration::from_millis(1800));
    let status = b.liveliness_changed_status(&reader);
    assert_eq!(status.alive_count, 1);
    assert_eq!(status.not_alive_count, 0);
    // Publisher side never lost it either.
    assert_eq!(a.liveliness_lost_status(&writer).total_count, 0);

    a.shutdown();
    b.shutdown();
}

#[test]
fn test_manual_liveliness_loss_and_recovery() {
    // S5 shape: the application stops asserting a MANUAL_BY_PARTICIPANT
    // writer; the matched reader sees exactly one not-alive transition
    // within one lease plus one scan tick, and the writer itself reports
    // liveliness_lost. A later assert recovers both.
    let hub = MemTransport::hub();
    let a = Participant::with_guid_prefix(fast_config(2, &[3]), hub.attach(), [0x53; 12])
        .expect("participant A");
    let b = Participant::with_guid_prefix(fast_config(3, &[2]), hub.attach(), [0x54; 12])
        .expect("participant B");

    let liveliness = Liveliness::manual_by_participant(Duration::from_millis(600))
        .with_announcement_period(Duration::from_millis(200));
    let qos = EndpointQos {
        liveliness,
        ..EndpointQos::default()
    };
    let writer = a.create_writer("T", "t", qos.clone()).expect("writer");
    let reader = b.create_reader("T", "t", qos).expect("reader");

    assert!(wait_until(Duration::from_secs(2), || b
        .is_matched(&writer, &reader)));

    // Assert a few times; the reader sees the writer alive.
    for _ in 0..3 {
        assert!(a.assert_liveliness_manual_by_participant());
        std::thread::sleep(Duration::from_millis(150));
    }
    assert!(
        wait_until(Duration::from_secs(1), || {
            b.liveliness_changed_status(&reader).alive_count == 1
        }),
        "manual assertion never arrived"
    );

    let events = b.events();
    let _: Vec<_> = events.try_iter().collect();
    let last_assert = Instant::now();

    // Stop asserting: the lease (600ms) lapses, loss is observed within
    // one liveliness scan tick after it.
    assert!(
        wait_until(Duration::from_millis(1500), || {
            b.liveliness_changed_status(&reader).not_alive_count == 1
        }),
        "liveliness loss never reached the reader"
    );
    let elapsed = last_assert.elapsed();
    assert!(
        elapsed >= Duration::from_millis(450),
        "loss observed before the lease could lapse ({:?})",
        elapsed
    );

    let not_alive_events: Vec<_> = events
        .try_iter()
        .filter(|e| {
            matches!(
                e,
                DiscoveryEvent::LivelinessChanged { status, .. }
                    if status.not_alive_count_change == 1
            )
        })
        .collect();
    assert_eq!(not_alive_events.len(), 1, "exactly one loss notification");

    let status = b.liveliness_changed_status(&reader);
    assert_eq!(status.alive_count, 0);
    assert_eq!(status.not_alive_count, 1);

    // The publisher side counted the loss too.
    assert!(
        wait_until(Duration::from_millis(500), || {
            a.liveliness_lost_status(&writer).total_count == 1
        }),
        "liveliness_lost never fired on A"
    );

    // Recovery: one explicit assert flips the reader's view back.
    assert!(a.assert_liveliness_manual_by_participant());
    assert!(
        wait_until(Duration::from_secs(1), || {
            let status = b.liveliness_changed_status(&reader);
            status.alive_count == 1 && status.not_alive_count == 0
        }),
        "recovery never reached the reader"
    );

    a.shutdown();
    b.shutdown();
}

#[test]
fn test_assert_without_manual_writers_is_a_noop() {
    let hub = MemTransport::hub();
    let a = Participant::with_guid_prefix(fast_config(4, &[]), hub.attach(), [0x55; 12])
        .expect("participant A");
    // No MANUAL_BY_PARTICIPANT writers registered.
    assert!(!a.assert_liveliness_manual_by_participant());

    let writer = a
        .create_writer(
            "T",
            "t",
            EndpointQos {
                liveliness: Liveliness::manual_by_participant(Duration::from_secs(2)),
                ..EndpointQos::default()
            },
        )
        .expect("writer");
    assert!(a.assert_liveliness_manual_by_participant());
    assert!(a.assert_liveliness(&writer));

    a.shutdown();
}
