// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::SimClock;
use crate::physics::{LinearNetwork, NetworkModel};
use whirr_core::SimTime;

fn registry() -> MailboxRegistry {
    MailboxRegistry::new(Physics::new(Arc::new(LinearNetwork {
        latency: Duration::from_millis(1),
        bandwidth: 1000,
    })))
}

#[tokio::test(start_paused = true)]
async fn post_debits_the_wire_for_payload_bytes() {
    let clock = SimClock::new();
    clock.start();
    let registry = registry();
    let mut mb = registry.open::<u64>("target").unwrap();

    registry.post("target", 7u64, 2000).await.unwrap();
    // 1ms latency + 2000 bytes at 1000 B/s.
    assert_eq!(
        clock.now(),
        SimTime::from_duration(Duration::from_millis(1) + Duration::from_secs(2))
    );
    assert_eq!(mb.recv().await.unwrap(), 7);
}

#[tokio::test(start_paused = true)]
async fn messages_from_one_sender_are_fifo() {
    let registry = registry();
    let mut mb = registry.open::<u32>("fifo").unwrap();

    for i in 0..4u32 {
        registry.post("fifo", i, CONTROL).await.unwrap();
    }
    for expected in 0..4u32 {
        assert_eq!(mb.recv().await.unwrap(), expected);
    }
}

#[tokio::test(start_paused = true)]
async fn post_to_unknown_mailbox_is_service_is_down() {
    let registry = registry();
    let err = registry.post("nobody", 1u8, CONTROL).await.unwrap_err();
    assert!(matches!(err, FailureCause::ServiceIsDown { .. }));
}

#[tokio::test(start_paused = true)]
async fn retired_mailbox_rejects_posts() {
    let registry = registry();
    let mb = registry.open::<u8>("gone").unwrap();
    assert!(registry.is_open("gone"));
    drop(mb);
    assert!(!registry.is_open("gone"));

    let err = registry.post("gone", 1u8, CONTROL).await.unwrap_err();
    assert!(matches!(err, FailureCause::ServiceIsDown { .. }));
}

#[tokio::test(start_paused = true)]
async fn duplicate_open_is_internal_error() {
    let registry = registry();
    let _mb = registry.open::<u8>("dup").unwrap();
    let err = registry.open::<u8>("dup").unwrap_err();
    assert!(matches!(err, FailureCause::InternalError { .. }));
}

#[tokio::test(start_paused = true)]
async fn type_mismatch_is_internal_error() {
    let registry = registry();
    let _mb = registry.open::<u8>("typed").unwrap();
    let err = registry.post("typed", "wrong", CONTROL).await.unwrap_err();
    assert!(matches!(err, FailureCause::InternalError { .. }));
}

#[tokio::test(start_paused = true)]
async fn recv_timeout_returns_none_on_expiry() {
    let clock = SimClock::new();
    clock.start();
    let registry = registry();
    let mut mb = registry.open::<u8>("idle").unwrap();

    let got = mb.recv_timeout(Duration::from_secs(3)).await.unwrap();
    assert!(got.is_none());
    assert_eq!(clock.now(), SimTime::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn broken_link_surfaces_network_error() {
    struct BrokenLink;
    impl NetworkModel for BrokenLink {
        fn transfer_time(&self, _bytes: u64) -> Result<Duration, FailureCause> {
            Err(FailureCause::network_error("link down"))
        }
    }

    let registry = MailboxRegistry::new(Physics::new(Arc::new(BrokenLink)));
    let _mb = registry.open::<u8>("remote").unwrap();
    let err = registry.post("remote", 1u8, 100).await.unwrap_err();
    assert!(matches!(err, FailureCause::NetworkError { .. }));
}

#[test]
fn answer_mailbox_names_are_unique() {
    let a = answer_mailbox_name("read");
    let b = answer_mailbox_name("read");
    assert!(a.starts_with("answer-read-"));
    assert_ne!(a, b);
}
