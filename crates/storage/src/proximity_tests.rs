// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use whirr_core::Platform;
use whirr_kernel::{LinearNetwork, Physics};

const PLATFORM: &str = r#"
[[hosts]]
name = "h1"
cores = 1
core_speed = 1e9
memory = 1000

[[hosts]]
name = "h2"
cores = 1
core_speed = 1e9
memory = 1000

[[hosts]]
name = "h3"
cores = 1
core_speed = 1e9
memory = 1000
"#;

fn ctx() -> SimCtx {
    let ctx = SimCtx::new(
        Platform::from_toml(PLATFORM).unwrap(),
        Physics::new(Arc::new(LinearNetwork {
            latency: Duration::from_millis(5),
            bandwidth: 1_000_000,
        })),
    );
    ctx.clock().start();
    ctx
}

#[tokio::test(start_paused = true)]
async fn probes_fill_the_distance_table() {
    let ctx = ctx();
    let proximity = start_proximity_service(
        &ctx,
        "nps",
        "h1",
        ProximityConfig {
            hosts: vec!["h1".into(), "h2".into(), "h3".into()],
            period: Duration::from_secs(60),
        },
    )
    .unwrap();

    assert!(proximity.distance("h1", "h2").is_none(), "nothing measured yet");

    // Let the first probe round complete.
    ctx.clock().sleep(Duration::from_secs(1)).await;
    let rtt = proximity.distance("h1", "h2").unwrap();
    assert_eq!(rtt, Duration::from_millis(10), "two control hops at 5ms");
    assert!(proximity.distance("h2", "h3").is_some());
    assert!(proximity.distance("h3", "h1").is_some());
    assert!(proximity.last_measured("h1", "h2").is_some());
}

#[tokio::test(start_paused = true)]
async fn distance_is_symmetric() {
    let ctx = ctx();
    let proximity = start_proximity_service(
        &ctx,
        "nps",
        "h1",
        ProximityConfig {
            hosts: vec!["h1".into(), "h2".into()],
            period: Duration::from_secs(60),
        },
    )
    .unwrap();
    ctx.clock().sleep(Duration::from_secs(1)).await;

    assert_eq!(
        proximity.distance("h1", "h2"),
        proximity.distance("h2", "h1")
    );
}

#[tokio::test(start_paused = true)]
async fn fewer_than_two_hosts_is_invalid() {
    let ctx = ctx();
    let err = start_proximity_service(
        &ctx,
        "nps",
        "h1",
        ProximityConfig {
            hosts: vec!["h1".into()],
            period: Duration::from_secs(60),
        },
    )
    .unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));
}

#[tokio::test(start_paused = true)]
async fn unknown_probe_host_is_host_error() {
    let ctx = ctx();
    let err = start_proximity_service(
        &ctx,
        "nps",
        "h1",
        ProximityConfig {
            hosts: vec!["h1".into(), "nowhere".into()],
            period: Duration::from_secs(60),
        },
    )
    .unwrap_err();
    assert!(matches!(err, FailureCause::HostError { .. }));
}
