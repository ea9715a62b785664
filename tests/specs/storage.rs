//! Storage specs: round trips, the proxy LRU scenario, and read
//! equivalence across uncached-read methods.

use crate::prelude::*;
use indexmap::IndexMap;
use std::time::Duration;
use whirr_core::{FailureCause, SimTime, MB};
use whirr_storage::{
    CachingBehavior, ProxyConfig, SimpleStorageConfig, StorageHandle, UncachedReadMethod,
};
use whirr_sim::Simulation;

fn proxy_rig(
    method: UncachedReadMethod,
) -> (Simulation, StorageHandle, StorageHandle, StorageHandle) {
    let sim = sim(EDGE_AND_ORIGIN);
    let cache = sim
        .add_simple_storage(
            "cache",
            "edge",
            &["/cache"],
            SimpleStorageConfig {
                caching: CachingBehavior::Lru,
                ..SimpleStorageConfig::default()
            },
        )
        .unwrap();
    let remote = sim
        .add_simple_storage("remote", "origin", &["/data"], SimpleStorageConfig::default())
        .unwrap();
    let mut remotes = IndexMap::new();
    remotes.insert("remote".to_string(), remote.id());
    let proxy = sim
        .add_proxy_storage(
            "proxy",
            "edge",
            ProxyConfig {
                cache: cache.id(),
                remotes,
                default_remote: Some(remote.id()),
                read_method: method,
            },
        )
        .unwrap();
    (sim, proxy, cache, remote)
}

#[test]
fn write_then_read_transfers_the_full_file_both_ways() {
    let sim = sim(ONE_HOST);
    let remote = sim
        .add_simple_storage("remote", "node1", &["/data"], SimpleStorageConfig::default())
        .unwrap();
    let file = sim.add_file("payload", 10 * MB).unwrap();
    let ctx = sim.context().clone();

    sim.run_until(async move {
        let loc = remote.location("/data", "payload");

        let t0 = ctx.now();
        remote.write(&file, &loc).await.unwrap();
        let write_span = ctx.now().since(t0);

        let t1 = ctx.now();
        remote.read(&loc).await.unwrap();
        let read_span = ctx.now().since(t1);

        // 10 MB over a 100 MB/s disk: each leg simulates the full size.
        assert!(write_span >= Duration::from_millis(100), "{write_span:?}");
        assert!(read_span >= Duration::from_millis(100), "{read_span:?}");
        assert!(remote.has_file(&loc));
    });
}

#[test]
fn proxy_lru_evicts_least_recently_read_of_three() {
    // 24 MB cache, three 12 MB files under CopyThenRead: the third read
    // evicts the least-recently-read of the first two.
    let (sim, proxy, cache, remote) = proxy_rig(UncachedReadMethod::CopyThenRead);
    let f1 = sim.add_file("f1", 12 * MB).unwrap();
    let f2 = sim.add_file("f2", 12 * MB).unwrap();
    let f3 = sim.add_file("f3", 12 * MB).unwrap();
    let ctx = sim.context().clone();

    sim.run_until(async move {
        for f in [&f1, &f2, &f3] {
            remote.create_file_here(f).unwrap();
        }

        for f in [&f1, &f2, &f3] {
            let loc = proxy.default_location(f).unwrap();
            proxy.read(&loc).await.unwrap();
            ctx.clock().sleep(Duration::from_secs(1)).await;
        }

        assert!(!cache.holds_file("f1"), "least-recently-read evicted");
        assert!(cache.holds_file("f2"));
        assert!(cache.holds_file("f3"));
    });
}

#[test]
fn proxy_reads_leave_the_file_cached_and_repeat_reads_are_not_slower() {
    for method in [
        UncachedReadMethod::CopyThenRead,
        UncachedReadMethod::MagicRead,
        UncachedReadMethod::ReadThrough,
    ] {
        let (sim, proxy, cache, remote) = proxy_rig(method);
        let file = sim.add_file("f", 12 * MB).unwrap();
        let ctx = sim.context().clone();

        sim.run_until(async move {
            remote.create_file_here(&file).unwrap();
            let loc = proxy.default_location(&file).unwrap();

            let t0 = ctx.now();
            proxy.read(&loc).await.unwrap();
            let first = ctx.now().since(t0);
            assert!(
                cache.holds_file("f"),
                "{method:?}: read must leave a cached copy"
            );

            let t1 = ctx.now();
            proxy.read(&loc).await.unwrap();
            let second = ctx.now().since(t1);
            assert!(
                second <= first,
                "{method:?}: warm read ({second:?}) slower than cold ({first:?})"
            );
        });
    }
}

#[test]
fn create_file_on_the_proxy_is_rejected() {
    let (sim, proxy, cache, remote) = proxy_rig(UncachedReadMethod::CopyThenRead);
    let file = sim.add_file("f", MB).unwrap();

    let err = proxy.create_file_here(&file).unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));

    // The caller must pick a side explicitly.
    cache
        .create_file(&file, &cache.location("/cache", "f"))
        .unwrap();
    remote
        .create_file(&file, &remote.location("/data", "f"))
        .unwrap();
}

#[test]
fn deleting_is_idempotent_and_survives_double_delete() {
    let sim = sim(ONE_HOST);
    let ss = sim
        .add_simple_storage("ss", "node1", &["/data"], SimpleStorageConfig::default())
        .unwrap();
    let file = sim.add_file("f", MB).unwrap();

    sim.run_until(async move {
        let loc = ss.create_file_here(&file).unwrap();
        ss.delete(&loc).await.unwrap();
        ss.delete(&loc).await.unwrap();
        assert!(!ss.has_file(&loc));
    });
}

#[test]
fn simulation_time_never_runs_backwards() {
    let (sim, proxy, _cache, remote) = proxy_rig(UncachedReadMethod::CopyThenRead);
    let file = sim.add_file("f", 12 * MB).unwrap();
    let ctx = sim.context().clone();

    sim.run_until(async move {
        remote.create_file_here(&file).unwrap();
        let loc = proxy.default_location(&file).unwrap();

        let mut last = SimTime::ZERO;
        for _ in 0..4 {
            proxy.read(&loc).await.unwrap();
            let now = ctx.now();
            assert!(now >= last, "time went backwards: {now} < {last}");
            last = now;
        }
    });
}
