//! Universal properties: time monotonicity, cache-byte conservation, core
//! accounting, DAG soundness, and the event envelope.

use crate::prelude::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use whirr_compute::{BareMetalConfig, CompoundJob, JobManager};
use whirr_core::{ExecutionEvent, FailureCause, Platform, SimTime};
use whirr_kernel::{Physics, SimCtx};
use whirr_sim::{ControllerContext, ExecutionController, Simulation};
use whirr_storage::{start_memory_manager, MemoryManager, MemoryManagerConfig};

#[test]
fn events_on_one_mailbox_carry_monotone_time() {
    let sim = sim(ONE_HOST);
    let bm = sim
        .add_bare_metal("bm", "node1", BareMetalConfig::whole_hosts(&["node1"]))
        .unwrap();
    let ctx = sim.context().clone();

    sim.run_until(async move {
        let mut events = ctx
            .open_mailbox::<ExecutionEvent>("events-probe")
            .unwrap();
        let jm = JobManager::start(&ctx, "node1", "events-probe").unwrap();

        for i in 0..5 {
            let job = CompoundJob::new(format!("j{i}"));
            job.add_sleep_action("nap", Duration::from_secs(i + 1)).unwrap();
            jm.submit_job(&job, &bm, &no_overrides()).await.unwrap();
        }

        let mut last = SimTime::ZERO;
        for _ in 0..5 {
            let event = events.recv().await.unwrap();
            assert!(
                event.at() >= last,
                "event time regressed: {} < {last}",
                event.at()
            );
            last = event.at();
        }
    });
}

#[tokio::test(start_paused = true)]
async fn page_cache_bytes_are_conserved_through_every_operation() {
    let platform = Platform::from_toml(ONE_HOST).unwrap();
    let ctx = SimCtx::new(platform, Physics::default());
    ctx.clock().start();

    let id = start_memory_manager(
        &ctx,
        "node1",
        MemoryManagerConfig {
            capacity: Some(1_000),
            flush_mountpoint: "/data".to_string(),
            ..MemoryManagerConfig::default()
        },
    )
    .unwrap();
    let state = ctx.service_state::<Mutex<MemoryManager>>(id).unwrap();

    let check = |m: &MemoryManager| {
        assert_eq!(
            m.free() + m.cached(),
            m.capacity(),
            "conservation violated: free={} cached={}",
            m.free(),
            m.cached()
        );
    };

    {
        let mut m = state.lock();
        m.read_to_cache("a", 300, ctx.now());
        check(&m);
        m.write_to_cache("b", 400, ctx.now());
        check(&m);
        m.flush(150);
        check(&m);
        m.read_from_cache("a", ctx.now());
        check(&m);
        m.evict(200);
        check(&m);
        m.make_room(800);
        check(&m);
        m.flush_expired(ctx.now() + Duration::from_secs(3600));
        check(&m);
    }
}

#[test]
fn started_actions_never_exceed_host_cores() {
    let sim = sim(ONE_HOST);
    let bm = sim
        .add_bare_metal("bm", "node1", BareMetalConfig::whole_hosts(&["node1"]))
        .unwrap();
    let ctx = sim.context().clone();

    sim.run_until(async move {
        let mut events = ctx
            .open_mailbox::<ExecutionEvent>("events-probe")
            .unwrap();
        let jm = JobManager::start(&ctx, "node1", "events-probe").unwrap();

        // 5 × 4-core computes: at most two run at once on 10 cores.
        let job = CompoundJob::new("packed");
        for i in 0..5 {
            job.add_compute_action(&format!("c{i}"), 8e9, 4, 0).unwrap();
        }
        jm.submit_job(&job, &bm, &no_overrides()).await.unwrap();

        for _ in 0..12 {
            ctx.clock().sleep(Duration::from_secs(2)).await;
            assert!(bm.used_cores("node1") <= 10);
        }
        let _ = events.recv().await.unwrap();
        assert_eq!(bm.used_cores("node1"), 0);
    });
}

#[test]
fn an_action_starts_only_after_all_parents_completed() {
    let sim = sim(ONE_HOST);
    let bm = sim
        .add_bare_metal("bm", "node1", BareMetalConfig::whole_hosts(&["node1"]))
        .unwrap();
    let ctx = sim.context().clone();

    sim.run_until(async move {
        let mut events = ctx
            .open_mailbox::<ExecutionEvent>("events-probe")
            .unwrap();
        let jm = JobManager::start(&ctx, "node1", "events-probe").unwrap();

        // Diamond: a → (b, c) → d, with uneven branch lengths.
        let job = CompoundJob::new("diamond");
        job.add_sleep_action("a", Duration::from_secs(2)).unwrap();
        job.add_sleep_action("b", Duration::from_secs(7)).unwrap();
        job.add_sleep_action("c", Duration::from_secs(1)).unwrap();
        job.add_sleep_action("d", Duration::from_secs(1)).unwrap();
        job.add_dependency("a", "b").unwrap();
        job.add_dependency("a", "c").unwrap();
        job.add_dependency("b", "d").unwrap();
        job.add_dependency("c", "d").unwrap();
        jm.submit_job(&job, &bm, &no_overrides()).await.unwrap();
        let _ = events.recv().await.unwrap();

        let date = |name: &str, end: bool| {
            let action = job.action(name).unwrap();
            if end {
                action.end_date().unwrap()
            } else {
                action.start_date().unwrap()
            }
        };
        assert!(date("b", false) >= date("a", true));
        assert!(date("c", false) >= date("a", true));
        assert!(date("d", false) >= date("b", true));
        assert!(date("d", false) >= date("c", true));
        // Completed actions have ordered dates.
        for name in ["a", "b", "c", "d"] {
            assert!(date(name, true) >= date(name, false));
        }
    });
}

struct EnvelopeController {
    captured: Arc<Mutex<Option<String>>>,
    compute: whirr_core::ServiceId,
}

#[async_trait]
impl ExecutionController for EnvelopeController {
    async fn main(&mut self, ctx: &mut ControllerContext) -> Result<(), FailureCause> {
        let jm = ctx.create_job_manager()?;
        let job = jm.create_compound_job("enveloped");
        job.add_sleep_action("nap", Duration::from_secs(1))?;
        jm.submit_job(&job, &ctx.compute(self.compute), &HashMap::new())
            .await?;

        let event = ctx.wait_for_next_event().await?;
        let json = serde_json::to_string(&event)
            .map_err(|e| FailureCause::internal(e.to_string()))?;
        *self.captured.lock() = Some(json);
        Ok(())
    }
}

#[test]
fn the_event_envelope_is_kind_tag_plus_payload() {
    let mut sim = Simulation::new(Platform::from_toml(ONE_HOST).unwrap()).unwrap();
    let bm = sim
        .add_bare_metal("bm", "node1", BareMetalConfig::whole_hosts(&["node1"]))
        .unwrap();
    let captured = Arc::new(Mutex::new(None));
    sim.add_controller(
        "ctrl",
        "node1",
        EnvelopeController {
            captured: Arc::clone(&captured),
            compute: bm.id(),
        },
    )
    .unwrap();
    sim.launch().unwrap();

    let json = captured.lock().clone().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["type"], "job:completed");
    assert_eq!(value["job_name"], "enveloped");

    let back: ExecutionEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back.kind(), "job:completed");
}
