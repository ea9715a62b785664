// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::simulation::Simulation;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use whirr_compute::BareMetalConfig;
use whirr_core::{ExecutionEvent, Platform};
use whirr_storage::SimpleStorageConfig;

const PLATFORM: &str = r#"
[[hosts]]
name = "node1"
cores = 10
core_speed = 1e9
memory = 1_000_000_000

[[hosts.disks]]
name = "d0"
mountpoint = "/data"
capacity = 100_000_000
read_bandwidth = 10_000_000
write_bandwidth = 10_000_000

[[hosts]]
name = "node2"
cores = 4
core_speed = 1e9
memory = 1_000_000_000

[[hosts.disks]]
name = "d0"
mountpoint = "/data"
capacity = 100_000_000
read_bandwidth = 10_000_000
write_bandwidth = 10_000_000
"#;

fn platform() -> Platform {
    Platform::from_toml(PLATFORM).unwrap()
}

/// Uses the per-variant dispatch instead of raw event matching.
struct DispatchController {
    compute: whirr_core::ServiceId,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ExecutionController for DispatchController {
    async fn main(&mut self, ctx: &mut ControllerContext) -> Result<(), FailureCause> {
        let jm = ctx.create_job_manager()?;
        let good = jm.create_compound_job("good");
        good.add_sleep_action("nap", Duration::from_secs(1))?;
        jm.submit_job(&good, &ctx.compute(self.compute), &HashMap::new())
            .await?;
        self.process_next_event(ctx).await?;

        let bad = jm.create_compound_job("bad");
        bad.add_file_read_action(
            "read",
            whirr_core::FileLocation::new(whirr_core::ServiceId(404), "/x", "f"),
        )?;
        jm.submit_job(&bad, &ctx.compute(self.compute), &HashMap::new())
            .await?;
        self.process_next_event(ctx).await
    }

    async fn on_job_completed(
        &mut self,
        _ctx: &mut ControllerContext,
        event: ExecutionEvent,
    ) -> Result<(), FailureCause> {
        self.log.lock().push(format!("completed:{}", event.log_summary()));
        Ok(())
    }

    async fn on_job_failed(
        &mut self,
        _ctx: &mut ControllerContext,
        event: ExecutionEvent,
    ) -> Result<(), FailureCause> {
        self.log.lock().push(format!("failed:{}", event.log_summary()));
        Ok(())
    }
}

#[test]
fn events_dispatch_to_overridden_handlers() {
    let mut sim = Simulation::new(platform()).unwrap();
    let compute = sim
        .add_bare_metal("bm", "node1", BareMetalConfig::whole_hosts(&["node1"]))
        .unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    sim.add_controller(
        "ctrl",
        "node1",
        DispatchController {
            compute: compute.id(),
            log: Arc::clone(&log),
        },
    )
    .unwrap();
    sim.launch().unwrap();

    let log = log.lock();
    assert_eq!(log.len(), 2);
    assert!(log[0].starts_with("completed:job:completed good"));
    assert!(log[1].starts_with("failed:job:failed bad"));
}

struct TimerController {
    fired_at: Arc<Mutex<Option<f64>>>,
}

#[async_trait]
impl ExecutionController for TimerController {
    async fn main(&mut self, ctx: &mut ControllerContext) -> Result<(), FailureCause> {
        let _timer = ctx.set_timer(Duration::from_secs(30), "checkpoint");
        match ctx.wait_for_next_event().await? {
            ExecutionEvent::Timer { message, at } => {
                if message != "checkpoint" {
                    return Err(FailureCause::internal("wrong timer message"));
                }
                *self.fired_at.lock() = Some(at.as_secs_f64());
                Ok(())
            }
            other => Err(FailureCause::internal(format!(
                "unexpected event {}",
                other.log_summary()
            ))),
        }
    }
}

#[test]
fn timers_deliver_timer_events() {
    let mut sim = Simulation::new(platform()).unwrap();
    let fired_at = Arc::new(Mutex::new(None));
    sim.add_controller(
        "ctrl",
        "node1",
        TimerController {
            fired_at: Arc::clone(&fired_at),
        },
    )
    .unwrap();
    sim.launch().unwrap();

    let fired = fired_at.lock().unwrap();
    assert!((fired - 30.0).abs() < 0.001, "fired at {fired}s");
}

struct CopyController {
    src_storage: whirr_core::ServiceId,
    dst_storage: whirr_core::ServiceId,
    outcome: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl ExecutionController for CopyController {
    async fn main(&mut self, ctx: &mut ControllerContext) -> Result<(), FailureCause> {
        let src = ctx.storage(self.src_storage);
        let dst = ctx.storage(self.dst_storage);
        let file = ctx.sim().file("payload").ok_or_else(|| {
            FailureCause::file_not_found("payload")
        })?;
        let src_loc = src.create_file_here(&file)?;
        let dst_loc = dst.location("/data", "payload");

        ctx.initiate_file_copy(&file, src_loc, dst_loc.clone());
        match ctx.wait_for_next_event().await? {
            ExecutionEvent::FileCopyCompleted { file, .. } => {
                if !dst.has_file(&dst_loc) {
                    return Err(FailureCause::internal("copy event without the copy"));
                }
                *self.outcome.lock() = Some(file);
                Ok(())
            }
            other => Err(FailureCause::internal(format!(
                "unexpected event {}",
                other.log_summary()
            ))),
        }
    }
}

#[test]
fn asynchronous_copies_report_back_as_events() {
    let mut sim = Simulation::new(platform()).unwrap();
    let src = sim
        .add_simple_storage("src", "node1", &["/data"], SimpleStorageConfig::default())
        .unwrap();
    let dst = sim
        .add_simple_storage("dst", "node2", &["/data"], SimpleStorageConfig::default())
        .unwrap();
    sim.add_file("payload", 5_000_000).unwrap();

    let outcome = Arc::new(Mutex::new(None));
    sim.add_controller(
        "ctrl",
        "node1",
        CopyController {
            src_storage: src.id(),
            dst_storage: dst.id(),
            outcome: Arc::clone(&outcome),
        },
    )
    .unwrap();
    sim.launch().unwrap();
    assert_eq!(outcome.lock().as_deref(), Some("payload"));
}

struct TimeoutPeekController;

#[async_trait]
impl ExecutionController for TimeoutPeekController {
    async fn main(&mut self, ctx: &mut ControllerContext) -> Result<(), FailureCause> {
        let got = ctx
            .wait_for_next_event_timeout(Duration::from_secs(5))
            .await?;
        if got.is_some() {
            return Err(FailureCause::internal("event out of nowhere"));
        }
        Ok(())
    }
}

#[test]
fn event_wait_with_timeout_returns_none_when_idle() {
    let mut sim = Simulation::new(platform()).unwrap();
    sim.add_controller("ctrl", "node1", TimeoutPeekController)
        .unwrap();
    sim.launch().unwrap();
}
