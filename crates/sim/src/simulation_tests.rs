// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::controller::{ControllerContext, ExecutionController};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

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
"#;

fn platform() -> Platform {
    Platform::from_toml(PLATFORM).unwrap()
}

/// Submits one sleep job to a bare-metal service and records the events
/// it sees.
struct OneJobController {
    compute: ServiceId,
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ExecutionController for OneJobController {
    async fn main(&mut self, ctx: &mut ControllerContext) -> Result<(), FailureCause> {
        let jm = ctx.create_job_manager()?;
        let job = jm.create_compound_job("one");
        job.add_sleep_action("nap", Duration::from_secs(10))?;
        jm.submit_job(&job, &ctx.compute(self.compute), &HashMap::new())
            .await?;

        let event = ctx.wait_for_next_event().await?;
        self.seen.lock().push(event.log_summary());
        Ok(())
    }
}

#[test]
fn launch_runs_controllers_to_completion() {
    let mut sim = Simulation::new(platform()).unwrap();
    let compute = sim
        .add_bare_metal("bm", "node1", BareMetalConfig::whole_hosts(&["node1"]))
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    sim.add_controller(
        "ctrl",
        "node1",
        OneJobController {
            compute: compute.id(),
            seen: Arc::clone(&seen),
        },
    )
    .unwrap();

    sim.launch().unwrap();
    assert_eq!(seen.lock().as_slice(), ["job:completed one"]);
}

struct FailingController;

#[async_trait]
impl ExecutionController for FailingController {
    async fn main(&mut self, _ctx: &mut ControllerContext) -> Result<(), FailureCause> {
        Err(FailureCause::invalid_argument("bad experiment"))
    }
}

#[test]
fn controller_failure_surfaces_from_launch() {
    let mut sim = Simulation::new(platform()).unwrap();
    sim.add_controller("ctrl", "node1", FailingController).unwrap();
    let err = sim.launch().unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));
}

#[test]
fn controller_on_unknown_host_is_rejected() {
    let mut sim = Simulation::new(platform()).unwrap();
    let err = sim
        .add_controller("ctrl", "nowhere", FailingController)
        .unwrap_err();
    assert!(matches!(err, FailureCause::HostError { .. }));
}

#[test]
fn run_until_drives_services_directly() {
    let sim = Simulation::new(platform()).unwrap();
    let ss = sim
        .add_simple_storage("ss", "node1", &["/data"], SimpleStorageConfig::default())
        .unwrap();
    let file = sim.add_file("f", 1_000_000).unwrap();

    sim.run_until(async {
        let loc = ss.create_file_here(&file).unwrap();
        ss.read(&loc).await.unwrap();
    });
    assert!(sim.now() > SimTime::ZERO, "the read took virtual time");
}

#[test]
fn files_are_unique_per_simulation() {
    let sim = Simulation::new(platform()).unwrap();
    sim.add_file("f", 10).unwrap();
    let err = sim.add_file("f", 10).unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));
}

struct TwoPhaseController {
    order: Arc<Mutex<Vec<String>>>,
    tag: &'static str,
    naps: u64,
}

#[async_trait]
impl ExecutionController for TwoPhaseController {
    async fn main(&mut self, ctx: &mut ControllerContext) -> Result<(), FailureCause> {
        ctx.sleep(Duration::from_secs(self.naps)).await;
        self.order.lock().push(format!("{}@{}", self.tag, ctx.now()));
        Ok(())
    }
}

#[test]
fn controllers_interleave_on_virtual_time() {
    let mut sim = Simulation::new(platform()).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    sim.add_controller(
        "late",
        "node1",
        TwoPhaseController {
            order: Arc::clone(&order),
            tag: "late",
            naps: 20,
        },
    )
    .unwrap();
    sim.add_controller(
        "early",
        "node1",
        TwoPhaseController {
            order: Arc::clone(&order),
            tag: "early",
            naps: 5,
        },
    )
    .unwrap();

    sim.launch().unwrap();
    let order = order.lock();
    assert_eq!(
        order.as_slice(),
        ["early@5.000000s", "late@20.000000s"],
        "wakeups follow virtual time, not registration order"
    );
}
