// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The demonstration workflow the binary runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use whirr_compute::BatchConfig;
use whirr_core::{FailureCause, Platform, ServiceId, MB};
use whirr_sim::{ControllerContext, ExecutionController, Simulation};
use whirr_storage::SimpleStorageConfig;

struct DemoController {
    storage: ServiceId,
    batch: ServiceId,
}

#[async_trait]
impl ExecutionController for DemoController {
    async fn main(&mut self, ctx: &mut ControllerContext) -> Result<(), FailureCause> {
        let storage = ctx.storage(self.storage);
        let batch = ctx.batch(self.batch);

        let input = ctx
            .sim()
            .file("input")
            .ok_or_else(|| FailureCause::file_not_found("input"))?;
        let output = ctx
            .sim()
            .file("output")
            .ok_or_else(|| FailureCause::file_not_found("output"))?;
        let input_loc = storage.create_file_here(&input)?;
        let output_loc = storage.location(input_loc.mountpoint(), "output");

        // stage-in → crunch → stage-out
        let jm = ctx.create_job_manager()?;
        let job = jm.create_compound_job("demo");
        job.add_file_read_action("stage_in", input_loc)?;
        job.add_compute_action("crunch", 60e9, 2, 0)?;
        job.add_file_write_action("stage_out", output.clone(), output_loc.clone())?;
        job.add_dependency("stage_in", "crunch")?;
        job.add_dependency("crunch", "stage_out")?;

        let mut args = HashMap::new();
        args.insert("-N".to_string(), "1".to_string());
        args.insert("-c".to_string(), "2".to_string());
        args.insert("-t".to_string(), "10".to_string());
        jm.submit_batch_job(&job, &batch, &args, &HashMap::new())
            .await?;
        println!("[{}] submitted job demo (-N 1 -c 2 -t 10)", ctx.now());

        let event = ctx.wait_for_next_event().await?;
        println!("[{}] {}", event.at(), event.log_summary());

        for name in ["stage_in", "crunch", "stage_out"] {
            if let Some(action) = job.action(name) {
                let start = action
                    .start_date()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let end = action
                    .end_date()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("  {name}: {start} .. {end}");
            }
        }
        if !storage.has_file(&output_loc) {
            return Err(FailureCause::internal("stage-out left no output file"));
        }

        ctx.sleep(Duration::from_secs(1)).await;
        println!("[{}] simulation idle, shutting down", ctx.now());
        Ok(())
    }
}

/// Build the services on the platform's hosts and run the workflow.
pub fn run_demo(platform: Platform) -> Result<(), FailureCause> {
    tracing::info!(hosts = platform.hosts.len(), "platform loaded");
    let storage_host = platform
        .hosts
        .iter()
        .find(|h| !h.disks.is_empty())
        .ok_or_else(|| FailureCause::invalid_argument("platform has no host with a disk"))?
        .clone();
    let mount = storage_host.disks[0].mountpoint.clone();
    let host_names: Vec<String> = platform.hosts.iter().map(|h| h.name.clone()).collect();

    let mut sim = Simulation::new(platform)?;
    sim.add_file("input", 16 * MB)?;
    sim.add_file("output", 4 * MB)?;

    let storage = sim.add_simple_storage(
        "storage",
        &storage_host.name,
        &[mount.as_str()],
        SimpleStorageConfig::default(),
    )?;
    let hosts: Vec<&str> = host_names.iter().map(String::as_str).collect();
    let batch = sim.add_batch_service("batch", &storage_host.name, &hosts, BatchConfig::default())?;

    sim.add_controller(
        "demo",
        &storage_host.name,
        DemoController {
            storage: storage.id(),
            batch: batch.id(),
        },
    )?;
    sim.launch()
}

#[cfg(test)]
#[path = "demo_tests.rs"]
mod tests;
