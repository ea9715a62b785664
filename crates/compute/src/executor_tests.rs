// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::action::CustomAction;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use whirr_core::{DataFile, Platform, SimTime};
use whirr_kernel::Physics;
use whirr_storage::{start_simple_storage, SimpleStorageConfig};

const PLATFORM: &str = r#"
[[hosts]]
name = "host1"
cores = 8
core_speed = 1e9
memory = 1_000_000

[[hosts.disks]]
name = "d"
mountpoint = "/data"
capacity = 1_000_000
read_bandwidth = 1_000_000
write_bandwidth = 1_000_000
"#;

fn ctx() -> SimCtx {
    let ctx = SimCtx::new(Platform::from_toml(PLATFORM).unwrap(), Physics::default());
    ctx.clock().start();
    ctx
}

fn action_ctx(ctx: &SimCtx, cores: u32) -> ActionContext {
    ActionContext {
        sim: ctx.clone(),
        execution_host: "host1".into(),
        physical_host: "host1".into(),
        num_cores: cores,
        ram: 0,
    }
}

#[tokio::test(start_paused = true)]
async fn compute_time_divides_across_cores() {
    let ctx = ctx();
    execute_kind(
        &ctx,
        &ActionKind::Compute {
            flops: 4e9,
            cores: 4,
            ram: 0,
        },
        &action_ctx(&ctx, 4),
    )
    .await
    .unwrap();
    // 4 Gflop on 4 cores at 1 Gflop/s each.
    assert_eq!(ctx.now(), SimTime::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn sleep_actions_just_wait() {
    let ctx = ctx();
    execute_kind(
        &ctx,
        &ActionKind::Sleep {
            duration: Duration::from_secs(30),
        },
        &action_ctx(&ctx, 1),
    )
    .await
    .unwrap();
    assert_eq!(ctx.now(), SimTime::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn file_actions_round_trip_through_storage() {
    let ctx = ctx();
    let ss = start_simple_storage(&ctx, "ss", "host1", &["/data"], SimpleStorageConfig::default())
        .unwrap();
    let file = DataFile::new("f", 1000);
    let loc = ss.location("/data", "f");

    execute_kind(
        &ctx,
        &ActionKind::FileWrite {
            file: file.clone(),
            location: loc.clone(),
        },
        &action_ctx(&ctx, 1),
    )
    .await
    .unwrap();
    assert!(ss.has_file(&loc));

    execute_kind(
        &ctx,
        &ActionKind::FileRead {
            location: loc.clone(),
            num_bytes: None,
        },
        &action_ctx(&ctx, 1),
    )
    .await
    .unwrap();

    let copy_loc = ss.location("/data", "f2");
    execute_kind(
        &ctx,
        &ActionKind::FileCopy {
            src: loc,
            dst: copy_loc.clone(),
        },
        &action_ctx(&ctx, 1),
    )
    .await
    .unwrap();
    assert!(ss.has_file(&copy_loc));
}

#[tokio::test(start_paused = true)]
async fn custom_actions_run_under_the_context() {
    struct Probe;
    #[async_trait]
    impl CustomAction for Probe {
        async fn execute(&self, ctx: &ActionContext) -> Result<(), FailureCause> {
            ctx.sim.clock().sleep(Duration::from_secs(2)).await;
            if ctx.num_cores == 0 {
                return Err(FailureCause::internal("no cores granted"));
            }
            Ok(())
        }
    }

    let ctx = ctx();
    execute_kind(
        &ctx,
        &ActionKind::Custom {
            custom: Arc::new(Probe),
        },
        &action_ctx(&ctx, 2),
    )
    .await
    .unwrap();
    assert_eq!(ctx.now(), SimTime::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn executor_posts_the_wrapped_result() {
    let ctx = ctx();
    let mut mailbox = ctx.open_mailbox::<ActionDone>("service").unwrap();

    let job = crate::job::CompoundJob::new("j");
    job.add_sleep_action("nap", Duration::from_secs(5)).unwrap();

    spawn_action_executor(
        &ctx,
        "service".to_string(),
        &job,
        "nap",
        action_ctx(&ctx, 1),
        |done| done,
    );

    let done = mailbox.recv().await.unwrap();
    assert_eq!(done.action, "nap");
    assert!(done.result.is_ok());
    assert_eq!(ctx.now(), SimTime::from_secs(5));
}
