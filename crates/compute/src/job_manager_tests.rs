// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bare_metal::{start_bare_metal, BareMetalConfig};
use std::time::Duration;
use whirr_core::Platform;
use whirr_kernel::Physics;

const PLATFORM: &str = r#"
[[hosts]]
name = "node1"
cores = 10
core_speed = 1e9
memory = 1_000_000
"#;

fn ctx() -> SimCtx {
    let ctx = SimCtx::new(Platform::from_toml(PLATFORM).unwrap(), Physics::default());
    ctx.clock().start();
    ctx
}

#[tokio::test(start_paused = true)]
async fn completion_notice_becomes_a_typed_event() {
    let ctx = ctx();
    let mut events = ctx.open_mailbox::<ExecutionEvent>("controller").unwrap();
    let jm = JobManager::start(&ctx, "node1", "controller").unwrap();
    let cs = start_bare_metal(&ctx, "bm", "node1", BareMetalConfig::whole_hosts(&["node1"]))
        .unwrap();

    let job = jm.create_compound_job("j1");
    job.add_sleep_action("nap", Duration::from_secs(3)).unwrap();
    assert_eq!(jm.tracked_jobs(), 1);

    jm.submit_job(&job, &cs, &HashMap::new()).await.unwrap();
    assert!(job.is_submitted());

    match events.recv().await.unwrap() {
        ExecutionEvent::CompoundJobCompleted { job_name, .. } => assert_eq!(job_name, "j1"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(jm.tracked_jobs(), 0, "done jobs are dropped");
}

#[tokio::test(start_paused = true)]
async fn resubmitting_a_job_is_invalid() {
    let ctx = ctx();
    let mut events = ctx.open_mailbox::<ExecutionEvent>("controller").unwrap();
    let jm = JobManager::start(&ctx, "node1", "controller").unwrap();
    let cs = start_bare_metal(&ctx, "bm", "node1", BareMetalConfig::whole_hosts(&["node1"]))
        .unwrap();

    let job = jm.create_compound_job("once");
    job.add_sleep_action("nap", Duration::from_secs(1)).unwrap();
    jm.submit_job(&job, &cs, &HashMap::new()).await.unwrap();

    let err = jm.submit_job(&job, &cs, &HashMap::new()).await.unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));

    // Adding actions after submission is equally invalid.
    let err = job
        .add_sleep_action("late", Duration::from_secs(1))
        .unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));

    let _ = events.recv().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn rejected_submission_rolls_back_the_submitted_flag() {
    let ctx = ctx();
    let _events = ctx.open_mailbox::<ExecutionEvent>("controller").unwrap();
    let jm = JobManager::start(&ctx, "node1", "controller").unwrap();
    let cs = start_bare_metal(&ctx, "bm", "node1", BareMetalConfig::whole_hosts(&["node1"]))
        .unwrap();

    let job = jm.create_compound_job("fat");
    job.add_compute_action("big", 1e9, 64, 0).unwrap();

    let err = jm.submit_job(&job, &cs, &HashMap::new()).await.unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));
    assert!(!job.is_submitted(), "rollback keeps the job editable");

    // Shrink the demand and resubmit successfully.
    let job2 = jm.create_compound_job("fits");
    job2.add_compute_action("ok", 1e9, 4, 0).unwrap();
    jm.submit_job(&job2, &cs, &HashMap::new()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failure_notice_carries_action_and_cause() {
    let ctx = ctx();
    let mut events = ctx.open_mailbox::<ExecutionEvent>("controller").unwrap();
    let jm = JobManager::start(&ctx, "node1", "controller").unwrap();
    let cs = start_bare_metal(&ctx, "bm", "node1", BareMetalConfig::whole_hosts(&["node1"]))
        .unwrap();

    let job = jm.create_compound_job("doomed");
    job.add_file_read_action(
        "read",
        whirr_core::FileLocation::new(whirr_core::ServiceId(404), "/x", "f"),
    )
    .unwrap();
    jm.submit_job(&job, &cs, &HashMap::new()).await.unwrap();

    match events.recv().await.unwrap() {
        ExecutionEvent::CompoundJobFailed {
            job_name,
            action,
            cause,
            ..
        } => {
            assert_eq!(job_name, "doomed");
            assert_eq!(action.as_deref(), Some("read"));
            assert!(matches!(cause, FailureCause::ServiceIsDown { .. }));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
