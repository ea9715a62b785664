//! Batch scheduler specs: placement, validation, and the timeout law.

use crate::prelude::*;
use std::time::Duration;
use whirr_compute::{BatchConfig, CompoundJob, JobManager, PlacementPolicy};
use whirr_core::{ExecutionEvent, FailureCause};

fn compute_job(name: &str, cores: u32, secs: u64) -> CompoundJob {
    let job = CompoundJob::new(name);
    job.add_compute_action("work", secs as f64 * 1e9 * cores as f64, cores, 0)
        .unwrap();
    job
}

#[test]
fn best_fit_runs_8_and_1_while_9_waits() {
    let sim = sim(ONE_HOST);
    let batch = sim
        .add_batch_service(
            "batch",
            "node1",
            &["node1"],
            BatchConfig {
                policy: PlacementPolicy::BestFit,
            },
        )
        .unwrap();
    let ctx = sim.context().clone();

    sim.run_until(async move {
        let mut events = ctx
            .open_mailbox::<ExecutionEvent>("events-probe")
            .unwrap();
        let jm = JobManager::start(&ctx, "node1", "events-probe").unwrap();

        let job8 = compute_job("job8", 8, 30);
        let job9 = compute_job("job9", 9, 30);
        let job1 = compute_job("job1", 1, 30);
        for (job, cores) in [(&job8, 8), (&job9, 9), (&job1, 1)] {
            jm.submit_batch_job(job, &batch, &batch_args(1, cores, 60), &no_overrides())
                .await
                .unwrap();
        }

        // While 8 and 1 run concurrently, 9 is still queued.
        ctx.clock().sleep(Duration::from_secs(5)).await;
        assert!(job8.action("work").unwrap().start_date().is_some());
        assert!(job1.action("work").unwrap().start_date().is_some());
        assert!(job9.action("work").unwrap().start_date().is_none());

        // Exactly one completion event per job.
        let mut names = Vec::new();
        for _ in 0..3 {
            match events.recv().await.unwrap() {
                ExecutionEvent::CompoundJobCompleted { job_name, .. } => names.push(job_name),
                other => panic!("unexpected event: {}", other.log_summary()),
            }
        }
        names.sort();
        assert_eq!(names, ["job1", "job8", "job9"]);
        assert!(events
            .recv_timeout(Duration::from_secs(600))
            .await
            .unwrap()
            .is_none());
    });
}

#[test]
fn action_larger_than_any_host_is_rejected_synchronously() {
    let sim = sim(ONE_HOST);
    let bm = sim
        .add_bare_metal(
            "bm",
            "node1",
            whirr_compute::BareMetalConfig::whole_hosts(&["node1"]),
        )
        .unwrap();
    let ctx = sim.context().clone();

    sim.run_until(async move {
        let mut events = ctx
            .open_mailbox::<ExecutionEvent>("events-probe")
            .unwrap();
        let jm = JobManager::start(&ctx, "node1", "events-probe").unwrap();

        // 12 cores on a 10-core host.
        let job = compute_job("fat", 12, 1);
        let err = jm.submit_job(&job, &bm, &no_overrides()).await.unwrap_err();
        assert!(matches!(err, FailureCause::InvalidArgument { .. }));

        // Rejected synchronously: no event is ever generated.
        assert!(events
            .recv_timeout(Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());
    });
}

#[test]
fn empty_submission_args_are_invalid() {
    let sim = sim(ONE_HOST);
    let batch = sim
        .add_batch_service("batch", "node1", &["node1"], BatchConfig::default())
        .unwrap();
    let ctx = sim.context().clone();

    sim.run_until(async move {
        let jm = JobManager::start(&ctx, "node1", "events-none").unwrap();
        let job = compute_job("j", 1, 1);
        let err = jm
            .submit_batch_job(&job, &batch, &std::collections::HashMap::new(), &no_overrides())
            .await
            .unwrap_err();
        assert!(matches!(err, FailureCause::InvalidArgument { .. }));
        assert!(!job.is_submitted(), "rejected submission rolls back");
    });
}

#[test]
fn wall_clock_expiry_is_one_job_timeout_event() {
    let sim = sim(ONE_HOST);
    let batch = sim
        .add_batch_service("batch", "node1", &["node1"], BatchConfig::default())
        .unwrap();
    let ctx = sim.context().clone();

    sim.run_until(async move {
        let mut events = ctx
            .open_mailbox::<ExecutionEvent>("events-probe")
            .unwrap();
        let jm = JobManager::start(&ctx, "node1", "events-probe").unwrap();

        let submit_time = ctx.now();
        // 10000 seconds of work under a 2-minute wall clock.
        let job = compute_job("slow", 2, 10_000);
        jm.submit_batch_job(&job, &batch, &batch_args(1, 2, 2), &no_overrides())
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            ExecutionEvent::CompoundJobFailed {
                job_name, cause, at, ..
            } => {
                assert_eq!(job_name, "slow");
                assert!(matches!(cause, FailureCause::JobTimeout { .. }));
                let deadline = at.since(submit_time).as_secs_f64();
                assert!(
                    (deadline - 120.0).abs() < 1.0,
                    "failed at submit + wallclock, got {deadline}s"
                );
            }
            other => panic!("unexpected event: {}", other.log_summary()),
        }
        assert!(
            events
                .recv_timeout(Duration::from_secs(3600))
                .await
                .unwrap()
                .is_none(),
            "exactly one CompoundJobFailed per timeout"
        );
    });
}

#[test]
fn fcfs_head_of_line_blocks_later_jobs() {
    let sim = sim(ONE_HOST);
    let batch = sim
        .add_batch_service("batch", "node1", &["node1"], BatchConfig::default())
        .unwrap();
    let ctx = sim.context().clone();

    sim.run_until(async move {
        let _events = ctx
            .open_mailbox::<ExecutionEvent>("events-probe")
            .unwrap();
        let jm = JobManager::start(&ctx, "node1", "events-probe").unwrap();

        let job8 = compute_job("job8", 8, 100);
        let job9 = compute_job("job9", 9, 100);
        let job1 = compute_job("job1", 1, 100);
        for (job, cores) in [(&job8, 8), (&job9, 9), (&job1, 1)] {
            jm.submit_batch_job(job, &batch, &batch_args(1, cores, 60), &no_overrides())
                .await
                .unwrap();
        }
        ctx.clock().sleep(Duration::from_secs(10)).await;
        assert!(
            job1.action("work").unwrap().start_date().is_none(),
            "FCFS must not let job1 jump the blocked head"
        );
    });
}
