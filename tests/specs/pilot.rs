//! Pilot-job specs: the reservation window as a nested compute service.

use crate::prelude::*;
use std::time::Duration;
use whirr_compute::{BatchConfig, CompoundJob, ComputeServiceHandle, JobManager};
use whirr_core::{ExecutionEvent, FailureCause};

fn compute_job(name: &str, cores: u32, secs: u64) -> CompoundJob {
    let job = CompoundJob::new(name);
    job.add_compute_action("work", secs as f64 * 1e9 * cores as f64, cores, 0)
        .unwrap();
    job
}

#[test]
fn pilot_hosts_a_standard_job_then_expires() {
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

        // Pilot: 4 cores for 2 minutes.
        jm.submit_pilot("pilot1", &batch, &batch_args(1, 4, 2))
            .await
            .unwrap();

        let (nested, started_at) = match events.recv().await.unwrap() {
            ExecutionEvent::PilotJobStarted { pilot, service, at } => {
                assert_eq!(pilot, "pilot1");
                (ComputeServiceHandle::attach(ctx.clone(), service), at)
            }
            other => panic!("unexpected event: {}", other.log_summary()),
        };

        // Standard job (2 cores, 60 s) inside the window.
        let inner = compute_job("inner", 2, 60);
        jm.submit_job(&inner, &nested, &no_overrides()).await.unwrap();

        match events.recv().await.unwrap() {
            ExecutionEvent::CompoundJobCompleted { job_name, .. } => {
                assert_eq!(job_name, "inner")
            }
            other => panic!("unexpected event: {}", other.log_summary()),
        }

        match events.recv().await.unwrap() {
            ExecutionEvent::PilotJobExpired { pilot, at } => {
                assert_eq!(pilot, "pilot1");
                let window = at.since(started_at).as_secs_f64();
                assert!(
                    (window - 120.0).abs() < 1.0,
                    "expired at pilot start + window, got {window}s"
                );
            }
            other => panic!("unexpected event: {}", other.log_summary()),
        }

        // The nested service died with the window.
        let late = compute_job("late", 1, 1);
        let err = jm.submit_job(&late, &nested, &no_overrides()).await.unwrap_err();
        assert!(matches!(err, FailureCause::ServiceIsDown { .. }));
    });
}

#[test]
fn terminating_a_pilot_fails_enclosed_jobs_with_the_outer_service() {
    let sim = sim(ONE_HOST);
    let batch = sim
        .add_batch_service("outer-batch", "node1", &["node1"], BatchConfig::default())
        .unwrap();
    let ctx = sim.context().clone();

    sim.run_until(async move {
        let mut events = ctx
            .open_mailbox::<ExecutionEvent>("events-probe")
            .unwrap();
        let jm = JobManager::start(&ctx, "node1", "events-probe").unwrap();

        jm.submit_pilot("pilot1", &batch, &batch_args(1, 4, 60))
            .await
            .unwrap();
        let nested = match events.recv().await.unwrap() {
            ExecutionEvent::PilotJobStarted { service, .. } => {
                ComputeServiceHandle::attach(ctx.clone(), service)
            }
            other => panic!("unexpected event: {}", other.log_summary()),
        };

        let inner = compute_job("inner", 2, 100_000);
        jm.submit_job(&inner, &nested, &no_overrides()).await.unwrap();
        ctx.clock().sleep(Duration::from_secs(10)).await;

        batch.terminate_pilot("pilot1").await.unwrap();

        match events.recv().await.unwrap() {
            ExecutionEvent::CompoundJobFailed {
                job_name, cause, ..
            } => {
                assert_eq!(job_name, "inner");
                assert!(
                    matches!(
                        cause,
                        FailureCause::ServiceIsDown { ref service } if service == "outer-batch"
                    ),
                    "cause must point at the outer batch service, got {cause:?}"
                );
            }
            other => panic!("unexpected event: {}", other.log_summary()),
        }

        // Explicit terminate is not an expiry: exactly one event arrived.
        assert!(events
            .recv_timeout(Duration::from_secs(600))
            .await
            .unwrap()
            .is_none());
    });
}
