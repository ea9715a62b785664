// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job manager: a controller's agent for compound jobs.
//!
//! Owns the jobs a controller builds, forwards submissions to compute
//! services, and converts service notices into the typed events the
//! controller's event loop consumes.

use crate::bare_metal::ComputeServiceHandle;
use crate::batch::BatchServiceHandle;
use crate::executor::ServiceNotice;
use crate::job::CompoundJob;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use whirr_core::{ExecutionEvent, FailureCause, IdGen, JobId, UuidIdGen};
use whirr_kernel::{ActorHandle, Mailbox, ServiceEntry, SimCtx, CONTROL};

struct ManagerState {
    jobs: Mutex<HashMap<JobId, CompoundJob>>,
}

/// Per-controller job manager.
#[derive(Clone)]
pub struct JobManager {
    ctx: SimCtx,
    /// Where compute services send their notices.
    notice_mailbox: String,
    state: Arc<ManagerState>,
}

impl JobManager {
    /// Start a job manager forwarding events to `event_mailbox` (the
    /// controller's personal event mailbox).
    pub fn start(
        ctx: &SimCtx,
        host: &str,
        event_mailbox: &str,
    ) -> Result<JobManager, FailureCause> {
        ctx.platform().require_host(host)?;
        let name = format!("job-manager-{}", UuidIdGen.next());
        let notice_mailbox = format!("mb-{name}");
        let mut mailbox: Mailbox<ServiceNotice> = ctx.open_mailbox(notice_mailbox.clone())?;
        let state = Arc::new(ManagerState {
            jobs: Mutex::new(HashMap::new()),
        });
        let id = ctx.allocate_service_id();

        let daemon_ctx = ctx.clone();
        let events = event_mailbox.to_string();
        let daemon_state = Arc::clone(&state);
        let handle = ActorHandle::spawn(name.clone(), host.to_string(), async move {
            loop {
                let Ok(notice) = mailbox.recv().await else {
                    break;
                };
                let event = match notice {
                    ServiceNotice::JobDone {
                        job,
                        job_name,
                        service,
                        failed,
                        at,
                    } => {
                        daemon_state.jobs.lock().remove(&job);
                        match failed {
                            None => ExecutionEvent::CompoundJobCompleted {
                                job,
                                job_name,
                                compute_service: service,
                                at,
                            },
                            Some((action, cause)) => ExecutionEvent::CompoundJobFailed {
                                job,
                                job_name,
                                compute_service: service,
                                action,
                                cause,
                                at,
                            },
                        }
                    }
                    ServiceNotice::PilotStarted { pilot, service, at } => {
                        ExecutionEvent::PilotJobStarted { pilot, service, at }
                    }
                    ServiceNotice::PilotExpired { pilot, at } => {
                        ExecutionEvent::PilotJobExpired { pilot, at }
                    }
                };
                tracing::debug!(event = %event.log_summary(), "forwarding event");
                if daemon_ctx.post(&events, event, CONTROL).await.is_err() {
                    break;
                }
            }
        });

        ctx.register_service(ServiceEntry {
            id,
            name,
            kind: "job_manager",
            host: host.to_string(),
            mailbox: notice_mailbox.clone(),
            handle,
            state: Arc::clone(&state) as Arc<dyn std::any::Any + Send + Sync>,
        });

        Ok(JobManager {
            ctx: ctx.clone(),
            notice_mailbox,
            state,
        })
    }

    /// Build a new, empty compound job owned by this manager.
    pub fn create_compound_job(&self, name: &str) -> CompoundJob {
        let job = CompoundJob::new(name);
        self.state.jobs.lock().insert(job.id(), job.clone());
        job
    }

    pub fn tracked_jobs(&self) -> usize {
        self.state.jobs.lock().len()
    }

    /// Submit a job to a bare-metal compute service.
    ///
    /// Freezing happens here: a job already submitted (or modified after
    /// the fact) is rejected with `InvalidArgument` before anything
    /// reaches the service.
    pub async fn submit_job(
        &self,
        job: &CompoundJob,
        service: &ComputeServiceHandle,
        overrides: &HashMap<String, String>,
    ) -> Result<(), FailureCause> {
        job.mark_submitted()?;
        let submitted = service
            .submit_job(job, overrides, &self.notice_mailbox)
            .await;
        if submitted.is_err() {
            job.unmark_submitted();
        }
        submitted
    }

    /// Submit a job to a batch service with `-N/-c/-t` args.
    pub async fn submit_batch_job(
        &self,
        job: &CompoundJob,
        service: &BatchServiceHandle,
        args: &HashMap<String, String>,
        overrides: &HashMap<String, String>,
    ) -> Result<(), FailureCause> {
        job.mark_submitted()?;
        let submitted = service
            .submit_job(job, args, overrides, &self.notice_mailbox)
            .await;
        if submitted.is_err() {
            job.unmark_submitted();
        }
        submitted
    }

    /// Submit a pilot reservation to a batch service.
    pub async fn submit_pilot(
        &self,
        name: &str,
        service: &BatchServiceHandle,
        args: &HashMap<String, String>,
    ) -> Result<(), FailureCause> {
        service.submit_pilot(name, args, &self.notice_mailbox).await
    }
}

#[cfg(test)]
#[path = "job_manager_tests.rs"]
mod tests;
