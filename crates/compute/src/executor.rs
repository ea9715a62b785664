// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Action executors.
//!
//! A compute service dispatches each action onto one of these one-shot
//! actors. The executor is a pure function of `(kind, payload, context)`:
//! it performs the work, then reports the result back to the service's
//! mailbox; all DAG bookkeeping stays in the service.

use crate::action::ActionKind;
use crate::job::CompoundJob;
use whirr_core::{FailureCause, JobId, ServiceId, SimTime};
use whirr_kernel::{ActorHandle, SimCtx};
use whirr_storage::StorageHandle;

/// Executor → compute-service completion report.
#[derive(Debug)]
pub struct ActionDone {
    pub job: JobId,
    pub action: String,
    pub result: Result<(), FailureCause>,
}

/// Compute-service → job-manager notifications.
#[derive(Debug, Clone)]
pub enum ServiceNotice {
    JobDone {
        job: JobId,
        job_name: String,
        service: ServiceId,
        /// `Some((failing_action, cause))` when the job did not complete.
        failed: Option<(Option<String>, FailureCause)>,
        at: SimTime,
    },
    PilotStarted {
        pilot: String,
        service: ServiceId,
        at: SimTime,
    },
    PilotExpired {
        pilot: String,
        at: SimTime,
    },
}

/// What a running action can see: the simulation, where it runs, and what
/// it was granted. Custom actions receive this in their callbacks and may
/// attach service handles through it to submit further work.
#[derive(Clone)]
pub struct ActionContext {
    pub sim: SimCtx,
    pub execution_host: String,
    pub physical_host: String,
    pub num_cores: u32,
    pub ram: u64,
}

impl ActionContext {
    /// Storage handle for any registered storage service.
    pub fn storage(&self, id: ServiceId) -> StorageHandle {
        StorageHandle::attach(self.sim.clone(), id)
    }
}

/// Spawn the executor for one dispatched action.
///
/// The service has already recorded the attempt frame; the executor only
/// performs the work and posts an [`ActionDone`] wrapped by `wrap` to the
/// service mailbox.
pub fn spawn_action_executor<M, F>(
    ctx: &SimCtx,
    service_mailbox: String,
    job: &CompoundJob,
    action_name: &str,
    action_ctx: ActionContext,
    wrap: F,
) -> ActorHandle
where
    M: Send + 'static,
    F: FnOnce(ActionDone) -> M + Send + 'static,
{
    let ctx = ctx.clone();
    let job_id = job.id();
    let kind = job
        .action(action_name)
        .map(|a| a.kind)
        .unwrap_or(ActionKind::Sleep {
            duration: std::time::Duration::ZERO,
        });
    let name = format!("executor-{}-{}", job_id.short(12), action_name);
    let action = action_name.to_string();
    let host = action_ctx.physical_host.clone();

    ActorHandle::spawn(name, host, async move {
        let result = execute_kind(&ctx, &kind, &action_ctx).await;
        if let Err(cause) = &result {
            tracing::debug!(
                job = %job_id,
                action = %action,
                cause = cause.tag(),
                "action failed"
            );
        }
        let done = ActionDone {
            job: job_id,
            action,
            result,
        };
        let _ = ctx.post_now(&service_mailbox, wrap(done));
    })
}

/// Perform one action's work.
pub async fn execute_kind(
    ctx: &SimCtx,
    kind: &ActionKind,
    action_ctx: &ActionContext,
) -> Result<(), FailureCause> {
    match kind {
        ActionKind::Compute { flops, .. } => {
            let host = ctx.platform().require_host(&action_ctx.execution_host)?;
            let wait =
                whirr_kernel::physics::compute_time(*flops, host.core_speed, action_ctx.num_cores);
            ctx.clock().sleep(wait).await;
            Ok(())
        }
        ActionKind::Sleep { duration } => {
            ctx.clock().sleep(*duration).await;
            Ok(())
        }
        ActionKind::FileRead {
            location,
            num_bytes,
        } => {
            let storage = StorageHandle::attach(ctx.clone(), location.service());
            match num_bytes {
                None => storage.read(location).await,
                Some(n) => storage.read_bytes(location, *n).await,
            }
        }
        ActionKind::FileWrite { file, location } => {
            let storage = StorageHandle::attach(ctx.clone(), location.service());
            storage.write(file, location).await
        }
        ActionKind::FileCopy { src, dst } => {
            let storage = StorageHandle::attach(ctx.clone(), dst.service());
            storage.copy(src, dst).await
        }
        ActionKind::Custom { custom } => custom.execute(action_ctx).await,
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
