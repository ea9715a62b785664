// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The bare-metal compute service.
//!
//! Unqueued: every submitted job's ready actions run as soon as cores are
//! free, in submission order. Also the execution engine behind batch
//! reservations and pilots, which cap the usable cores per host.

use crate::executor::{spawn_action_executor, ActionContext, ActionDone, ServiceNotice};
use crate::job::{CompoundJob, JobState};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use whirr_core::{FailureCause, JobId, ServiceId};
use whirr_kernel::{answer_mailbox_name, ActorHandle, Mailbox, ServiceEntry, SimCtx, CONTROL};

/// Requests handled by a bare-metal service's mailbox.
#[derive(Debug)]
pub enum ComputeRequest {
    Submit {
        job: CompoundJob,
        /// Forced placement: action name → host name.
        overrides: HashMap<String, String>,
        /// Mailbox for the eventual [`ServiceNotice::JobDone`].
        notify: String,
        /// Mailbox for the synchronous `Result<(), FailureCause>` ack.
        answer: String,
    },
    Done(ActionDone),
    /// Fail every in-flight job with `cause` and wind down.
    Terminate {
        cause: FailureCause,
        answer: String,
    },
    Stop {
        answer: String,
    },
}

/// Which hosts the service schedules on, optionally capping cores per
/// host (the shape of a batch reservation or pilot).
#[derive(Debug, Clone, Default)]
pub struct BareMetalConfig {
    pub hosts: Vec<(String, Option<u32>)>,
}

impl BareMetalConfig {
    pub fn whole_hosts(hosts: &[&str]) -> Self {
        Self {
            hosts: hosts.iter().map(|h| (h.to_string(), None)).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct HostUsage {
    total_cores: u32,
    used_cores: u32,
    memory: u64,
    used_ram: u64,
}

/// Shared usage table, peekable for tests and the batch scheduler.
pub struct BareMetalState {
    usage: Mutex<IndexMap<String, HostUsage>>,
}

impl BareMetalState {
    pub fn free_cores(&self, host: &str) -> u32 {
        self.usage
            .lock()
            .get(host)
            .map(|u| u.total_cores - u.used_cores)
            .unwrap_or(0)
    }
}

struct RunningJob {
    job: CompoundJob,
    notify: String,
    overrides: HashMap<String, String>,
    executors: HashMap<String, ActorHandle>,
    allocations: HashMap<String, (String, u32, u64)>,
}

/// Client handle on a bare-metal compute service.
#[derive(Clone)]
pub struct ComputeServiceHandle {
    ctx: SimCtx,
    id: ServiceId,
}

impl ComputeServiceHandle {
    pub fn attach(ctx: SimCtx, id: ServiceId) -> Self {
        Self { ctx, id }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    pub fn name(&self) -> String {
        self.ctx.service_name(self.id)
    }

    pub fn is_up(&self) -> bool {
        self.ctx.is_service_up(self.id)
    }

    /// Cores currently allocated to started actions on a host.
    pub fn used_cores(&self, host: &str) -> u32 {
        self.ctx
            .service_state::<BareMetalState>(self.id)
            .map(|s| {
                s.usage
                    .lock()
                    .get(host)
                    .map(|u| u.used_cores)
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    fn entry(&self) -> Result<ServiceEntry, FailureCause> {
        let entry = self.ctx.require_service(self.id)?;
        if !entry.handle.is_up() {
            return Err(FailureCause::service_is_down(entry.name));
        }
        Ok(entry)
    }

    /// Submit a compound job. Fails synchronously with `InvalidArgument`
    /// when any action's demands cannot fit on any host.
    pub async fn submit_job(
        &self,
        job: &CompoundJob,
        overrides: &HashMap<String, String>,
        notify: &str,
    ) -> Result<(), FailureCause> {
        let entry = self.entry()?;
        let mut answer: Mailbox<Result<(), FailureCause>> =
            self.ctx.open_mailbox(answer_mailbox_name("submit"))?;
        self.ctx
            .post(
                &entry.mailbox,
                ComputeRequest::Submit {
                    job: job.clone(),
                    overrides: overrides.clone(),
                    notify: notify.to_string(),
                    answer: answer.name().to_string(),
                },
                CONTROL,
            )
            .await?;
        answer.recv().await?
    }

    /// Fail in-flight jobs with `cause` and stop the service.
    pub async fn terminate(&self, cause: FailureCause) -> Result<(), FailureCause> {
        let entry = self.entry()?;
        let mut answer: Mailbox<()> = self.ctx.open_mailbox(answer_mailbox_name("terminate"))?;
        self.ctx
            .post(
                &entry.mailbox,
                ComputeRequest::Terminate {
                    cause,
                    answer: answer.name().to_string(),
                },
                CONTROL,
            )
            .await?;
        answer.recv().await
    }

    /// Graceful stop; in-flight jobs fail with `ServiceIsDown`.
    pub async fn stop(&self) -> Result<(), FailureCause> {
        let entry = self.entry()?;
        let mut answer: Mailbox<()> = self.ctx.open_mailbox(answer_mailbox_name("stop"))?;
        self.ctx
            .post(
                &entry.mailbox,
                ComputeRequest::Stop {
                    answer: answer.name().to_string(),
                },
                CONTROL,
            )
            .await?;
        answer.recv().await
    }
}

impl std::fmt::Debug for ComputeServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeServiceHandle")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}

/// Start a bare-metal compute service.
pub fn start_bare_metal(
    ctx: &SimCtx,
    name: &str,
    service_host: &str,
    config: BareMetalConfig,
) -> Result<ComputeServiceHandle, FailureCause> {
    ctx.platform().require_host(service_host)?;
    if config.hosts.is_empty() {
        return Err(FailureCause::invalid_argument(format!(
            "{name}: at least one compute host required"
        )));
    }
    let mut usage = IndexMap::new();
    for (host, cap) in &config.hosts {
        let platform_host = ctx.platform().require_host(host)?;
        let total = cap.unwrap_or(platform_host.cores);
        if total == 0 || total > platform_host.cores {
            return Err(FailureCause::invalid_argument(format!(
                "{name}: bad core cap {total} for host {host} ({} cores)",
                platform_host.cores
            )));
        }
        usage.insert(
            host.clone(),
            HostUsage {
                total_cores: total,
                used_cores: 0,
                memory: platform_host.memory,
                used_ram: 0,
            },
        );
    }

    let state = Arc::new(BareMetalState {
        usage: Mutex::new(usage),
    });
    let mailbox_name = format!("mb-{name}");
    let mailbox: Mailbox<ComputeRequest> = ctx.open_mailbox(mailbox_name.clone())?;
    let id = ctx.allocate_service_id();

    let daemon_ctx = ctx.clone();
    let daemon_state = Arc::clone(&state);
    let daemon_name = name.to_string();
    let daemon_mailbox_name = mailbox_name.clone();
    let handle = ActorHandle::spawn(name.to_string(), service_host.to_string(), async move {
        daemon(
            daemon_ctx,
            id,
            daemon_name,
            daemon_mailbox_name,
            daemon_state,
            mailbox,
        )
        .await;
    });

    ctx.register_service(ServiceEntry {
        id,
        name: name.to_string(),
        kind: "bare_metal",
        host: service_host.to_string(),
        mailbox: mailbox_name,
        handle,
        state,
    });
    Ok(ComputeServiceHandle::attach(ctx.clone(), id))
}

async fn daemon(
    ctx: SimCtx,
    me: ServiceId,
    name: String,
    mailbox_name: String,
    state: Arc<BareMetalState>,
    mut mailbox: Mailbox<ComputeRequest>,
) {
    let mut running: IndexMap<JobId, RunningJob> = IndexMap::new();
    tracing::info!(service = %name, "compute service up");
    loop {
        let Ok(msg) = mailbox.recv().await else {
            break;
        };
        match msg {
            ComputeRequest::Submit {
                job,
                overrides,
                notify,
                answer,
            } => {
                let verdict = validate(&state, &name, &job, &overrides);
                let accepted = verdict.is_ok();
                let _ = ctx.post(&answer, verdict, CONTROL).await;
                if accepted {
                    tracing::info!(service = %name, job = %job.name(), "job accepted");
                    running.insert(
                        job.id(),
                        RunningJob {
                            job,
                            notify,
                            overrides,
                            executors: HashMap::new(),
                            allocations: HashMap::new(),
                        },
                    );
                    dispatch(&ctx, &name, &mailbox_name, &state, &mut running);
                    settle(&ctx, me, &mut running).await;
                }
            }

            ComputeRequest::Done(done) => {
                if let Some(entry) = running.get_mut(&done.job) {
                    entry.executors.remove(&done.action);
                    if let Some((host, cores, ram)) = entry.allocations.remove(&done.action) {
                        let mut usage = state.usage.lock();
                        if let Some(u) = usage.get_mut(&host) {
                            u.used_cores -= cores;
                            u.used_ram -= ram;
                        }
                    }
                    match done.result {
                        Ok(()) => entry.job.record_completion(&done.action, ctx.now()),
                        Err(cause) => entry.job.record_failure(&done.action, cause, ctx.now()),
                    }
                }
                dispatch(&ctx, &name, &mailbox_name, &state, &mut running);
                settle(&ctx, me, &mut running).await;
            }

            ComputeRequest::Terminate { cause, answer } => {
                wind_down(&ctx, me, &state, &mut running, cause).await;
                let _ = ctx.post(&answer, (), CONTROL).await;
                break;
            }

            ComputeRequest::Stop { answer } => {
                let cause = FailureCause::service_is_down(name.clone());
                wind_down(&ctx, me, &state, &mut running, cause).await;
                let _ = ctx.post(&answer, (), CONTROL).await;
                break;
            }
        }
    }
    tracing::info!(service = %name, "compute service stopped");
}

/// Every action must fit on at least one host (honoring overrides).
fn validate(
    state: &BareMetalState,
    name: &str,
    job: &CompoundJob,
    overrides: &HashMap<String, String>,
) -> Result<(), FailureCause> {
    let usage = state.usage.lock();
    for action_name in job.action_names() {
        let Some(action) = job.action(&action_name) else {
            continue;
        };
        let cores = action.kind.cores_required();
        let ram = action.kind.ram_required();
        let fits = |u: &HostUsage| cores <= u.total_cores && ram <= u.memory;
        match overrides.get(&action_name) {
            Some(host) => {
                let u = usage.get(host).ok_or_else(|| {
                    FailureCause::invalid_argument(format!(
                        "{name}: action {action_name} pinned to unknown host {host}"
                    ))
                })?;
                if !fits(u) {
                    return Err(FailureCause::invalid_argument(format!(
                        "{name}: action {action_name} needs {cores} cores on {host} ({} available)",
                        u.total_cores
                    )));
                }
            }
            None => {
                if !usage.values().any(fits) {
                    return Err(FailureCause::invalid_argument(format!(
                        "{name}: action {action_name} needs {cores} cores; no host is large enough"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Start every ready action that fits somewhere right now.
fn dispatch(
    ctx: &SimCtx,
    name: &str,
    mailbox_name: &str,
    state: &BareMetalState,
    running: &mut IndexMap<JobId, RunningJob>,
) {
    for entry in running.values_mut() {
        entry.job.refresh_ready();
        for action_name in entry.job.ready_actions() {
            let Some(action) = entry.job.action(&action_name) else {
                continue;
            };
            let cores = action.kind.cores_required();
            let ram = action.kind.ram_required();

            let chosen = {
                let usage = state.usage.lock();
                match entry.overrides.get(&action_name) {
                    Some(host) => usage
                        .get(host)
                        .filter(|u| {
                            u.total_cores - u.used_cores >= cores && u.memory - u.used_ram >= ram
                        })
                        .map(|_| host.clone()),
                    None => usage
                        .iter()
                        .find(|(_, u)| {
                            u.total_cores - u.used_cores >= cores && u.memory - u.used_ram >= ram
                        })
                        .map(|(host, _)| host.clone()),
                }
            };
            let Some(host) = chosen else {
                continue;
            };

            {
                let mut usage = state.usage.lock();
                if let Some(u) = usage.get_mut(&host) {
                    u.used_cores += cores;
                    u.used_ram += ram;
                }
            }
            entry
                .job
                .record_start(&action_name, &host, &host, cores, ram, ctx.now());
            entry
                .allocations
                .insert(action_name.clone(), (host.clone(), cores, ram));
            tracing::debug!(
                service = %name,
                job = %entry.job.name(),
                action = %action_name,
                host = %host,
                cores,
                "action dispatched"
            );
            let executor = spawn_action_executor(
                ctx,
                mailbox_name.to_string(),
                &entry.job,
                &action_name,
                ActionContext {
                    sim: ctx.clone(),
                    execution_host: host.clone(),
                    physical_host: host,
                    num_cores: cores,
                    ram,
                },
                ComputeRequest::Done,
            );
            entry.executors.insert(action_name, executor);
        }
    }
}

/// Notify and drop jobs whose DAG has settled.
async fn settle(ctx: &SimCtx, me: ServiceId, running: &mut IndexMap<JobId, RunningJob>) {
    let finished: Vec<JobId> = running
        .iter()
        .filter(|(_, e)| e.executors.is_empty() && e.job.is_settled())
        .map(|(id, _)| id.clone())
        .collect();
    for id in finished {
        if let Some(entry) = running.shift_remove(&id) {
            let failed = match entry.job.state() {
                JobState::Completed => None,
                _ => {
                    let (action, cause) = entry
                        .job
                        .first_failure()
                        .map(|(a, c)| (Some(a), c))
                        .unwrap_or((None, FailureCause::internal("job settled unfinished")));
                    Some((action, cause))
                }
            };
            let notice = ServiceNotice::JobDone {
                job: entry.job.id(),
                job_name: entry.job.name(),
                service: me,
                failed,
                at: ctx.now(),
            };
            let _ = ctx.post(&entry.notify, notice, CONTROL).await;
        }
    }
}

/// Kill everything in flight, firing custom terminate callbacks first,
/// and notify each submitter with `cause`.
async fn wind_down(
    ctx: &SimCtx,
    me: ServiceId,
    state: &BareMetalState,
    running: &mut IndexMap<JobId, RunningJob>,
    cause: FailureCause,
) {
    for (_, entry) in running.drain(..) {
        for (action_name, custom) in entry.job.started_custom_actions() {
            let action_ctx = ActionContext {
                sim: ctx.clone(),
                execution_host: entry
                    .allocations
                    .get(&action_name)
                    .map(|(h, _, _)| h.clone())
                    .unwrap_or_default(),
                physical_host: String::new(),
                num_cores: 0,
                ram: 0,
            };
            custom.terminate(&action_ctx).await;
        }
        for (_, executor) in entry.executors {
            executor.kill();
        }
        {
            let mut usage = state.usage.lock();
            for (_, (host, cores, ram)) in entry.allocations {
                if let Some(u) = usage.get_mut(&host) {
                    u.used_cores -= cores;
                    u.used_ram -= ram;
                }
            }
        }
        entry.job.kill_remaining(ctx.now());
        let notice = ServiceNotice::JobDone {
            job: entry.job.id(),
            job_name: entry.job.name(),
            service: me,
            failed: Some((None, cause.clone())),
            at: ctx.now(),
        };
        let _ = ctx.post(&entry.notify, notice, CONTROL).await;
    }
}

#[cfg(test)]
#[path = "bare_metal_tests.rs"]
mod tests;
