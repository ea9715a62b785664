// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The batch compute service.
//!
//! A queue of node/core reservations with wall-time limits. Each granted
//! reservation runs on a nested bare-metal service shaped like the grant;
//! pilots expose that nested service to the submitter for the window,
//! standard jobs are submitted into it internally. One alarm per
//! reservation delivers the wall-clock timeout to the scheduler mailbox.

use crate::bare_metal::{start_bare_metal, BareMetalConfig, ComputeServiceHandle};
use crate::executor::ServiceNotice;
use crate::job::CompoundJob;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use whirr_core::{FailureCause, ServiceId, SimTime};
use whirr_kernel::{
    answer_mailbox_name, ActorHandle, AlarmHandle, Mailbox, ServiceEntry, SimCtx, CONTROL,
};

/// Queue placement policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementPolicy {
    /// Strict head-of-line: the queue blocks on the first job that does
    /// not fit.
    #[default]
    Fcfs,
    /// Scan past blocked jobs; place each on the smallest fitting hole,
    /// ties broken by host name.
    BestFit,
}

impl PlacementPolicy {
    pub fn from_key(key: &str) -> Result<Self, FailureCause> {
        match key {
            "FCFS" => Ok(Self::Fcfs),
            "BESTFIT" => Ok(Self::BestFit),
            other => Err(FailureCause::invalid_argument(format!(
                "unknown placement policy {other}"
            ))),
        }
    }
}

/// Batch construction parameters.
#[derive(Debug, Clone, Default)]
pub struct BatchConfig {
    pub policy: PlacementPolicy,
}

/// What a reservation will run.
#[derive(Debug)]
pub enum BatchPayload {
    Standard {
        job: CompoundJob,
        overrides: HashMap<String, String>,
    },
    Pilot {
        name: String,
    },
}

/// Requests handled by the batch scheduler's mailbox.
#[derive(Debug)]
pub enum BatchRequest {
    Submit {
        payload: BatchPayload,
        args: HashMap<String, String>,
        notify: String,
        answer: String,
    },
    /// Relay: the nested service finished a standard reservation's job.
    ReservationDone { seq: u64, notice: ServiceNotice },
    /// The wall-clock alarm for a reservation fired.
    AlarmJobTimeOut { seq: u64 },
    /// Explicitly end a pilot before its window expires.
    TerminatePilot { pilot: String, answer: String },
    Stop { answer: String },
}

#[derive(Debug, Clone)]
struct HostReservation {
    total_cores: u32,
    reserved_cores: u32,
}

/// Shared reservation table, peekable for tests.
pub struct BatchState {
    hosts: Mutex<IndexMap<String, HostReservation>>,
}

impl BatchState {
    pub fn reserved_cores(&self, host: &str) -> u32 {
        self.hosts
            .lock()
            .get(host)
            .map(|h| h.reserved_cores)
            .unwrap_or(0)
    }
}

struct QueuedJob {
    seq: u64,
    payload: BatchPayload,
    nodes: u32,
    cores_per_node: u32,
    walltime: Duration,
    notify: String,
    submit_time: SimTime,
}

struct Reservation {
    hosts: Vec<String>,
    cores_per_node: u32,
    nested: ComputeServiceHandle,
    _alarm: AlarmHandle,
    _relay: Option<ActorHandle>,
    notify: String,
    pilot_name: Option<String>,
    job_name: Option<String>,
}

/// Client handle on a batch compute service.
#[derive(Clone)]
pub struct BatchServiceHandle {
    ctx: SimCtx,
    id: ServiceId,
}

impl BatchServiceHandle {
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

    pub fn reserved_cores(&self, host: &str) -> u32 {
        self.ctx
            .service_state::<BatchState>(self.id)
            .map(|s| s.reserved_cores(host))
            .unwrap_or(0)
    }

    fn entry(&self) -> Result<ServiceEntry, FailureCause> {
        let entry = self.ctx.require_service(self.id)?;
        if !entry.handle.is_up() {
            return Err(FailureCause::service_is_down(entry.name));
        }
        Ok(entry)
    }

    async fn submit(
        &self,
        payload: BatchPayload,
        args: &HashMap<String, String>,
        notify: &str,
    ) -> Result<(), FailureCause> {
        let entry = self.entry()?;
        let mut answer: Mailbox<Result<(), FailureCause>> =
            self.ctx.open_mailbox(answer_mailbox_name("batch-submit"))?;
        self.ctx
            .post(
                &entry.mailbox,
                BatchRequest::Submit {
                    payload,
                    args: args.clone(),
                    notify: notify.to_string(),
                    answer: answer.name().to_string(),
                },
                CONTROL,
            )
            .await?;
        answer.recv().await?
    }

    /// Queue a standard job with `-N/-c/-t` submission args.
    pub async fn submit_job(
        &self,
        job: &CompoundJob,
        args: &HashMap<String, String>,
        overrides: &HashMap<String, String>,
        notify: &str,
    ) -> Result<(), FailureCause> {
        self.submit(
            BatchPayload::Standard {
                job: job.clone(),
                overrides: overrides.clone(),
            },
            args,
            notify,
        )
        .await
    }

    /// Queue a pilot reservation.
    pub async fn submit_pilot(
        &self,
        name: &str,
        args: &HashMap<String, String>,
        notify: &str,
    ) -> Result<(), FailureCause> {
        self.submit(
            BatchPayload::Pilot {
                name: name.to_string(),
            },
            args,
            notify,
        )
        .await
    }

    /// End a running pilot now; enclosed jobs fail with `ServiceIsDown`
    /// naming this batch service.
    pub async fn terminate_pilot(&self, pilot: &str) -> Result<(), FailureCause> {
        let entry = self.entry()?;
        let mut answer: Mailbox<Result<(), FailureCause>> =
            self.ctx.open_mailbox(answer_mailbox_name("pilot-term"))?;
        self.ctx
            .post(
                &entry.mailbox,
                BatchRequest::TerminatePilot {
                    pilot: pilot.to_string(),
                    answer: answer.name().to_string(),
                },
                CONTROL,
            )
            .await?;
        answer.recv().await?
    }
}

impl std::fmt::Debug for BatchServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchServiceHandle")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}

/// Start a batch service scheduling over `hosts`.
pub fn start_batch_service(
    ctx: &SimCtx,
    name: &str,
    service_host: &str,
    hosts: &[&str],
    config: BatchConfig,
) -> Result<BatchServiceHandle, FailureCause> {
    ctx.platform().require_host(service_host)?;
    if hosts.is_empty() {
        return Err(FailureCause::invalid_argument(format!(
            "{name}: at least one compute host required"
        )));
    }
    let mut table = IndexMap::new();
    for host in hosts {
        let platform_host = ctx.platform().require_host(host)?;
        table.insert(
            host.to_string(),
            HostReservation {
                total_cores: platform_host.cores,
                reserved_cores: 0,
            },
        );
    }

    let state = Arc::new(BatchState {
        hosts: Mutex::new(table),
    });
    let mailbox_name = format!("mb-{name}");
    let mailbox: Mailbox<BatchRequest> = ctx.open_mailbox(mailbox_name.clone())?;
    let id = ctx.allocate_service_id();

    let daemon = Daemon {
        ctx: ctx.clone(),
        me: id,
        name: name.to_string(),
        service_host: service_host.to_string(),
        mailbox_name: mailbox_name.clone(),
        state: Arc::clone(&state),
        policy: config.policy,
        queue: VecDeque::new(),
        running: HashMap::new(),
        next_seq: 1,
    };
    let handle = ActorHandle::spawn(name.to_string(), service_host.to_string(), async move {
        daemon.run(mailbox).await;
    });

    ctx.register_service(ServiceEntry {
        id,
        name: name.to_string(),
        kind: "batch",
        host: service_host.to_string(),
        mailbox: mailbox_name,
        handle,
        state,
    });
    Ok(BatchServiceHandle::attach(ctx.clone(), id))
}

struct Daemon {
    ctx: SimCtx,
    me: ServiceId,
    name: String,
    service_host: String,
    mailbox_name: String,
    state: Arc<BatchState>,
    policy: PlacementPolicy,
    queue: VecDeque<QueuedJob>,
    running: HashMap<u64, Reservation>,
    next_seq: u64,
}

impl Daemon {
    async fn run(mut self, mut mailbox: Mailbox<BatchRequest>) {
        tracing::info!(service = %self.name, policy = ?self.policy, "batch service up");
        loop {
            let Ok(msg) = mailbox.recv().await else {
                break;
            };
            match msg {
                BatchRequest::Submit {
                    payload,
                    args,
                    notify,
                    answer,
                } => {
                    let verdict = self.enqueue(payload, &args, notify);
                    let _ = self.ctx.post(&answer, verdict, CONTROL).await;
                    self.schedule().await;
                }

                BatchRequest::ReservationDone { seq, notice } => {
                    if let Some(reservation) = self.running.remove(&seq) {
                        self.release(&reservation);
                        self.ctx.kill_service(reservation.nested.id());
                        // Events name the batch service the job was
                        // submitted to, not the internal executor.
                        let notice = match notice {
                            ServiceNotice::JobDone {
                                job,
                                job_name,
                                failed,
                                at,
                                ..
                            } => ServiceNotice::JobDone {
                                job,
                                job_name,
                                service: self.me,
                                failed,
                                at,
                            },
                            other => other,
                        };
                        let _ = self.ctx.post(&reservation.notify, notice, CONTROL).await;
                    }
                    self.schedule().await;
                }

                BatchRequest::AlarmJobTimeOut { seq } => {
                    self.expire(seq).await;
                    self.schedule().await;
                }

                BatchRequest::TerminatePilot { pilot, answer } => {
                    let verdict = self.terminate_pilot(&pilot).await;
                    let _ = self.ctx.post(&answer, verdict, CONTROL).await;
                    self.schedule().await;
                }

                BatchRequest::Stop { answer } => {
                    self.wind_down().await;
                    let _ = self.ctx.post(&answer, (), CONTROL).await;
                    break;
                }
            }
        }
        tracing::info!(service = %self.name, "batch service stopped");
    }

    fn enqueue(
        &mut self,
        payload: BatchPayload,
        args: &HashMap<String, String>,
        notify: String,
    ) -> Result<(), FailureCause> {
        let (nodes, cores_per_node, minutes) = parse_batch_args(args)?;
        {
            let hosts = self.state.hosts.lock();
            if !hosts.values().any(|h| h.total_cores >= cores_per_node) {
                return Err(FailureCause::not_enough_resources(format!(
                    "{}: no host has {cores_per_node} cores per node",
                    self.name
                )));
            }
            if nodes as usize > hosts.len() {
                return Err(FailureCause::not_enough_resources(format!(
                    "{}: {nodes} nodes requested, {} available",
                    self.name,
                    hosts.len()
                )));
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::info!(
            service = %self.name,
            seq,
            nodes,
            cores = cores_per_node,
            minutes,
            "reservation queued"
        );
        self.queue.push_back(QueuedJob {
            seq,
            payload,
            nodes,
            cores_per_node,
            walltime: Duration::from_secs(minutes * 60),
            notify,
            submit_time: self.ctx.now(),
        });
        Ok(())
    }

    /// Grant whatever the policy allows right now.
    async fn schedule(&mut self) {
        loop {
            let placeable = match self.policy {
                PlacementPolicy::Fcfs => match self.queue.front() {
                    Some(job) => self
                        .place(job.nodes, job.cores_per_node)
                        .map(|hosts| (0, hosts)),
                    None => None,
                },
                PlacementPolicy::BestFit => self.queue.iter().enumerate().find_map(|(i, job)| {
                    self.place(job.nodes, job.cores_per_node)
                        .map(|hosts| (i, hosts))
                }),
            };
            let Some((index, hosts)) = placeable else {
                break;
            };
            let Some(job) = self.queue.remove(index) else {
                break;
            };
            self.start_reservation(job, hosts).await;
        }
    }

    /// Hosts for an `(n, c)` grant under the current policy, or `None`.
    fn place(&self, nodes: u32, cores_per_node: u32) -> Option<Vec<String>> {
        let hosts = self.state.hosts.lock();
        let mut candidates: Vec<(&String, u32)> = hosts
            .iter()
            .filter_map(|(name, h)| {
                let free = h.total_cores - h.reserved_cores;
                (free >= cores_per_node).then_some((name, free))
            })
            .collect();
        if candidates.len() < nodes as usize {
            return None;
        }
        if self.policy == PlacementPolicy::BestFit {
            // Smallest fitting hole; ties by host name.
            candidates.sort_by(|(an, af), (bn, bf)| af.cmp(bf).then(an.cmp(bn)));
        }
        Some(
            candidates
                .into_iter()
                .take(nodes as usize)
                .map(|(name, _)| name.clone())
                .collect(),
        )
    }

    async fn start_reservation(&mut self, job: QueuedJob, hosts: Vec<String>) {
        {
            let mut table = self.state.hosts.lock();
            for host in &hosts {
                if let Some(h) = table.get_mut(host) {
                    h.reserved_cores += job.cores_per_node;
                }
            }
        }

        let seq = job.seq;
        let alarm = AlarmHandle::set(
            self.ctx.registry(),
            job.walltime,
            self.mailbox_name.clone(),
            BatchRequest::AlarmJobTimeOut { seq },
        );
        let shape = BareMetalConfig {
            hosts: hosts
                .iter()
                .map(|h| (h.clone(), Some(job.cores_per_node)))
                .collect(),
        };

        match job.payload {
            BatchPayload::Standard {
                job: compound,
                overrides,
            } => {
                let nested_name = format!("{}-res{}", self.name, seq);
                let nested =
                    match start_bare_metal(&self.ctx, &nested_name, &self.service_host, shape) {
                        Ok(handle) => handle,
                        Err(cause) => {
                            self.fail_unstarted(&job.notify, &compound, cause).await;
                            self.release_hosts(&hosts, job.cores_per_node);
                            return;
                        }
                    };

                // Relay the nested service's single notice back into the
                // scheduler loop.
                let relay_name = answer_mailbox_name("res-notice");
                let Ok(mut relay_mailbox) =
                    self.ctx.open_mailbox::<ServiceNotice>(relay_name.clone())
                else {
                    return;
                };
                let relay_ctx = self.ctx.clone();
                let batch_mailbox = self.mailbox_name.clone();
                let relay = ActorHandle::spawn(
                    format!("{nested_name}-relay"),
                    self.service_host.clone(),
                    async move {
                        if let Ok(notice) = relay_mailbox.recv().await {
                            let _ = relay_ctx
                                .post_now(&batch_mailbox, BatchRequest::ReservationDone {
                                    seq,
                                    notice,
                                });
                        }
                    },
                );

                tracing::info!(
                    service = %self.name,
                    seq,
                    job = %compound.name(),
                    hosts = ?hosts,
                    queued_for = %whirr_core::format_elapsed(self.ctx.now().since(job.submit_time)),
                    "reservation started"
                );
                let submitted = nested.submit_job(&compound, &overrides, &relay_name).await;
                self.running.insert(
                    seq,
                    Reservation {
                        hosts,
                        cores_per_node: job.cores_per_node,
                        nested: nested.clone(),
                        _alarm: alarm,
                        _relay: Some(relay),
                        notify: job.notify.clone(),
                        pilot_name: None,
                        job_name: Some(compound.name()),
                    },
                );
                if let Err(cause) = submitted {
                    // The reservation fits by construction; anything else
                    // is fatal for the job.
                    if let Some(reservation) = self.running.remove(&seq) {
                        self.release(&reservation);
                        self.ctx.kill_service(reservation.nested.id());
                    }
                    self.fail_unstarted(&job.notify, &compound, cause).await;
                }
            }

            BatchPayload::Pilot { name: pilot_name } => {
                let nested = match start_bare_metal(&self.ctx, &pilot_name, &self.service_host, shape)
                {
                    Ok(handle) => handle,
                    Err(cause) => {
                        tracing::warn!(
                            service = %self.name,
                            pilot = %pilot_name,
                            cause = cause.tag(),
                            "pilot could not start"
                        );
                        self.release_hosts(&hosts, job.cores_per_node);
                        return;
                    }
                };
                tracing::info!(
                    service = %self.name,
                    seq,
                    pilot = %pilot_name,
                    hosts = ?hosts,
                    "pilot started"
                );
                let started = ServiceNotice::PilotStarted {
                    pilot: pilot_name.clone(),
                    service: nested.id(),
                    at: self.ctx.now(),
                };
                let _ = self.ctx.post(&job.notify, started, CONTROL).await;
                self.running.insert(
                    seq,
                    Reservation {
                        hosts,
                        cores_per_node: job.cores_per_node,
                        nested,
                        _alarm: alarm,
                        _relay: None,
                        notify: job.notify,
                        pilot_name: Some(pilot_name),
                        job_name: None,
                    },
                );
            }
        }
    }

    /// Wall-clock expiry for one reservation.
    async fn expire(&mut self, seq: u64) {
        let Some((pilot_name, nested, job_name)) = self
            .running
            .get(&seq)
            .map(|r| (r.pilot_name.clone(), r.nested.clone(), r.job_name.clone()))
        else {
            return;
        };
        match pilot_name {
            None => {
                // Standard job: terminate the nested executor with the
                // timeout cause; the relay's ReservationDone does the rest,
                // producing exactly one failure event.
                tracing::info!(service = %self.name, seq, "wall clock expired");
                let cause = FailureCause::JobTimeout {
                    job: job_name.unwrap_or_else(|| format!("reservation {seq}")),
                };
                let _ = nested.terminate(cause).await;
            }
            Some(pilot) => {
                let Some(reservation) = self.running.remove(&seq) else {
                    return;
                };
                tracing::info!(service = %self.name, seq, pilot = %pilot, "pilot window expired");
                let cause = FailureCause::service_is_down(self.name.clone());
                let _ = reservation.nested.terminate(cause).await;
                self.ctx.kill_service(reservation.nested.id());
                self.release(&reservation);
                let expired = ServiceNotice::PilotExpired {
                    pilot,
                    at: self.ctx.now(),
                };
                let _ = self.ctx.post(&reservation.notify, expired, CONTROL).await;
            }
        }
    }

    async fn terminate_pilot(&mut self, pilot: &str) -> Result<(), FailureCause> {
        let seq = self
            .running
            .iter()
            .find(|(_, r)| r.pilot_name.as_deref() == Some(pilot))
            .map(|(seq, _)| *seq)
            .ok_or_else(|| {
                FailureCause::invalid_argument(format!("{}: no running pilot {pilot}", self.name))
            })?;
        let Some(reservation) = self.running.remove(&seq) else {
            return Ok(());
        };
        tracing::info!(service = %self.name, pilot = %pilot, "pilot terminated");
        let cause = FailureCause::service_is_down(self.name.clone());
        let _ = reservation.nested.terminate(cause).await;
        self.ctx.kill_service(reservation.nested.id());
        self.release(&reservation);
        Ok(())
    }

    async fn wind_down(&mut self) {
        let cause = FailureCause::service_is_down(self.name.clone());
        let seqs: Vec<u64> = self.running.keys().copied().collect();
        for seq in seqs {
            if let Some(reservation) = self.running.remove(&seq) {
                let _ = reservation.nested.terminate(cause.clone()).await;
                self.ctx.kill_service(reservation.nested.id());
                self.release(&reservation);
                if let Some(pilot) = reservation.pilot_name {
                    let expired = ServiceNotice::PilotExpired {
                        pilot,
                        at: self.ctx.now(),
                    };
                    let _ = self.ctx.post(&reservation.notify, expired, CONTROL).await;
                }
            }
        }
        for queued in self.queue.drain(..) {
            if let BatchPayload::Standard { job, .. } = queued.payload {
                let notice = ServiceNotice::JobDone {
                    job: job.id(),
                    job_name: job.name(),
                    service: self.me,
                    failed: Some((None, cause.clone())),
                    at: self.ctx.now(),
                };
                let _ = self.ctx.post(&queued.notify, notice, CONTROL).await;
            }
        }
    }

    async fn fail_unstarted(&self, notify: &str, job: &CompoundJob, cause: FailureCause) {
        let notice = ServiceNotice::JobDone {
            job: job.id(),
            job_name: job.name(),
            service: self.me,
            failed: Some((None, cause)),
            at: self.ctx.now(),
        };
        let _ = self.ctx.post(notify, notice, CONTROL).await;
    }

    fn release(&self, reservation: &Reservation) {
        self.release_hosts(&reservation.hosts, reservation.cores_per_node);
    }

    fn release_hosts(&self, hosts: &[String], cores_per_node: u32) {
        let mut table = self.state.hosts.lock();
        for host in hosts {
            if let Some(h) = table.get_mut(host) {
                h.reserved_cores = h.reserved_cores.saturating_sub(cores_per_node);
            }
        }
    }
}

/// Parse `-N/-c/-t` submission args; exactly these three keys.
fn parse_batch_args(args: &HashMap<String, String>) -> Result<(u32, u32, u64), FailureCause> {
    for key in args.keys() {
        if !matches!(key.as_str(), "-N" | "-c" | "-t") {
            return Err(FailureCause::invalid_argument(format!(
                "unknown batch argument {key}"
            )));
        }
    }
    let int = |key: &str| -> Result<u64, FailureCause> {
        let raw = args
            .get(key)
            .ok_or_else(|| FailureCause::invalid_argument(format!("missing batch argument {key}")))?;
        let value: u64 = raw.parse().map_err(|_| {
            FailureCause::invalid_argument(format!("batch argument {key}={raw} is not an integer"))
        })?;
        if value == 0 {
            return Err(FailureCause::invalid_argument(format!(
                "batch argument {key} must be positive"
            )));
        }
        Ok(value)
    };
    let nodes = int("-N")? as u32;
    let cores_per_node = int("-c")? as u32;
    let minutes = int("-t")?;
    Ok((nodes, cores_per_node, minutes))
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
