// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The controller surface.
//!
//! A controller is an actor with a personal event mailbox. Its `main`
//! drives the experiment; `wait_for_next_event` blocks on the mailbox and
//! returns the typed event union, and `process_next_event` dispatches to
//! overridable per-variant handlers.

use async_trait::async_trait;
use std::time::Duration;
use whirr_compute::{BatchServiceHandle, ComputeServiceHandle, JobManager};
use whirr_core::{DataFile, ExecutionEvent, FailureCause, FileLocation, ServiceId, SimTime};
use whirr_kernel::{AlarmHandle, Mailbox, SimCtx};
use whirr_storage::StorageHandle;

/// Everything a running controller can reach.
pub struct ControllerContext {
    ctx: SimCtx,
    host: String,
    name: String,
    events: Mailbox<ExecutionEvent>,
    event_mailbox: String,
}

impl ControllerContext {
    pub(crate) fn new(
        ctx: SimCtx,
        host: String,
        name: String,
        events: Mailbox<ExecutionEvent>,
    ) -> Self {
        let event_mailbox = events.name().to_string();
        Self {
            ctx,
            host,
            name,
            events,
            event_mailbox,
        }
    }

    pub fn sim(&self) -> &SimCtx {
        &self.ctx
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The controller's personal event mailbox name.
    pub fn event_mailbox(&self) -> &str {
        &self.event_mailbox
    }

    pub fn now(&self) -> SimTime {
        self.ctx.now()
    }

    pub async fn sleep(&self, dt: Duration) {
        self.ctx.clock().sleep(dt).await;
    }

    /// Block until the next event arrives on the personal mailbox.
    pub async fn wait_for_next_event(&mut self) -> Result<ExecutionEvent, FailureCause> {
        let event = self.events.recv().await?;
        tracing::debug!(controller = %self.name, event = %event.log_summary(), "event");
        Ok(event)
    }

    /// Like [`Self::wait_for_next_event`] with a timeout; `Ok(None)` when
    /// nothing arrived in `dt`.
    pub async fn wait_for_next_event_timeout(
        &mut self,
        dt: Duration,
    ) -> Result<Option<ExecutionEvent>, FailureCause> {
        self.events.recv_timeout(dt).await
    }

    /// Create a job manager whose events land on this controller's
    /// mailbox.
    pub fn create_job_manager(&self) -> Result<JobManager, FailureCause> {
        JobManager::start(&self.ctx, &self.host, &self.event_mailbox)
    }

    pub fn storage(&self, id: ServiceId) -> StorageHandle {
        StorageHandle::attach(self.ctx.clone(), id)
    }

    pub fn compute(&self, id: ServiceId) -> ComputeServiceHandle {
        ComputeServiceHandle::attach(self.ctx.clone(), id)
    }

    pub fn batch(&self, id: ServiceId) -> BatchServiceHandle {
        BatchServiceHandle::attach(self.ctx.clone(), id)
    }

    /// Arm a timer that delivers an [`ExecutionEvent::Timer`] after
    /// `delay`. Dropping the handle cancels it.
    pub fn set_timer(&self, delay: Duration, message: impl Into<String>) -> AlarmHandle {
        let event = ExecutionEvent::Timer {
            message: message.into(),
            at: self.ctx.now() + delay,
        };
        AlarmHandle::set(self.ctx.registry(), delay, self.event_mailbox.clone(), event)
    }

    /// Kick off an asynchronous file copy; completion or failure arrives
    /// as an event on the personal mailbox.
    pub fn initiate_file_copy(&self, file: &DataFile, src: FileLocation, dst: FileLocation) {
        let ctx = self.ctx.clone();
        let events = self.event_mailbox.clone();
        let file_id = file.id().to_string();
        tokio::spawn(async move {
            let storage = StorageHandle::attach(ctx.clone(), dst.service());
            let event = match storage.copy(&src, &dst).await {
                Ok(()) => ExecutionEvent::FileCopyCompleted {
                    file: file_id,
                    src,
                    dst,
                    at: ctx.now(),
                },
                Err(cause) => ExecutionEvent::FileCopyFailed {
                    file: file_id,
                    src,
                    dst,
                    cause,
                    at: ctx.now(),
                },
            };
            let _ = ctx.post_now(&events, event);
        });
    }
}

/// A user-written controller.
///
/// Override the per-variant handlers you care about; the default
/// implementations log and continue.
#[async_trait]
pub trait ExecutionController: Send + 'static {
    /// The controller body, run as an actor when the simulation launches.
    async fn main(&mut self, ctx: &mut ControllerContext) -> Result<(), FailureCause>;

    /// Wait for the next event and dispatch it to the matching handler.
    async fn process_next_event(
        &mut self,
        ctx: &mut ControllerContext,
    ) -> Result<(), FailureCause> {
        let event = ctx.wait_for_next_event().await?;
        self.dispatch_event(ctx, event).await
    }

    /// Route one event to its per-variant handler.
    async fn dispatch_event(
        &mut self,
        ctx: &mut ControllerContext,
        event: ExecutionEvent,
    ) -> Result<(), FailureCause> {
        match &event {
            ExecutionEvent::CompoundJobCompleted { .. } => self.on_job_completed(ctx, event).await,
            ExecutionEvent::CompoundJobFailed { .. } => self.on_job_failed(ctx, event).await,
            ExecutionEvent::PilotJobStarted { .. } => self.on_pilot_started(ctx, event).await,
            ExecutionEvent::PilotJobExpired { .. } => self.on_pilot_expired(ctx, event).await,
            ExecutionEvent::FileCopyCompleted { .. } => self.on_file_copy_completed(ctx, event).await,
            ExecutionEvent::FileCopyFailed { .. } => self.on_file_copy_failed(ctx, event).await,
            ExecutionEvent::Timer { .. } => self.on_timer(ctx, event).await,
        }
    }

    async fn on_job_completed(
        &mut self,
        _ctx: &mut ControllerContext,
        event: ExecutionEvent,
    ) -> Result<(), FailureCause> {
        tracing::info!(event = %event.log_summary(), "unhandled");
        Ok(())
    }

    async fn on_job_failed(
        &mut self,
        _ctx: &mut ControllerContext,
        event: ExecutionEvent,
    ) -> Result<(), FailureCause> {
        tracing::info!(event = %event.log_summary(), "unhandled");
        Ok(())
    }

    async fn on_pilot_started(
        &mut self,
        _ctx: &mut ControllerContext,
        event: ExecutionEvent,
    ) -> Result<(), FailureCause> {
        tracing::info!(event = %event.log_summary(), "unhandled");
        Ok(())
    }

    async fn on_pilot_expired(
        &mut self,
        _ctx: &mut ControllerContext,
        event: ExecutionEvent,
    ) -> Result<(), FailureCause> {
        tracing::info!(event = %event.log_summary(), "unhandled");
        Ok(())
    }

    async fn on_file_copy_completed(
        &mut self,
        _ctx: &mut ControllerContext,
        event: ExecutionEvent,
    ) -> Result<(), FailureCause> {
        tracing::info!(event = %event.log_summary(), "unhandled");
        Ok(())
    }

    async fn on_file_copy_failed(
        &mut self,
        _ctx: &mut ControllerContext,
        event: ExecutionEvent,
    ) -> Result<(), FailureCause> {
        tracing::info!(event = %event.log_summary(), "unhandled");
        Ok(())
    }

    async fn on_timer(
        &mut self,
        _ctx: &mut ControllerContext,
        event: ExecutionEvent,
    ) -> Result<(), FailureCause> {
        tracing::info!(event = %event.log_summary(), "unhandled");
        Ok(())
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
