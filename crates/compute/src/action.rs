// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actions: the atomic units of work inside a compound job.
//!
//! An action is a tagged union over the work it performs plus a small
//! state machine and an execution-attempt history. Actions live inside
//! their job and transition only under the compute service that runs them.

use crate::executor::ActionContext;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use whirr_core::{DataFile, FailureCause, FileLocation, SimTime};

/// Per-action lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    /// Waiting on parents.
    NotReady,
    /// All parents completed; eligible for dispatch.
    Ready,
    /// Running under a compute service.
    Started,
    Completed,
    Failed,
    /// Cancelled externally or by service death.
    Killed,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Completed | ActionState::Failed | ActionState::Killed
        )
    }
}

/// One frame of the execution history stack.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionAttempt {
    pub execution_host: String,
    pub physical_host: String,
    pub num_cores: u32,
    pub ram: u64,
    pub start: SimTime,
    pub end: Option<SimTime>,
}

/// User-supplied behavior for custom actions.
///
/// Both callbacks run under the compute service's actor; `execute` may
/// submit further jobs through handles it captured or attaches via the
/// context.
#[async_trait]
pub trait CustomAction: Send + Sync {
    async fn execute(&self, ctx: &ActionContext) -> Result<(), FailureCause>;

    /// Invoked when the action is being killed while running.
    async fn terminate(&self, _ctx: &ActionContext) {}
}

/// What an action does.
#[derive(Clone)]
pub enum ActionKind {
    Compute { flops: f64, cores: u32, ram: u64 },
    FileRead {
        location: FileLocation,
        num_bytes: Option<u64>,
    },
    FileWrite {
        file: DataFile,
        location: FileLocation,
    },
    FileCopy {
        src: FileLocation,
        dst: FileLocation,
    },
    Sleep { duration: Duration },
    Custom { custom: Arc<dyn CustomAction> },
}

impl ActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Compute { .. } => "compute",
            ActionKind::FileRead { .. } => "file_read",
            ActionKind::FileWrite { .. } => "file_write",
            ActionKind::FileCopy { .. } => "file_copy",
            ActionKind::Sleep { .. } => "sleep",
            ActionKind::Custom { .. } => "custom",
        }
    }

    /// Cores the action occupies while started.
    pub fn cores_required(&self) -> u32 {
        match self {
            ActionKind::Compute { cores, .. } => *cores,
            _ => 1,
        }
    }

    /// RAM the action occupies while started.
    pub fn ram_required(&self) -> u64 {
        match self {
            ActionKind::Compute { ram, .. } => *ram,
            _ => 0,
        }
    }
}

impl std::fmt::Debug for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Compute { flops, cores, ram } => f
                .debug_struct("Compute")
                .field("flops", flops)
                .field("cores", cores)
                .field("ram", ram)
                .finish(),
            ActionKind::FileRead {
                location,
                num_bytes,
            } => f
                .debug_struct("FileRead")
                .field("location", location)
                .field("num_bytes", num_bytes)
                .finish(),
            ActionKind::FileWrite { file, location } => f
                .debug_struct("FileWrite")
                .field("file", file)
                .field("location", location)
                .finish(),
            ActionKind::FileCopy { src, dst } => f
                .debug_struct("FileCopy")
                .field("src", src)
                .field("dst", dst)
                .finish(),
            ActionKind::Sleep { duration } => {
                f.debug_struct("Sleep").field("duration", duration).finish()
            }
            ActionKind::Custom { .. } => f.debug_struct("Custom").finish_non_exhaustive(),
        }
    }
}

/// An action inside a compound job.
#[derive(Debug, Clone)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
    pub state: ActionState,
    pub parents: BTreeSet<String>,
    pub children: BTreeSet<String>,
    pub attempts: Vec<ExecutionAttempt>,
    pub failure: Option<FailureCause>,
}

impl Action {
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            state: ActionState::NotReady,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            attempts: Vec::new(),
            failure: None,
        }
    }

    /// Record dispatch: push a history frame and move to `Started`.
    pub fn start_attempt(
        &mut self,
        execution_host: &str,
        physical_host: &str,
        num_cores: u32,
        ram: u64,
        now: SimTime,
    ) {
        self.attempts.push(ExecutionAttempt {
            execution_host: execution_host.to_string(),
            physical_host: physical_host.to_string(),
            num_cores,
            ram,
            start: now,
            end: None,
        });
        self.state = ActionState::Started;
    }

    pub fn complete(&mut self, now: SimTime) {
        self.close_attempt(now);
        self.state = ActionState::Completed;
    }

    pub fn fail(&mut self, cause: FailureCause, now: SimTime) {
        self.close_attempt(now);
        self.failure = Some(cause);
        self.state = ActionState::Failed;
    }

    pub fn kill(&mut self, now: SimTime) {
        self.close_attempt(now);
        self.state = ActionState::Killed;
    }

    fn close_attempt(&mut self, now: SimTime) {
        if let Some(frame) = self.attempts.last_mut() {
            if frame.end.is_none() {
                frame.end = Some(now);
            }
        }
    }

    pub fn start_date(&self) -> Option<SimTime> {
        self.attempts.last().map(|a| a.start)
    }

    pub fn end_date(&self) -> Option<SimTime> {
        self.attempts.last().and_then(|a| a.end)
    }
}

#[cfg(test)]
#[path = "action_tests.rs"]
mod tests;
