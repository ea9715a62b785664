// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events delivered to controller event mailboxes.
//!
//! Serializes with `{"type": "kind:tag", ...fields}` format.

use crate::failure::FailureCause;
use crate::id::{JobId, ServiceId};
use crate::location::FileLocation;
use crate::time::SimTime;
use serde::{Deserialize, Serialize};

/// The typed union a controller's `wait_for_next_event` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    /// Every action of a compound job completed.
    #[serde(rename = "job:completed")]
    CompoundJobCompleted {
        job: JobId,
        job_name: String,
        compute_service: ServiceId,
        at: SimTime,
    },

    /// An action failed (or the job timed out / was killed) and nothing is
    /// runnable anymore.
    #[serde(rename = "job:failed")]
    CompoundJobFailed {
        job: JobId,
        job_name: String,
        compute_service: ServiceId,
        /// The action whose failure decided the job, when there is one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        cause: FailureCause,
        at: SimTime,
    },

    /// A pilot reservation started; `service` is the nested compute service
    /// accepting submissions for the pilot's window.
    #[serde(rename = "pilot:started")]
    PilotJobStarted {
        pilot: String,
        service: ServiceId,
        at: SimTime,
    },

    /// A pilot's window expired and its nested service is down.
    #[serde(rename = "pilot:expired")]
    PilotJobExpired { pilot: String, at: SimTime },

    #[serde(rename = "file:copy_completed")]
    FileCopyCompleted {
        file: String,
        src: FileLocation,
        dst: FileLocation,
        at: SimTime,
    },

    #[serde(rename = "file:copy_failed")]
    FileCopyFailed {
        file: String,
        src: FileLocation,
        dst: FileLocation,
        cause: FailureCause,
        at: SimTime,
    },

    /// A timer set via the controller context fired.
    #[serde(rename = "timer")]
    Timer { message: String, at: SimTime },
}

impl ExecutionEvent {
    /// Event kind tag for log fields (e.g. "job:completed").
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionEvent::CompoundJobCompleted { .. } => "job:completed",
            ExecutionEvent::CompoundJobFailed { .. } => "job:failed",
            ExecutionEvent::PilotJobStarted { .. } => "pilot:started",
            ExecutionEvent::PilotJobExpired { .. } => "pilot:expired",
            ExecutionEvent::FileCopyCompleted { .. } => "file:copy_completed",
            ExecutionEvent::FileCopyFailed { .. } => "file:copy_failed",
            ExecutionEvent::Timer { .. } => "timer",
        }
    }

    /// Virtual time stamp the event was emitted at.
    pub fn at(&self) -> SimTime {
        match self {
            ExecutionEvent::CompoundJobCompleted { at, .. }
            | ExecutionEvent::CompoundJobFailed { at, .. }
            | ExecutionEvent::PilotJobStarted { at, .. }
            | ExecutionEvent::PilotJobExpired { at, .. }
            | ExecutionEvent::FileCopyCompleted { at, .. }
            | ExecutionEvent::FileCopyFailed { at, .. }
            | ExecutionEvent::Timer { at, .. } => *at,
        }
    }

    /// One-line summary for logging.
    pub fn log_summary(&self) -> String {
        match self {
            ExecutionEvent::CompoundJobCompleted { job_name, .. } => {
                format!("job:completed {job_name}")
            }
            ExecutionEvent::CompoundJobFailed {
                job_name, cause, ..
            } => format!("job:failed {job_name} ({})", cause.tag()),
            ExecutionEvent::PilotJobStarted { pilot, .. } => format!("pilot:started {pilot}"),
            ExecutionEvent::PilotJobExpired { pilot, .. } => format!("pilot:expired {pilot}"),
            ExecutionEvent::FileCopyCompleted { file, .. } => {
                format!("file:copy_completed {file}")
            }
            ExecutionEvent::FileCopyFailed { file, cause, .. } => {
                format!("file:copy_failed {file} ({})", cause.tag())
            }
            ExecutionEvent::Timer { message, .. } => format!("timer {message}"),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
