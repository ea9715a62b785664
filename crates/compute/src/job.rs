// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compound jobs: DAGs of actions submitted as one unit.
//!
//! The DAG is append-only until submission and frozen afterwards; every
//! dependency edge is kept consistent on both sides and cycles are
//! rejected at insertion.

use crate::action::{Action, ActionKind, ActionState, CustomAction};
use parking_lot::Mutex;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use whirr_core::{DataFile, FailureCause, FileLocation, IdGen, JobId, SimTime, UuidIdGen};

/// Job-level state derived from the actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotSubmitted,
    /// Submitted; some action is still pending or running.
    Pending,
    /// Every action completed.
    Completed,
    /// Something failed and nothing is runnable anymore.
    Failed,
    /// Settled with a mix of completed and failed/killed actions; reported
    /// only to controllers that tolerate partial completion.
    PartiallyCompleted,
}

struct JobInner {
    id: JobId,
    name: String,
    actions: IndexMap<String, Action>,
    submitted: bool,
}

/// Shared handle on one compound job.
#[derive(Clone)]
pub struct CompoundJob {
    inner: Arc<Mutex<JobInner>>,
}

impl CompoundJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(JobInner {
                id: JobId::new(format!("job-{}", UuidIdGen.next())),
                name: name.into(),
                actions: IndexMap::new(),
                submitted: false,
            })),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.lock().id.clone()
    }

    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    pub fn is_submitted(&self) -> bool {
        self.inner.lock().submitted
    }

    pub fn action_count(&self) -> usize {
        self.inner.lock().actions.len()
    }

    pub fn action_names(&self) -> Vec<String> {
        self.inner.lock().actions.keys().cloned().collect()
    }

    /// Snapshot of one action.
    pub fn action(&self, name: &str) -> Option<Action> {
        self.inner.lock().actions.get(name).cloned()
    }

    pub fn action_state(&self, name: &str) -> Option<ActionState> {
        self.inner.lock().actions.get(name).map(|a| a.state)
    }

    // -- building --------------------------------------------------------

    pub fn add_compute_action(
        &self,
        name: &str,
        flops: f64,
        cores: u32,
        ram: u64,
    ) -> Result<(), FailureCause> {
        self.add_action(name, ActionKind::Compute { flops, cores, ram })
    }

    pub fn add_file_read_action(
        &self,
        name: &str,
        location: FileLocation,
    ) -> Result<(), FailureCause> {
        self.add_action(
            name,
            ActionKind::FileRead {
                location,
                num_bytes: None,
            },
        )
    }

    pub fn add_partial_file_read_action(
        &self,
        name: &str,
        location: FileLocation,
        num_bytes: u64,
    ) -> Result<(), FailureCause> {
        self.add_action(
            name,
            ActionKind::FileRead {
                location,
                num_bytes: Some(num_bytes),
            },
        )
    }

    pub fn add_file_write_action(
        &self,
        name: &str,
        file: DataFile,
        location: FileLocation,
    ) -> Result<(), FailureCause> {
        self.add_action(name, ActionKind::FileWrite { file, location })
    }

    pub fn add_file_copy_action(
        &self,
        name: &str,
        src: FileLocation,
        dst: FileLocation,
    ) -> Result<(), FailureCause> {
        self.add_action(name, ActionKind::FileCopy { src, dst })
    }

    pub fn add_sleep_action(&self, name: &str, duration: Duration) -> Result<(), FailureCause> {
        self.add_action(name, ActionKind::Sleep { duration })
    }

    pub fn add_custom_action(
        &self,
        name: &str,
        custom: Arc<dyn CustomAction>,
    ) -> Result<(), FailureCause> {
        self.add_action(name, ActionKind::Custom { custom })
    }

    fn add_action(&self, name: &str, kind: ActionKind) -> Result<(), FailureCause> {
        let mut inner = self.inner.lock();
        if inner.submitted {
            return Err(FailureCause::invalid_argument(format!(
                "job {}: cannot add actions after submission",
                inner.name
            )));
        }
        if inner.actions.contains_key(name) {
            return Err(FailureCause::invalid_argument(format!(
                "job {}: duplicate action name {name}",
                inner.name
            )));
        }
        inner.actions.insert(name.to_string(), Action::new(name, kind));
        Ok(())
    }

    /// Add an edge `parent → child`; the child only becomes ready once the
    /// parent completed.
    pub fn add_dependency(&self, parent: &str, child: &str) -> Result<(), FailureCause> {
        let mut inner = self.inner.lock();
        if inner.submitted {
            return Err(FailureCause::invalid_argument(format!(
                "job {}: cannot add dependencies after submission",
                inner.name
            )));
        }
        if parent == child {
            return Err(FailureCause::invalid_argument(format!(
                "job {}: self-dependency on {parent}",
                inner.name
            )));
        }
        for endpoint in [parent, child] {
            if !inner.actions.contains_key(endpoint) {
                return Err(FailureCause::invalid_argument(format!(
                    "job {}: unknown action {endpoint}",
                    inner.name
                )));
            }
        }
        if reaches(&inner.actions, child, parent) {
            return Err(FailureCause::invalid_argument(format!(
                "job {}: dependency {parent} -> {child} would create a cycle",
                inner.name
            )));
        }
        if let Some(p) = inner.actions.get_mut(parent) {
            p.children.insert(child.to_string());
        }
        if let Some(c) = inner.actions.get_mut(child) {
            c.parents.insert(parent.to_string());
        }
        Ok(())
    }

    // -- submission ------------------------------------------------------

    pub fn mark_submitted(&self) -> Result<(), FailureCause> {
        let mut inner = self.inner.lock();
        if inner.submitted {
            return Err(FailureCause::invalid_argument(format!(
                "job {} already submitted",
                inner.name
            )));
        }
        if inner.actions.is_empty() {
            return Err(FailureCause::invalid_argument(format!(
                "job {} has no actions",
                inner.name
            )));
        }
        inner.submitted = true;
        Ok(())
    }

    /// Roll back a submission that was rejected by the service.
    pub fn unmark_submitted(&self) {
        self.inner.lock().submitted = false;
    }

    // -- dispatcher interface --------------------------------------------

    /// Promote `NotReady` actions whose parents all completed.
    pub fn refresh_ready(&self) {
        let mut inner = self.inner.lock();
        let promotable: Vec<String> = inner
            .actions
            .iter()
            .filter(|(_, a)| a.state == ActionState::NotReady)
            .filter(|(_, a)| {
                a.parents.iter().all(|p| {
                    inner
                        .actions
                        .get(p)
                        .map(|pa| pa.state == ActionState::Completed)
                        .unwrap_or(false)
                })
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in promotable {
            if let Some(action) = inner.actions.get_mut(&name) {
                action.state = ActionState::Ready;
            }
        }
    }

    /// Names of actions currently in `Ready`, in insertion order.
    pub fn ready_actions(&self) -> Vec<String> {
        self.inner
            .lock()
            .actions
            .iter()
            .filter(|(_, a)| a.state == ActionState::Ready)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Record dispatch of an action onto resources.
    pub fn record_start(
        &self,
        name: &str,
        execution_host: &str,
        physical_host: &str,
        cores: u32,
        ram: u64,
        now: SimTime,
    ) {
        if let Some(action) = self.inner.lock().actions.get_mut(name) {
            action.start_attempt(execution_host, physical_host, cores, ram, now);
        }
    }

    pub fn record_completion(&self, name: &str, now: SimTime) {
        if let Some(action) = self.inner.lock().actions.get_mut(name) {
            action.complete(now);
        }
    }

    pub fn record_failure(&self, name: &str, cause: FailureCause, now: SimTime) {
        if let Some(action) = self.inner.lock().actions.get_mut(name) {
            action.fail(cause, now);
        }
    }

    /// Kill every non-terminal action (external cancel or service death).
    pub fn kill_remaining(&self, now: SimTime) {
        let mut inner = self.inner.lock();
        for action in inner.actions.values_mut() {
            if !action.state.is_terminal() {
                action.kill(now);
            }
        }
    }

    /// Whether no action is running or could still be dispatched.
    pub fn is_settled(&self) -> bool {
        self.refresh_ready();
        let inner = self.inner.lock();
        !inner
            .actions
            .values()
            .any(|a| matches!(a.state, ActionState::Ready | ActionState::Started))
    }

    /// First recorded failure, in action insertion order.
    pub fn first_failure(&self) -> Option<(String, FailureCause)> {
        let inner = self.inner.lock();
        inner
            .actions
            .values()
            .find_map(|a| a.failure.clone().map(|c| (a.name.clone(), c)))
    }

    /// Derived job state; partial completion reported as `Failed` unless
    /// tolerated.
    pub fn state(&self) -> JobState {
        self.state_with_tolerance(false)
    }

    pub fn state_with_tolerance(&self, tolerate_partial: bool) -> JobState {
        if !self.is_submitted() {
            return JobState::NotSubmitted;
        }
        let settled = self.is_settled();
        let inner = self.inner.lock();
        let all_completed = inner
            .actions
            .values()
            .all(|a| a.state == ActionState::Completed);
        if all_completed {
            return JobState::Completed;
        }
        if !settled {
            return JobState::Pending;
        }
        let any_completed = inner
            .actions
            .values()
            .any(|a| a.state == ActionState::Completed);
        if tolerate_partial && any_completed {
            JobState::PartiallyCompleted
        } else {
            JobState::Failed
        }
    }

    /// Running custom actions, for terminate callbacks on kill paths.
    pub fn started_custom_actions(&self) -> Vec<(String, Arc<dyn CustomAction>)> {
        let inner = self.inner.lock();
        inner
            .actions
            .values()
            .filter(|a| a.state == ActionState::Started)
            .filter_map(|a| match &a.kind {
                ActionKind::Custom { custom } => Some((a.name.clone(), Arc::clone(custom))),
                _ => None,
            })
            .collect()
    }
}

impl std::fmt::Debug for CompoundJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CompoundJob")
            .field("id", &inner.id)
            .field("name", &inner.name)
            .field("actions", &inner.actions.len())
            .field("submitted", &inner.submitted)
            .finish()
    }
}

/// Is `to` reachable from `from` along child edges?
fn reaches(actions: &IndexMap<String, Action>, from: &str, to: &str) -> bool {
    let mut stack = vec![from.to_string()];
    let mut seen = BTreeSet::new();
    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if !seen.insert(current.clone()) {
            continue;
        }
        if let Some(action) = actions.get(&current) {
            stack.extend(action.children.iter().cloned());
        }
    }
    false
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
