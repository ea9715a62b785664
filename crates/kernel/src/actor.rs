// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actor (daemon) lifecycle.
//!
//! An actor is a cooperatively-scheduled async routine pinned to a host:
//! down → up → down. `kill` aborts the task at its current suspension point,
//! which drops the routine's locals: mailbox receivers retire their names
//! and transfer guards publish their failure notifications from `Drop`.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActorState {
    Up,
    Down,
}

struct Inner {
    name: String,
    host: String,
    state: Arc<Mutex<ActorState>>,
    join: Mutex<Option<JoinHandle<()>>>,
    abort: AbortHandle,
}

/// Shared handle on a running actor.
#[derive(Clone)]
pub struct ActorHandle {
    inner: Arc<Inner>,
}

impl ActorHandle {
    /// Spawn an actor running `routine`. The handle reports `Up` until the
    /// routine returns or the actor is killed.
    pub fn spawn<F>(name: impl Into<String>, host: impl Into<String>, routine: F) -> ActorHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let host = host.into();
        let state = Arc::new(Mutex::new(ActorState::Up));
        let state_in_task = Arc::clone(&state);
        let task_name = name.clone();
        let join = tokio::spawn(async move {
            routine.await;
            *state_in_task.lock() = ActorState::Down;
            tracing::debug!(actor = %task_name, "actor terminated");
        });
        let abort = join.abort_handle();
        ActorHandle {
            inner: Arc::new(Inner {
                name,
                host,
                state,
                join: Mutex::new(Some(join)),
                abort,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn is_up(&self) -> bool {
        *self.inner.state.lock() == ActorState::Up && !self.inner.abort.is_finished()
    }

    /// Instant, irrevocable termination.
    pub fn kill(&self) {
        *self.inner.state.lock() = ActorState::Down;
        self.inner.abort.abort();
        tracing::debug!(actor = %self.inner.name, "actor killed");
    }

    /// Await termination (normal return or kill). Idempotent; later calls
    /// return immediately.
    pub async fn join(&self) {
        let handle = self.inner.join.lock().take();
        if let Some(handle) = handle {
            // An aborted task resolves with a JoinError; either way it is down.
            let _ = handle.await;
        }
        *self.inner.state.lock() = ActorState::Down;
    }
}

impl std::fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHandle")
            .field("name", &self.inner.name)
            .field("host", &self.inner.host)
            .field("up", &self.is_up())
            .finish()
    }
}

/// Helper actors owned by a service, aborted together when the owner dies.
///
/// Holding this inside the owning actor's routine means a `kill` of the
/// owner tears down its in-flight transfer threads as well.
#[derive(Default)]
pub struct ChildTasks {
    children: Vec<ActorHandle>,
}

impl ChildTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adopt(&mut self, child: ActorHandle) {
        // Opportunistically forget finished children so long-lived services
        // don't accumulate handles.
        self.children.retain(|c| c.is_up());
        self.children.push(child);
    }

    pub fn live_count(&self) -> usize {
        self.children.iter().filter(|c| c.is_up()).count()
    }

    pub fn kill_all(&mut self) {
        for child in self.children.drain(..) {
            child.kill();
        }
    }
}

impl Drop for ChildTasks {
    fn drop(&mut self) {
        self.kill_all();
    }
}

#[cfg(test)]
#[path = "actor_tests.rs"]
mod tests;
