// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-simulation context handed to every actor.
//!
//! One `SimCtx` exists per simulation instance and owns the service arena:
//! services refer to each other through stable `ServiceId`s resolved here,
//! never through direct references, so controller ↔ service and pilot ↔
//! outer-service cycles cannot form and teardown stays linear.

use crate::actor::ActorHandle;
use crate::clock::SimClock;
use crate::mailbox::{Mailbox, MailboxRegistry};
use crate::physics::Physics;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use whirr_core::{DataFile, FailureCause, Platform, ServiceId, SimTime};

/// Arena record for a registered service.
#[derive(Clone, Debug)]
pub struct ServiceEntry {
    pub id: ServiceId,
    pub name: String,
    /// Closed capability tag ("simple_storage", "proxy_storage", "batch", ...).
    pub kind: &'static str,
    pub host: String,
    /// The service's control mailbox.
    pub mailbox: String,
    pub handle: ActorHandle,
    /// Service-specific shared state, downcast via [`SimCtx::service_state`].
    pub state: Arc<dyn Any + Send + Sync>,
}

struct Inner {
    clock: SimClock,
    registry: MailboxRegistry,
    platform: Platform,
    services: Mutex<HashMap<ServiceId, ServiceEntry>>,
    next_service_id: AtomicU64,
    files: Mutex<HashMap<String, DataFile>>,
}

/// Cloneable handle on the simulation context.
#[derive(Clone)]
pub struct SimCtx {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SimCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimCtx").finish_non_exhaustive()
    }
}

impl SimCtx {
    pub fn new(platform: Platform, physics: Physics) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock: SimClock::new(),
                registry: MailboxRegistry::new(physics),
                platform,
                services: Mutex::new(HashMap::new()),
                next_service_id: AtomicU64::new(1),
                files: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn clock(&self) -> &SimClock {
        &self.inner.clock
    }

    pub fn now(&self) -> SimTime {
        self.inner.clock.now()
    }

    pub fn registry(&self) -> &MailboxRegistry {
        &self.inner.registry
    }

    pub fn platform(&self) -> &Platform {
        &self.inner.platform
    }

    // -- mailbox passthroughs --

    pub fn open_mailbox<T: Send + 'static>(
        &self,
        name: impl Into<String>,
    ) -> Result<Mailbox<T>, FailureCause> {
        self.inner.registry.open(name)
    }

    pub async fn post<T: Send + 'static>(
        &self,
        to: &str,
        msg: T,
        payload_bytes: u64,
    ) -> Result<(), FailureCause> {
        self.inner.registry.post(to, msg, payload_bytes).await
    }

    pub fn post_now<T: Send + 'static>(&self, to: &str, msg: T) -> Result<(), FailureCause> {
        self.inner.registry.post_now(to, msg)
    }

    // -- service arena --

    pub fn allocate_service_id(&self) -> ServiceId {
        ServiceId(self.inner.next_service_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn register_service(&self, entry: ServiceEntry) -> ServiceId {
        let id = entry.id;
        tracing::debug!(service = %entry.name, id = %id, kind = entry.kind, "service registered");
        self.inner.services.lock().insert(id, entry);
        id
    }

    pub fn service(&self, id: ServiceId) -> Option<ServiceEntry> {
        self.inner.services.lock().get(&id).cloned()
    }

    pub fn require_service(&self, id: ServiceId) -> Result<ServiceEntry, FailureCause> {
        self.service(id)
            .ok_or_else(|| FailureCause::service_is_down(id.to_string()))
    }

    /// Human name for error messages; falls back to the raw id.
    pub fn service_name(&self, id: ServiceId) -> String {
        self.service(id)
            .map(|e| e.name)
            .unwrap_or_else(|| id.to_string())
    }

    pub fn is_service_up(&self, id: ServiceId) -> bool {
        self.service(id).map(|e| e.handle.is_up()).unwrap_or(false)
    }

    /// Downcast a service's shared state to its concrete type.
    pub fn service_state<T: Send + Sync + 'static>(
        &self,
        id: ServiceId,
    ) -> Result<Arc<T>, FailureCause> {
        let entry = self.require_service(id)?;
        entry
            .state
            .downcast::<T>()
            .map_err(|_| FailureCause::internal(format!("service {id}: state type mismatch")))
    }

    pub fn services_of_kind(&self, kind: &str) -> Vec<ServiceEntry> {
        let mut entries: Vec<ServiceEntry> = self
            .inner
            .services
            .lock()
            .values()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    pub fn kill_service(&self, id: ServiceId) {
        if let Some(entry) = self.service(id) {
            entry.handle.kill();
        }
    }

    /// Linear teardown at the end of a run.
    pub fn kill_all_services(&self) {
        let entries: Vec<ServiceEntry> = self.inner.services.lock().values().cloned().collect();
        for entry in entries {
            entry.handle.kill();
        }
    }

    // -- files --

    /// Create a file identity; files are created once per simulation.
    pub fn add_file(&self, id: impl Into<String>, size: u64) -> Result<DataFile, FailureCause> {
        let id = id.into();
        let mut files = self.inner.files.lock();
        if files.contains_key(&id) {
            return Err(FailureCause::invalid_argument(format!(
                "file {id} already exists"
            )));
        }
        let file = DataFile::new(id.clone(), size);
        files.insert(id, file.clone());
        Ok(file)
    }

    pub fn file(&self, id: &str) -> Option<DataFile> {
        self.inner.files.lock().get(id).cloned()
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
