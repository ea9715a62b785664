// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compound storage: one façade over several simple storage services.
//!
//! New files land on a target chosen by the configured selection method;
//! existing files are found by scanning the targets. Targets must be
//! simple services, which keeps dispatch one level deep.

use crate::service::{StorageHandle, StorageKind};
use crate::store::StoreState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use whirr_core::{DataFile, FailureCause, FileLocation, ServiceId};
use whirr_kernel::{Mailbox, ServiceEntry, SimCtx};

use crate::messages::StorageRequest;
use whirr_kernel::ActorHandle;

/// The `STORAGE_SELECTION_METHOD` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageSelection {
    /// Caller pre-assigns files to targets via [`assign_file`].
    External,
    #[default]
    RoundRobin,
    /// Most free space on the target's primary mount wins.
    LeastLoaded,
}

impl StorageSelection {
    pub fn from_key(key: &str) -> Result<Self, FailureCause> {
        match key {
            "external" => Ok(Self::External),
            "round_robin" => Ok(Self::RoundRobin),
            "least_loaded" => Ok(Self::LeastLoaded),
            other => Err(FailureCause::invalid_argument(format!(
                "unknown STORAGE_SELECTION_METHOD {other}"
            ))),
        }
    }
}

/// Compound construction parameters.
#[derive(Debug, Clone)]
pub struct CompoundStorageConfig {
    pub targets: Vec<ServiceId>,
    pub selection: StorageSelection,
}

pub(crate) struct CompoundState {
    targets: Vec<ServiceId>,
    selection: StorageSelection,
    rr_next: Mutex<usize>,
    assignments: Mutex<HashMap<String, ServiceId>>,
}

/// Start a compound storage service over already-running simple targets.
pub fn start_compound_storage(
    ctx: &SimCtx,
    name: &str,
    host: &str,
    config: CompoundStorageConfig,
) -> Result<StorageHandle, FailureCause> {
    if config.targets.is_empty() {
        return Err(FailureCause::invalid_argument(format!(
            "compound storage {name}: at least one target required"
        )));
    }
    for target in &config.targets {
        let entry = ctx.require_service(*target)?;
        if StorageKind::from_tag(entry.kind) != Some(StorageKind::Simple) {
            return Err(FailureCause::invalid_argument(format!(
                "compound storage {name}: target {} must be a simple storage service",
                entry.name
            )));
        }
    }

    let state = Arc::new(CompoundState {
        targets: config.targets,
        selection: config.selection,
        rr_next: Mutex::new(0),
        assignments: Mutex::new(HashMap::new()),
    });
    let mailbox_name = format!("mb-{name}");
    let mailbox: Mailbox<StorageRequest> = ctx.open_mailbox(mailbox_name.clone())?;
    let id = ctx.allocate_service_id();

    let daemon_ctx = ctx.clone();
    let daemon_name = name.to_string();
    let handle = ActorHandle::spawn(name.to_string(), host.to_string(), async move {
        crate::service::answer_misuse_daemon(daemon_ctx, daemon_name, mailbox).await;
    });

    ctx.register_service(ServiceEntry {
        id,
        name: name.to_string(),
        kind: "compound_storage",
        host: host.to_string(),
        mailbox: mailbox_name,
        handle,
        state,
    });
    Ok(StorageHandle::new(ctx.clone(), id))
}

/// Pre-assign a file to a target (external selection).
pub fn assign_file(
    handle: &StorageHandle,
    file: &DataFile,
    target: ServiceId,
) -> Result<(), FailureCause> {
    let state = compound_state(handle)?;
    if !state.targets.contains(&target) {
        return Err(FailureCause::invalid_argument(format!(
            "{}: {target} is not one of the targets",
            handle.name()
        )));
    }
    state
        .assignments
        .lock()
        .insert(file.id().to_string(), target);
    Ok(())
}

fn compound_state(handle: &StorageHandle) -> Result<Arc<CompoundState>, FailureCause> {
    handle.ctx().service_state::<CompoundState>(handle.id())
}

fn target_store(
    ctx: &SimCtx,
    target: ServiceId,
) -> Result<Arc<Mutex<StoreState>>, FailureCause> {
    ctx.service_state::<Mutex<StoreState>>(target)
}

/// A target's location for `path`: its primary mount.
fn target_location(
    ctx: &SimCtx,
    target: ServiceId,
    path: &str,
) -> Result<FileLocation, FailureCause> {
    let store = target_store(ctx, target)?;
    let mount = store
        .lock()
        .primary_mount()
        .map(str::to_string)
        .ok_or_else(|| FailureCause::internal("target has no mountpoints"))?;
    Ok(FileLocation::new(target, mount, path))
}

/// Which target currently holds `path`, with its location there.
fn find_holder(
    handle: &StorageHandle,
    path: &str,
) -> Result<Option<(ServiceId, FileLocation)>, FailureCause> {
    let state = compound_state(handle)?;
    for target in &state.targets {
        let location = target_location(handle.ctx(), *target, path)?;
        if target_store(handle.ctx(), *target)?.lock().has_file(&location) {
            return Ok(Some((*target, location)));
        }
    }
    Ok(None)
}

/// Pick the target a new file lands on.
fn select_target(
    handle: &StorageHandle,
    file: &DataFile,
) -> Result<ServiceId, FailureCause> {
    let state = compound_state(handle)?;
    match state.selection {
        StorageSelection::External => state
            .assignments
            .lock()
            .get(file.id())
            .copied()
            .ok_or_else(|| {
                FailureCause::invalid_argument(format!(
                    "{}: no external assignment for {}",
                    handle.name(),
                    file.id()
                ))
            }),
        StorageSelection::RoundRobin => {
            let mut next = state.rr_next.lock();
            let target = state.targets[*next % state.targets.len()];
            *next += 1;
            Ok(target)
        }
        StorageSelection::LeastLoaded => {
            let ctx = handle.ctx();
            let mut best: Option<(u64, ServiceId)> = None;
            for target in &state.targets {
                let store = target_store(ctx, *target)?;
                let free = {
                    let s = store.lock();
                    s.primary_mount()
                        .map(|m| s.free_space(m))
                        .unwrap_or(0)
                };
                if best.map(|(b, _)| free > b).unwrap_or(true) {
                    best = Some((free, *target));
                }
            }
            best.map(|(_, t)| t)
                .ok_or_else(|| FailureCause::internal("no targets"))
        }
    }
}

/// Default location for a file on the façade: first target's primary
/// mount, path = file id, addressed to the compound service.
pub(crate) fn default_location(
    handle: &StorageHandle,
    file: &DataFile,
) -> Result<FileLocation, FailureCause> {
    let state = compound_state(handle)?;
    let first = *state
        .targets
        .first()
        .ok_or_else(|| FailureCause::internal("no targets"))?;
    let backing = target_location(handle.ctx(), first, file.id())?;
    Ok(FileLocation::new(
        handle.id(),
        backing.mountpoint(),
        file.id(),
    ))
}

pub(crate) fn stored_file_at(
    handle: &StorageHandle,
    location: &FileLocation,
) -> Option<DataFile> {
    let (_, there) = find_holder(handle, location.path()).ok()??;
    target_store(handle.ctx(), there.service())
        .ok()?
        .lock()
        .file_at(&there)
}

pub(crate) async fn read(
    handle: &StorageHandle,
    location: &FileLocation,
    num_bytes: Option<u64>,
) -> Result<(), FailureCause> {
    match find_holder(handle, location.path())? {
        Some((target, there)) => {
            StorageHandle::new(handle.ctx().clone(), target)
                .protocol_read(&there, num_bytes)
                .await
        }
        None => Err(FailureCause::file_not_found(location.object_key())),
    }
}

pub(crate) async fn write(
    handle: &StorageHandle,
    file: &DataFile,
    location: &FileLocation,
) -> Result<(), FailureCause> {
    // Overwrites follow the existing copy; fresh files go to the selected
    // target.
    let (target, there) = match find_holder(handle, location.path())? {
        Some(found) => found,
        None => {
            let target = select_target(handle, file)?;
            (target, target_location(handle.ctx(), target, location.path())?)
        }
    };
    state_record_assignment(handle, file, target);
    StorageHandle::new(handle.ctx().clone(), target)
        .protocol_write(file, &there)
        .await
}

fn state_record_assignment(handle: &StorageHandle, file: &DataFile, target: ServiceId) {
    if let Ok(state) = compound_state(handle) {
        state
            .assignments
            .lock()
            .insert(file.id().to_string(), target);
    }
}

pub(crate) async fn delete(
    handle: &StorageHandle,
    location: &FileLocation,
) -> Result<(), FailureCause> {
    match find_holder(handle, location.path())? {
        Some((target, there)) => {
            StorageHandle::new(handle.ctx().clone(), target)
                .protocol_delete(&there)
                .await
        }
        None => Ok(()),
    }
}

pub(crate) async fn lookup(
    handle: &StorageHandle,
    location: &FileLocation,
) -> Result<bool, FailureCause> {
    match find_holder(handle, location.path())? {
        Some((target, there)) => {
            StorageHandle::new(handle.ctx().clone(), target)
                .protocol_lookup(&there)
                .await
        }
        None => Ok(false),
    }
}

pub(crate) fn create_file(
    handle: &StorageHandle,
    file: &DataFile,
    location: &FileLocation,
) -> Result<(), FailureCause> {
    let target = select_target(handle, file)?;
    let there = target_location(handle.ctx(), target, location.path())?;
    state_record_assignment(handle, file, target);
    target_store(handle.ctx(), target)?
        .lock()
        .create_file(file.clone(), &there, handle.ctx().now())
}

pub(crate) fn has_file(handle: &StorageHandle, location: &FileLocation) -> bool {
    find_holder(handle, location.path())
        .map(|h| h.is_some())
        .unwrap_or(false)
}

pub(crate) fn holds_file(handle: &StorageHandle, file_id: &str) -> bool {
    let Ok(state) = compound_state(handle) else {
        return false;
    };
    state.targets.iter().any(|target| {
        target_store(handle.ctx(), *target)
            .map(|s| s.lock().holds_file(file_id))
            .unwrap_or(false)
    })
}

pub(crate) fn free_space(handle: &StorageHandle, mountpoint: &str) -> u64 {
    let Ok(state) = compound_state(handle) else {
        return 0;
    };
    state
        .targets
        .iter()
        .map(|target| {
            target_store(handle.ctx(), *target)
                .map(|s| s.lock().free_space(mountpoint))
                .unwrap_or(0)
        })
        .sum()
}

#[cfg(test)]
#[path = "compound_tests.rs"]
mod tests;
