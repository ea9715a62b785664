// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The file registry: a directory of `file → set of locations`.
//!
//! Mutations are serialized by the registry actor; every lookup observes a
//! consistent snapshot. When a proximity service is attached, lookups are
//! sorted by distance from a reference host; otherwise insertion order is
//! preserved.

use crate::proximity::ProximityHandle;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use whirr_core::{DataFile, FailureCause, FileLocation, ServiceId};
use whirr_kernel::{answer_mailbox_name, ActorHandle, Mailbox, ServiceEntry, SimCtx, CONTROL};

/// Requests handled by the registry actor.
#[derive(Debug)]
pub enum RegistryRequest {
    Add {
        file: DataFile,
        location: FileLocation,
        answer: String,
    },
    Remove {
        file: DataFile,
        location: FileLocation,
        answer: String,
    },
    Lookup {
        file: DataFile,
        /// Sort results by proximity to this host when a proximity service
        /// is attached.
        reference_host: Option<String>,
        answer: String,
    },
    Stop {
        answer: String,
    },
}

/// Registry construction parameters.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    pub proximity: Option<ServiceId>,
}

type Directory = IndexMap<String, Vec<FileLocation>>;

/// Client handle on the file registry.
#[derive(Clone)]
pub struct FileRegistryHandle {
    ctx: SimCtx,
    id: ServiceId,
}

impl FileRegistryHandle {
    pub fn id(&self) -> ServiceId {
        self.id
    }

    async fn request(&self, build: impl FnOnce(String) -> RegistryRequest) -> Result<(), FailureCause> {
        let entry = self.ctx.require_service(self.id)?;
        if !entry.handle.is_up() {
            return Err(FailureCause::service_is_down(entry.name));
        }
        let mut answer: Mailbox<()> = self.ctx.open_mailbox(answer_mailbox_name("registry"))?;
        self.ctx
            .post(&entry.mailbox, build(answer.name().to_string()), CONTROL)
            .await?;
        answer.recv().await
    }

    pub async fn add_entry(
        &self,
        file: &DataFile,
        location: &FileLocation,
    ) -> Result<(), FailureCause> {
        let (file, location) = (file.clone(), location.clone());
        self.request(move |answer| RegistryRequest::Add {
            file,
            location,
            answer,
        })
        .await
    }

    pub async fn remove_entry(
        &self,
        file: &DataFile,
        location: &FileLocation,
    ) -> Result<(), FailureCause> {
        let (file, location) = (file.clone(), location.clone());
        self.request(move |answer| RegistryRequest::Remove {
            file,
            location,
            answer,
        })
        .await
    }

    /// Every known location of the file, in insertion order.
    pub async fn lookup(&self, file: &DataFile) -> Result<Vec<FileLocation>, FailureCause> {
        self.lookup_inner(file, None).await
    }

    /// Every known location, closest to `reference_host` first when the
    /// registry has a proximity service.
    pub async fn lookup_sorted(
        &self,
        file: &DataFile,
        reference_host: &str,
    ) -> Result<Vec<FileLocation>, FailureCause> {
        self.lookup_inner(file, Some(reference_host.to_string())).await
    }

    async fn lookup_inner(
        &self,
        file: &DataFile,
        reference_host: Option<String>,
    ) -> Result<Vec<FileLocation>, FailureCause> {
        let entry = self.ctx.require_service(self.id)?;
        if !entry.handle.is_up() {
            return Err(FailureCause::service_is_down(entry.name));
        }
        let mut answer: Mailbox<Vec<FileLocation>> =
            self.ctx.open_mailbox(answer_mailbox_name("registry-lookup"))?;
        self.ctx
            .post(
                &entry.mailbox,
                RegistryRequest::Lookup {
                    file: file.clone(),
                    reference_host,
                    answer: answer.name().to_string(),
                },
                CONTROL,
            )
            .await?;
        answer.recv().await
    }
}

/// Start the file registry actor.
pub fn start_file_registry(
    ctx: &SimCtx,
    name: &str,
    host: &str,
    config: RegistryConfig,
) -> Result<FileRegistryHandle, FailureCause> {
    ctx.platform().require_host(host)?;
    let state: Arc<Mutex<Directory>> = Arc::new(Mutex::new(IndexMap::new()));
    let mailbox_name = format!("mb-{name}");
    let mailbox: Mailbox<RegistryRequest> = ctx.open_mailbox(mailbox_name.clone())?;
    let id = ctx.allocate_service_id();

    let daemon_ctx = ctx.clone();
    let daemon_state = Arc::clone(&state);
    let proximity = config
        .proximity
        .map(|id| ProximityHandle::attach(ctx.clone(), id));
    let handle = ActorHandle::spawn(name.to_string(), host.to_string(), async move {
        daemon(daemon_ctx, daemon_state, mailbox, proximity).await;
    });

    ctx.register_service(ServiceEntry {
        id,
        name: name.to_string(),
        kind: "file_registry",
        host: host.to_string(),
        mailbox: mailbox_name,
        handle,
        state,
    });
    Ok(FileRegistryHandle {
        ctx: ctx.clone(),
        id,
    })
}

async fn daemon(
    ctx: SimCtx,
    state: Arc<Mutex<Directory>>,
    mut mailbox: Mailbox<RegistryRequest>,
    proximity: Option<ProximityHandle>,
) {
    loop {
        let Ok(msg) = mailbox.recv().await else {
            break;
        };
        match msg {
            RegistryRequest::Add {
                file,
                location,
                answer,
            } => {
                {
                    let mut directory = state.lock();
                    let locations = directory.entry(file.id().to_string()).or_default();
                    if !locations.contains(&location) {
                        locations.push(location);
                    }
                }
                let _ = ctx.post(&answer, (), CONTROL).await;
            }

            RegistryRequest::Remove {
                file,
                location,
                answer,
            } => {
                {
                    let mut directory = state.lock();
                    if let Some(locations) = directory.get_mut(file.id()) {
                        locations.retain(|l| *l != location);
                        if locations.is_empty() {
                            directory.shift_remove(file.id());
                        }
                    }
                }
                let _ = ctx.post(&answer, (), CONTROL).await;
            }

            RegistryRequest::Lookup {
                file,
                reference_host,
                answer,
            } => {
                let mut locations: Vec<FileLocation> = state
                    .lock()
                    .get(file.id())
                    .cloned()
                    .unwrap_or_default();
                if let (Some(proximity), Some(reference)) = (&proximity, &reference_host) {
                    locations.sort_by_key(|location| match location_host(&ctx, location) {
                        // A copy on the reference host itself is closest.
                        Some(host) if host == *reference => Duration::ZERO,
                        Some(host) => proximity
                            .distance(reference, &host)
                            .unwrap_or(Duration::MAX),
                        None => Duration::MAX,
                    });
                }
                let _ = ctx.post(&answer, locations, CONTROL).await;
            }

            RegistryRequest::Stop { answer } => {
                let _ = ctx.post(&answer, (), CONTROL).await;
                break;
            }
        }
    }
}

fn location_host(ctx: &SimCtx, location: &FileLocation) -> Option<String> {
    ctx.service(location.service()).map(|e| e.host)
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
