// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side storage operations.
//!
//! Storage services come in a closed set of kinds; every public operation
//! dispatches on the kind tag and bottoms out in the wire protocol against
//! a simple storage daemon. A handle routes an operation to whatever
//! service the location actually names, so callers can hold any handle and
//! use locations freely.

use crate::compound;
use crate::messages::{Credit, FileChunk, ReadReply, StorageRequest, TransferOutcome, WriteReply};
use crate::proxy;
use crate::store::StoreState;
use parking_lot::Mutex;
use whirr_core::{DataFile, FailureCause, FileLocation, ServiceId};
use whirr_kernel::{answer_mailbox_name, Mailbox, ServiceEntry, SimCtx, CONTROL};

/// Closed capability tag over storage services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Simple,
    Proxy,
    Compound,
}

impl StorageKind {
    pub fn from_tag(tag: &str) -> Option<StorageKind> {
        match tag {
            "simple_storage" => Some(StorageKind::Simple),
            "proxy_storage" => Some(StorageKind::Proxy),
            "compound_storage" => Some(StorageKind::Compound),
            _ => None,
        }
    }
}

/// Cloneable client handle on a storage service.
#[derive(Clone)]
pub struct StorageHandle {
    ctx: SimCtx,
    id: ServiceId,
}

impl StorageHandle {
    pub(crate) fn new(ctx: SimCtx, id: ServiceId) -> Self {
        Self { ctx, id }
    }

    /// Handle on an already-registered storage service.
    pub fn attach(ctx: SimCtx, id: ServiceId) -> Self {
        Self { ctx, id }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    pub fn name(&self) -> String {
        self.ctx.service_name(self.id)
    }

    pub(crate) fn ctx(&self) -> &SimCtx {
        &self.ctx
    }

    pub fn kind(&self) -> Result<StorageKind, FailureCause> {
        let entry = self.entry()?;
        StorageKind::from_tag(entry.kind).ok_or_else(|| {
            FailureCause::internal(format!("{} is not a storage service", entry.name))
        })
    }

    /// A location on this service.
    pub fn location(&self, mountpoint: &str, path: &str) -> FileLocation {
        FileLocation::new(self.id, mountpoint, path)
    }

    /// The service's default location for a file: primary mount, path = id.
    pub fn default_location(&self, file: &DataFile) -> Result<FileLocation, FailureCause> {
        match self.kind()? {
            StorageKind::Simple => {
                let state = self.store_state()?;
                let mount = state
                    .lock()
                    .primary_mount()
                    .map(str::to_string)
                    .ok_or_else(|| FailureCause::internal("service has no mountpoints"))?;
                Ok(FileLocation::new(self.id, mount, file.id()))
            }
            StorageKind::Compound => compound::default_location(self, file),
            StorageKind::Proxy => proxy::default_location(&self.ctx, self.id, file),
        }
    }

    fn entry(&self) -> Result<ServiceEntry, FailureCause> {
        let entry = self.ctx.require_service(self.id)?;
        if !entry.handle.is_up() {
            return Err(FailureCause::service_is_down(entry.name));
        }
        Ok(entry)
    }

    pub(crate) fn store_state(&self) -> Result<std::sync::Arc<Mutex<StoreState>>, FailureCause> {
        self.ctx.service_state::<Mutex<StoreState>>(self.id)
    }

    /// The handle the location actually addresses (its proxy when an
    /// overlay is present).
    fn effective(&self, location: &FileLocation) -> StorageHandle {
        let target = location
            .proxy()
            .map(|o| o.proxy)
            .unwrap_or_else(|| location.service());
        if target == self.id {
            self.clone()
        } else {
            StorageHandle::new(self.ctx.clone(), target)
        }
    }

    // -- public contract -------------------------------------------------

    /// Does the file exist at this location?
    pub async fn lookup(&self, location: &FileLocation) -> Result<bool, FailureCause> {
        let here = self.effective(location);
        match here.kind()? {
            StorageKind::Simple => here.protocol_lookup(location).await,
            StorageKind::Proxy => proxy::lookup(&here, location).await,
            StorageKind::Compound => compound::lookup(&here, location).await,
        }
    }

    /// Read the whole file at a location; suspends until the bytes arrived.
    pub async fn read(&self, location: &FileLocation) -> Result<(), FailureCause> {
        self.read_inner(location, None).await
    }

    /// Read the first `num_bytes` of the file at a location.
    pub async fn read_bytes(
        &self,
        location: &FileLocation,
        num_bytes: u64,
    ) -> Result<(), FailureCause> {
        self.read_inner(location, Some(num_bytes)).await
    }

    async fn read_inner(
        &self,
        location: &FileLocation,
        num_bytes: Option<u64>,
    ) -> Result<(), FailureCause> {
        let here = self.effective(location);
        match here.kind()? {
            StorageKind::Simple => here.protocol_read(location, num_bytes).await,
            StorageKind::Proxy => proxy::read(&here, location, num_bytes).await,
            StorageKind::Compound => compound::read(&here, location, num_bytes).await,
        }
    }

    /// Write a file to a location, reserving space eagerly.
    pub async fn write(
        &self,
        file: &DataFile,
        location: &FileLocation,
    ) -> Result<(), FailureCause> {
        let here = self.effective(location);
        match here.kind()? {
            StorageKind::Simple => here.protocol_write(file, location).await,
            StorageKind::Proxy => proxy::write(&here, file, location).await,
            StorageKind::Compound => compound::write(&here, file, location).await,
        }
    }

    /// Copy between two locations. Equivalent to read + write but a single
    /// transfer when both endpoints live on one service.
    pub async fn copy(
        &self,
        src: &FileLocation,
        dst: &FileLocation,
    ) -> Result<(), FailureCause> {
        // Proxy-addressed endpoints resolve to their backing remotes.
        let src = proxy::resolve_location(&self.ctx, src)?;
        let dst = proxy::resolve_location(&self.ctx, dst)?;
        let dst_handle = self.effective(&dst);
        let dst_entry = dst_handle.entry()?;

        let mut answer: Mailbox<TransferOutcome> =
            self.ctx.open_mailbox(answer_mailbox_name("copy"))?;
        self.ctx
            .post(
                &dst_entry.mailbox,
                StorageRequest::Copy {
                    src,
                    dst,
                    answer: answer.name().to_string(),
                },
                CONTROL,
            )
            .await?;
        answer.recv().await?.into_result()
    }

    /// Idempotent delete.
    pub async fn delete(&self, location: &FileLocation) -> Result<(), FailureCause> {
        let here = self.effective(location);
        match here.kind()? {
            StorageKind::Simple => here.protocol_delete(location).await,
            StorageKind::Proxy => proxy::delete(&here, location).await,
            StorageKind::Compound => compound::delete(&here, location).await,
        }
    }

    /// Instantly place a file at a location (initial-state seeding; no
    /// simulated time). Rejected on proxies: the caller must choose the
    /// cache or the remote explicitly.
    pub fn create_file(
        &self,
        file: &DataFile,
        location: &FileLocation,
    ) -> Result<(), FailureCause> {
        let here = self.effective(location);
        match here.kind()? {
            StorageKind::Simple => {
                let state = here.store_state()?;
                let mut s = state.lock();
                s.create_file(file.clone(), location, here.ctx.now())
            }
            StorageKind::Proxy => Err(FailureCause::invalid_argument(
                "create_file on a proxy is ambiguous: target its cache or its remote",
            )),
            StorageKind::Compound => compound::create_file(&here, file, location),
        }
    }

    /// Seed a file at the service's default location.
    pub fn create_file_here(&self, file: &DataFile) -> Result<FileLocation, FailureCause> {
        let location = self.default_location(file)?;
        self.create_file(file, &location)?;
        Ok(location)
    }

    /// Synchronous state peek: is the file at this exact location?
    pub fn has_file(&self, location: &FileLocation) -> bool {
        let here = self.effective(location);
        match here.kind() {
            Ok(StorageKind::Simple) => here
                .store_state()
                .map(|s| s.lock().has_file(location))
                .unwrap_or(false),
            Ok(StorageKind::Proxy) => proxy::has_file(&here, location),
            Ok(StorageKind::Compound) => compound::has_file(&here, location),
            Err(_) => false,
        }
    }

    /// Synchronous state peek: does the service hold the file anywhere?
    pub fn holds_file(&self, file_id: &str) -> bool {
        match self.kind() {
            Ok(StorageKind::Simple) => self
                .store_state()
                .map(|s| s.lock().holds_file(file_id))
                .unwrap_or(false),
            Ok(StorageKind::Proxy) => proxy::holds_file(self, file_id),
            Ok(StorageKind::Compound) => compound::holds_file(self, file_id),
            Err(_) => false,
        }
    }

    /// Free bytes on a mountpoint (capacity − committed − reserved).
    pub fn free_space(&self, mountpoint: &str) -> u64 {
        match self.kind() {
            Ok(StorageKind::Simple) => self
                .store_state()
                .map(|s| s.lock().free_space(mountpoint))
                .unwrap_or(0),
            Ok(StorageKind::Proxy) => proxy::cache_free_space(self, mountpoint),
            Ok(StorageKind::Compound) => compound::free_space(self, mountpoint),
            Err(_) => 0,
        }
    }

    // -- wire protocol against a simple storage daemon -------------------

    pub(crate) async fn protocol_lookup(
        &self,
        location: &FileLocation,
    ) -> Result<bool, FailureCause> {
        let entry = self.entry()?;
        let mut answer: Mailbox<bool> = self.ctx.open_mailbox(answer_mailbox_name("lookup"))?;
        self.ctx
            .post(
                &entry.mailbox,
                StorageRequest::Lookup {
                    location: location.clone(),
                    answer: answer.name().to_string(),
                },
                CONTROL,
            )
            .await?;
        answer.recv().await
    }

    pub(crate) async fn protocol_read(
        &self,
        location: &FileLocation,
        num_bytes: Option<u64>,
    ) -> Result<(), FailureCause> {
        let entry = self.entry()?;
        let mut data: Mailbox<FileChunk> = self.ctx.open_mailbox(answer_mailbox_name("read-data"))?;
        let mut reply: Mailbox<ReadReply> =
            self.ctx.open_mailbox(answer_mailbox_name("read-reply"))?;
        let mut answer: Mailbox<TransferOutcome> =
            self.ctx.open_mailbox(answer_mailbox_name("read"))?;

        self.ctx
            .post(
                &entry.mailbox,
                StorageRequest::Read {
                    location: location.clone(),
                    num_bytes,
                    data: data.name().to_string(),
                    reply: reply.name().to_string(),
                    answer: answer.name().to_string(),
                },
                CONTROL,
            )
            .await?;

        match reply.recv().await? {
            ReadReply::Rejected { cause } => return Err(cause),
            ReadReply::Accepted { .. } => {}
        }

        // Drain chunks while watching the answer mailbox: a failed or
        // killed transfer publishes its outcome without a final chunk.
        let mut received_last = false;
        while !received_last {
            tokio::select! {
                chunk = data.recv() => {
                    let chunk = chunk?;
                    if let Some(credit) = &chunk.credit {
                        self.ctx.post(credit, Credit, CONTROL).await?;
                    }
                    received_last = chunk.last;
                }
                outcome = answer.recv() => {
                    return outcome?.into_result();
                }
            }
        }
        answer.recv().await?.into_result()
    }

    pub(crate) async fn protocol_write(
        &self,
        file: &DataFile,
        location: &FileLocation,
    ) -> Result<(), FailureCause> {
        let entry = self.entry()?;
        let mut reply: Mailbox<WriteReply> =
            self.ctx.open_mailbox(answer_mailbox_name("write-reply"))?;
        let mut answer: Mailbox<TransferOutcome> =
            self.ctx.open_mailbox(answer_mailbox_name("write"))?;

        self.ctx
            .post(
                &entry.mailbox,
                StorageRequest::Write {
                    file: file.clone(),
                    location: location.clone(),
                    reply: reply.name().to_string(),
                    answer: answer.name().to_string(),
                },
                CONTROL,
            )
            .await?;

        let (data, chunk_size) = match reply.recv().await? {
            WriteReply::Rejected { cause } => return Err(cause),
            WriteReply::Accepted { data, chunk_size } => (data, chunk_size),
        };

        match chunk_size {
            None => {
                self.ctx
                    .post(
                        &data,
                        FileChunk {
                            bytes: file.size(),
                            last: true,
                            credit: None,
                        },
                        file.size(),
                    )
                    .await?;
            }
            Some(buffer_size) => {
                let mut credit: Mailbox<Credit> =
                    self.ctx.open_mailbox(answer_mailbox_name("write-credit"))?;
                let mut remaining = file.size();
                loop {
                    let chunk = remaining.min(buffer_size.max(1));
                    remaining -= chunk;
                    let last = remaining == 0;
                    self.ctx
                        .post(
                            &data,
                            FileChunk {
                                bytes: chunk,
                                last,
                                credit: Some(credit.name().to_string()),
                            },
                            chunk,
                        )
                        .await?;
                    // Wait for the chunk's credit, bailing out if the
                    // service published a failure instead.
                    tokio::select! {
                        got = credit.recv() => { got?; }
                        outcome = answer.recv() => {
                            return outcome?.into_result();
                        }
                    }
                    if last {
                        break;
                    }
                }
            }
        }
        answer.recv().await?.into_result()
    }

    pub(crate) async fn protocol_delete(
        &self,
        location: &FileLocation,
    ) -> Result<(), FailureCause> {
        let entry = self.entry()?;
        let mut answer: Mailbox<Result<(), FailureCause>> =
            self.ctx.open_mailbox(answer_mailbox_name("delete"))?;
        self.ctx
            .post(
                &entry.mailbox,
                StorageRequest::Delete {
                    location: location.clone(),
                    answer: answer.name().to_string(),
                },
                CONTROL,
            )
            .await?;
        answer.recv().await?
    }
}

impl std::fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandle")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}

// -- backing-service operations ------------------------------------------
//
// Proxies delegate to their cache and remotes through these, which only
// accept simple and compound backings. Keeping the proxy out of its own
// backing set bounds the dispatch depth.

pub(crate) async fn backing_read(
    handle: &StorageHandle,
    location: &FileLocation,
    num_bytes: Option<u64>,
) -> Result<(), FailureCause> {
    match handle.kind()? {
        StorageKind::Simple => handle.protocol_read(location, num_bytes).await,
        StorageKind::Compound => compound::read(handle, location, num_bytes).await,
        StorageKind::Proxy => Err(FailureCause::internal("a proxy cannot back a proxy")),
    }
}

pub(crate) async fn backing_write(
    handle: &StorageHandle,
    file: &DataFile,
    location: &FileLocation,
) -> Result<(), FailureCause> {
    match handle.kind()? {
        StorageKind::Simple => handle.protocol_write(file, location).await,
        StorageKind::Compound => compound::write(handle, file, location).await,
        StorageKind::Proxy => Err(FailureCause::internal("a proxy cannot back a proxy")),
    }
}

pub(crate) async fn backing_delete(
    handle: &StorageHandle,
    location: &FileLocation,
) -> Result<(), FailureCause> {
    match handle.kind()? {
        StorageKind::Simple => handle.protocol_delete(location).await,
        StorageKind::Compound => compound::delete(handle, location).await,
        StorageKind::Proxy => Err(FailureCause::internal("a proxy cannot back a proxy")),
    }
}

pub(crate) async fn backing_lookup(
    handle: &StorageHandle,
    location: &FileLocation,
) -> Result<bool, FailureCause> {
    match handle.kind()? {
        StorageKind::Simple => handle.protocol_lookup(location).await,
        StorageKind::Compound => compound::lookup(handle, location).await,
        StorageKind::Proxy => Err(FailureCause::internal("a proxy cannot back a proxy")),
    }
}

/// Park-and-reject daemon for façade services (proxy, compound) whose
/// operations are orchestrated on the caller's side: direct wire requests
/// are answered with an error rather than left hanging.
pub(crate) async fn answer_misuse_daemon(
    ctx: SimCtx,
    name: String,
    mut mailbox: Mailbox<StorageRequest>,
) {
    loop {
        let Ok(msg) = mailbox.recv().await else {
            break;
        };
        let misuse = FailureCause::invalid_argument(format!(
            "{name}: address the backing storage services directly"
        ));
        match msg {
            StorageRequest::Stop { answer } => {
                let _ = ctx.post(&answer, (), CONTROL).await;
                break;
            }
            StorageRequest::Lookup { answer, .. } => {
                let _ = ctx.post(&answer, false, CONTROL).await;
            }
            StorageRequest::Read { reply, .. } => {
                let _ = ctx
                    .post(&reply, ReadReply::Rejected { cause: misuse }, CONTROL)
                    .await;
            }
            StorageRequest::Write { reply, .. } => {
                let _ = ctx
                    .post(&reply, WriteReply::Rejected { cause: misuse }, CONTROL)
                    .await;
            }
            StorageRequest::Copy { answer, .. } => {
                let _ = ctx
                    .post(&answer, TransferOutcome::failed(misuse), CONTROL)
                    .await;
            }
            StorageRequest::Delete { answer, .. } => {
                let _ = ctx
                    .post(&answer, Err::<(), FailureCause>(misuse), CONTROL)
                    .await;
            }
            StorageRequest::TransferDone { .. } => {}
        }
    }
}
