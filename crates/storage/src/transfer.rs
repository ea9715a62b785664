// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot file-transfer threads.
//!
//! Every file-moving request spawns one of these: one source side, one
//! destination side, each either a mailbox (the network) or a local
//! location (a disk, possibly through the host's page cache). The thread
//! reports back to its parent service, which finalizes space accounting
//! and forwards the outcome to the caller's answer mailboxes.
//!
//! If the thread is killed mid-flight (its parent died), a drop guard
//! publishes `ServiceIsDown` on every pending answer mailbox.

use crate::memory::memory_manager_for;
use crate::messages::{
    AnswerSet, Credit, FileChunk, ReadReply, StorageRequest, TransferOp, TransferOutcome,
};
use whirr_core::{DataFile, FailureCause, FileLocation, Disk};
use whirr_kernel::{answer_mailbox_name, ActorHandle, Mailbox, MailboxRegistry, SimCtx, CONTROL};

/// One side of a transfer.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// A disk-backed location on `host`.
    Local { host: String, location: FileLocation },
    /// A named mailbox streaming to/from the network.
    Mailbox { name: String },
}

/// Everything a transfer thread needs to run.
#[derive(Debug, Clone)]
pub struct TransferSpec {
    pub op: TransferOp,
    pub file: DataFile,
    pub num_bytes: u64,
    pub src: Endpoint,
    pub dst: Endpoint,
    /// `None` transfers the payload as a single zero-copy block.
    pub buffer_size: Option<u64>,
    pub answers: AnswerSet,
}

impl TransferSpec {
    /// The location whose accounting the parent finalizes on completion:
    /// the destination for writes and copies, the source for reads.
    pub fn finalize_location(&self) -> FileLocation {
        let endpoint = match self.op {
            TransferOp::Read => &self.src,
            TransferOp::Write | TransferOp::Copy => &self.dst,
        };
        match endpoint {
            Endpoint::Local { location, .. } => location.clone(),
            Endpoint::Mailbox { .. } => match (&self.src, &self.dst) {
                (Endpoint::Local { location, .. }, _) | (_, Endpoint::Local { location, .. }) => {
                    location.clone()
                }
                _ => FileLocation::new(whirr_core::ServiceId(0), "/", self.file.id()),
            },
        }
    }
}

/// The parent service a thread reports to.
#[derive(Debug, Clone)]
pub struct TransferParent {
    pub name: String,
    pub mailbox: String,
    pub host: String,
}

/// Publishes `ServiceIsDown` to the pending answer mailboxes unless the
/// transfer reached its normal notification path.
struct OutcomeGuard {
    registry: MailboxRegistry,
    answers: AnswerSet,
    service: String,
    armed: bool,
}

impl OutcomeGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for mailbox in self.answers.mailboxes() {
            let _ = self.registry.post_now(
                mailbox,
                TransferOutcome::failed(FailureCause::service_is_down(self.service.clone())),
            );
        }
    }
}

/// Spawn a one-shot transfer thread.
///
/// `inbox` carries the receiving side of the data mailbox for transfers
/// whose source is the network (writes).
pub fn spawn_transfer(
    ctx: &SimCtx,
    parent: TransferParent,
    spec: TransferSpec,
    inbox: Option<Mailbox<FileChunk>>,
) -> ActorHandle {
    let ctx = ctx.clone();
    let name = format!("ftt-{}-{}", parent.name, spec.file.id());
    let host = parent.host.clone();
    ActorHandle::spawn(name, host, async move {
        let mut guard = OutcomeGuard {
            registry: ctx.registry().clone(),
            answers: spec.answers.clone(),
            service: parent.name.clone(),
            armed: true,
        };
        let result = run_transfer(&ctx, &spec, inbox).await;
        let outcome = match result {
            Ok(()) => TransferOutcome::ok(),
            Err(cause) => TransferOutcome::failed(cause),
        };
        guard.disarm();
        let done = StorageRequest::TransferDone {
            op: spec.op,
            file: spec.file.clone(),
            location: spec.finalize_location(),
            outcome,
            answers: spec.answers.clone(),
        };
        if ctx.post_now(&parent.mailbox, done).is_err() {
            // Parent died while we were finishing; the caller still needs
            // an answer.
            for mailbox in spec.answers.mailboxes() {
                let _ = ctx.post_now(
                    mailbox,
                    TransferOutcome::failed(FailureCause::service_is_down(parent.name.clone())),
                );
            }
        }
    })
}

async fn run_transfer(
    ctx: &SimCtx,
    spec: &TransferSpec,
    inbox: Option<Mailbox<FileChunk>>,
) -> Result<(), FailureCause> {
    match (&spec.src, &spec.dst) {
        (Endpoint::Local { host, location }, Endpoint::Mailbox { name }) => {
            send_local_file_to_network(ctx, spec, host, location, name).await
        }
        (Endpoint::Mailbox { .. }, Endpoint::Local { host, location }) => {
            let inbox = inbox.ok_or_else(|| {
                FailureCause::internal("network-source transfer without a data mailbox")
            })?;
            receive_file_from_network(ctx, spec, host, location, inbox).await
        }
        (
            Endpoint::Local {
                host: src_host,
                location: src_location,
            },
            Endpoint::Local {
                host: dst_host,
                location: dst_location,
            },
        ) => {
            local_read(ctx, src_host, src_location, &spec.file, spec.num_bytes).await?;
            local_write(ctx, dst_host, dst_location, &spec.file, spec.num_bytes).await
        }
        (Endpoint::Mailbox { .. }, Endpoint::Mailbox { .. }) => Err(FailureCause::internal(
            "transfer with two network endpoints",
        )),
    }
}

/// Read side: disk (or page cache) to the network, chunked when buffered.
async fn send_local_file_to_network(
    ctx: &SimCtx,
    spec: &TransferSpec,
    host: &str,
    location: &FileLocation,
    data_mailbox: &str,
) -> Result<(), FailureCause> {
    match spec.buffer_size {
        None => {
            local_read(ctx, host, location, &spec.file, spec.num_bytes).await?;
            ctx.post(
                data_mailbox,
                FileChunk {
                    bytes: spec.num_bytes,
                    last: true,
                    credit: None,
                },
                spec.num_bytes,
            )
            .await
        }
        Some(buffer_size) => {
            let mut credit: Mailbox<Credit> = ctx.open_mailbox(answer_mailbox_name("credit"))?;
            let mut remaining = spec.num_bytes;
            loop {
                let chunk = remaining.min(buffer_size.max(1));
                remaining -= chunk;
                let last = remaining == 0;
                local_read(ctx, host, location, &spec.file, chunk).await?;
                ctx.post(
                    data_mailbox,
                    FileChunk {
                        bytes: chunk,
                        last,
                        credit: Some(credit.name().to_string()),
                    },
                    chunk,
                )
                .await?;
                credit.recv().await?;
                if last {
                    break;
                }
            }
            Ok(())
        }
    }
}

/// Write side: the network into a disk (or the page cache, written back
/// later by pdflush).
async fn receive_file_from_network(
    ctx: &SimCtx,
    spec: &TransferSpec,
    host: &str,
    location: &FileLocation,
    mut inbox: Mailbox<FileChunk>,
) -> Result<(), FailureCause> {
    let mut received = 0u64;
    loop {
        let chunk = inbox.recv().await?;
        received += chunk.bytes;
        local_write(ctx, host, location, &spec.file, chunk.bytes).await?;
        if let Some(credit) = &chunk.credit {
            ctx.post(credit, Credit, CONTROL).await?;
        }
        if chunk.last {
            break;
        }
    }
    if received < spec.num_bytes {
        return Err(FailureCause::network_error(format!(
            "short transfer: {received} of {} bytes",
            spec.num_bytes
        )));
    }
    Ok(())
}

fn disk_for<'p>(
    ctx: &'p SimCtx,
    host: &str,
    location: &FileLocation,
) -> Result<&'p Disk, FailureCause> {
    ctx.platform()
        .require_host(host)?
        .disk_at(location.mountpoint())
        .ok_or_else(|| FailureCause::HostError {
            host: host.to_string(),
            message: format!("no disk at {}", location.mountpoint()),
        })
}

/// Charge a local read, serving cached bytes at memory speed and admitting
/// the uncached remainder through the page cache when the host has one.
pub(crate) async fn local_read(
    ctx: &SimCtx,
    host: &str,
    location: &FileLocation,
    file: &DataFile,
    bytes: u64,
) -> Result<(), FailureCause> {
    let disk = disk_for(ctx, host, location)?.clone();
    let Some(manager) = memory_manager_for(ctx, host) else {
        ctx.clock().sleep(disk.read_time(bytes)).await;
        return Ok(());
    };

    let now = ctx.now();
    let (wait, flushed) = {
        let mut mm = manager.lock();
        let from_mem = mm.read_from_cache(file.id(), now).min(bytes);
        let from_disk = bytes - from_mem;
        let mut flushed = 0;
        if from_disk > 0 {
            flushed = mm.make_room(from_disk).flushed;
            let admit = from_disk.min(mm.free());
            if admit > 0 {
                mm.read_to_cache(file.id(), admit, now);
            }
        }
        (
            mm.memory_read_time(from_mem) + disk.read_time(from_disk),
            flushed,
        )
    };
    ctx.clock().sleep(wait + disk.write_time(flushed)).await;
    Ok(())
}

/// Charge a local write: straight to disk without a page cache, buffered
/// dirty at memory speed with one.
pub(crate) async fn local_write(
    ctx: &SimCtx,
    host: &str,
    location: &FileLocation,
    file: &DataFile,
    bytes: u64,
) -> Result<(), FailureCause> {
    let disk = disk_for(ctx, host, location)?.clone();
    let Some(manager) = memory_manager_for(ctx, host) else {
        ctx.clock().sleep(disk.write_time(bytes)).await;
        return Ok(());
    };

    let now = ctx.now();
    let (wait, writeback) = {
        let mut mm = manager.lock();
        let ratio_flush = mm.flush_for_dirty_ratio(bytes);
        let room_flush = mm.make_room(bytes).flushed;
        let admit = bytes.min(mm.free());
        let overflow = bytes - admit;
        if admit > 0 {
            mm.write_to_cache(file.id(), admit, now);
        }
        (
            mm.memory_write_time(admit),
            ratio_flush + room_flush + overflow,
        )
    };
    ctx.clock()
        .sleep(wait + disk.write_time(writeback))
        .await;
    Ok(())
}

/// Cross-service copy: pull the file from the source service over the
/// network and write it locally, then report as a copy transfer.
pub fn spawn_pull_copy(
    ctx: &SimCtx,
    parent: TransferParent,
    file: DataFile,
    src_service_mailbox: String,
    src: FileLocation,
    dst: FileLocation,
    answers: AnswerSet,
) -> ActorHandle {
    let ctx = ctx.clone();
    let name = format!("ftt-{}-{}", parent.name, file.id());
    let host = parent.host.clone();
    ActorHandle::spawn(name, host.clone(), async move {
        let mut guard = OutcomeGuard {
            registry: ctx.registry().clone(),
            answers: answers.clone(),
            service: parent.name.clone(),
            armed: true,
        };
        let result = pull_copy(&ctx, &parent, &file, &src_service_mailbox, &src, &dst).await;
        let outcome = match result {
            Ok(()) => TransferOutcome::ok(),
            Err(cause) => TransferOutcome::failed(cause),
        };
        guard.disarm();
        let done = StorageRequest::TransferDone {
            op: TransferOp::Copy,
            file: file.clone(),
            location: dst.clone(),
            outcome,
            answers: answers.clone(),
        };
        if ctx.post_now(&parent.mailbox, done).is_err() {
            for mailbox in answers.mailboxes() {
                let _ = ctx.post_now(
                    mailbox,
                    TransferOutcome::failed(FailureCause::service_is_down(parent.name.clone())),
                );
            }
        }
    })
}

async fn pull_copy(
    ctx: &SimCtx,
    parent: &TransferParent,
    file: &DataFile,
    src_service_mailbox: &str,
    src: &FileLocation,
    dst: &FileLocation,
) -> Result<(), FailureCause> {
    let mut data: Mailbox<FileChunk> = ctx.open_mailbox(answer_mailbox_name("copy-data"))?;
    let mut reply: Mailbox<ReadReply> = ctx.open_mailbox(answer_mailbox_name("copy-reply"))?;
    let mut read_answer: Mailbox<TransferOutcome> =
        ctx.open_mailbox(answer_mailbox_name("copy-read"))?;

    ctx.post(
        src_service_mailbox,
        StorageRequest::Read {
            location: src.clone(),
            num_bytes: None,
            data: data.name().to_string(),
            reply: reply.name().to_string(),
            answer: read_answer.name().to_string(),
        },
        CONTROL,
    )
    .await?;

    match reply.recv().await? {
        ReadReply::Rejected { cause } => return Err(cause),
        ReadReply::Accepted { .. } => {}
    }

    let mut received_last = false;
    while !received_last {
        tokio::select! {
            chunk = data.recv() => {
                let chunk = chunk?;
                local_write(ctx, &parent.host, dst, file, chunk.bytes).await?;
                if let Some(credit) = &chunk.credit {
                    ctx.post(credit, Credit, CONTROL).await?;
                }
                received_last = chunk.last;
            }
            outcome = read_answer.recv() => {
                return outcome?.into_result();
            }
        }
    }

    read_answer.recv().await?.into_result()
}

#[cfg(test)]
#[path = "transfer_tests.rs"]
mod tests;
