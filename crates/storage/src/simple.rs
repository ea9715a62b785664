// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The simple storage service: disks on one host behind a request mailbox.
//!
//! The daemon validates and reserves, transfer threads move the bytes, and
//! `TransferDone` finalizes the accounting in the daemon loop so state
//! changes stay serialized.

use crate::messages::{
    AnswerSet, FileChunk, ReadReply, StorageRequest, TransferOp, TransferOutcome, WriteReply,
};
use crate::service::StorageHandle;
use crate::store::{CachingBehavior, StoreState};
use crate::transfer::{spawn_pull_copy, spawn_transfer, Endpoint, TransferParent, TransferSpec};
use parking_lot::Mutex;
use std::sync::Arc;
use whirr_core::{FailureCause, FileLocation, ServiceId, MB};
use whirr_kernel::{answer_mailbox_name, ActorHandle, ChildTasks, Mailbox, ServiceEntry, SimCtx, CONTROL};

/// Tuning for a simple storage service.
#[derive(Debug, Clone)]
pub struct SimpleStorageConfig {
    /// Transfer chunking; `None` streams each file as one zero-copy block.
    pub buffer_size: Option<u64>,
    /// What to do when a reservation does not fit.
    pub caching: CachingBehavior,
}

impl Default for SimpleStorageConfig {
    fn default() -> Self {
        Self {
            buffer_size: Some(10 * MB),
            caching: CachingBehavior::None,
        }
    }
}

/// Start a simple storage service over `mounts` of `host`.
pub fn start_simple_storage(
    ctx: &SimCtx,
    name: &str,
    host: &str,
    mounts: &[&str],
    config: SimpleStorageConfig,
) -> Result<StorageHandle, FailureCause> {
    let platform_host = ctx.platform().require_host(host)?;
    let mut capacities = Vec::with_capacity(mounts.len());
    for mount in mounts {
        let disk = platform_host
            .disk_at(mount)
            .ok_or_else(|| FailureCause::HostError {
                host: host.to_string(),
                message: format!("no disk at {mount}"),
            })?;
        capacities.push((disk.mountpoint.clone(), disk.capacity));
    }

    let state = Arc::new(Mutex::new(StoreState::new(name, capacities, config.caching)));
    let mailbox_name = format!("mb-{name}");
    let mailbox: Mailbox<StorageRequest> = ctx.open_mailbox(mailbox_name.clone())?;
    let id = ctx.allocate_service_id();

    let daemon_ctx = ctx.clone();
    let daemon_state = Arc::clone(&state);
    let parent = TransferParent {
        name: name.to_string(),
        mailbox: mailbox_name.clone(),
        host: host.to_string(),
    };
    let handle = ActorHandle::spawn(name.to_string(), host.to_string(), async move {
        daemon(daemon_ctx, id, parent, daemon_state, mailbox, config).await;
    });

    ctx.register_service(ServiceEntry {
        id,
        name: name.to_string(),
        kind: "simple_storage",
        host: host.to_string(),
        mailbox: mailbox_name,
        handle,
        state,
    });
    Ok(StorageHandle::new(ctx.clone(), id))
}

async fn daemon(
    ctx: SimCtx,
    me: ServiceId,
    parent: TransferParent,
    state: Arc<Mutex<StoreState>>,
    mut mailbox: Mailbox<StorageRequest>,
    config: SimpleStorageConfig,
) {
    let mut children = ChildTasks::new();
    tracing::info!(service = %parent.name, host = %parent.host, "storage service up");
    loop {
        let Ok(msg) = mailbox.recv().await else {
            break;
        };
        match msg {
            StorageRequest::Lookup { location, answer } => {
                let found = state.lock().has_file(&location);
                let _ = ctx.post(&answer, found, CONTROL).await;
            }

            StorageRequest::Read {
                location,
                num_bytes,
                data,
                reply,
                answer,
            } => {
                handle_read(
                    &ctx,
                    &parent,
                    &state,
                    &config,
                    &mut children,
                    location,
                    num_bytes,
                    data,
                    reply,
                    answer,
                )
                .await;
            }

            StorageRequest::Write {
                file,
                location,
                reply,
                answer,
            } => {
                let reserved = state.lock().reserve(&location, file.size(), ctx.now());
                match reserved {
                    Err(cause) => {
                        let _ = ctx.post(&reply, WriteReply::Rejected { cause }, CONTROL).await;
                    }
                    Ok(()) => match ctx.open_mailbox::<FileChunk>(answer_mailbox_name("data")) {
                        Err(cause) => {
                            state.lock().release(&location, file.size());
                            let _ =
                                ctx.post(&reply, WriteReply::Rejected { cause }, CONTROL).await;
                        }
                        Ok(inbox) => {
                            let accepted = WriteReply::Accepted {
                                data: inbox.name().to_string(),
                                chunk_size: config.buffer_size,
                            };
                            children.adopt(spawn_transfer(
                                &ctx,
                                parent.clone(),
                                TransferSpec {
                                    op: TransferOp::Write,
                                    num_bytes: file.size(),
                                    src: Endpoint::Mailbox {
                                        name: inbox.name().to_string(),
                                    },
                                    dst: Endpoint::Local {
                                        host: parent.host.clone(),
                                        location: location.clone(),
                                    },
                                    buffer_size: config.buffer_size,
                                    answers: AnswerSet::for_write(answer),
                                    file,
                                },
                                Some(inbox),
                            ));
                            let _ = ctx.post(&reply, accepted, CONTROL).await;
                        }
                    },
                }
            }

            StorageRequest::Copy { src, dst, answer } => {
                handle_copy(&ctx, me, &parent, &state, &config, &mut children, src, dst, answer)
                    .await;
            }

            StorageRequest::Delete { location, answer } => {
                state.lock().delete(&location);
                let _ = ctx
                    .post(&answer, Ok::<(), FailureCause>(()), CONTROL)
                    .await;
            }

            StorageRequest::TransferDone {
                op,
                file,
                location,
                outcome,
                answers,
            } => {
                {
                    let mut s = state.lock();
                    match op {
                        TransferOp::Write | TransferOp::Copy => {
                            if outcome.success {
                                s.commit(file, &location, ctx.now());
                            } else {
                                s.release(&location, file.size());
                            }
                        }
                        TransferOp::Read => {}
                    }
                }
                if !outcome.success {
                    tracing::debug!(
                        service = %parent.name,
                        op = ?op,
                        cause = outcome.cause.as_ref().map(|c| c.tag()).unwrap_or("?"),
                        "transfer failed"
                    );
                }
                for mb in answers.mailboxes() {
                    let _ = ctx.post(mb, outcome.clone(), CONTROL).await;
                }
            }

            StorageRequest::Stop { answer } => {
                let _ = ctx.post(&answer, (), CONTROL).await;
                break;
            }
        }
    }
    tracing::info!(service = %parent.name, "storage service stopped");
}

#[allow(clippy::too_many_arguments)]
async fn handle_read(
    ctx: &SimCtx,
    parent: &TransferParent,
    state: &Arc<Mutex<StoreState>>,
    config: &SimpleStorageConfig,
    children: &mut ChildTasks,
    location: FileLocation,
    num_bytes: Option<u64>,
    data: String,
    reply: String,
    answer: String,
) {
    let resolved = {
        let mut s = state.lock();
        let file = s.file_at(&location);
        if file.is_some() {
            s.touch(&location, ctx.now());
        }
        file
    };
    let Some(file) = resolved else {
        let cause = FailureCause::file_not_found(location.object_key());
        let _ = ctx.post(&reply, ReadReply::Rejected { cause }, CONTROL).await;
        return;
    };

    let bytes = num_bytes.unwrap_or_else(|| file.size()).min(file.size());
    let accepted = ReadReply::Accepted {
        num_bytes: bytes,
        chunk_size: config.buffer_size,
    };
    children.adopt(spawn_transfer(
        ctx,
        parent.clone(),
        TransferSpec {
            op: TransferOp::Read,
            file,
            num_bytes: bytes,
            src: Endpoint::Local {
                host: parent.host.clone(),
                location,
            },
            dst: Endpoint::Mailbox { name: data },
            buffer_size: config.buffer_size,
            answers: AnswerSet::for_read(answer),
        },
        None,
    ));
    let _ = ctx.post(&reply, accepted, CONTROL).await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_copy(
    ctx: &SimCtx,
    me: ServiceId,
    parent: &TransferParent,
    state: &Arc<Mutex<StoreState>>,
    config: &SimpleStorageConfig,
    children: &mut ChildTasks,
    src: FileLocation,
    dst: FileLocation,
    answer: String,
) {
    if dst.service() != me {
        let cause = FailureCause::internal("copy addressed to a service that is not the destination");
        let _ = ctx.post(&answer, TransferOutcome::failed(cause), CONTROL).await;
        return;
    }

    // Resolve the source file.
    let source_file = if src.service() == me {
        state.lock().file_at(&src)
    } else {
        match ctx.service_state::<Mutex<StoreState>>(src.service()) {
            Ok(remote) => remote.lock().file_at(&src),
            Err(_) => None,
        }
    };
    let Some(file) = source_file else {
        let cause = FailureCause::file_not_found(src.object_key());
        let _ = ctx.post(&answer, TransferOutcome::failed(cause), CONTROL).await;
        return;
    };

    // Eager destination reservation; the transfer outcome commits or
    // releases it.
    let reserve_result = state.lock().reserve(&dst, file.size(), ctx.now());
    if let Err(cause) = reserve_result {
        let _ = ctx.post(&answer, TransferOutcome::failed(cause), CONTROL).await;
        return;
    }

    if src.service() == me {
        // Both endpoints here: one thread, no network traffic.
        state.lock().touch(&src, ctx.now());
        children.adopt(spawn_transfer(
            ctx,
            parent.clone(),
            TransferSpec {
                op: TransferOp::Copy,
                num_bytes: file.size(),
                src: Endpoint::Local {
                    host: parent.host.clone(),
                    location: src,
                },
                dst: Endpoint::Local {
                    host: parent.host.clone(),
                    location: dst,
                },
                buffer_size: config.buffer_size,
                answers: AnswerSet::for_copy(answer),
                file,
            },
            None,
        ));
    } else {
        let Ok(src_entry) = ctx.require_service(src.service()) else {
            state.lock().release(&dst, file.size());
            let cause = FailureCause::service_is_down(ctx.service_name(src.service()));
            let _ = ctx.post(&answer, TransferOutcome::failed(cause), CONTROL).await;
            return;
        };
        children.adopt(spawn_pull_copy(
            ctx,
            parent.clone(),
            file,
            src_entry.mailbox,
            src,
            dst,
            AnswerSet::for_copy(answer),
        ));
    }
}

#[cfg(test)]
#[path = "simple_tests.rs"]
mod tests;
