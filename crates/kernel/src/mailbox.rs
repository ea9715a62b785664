// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named mailboxes: the rendezvous points simulated actors talk through.
//!
//! Every message carries a payload size; posting suspends the sender while
//! the network model debits the simulated wire, so FIFO-per-sender falls out
//! of the sender awaiting each post. Posting to a retired mailbox fails with
//! `ServiceIsDown` rather than panicking or raising out-of-band.

use crate::physics::Physics;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use whirr_core::FailureCause;

/// Payload size of a pure control message.
pub const CONTROL: u64 = 0;

/// Name for a per-request answer mailbox, e.g. `answer-read-<uuid>`.
pub fn answer_mailbox_name(op: &str) -> String {
    format!("answer-{op}-{}", uuid::Uuid::new_v4())
}

struct Entry {
    // mpsc::UnboundedSender<T> for the mailbox's message type T.
    sender: Box<dyn Any + Send + Sync>,
}

/// Registry of every live mailbox in one simulation.
#[derive(Clone, Default)]
pub struct MailboxRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    physics: Arc<Mutex<Physics>>,
}

impl MailboxRegistry {
    pub fn new(physics: Physics) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            physics: Arc::new(Mutex::new(physics)),
        }
    }

    /// Open a mailbox and take its receiving side.
    ///
    /// Fails with `InternalError` when the name is already taken; answer
    /// mailboxes use [`answer_mailbox_name`] to stay unique.
    pub fn open<T: Send + 'static>(
        &self,
        name: impl Into<String>,
    ) -> Result<Mailbox<T>, FailureCause> {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel::<T>();
        let mut entries = self.entries.lock();
        if entries.contains_key(&name) {
            return Err(FailureCause::internal(format!(
                "mailbox {name} already exists"
            )));
        }
        entries.insert(
            name.clone(),
            Entry {
                sender: Box::new(tx),
            },
        );
        Ok(Mailbox {
            name,
            rx,
            registry: self.clone(),
        })
    }

    /// Post a message, debiting the network for `payload_bytes`.
    ///
    /// Suspends the caller for the modelled transfer time, then enqueues.
    /// The target is checked both before and after the wire delay: a
    /// mailbox retired mid-flight also yields `ServiceIsDown`.
    pub async fn post<T: Send + 'static>(
        &self,
        to: &str,
        msg: T,
        payload_bytes: u64,
    ) -> Result<(), FailureCause> {
        if !self.entries.lock().contains_key(to) {
            return Err(FailureCause::service_is_down(to));
        }
        let delay = {
            let physics = self.physics.lock();
            physics.network.transfer_time(payload_bytes)?
        };
        tokio::time::sleep(delay).await;
        self.post_now(to, msg)
    }

    /// Enqueue without any wire delay.
    ///
    /// For failure notifications published from cleanup guards, which cannot
    /// suspend.
    pub fn post_now<T: Send + 'static>(&self, to: &str, msg: T) -> Result<(), FailureCause> {
        let entries = self.entries.lock();
        let entry = entries
            .get(to)
            .ok_or_else(|| FailureCause::service_is_down(to))?;
        let tx = entry
            .sender
            .downcast_ref::<mpsc::UnboundedSender<T>>()
            .ok_or_else(|| {
                FailureCause::internal(format!("mailbox {to}: message type mismatch"))
            })?;
        tx.send(msg)
            .map_err(|_| FailureCause::service_is_down(to))
    }

    /// Whether a mailbox is currently open.
    pub fn is_open(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    fn retire(&self, name: &str) {
        self.entries.lock().remove(name);
    }
}

/// Receiving side of a named mailbox. Retires the name on drop.
pub struct Mailbox<T> {
    name: String,
    rx: mpsc::UnboundedReceiver<T>,
    registry: MailboxRegistry,
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox").field("name", &self.name).finish()
    }
}

impl<T: Send + 'static> Mailbox<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Suspend until the next message.
    pub async fn recv(&mut self) -> Result<T, FailureCause> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| FailureCause::internal(format!("mailbox {} closed", self.name)))
    }

    /// Suspend until the next message or the timeout; `Ok(None)` on timeout.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<T>, FailureCause> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(msg)) => Ok(Some(msg)),
            Ok(None) => Err(FailureCause::internal(format!(
                "mailbox {} closed",
                self.name
            ))),
            Err(_) => Ok(None),
        }
    }

    /// Drain without suspending (used by tests and snapshot readers).
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Mailbox<T> {
    fn drop(&mut self) {
        self.registry.retire(&self.name);
    }
}

#[cfg(test)]
#[path = "mailbox_tests.rs"]
mod tests;
