// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot alarm timers.
//!
//! An alarm sleeps for its delay and then posts a message on a mailbox,
//! the mechanism behind batch wall-clock expiry and controller timers.
//! Cancelling an alarm that already fired is a no-op.

use crate::mailbox::MailboxRegistry;
use tokio::task::AbortHandle;

/// Handle on a pending alarm.
pub struct AlarmHandle {
    abort: AbortHandle,
}

impl AlarmHandle {
    /// Arm an alarm that posts `msg` to `mailbox` after `delay` of virtual
    /// time. The post is charged as a control message.
    pub fn set<T: Send + 'static>(
        registry: &MailboxRegistry,
        delay: std::time::Duration,
        mailbox: impl Into<String>,
        msg: T,
    ) -> AlarmHandle {
        let registry = registry.clone();
        let mailbox = mailbox.into();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = registry.post_now(&mailbox, msg) {
                tracing::debug!(mailbox = %mailbox, error = %err, "alarm target gone");
            }
        });
        AlarmHandle {
            abort: task.abort_handle(),
        }
    }

    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_pending(&self) -> bool {
        !self.abort.is_finished()
    }
}

impl Drop for AlarmHandle {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

#[cfg(test)]
#[path = "alarm_tests.rs"]
mod tests;
