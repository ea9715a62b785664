// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The virtual clock.
//!
//! Backed by tokio's paused time source: `tokio::time::Instant` only moves
//! when every task in the simulation runtime is suspended, which makes the
//! observed clock monotone across the global event sequence.

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use whirr_core::SimTime;

/// Shared handle on the simulation's virtual clock.
#[derive(Clone, Default)]
pub struct SimClock {
    origin: Arc<OnceLock<tokio::time::Instant>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin virtual zero to the current instant.
    ///
    /// Called once by the simulation when it enters the runtime; later calls
    /// are no-ops.
    pub fn start(&self) {
        let _ = self.origin.set(tokio::time::Instant::now());
    }

    /// Current virtual time. Zero until the simulation is launched.
    pub fn now(&self) -> SimTime {
        match self.origin.get() {
            Some(origin) => SimTime::from_duration(tokio::time::Instant::now() - *origin),
            None => SimTime::ZERO,
        }
    }

    /// Suspend the calling actor for `dt` of virtual time.
    pub async fn sleep(&self, dt: Duration) {
        tokio::time::sleep(dt).await;
    }

    /// Suspend the calling actor until the given virtual instant (no-op if
    /// already past).
    pub async fn sleep_until(&self, deadline: SimTime) {
        let now = self.now();
        if deadline > now {
            tokio::time::sleep(deadline.since(now)).await;
        }
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
