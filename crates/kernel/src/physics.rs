// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The seam to the underlying physics engine.
//!
//! The real network/disk/CPU models live outside the core; the kernel only
//! asks "how long does moving `n` bytes take". The linear models here are
//! the default binding.

use std::sync::Arc;
use std::time::Duration;
use whirr_core::FailureCause;

/// Cost model for mailbox traffic.
///
/// A faulty model may return `NetworkError` to simulate a broken link; the
/// kernel surfaces that as the post's result, never as an out-of-band
/// failure.
pub trait NetworkModel: Send + Sync {
    fn transfer_time(&self, payload_bytes: u64) -> Result<Duration, FailureCause>;
}

/// Uniform latency + bandwidth network.
#[derive(Debug, Clone)]
pub struct LinearNetwork {
    pub latency: Duration,
    /// Bytes per second.
    pub bandwidth: u64,
}

impl Default for LinearNetwork {
    fn default() -> Self {
        Self {
            latency: Duration::from_micros(100),
            bandwidth: 125_000_000,
        }
    }
}

impl NetworkModel for LinearNetwork {
    fn transfer_time(&self, payload_bytes: u64) -> Result<Duration, FailureCause> {
        if payload_bytes == 0 {
            return Ok(self.latency);
        }
        Ok(self.latency + Duration::from_secs_f64(payload_bytes as f64 / self.bandwidth as f64))
    }
}

/// Duration of a compute workload on `cores` cores of the given per-core
/// speed (flops per second).
pub fn compute_time(flops: f64, core_speed: f64, cores: u32) -> Duration {
    if flops <= 0.0 || core_speed <= 0.0 || cores == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(flops / (core_speed * cores as f64))
}

/// The simulation's physics binding.
#[derive(Clone)]
pub struct Physics {
    pub network: Arc<dyn NetworkModel>,
}

impl Physics {
    pub fn new(network: Arc<dyn NetworkModel>) -> Self {
        Self { network }
    }
}

impl Default for Physics {
    fn default() -> Self {
        Self {
            network: Arc::new(LinearNetwork::default()),
        }
    }
}

#[cfg(test)]
#[path = "physics_tests.rs"]
mod tests;
