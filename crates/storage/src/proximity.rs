// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Network proximity probes.
//!
//! A daemon measures host-pair round trips on a period and keeps the
//! latest estimate. Queries are synchronous state peeks; a pair that was
//! never measured has no distance.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use whirr_core::{FailureCause, ServiceId, SimTime};
use whirr_kernel::{answer_mailbox_name, ActorHandle, ServiceEntry, SimCtx, CONTROL};

/// Which hosts to probe and how often.
#[derive(Debug, Clone)]
pub struct ProximityConfig {
    pub hosts: Vec<String>,
    pub period: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Measurement {
    rtt: Duration,
    at: SimTime,
}

struct ProximityState {
    distances: Mutex<HashMap<(String, String), Measurement>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProbePing;

/// Client handle on a proximity service.
#[derive(Clone)]
pub struct ProximityHandle {
    ctx: SimCtx,
    id: ServiceId,
}

impl std::fmt::Debug for ProximityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProximityHandle").field("id", &self.id).finish()
    }
}

impl ProximityHandle {
    /// Handle on an already-registered proximity service.
    pub fn attach(ctx: SimCtx, id: ServiceId) -> ProximityHandle {
        ProximityHandle { ctx, id }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// Latest round-trip estimate between two hosts; `None` when the pair
    /// was never measured.
    pub fn distance(&self, a: &str, b: &str) -> Option<Duration> {
        let state = self.ctx.service_state::<ProximityState>(self.id).ok()?;
        let key = pair_key(a, b);
        let distances = state.distances.lock();
        distances.get(&key).map(|m| m.rtt)
    }

    /// When the pair was last probed.
    pub fn last_measured(&self, a: &str, b: &str) -> Option<SimTime> {
        let state = self.ctx.service_state::<ProximityState>(self.id).ok()?;
        let key = pair_key(a, b);
        let distances = state.distances.lock();
        distances.get(&key).map(|m| m.at)
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Start the proximity daemon probing every pair of `config.hosts`.
pub fn start_proximity_service(
    ctx: &SimCtx,
    name: &str,
    host: &str,
    config: ProximityConfig,
) -> Result<ProximityHandle, FailureCause> {
    ctx.platform().require_host(host)?;
    for probe_host in &config.hosts {
        ctx.platform().require_host(probe_host)?;
    }
    if config.hosts.len() < 2 {
        return Err(FailureCause::invalid_argument(format!(
            "{name}: need at least two hosts to probe"
        )));
    }

    let state = Arc::new(ProximityState {
        distances: Mutex::new(HashMap::new()),
    });
    let id = ctx.allocate_service_id();

    let daemon_ctx = ctx.clone();
    let daemon_state = Arc::clone(&state);
    let handle = ActorHandle::spawn(name.to_string(), host.to_string(), async move {
        let Ok(mut probe_mailbox) =
            daemon_ctx.open_mailbox::<ProbePing>(answer_mailbox_name("probe"))
        else {
            return;
        };
        let probe_name = probe_mailbox.name().to_string();
        loop {
            for i in 0..config.hosts.len() {
                for j in (i + 1)..config.hosts.len() {
                    let started = daemon_ctx.now();
                    // One control message each way across the modelled
                    // network.
                    if daemon_ctx.post(&probe_name, ProbePing, CONTROL).await.is_err() {
                        return;
                    }
                    if probe_mailbox.recv().await.is_err() {
                        return;
                    }
                    if daemon_ctx.post(&probe_name, ProbePing, CONTROL).await.is_err() {
                        return;
                    }
                    if probe_mailbox.recv().await.is_err() {
                        return;
                    }
                    let rtt = daemon_ctx.now().since(started);
                    let key = pair_key(&config.hosts[i], &config.hosts[j]);
                    daemon_state.distances.lock().insert(
                        key,
                        Measurement {
                            rtt,
                            at: daemon_ctx.now(),
                        },
                    );
                }
            }
            daemon_ctx.clock().sleep(config.period).await;
        }
    });

    ctx.register_service(ServiceEntry {
        id,
        name: name.to_string(),
        kind: "proximity",
        host: host.to_string(),
        mailbox: String::new(),
        handle,
        state,
    });
    Ok(ProximityHandle {
        ctx: ctx.clone(),
        id,
    })
}

#[cfg(test)]
#[path = "proximity_tests.rs"]
mod tests;
