// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The simulation facade.
//!
//! One `Simulation` owns the paused-time runtime, the service arena, and
//! the controllers. Services are added before launch; `launch` runs every
//! actor until all controllers return, then tears the arena down.

use crate::controller::{ControllerContext, ExecutionController};
use std::time::Duration;
use whirr_compute::{
    start_bare_metal, start_batch_service, BareMetalConfig, BatchConfig, BatchServiceHandle,
    ComputeServiceHandle,
};
use whirr_core::{DataFile, FailureCause, Platform, ServiceId, SimTime};
use whirr_kernel::{Physics, SimCtx};
use whirr_storage::{
    start_compound_storage, start_file_registry, start_memory_manager, start_proximity_service,
    start_proxy_storage, start_simple_storage, CompoundStorageConfig, FileRegistryHandle,
    MemoryManagerConfig, ProximityConfig, ProximityHandle, ProxyConfig, RegistryConfig,
    SimpleStorageConfig, StorageHandle,
};

struct PendingController {
    name: String,
    host: String,
    controller: Box<dyn ExecutionController>,
}

/// One simulated world: platform, services, controllers, virtual clock.
pub struct Simulation {
    runtime: tokio::runtime::Runtime,
    ctx: SimCtx,
    controllers: Vec<PendingController>,
}

impl Simulation {
    pub fn new(platform: Platform) -> Result<Simulation, FailureCause> {
        Self::with_physics(platform, Physics::default())
    }

    pub fn with_physics(platform: Platform, physics: Physics) -> Result<Simulation, FailureCause> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .map_err(|e| FailureCause::internal(format!("runtime: {e}")))?;
        let ctx = SimCtx::new(platform, physics);
        {
            let _guard = runtime.enter();
            ctx.clock().start();
        }
        Ok(Simulation {
            runtime,
            ctx,
            controllers: Vec::new(),
        })
    }

    pub fn context(&self) -> &SimCtx {
        &self.ctx
    }

    pub fn now(&self) -> SimTime {
        self.ctx.now()
    }

    /// Create a file identity (once per simulation).
    pub fn add_file(&self, id: &str, size: u64) -> Result<DataFile, FailureCause> {
        self.ctx.add_file(id, size)
    }

    // -- services --------------------------------------------------------

    pub fn add_simple_storage(
        &self,
        name: &str,
        host: &str,
        mounts: &[&str],
        config: SimpleStorageConfig,
    ) -> Result<StorageHandle, FailureCause> {
        let _guard = self.runtime.enter();
        start_simple_storage(&self.ctx, name, host, mounts, config)
    }

    pub fn add_proxy_storage(
        &self,
        name: &str,
        host: &str,
        config: ProxyConfig,
    ) -> Result<StorageHandle, FailureCause> {
        let _guard = self.runtime.enter();
        start_proxy_storage(&self.ctx, name, host, config)
    }

    pub fn add_compound_storage(
        &self,
        name: &str,
        host: &str,
        config: CompoundStorageConfig,
    ) -> Result<StorageHandle, FailureCause> {
        let _guard = self.runtime.enter();
        start_compound_storage(&self.ctx, name, host, config)
    }

    pub fn add_memory_manager(
        &self,
        host: &str,
        config: MemoryManagerConfig,
    ) -> Result<ServiceId, FailureCause> {
        let _guard = self.runtime.enter();
        start_memory_manager(&self.ctx, host, config)
    }

    pub fn add_file_registry(
        &self,
        name: &str,
        host: &str,
        config: RegistryConfig,
    ) -> Result<FileRegistryHandle, FailureCause> {
        let _guard = self.runtime.enter();
        start_file_registry(&self.ctx, name, host, config)
    }

    pub fn add_proximity_service(
        &self,
        name: &str,
        host: &str,
        config: ProximityConfig,
    ) -> Result<ProximityHandle, FailureCause> {
        let _guard = self.runtime.enter();
        start_proximity_service(&self.ctx, name, host, config)
    }

    pub fn add_bare_metal(
        &self,
        name: &str,
        host: &str,
        config: BareMetalConfig,
    ) -> Result<ComputeServiceHandle, FailureCause> {
        let _guard = self.runtime.enter();
        start_bare_metal(&self.ctx, name, host, config)
    }

    pub fn add_batch_service(
        &self,
        name: &str,
        host: &str,
        hosts: &[&str],
        config: BatchConfig,
    ) -> Result<BatchServiceHandle, FailureCause> {
        let _guard = self.runtime.enter();
        start_batch_service(&self.ctx, name, host, hosts, config)
    }

    // -- controllers -----------------------------------------------------

    pub fn add_controller(
        &mut self,
        name: &str,
        host: &str,
        controller: impl ExecutionController,
    ) -> Result<(), FailureCause> {
        self.ctx.platform().require_host(host)?;
        self.controllers.push(PendingController {
            name: name.to_string(),
            host: host.to_string(),
            controller: Box::new(controller),
        });
        Ok(())
    }

    /// Run the simulation to completion: every controller's `main` runs as
    /// an actor; virtual time advances only while all actors are
    /// suspended. Returns the first controller failure, if any.
    pub fn launch(mut self) -> Result<(), FailureCause> {
        let ctx = self.ctx.clone();
        let controllers = std::mem::take(&mut self.controllers);
        let result = self.runtime.block_on(async move {
            let mut joins = Vec::new();
            for pending in controllers {
                let events = ctx
                    .open_mailbox::<whirr_core::ExecutionEvent>(format!("events-{}", pending.name))?;
                let mut cctx =
                    ControllerContext::new(ctx.clone(), pending.host, pending.name.clone(), events);
                let mut controller = pending.controller;
                let name = pending.name;
                joins.push((
                    name.clone(),
                    tokio::spawn(async move {
                        tracing::info!(controller = %name, "controller starting");
                        let outcome = controller.main(&mut cctx).await;
                        match &outcome {
                            Ok(()) => tracing::info!(controller = %name, "controller done"),
                            Err(cause) => {
                                tracing::error!(controller = %name, cause = %cause, "controller failed")
                            }
                        }
                        outcome
                    }),
                ));
            }

            let mut first_error = None;
            for (name, join) in joins {
                match join.await {
                    Ok(Ok(())) => {}
                    Ok(Err(cause)) => {
                        first_error.get_or_insert(cause);
                    }
                    Err(_) => {
                        first_error.get_or_insert(FailureCause::internal(format!(
                            "controller {name} aborted"
                        )));
                    }
                }
            }
            Ok::<_, FailureCause>(first_error)
        });

        // Linear teardown regardless of outcome.
        self.ctx.kill_all_services();
        match result? {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }

    /// Drive a single async routine inside the simulation without any
    /// registered controller (small experiments and tests).
    pub fn run_until<F, T>(&self, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        self.runtime.block_on(fut)
    }

    /// Virtual-time sleep helper for `run_until` bodies.
    pub async fn advance(&self, dt: Duration) {
        self.ctx.clock().sleep(dt).await;
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("now", &self.ctx.now())
            .field("pending_controllers", &self.controllers.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "simulation_tests.rs"]
mod tests;
