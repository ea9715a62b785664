// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! whirr-storage: storage services, file transfers, and caches.

pub mod compound;
pub mod memory;
pub mod messages;
pub mod proximity;
pub mod proxy;
pub mod registry;
pub mod service;
pub mod simple;
pub mod store;
pub mod transfer;

pub use compound::{assign_file, start_compound_storage, CompoundStorageConfig, StorageSelection};
pub use memory::{
    memory_manager_for, start_memory_manager, Block, MemoryManager, MemoryManagerConfig, Reclaimed,
};
pub use messages::{
    AnswerSet, Credit, FileChunk, ReadReply, StorageRequest, TransferOp, TransferOutcome,
    WriteReply,
};
pub use proximity::{start_proximity_service, ProximityConfig, ProximityHandle};
pub use proxy::{start_proxy_storage, ProxyConfig, UncachedReadMethod};
pub use registry::{start_file_registry, FileRegistryHandle, RegistryConfig, RegistryRequest};
pub use service::{StorageHandle, StorageKind};
pub use simple::{start_simple_storage, SimpleStorageConfig};
pub use store::{CachingBehavior, StoreState};
pub use transfer::{spawn_pull_copy, spawn_transfer, Endpoint, TransferParent, TransferSpec};
