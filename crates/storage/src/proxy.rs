// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proxy storage: a cache fronting one or more remotes.
//!
//! Callers address the proxy with a plain location (default remote
//! implied) or a proxy location (explicit remote). Reads are served from
//! the cache on a hit; on a miss the configured read method decides how
//! bytes reach the cache. Writes always go to the remote and invalidate
//! the cached copy.

use crate::compound;
use crate::messages::StorageRequest;
use crate::service::{
    answer_misuse_daemon, backing_delete, backing_lookup, backing_read, backing_write,
    StorageHandle, StorageKind,
};
use crate::store::StoreState;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use whirr_core::{DataFile, FailureCause, FileLocation, ServiceId};
use whirr_kernel::{ActorHandle, Mailbox, ServiceEntry, SimCtx};

/// How a cache miss is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UncachedReadMethod {
    /// Copy the whole file remote → cache, then read from the cache.
    #[default]
    CopyThenRead,
    /// Credit the file into the cache instantly (zero simulated time),
    /// then read from the cache. Models perfect prefetch.
    MagicRead,
    /// Stream from the remote straight to the client while admitting the
    /// bytes into the cache.
    ReadThrough,
}

impl UncachedReadMethod {
    /// Parse the `UNCACHED_READ_METHOD` config key.
    pub fn from_key(key: &str) -> Result<Self, FailureCause> {
        match key {
            "CopyThenRead" => Ok(Self::CopyThenRead),
            "MagicRead" => Ok(Self::MagicRead),
            "ReadThrough" => Ok(Self::ReadThrough),
            other => Err(FailureCause::invalid_argument(format!(
                "unknown UNCACHED_READ_METHOD {other}"
            ))),
        }
    }
}

/// Proxy construction parameters.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub cache: ServiceId,
    /// Named remotes; insertion order is stable.
    pub remotes: IndexMap<String, ServiceId>,
    /// Explicit default; with exactly one remote it is implied.
    pub default_remote: Option<ServiceId>,
    pub read_method: UncachedReadMethod,
}

pub(crate) struct ProxyState {
    pub cache: ServiceId,
    pub default_remote: Option<ServiceId>,
    pub read_method: UncachedReadMethod,
}

/// Start a proxy over an already-running cache and remotes.
pub fn start_proxy_storage(
    ctx: &SimCtx,
    name: &str,
    host: &str,
    config: ProxyConfig,
) -> Result<StorageHandle, FailureCause> {
    if config.remotes.is_empty() {
        return Err(FailureCause::invalid_argument(format!(
            "proxy {name}: at least one remote required"
        )));
    }
    ensure_backing_kind(ctx, config.cache, "cache")?;
    for (remote_name, id) in &config.remotes {
        ensure_backing_kind(ctx, *id, remote_name)?;
    }
    let default_remote = match config.default_remote {
        Some(id) => {
            if !config.remotes.values().any(|r| *r == id) {
                return Err(FailureCause::invalid_argument(format!(
                    "proxy {name}: default remote is not one of the remotes"
                )));
            }
            Some(id)
        }
        None if config.remotes.len() == 1 => config.remotes.values().next().copied(),
        None => None,
    };

    let state = Arc::new(ProxyState {
        cache: config.cache,
        default_remote,
        read_method: config.read_method,
    });
    let mailbox_name = format!("mb-{name}");
    let mailbox: Mailbox<StorageRequest> = ctx.open_mailbox(mailbox_name.clone())?;
    let id = ctx.allocate_service_id();

    let daemon_ctx = ctx.clone();
    let daemon_name = name.to_string();
    let handle = ActorHandle::spawn(name.to_string(), host.to_string(), async move {
        answer_misuse_daemon(daemon_ctx, daemon_name, mailbox).await;
    });

    ctx.register_service(ServiceEntry {
        id,
        name: name.to_string(),
        kind: "proxy_storage",
        host: host.to_string(),
        mailbox: mailbox_name,
        handle,
        state,
    });
    Ok(StorageHandle::new(ctx.clone(), id))
}

fn ensure_backing_kind(ctx: &SimCtx, id: ServiceId, role: &str) -> Result<(), FailureCause> {
    let entry = ctx.require_service(id)?;
    match StorageKind::from_tag(entry.kind) {
        Some(StorageKind::Simple) | Some(StorageKind::Compound) => Ok(()),
        Some(StorageKind::Proxy) => Err(FailureCause::invalid_argument(format!(
            "proxy {role} cannot be another proxy"
        ))),
        None => Err(FailureCause::invalid_argument(format!(
            "proxy {role} {} is not a storage service",
            entry.name
        ))),
    }
}

fn proxy_state(handle: &StorageHandle) -> Result<Arc<ProxyState>, FailureCause> {
    handle.ctx().service_state::<ProxyState>(handle.id())
}

fn resolve_remote(
    handle: &StorageHandle,
    state: &ProxyState,
    location: &FileLocation,
) -> Result<ServiceId, FailureCause> {
    if let Some(overlay) = location.proxy() {
        return Ok(overlay.target);
    }
    state.default_remote.ok_or_else(|| {
        FailureCause::invalid_argument(format!(
            "{}: no default remote; use a proxy location",
            handle.name()
        ))
    })
}

/// The file stored at a location on a simple or compound service, peeked
/// synchronously.
pub(crate) fn stored_file_at(
    ctx: &SimCtx,
    service: ServiceId,
    location: &FileLocation,
) -> Option<DataFile> {
    let handle = StorageHandle::new(ctx.clone(), service);
    match handle.kind().ok()? {
        StorageKind::Simple => handle.store_state().ok()?.lock().file_at(location),
        StorageKind::Compound => compound::stored_file_at(&handle, location),
        StorageKind::Proxy => None,
    }
}

/// Where a file sits inside the cache service, if anywhere.
fn cache_location_of(
    ctx: &SimCtx,
    cache: ServiceId,
    file_id: &str,
) -> Option<FileLocation> {
    let state = ctx.service_state::<Mutex<StoreState>>(cache).ok()?;
    let state = state.lock();
    state.files_lru().into_iter().find_map(|(key, file, _)| {
        if file.id() == file_id {
            let (mount, path) = key.split_once('\u{0}')?;
            Some(FileLocation::new(cache, mount, path))
        } else {
            None
        }
    })
}

/// The cache's default location for a newly admitted file.
fn cache_admission_location(
    ctx: &SimCtx,
    cache: ServiceId,
    file: &DataFile,
) -> Result<FileLocation, FailureCause> {
    let state = ctx.service_state::<Mutex<StoreState>>(cache)?;
    let mount = state
        .lock()
        .primary_mount()
        .map(str::to_string)
        .ok_or_else(|| FailureCause::internal("cache has no mountpoints"))?;
    Ok(FileLocation::new(cache, mount, file.id()))
}

/// Default proxy-addressed location for a file: the default remote's
/// primary mount, path = file id.
pub(crate) fn default_location(
    ctx: &SimCtx,
    proxy: ServiceId,
    file: &DataFile,
) -> Result<FileLocation, FailureCause> {
    let handle = StorageHandle::new(ctx.clone(), proxy);
    let state = proxy_state(&handle)?;
    let remote = state.default_remote.ok_or_else(|| {
        FailureCause::invalid_argument(format!("{}: no default remote", handle.name()))
    })?;
    let remote_handle = StorageHandle::new(ctx.clone(), remote);
    let backing = remote_handle.default_location(file)?;
    Ok(FileLocation::new(
        proxy,
        backing.mountpoint(),
        backing.path(),
    ))
}

/// Rewrite proxy-addressed locations to the backing remote; other
/// locations pass through untouched.
pub(crate) fn resolve_location(
    ctx: &SimCtx,
    location: &FileLocation,
) -> Result<FileLocation, FailureCause> {
    if let Some(overlay) = location.proxy() {
        return Ok(location.rehomed(overlay.target));
    }
    let addressed = ctx.require_service(location.service())?;
    if StorageKind::from_tag(addressed.kind) == Some(StorageKind::Proxy) {
        let handle = StorageHandle::new(ctx.clone(), location.service());
        let state = proxy_state(&handle)?;
        let remote = resolve_remote(&handle, &state, location)?;
        return Ok(location.rehomed(remote));
    }
    Ok(location.clone())
}

pub(crate) async fn read(
    handle: &StorageHandle,
    location: &FileLocation,
    num_bytes: Option<u64>,
) -> Result<(), FailureCause> {
    let ctx = handle.ctx().clone();
    let state = proxy_state(handle)?;
    let remote_id = resolve_remote(handle, &state, location)?;
    let remote_loc = location.rehomed(remote_id);

    let file = stored_file_at(&ctx, remote_id, &remote_loc)
        .or_else(|| {
            // Cache-only entries are still readable; identify by path.
            let cache_state = ctx.service_state::<Mutex<StoreState>>(state.cache).ok()?;
            let candidate = ctx.file(location.path())?;
            let holds = cache_state.lock().holds_file(candidate.id());
            holds.then_some(candidate)
        })
        .ok_or_else(|| FailureCause::file_not_found(location.object_key()))?;

    let cache = StorageHandle::new(ctx.clone(), state.cache);
    if let Some(cached_at) = cache_location_of(&ctx, state.cache, file.id()) {
        tracing::debug!(proxy = %handle.name(), file = file.id(), "cache hit");
        return read_from(&cache, &cached_at, num_bytes).await;
    }

    tracing::debug!(
        proxy = %handle.name(),
        file = file.id(),
        method = ?state.read_method,
        "cache miss"
    );
    match state.read_method {
        UncachedReadMethod::CopyThenRead => {
            let admit_at = cache_admission_location(&ctx, state.cache, &file)?;
            cache.copy(&remote_loc, &admit_at).await?;
            read_from(&cache, &admit_at, num_bytes).await
        }
        UncachedReadMethod::MagicRead => {
            let admit_at = cache_admission_location(&ctx, state.cache, &file)?;
            let cache_state = ctx.service_state::<Mutex<StoreState>>(state.cache)?;
            cache_state
                .lock()
                .create_file(file.clone(), &admit_at, ctx.now())?;
            read_from(&cache, &admit_at, num_bytes).await
        }
        UncachedReadMethod::ReadThrough => {
            let remote = StorageHandle::new(ctx.clone(), remote_id);
            read_from(&remote, &remote_loc, num_bytes).await?;
            // The streamed bytes were admitted simultaneously; failure to
            // fit simply leaves the cache cold.
            let admit_at = cache_admission_location(&ctx, state.cache, &file)?;
            let cache_state = ctx.service_state::<Mutex<StoreState>>(state.cache)?;
            let admitted = cache_state.lock().create_file(file.clone(), &admit_at, ctx.now());
            if let Err(cause) = admitted {
                tracing::debug!(
                    proxy = %handle.name(),
                    file = file.id(),
                    cause = cause.tag(),
                    "read-through admission skipped"
                );
            }
            Ok(())
        }
    }
}

async fn read_from(
    backing: &StorageHandle,
    location: &FileLocation,
    num_bytes: Option<u64>,
) -> Result<(), FailureCause> {
    backing_read(backing, location, num_bytes).await
}

pub(crate) async fn write(
    handle: &StorageHandle,
    file: &DataFile,
    location: &FileLocation,
) -> Result<(), FailureCause> {
    let ctx = handle.ctx().clone();
    let state = proxy_state(handle)?;
    let remote_id = resolve_remote(handle, &state, location)?;
    let remote = StorageHandle::new(ctx.clone(), remote_id);
    backing_write(&remote, file, &location.rehomed(remote_id)).await?;

    // The cached copy is stale now.
    if let Ok(cache_state) = ctx.service_state::<Mutex<StoreState>>(state.cache) {
        cache_state.lock().delete_file_everywhere(file.id());
    }
    Ok(())
}

pub(crate) async fn delete(
    handle: &StorageHandle,
    location: &FileLocation,
) -> Result<(), FailureCause> {
    let ctx = handle.ctx().clone();
    let state = proxy_state(handle)?;
    let remote_id = resolve_remote(handle, &state, location)?;
    let remote_loc = location.rehomed(remote_id);

    let stale = stored_file_at(&ctx, remote_id, &remote_loc);
    let remote = StorageHandle::new(ctx.clone(), remote_id);
    backing_delete(&remote, &remote_loc).await?;

    if let (Some(file), Ok(cache_state)) = (
        stale,
        ctx.service_state::<Mutex<StoreState>>(state.cache),
    ) {
        cache_state.lock().delete_file_everywhere(file.id());
    }
    Ok(())
}

pub(crate) async fn lookup(
    handle: &StorageHandle,
    location: &FileLocation,
) -> Result<bool, FailureCause> {
    let ctx = handle.ctx().clone();
    let state = proxy_state(handle)?;
    let remote_id = resolve_remote(handle, &state, location)?;
    let remote = StorageHandle::new(ctx.clone(), remote_id);
    backing_lookup(&remote, &location.rehomed(remote_id)).await
}

pub(crate) fn has_file(handle: &StorageHandle, location: &FileLocation) -> bool {
    let Ok(state) = proxy_state(handle) else {
        return false;
    };
    let Ok(remote_id) = resolve_remote(handle, &state, location) else {
        return false;
    };
    stored_file_at(handle.ctx(), remote_id, &location.rehomed(remote_id)).is_some()
}

pub(crate) fn holds_file(handle: &StorageHandle, file_id: &str) -> bool {
    let Ok(state) = proxy_state(handle) else {
        return false;
    };
    let ctx = handle.ctx();
    if let Ok(cache_state) = ctx.service_state::<Mutex<StoreState>>(state.cache) {
        if cache_state.lock().holds_file(file_id) {
            return true;
        }
    }
    state
        .default_remote
        .map(|remote| StorageHandle::new(ctx.clone(), remote).holds_file(file_id))
        .unwrap_or(false)
}

pub(crate) fn cache_free_space(handle: &StorageHandle, mountpoint: &str) -> u64 {
    let Ok(state) = proxy_state(handle) else {
        return 0;
    };
    handle
        .ctx()
        .service_state::<Mutex<StoreState>>(state.cache)
        .map(|s| s.lock().free_space(mountpoint))
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
