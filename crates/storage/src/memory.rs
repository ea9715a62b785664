// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-host page cache with Linux-style two-queue promotion.
//!
//! Blocks live on an *inactive* and an *active* LRU list, both sorted by
//! last access. Admission lands clean blocks on inactive; re-access promotes
//! every block of the file to active; writes land dirty blocks on inactive.
//! A pdflush daemon periodically writes back dirty blocks that have sat
//! untouched past their expiry.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use whirr_core::{FailureCause, ServiceId, SimTime};
use whirr_kernel::{ActorHandle, ServiceEntry, SimCtx};

/// One cached extent of a file.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub file: String,
    pub size: u64,
    pub last_access: SimTime,
    pub dirty: bool,
}

/// Configuration for a host's memory manager.
#[derive(Debug, Clone)]
pub struct MemoryManagerConfig {
    /// Cacheable bytes; defaults to the host's memory capacity.
    pub capacity: Option<u64>,
    /// Fraction of capacity dirty bytes may reach before writes flush
    /// synchronously.
    pub dirty_ratio: f64,
    /// pdflush wake period.
    pub interval: Duration,
    /// Dirty blocks idle past this age get written back by pdflush.
    pub expired_time: Duration,
    /// Memory read bandwidth in bytes per second.
    pub read_bandwidth: u64,
    /// Memory write bandwidth in bytes per second.
    pub write_bandwidth: u64,
    /// Mountpoint of the disk dirty data is flushed to.
    pub flush_mountpoint: String,
}

impl Default for MemoryManagerConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            dirty_ratio: 0.4,
            interval: Duration::from_secs(5),
            expired_time: Duration::from_secs(30),
            read_bandwidth: 6_000_000_000,
            write_bandwidth: 4_000_000_000,
            flush_mountpoint: "/".to_string(),
        }
    }
}

/// Bytes reclaimed while making room, split by how.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reclaimed {
    pub flushed: u64,
    pub evicted: u64,
}

/// The page-cache state machine. Owned exclusively by one host's manager;
/// callers drive it under a lock and charge the returned byte amounts to
/// the disk and memory models themselves.
#[derive(Debug)]
pub struct MemoryManager {
    host: String,
    capacity: u64,
    free: u64,
    cached: u64,
    dirty: u64,
    config: MemoryManagerConfig,
    active: Vec<Block>,
    inactive: Vec<Block>,
}

impl MemoryManager {
    pub fn new(host: impl Into<String>, capacity: u64, config: MemoryManagerConfig) -> Self {
        Self {
            host: host.into(),
            capacity,
            free: capacity,
            cached: 0,
            dirty: 0,
            config,
            active: Vec::new(),
            inactive: Vec::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn free(&self) -> u64 {
        self.free
    }

    pub fn cached(&self) -> u64 {
        self.cached
    }

    pub fn dirty(&self) -> u64 {
        self.dirty
    }

    pub fn config(&self) -> &MemoryManagerConfig {
        &self.config
    }

    pub fn memory_read_time(&self, bytes: u64) -> Duration {
        linear(bytes, self.config.read_bandwidth)
    }

    pub fn memory_write_time(&self, bytes: u64) -> Duration {
        linear(bytes, self.config.write_bandwidth)
    }

    /// Clean bytes on the inactive list, i.e. what eviction could reclaim.
    pub fn evictable(&self) -> u64 {
        self.inactive
            .iter()
            .filter(|b| !b.dirty)
            .map(|b| b.size)
            .sum()
    }

    /// Cached bytes of one file across both lists.
    pub fn cached_bytes(&self, file: &str) -> u64 {
        self.inactive
            .iter()
            .chain(self.active.iter())
            .filter(|b| b.file == file)
            .map(|b| b.size)
            .sum()
    }

    /// Admit freshly-read bytes as a clean block on the inactive list.
    ///
    /// The caller makes room first ([`MemoryManager::make_room`]) and
    /// charges the disk read itself.
    pub fn read_to_cache(&mut self, file: &str, bytes: u64, now: SimTime) {
        self.free = self.free.saturating_sub(bytes);
        self.cached += bytes;
        self.inactive.push(Block {
            file: file.to_string(),
            size: bytes,
            last_access: now,
            dirty: false,
        });
        self.balance_and_sort();
    }

    /// Re-access: pull every block of the file out of both lists and
    /// reinsert the dirty and clean totals into the active list.
    ///
    /// Returns the re-accessed byte count (served at memory speed).
    pub fn read_from_cache(&mut self, file: &str, now: SimTime) -> u64 {
        let mut clean = 0;
        let mut dirty = 0;
        for list in [&mut self.inactive, &mut self.active] {
            list.retain(|b| {
                if b.file == file {
                    if b.dirty {
                        dirty += b.size;
                    } else {
                        clean += b.size;
                    }
                    false
                } else {
                    true
                }
            });
        }
        if clean > 0 {
            self.active.push(Block {
                file: file.to_string(),
                size: clean,
                last_access: now,
                dirty: false,
            });
        }
        if dirty > 0 {
            self.active.push(Block {
                file: file.to_string(),
                size: dirty,
                last_access: now,
                dirty: true,
            });
        }
        self.balance_and_sort();
        clean + dirty
    }

    /// Buffer written bytes as a dirty block on the inactive list.
    ///
    /// The caller makes room and enforces the dirty ratio first.
    pub fn write_to_cache(&mut self, file: &str, bytes: u64, now: SimTime) {
        self.free = self.free.saturating_sub(bytes);
        self.cached += bytes;
        self.dirty += bytes;
        self.inactive.push(Block {
            file: file.to_string(),
            size: bytes,
            last_access: now,
            dirty: true,
        });
        self.balance_and_sort();
    }

    /// Flush up to `amount` dirty bytes, inactive list before active, LRU
    /// order. A partially-flushed head block is split: the flushed portion
    /// becomes a separate clean block keeping its last access.
    ///
    /// Returns the flushed byte count; the caller charges the disk write.
    pub fn flush(&mut self, amount: u64) -> u64 {
        let mut flushed = Self::flush_list(&mut self.inactive, amount);
        if flushed < amount {
            let mut split_spill = Vec::new();
            flushed += Self::flush_list_into(&mut self.active, amount - flushed, &mut split_spill);
            self.inactive.append(&mut split_spill);
        }
        self.dirty = self.dirty.saturating_sub(flushed);
        self.balance_and_sort();
        flushed
    }

    fn flush_list(list: &mut Vec<Block>, amount: u64) -> u64 {
        let mut spill = Vec::new();
        let flushed = Self::flush_list_into(list, amount, &mut spill);
        list.append(&mut spill);
        flushed
    }

    fn flush_list_into(list: &mut [Block], amount: u64, split_out: &mut Vec<Block>) -> u64 {
        if amount == 0 {
            return 0;
        }
        let mut flushed = 0;
        for blk in list.iter_mut() {
            if !blk.dirty {
                continue;
            }
            if flushed + blk.size <= amount {
                blk.dirty = false;
                flushed += blk.size;
            } else if flushed < amount {
                let part = amount - flushed;
                blk.size -= part;
                split_out.push(Block {
                    file: blk.file.clone(),
                    size: part,
                    last_access: blk.last_access,
                    dirty: false,
                });
                flushed = amount;
                break;
            } else {
                break;
            }
        }
        flushed
    }

    /// Write back dirty blocks whose last access is older than the expiry.
    ///
    /// Returns the flushed byte count for disk-time accounting.
    pub fn flush_expired(&mut self, now: SimTime) -> u64 {
        let expired = self.config.expired_time;
        let mut flushed = 0;
        for list in [&mut self.inactive, &mut self.active] {
            for blk in list.iter_mut() {
                if blk.dirty && now.since(blk.last_access) >= expired {
                    blk.dirty = false;
                    flushed += blk.size;
                }
            }
        }
        self.dirty = self.dirty.saturating_sub(flushed);
        flushed
    }

    /// Evict up to `amount` clean bytes from the inactive list, LRU order,
    /// splitting a partial head.
    pub fn evict(&mut self, amount: u64) -> u64 {
        if amount == 0 {
            return 0;
        }
        let mut evicted = 0;
        let mut i = 0;
        while i < self.inactive.len() {
            if self.inactive[i].dirty {
                i += 1;
                continue;
            }
            let size = self.inactive[i].size;
            if evicted + size <= amount {
                self.inactive.remove(i);
                evicted += size;
            } else {
                self.inactive[i].size -= amount - evicted;
                evicted = amount;
                break;
            }
        }
        self.cached = self.cached.saturating_sub(evicted);
        self.free += evicted;
        evicted
    }

    /// Make room for `bytes` of new cache data: evict clean inactive data
    /// first, then flush dirty data and evict again.
    pub fn make_room(&mut self, bytes: u64) -> Reclaimed {
        let mut out = Reclaimed::default();
        if self.free >= bytes {
            return out;
        }
        out.evicted += self.evict(bytes - self.free);
        if self.free < bytes {
            out.flushed += self.flush(bytes - self.free);
            out.evicted += self.evict(bytes - self.free);
        }
        out
    }

    /// Flush whatever is needed so that admitting `incoming` dirty bytes
    /// stays under the dirty ratio.
    pub fn flush_for_dirty_ratio(&mut self, incoming: u64) -> u64 {
        let limit = (self.config.dirty_ratio * self.capacity as f64) as u64;
        let projected = self.dirty + incoming;
        if projected <= limit {
            return 0;
        }
        self.flush(projected - limit)
    }

    /// If the active list outweighs the inactive list by more than 2×, move
    /// the oldest `(active - inactive) / 2` bytes to inactive, splitting the
    /// boundary block; then keep both lists sorted by last access.
    fn balance_and_sort(&mut self) {
        let inactive_size: u64 = self.inactive.iter().map(|b| b.size).sum();
        let active_size: u64 = self.active.iter().map(|b| b.size).sum();

        if active_size > 2 * inactive_size {
            let mut to_move = (active_size - inactive_size) / 2;
            while to_move > 0 && !self.active.is_empty() {
                if self.active[0].size <= to_move {
                    let blk = self.active.remove(0);
                    to_move -= blk.size;
                    self.inactive.push(blk);
                } else {
                    let blk = &mut self.active[0];
                    blk.size -= to_move;
                    self.inactive.push(Block {
                        file: blk.file.clone(),
                        size: to_move,
                        last_access: blk.last_access,
                        dirty: blk.dirty,
                    });
                    to_move = 0;
                }
            }
        }

        self.active.sort_by_key(|b| b.last_access);
        self.inactive.sort_by_key(|b| b.last_access);
    }

    #[cfg(test)]
    pub(crate) fn lists(&self) -> (&[Block], &[Block]) {
        (&self.active, &self.inactive)
    }
}

fn linear(bytes: u64, bandwidth: u64) -> Duration {
    if bytes == 0 || bandwidth == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(bytes as f64 / bandwidth as f64)
}

/// Start the memory manager for a host: registers the shared state and the
/// pdflush daemon.
pub fn start_memory_manager(
    ctx: &SimCtx,
    host: &str,
    config: MemoryManagerConfig,
) -> Result<ServiceId, FailureCause> {
    let platform_host = ctx.platform().require_host(host)?;
    let disk = platform_host
        .disk_at(&config.flush_mountpoint)
        .ok_or_else(|| FailureCause::HostError {
            host: host.to_string(),
            message: format!("no disk at {}", config.flush_mountpoint),
        })?
        .clone();
    let capacity = config.capacity.unwrap_or(platform_host.memory);
    let interval = config.interval;

    let state = Arc::new(Mutex::new(MemoryManager::new(host, capacity, config)));
    let id = ctx.allocate_service_id();
    let name = format!("pdflush-{host}");

    let daemon_ctx = ctx.clone();
    let daemon_state = Arc::clone(&state);
    let handle = ActorHandle::spawn(name.clone(), host, async move {
        loop {
            let start = daemon_ctx.now();
            let flushed = daemon_state.lock().flush_expired(start);
            if flushed > 0 {
                tracing::debug!(flushed, "pdflush wrote back expired dirty data");
                daemon_ctx.clock().sleep(disk.write_time(flushed)).await;
            }
            let elapsed = daemon_ctx.now().since(start);
            if elapsed < interval {
                daemon_ctx.clock().sleep(interval - elapsed).await;
            }
        }
    });

    ctx.register_service(ServiceEntry {
        id,
        name,
        kind: "memory_manager",
        host: host.to_string(),
        mailbox: String::new(),
        handle,
        state,
    });
    Ok(id)
}

/// The page cache managing a host's local I/O, when one was started.
pub fn memory_manager_for(ctx: &SimCtx, host: &str) -> Option<Arc<Mutex<MemoryManager>>> {
    ctx.services_of_kind("memory_manager")
        .into_iter()
        .find(|e| e.host == host && e.handle.is_up())
        .and_then(|e| ctx.service_state::<Mutex<MemoryManager>>(e.id).ok())
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
