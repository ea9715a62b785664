// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage-service state: what lives where, and how much room is left.
//!
//! Space accounting is eager: write reservations are taken before any byte
//! moves and released if the transfer fails. Free space on a mount is
//! `capacity - committed - reserved` at all times.

use indexmap::IndexMap;
use whirr_core::{DataFile, FailureCause, FileLocation, SimTime};

/// What a cache-configured service does when a reservation does not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachingBehavior {
    /// Reject with `NotEnoughSpace`.
    #[default]
    None,
    /// Evict least-recently-accessed files until the reservation fits.
    Lru,
}

impl CachingBehavior {
    /// Parse the `CACHING_BEHAVIOR` config key.
    pub fn from_key(key: &str) -> Result<Self, FailureCause> {
        match key {
            "NONE" => Ok(Self::None),
            "LRU" => Ok(Self::Lru),
            other => Err(FailureCause::invalid_argument(format!(
                "unknown CACHING_BEHAVIOR {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredFile {
    file: DataFile,
    last_access: SimTime,
}

#[derive(Debug)]
struct MountState {
    capacity: u64,
    committed: u64,
    reserved: u64,
    files: IndexMap<String, StoredFile>,
}

impl MountState {
    fn free(&self) -> u64 {
        self.capacity
            .saturating_sub(self.committed)
            .saturating_sub(self.reserved)
    }
}

/// Shared state of one storage service, across its mountpoints.
#[derive(Debug)]
pub struct StoreState {
    service_name: String,
    caching: CachingBehavior,
    mounts: IndexMap<String, MountState>,
}

impl StoreState {
    pub fn new(
        service_name: impl Into<String>,
        mounts: impl IntoIterator<Item = (String, u64)>,
        caching: CachingBehavior,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            caching,
            mounts: mounts
                .into_iter()
                .map(|(mountpoint, capacity)| {
                    (
                        mountpoint,
                        MountState {
                            capacity,
                            committed: 0,
                            reserved: 0,
                            files: IndexMap::new(),
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// First mountpoint, the default home for cache-managed entries.
    pub fn primary_mount(&self) -> Option<&str> {
        self.mounts.keys().next().map(String::as_str)
    }

    pub fn has_mount(&self, mountpoint: &str) -> bool {
        self.mounts.contains_key(mountpoint)
    }

    pub fn free_space(&self, mountpoint: &str) -> u64 {
        self.mounts.get(mountpoint).map(|m| m.free()).unwrap_or(0)
    }

    pub fn committed(&self, mountpoint: &str) -> u64 {
        self.mounts.get(mountpoint).map(|m| m.committed).unwrap_or(0)
    }

    pub fn reserved(&self, mountpoint: &str) -> u64 {
        self.mounts.get(mountpoint).map(|m| m.reserved).unwrap_or(0)
    }

    pub fn has_file(&self, location: &FileLocation) -> bool {
        self.file_at(location).is_some()
    }

    pub fn file_at(&self, location: &FileLocation) -> Option<DataFile> {
        self.mounts
            .get(location.mountpoint())
            .and_then(|m| m.files.get(location.path()))
            .map(|s| s.file.clone())
    }

    /// Whether the file is stored anywhere on this service (cache hit test).
    pub fn holds_file(&self, file_id: &str) -> bool {
        self.mounts
            .values()
            .any(|m| m.files.values().any(|s| s.file.id() == file_id))
    }

    /// All files on the service, LRU first.
    pub fn files_lru(&self) -> Vec<(String, DataFile, SimTime)> {
        let mut all: Vec<(String, DataFile, SimTime)> = self
            .mounts
            .iter()
            .flat_map(|(mountpoint, m)| {
                m.files.iter().map(move |(path, s)| {
                    (
                        format!("{mountpoint}\u{0}{path}"),
                        s.file.clone(),
                        s.last_access,
                    )
                })
            })
            .collect();
        all.sort_by_key(|(_, _, at)| *at);
        all
    }

    /// Record an access for LRU bookkeeping.
    pub fn touch(&mut self, location: &FileLocation, now: SimTime) {
        if let Some(stored) = self
            .mounts
            .get_mut(location.mountpoint())
            .and_then(|m| m.files.get_mut(location.path()))
        {
            stored.last_access = now;
        }
    }

    /// Take an eager reservation for an incoming write, evicting under LRU
    /// caching when the mount is full.
    pub fn reserve(
        &mut self,
        location: &FileLocation,
        bytes: u64,
        now: SimTime,
    ) -> Result<(), FailureCause> {
        if self.caching == CachingBehavior::Lru {
            self.evict_for(location.mountpoint(), bytes, now)?;
        }
        let service = self.service_name.clone();
        let mount = self.require_mount_mut(location.mountpoint())?;
        if mount.free() < bytes {
            return Err(FailureCause::NotEnoughSpace {
                service,
                requested: bytes,
                free: mount.free(),
            });
        }
        mount.reserved += bytes;
        Ok(())
    }

    /// Release a reservation after a failed transfer.
    pub fn release(&mut self, location: &FileLocation, bytes: u64) {
        if let Some(mount) = self.mounts.get_mut(location.mountpoint()) {
            mount.reserved = mount.reserved.saturating_sub(bytes);
        }
    }

    /// Convert a reservation into a committed file.
    pub fn commit(&mut self, file: DataFile, location: &FileLocation, now: SimTime) {
        if let Some(mount) = self.mounts.get_mut(location.mountpoint()) {
            mount.reserved = mount.reserved.saturating_sub(file.size());
            // Overwriting an existing entry frees the old bytes first.
            if let Some(old) = mount.files.shift_remove(location.path()) {
                mount.committed = mount.committed.saturating_sub(old.file.size());
            }
            mount.committed += file.size();
            mount.files.insert(
                location.path().to_string(),
                StoredFile {
                    file,
                    last_access: now,
                },
            );
        }
    }

    /// Instant population for initial-state seeding; no simulated time
    /// passes. Evicts under LRU caching when full.
    pub fn create_file(
        &mut self,
        file: DataFile,
        location: &FileLocation,
        now: SimTime,
    ) -> Result<(), FailureCause> {
        self.reserve(location, file.size(), now)?;
        self.commit(file, location, now);
        Ok(())
    }

    /// Idempotent removal.
    pub fn delete(&mut self, location: &FileLocation) {
        if let Some(mount) = self.mounts.get_mut(location.mountpoint()) {
            if let Some(old) = mount.files.shift_remove(location.path()) {
                mount.committed = mount.committed.saturating_sub(old.file.size());
            }
        }
    }

    /// Remove every copy of a file, across mounts (cache invalidation).
    pub fn delete_file_everywhere(&mut self, file_id: &str) {
        for mount in self.mounts.values_mut() {
            let doomed: Vec<String> = mount
                .files
                .iter()
                .filter(|(_, s)| s.file.id() == file_id)
                .map(|(path, _)| path.clone())
                .collect();
            for path in doomed {
                if let Some(old) = mount.files.shift_remove(&path) {
                    mount.committed = mount.committed.saturating_sub(old.file.size());
                }
            }
        }
    }

    fn require_mount_mut(&mut self, mountpoint: &str) -> Result<&mut MountState, FailureCause> {
        let service = self.service_name.clone();
        self.mounts.get_mut(mountpoint).ok_or_else(|| {
            FailureCause::invalid_argument(format!("{service}: no mountpoint {mountpoint}"))
        })
    }

    /// Evict least-recently-accessed files on `mountpoint` until `bytes`
    /// fit. Files are whole-file evicted, oldest access first.
    fn evict_for(
        &mut self,
        mountpoint: &str,
        bytes: u64,
        _now: SimTime,
    ) -> Result<(), FailureCause> {
        let service = self.service_name.clone();
        let mount = self.require_mount_mut(mountpoint)?;
        if mount.free() >= bytes || bytes > mount.capacity {
            return Ok(());
        }
        let mut order: Vec<(String, SimTime)> = mount
            .files
            .iter()
            .map(|(path, s)| (path.clone(), s.last_access))
            .collect();
        order.sort_by_key(|(_, at)| *at);
        for (path, _) in order {
            if mount.free() >= bytes {
                break;
            }
            if let Some(evicted) = mount.files.shift_remove(&path) {
                mount.committed = mount.committed.saturating_sub(evicted.file.size());
                tracing::debug!(
                    service = %service,
                    file = evicted.file.id(),
                    "evicted from cache"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
