// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Platform description: hosts, disks, and links.
//!
//! The platform is externally defined and immutable during a run. The
//! simulator consumes only these derived structs; loading them from a TOML
//! document stands in for the platform-parsing collaborator.

use crate::failure::FailureCause;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// A disk attached to a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    pub name: String,
    pub mountpoint: String,
    pub capacity: u64,
    /// Sustained read bandwidth in bytes per second.
    pub read_bandwidth: u64,
    /// Sustained write bandwidth in bytes per second.
    pub write_bandwidth: u64,
}

impl Disk {
    pub fn read_time(&self, bytes: u64) -> Duration {
        linear_time(bytes, self.read_bandwidth)
    }

    pub fn write_time(&self, bytes: u64) -> Duration {
        linear_time(bytes, self.write_bandwidth)
    }
}

/// A compute host with cores, memory, and disks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub cores: u32,
    /// Per-core speed in flops per second.
    pub core_speed: f64,
    pub memory: u64,
    #[serde(default)]
    pub disks: Vec<Disk>,
}

impl Host {
    pub fn disk_at(&self, mountpoint: &str) -> Option<&Disk> {
        self.disks.iter().find(|d| d.mountpoint == mountpoint)
    }
}

/// A network link between two hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    /// Bandwidth in bytes per second.
    pub bandwidth: u64,
    /// One-way latency in microseconds.
    pub latency_us: u64,
    pub endpoints: (String, String),
}

impl Link {
    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.latency_us)
    }
}

/// The full platform document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Platform {
    /// Parse and validate a platform from TOML text.
    pub fn from_toml(text: &str) -> Result<Platform, FailureCause> {
        let platform: Platform = toml::from_str(text)
            .map_err(|e| FailureCause::invalid_argument(format!("platform: {e}")))?;
        platform.validate()?;
        Ok(platform)
    }

    /// Parse and validate a platform TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Platform, FailureCause> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FailureCause::invalid_argument(format!("platform {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn require_host(&self, name: &str) -> Result<&Host, FailureCause> {
        self.host(name).ok_or_else(|| FailureCause::HostError {
            host: name.to_string(),
            message: "unknown host".to_string(),
        })
    }

    /// The link connecting two hosts, in either direction.
    pub fn link_between(&self, a: &str, b: &str) -> Option<&Link> {
        self.links.iter().find(|l| {
            (l.endpoints.0 == a && l.endpoints.1 == b) || (l.endpoints.0 == b && l.endpoints.1 == a)
        })
    }

    fn validate(&self) -> Result<(), FailureCause> {
        for (i, host) in self.hosts.iter().enumerate() {
            if host.cores == 0 {
                return Err(FailureCause::invalid_argument(format!(
                    "host {} has zero cores",
                    host.name
                )));
            }
            if self.hosts[..i].iter().any(|h| h.name == host.name) {
                return Err(FailureCause::invalid_argument(format!(
                    "duplicate host name {}",
                    host.name
                )));
            }
            for (j, disk) in host.disks.iter().enumerate() {
                if host.disks[..j].iter().any(|d| d.mountpoint == disk.mountpoint) {
                    return Err(FailureCause::invalid_argument(format!(
                        "host {}: duplicate mountpoint {}",
                        host.name, disk.mountpoint
                    )));
                }
                if disk.read_bandwidth == 0 || disk.write_bandwidth == 0 {
                    return Err(FailureCause::invalid_argument(format!(
                        "host {}: disk {} has zero bandwidth",
                        host.name, disk.name
                    )));
                }
            }
        }
        for link in &self.links {
            if link.bandwidth == 0 {
                return Err(FailureCause::invalid_argument(format!(
                    "link {} has zero bandwidth",
                    link.name
                )));
            }
        }
        Ok(())
    }
}

fn linear_time(bytes: u64, bandwidth: u64) -> Duration {
    if bytes == 0 || bandwidth == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(bytes as f64 / bandwidth as f64)
}

#[cfg(test)]
#[path = "platform_tests.rs"]
mod tests;
