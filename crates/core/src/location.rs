// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File locations.
//!
//! A location names where a file may live: a storage service, a mountpoint
//! on that service, and a path. Locations are values with structural
//! equality; whether the file actually exists there is storage-service
//! state.

use crate::id::ServiceId;
use serde::{Deserialize, Serialize};

/// Routing overlay for reads/writes that must flow through a proxy.
///
/// `target` is the remote the bytes ultimately live on; `proxy` is the
/// fronting service the request is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyOverlay {
    pub target: ServiceId,
    pub proxy: ServiceId,
}

/// `(service, mountpoint, path)` plus an optional proxy overlay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileLocation {
    service: ServiceId,
    mountpoint: String,
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    proxy: Option<ProxyOverlay>,
}

impl FileLocation {
    pub fn new(
        service: ServiceId,
        mountpoint: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            service,
            mountpoint: sanitize(mountpoint.into()),
            path: path.into(),
            proxy: None,
        }
    }

    /// A location whose reads and writes are forced through `proxy`,
    /// resolving against the explicit `target` remote rather than the
    /// proxy's default.
    pub fn via_proxy(
        target: ServiceId,
        proxy: ServiceId,
        mountpoint: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            service: proxy,
            mountpoint: sanitize(mountpoint.into()),
            path: path.into(),
            proxy: Some(ProxyOverlay { target, proxy }),
        }
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn mountpoint(&self) -> &str {
        &self.mountpoint
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn proxy(&self) -> Option<&ProxyOverlay> {
        self.proxy.as_ref()
    }

    /// Same triple, re-addressed to a different service.
    ///
    /// Used when a proxy resolves a location against its cache or one of
    /// its remotes. Drops any overlay.
    pub fn rehomed(&self, service: ServiceId) -> FileLocation {
        FileLocation {
            service,
            mountpoint: self.mountpoint.clone(),
            path: self.path.clone(),
            proxy: None,
        }
    }

    /// Storage key within one service: `mountpoint/path`.
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.mountpoint.trim_end_matches('/'), self.path)
    }
}

impl std::fmt::Display for FileLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.service, self.object_key())
    }
}

/// Collapse duplicate slashes and guarantee a leading one.
fn sanitize(mountpoint: String) -> String {
    let trimmed = mountpoint.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
#[path = "location_tests.rs"]
mod tests;
