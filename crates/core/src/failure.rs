// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The closed set of failure causes surfaced by the simulator.
//!
//! Every operation in the core fails with one of these variants; raw
//! transport conditions are collapsed into `ServiceIsDown` or `NetworkError`
//! before they reach a controller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an operation, action, or job failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    #[error("file not found: {file}")]
    FileNotFound { file: String },

    #[error("not enough space on {service}: requested {requested} bytes, {free} free")]
    NotEnoughSpace {
        service: String,
        requested: u64,
        free: u64,
    },

    #[error("not enough resources: {message}")]
    NotEnoughResources { message: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("service is down: {service}")]
    ServiceIsDown { service: String },

    #[error("network error: {message}")]
    NetworkError { message: String },

    #[error("host error on {host}: {message}")]
    HostError { host: String, message: String },

    #[error("job timed out: {job}")]
    JobTimeout { job: String },

    #[error("job killed: {job}")]
    JobKilled { job: String },

    #[error("internal error: {message}")]
    InternalError { message: String },
}

impl FailureCause {
    pub fn file_not_found(file: impl Into<String>) -> Self {
        FailureCause::FileNotFound { file: file.into() }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        FailureCause::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn not_enough_resources(message: impl Into<String>) -> Self {
        FailureCause::NotEnoughResources {
            message: message.into(),
        }
    }

    pub fn service_is_down(service: impl Into<String>) -> Self {
        FailureCause::ServiceIsDown {
            service: service.into(),
        }
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        FailureCause::NetworkError {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        FailureCause::InternalError {
            message: message.into(),
        }
    }

    /// Short tag for log fields and event summaries.
    pub fn tag(&self) -> &'static str {
        match self {
            FailureCause::FileNotFound { .. } => "file_not_found",
            FailureCause::NotEnoughSpace { .. } => "not_enough_space",
            FailureCause::NotEnoughResources { .. } => "not_enough_resources",
            FailureCause::InvalidArgument { .. } => "invalid_argument",
            FailureCause::ServiceIsDown { .. } => "service_is_down",
            FailureCause::NetworkError { .. } => "network_error",
            FailureCause::HostError { .. } => "host_error",
            FailureCause::JobTimeout { .. } => "job_timeout",
            FailureCause::JobKilled { .. } => "job_killed",
            FailureCause::InternalError { .. } => "internal_error",
        }
    }
}

#[cfg(test)]
#[path = "failure_tests.rs"]
mod tests;
