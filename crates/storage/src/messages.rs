// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire messages of the storage layer.
//!
//! Requests carry the names of per-request answer mailboxes the caller has
//! opened; replies and outcomes flow back through those. Control messages
//! are charged zero payload bytes, file content is charged at chunk size.

use whirr_core::{DataFile, FailureCause, FileLocation};

/// Requests handled by a storage service's control mailbox.
#[derive(Debug)]
pub enum StorageRequest {
    /// Does the file exist at this location? Answer: `bool`.
    Lookup { location: FileLocation, answer: String },

    /// Stream a file (or its first `num_bytes`) to the caller.
    ///
    /// `reply` (a [`ReadReply`] mailbox) accepts or rejects the read;
    /// accepted reads stream [`FileChunk`]s to `data`, then publish a
    /// [`TransferOutcome`] to `answer`.
    Read {
        location: FileLocation,
        num_bytes: Option<u64>,
        data: String,
        reply: String,
        answer: String,
    },

    /// Reserve space and accept a streamed file.
    ///
    /// `reply` (a [`WriteReply`] mailbox) carries the data-mailbox name to
    /// stream into; the final [`TransferOutcome`] lands on `answer`.
    Write {
        file: DataFile,
        location: FileLocation,
        reply: String,
        answer: String,
    },

    /// Copy `src` to `dst`; addressed to the destination service.
    /// Answer: [`TransferOutcome`].
    Copy {
        src: FileLocation,
        dst: FileLocation,
        answer: String,
    },

    /// Remove the file at a location; idempotent.
    /// Answer: `Result<(), FailureCause>`.
    Delete { location: FileLocation, answer: String },

    /// Internal: a transfer thread finished; finalize state and forward the
    /// outcome to the caller's answer mailboxes.
    TransferDone {
        op: TransferOp,
        file: DataFile,
        location: FileLocation,
        outcome: TransferOutcome,
        answers: AnswerSet,
    },

    /// Graceful stop. Answer: `()` ack after the service winds down.
    Stop { answer: String },
}

/// Which operation a transfer thread was serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOp {
    Read,
    Write,
    Copy,
}

/// Terminal notification of a file transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub success: bool,
    pub cause: Option<FailureCause>,
}

impl TransferOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            cause: None,
        }
    }

    pub fn failed(cause: FailureCause) -> Self {
        Self {
            success: false,
            cause: Some(cause),
        }
    }

    pub fn into_result(self) -> Result<(), FailureCause> {
        if self.success {
            Ok(())
        } else {
            Err(self
                .cause
                .unwrap_or_else(|| FailureCause::internal("transfer failed without a cause")))
        }
    }
}

/// The answer mailboxes a transfer publishes its outcome to: exactly the
/// ones supplied at construction.
#[derive(Debug, Clone, Default)]
pub struct AnswerSet {
    pub read: Option<String>,
    pub write: Option<String>,
    pub copy: Option<String>,
}

impl AnswerSet {
    pub fn for_read(answer: impl Into<String>) -> Self {
        Self {
            read: Some(answer.into()),
            ..Self::default()
        }
    }

    pub fn for_write(answer: impl Into<String>) -> Self {
        Self {
            write: Some(answer.into()),
            ..Self::default()
        }
    }

    pub fn for_copy(answer: impl Into<String>) -> Self {
        Self {
            copy: Some(answer.into()),
            ..Self::default()
        }
    }

    pub fn mailboxes(&self) -> impl Iterator<Item = &str> {
        self.read
            .iter()
            .chain(self.write.iter())
            .chain(self.copy.iter())
            .map(String::as_str)
    }
}

/// First reply to a read request.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadReply {
    Accepted {
        num_bytes: u64,
        chunk_size: Option<u64>,
    },
    Rejected {
        cause: FailureCause,
    },
}

/// First reply to a write request.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteReply {
    Accepted {
        /// Mailbox to stream [`FileChunk`]s into.
        data: String,
        /// Chunking the service expects; `None` means one zero-copy block.
        chunk_size: Option<u64>,
    },
    Rejected {
        cause: FailureCause,
    },
}

/// One block of simulated file content.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChunk {
    pub bytes: u64,
    pub last: bool,
    /// Mailbox to acknowledge on before the next chunk flows (buffered
    /// transfers only).
    pub credit: Option<String>,
}

/// Flow-control acknowledgement for one buffered chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credit;

#[cfg(test)]
#[path = "messages_tests.rs"]
mod tests;
