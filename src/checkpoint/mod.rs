//! Durable per-thread snapshots. Every backend keeps exactly one live
//! checkpoint per thread and refuses to go backwards in `run_seq`.

pub mod file;
pub mod memory;
pub mod sqlite;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use crate::shared::ThreadId;
use crate::state::StateDocument;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointReason {
    RunCompleted,
    Suspended,
}

impl CheckpointReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RunCompleted => "run-completed",
            Self::Suspended => "suspended",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "run-completed" => Some(Self::RunCompleted),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub run_seq: u64,
    pub created_at: i64,
    pub reason: CheckpointReason,
    pub state: StateDocument,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to open checkpoint database {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("checkpoint sql error: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("checkpoint for thread `{thread_id}` has run_seq {stored}; refusing {proposed}")]
    StaleSequence {
        thread_id: String,
        stored: u64,
        proposed: u64,
    },
    #[error("invalid checkpoint record for thread `{thread_id}`: {reason}")]
    Corrupt { thread_id: String, reason: String },
}

/// Keyed snapshot storage.
///
/// `put` must be durable when it returns, must reject a `run_seq` that is
/// not strictly greater than the stored one, and must leave exactly one
/// retained snapshot per thread once it completes.
pub trait CheckpointStore: Send + Sync {
    fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    fn get(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Number of snapshots currently retained for `thread_id`.
    fn retained(&self, thread_id: &ThreadId) -> Result<usize, CheckpointError>;

    fn threads(&self) -> Result<Vec<ThreadId>, CheckpointError>;
}

pub(crate) fn check_sequence(
    thread_id: &ThreadId,
    stored: Option<u64>,
    proposed: u64,
) -> Result<(), CheckpointError> {
    match stored {
        Some(stored) if proposed <= stored => Err(CheckpointError::StaleSequence {
            thread_id: thread_id.to_string(),
            stored,
            proposed,
        }),
        _ => Ok(()),
    }
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> CheckpointError {
    CheckpointError::Io {
        path: path.display().to_string(),
        source,
    }
}

pub(crate) fn json_error(path: &Path, source: serde_json::Error) -> CheckpointError {
    CheckpointError::Json {
        path: path.display().to_string(),
        source,
    }
}
