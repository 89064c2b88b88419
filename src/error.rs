//! Crate-wide error types.

use thiserror::Error;

/// Errors surfaced by the filesystem adapter boundary.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("out of memory")]
    Oom,
    #[error("io error: {0}")]
    Io(String),
}

/// Errors from the transaction journal.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal full for evse {0}")]
    Full(u32),
    #[error("transaction not found: evse={evse_id} tx_nr={tx_nr}")]
    NotFound { evse_id: u32, tx_nr: u32 },
    #[error("record corrupt: evse={evse_id} tx_nr={tx_nr}")]
    Corrupt { evse_id: u32, tx_nr: u32 },
    #[error("out of memory")]
    Oom,
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Errors from the configuration / variable store.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown key: {0}")]
    NotSupported(String),
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    #[error("value rejected for {key}: {reason}")]
    Rejected { key: String, reason: String },
    #[error("key is read-only: {0}")]
    ReadOnly(String),
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Errors surfaced by the message queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no connection")]
    Offline,
    #[error("request timed out")]
    Timeout,
    #[error("server returned CallError: {code}: {description}")]
    CallError { code: String, description: String },
    #[error("unexpected response shape: {0}")]
    InvalidResponse(String),
}

/// Errors surfaced by the transaction engine's begin/end protocol.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a transaction is already active on evse {0}")]
    AlreadyActive(u32),
    #[error(transparent)]
    Journal(#[from] JournalError),
}
