//! # Error Taxonomy
//!
//! Domain failures surfaced by the store, the task engine and the client.
//! Handler-level variants become `status=error` responses on the wire; the
//! transport variants only ever reach logs or the local caller.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid credentials")]
    AuthenticationFailure,

    #[error("already logged in")]
    AlreadyAuthenticated,

    #[error("operator not found")]
    OperatorNotFound(String),

    #[error("task not found")]
    TaskNotFound(String),

    #[error("operator already exists")]
    DuplicateOperator(String),

    #[error("invalid conveyor {0}")]
    InvalidConveyor(usize),

    #[error("unknown dictionary {0}")]
    UnknownDictionary(String),

    #[error("malformed message: {0}")]
    ProtocolDecode(#[from] serde_json::Error),

    #[error("connection lost")]
    ConnectionLost,

    #[error("no response within {0} seconds")]
    RequestTimeout(u64),

    #[error("no server found")]
    DiscoveryTimeout,

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("corrupt snapshot {}: {source}", .path.display())]
    Snapshot {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] io::Error),
}

pub type HubResult<T> = Result<T, HubError>;
