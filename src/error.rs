use std::io;

use thiserror::Error;

/// Problem with a single log object. The object is skipped and the run continues.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("cannot read {id}: {reason}")]
    Read { id: String, reason: String },
    #[error("cannot decompress {id}: {source}")]
    Decompress {
        id: String,
        #[source]
        source: io::Error,
    },
    #[error("{id} is not valid UTF-8 text")]
    Encoding { id: String },
    #[error("{id} is missing its {what} line")]
    MissingHeader { id: String, what: &'static str },
    #[error("{id} has no '{column}' column")]
    MissingColumn { id: String, column: &'static str },
    #[error("{id} line {line}: expected at most {expected} fields, found {found}")]
    Malformed {
        id: String,
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("{id} does not carry a <prefix>.<YYYY-MM-DD-HH> name")]
    BadName { id: String },
}

impl FileError {
    /// Identifier of the object the error refers to.
    pub fn id(&self) -> &str {
        match self {
            FileError::Read { id, .. }
            | FileError::Decompress { id, .. }
            | FileError::Encoding { id }
            | FileError::MissingHeader { id, .. }
            | FileError::MissingColumn { id, .. }
            | FileError::Malformed { id, .. }
            | FileError::BadName { id } => id,
        }
    }
}

/// Error that aborts the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("log location {location} is unavailable: {reason}")]
    LocationUnavailable { location: String, reason: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("snapshot {location} cannot be loaded: {reason}")]
    Snapshot { location: String, reason: String },
    #[error("cannot persist snapshot to {location}: {reason}")]
    Persist { location: String, reason: String },
    #[error("lane {lane} failed: {reason}")]
    LaneFailed { lane: usize, reason: String },
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] arrow::error::ArrowError),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
