//! Engine error taxonomy.
//!
//! Leaf failures (file reads, allocation) travel up as `anyhow` errors at
//! load time; once a snapshot is live, query failures use this typed enum
//! so the request layer can map them to response documents.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Unparsable request, coordinate out of range, malformed hint.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A coordinate could not be snapped within the requested radius.
    #[error("no matching segment for coordinate {index}")]
    NoSegment { index: usize },

    /// Search exhausted without the two frontiers meeting.
    #[error("no route found between the given coordinates")]
    NoRoute,

    /// Artifact fingerprint mismatch at load or swap.
    #[error("incompatible artifact version: {0}")]
    IncompatibleVersion(String),

    /// Allocation failure or search budget exceeded.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// A snapshot swap landed mid-request; retried once by the caller.
    #[error("snapshot reloaded during request")]
    SnapshotReloadRace,
}

impl EngineError {
    /// Stable machine-readable code for response documents.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "InvalidInput",
            EngineError::NoSegment { .. } => "NoSegment",
            EngineError::NoRoute => "NoRoute",
            EngineError::IncompatibleVersion(_) => "IncompatibleVersion",
            EngineError::ResourceExhaustion(_) => "ResourceExhaustion",
            EngineError::SnapshotReloadRace => "SnapshotReloadRace",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
