//! Error types shared across the crate.
//!
//! Functions that can only fail in ways callers may want to match on
//! return [`SrpError`] directly; orchestration code wraps everything in
//! `anyhow::Result` and adds context at the call site.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SrpError {
    /// A feature name was registered twice.
    #[error("feature '{0}' is already registered")]
    DuplicateFeature(String),

    /// A feature declared no stage functions, or wired a per-entry
    /// function into a one-shot slot (or vice versa).
    #[error("feature '{0}' is malformed")]
    InvalidFeature(String),

    /// A requirement or requested feature that no registered feature
    /// provides.
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),

    /// The pre/post constraints of the enabled features form a cycle.
    /// `names` holds every feature participating in it, sorted.
    #[error("circular feature dependencies: {names:?}")]
    CircularDependency { names: Vec<String> },

    /// A payload node of a kind the archive format cannot carry.
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// An archive entry could not be written to (or read from) disk.
    #[error("failed to extract {path}")]
    Extraction {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Recorded libraries that do not resolve on the target system.
    #[error("missing required libraries: {missing:?}")]
    MissingDependency { missing: Vec<String> },

    /// A stage function failed; carries the feature/stage identity so the
    /// user can tell which step of the run broke.
    #[error("{feature}.{stage} failed")]
    StageExecution {
        feature: String,
        stage: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    /// Archive header (de)serialization failure.
    #[error("malformed archive header")]
    Header(#[from] bincode::Error),
}
