//! Error types for the lake
//!
//! Provides a unified error type for all operations. Every error has an
//! [`ErrorKind`] so callers can match on what went wrong without parsing
//! messages, even after `pool/branch: ...` prefixes have been layered on.

use thiserror::Error;

use crate::uid::Uid;

/// Result type alias using LakeError
pub type Result<T> = std::result::Result<T, LakeError>;

/// Unified error type for lake operations
#[derive(Debug, Error)]
pub enum LakeError {
    // -------------------------------------------------------------------------
    // I/O and Storage Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}: object not found")]
    ObjectNotFound(String),

    /// Exclusive create hit an existing object (a lost journal CAS)
    #[error("{0}: object already exists")]
    ObjectExists(String),

    #[error("operation cancelled")]
    Cancelled,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Journal and KV Errors
    // -------------------------------------------------------------------------
    #[error("empty journal")]
    JournalEmpty,

    #[error("{0}: key already exists")]
    KeyExists(String),

    #[error("{0}: no such key")]
    NoSuchKey(String),

    #[error("{0}: constraint failed")]
    ConstraintFailed(String),

    #[error("{what} unavailable after {attempts} attempts")]
    RetriesExceeded { what: &'static str, attempts: usize },

    // -------------------------------------------------------------------------
    // Lake Errors
    // -------------------------------------------------------------------------
    #[error("{0}: pool already exists")]
    PoolExists(String),

    #[error("{0}: pool not found")]
    PoolNotFound(String),

    #[error("{0}: branch already exists")]
    BranchExists(String),

    #[error("{0}: branch not found")]
    BranchNotFound(String),

    #[error("empty transaction")]
    EmptyTransaction,

    #[error("{0}: commit not found")]
    CommitNotFound(Uid),

    #[error("{0}: add of a duplicate data object")]
    SegmentExists(Uid),

    #[error("{0}: data object not found")]
    SegmentNotFound(Uid),

    /// A merge found objects deleted on both sides since the fork
    #[error("write conflict on merge: {0}")]
    WriteConflict(String),

    // -------------------------------------------------------------------------
    // Argument Errors
    // -------------------------------------------------------------------------
    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Context
    // -------------------------------------------------------------------------
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<LakeError>,
    },
}

/// Coarse classification of a [`LakeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    ObjectNotFound,
    ObjectExists,
    Cancelled,
    Serialization,
    Corruption,
    JournalEmpty,
    KeyExists,
    NoSuchKey,
    ConstraintFailed,
    RetriesExceeded,
    PoolExists,
    PoolNotFound,
    BranchExists,
    BranchNotFound,
    EmptyTransaction,
    CommitNotFound,
    SegmentExists,
    SegmentNotFound,
    WriteConflict,
    InvalidId,
    InvalidArgument,
}

impl LakeError {
    /// The kind of this error, looking through any context prefixes
    pub fn kind(&self) -> ErrorKind {
        match self {
            LakeError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::ObjectNotFound
            }
            LakeError::Io(_) => ErrorKind::Io,
            LakeError::ObjectNotFound(_) => ErrorKind::ObjectNotFound,
            LakeError::ObjectExists(_) => ErrorKind::ObjectExists,
            LakeError::Cancelled => ErrorKind::Cancelled,
            LakeError::Serialization(_) => ErrorKind::Serialization,
            LakeError::Corruption(_) => ErrorKind::Corruption,
            LakeError::JournalEmpty => ErrorKind::JournalEmpty,
            LakeError::KeyExists(_) => ErrorKind::KeyExists,
            LakeError::NoSuchKey(_) => ErrorKind::NoSuchKey,
            LakeError::ConstraintFailed(_) => ErrorKind::ConstraintFailed,
            LakeError::RetriesExceeded { .. } => ErrorKind::RetriesExceeded,
            LakeError::PoolExists(_) => ErrorKind::PoolExists,
            LakeError::PoolNotFound(_) => ErrorKind::PoolNotFound,
            LakeError::BranchExists(_) => ErrorKind::BranchExists,
            LakeError::BranchNotFound(_) => ErrorKind::BranchNotFound,
            LakeError::EmptyTransaction => ErrorKind::EmptyTransaction,
            LakeError::CommitNotFound(_) => ErrorKind::CommitNotFound,
            LakeError::SegmentExists(_) => ErrorKind::SegmentExists,
            LakeError::SegmentNotFound(_) => ErrorKind::SegmentNotFound,
            LakeError::WriteConflict(_) => ErrorKind::WriteConflict,
            LakeError::InvalidId(_) => ErrorKind::InvalidId,
            LakeError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LakeError::Context { source, .. } => source.kind(),
        }
    }

    /// Shorthand for `self.kind() == kind`
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }

    /// Wrap this error with a contextual prefix
    pub fn context(self, context: impl Into<String>) -> Self {
        LakeError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<bincode::Error> for LakeError {
    fn from(e: bincode::Error) -> Self {
        LakeError::Serialization(e.to_string())
    }
}

/// Adds a contextual prefix to the error of a `Result`
pub trait ResultExt<T> {
    fn context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.context(f()))
    }
}
