//! Error types for embervec.
//!
//! Every fallible operation returns [`Error`], which falls into one of three kinds:
//! malformed input ([`ValidationError`]), internal or I/O failure ([`DatabaseError`]),
//! or a configured resource ceiling being hit.

use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Database,
    ResourceExhausted,
}

/// Top-level error returned by collection operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input rejected before any state was touched.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Internal failure: I/O, corrupted files, or a broken invariant.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// A configured resource limit would be exceeded.
    #[error("resource exhausted: {resource} would reach {requested} bytes (limit {limit})")]
    ResourceExhausted {
        resource: &'static str,
        requested: usize,
        limit: usize,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Database(_) => ErrorKind::Database,
            Error::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub fn is_database(&self) -> bool {
        self.kind() == ErrorKind::Database
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Database(DatabaseError::Io(e))
    }
}

/// Input rejected at the API boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("vector id must be a non-empty string")]
    EmptyId,

    #[error("vector must not be empty")]
    EmptyVector,

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("dimension {dimension} exceeds the maximum of {max}")]
    DimensionTooLarge { dimension: usize, max: usize },

    #[error("vector component at index {index} is not finite")]
    NonFiniteValue { index: usize },

    #[error("k must be in 1..={max}, got {k}")]
    InvalidK { k: usize, max: usize },

    #[error("beamwidth must be in 1..={max}, got {beamwidth}")]
    InvalidBeamwidth { beamwidth: usize, max: usize },

    #[error("id '{0}' already exists")]
    DuplicateId(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("batch length mismatch: {what} has {actual} entries, expected {expected}")]
    BatchLengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("configuration mismatch: {0}")]
    ConfigMismatch(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no persistence path configured")]
    NoPersistencePath,

    #[error("collection '{0}' already exists")]
    CollectionExists(String),

    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("invalid collection name '{0}'")]
    InvalidCollectionName(String),
}

/// Internal failure surfaced to the caller.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupted data: {0}")]
    Corrupted(String),

    #[error("unsupported format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl From<bincode::Error> for DatabaseError {
    fn from(e: bincode::Error) -> Self {
        DatabaseError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Database(e.into())
    }
}
