// src/errors.rs
//! Engine-wide error taxonomy.
//!
//! - Domain operations return precise variants callers can match on
//!   (`NotFound` vs `Ambiguous`, `AlreadyDeleted`, ...).
//! - Storage/config plumbing keeps `anyhow` internally and funnels into
//!   `Storage` at the service boundary, so snapshot failures carry path
//!   context without widening the public surface.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No atom or principle matches the given id or prefix.
    #[error("{entity} not found: {reference}")]
    NotFound {
        entity: &'static str,
        reference: String,
    },

    /// A prefix resolves to more than one record, or is too short to be
    /// resolvable at all (full ids are 36 chars; prefixes need >= 8).
    #[error(
        "ambiguous {entity} prefix '{reference}' ({matches} candidates); \
         provide at least 8 characters or the full id"
    )]
    Ambiguous {
        entity: &'static str,
        reference: String,
        matches: usize,
    },

    /// Candidate `type` string is outside the closed memory-type enum.
    #[error("invalid memory type: '{0}'")]
    InvalidType(String),

    /// Filter or record `dimension` string is outside the closed enum.
    #[error("invalid principle dimension: '{0}'")]
    InvalidDimension(String),

    /// Mutation attempted on a soft-deleted principle.
    #[error("principle already deleted: {0}")]
    AlreadyDeleted(String),

    /// The writer lock could not be acquired within the retry window.
    #[error("store locked by another writer: {0}")]
    Locked(String),

    /// Snapshot or log I/O failed; the last good snapshot is left untouched.
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn atom_not_found(reference: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: "atom",
            reference: reference.into(),
        }
    }

    pub fn principle_not_found(reference: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: "principle",
            reference: reference.into(),
        }
    }

    /// True for both atom and principle misses; handy for CLI-side fallbacks.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }
}
