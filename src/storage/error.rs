//! Storage layer error types
//!
//! All errors that can occur while talking to the persistence collaborators
//! (metadata store, blob store, snapshot files) are defined here.

use thiserror::Error;

use crate::storage::types::InvalidNameError;

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the git object database backing the blob store
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// error from SQLite (metadata store or snapshot file)
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// a stored identifier failed validation on the way back in
    #[error("invalid stored name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// the database is not known to the store
    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    /// the database already exists
    #[error("database already exists: {0}")]
    DatabaseAlreadyExists(String),

    /// the specified branch was not found
    #[error("branch not found: {0}")]
    BranchNotFound(String),

    /// branch already exists
    #[error("branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// the specified tag or release was not found
    #[error("{kind} not found: {name}")]
    TagNotFound { kind: &'static str, name: String },

    /// tag or release already exists
    #[error("{kind} already exists: {name}")]
    TagAlreadyExists { kind: &'static str, name: String },

    /// the merge request was not found
    #[error("merge request not found: #{0}")]
    MergeRequestNotFound(u64),

    /// the comment was not found on the merge request
    #[error("comment not found: #{0}")]
    CommentNotFound(u64),

    /// the branch is protected from deletion
    #[error("cannot delete branch {branch}: {reason}")]
    BranchProtected { branch: String, reason: &'static str },

    /// the requested blob is not in the store
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// data integrity check failed
    #[error("corrupted data for {key}: {reason}")]
    CorruptedData { key: String, reason: String },

    /// branch head update lost a race with another writer
    #[error("concurrent modification: branch {branch} was updated by another request")]
    ConcurrentModification { branch: String },
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::DatabaseNotFound(_)
                | StorageError::BranchNotFound(_)
                | StorageError::TagNotFound { .. }
                | StorageError::MergeRequestNotFound(_)
                | StorageError::CommentNotFound(_)
                | StorageError::BlobNotFound(_)
        )
    }

    /// check if this error is a conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::DatabaseAlreadyExists(_)
                | StorageError::BranchAlreadyExists(_)
                | StorageError::TagAlreadyExists { .. }
                | StorageError::ConcurrentModification { .. }
        )
    }

    /// check if this error is a refused operation on existing data
    pub fn is_precondition(&self) -> bool {
        matches!(self, StorageError::BranchProtected { .. })
    }

    /// check if this error is recoverable by retry
    pub fn is_retriable(&self) -> bool {
        matches!(self, StorageError::ConcurrentModification { .. })
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
