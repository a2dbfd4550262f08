//! Engine-level error types.
//!
//! Every operation exposed by the hub returns a `HubError`. Callers that need
//! to translate failures (HTTP status codes, exit codes) switch on `kind()`.

use thiserror::Error;

use crate::storage::{InvalidNameError, StorageError};

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// unknown commit, branch, tag, release, database or merge request
    NotFound,
    /// duplicate name, or a lost race on a branch head
    Conflict,
    /// bad name, length or characters
    InvalidArgument,
    /// deleting the default or last branch, merging an unusable request
    PreconditionFailed,
    /// storage or blob failures, broken history
    Internal,
    /// branches with no fast-forward relationship
    BadRequest,
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("{what} already exists: {name}")]
    Conflict { what: &'static str, name: String },

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// the destination has commits the source does not know about
    #[error("no common ancestor between {from} and {onto}")]
    NoCommonAncestor { from: String, onto: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    /// a pointer into the commit map leads nowhere
    #[error("broken history: {0}")]
    BrokenHistory(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HubError::Storage(e) if e.is_not_found() => ErrorKind::NotFound,
            HubError::Storage(e) if e.is_conflict() => ErrorKind::Conflict,
            HubError::Storage(e) if e.is_precondition() => ErrorKind::PreconditionFailed,
            HubError::Storage(StorageError::InvalidName(_)) => ErrorKind::InvalidArgument,
            HubError::Storage(_) => ErrorKind::Internal,
            HubError::InvalidName(_) | HubError::InvalidConfig(_) => ErrorKind::InvalidArgument,
            HubError::NotFound { .. } => ErrorKind::NotFound,
            HubError::Conflict { .. } => ErrorKind::Conflict,
            HubError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            HubError::NoCommonAncestor { .. } | HubError::BadRequest(_) => ErrorKind::BadRequest,
            HubError::BrokenHistory(_) | HubError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn not_found(what: &'static str, name: impl ToString) -> Self {
        HubError::NotFound {
            what,
            name: name.to_string(),
        }
    }

    pub(crate) fn conflict(what: &'static str, name: impl ToString) -> Self {
        HubError::Conflict {
            what,
            name: name.to_string(),
        }
    }
}

pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let e: HubError = StorageError::BranchNotFound("main".into()).into();
        assert_eq!(e.kind(), ErrorKind::NotFound);

        let e: HubError = StorageError::ConcurrentModification { branch: "main".into() }.into();
        assert_eq!(e.kind(), ErrorKind::Conflict);

        let e: HubError = StorageError::Io(std::io::Error::other("disk")).into();
        assert_eq!(e.kind(), ErrorKind::Internal);

        let e: HubError = InvalidNameError::Empty.into();
        assert_eq!(e.kind(), ErrorKind::InvalidArgument);

        let e = HubError::NoCommonAncestor {
            from: "a:main".into(),
            onto: "b:main".into(),
        };
        assert_eq!(e.kind(), ErrorKind::BadRequest);
        assert_eq!(HubError::BrokenHistory("x".into()).kind(), ErrorKind::Internal);
    }
}
