//! storage layer for sqlhub
//!
//! Persistence collaborators behind the engine. The engine never talks to
//! SQLite or git directly; it goes through these traits:
//!
//! ```text
//!  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐
//!  │   CommitStore    │   │    BlobStore     │   │ IdentityResolver │
//!  │ commits, refs,   │   │ snapshot and     │   │ email to user    │
//!  │ merge requests   │   │ licence bytes    │   │                  │
//!  └──────────────────┘   └──────────────────┘   └──────────────────┘
//!           │                      │                      │
//!           ▼                      ▼                      ▼
//!     SqliteStore            GitBlobStore            SqliteStore
//! ```
//!
//! Stored snapshots are opened for reading through [`Snapshot`].

mod blob;
mod error;
mod schema;
mod snapshot;
mod sqlite;
mod types;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use blob::{BlobStore, GitBlobStore};
pub use error::{StorageError, StorageResult};
pub use snapshot::{quote_ident, CellValue, RowIdentity, SchemaObject, Snapshot, SnapshotRow, TableLayout};
pub use sqlite::SqliteStore;
pub use types::{BranchRef, CommitId, ContentHash, DatabaseRef, InvalidNameError, RefName, Signature};

use crate::graph::{Commit, CommitMap};
use crate::merge::{Comment, MergeRequest};

/// A branch record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchEntry {
    /// head commit
    pub commit: CommitId,
    /// cached length of the branch history
    pub commit_count: usize,
    pub description: Option<String>,
}

/// Tags and releases live in separate namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Tag,
    Release,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Tag => "tag",
            TagKind::Release => "release",
        }
    }
}

/// A tag or release record. Points at one fixed commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    pub commit: CommitId,
    pub date: DateTime<Utc>,
    pub description: Option<String>,
    pub tagger: Signature,
    /// database size in bytes when the release was made; releases only
    pub size: Option<u64>,
}

/// Database level metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub database: DatabaseRef,
    pub default_branch: String,
    pub created_at: DateTime<Utc>,
}

/// Resolved account for a commit author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorIdentity {
    pub username: String,
    pub avatar_url: Option<String>,
}

/// Persistence of commit graphs, refs and merge requests, per database.
///
/// Owners are matched case-insensitively. Every method is atomic on its own.
pub trait CommitStore: Send + Sync {
    /// Register a database with its root commit and default branch.
    fn create_database(
        &self,
        db: &DatabaseRef,
        default_branch: &str,
        root: &Commit,
        branch: &BranchEntry,
    ) -> StorageResult<()>;

    /// Register a database with a whole commit graph and its branches, as one unit.
    fn import_database(
        &self,
        db: &DatabaseRef,
        default_branch: &str,
        commits: &CommitMap,
        branches: &BTreeMap<String, BranchEntry>,
    ) -> StorageResult<()>;

    fn database_info(&self, db: &DatabaseRef) -> StorageResult<DatabaseInfo>;

    fn database_exists(&self, db: &DatabaseRef) -> StorageResult<bool>;

    /// Every commit of the database. Records whose ids don't match their
    /// content are rejected as corrupted.
    fn load_commits(&self, db: &DatabaseRef) -> StorageResult<CommitMap>;

    /// Store a commit after checking its ids. Storing a commit that is already present is a no-op.
    fn save_commit(&self, db: &DatabaseRef, commit: &Commit) -> StorageResult<()>;

    fn load_branches(&self, db: &DatabaseRef) -> StorageResult<BTreeMap<String, BranchEntry>>;

    fn insert_branch(&self, db: &DatabaseRef, name: &str, entry: &BranchEntry) -> StorageResult<()>;

    /// Move a branch head, only if it still points at `expected`.
    fn update_branch_head(
        &self,
        db: &DatabaseRef,
        name: &str,
        expected: &CommitId,
        new_head: &CommitId,
        commit_count: usize,
    ) -> StorageResult<()>;

    /// Rename and redescribe a branch, repointing the default branch with it.
    fn update_branch(
        &self,
        db: &DatabaseRef,
        old_name: &str,
        new_name: &str,
        description: Option<&str>,
    ) -> StorageResult<()>;

    /// Delete a branch unless it is the default or the only one, checked in the same transaction.
    fn delete_branch(&self, db: &DatabaseRef, name: &str) -> StorageResult<()>;

    fn set_default_branch(&self, db: &DatabaseRef, name: &str) -> StorageResult<()>;

    fn load_tags(&self, db: &DatabaseRef, kind: TagKind) -> StorageResult<BTreeMap<String, TagEntry>>;

    fn insert_tag(&self, db: &DatabaseRef, kind: TagKind, name: &str, entry: &TagEntry) -> StorageResult<()>;

    /// Rename and redescribe a tag or release. The commit never changes.
    fn update_tag(
        &self,
        db: &DatabaseRef,
        kind: TagKind,
        old_name: &str,
        new_name: &str,
        description: Option<&str>,
    ) -> StorageResult<()>;

    fn delete_tag(&self, db: &DatabaseRef, kind: TagKind, name: &str) -> StorageResult<()>;

    /// Store a new merge request under `db` and return its assigned id.
    fn insert_merge_request(&self, db: &DatabaseRef, mr: &MergeRequest) -> StorageResult<u64>;

    fn load_merge_request(&self, db: &DatabaseRef, id: u64) -> StorageResult<MergeRequest>;

    fn list_merge_requests(&self, db: &DatabaseRef) -> StorageResult<Vec<MergeRequest>>;

    fn update_merge_request(&self, db: &DatabaseRef, mr: &MergeRequest) -> StorageResult<()>;

    /// Append to a merge request's thread and return the comment id.
    fn insert_comment(&self, db: &DatabaseRef, mr_id: u64, comment: &Comment) -> StorageResult<u64>;

    /// Thread entries, oldest first.
    fn list_comments(&self, db: &DatabaseRef, mr_id: u64) -> StorageResult<Vec<Comment>>;

    fn update_comment(&self, db: &DatabaseRef, mr_id: u64, comment: &Comment) -> StorageResult<()>;

    fn delete_comment(&self, db: &DatabaseRef, mr_id: u64, comment_id: u64) -> StorageResult<()>;
}

/// Maps commit author emails onto accounts.
pub trait IdentityResolver: Send + Sync {
    /// `None` when no account uses the email.
    fn resolve_author(&self, email: &str) -> StorageResult<Option<AuthorIdentity>>;
}
