//! The hub facade.
//!
//! `Hub` owns the persistence collaborators and exposes every operation the
//! page layer needs. Handles are cheap to clone and safe to share between
//! request workers; each call reloads the state it needs from the store.
//!
//! # Example
//!
//! ```no_run
//! use sqlhub::hub::{Hub, HubConfig};
//! use sqlhub::storage::{DatabaseRef, Signature};
//!
//! let hub = Hub::open(HubConfig::new("./hub-data")).unwrap();
//! let db = DatabaseRef::new("alice", "stats.sqlite").unwrap();
//! let bytes = std::fs::read("stats.sqlite").unwrap();
//! hub.create_database(&db, &bytes, None, Signature::new("Alice", "alice@example.org"), "Initial commit")
//!     .unwrap();
//! ```

mod commits;
mod config;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use commits::CommitData;
pub use config::HubConfig;

use crate::error::{HubError, HubResult};
use crate::graph::{AncestorCommits, CommitOrder};
use crate::merge::{Comment, MergeOrchestrator, MergeOutcome, MergeRequest};
use crate::refs::RefManager;
use crate::storage::{
    BlobStore, BranchEntry, BranchRef, CommitId, CommitStore, DatabaseRef, GitBlobStore, IdentityResolver,
    Signature, SqliteStore, TagEntry, TagKind,
};

/// A commit in a specific database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub database: DatabaseRef,
    pub commit: CommitId,
}

impl CommitRef {
    pub fn new(database: DatabaseRef, commit: CommitId) -> Self {
        Self { database, commit }
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.database, self.commit.short())
    }
}

struct HubInner {
    store: Arc<dyn CommitStore>,
    identities: Arc<dyn IdentityResolver>,
    blobs: Arc<dyn BlobStore>,
    config: HubConfig,
}

/// Version control core for hosted SQLite databases.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Open the stores under `config.data_dir`.
    pub fn open(config: HubConfig) -> HubResult<Self> {
        config.validate()?;

        if !config.data_dir.exists() {
            if !config.create_if_missing {
                return Err(HubError::not_found("data directory", config.data_dir.display()));
            }
            std::fs::create_dir_all(&config.data_dir).map_err(crate::storage::StorageError::from)?;
        }

        let store = Arc::new(SqliteStore::open(config.metadata_path())?);
        let blobs = Arc::new(GitBlobStore::open_or_init(config.blob_path())?);
        tracing::info!(data_dir = %config.data_dir.display(), "opened hub");

        Ok(Self::with_collaborators(config, store.clone(), store, blobs))
    }

    /// Build a hub over explicitly provided collaborators.
    pub fn with_collaborators(
        config: HubConfig,
        store: Arc<dyn CommitStore>,
        identities: Arc<dyn IdentityResolver>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                store,
                identities,
                blobs,
                config,
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub(crate) fn store(&self) -> &dyn CommitStore {
        self.inner.store.as_ref()
    }

    pub(crate) fn blobs(&self) -> &dyn BlobStore {
        self.inner.blobs.as_ref()
    }

    pub(crate) fn identities(&self) -> &dyn IdentityResolver {
        self.inner.identities.as_ref()
    }

    fn refs(&self) -> RefManager<'_> {
        RefManager::new(self.store(), self.blobs()).max_name_length(self.inner.config.max_name_length)
    }

    fn merges(&self) -> MergeOrchestrator<'_> {
        MergeOrchestrator::new(self.store())
    }

    // ========== Read accessors ==========

    pub fn get_branches(&self, db: &DatabaseRef) -> HubResult<BTreeMap<String, BranchEntry>> {
        Ok(self.store().load_branches(db)?)
    }

    pub fn default_branch(&self, db: &DatabaseRef) -> HubResult<String> {
        Ok(self.store().database_info(db)?.default_branch)
    }

    pub fn get_tags(&self, db: &DatabaseRef) -> HubResult<BTreeMap<String, TagEntry>> {
        Ok(self.store().load_tags(db, TagKind::Tag)?)
    }

    pub fn get_releases(&self, db: &DatabaseRef) -> HubResult<BTreeMap<String, TagEntry>> {
        Ok(self.store().load_tags(db, TagKind::Release)?)
    }

    pub(crate) fn branch_head(&self, db: &DatabaseRef, branch: &str) -> HubResult<BranchEntry> {
        self.store()
            .load_branches(db)?
            .remove(branch)
            .ok_or_else(|| HubError::not_found("branch", branch))
    }

    /// Commits a fast-forward of `destination` to `source` would apply.
    /// The two branches may belong to different databases.
    pub fn common_ancestor_commits(
        &self,
        source: &BranchRef,
        destination: &BranchRef,
        order: CommitOrder,
    ) -> HubResult<AncestorCommits> {
        self.merges().compare(source, destination, order)
    }

    // ========== Branches, tags and releases ==========

    pub fn create_branch(
        &self,
        db: &DatabaseRef,
        name: &str,
        from_commit: &CommitId,
        description: Option<&str>,
    ) -> HubResult<BranchEntry> {
        self.refs().create_branch(db, name, from_commit, description)
    }

    pub fn update_branch(
        &self,
        db: &DatabaseRef,
        name: &str,
        new_name: Option<&str>,
        description: Option<&str>,
    ) -> HubResult<()> {
        self.refs().update_branch(db, name, new_name, description)
    }

    pub fn delete_branch(&self, db: &DatabaseRef, name: &str) -> HubResult<()> {
        self.refs().delete_branch(db, name)
    }

    pub fn set_default_branch(&self, db: &DatabaseRef, name: &str) -> HubResult<()> {
        self.refs().set_default_branch(db, name)
    }

    pub fn reset_branch(&self, db: &DatabaseRef, name: &str, commit: &CommitId) -> HubResult<()> {
        self.refs().reset_branch(db, name, commit)
    }

    pub fn create_tag(
        &self,
        db: &DatabaseRef,
        kind: TagKind,
        name: &str,
        commit: &CommitId,
        description: Option<&str>,
        tagger: Signature,
    ) -> HubResult<TagEntry> {
        self.refs().create_tag(db, kind, name, commit, description, tagger)
    }

    pub fn update_tag(
        &self,
        db: &DatabaseRef,
        kind: TagKind,
        name: &str,
        new_name: Option<&str>,
        description: Option<&str>,
    ) -> HubResult<()> {
        self.refs().update_tag(db, kind, name, new_name, description)
    }

    pub fn delete_tag(&self, db: &DatabaseRef, kind: TagKind, name: &str) -> HubResult<()> {
        self.refs().delete_tag(db, kind, name)
    }

    // ========== Merge requests ==========

    /// Open a merge request; it is stored under the destination database.
    pub fn create_merge_request(
        &self,
        title: &str,
        description: Option<&str>,
        creator: &str,
        source: BranchRef,
        destination: BranchRef,
    ) -> HubResult<MergeRequest> {
        self.merges().create(title, description, creator, source, destination)
    }

    pub fn merge_request(&self, db: &DatabaseRef, id: u64) -> HubResult<MergeRequest> {
        Ok(self.store().load_merge_request(db, id)?)
    }

    pub fn list_merge_requests(&self, db: &DatabaseRef) -> HubResult<Vec<MergeRequest>> {
        Ok(self.store().list_merge_requests(db)?)
    }

    /// Re-check whether the request can still be fast-forwarded.
    pub fn refresh_merge_request(&self, db: &DatabaseRef, id: u64) -> HubResult<MergeRequest> {
        self.merges().refresh(db, id)
    }

    /// Fast-forward the destination; `by` is recorded on the request's thread.
    pub fn merge(&self, db: &DatabaseRef, id: u64, by: &str) -> HubResult<MergeOutcome> {
        self.merges().merge(db, id, by)
    }

    pub fn close_merge_request(&self, db: &DatabaseRef, id: u64, by: &str) -> HubResult<MergeRequest> {
        self.merges().close(db, id, by)
    }

    pub fn reopen_merge_request(&self, db: &DatabaseRef, id: u64, by: &str) -> HubResult<MergeRequest> {
        self.merges().reopen(db, id, by)
    }

    pub fn add_comment(&self, db: &DatabaseRef, id: u64, commenter: &str, body: &str) -> HubResult<Comment> {
        self.merges().add_comment(db, id, commenter, body)
    }

    /// The request's thread, oldest first, state changes included.
    pub fn merge_request_comments(&self, db: &DatabaseRef, id: u64) -> HubResult<Vec<Comment>> {
        self.merges().comments(db, id)
    }

    pub fn update_comment(&self, db: &DatabaseRef, id: u64, comment_id: u64, body: &str) -> HubResult<Comment> {
        self.merges().update_comment(db, id, comment_id, body)
    }

    pub fn delete_comment(&self, db: &DatabaseRef, id: u64, comment_id: u64) -> HubResult<()> {
        self.merges().delete_comment(db, id, comment_id)
    }
}
