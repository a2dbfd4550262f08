//! Merge request lifecycle: creation, mergeability checks and fast-forwards.
//!
//! Merging never creates commits. The recorded source commits are copied into
//! the destination's commit store and the destination head is moved to the
//! newest one, guarded by a compare-and-swap on the head it was checked against.
//! Closing, reopening and merging leave an event entry on the request's thread.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, HubError, HubResult};
use crate::graph::{branch_history, commit_count, common_ancestor, AncestorCommits, Commit, CommitOrder};
use crate::merge::comment::{Comment, CommentKind};
use crate::merge::request::{MergeRequest, MergeRequestState, MergeStatus};
use crate::storage::{BranchRef, CommitId, CommitStore, ContentHash, DatabaseRef};

pub const DESTINATION_CHANGED: &str = "Destination branch has changed. Merge cannot proceed.";
pub const DESTINATION_MISSING: &str = "Destination branch is no longer available.";
pub const SOURCE_MISSING: &str = "Source branch is no longer available.";
pub const NOTHING_TO_MERGE: &str = "Source and destination branches are identical.";

/// A commit whose licence differs from the destination head's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenceWarning {
    pub commit: CommitId,
    pub destination_licence: Option<ContentHash>,
    pub commit_licence: Option<ContentHash>,
}

/// Result of a merge call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// destination head after the call
    pub head: CommitId,
    /// number of commits the head moved over; 0 for a repeated merge
    pub applied: usize,
    pub licence_warnings: Vec<LicenceWarning>,
}

/// Drives merge requests against a commit store.
pub struct MergeOrchestrator<'a> {
    store: &'a dyn CommitStore,
}

impl<'a> MergeOrchestrator<'a> {
    pub fn new(store: &'a dyn CommitStore) -> Self {
        Self { store }
    }

    fn branch_head(&self, branch: &BranchRef) -> HubResult<CommitId> {
        self.store
            .load_branches(&branch.database)?
            .remove(&branch.branch)
            .map(|entry| entry.commit)
            .ok_or_else(|| HubError::not_found("branch", branch))
    }

    /// Commits a fast-forward of `destination` to `source` would apply.
    pub fn compare(
        &self,
        source: &BranchRef,
        destination: &BranchRef,
        order: CommitOrder,
    ) -> HubResult<AncestorCommits> {
        let src_head = self.branch_head(source)?;
        let dst_head = self.branch_head(destination)?;
        let src_commits = self.store.load_commits(&source.database)?;

        common_ancestor(&src_head, &src_commits, &dst_head, order).map_err(|e| match e {
            HubError::NoCommonAncestor { .. } => HubError::NoCommonAncestor {
                from: source.to_string(),
                onto: destination.to_string(),
            },
            e => e,
        })
    }

    /// Open a merge request on the destination database.
    pub fn create(
        &self,
        title: &str,
        description: Option<&str>,
        creator: &str,
        source: BranchRef,
        destination: BranchRef,
    ) -> HubResult<MergeRequest> {
        let found = self.compare(&source, &destination, CommitOrder::NewestFirst)?;
        if found.commits.is_empty() {
            return Err(HubError::BadRequest(NOTHING_TO_MERGE.to_string()));
        }

        let mut mr = MergeRequest::new(title, creator, source, destination, found.commits);
        if let Some(description) = description {
            mr = mr.with_description(description);
        }
        mr.status = Some(MergeStatus {
            usable: true,
            source_available: true,
            message: None,
        });
        mr.id = self.store.insert_merge_request(&mr.destination.database, &mr)?;

        tracing::info!(
            id = mr.id,
            source = %mr.source,
            destination = %mr.destination,
            commits = mr.commits.len(),
            "opened merge request"
        );
        Ok(mr)
    }

    fn source_available(&self, source: &BranchRef) -> HubResult<bool> {
        if !self.store.database_exists(&source.database)? {
            return Ok(false);
        }
        Ok(self.store.load_branches(&source.database)?.contains_key(&source.branch))
    }

    /// Check the request against the current heads, refreshing its commits.
    ///
    /// Returns the status along with the destination head it was checked
    /// against, which is `None` when the destination branch is gone.
    fn evaluate(&self, mr: &mut MergeRequest) -> HubResult<(MergeStatus, Option<CommitId>)> {
        let dst_head = match self.branch_head(&mr.destination) {
            Ok(head) => head,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let status = MergeStatus {
                    usable: false,
                    source_available: self.source_available(&mr.source)?,
                    message: Some(DESTINATION_MISSING.to_string()),
                };
                mr.status = Some(status.clone());
                return Ok((status, None));
            }
            Err(e) => return Err(e),
        };

        let status = if self.source_available(&mr.source)? {
            match self.compare(&mr.source, &mr.destination, CommitOrder::NewestFirst) {
                Ok(found) if found.commits.is_empty() => MergeStatus {
                    usable: false,
                    source_available: true,
                    message: Some(NOTHING_TO_MERGE.to_string()),
                },
                Ok(found) => {
                    mr.commits = found.commits;
                    MergeStatus {
                        usable: true,
                        source_available: true,
                        message: None,
                    }
                }
                Err(HubError::NoCommonAncestor { .. }) => MergeStatus {
                    usable: false,
                    source_available: true,
                    message: Some(DESTINATION_CHANGED.to_string()),
                },
                Err(e) => return Err(e),
            }
        } else if mr.merge_point() == Some(&dst_head) {
            // best effort with the commits recorded earlier
            MergeStatus {
                usable: true,
                source_available: false,
                message: Some(SOURCE_MISSING.to_string()),
            }
        } else {
            MergeStatus {
                usable: false,
                source_available: false,
                message: Some(DESTINATION_CHANGED.to_string()),
            }
        };

        mr.status = Some(status.clone());
        Ok((status, Some(dst_head)))
    }

    /// Commits the destination needs so the whole history of `new_head` is
    /// present, oldest first. That includes commits merged into the source
    /// through extra parents. Without the source, only the recorded commits
    /// are available.
    fn commits_to_copy(&self, mr: &MergeRequest, new_head: &CommitId) -> HubResult<Vec<Commit>> {
        let recorded = || -> Vec<Commit> { mr.commits.iter().rev().cloned().collect() };
        if !self.store.database_exists(&mr.source.database)? {
            return Ok(recorded());
        }
        let src_commits = self.store.load_commits(&mr.source.database)?;
        if !src_commits.contains_key(new_head) {
            return Ok(recorded());
        }
        Ok(branch_history(new_head, &src_commits)?
            .into_iter()
            .rev()
            .cloned()
            .collect())
    }

    fn record_event(&self, db: &DatabaseRef, id: u64, kind: CommentKind, by: &str) -> HubResult<()> {
        self.store.insert_comment(db, id, &Comment::event(kind, by))?;
        Ok(())
    }

    /// Recompute mergeability and store the refreshed request.
    pub fn refresh(&self, db: &DatabaseRef, id: u64) -> HubResult<MergeRequest> {
        let mut mr = self.store.load_merge_request(db, id)?;
        if mr.state == MergeRequestState::Open {
            self.evaluate(&mut mr)?;
            self.store.update_merge_request(db, &mr)?;
        }
        Ok(mr)
    }

    /// Fast-forward the destination branch.
    ///
    /// Merging an already merged request whose destination still sits on the
    /// merged head is a no-op.
    pub fn merge(&self, db: &DatabaseRef, id: u64, by: &str) -> HubResult<MergeOutcome> {
        let mut mr = self.store.load_merge_request(db, id)?;

        if mr.state == MergeRequestState::Merged {
            let head = self.branch_head(&mr.destination)?;
            if mr.target_head() == Some(&head) {
                return Ok(MergeOutcome {
                    head,
                    applied: 0,
                    licence_warnings: Vec::new(),
                });
            }
            return Err(HubError::PreconditionFailed(format!(
                "merge request #{} was already merged",
                id
            )));
        }
        if mr.state != MergeRequestState::Open {
            return Err(HubError::PreconditionFailed(format!(
                "merge request #{} is {}",
                id, mr.state
            )));
        }

        let dst_head = match self.evaluate(&mut mr)? {
            (status, Some(head)) if status.usable => head,
            (status, _) => {
                self.store.update_merge_request(db, &mr)?;
                return Err(HubError::PreconditionFailed(
                    status.message.unwrap_or_else(|| DESTINATION_CHANGED.to_string()),
                ));
            }
        };
        for commit in &mr.commits {
            commit.verify_id()?;
        }

        let destination = &mr.destination;
        let mut dst_commits = self.store.load_commits(&destination.database)?;
        let head_commit = dst_commits
            .get(&dst_head)
            .ok_or_else(|| HubError::BrokenHistory(format!("head of {} missing from commit map", destination)))?;
        let dst_licence = head_commit.licence_sha().cloned();

        let licence_warnings: Vec<LicenceWarning> = mr
            .commits
            .iter()
            .filter(|c| c.licence_sha() != dst_licence.as_ref())
            .map(|c| LicenceWarning {
                commit: c.id.clone(),
                destination_licence: dst_licence.clone(),
                commit_licence: c.licence_sha().cloned(),
            })
            .collect();
        for warning in &licence_warnings {
            tracing::warn!(
                destination = %destination,
                commit = warning.commit.short(),
                "commit licence differs from destination head"
            );
        }

        let new_head = mr
            .target_head()
            .cloned()
            .ok_or_else(|| HubError::BadRequest(NOTHING_TO_MERGE.to_string()))?;

        for commit in self.commits_to_copy(&mr, &new_head)? {
            if !dst_commits.contains_key(&commit.id) {
                self.store.save_commit(&destination.database, &commit)?;
                dst_commits.insert(commit.id.clone(), commit);
            }
        }
        let count = commit_count(&new_head, &dst_commits)?;
        self.store
            .update_branch_head(&destination.database, &destination.branch, &dst_head, &new_head, count)?;

        mr.mark_merged()?;
        self.store.update_merge_request(db, &mr)?;
        self.record_event(db, id, CommentKind::Merge, by)?;

        tracing::info!(id, destination = %mr.destination, head = new_head.short(), "merged");
        Ok(MergeOutcome {
            head: new_head,
            applied: mr.commits.len(),
            licence_warnings,
        })
    }

    pub fn close(&self, db: &DatabaseRef, id: u64, by: &str) -> HubResult<MergeRequest> {
        let mut mr = self.store.load_merge_request(db, id)?;
        mr.close()?;
        self.store.update_merge_request(db, &mr)?;
        self.record_event(db, id, CommentKind::Close, by)?;
        tracing::info!(id, by, "closed merge request");
        Ok(mr)
    }

    pub fn reopen(&self, db: &DatabaseRef, id: u64, by: &str) -> HubResult<MergeRequest> {
        let mut mr = self.store.load_merge_request(db, id)?;
        mr.reopen()?;
        self.store.update_merge_request(db, &mr)?;
        self.record_event(db, id, CommentKind::Reopen, by)?;
        tracing::info!(id, by, "reopened merge request");
        Ok(mr)
    }

    // ========== Discussion ==========

    /// Comment on a merge request in any state.
    pub fn add_comment(&self, db: &DatabaseRef, id: u64, commenter: &str, body: &str) -> HubResult<Comment> {
        if body.trim().is_empty() {
            return Err(HubError::BadRequest("comment is empty".to_string()));
        }
        let mut comment = Comment::text(commenter, body);
        comment.id = self.store.insert_comment(db, id, &comment)?;
        tracing::debug!(id, comment = comment.id, "added comment");
        Ok(comment)
    }

    pub fn comments(&self, db: &DatabaseRef, id: u64) -> HubResult<Vec<Comment>> {
        Ok(self.store.list_comments(db, id)?)
    }

    /// Find a text comment. Event entries are history and can't be edited.
    fn editable_comment(&self, db: &DatabaseRef, id: u64, comment_id: u64) -> HubResult<Comment> {
        let comment = self
            .store
            .list_comments(db, id)?
            .into_iter()
            .find(|c| c.id == comment_id)
            .ok_or_else(|| HubError::not_found("comment", comment_id))?;
        if comment.is_event() {
            return Err(HubError::BadRequest(format!(
                "comment {} records a state change and can't be changed",
                comment_id
            )));
        }
        Ok(comment)
    }

    pub fn update_comment(&self, db: &DatabaseRef, id: u64, comment_id: u64, body: &str) -> HubResult<Comment> {
        if body.trim().is_empty() {
            return Err(HubError::BadRequest("comment is empty".to_string()));
        }
        let mut comment = self.editable_comment(db, id, comment_id)?;
        comment.body = body.to_string();
        comment.updated_at = Some(Utc::now());
        self.store.update_comment(db, id, &comment)?;
        Ok(comment)
    }

    pub fn delete_comment(&self, db: &DatabaseRef, id: u64, comment_id: u64) -> HubResult<()> {
        self.editable_comment(db, id, comment_id)?;
        self.store.delete_comment(db, id, comment_id)?;
        tracing::debug!(id, comment = comment_id, "deleted comment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::BTreeMap;

    use parking_lot::Mutex;

    use crate::graph::CommitMap;
    use crate::storage::{BranchEntry, DatabaseInfo, SqliteStore, StorageResult, TagEntry, TagKind};
    use crate::test_util::{commit_on, root_commit};

    struct Fixture {
        store: SqliteStore,
        db: DatabaseRef,
        map: CommitMap,
        c0: CommitId,
    }

    /// one database, main and stuff both at c0
    fn setup_fixture() -> Fixture {
        let store = SqliteStore::open_in_memory().unwrap();
        let db = DatabaseRef::new("alice", "stats.sqlite").unwrap();
        let mut map = CommitMap::new();
        let c0 = root_commit(&mut map, "c0");
        let entry = BranchEntry {
            commit: c0.clone(),
            commit_count: 1,
            description: None,
        };
        store.create_database(&db, "main", &map[&c0], &entry).unwrap();
        store.insert_branch(&db, "stuff", &entry).unwrap();
        Fixture { store, db, map, c0 }
    }

    fn advance(store: &SqliteStore, db: &DatabaseRef, map: &mut CommitMap, branch: &str, label: &str) -> CommitId {
        let head = store.load_branches(db).unwrap()[branch].clone();
        let id = commit_on(map, &head.commit, &[], label);
        store.save_commit(db, &map[&id]).unwrap();
        store
            .update_branch_head(db, branch, &head.commit, &id, head.commit_count + 1)
            .unwrap();
        id
    }

    fn branch(f: &Fixture, name: &str) -> BranchRef {
        BranchRef::new(f.db.clone(), name)
    }

    /// Store where another writer moves a branch right before the next head update.
    struct RacingStore<'a> {
        inner: &'a SqliteStore,
        rival: Mutex<Option<(String, CommitId)>>,
    }

    impl<'a> RacingStore<'a> {
        fn new(inner: &'a SqliteStore, branch: &str, to: CommitId) -> Self {
            Self {
                inner,
                rival: Mutex::new(Some((branch.to_string(), to))),
            }
        }
    }

    impl CommitStore for RacingStore<'_> {
        fn create_database(
            &self,
            db: &DatabaseRef,
            default_branch: &str,
            root: &Commit,
            branch: &BranchEntry,
        ) -> StorageResult<()> {
            self.inner.create_database(db, default_branch, root, branch)
        }
        fn import_database(
            &self,
            db: &DatabaseRef,
            default_branch: &str,
            commits: &CommitMap,
            branches: &BTreeMap<String, BranchEntry>,
        ) -> StorageResult<()> {
            self.inner.import_database(db, default_branch, commits, branches)
        }
        fn database_info(&self, db: &DatabaseRef) -> StorageResult<DatabaseInfo> {
            self.inner.database_info(db)
        }
        fn database_exists(&self, db: &DatabaseRef) -> StorageResult<bool> {
            self.inner.database_exists(db)
        }
        fn load_commits(&self, db: &DatabaseRef) -> StorageResult<CommitMap> {
            self.inner.load_commits(db)
        }
        fn save_commit(&self, db: &DatabaseRef, commit: &Commit) -> StorageResult<()> {
            self.inner.save_commit(db, commit)
        }
        fn load_branches(&self, db: &DatabaseRef) -> StorageResult<BTreeMap<String, BranchEntry>> {
            self.inner.load_branches(db)
        }
        fn insert_branch(&self, db: &DatabaseRef, name: &str, entry: &BranchEntry) -> StorageResult<()> {
            self.inner.insert_branch(db, name, entry)
        }
        fn update_branch_head(
            &self,
            db: &DatabaseRef,
            name: &str,
            expected: &CommitId,
            new_head: &CommitId,
            commit_count: usize,
        ) -> StorageResult<()> {
            if let Some((branch, to)) = self.rival.lock().take() {
                let current = self.inner.load_branches(db)?.remove(&branch).unwrap();
                self.inner
                    .update_branch_head(db, &branch, &current.commit, &to, current.commit_count + 1)?;
            }
            self.inner.update_branch_head(db, name, expected, new_head, commit_count)
        }
        fn update_branch(
            &self,
            db: &DatabaseRef,
            old_name: &str,
            new_name: &str,
            description: Option<&str>,
        ) -> StorageResult<()> {
            self.inner.update_branch(db, old_name, new_name, description)
        }
        fn delete_branch(&self, db: &DatabaseRef, name: &str) -> StorageResult<()> {
            self.inner.delete_branch(db, name)
        }
        fn set_default_branch(&self, db: &DatabaseRef, name: &str) -> StorageResult<()> {
            self.inner.set_default_branch(db, name)
        }
        fn load_tags(&self, db: &DatabaseRef, kind: TagKind) -> StorageResult<BTreeMap<String, TagEntry>> {
            self.inner.load_tags(db, kind)
        }
        fn insert_tag(&self, db: &DatabaseRef, kind: TagKind, name: &str, entry: &TagEntry) -> StorageResult<()> {
            self.inner.insert_tag(db, kind, name, entry)
        }
        fn update_tag(
            &self,
            db: &DatabaseRef,
            kind: TagKind,
            old_name: &str,
            new_name: &str,
            description: Option<&str>,
        ) -> StorageResult<()> {
            self.inner.update_tag(db, kind, old_name, new_name, description)
        }
        fn delete_tag(&self, db: &DatabaseRef, kind: TagKind, name: &str) -> StorageResult<()> {
            self.inner.delete_tag(db, kind, name)
        }
        fn insert_merge_request(&self, db: &DatabaseRef, mr: &MergeRequest) -> StorageResult<u64> {
            self.inner.insert_merge_request(db, mr)
        }
        fn load_merge_request(&self, db: &DatabaseRef, id: u64) -> StorageResult<MergeRequest> {
            self.inner.load_merge_request(db, id)
        }
        fn list_merge_requests(&self, db: &DatabaseRef) -> StorageResult<Vec<MergeRequest>> {
            self.inner.list_merge_requests(db)
        }
        fn update_merge_request(&self, db: &DatabaseRef, mr: &MergeRequest) -> StorageResult<()> {
            self.inner.update_merge_request(db, mr)
        }
        fn insert_comment(&self, db: &DatabaseRef, mr_id: u64, comment: &Comment) -> StorageResult<u64> {
            self.inner.insert_comment(db, mr_id, comment)
        }
        fn list_comments(&self, db: &DatabaseRef, mr_id: u64) -> StorageResult<Vec<Comment>> {
            self.inner.list_comments(db, mr_id)
        }
        fn update_comment(&self, db: &DatabaseRef, mr_id: u64, comment: &Comment) -> StorageResult<()> {
            self.inner.update_comment(db, mr_id, comment)
        }
        fn delete_comment(&self, db: &DatabaseRef, mr_id: u64, comment_id: u64) -> StorageResult<()> {
            self.inner.delete_comment(db, mr_id, comment_id)
        }
    }

    #[test]
    fn test_merge_fast_forwards_once() {
        let mut f = setup_fixture();
        let c1 = advance(&f.store, &f.db, &mut f.map, "main", "c1");
        let merges = MergeOrchestrator::new(&f.store);

        let mr = merges
            .create("update stuff", None, "alice", branch(&f, "main"), branch(&f, "stuff"))
            .unwrap();
        assert_eq!(mr.id, 1);
        assert_eq!(mr.commits.len(), 1);
        assert_eq!(mr.merge_point(), Some(&f.c0));

        let outcome = merges.merge(&f.db, mr.id, "alice").unwrap();
        assert_eq!(outcome.head, c1);
        assert_eq!(outcome.applied, 1);

        let stuff = f.store.load_branches(&f.db).unwrap()["stuff"].clone();
        assert_eq!(stuff.commit, c1);
        assert_eq!(stuff.commit_count, 2);

        let again = merges.merge(&f.db, mr.id, "alice").unwrap();
        assert_eq!(again.head, c1);
        assert_eq!(again.applied, 0);
    }

    #[test]
    fn test_create_needs_commits() {
        let f = setup_fixture();
        let merges = MergeOrchestrator::new(&f.store);
        let err = merges
            .create("noop", None, "alice", branch(&f, "main"), branch(&f, "stuff"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_diverged_destination_blocks_merge() {
        let mut f = setup_fixture();
        advance(&f.store, &f.db, &mut f.map, "main", "c1");
        let merges = MergeOrchestrator::new(&f.store);
        let mr = merges
            .create("update stuff", None, "alice", branch(&f, "main"), branch(&f, "stuff"))
            .unwrap();

        advance(&f.store, &f.db, &mut f.map, "stuff", "local work");

        let refreshed = merges.refresh(&f.db, mr.id).unwrap();
        let status = refreshed.status.unwrap();
        assert!(!status.usable);
        assert_eq!(status.message.as_deref(), Some(DESTINATION_CHANGED));

        let err = merges.merge(&f.db, mr.id, "alice").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        assert_eq!(
            f.store.load_merge_request(&f.db, mr.id).unwrap().state,
            MergeRequestState::Open
        );
    }

    #[test]
    fn test_refresh_picks_up_new_source_commits() {
        let mut f = setup_fixture();
        advance(&f.store, &f.db, &mut f.map, "main", "c1");
        let merges = MergeOrchestrator::new(&f.store);
        let mr = merges
            .create("update stuff", None, "alice", branch(&f, "main"), branch(&f, "stuff"))
            .unwrap();

        let c2 = advance(&f.store, &f.db, &mut f.map, "main", "c2");
        let refreshed = merges.refresh(&f.db, mr.id).unwrap();
        assert_eq!(refreshed.commits.len(), 2);
        assert_eq!(refreshed.target_head(), Some(&c2));
    }

    #[test]
    fn test_missing_source_falls_back_to_recorded_commits() {
        let mut f = setup_fixture();
        f.store
            .insert_branch(
                &f.db,
                "feature",
                &BranchEntry {
                    commit: f.c0.clone(),
                    commit_count: 1,
                    description: None,
                },
            )
            .unwrap();
        let c1 = advance(&f.store, &f.db, &mut f.map, "feature", "feature work");
        let merges = MergeOrchestrator::new(&f.store);
        let mr = merges
            .create("feature", None, "alice", branch(&f, "feature"), branch(&f, "main"))
            .unwrap();

        f.store.delete_branch(&f.db, "feature").unwrap();

        let refreshed = merges.refresh(&f.db, mr.id).unwrap();
        let status = refreshed.status.unwrap();
        assert!(status.usable);
        assert!(!status.source_available);

        let outcome = merges.merge(&f.db, mr.id, "alice").unwrap();
        assert_eq!(outcome.head, c1);
    }

    #[test]
    fn test_close_and_reopen() {
        let mut f = setup_fixture();
        advance(&f.store, &f.db, &mut f.map, "main", "c1");
        let merges = MergeOrchestrator::new(&f.store);
        let mr = merges
            .create("update stuff", None, "alice", branch(&f, "main"), branch(&f, "stuff"))
            .unwrap();

        merges.close(&f.db, mr.id, "alice").unwrap();
        assert_eq!(merges.merge(&f.db, mr.id, "alice").unwrap_err().kind(), ErrorKind::PreconditionFailed);

        let reopened = merges.reopen(&f.db, mr.id, "alice").unwrap();
        assert_eq!(reopened.state, MergeRequestState::Open);
        assert!(merges.merge(&f.db, mr.id, "alice").is_ok());
    }

    #[test]
    fn test_destination_moved_during_merge() {
        let mut f = setup_fixture();
        advance(&f.store, &f.db, &mut f.map, "main", "c1");
        let rival = commit_on(&mut f.map, &f.c0, &[], "rival");
        f.store.save_commit(&f.db, &f.map[&rival]).unwrap();

        let mr = MergeOrchestrator::new(&f.store)
            .create("update stuff", None, "alice", branch(&f, "main"), branch(&f, "stuff"))
            .unwrap();

        let racing = RacingStore::new(&f.store, "stuff", rival.clone());
        let err = MergeOrchestrator::new(&racing).merge(&f.db, mr.id, "alice").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        assert_eq!(f.store.load_branches(&f.db).unwrap()["stuff"].commit, rival);
        assert_eq!(
            f.store.load_merge_request(&f.db, mr.id).unwrap().state,
            MergeRequestState::Open
        );
        assert!(f.store.list_comments(&f.db, mr.id).unwrap().is_empty());
    }

    #[test]
    fn test_missing_destination_is_unusable() {
        let mut f = setup_fixture();
        advance(&f.store, &f.db, &mut f.map, "main", "c1");
        let merges = MergeOrchestrator::new(&f.store);
        let mr = merges
            .create("update stuff", None, "alice", branch(&f, "main"), branch(&f, "stuff"))
            .unwrap();

        f.store.delete_branch(&f.db, "stuff").unwrap();

        let refreshed = merges.refresh(&f.db, mr.id).unwrap();
        let status = refreshed.status.unwrap();
        assert!(!status.usable);
        assert!(status.source_available);
        assert_eq!(status.message.as_deref(), Some(DESTINATION_MISSING));

        let err = merges.merge(&f.db, mr.id, "alice").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        assert!(err.to_string().contains(DESTINATION_MISSING));
    }

    #[test]
    fn test_commit_count_covers_merged_in_history() {
        let mut f = setup_fixture();
        let c1 = advance(&f.store, &f.db, &mut f.map, "main", "c1");
        let side = commit_on(&mut f.map, &f.c0, &[], "side");
        let joined = commit_on(&mut f.map, &c1, &[side.clone()], "join");
        f.store.save_commit(&f.db, &f.map[&side]).unwrap();
        f.store.save_commit(&f.db, &f.map[&joined]).unwrap();
        f.store.update_branch_head(&f.db, "main", &c1, &joined, 4).unwrap();

        let merges = MergeOrchestrator::new(&f.store);
        let mr = merges
            .create("update stuff", None, "alice", branch(&f, "main"), branch(&f, "stuff"))
            .unwrap();
        assert_eq!(mr.commits.len(), 2);

        let outcome = merges.merge(&f.db, mr.id, "alice").unwrap();
        assert_eq!(outcome.applied, 2);
        let stuff = f.store.load_branches(&f.db).unwrap()["stuff"].clone();
        assert_eq!(stuff.commit, joined);
        assert_eq!(stuff.commit_count, 4);
    }

    #[test]
    fn test_tampered_recorded_commit_is_refused() {
        let mut f = setup_fixture();
        let entry = BranchEntry {
            commit: f.c0.clone(),
            commit_count: 1,
            description: None,
        };
        f.store.insert_branch(&f.db, "feature", &entry).unwrap();
        advance(&f.store, &f.db, &mut f.map, "feature", "feature work");
        let merges = MergeOrchestrator::new(&f.store);
        let mr = merges
            .create("feature", None, "alice", branch(&f, "feature"), branch(&f, "main"))
            .unwrap();
        f.store.delete_branch(&f.db, "feature").unwrap();

        let mut stored = f.store.load_merge_request(&f.db, mr.id).unwrap();
        stored.commits[0].message = "something else entirely".into();
        f.store.update_merge_request(&f.db, &stored).unwrap();

        let err = merges.merge(&f.db, mr.id, "alice").unwrap_err();
        assert!(matches!(err, HubError::BrokenHistory(_)));
        assert_eq!(f.store.load_branches(&f.db).unwrap()["main"].commit, f.c0);
    }

    #[test]
    fn test_thread_records_state_changes() {
        let mut f = setup_fixture();
        advance(&f.store, &f.db, &mut f.map, "main", "c1");
        let merges = MergeOrchestrator::new(&f.store);
        let mr = merges
            .create("update stuff", Some("needs review"), "alice", branch(&f, "main"), branch(&f, "stuff"))
            .unwrap();
        assert_eq!(mr.description.as_deref(), Some("needs review"));

        let remark = merges.add_comment(&f.db, mr.id, "bob", "is this ready?").unwrap();
        assert_eq!(remark.id, 1);
        assert_eq!(
            merges.add_comment(&f.db, mr.id, "bob", "  ").unwrap_err().kind(),
            ErrorKind::BadRequest
        );

        merges.close(&f.db, mr.id, "alice").unwrap();
        // closed requests still take comments
        merges.add_comment(&f.db, mr.id, "bob", "why closed?").unwrap();
        merges.reopen(&f.db, mr.id, "alice").unwrap();
        merges.merge(&f.db, mr.id, "carol").unwrap();
        // a repeated merge leaves no second entry
        merges.merge(&f.db, mr.id, "carol").unwrap();

        let thread = merges.comments(&f.db, mr.id).unwrap();
        let kinds: Vec<_> = thread.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                CommentKind::Text,
                CommentKind::Close,
                CommentKind::Text,
                CommentKind::Reopen,
                CommentKind::Merge
            ]
        );
        assert_eq!(thread[4].commenter, "carol");

        let edited = merges.update_comment(&f.db, mr.id, remark.id, "ready now").unwrap();
        assert!(edited.updated_at.is_some());
        let close_entry = thread[1].id;
        assert_eq!(
            merges.update_comment(&f.db, mr.id, close_entry, "no").unwrap_err().kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(
            merges.delete_comment(&f.db, mr.id, close_entry).unwrap_err().kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(
            merges.delete_comment(&f.db, mr.id, 99).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        merges.delete_comment(&f.db, mr.id, remark.id).unwrap();
        let thread = merges.comments(&f.db, mr.id).unwrap();
        assert_eq!(thread.len(), 4);
        assert!(thread.iter().all(|c| c.id != remark.id));
    }
}
