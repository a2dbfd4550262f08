//! Database creation, snapshot commits, history and diffs.

use std::collections::HashMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::{diff_snapshots, licence_change, DiffOptions, Diffs, MergeStrategy};
use crate::error::{HubError, HubResult};
use crate::graph::{branch_history, is_commit_in_history, Commit, CommitBuilder, CommitMap, Tree, TreeEntry};
use crate::hub::{CommitRef, Hub};
use crate::storage::{
    AuthorIdentity, BranchEntry, CommitId, ContentHash, DatabaseRef, Signature, Snapshot, StorageError,
};

/// A history entry decorated for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitData {
    pub id: CommitId,
    pub parent: Option<CommitId>,
    pub other_parents: Vec<CommitId>,
    pub author_name: String,
    pub author_email: String,
    /// account matching the author email, if any
    pub author_username: Option<String>,
    pub author_avatar: Option<String>,
    pub committer_name: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// licence differs from the parent's
    pub licence_change: bool,
}

fn snapshot_error(what: &str, e: StorageError) -> HubError {
    HubError::Internal(format!("cannot open snapshot of {}: {}", what, e))
}

impl Hub {
    /// Check the bytes are a SQLite database, then store them.
    fn store_snapshot(&self, bytes: &[u8]) -> HubResult<ContentHash> {
        Snapshot::from_bytes(bytes)
            .map_err(|e| HubError::BadRequest(format!("not a SQLite database: {}", e)))?;
        Ok(self.blobs().store(bytes)?)
    }

    fn snapshot_tree(
        &self,
        db: &DatabaseRef,
        bytes: &[u8],
        licence_sha: Option<ContentHash>,
    ) -> HubResult<Tree> {
        let sha = self.store_snapshot(bytes)?;
        let uploaded = Utc::now().trunc_subsecs(0);
        let entry = TreeEntry::database(db.name.clone(), sha, bytes.len() as u64, uploaded, licence_sha);
        Ok(Tree::new(vec![entry]))
    }

    /// Create a database from its first snapshot.
    ///
    /// Makes the root commit and the configured default branch.
    pub fn create_database(
        &self,
        db: &DatabaseRef,
        bytes: &[u8],
        licence: Option<&[u8]>,
        author: Signature,
        message: &str,
    ) -> HubResult<Commit> {
        if self.store().database_exists(db)? {
            return Err(HubError::conflict("database", db));
        }

        let licence_sha = licence.map(|text| self.blobs().store(text)).transpose()?;
        let tree = self.snapshot_tree(db, bytes, licence_sha)?;
        let root = CommitBuilder::new()
            .tree(tree)
            .author(author)
            .message(message)
            .build()?;

        let default_branch = self.config().default_branch.clone();
        let entry = BranchEntry {
            commit: root.id.clone(),
            commit_count: 1,
            description: None,
        };
        self.store().create_database(db, &default_branch, &root, &entry)?;

        tracing::info!(database = %db, commit = root.id.short(), branch = %default_branch, "created database");
        Ok(root)
    }

    /// Copy a database's commits and branches under another owner.
    pub fn fork_database(&self, source: &DatabaseRef, new_owner: &str) -> HubResult<DatabaseRef> {
        let fork = DatabaseRef::new(new_owner, source.name.clone())?;
        if self.store().database_exists(&fork)? {
            return Err(HubError::conflict("database", &fork));
        }

        let info = self.store().database_info(source)?;
        let branches = self.store().load_branches(source)?;
        let commits = self.store().load_commits(source)?;

        for (name, entry) in &branches {
            if !commits.contains_key(&entry.commit) {
                return Err(HubError::BrokenHistory(format!(
                    "head of {}:{} missing from commit map",
                    source, name
                )));
            }
        }

        // one transaction: a failed fork leaves nothing behind
        self.store().import_database(&fork, &info.default_branch, &commits, &branches)?;

        tracing::info!(source = %source, fork = %fork, commits = commits.len(), "forked database");
        Ok(fork)
    }

    /// Commit a new snapshot on top of a branch.
    ///
    /// Without a new licence the parent's licence carries over.
    pub fn commit_snapshot(
        &self,
        db: &DatabaseRef,
        branch: &str,
        bytes: &[u8],
        licence: Option<&[u8]>,
        author: Signature,
        message: &str,
    ) -> HubResult<Commit> {
        let head = self.branch_head(db, branch)?;
        let commits = self.store().load_commits(db)?;
        let parent = commits
            .get(&head.commit)
            .ok_or_else(|| HubError::BrokenHistory(format!("head of branch '{}' missing from commit map", branch)))?;

        let licence_sha = match licence {
            Some(text) => Some(self.blobs().store(text)?),
            None => parent.licence_sha().cloned(),
        };
        let tree = self.snapshot_tree(db, bytes, licence_sha)?;
        let commit = CommitBuilder::new()
            .tree(tree)
            .parent(head.commit.clone())
            .author(author)
            .message(message)
            .build()?;

        self.store().save_commit(db, &commit)?;
        self.store()
            .update_branch_head(db, branch, &head.commit, &commit.id, head.commit_count + 1)?;

        tracing::info!(database = %db, branch, commit = commit.id.short(), "committed snapshot");
        Ok(commit)
    }

    pub fn get_commit_list(&self, db: &DatabaseRef) -> HubResult<CommitMap> {
        Ok(self.store().load_commits(db)?)
    }

    pub fn get_commit(&self, db: &DatabaseRef, id: &CommitId) -> HubResult<Commit> {
        self.store()
            .load_commits(db)?
            .remove(id)
            .ok_or_else(|| HubError::not_found("commit", id))
    }

    /// Full history of a branch, newest first.
    pub fn branch_history(&self, db: &DatabaseRef, branch: &str) -> HubResult<Vec<Commit>> {
        let head = self.branch_head(db, branch)?;
        let commits = self.store().load_commits(db)?;
        let history = branch_history(&head.commit, &commits)?;
        tracing::debug!(database = %db, branch, commits = history.len(), "walked branch history");
        Ok(history.into_iter().cloned().collect())
    }

    /// Branch history with author accounts and licence changes resolved.
    pub fn decorated_history(&self, db: &DatabaseRef, branch: &str) -> HubResult<Vec<CommitData>> {
        let head = self.branch_head(db, branch)?;
        let commits = self.store().load_commits(db)?;

        let mut identities: HashMap<String, Option<AuthorIdentity>> = HashMap::new();
        let mut decorated = Vec::new();

        for commit in branch_history(&head.commit, &commits)? {
            let email = commit.author.email.to_lowercase();
            let identity = match identities.get(&email) {
                Some(found) => found.clone(),
                None => {
                    let found = self.identities().resolve_author(&email)?;
                    identities.insert(email, found.clone());
                    found
                }
            };

            let licence_change = commit
                .parent
                .as_ref()
                .and_then(|p| commits.get(p))
                .is_some_and(|parent| parent.licence_sha() != commit.licence_sha());

            decorated.push(CommitData {
                id: commit.id.clone(),
                parent: commit.parent.clone(),
                other_parents: commit.other_parents.clone(),
                author_name: commit.author.name.clone(),
                author_email: commit.author.email.clone(),
                author_username: identity.as_ref().map(|i| i.username.clone()),
                author_avatar: identity.and_then(|i| i.avatar_url),
                committer_name: commit.committer.as_ref().map(|c| c.name.clone()),
                message: commit.message.clone(),
                timestamp: commit.timestamp,
                licence_change,
            });
        }

        Ok(decorated)
    }

    pub fn is_commit_in_branch_history(&self, db: &DatabaseRef, branch: &str, commit: &CommitId) -> HubResult<bool> {
        let head = self.branch_head(db, branch)?;
        let commits = self.store().load_commits(db)?;
        is_commit_in_history(&head.commit, commit, &commits)
    }

    /// Licence of the snapshot in a commit.
    pub fn commit_licence_sha(&self, db: &DatabaseRef, commit: &CommitId) -> HubResult<Option<ContentHash>> {
        Ok(self.get_commit(db, commit)?.licence_sha().cloned())
    }

    /// Licence text stored under a digest.
    pub fn licence_text(&self, sha: &ContentHash) -> HubResult<String> {
        let bytes = self.blobs().fetch(sha)?;
        String::from_utf8(bytes).map_err(|e| HubError::Internal(format!("licence {} is not text: {}", sha, e)))
    }

    fn open_snapshot(&self, commit: &Commit, label: &CommitRef) -> HubResult<Snapshot> {
        let entry = commit
            .tree
            .database_entry()
            .ok_or_else(|| HubError::BrokenHistory(format!("commit {} has an empty tree", label)))?;
        let bytes = self
            .blobs()
            .fetch(&entry.sha256)
            .map_err(|e| snapshot_error(&label.to_string(), e))?;
        Snapshot::from_bytes(&bytes).map_err(|e| snapshot_error(&label.to_string(), e))
    }

    /// Diff two commits, possibly of different databases.
    ///
    /// Objects and rows only in `from` come back as deletes, only in `to` as adds.
    pub fn diff(&self, from: &CommitRef, to: &CommitRef, viewer: Option<&str>, options: DiffOptions) -> HubResult<Diffs> {
        let from_commit = self.get_commit(&from.database, &from.commit)?;
        let to_commit = if to.database == from.database && to.commit == from.commit {
            from_commit.clone()
        } else {
            self.get_commit(&to.database, &to.commit)?
        };

        let licence_change = match options.merge {
            MergeStrategy::PreservePk => licence_change(&from_commit.tree, &to_commit.tree),
            MergeStrategy::NoMerge => None,
        };

        let same_file = match (from_commit.tree.database_entry(), to_commit.tree.database_entry()) {
            (Some(a), Some(b)) => a.sha256 == b.sha256,
            _ => false,
        };
        if same_file {
            return Ok(Diffs {
                diff: Vec::new(),
                licence_change,
            });
        }

        let before = self.open_snapshot(&from_commit, from)?;
        let after = self.open_snapshot(&to_commit, to)?;
        let diff = diff_snapshots(&before, &after, &options).map_err(|e| snapshot_error(&to.to_string(), e))?;

        tracing::debug!(from = %from, to = %to, viewer, objects = diff.len(), "computed diff");
        Ok(Diffs { diff, licence_change })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffType;
    use crate::error::ErrorKind;
    use crate::hub::HubConfig;
    use crate::storage::{CommitStore, GitBlobStore, SqliteStore};
    use crate::test_util::sqlite_bytes;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup_hub() -> (TempDir, Hub, Arc<SqliteStore>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let blobs = Arc::new(GitBlobStore::init(dir.path().join("blobs.git")).unwrap());
        let hub = Hub::with_collaborators(HubConfig::new(dir.path()), store.clone(), store.clone(), blobs);
        (dir, hub, store)
    }

    fn alice() -> Signature {
        Signature::new("Alice", "alice@example.org")
    }

    #[test]
    fn test_create_and_commit() {
        let (_dir, hub, _store) = setup_hub();
        let db = DatabaseRef::new("alice", "stats.sqlite").unwrap();
        let v1 = sqlite_bytes(&["CREATE TABLE t (id INTEGER PRIMARY KEY)"]);
        let v2 = sqlite_bytes(&["CREATE TABLE t (id INTEGER PRIMARY KEY)", "INSERT INTO t VALUES (1)"]);

        let root = hub.create_database(&db, &v1, Some(b"CC0"), alice(), "Initial commit").unwrap();
        assert_eq!(hub.default_branch(&db).unwrap(), "main");

        let err = hub.create_database(&db, &v1, None, alice(), "again").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let c1 = hub.commit_snapshot(&db, "main", &v2, None, alice(), "Add a row").unwrap();
        assert_eq!(c1.parent.as_ref(), Some(&root.id));
        assert_eq!(c1.licence_sha(), root.licence_sha());
        assert_eq!(hub.licence_text(c1.licence_sha().unwrap()).unwrap(), "CC0");

        let branches = hub.get_branches(&db).unwrap();
        assert_eq!(branches["main"].commit, c1.id);
        assert_eq!(branches["main"].commit_count, 2);
        assert!(hub.is_commit_in_branch_history(&db, "main", &root.id).unwrap());
    }

    #[test]
    fn test_fork_copies_every_branch() {
        let (_dir, hub, store) = setup_hub();
        let db = DatabaseRef::new("alice", "stats.sqlite").unwrap();
        let v1 = sqlite_bytes(&["CREATE TABLE t (id INTEGER PRIMARY KEY)"]);
        let v2 = sqlite_bytes(&["CREATE TABLE t (id INTEGER PRIMARY KEY)", "INSERT INTO t VALUES (1)"]);
        let root = hub.create_database(&db, &v1, None, alice(), "Initial commit").unwrap();
        hub.create_branch(&db, "dev", &root.id, Some("work")).unwrap();
        let c1 = hub.commit_snapshot(&db, "dev", &v2, None, alice(), "Add a row").unwrap();
        hub.set_default_branch(&db, "dev").unwrap();

        let fork = hub.fork_database(&db, "bob").unwrap();
        assert_eq!(hub.default_branch(&fork).unwrap(), "dev");
        assert_eq!(hub.get_branches(&fork).unwrap(), hub.get_branches(&db).unwrap());
        assert_eq!(store.load_commits(&fork).unwrap().len(), 2);
        assert!(hub.get_commit(&fork, &c1.id).is_ok());
    }

    #[test]
    fn test_rejects_non_sqlite_bytes() {
        let (_dir, hub, _store) = setup_hub();
        let db = DatabaseRef::new("alice", "junk.sqlite").unwrap();
        let err = hub
            .create_database(&db, b"this is certainly not a database file at all", None, alice(), "x")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_decorated_history() {
        let (_dir, hub, store) = setup_hub();
        store.add_user("alice", "alice@example.org", Some("https://example.org/alice.png")).unwrap();
        let db = DatabaseRef::new("alice", "stats.sqlite").unwrap();
        let v1 = sqlite_bytes(&["CREATE TABLE t (a)"]);
        let v2 = sqlite_bytes(&["CREATE TABLE t (a, b)"]);
        let v3 = sqlite_bytes(&["CREATE TABLE t (a, b, c)"]);

        hub.create_database(&db, &v1, None, alice(), "one").unwrap();
        hub.commit_snapshot(&db, "main", &v2, Some(b"ODbL"), alice(), "two").unwrap();
        hub.commit_snapshot(&db, "main", &v3, None, Signature::new("Bob", "bob@example.org"), "three")
            .unwrap();

        let history = hub.decorated_history(&db, "main").unwrap();
        let messages: Vec<_> = history.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["three", "two", "one"]);

        assert_eq!(history[0].author_username, None);
        assert_eq!(history[1].author_username.as_deref(), Some("alice"));
        assert_eq!(history[1].author_avatar.as_deref(), Some("https://example.org/alice.png"));

        let changes: Vec<_> = history.iter().map(|c| c.licence_change).collect();
        assert_eq!(changes, vec![false, true, false]);
    }

    #[test]
    fn test_diff_between_commits() {
        let (_dir, hub, _store) = setup_hub();
        let db = DatabaseRef::new("alice", "stats.sqlite").unwrap();
        let base = sqlite_bytes(&["CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)"]);
        let with_view = sqlite_bytes(&[
            "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)",
            "CREATE VIEW tv AS SELECT v FROM t",
        ]);

        let c0 = hub.create_database(&db, &base, None, alice(), "base").unwrap();
        let c1 = hub.commit_snapshot(&db, "main", &with_view, Some(b"CC-BY"), alice(), "view").unwrap();

        let a = CommitRef::new(db.clone(), c0.id.clone());
        let b = CommitRef::new(db.clone(), c1.id.clone());

        assert!(hub.diff(&a, &a, None, DiffOptions::new()).unwrap().is_empty());

        let forward = hub.diff(&a, &b, Some("alice"), DiffOptions::new()).unwrap();
        let backward = hub.diff(&b, &a, None, DiffOptions::new()).unwrap();
        assert_eq!(forward.objects_with(DiffType::Add), backward.objects_with(DiffType::Delete));
        assert!(forward.licence_change.is_none());

        let merge = hub
            .diff(&a, &b, None, DiffOptions::new().merge(MergeStrategy::PreservePk))
            .unwrap();
        let change = merge.licence_change.unwrap();
        assert!(change.before.is_none());
        assert_eq!(change.after, Some(ContentHash::of(b"CC-BY")));

        let missing = CommitRef::new(db, CommitId::from_hex(&"f".repeat(64)).unwrap());
        assert_eq!(hub.diff(&a, &missing, None, DiffOptions::new()).unwrap_err().kind(), ErrorKind::NotFound);
    }
}
