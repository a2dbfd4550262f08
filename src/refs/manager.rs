//! Branch, tag and release management.
//!
//! Branches are mutable pointers with a cached commit count; tags and releases
//! point at one fixed commit and can only be renamed or redescribed. Name
//! validation and the orphaned-tag check happen here. Branch deletion rules
//! and head moves are enforced by the store inside its own transaction.

use std::collections::HashSet;

use chrono::Utc;

use crate::error::{HubError, HubResult};
use crate::graph::{branch_history, commit_count, CommitMap};
use crate::storage::{
    BlobStore, BranchEntry, CommitId, CommitStore, DatabaseRef, RefName, Signature, TagEntry, TagKind,
};

/// Manages named references of hosted databases.
pub struct RefManager<'a> {
    store: &'a dyn CommitStore,
    blobs: &'a dyn BlobStore,
    max_name_length: usize,
}

impl<'a> RefManager<'a> {
    pub fn new(store: &'a dyn CommitStore, blobs: &'a dyn BlobStore) -> Self {
        Self {
            store,
            blobs,
            max_name_length: RefName::MAX_LEN,
        }
    }

    pub fn max_name_length(mut self, max_name_length: usize) -> Self {
        self.max_name_length = max_name_length;
        self
    }

    fn validate(&self, name: &str) -> HubResult<RefName> {
        Ok(RefName::with_max_len(name, self.max_name_length)?)
    }

    fn require_commit(commits: &CommitMap, id: &CommitId) -> HubResult<()> {
        if commits.contains_key(id) {
            Ok(())
        } else {
            Err(HubError::not_found("commit", id))
        }
    }

    // ========== Branches ==========

    /// Create a branch at an existing commit. The default branch is untouched.
    pub fn create_branch(
        &self,
        db: &DatabaseRef,
        name: &str,
        from_commit: &CommitId,
        description: Option<&str>,
    ) -> HubResult<BranchEntry> {
        let name = self.validate(name)?;
        let commits = self.store.load_commits(db)?;
        Self::require_commit(&commits, from_commit)?;

        let entry = BranchEntry {
            commit: from_commit.clone(),
            commit_count: commit_count(from_commit, &commits)?,
            description: description.map(str::to_string),
        };
        self.store
            .insert_branch(db, name.as_str(), &entry)
            .map_err(|e| match e.is_conflict() {
                true => HubError::conflict("branch", &name),
                false => e.into(),
            })?;

        tracing::info!(database = %db, branch = %name, head = from_commit.short(), "created branch");
        Ok(entry)
    }

    /// Rename and/or redescribe a branch. `None` keeps the current value.
    pub fn update_branch(
        &self,
        db: &DatabaseRef,
        name: &str,
        new_name: Option<&str>,
        description: Option<&str>,
    ) -> HubResult<()> {
        let branches = self.store.load_branches(db)?;
        let current = branches
            .get(name)
            .ok_or_else(|| HubError::not_found("branch", name))?;

        let new_name = match new_name {
            Some(n) => self.validate(n)?.into_string(),
            None => name.to_string(),
        };
        if new_name != name && branches.contains_key(&new_name) {
            return Err(HubError::conflict("branch", new_name));
        }
        let description = description.or(current.description.as_deref());

        self.store.update_branch(db, name, &new_name, description)?;
        tracing::info!(database = %db, branch = name, new_name = %new_name, "updated branch");
        Ok(())
    }

    /// Delete a branch. The default branch and the last branch stay.
    pub fn delete_branch(&self, db: &DatabaseRef, name: &str) -> HubResult<()> {
        self.store.delete_branch(db, name)?;
        tracing::info!(database = %db, branch = name, "deleted branch");
        Ok(())
    }

    pub fn set_default_branch(&self, db: &DatabaseRef, name: &str) -> HubResult<()> {
        self.store.set_default_branch(db, name).map_err(|e| match e.is_not_found() {
            true => HubError::not_found("branch", name),
            false => e.into(),
        })?;
        tracing::info!(database = %db, branch = name, "changed default branch");
        Ok(())
    }

    /// Move a branch head back to a commit on its own history.
    ///
    /// Refused when a tag or release would end up on a commit no branch reaches.
    pub fn reset_branch(&self, db: &DatabaseRef, name: &str, commit: &CommitId) -> HubResult<()> {
        let commits = self.store.load_commits(db)?;
        let branches = self.store.load_branches(db)?;
        let branch = branches
            .get(name)
            .ok_or_else(|| HubError::not_found("branch", name))?;
        Self::require_commit(&commits, commit)?;

        if &branch.commit == commit {
            return Ok(());
        }

        let old_history = branch_history(&branch.commit, &commits)?;
        if !old_history.iter().any(|c| &c.id == commit) {
            return Err(HubError::BadRequest(format!(
                "commit {} is not in the history of branch '{}'",
                commit.short(),
                name
            )));
        }

        // everything still reachable after the reset
        let mut reachable: HashSet<&CommitId> =
            branch_history(commit, &commits)?.into_iter().map(|c| &c.id).collect();
        for (other, entry) in &branches {
            if other != name {
                reachable.extend(branch_history(&entry.commit, &commits)?.into_iter().map(|c| &c.id));
            }
        }

        for kind in [TagKind::Tag, TagKind::Release] {
            for (tag, entry) in self.store.load_tags(db, kind)? {
                let dropped = old_history.iter().any(|c| c.id == entry.commit);
                if dropped && !reachable.contains(&entry.commit) {
                    return Err(HubError::PreconditionFailed(format!(
                        "{} '{}' would be left on an unreachable commit",
                        kind.as_str(),
                        tag
                    )));
                }
            }
        }

        let count = commit_count(commit, &commits)?;
        self.store.update_branch_head(db, name, &branch.commit, commit, count)?;
        tracing::info!(database = %db, branch = name, head = commit.short(), "reset branch");
        Ok(())
    }

    // ========== Tags and releases ==========

    /// Create a tag or release. Releases record the database size.
    pub fn create_tag(
        &self,
        db: &DatabaseRef,
        kind: TagKind,
        name: &str,
        commit: &CommitId,
        description: Option<&str>,
        tagger: Signature,
    ) -> HubResult<TagEntry> {
        let name = self.validate(name)?;
        let commits = self.store.load_commits(db)?;
        let target = commits
            .get(commit)
            .ok_or_else(|| HubError::not_found("commit", commit))?;

        let size = match kind {
            TagKind::Release => {
                let entry = target.tree.database_entry().ok_or_else(|| {
                    HubError::BrokenHistory(format!("commit {} has an empty tree", commit.short()))
                })?;
                Some(self.blobs.size(&entry.sha256)?)
            }
            TagKind::Tag => None,
        };

        let entry = TagEntry {
            commit: commit.clone(),
            date: Utc::now(),
            description: description.map(str::to_string),
            tagger,
            size,
        };
        self.store
            .insert_tag(db, kind, name.as_str(), &entry)
            .map_err(|e| match e.is_conflict() {
                true => HubError::conflict(kind.as_str(), &name),
                false => e.into(),
            })?;

        tracing::info!(database = %db, kind = kind.as_str(), name = %name, commit = commit.short(), "created tag");
        Ok(entry)
    }

    /// Rename and/or redescribe. The commit never moves.
    pub fn update_tag(
        &self,
        db: &DatabaseRef,
        kind: TagKind,
        name: &str,
        new_name: Option<&str>,
        description: Option<&str>,
    ) -> HubResult<()> {
        let tags = self.store.load_tags(db, kind)?;
        let current = tags.get(name).ok_or_else(|| HubError::not_found(kind.as_str(), name))?;

        let new_name = match new_name {
            Some(n) => self.validate(n)?.into_string(),
            None => name.to_string(),
        };
        if new_name != name && tags.contains_key(&new_name) {
            return Err(HubError::conflict(kind.as_str(), new_name));
        }
        let description = description.or(current.description.as_deref());

        self.store.update_tag(db, kind, name, &new_name, description)?;
        tracing::info!(database = %db, kind = kind.as_str(), name, new_name = %new_name, "updated tag");
        Ok(())
    }

    pub fn delete_tag(&self, db: &DatabaseRef, kind: TagKind, name: &str) -> HubResult<()> {
        self.store.delete_tag(db, kind, name).map_err(|e| match e.is_not_found() {
            true => HubError::not_found(kind.as_str(), name),
            false => e.into(),
        })?;
        tracing::info!(database = %db, kind = kind.as_str(), name, "deleted tag");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::graph::CommitMap;
    use crate::storage::{GitBlobStore, SqliteStore};
    use crate::test_util::{commit_on, root_commit};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: SqliteStore,
        blobs: GitBlobStore,
        db: DatabaseRef,
        c0: CommitId,
        c1: CommitId,
    }

    /// main: c0 - c1, with the root commit's tree pointing at a real blob
    fn setup_fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let blobs = GitBlobStore::init(dir.path().join("blobs.git")).unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let db = DatabaseRef::new("alice", "stats.sqlite").unwrap();

        let mut map = CommitMap::new();
        let c0 = root_commit(&mut map, "c0");
        blobs.store(b"c0").unwrap();
        blobs.store(b"c1").unwrap();
        let c1 = commit_on(&mut map, &c0, &[], "c1");

        let root = map[&c0].clone();
        store
            .create_database(
                &db,
                "main",
                &root,
                &BranchEntry {
                    commit: c0.clone(),
                    commit_count: 1,
                    description: None,
                },
            )
            .unwrap();
        store.save_commit(&db, &map[&c1]).unwrap();
        store.update_branch_head(&db, "main", &c0, &c1, 2).unwrap();

        Fixture {
            _dir: dir,
            store,
            blobs,
            db,
            c0,
            c1,
        }
    }

    #[test]
    fn test_create_branch() {
        let f = setup_fixture();
        let refs = RefManager::new(&f.store, &f.blobs);

        let entry = refs.create_branch(&f.db, "stuff", &f.c0, Some("work")).unwrap();
        assert_eq!(entry.commit_count, 1);

        let err = refs.create_branch(&f.db, "stuff", &f.c0, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = refs.create_branch(&f.db, "bad/name", &f.c0, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = refs.create_branch(&f.db, &"x".repeat(33), &f.c0, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        // names are case-sensitive
        assert!(refs.create_branch(&f.db, "Stuff", &f.c0, None).is_ok());

        let missing = CommitId::from_hex(&"0".repeat(64)).unwrap();
        let err = refs.create_branch(&f.db, "ghost", &missing, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_delete_branch_rules() {
        let f = setup_fixture();
        let refs = RefManager::new(&f.store, &f.blobs);

        let err = refs.delete_branch(&f.db, "main").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        refs.create_branch(&f.db, "stuff", &f.c0, None).unwrap();
        let err = refs.delete_branch(&f.db, "main").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        refs.delete_branch(&f.db, "stuff").unwrap();
        assert_eq!(f.store.database_info(&f.db).unwrap().default_branch, "main");
        assert_eq!(refs.delete_branch(&f.db, "stuff").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_delete_follows_current_default() {
        let f = setup_fixture();
        let refs = RefManager::new(&f.store, &f.blobs);
        refs.create_branch(&f.db, "stuff", &f.c0, None).unwrap();

        // another writer moves the default after this caller listed branches
        let listed = f.store.load_branches(&f.db).unwrap();
        assert!(listed.contains_key("stuff"));
        f.store.set_default_branch(&f.db, "stuff").unwrap();

        let err = refs.delete_branch(&f.db, "stuff").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        assert!(err.to_string().contains("default branch"));

        refs.delete_branch(&f.db, "main").unwrap();
        assert_eq!(f.store.load_branches(&f.db).unwrap().len(), 1);
    }

    #[test]
    fn test_rename_default_branch() {
        let f = setup_fixture();
        let refs = RefManager::new(&f.store, &f.blobs);
        refs.create_branch(&f.db, "stuff", &f.c0, Some("keep me")).unwrap();

        let err = refs.update_branch(&f.db, "main", Some("stuff"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        refs.update_branch(&f.db, "main", Some("trunk"), None).unwrap();
        assert_eq!(f.store.database_info(&f.db).unwrap().default_branch, "trunk");

        refs.update_branch(&f.db, "stuff", None, None).unwrap();
        let branches = f.store.load_branches(&f.db).unwrap();
        assert_eq!(branches["stuff"].description.as_deref(), Some("keep me"));

        refs.set_default_branch(&f.db, "stuff").unwrap();
        assert_eq!(refs.set_default_branch(&f.db, "nope").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_tags_and_releases() {
        let f = setup_fixture();
        let refs = RefManager::new(&f.store, &f.blobs);
        let tagger = Signature::new("Alice", "alice@example.org");

        let tag = refs
            .create_tag(&f.db, TagKind::Tag, "v1", &f.c0, None, tagger.clone())
            .unwrap();
        assert!(tag.size.is_none());

        let release = refs
            .create_tag(&f.db, TagKind::Release, "v1", &f.c1, Some("first"), tagger.clone())
            .unwrap();
        assert_eq!(release.size, Some(2));

        let err = refs
            .create_tag(&f.db, TagKind::Tag, "v1", &f.c1, None, tagger)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        refs.update_tag(&f.db, TagKind::Release, "v1", Some("v1.0"), None).unwrap();
        let releases = f.store.load_tags(&f.db, TagKind::Release).unwrap();
        assert_eq!(releases["v1.0"].commit, f.c1);
        assert_eq!(releases["v1.0"].description.as_deref(), Some("first"));

        refs.delete_tag(&f.db, TagKind::Tag, "v1").unwrap();
        let err = refs.delete_tag(&f.db, TagKind::Tag, "v1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_reset_branch_guards_tags() {
        let f = setup_fixture();
        let refs = RefManager::new(&f.store, &f.blobs);
        let tagger = Signature::new("Alice", "alice@example.org");
        refs.create_tag(&f.db, TagKind::Tag, "latest", &f.c1, None, tagger).unwrap();

        let err = refs.reset_branch(&f.db, "main", &f.c0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        // once another branch holds c1 the reset is safe
        refs.create_branch(&f.db, "keep", &f.c1, None).unwrap();
        refs.reset_branch(&f.db, "main", &f.c0).unwrap();
        let branches = f.store.load_branches(&f.db).unwrap();
        assert_eq!(branches["main"].commit, f.c0);
        assert_eq!(branches["main"].commit_count, 1);
    }
}
