//! Commit and tree records, and their content addressing.
//!
//! A commit's id is the SHA256 of its serialized content, so two commits with
//! the same tree, parents, identity, timestamp and message always share an id.
//! Commits are never mutated once built; a changed history is a new commit.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{HubError, HubResult};
use crate::storage::{CommitId, ContentHash, Signature};

/// All commits of one database, keyed by id.
pub type CommitMap = HashMap<CommitId, Commit>;

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// a whole database file snapshot
    Db,
    Licence,
    Tree,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Db => "db",
            EntryType::Licence => "licence",
            EntryType::Tree => "tree",
        }
    }
}

/// One entry of a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub entry_type: EntryType,
    pub name: String,
    /// digest of the stored bytes
    pub sha256: ContentHash,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// licence covering the bytes, if any
    pub licence_sha: Option<ContentHash>,
}

impl TreeEntry {
    /// Entry for a database file snapshot.
    pub fn database(
        name: impl Into<String>,
        sha256: ContentHash,
        size: u64,
        last_modified: DateTime<Utc>,
        licence_sha: Option<ContentHash>,
    ) -> Self {
        Self {
            entry_type: EntryType::Db,
            name: name.into(),
            sha256,
            size,
            last_modified,
            licence_sha,
        }
    }
}

/// Ordered entries of a commit. Entry 0 carries the snapshot and its licence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub id: ContentHash,
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new(entries: Vec<TreeEntry>) -> Self {
        let id = Self::compute_id(&entries);
        Self { id, entries }
    }

    /// Hash the entries, one line each.
    pub fn compute_id(entries: &[TreeEntry]) -> ContentHash {
        let mut buf = Vec::new();
        for entry in entries {
            buf.extend_from_slice(entry.entry_type.as_str().as_bytes());
            buf.push(0);
            if let Some(licence) = &entry.licence_sha {
                buf.extend_from_slice(licence.as_str().as_bytes());
            }
            buf.push(0);
            buf.extend_from_slice(entry.sha256.as_str().as_bytes());
            buf.push(0);
            buf.extend_from_slice(entry.name.as_bytes());
            buf.push(0);
            buf.extend_from_slice(
                entry
                    .last_modified
                    .to_rfc3339_opts(SecondsFormat::Secs, true)
                    .as_bytes(),
            );
            buf.push(0);
            buf.extend_from_slice(entry.size.to_string().as_bytes());
            buf.push(b'\n');
        }
        ContentHash::of(&buf)
    }

    /// The entry carrying the database snapshot.
    pub fn database_entry(&self) -> Option<&TreeEntry> {
        self.entries.first()
    }

    /// Licence of the whole snapshot.
    pub fn licence_sha(&self) -> Option<&ContentHash> {
        self.entries.first().and_then(|e| e.licence_sha.as_ref())
    }
}

/// An immutable node of the history DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub parent: Option<CommitId>,
    #[serde(default)]
    pub other_parents: Vec<CommitId>,
    pub tree: Tree,
    pub author: Signature,
    pub committer: Option<Signature>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Commit {
    /// Recompute the id from the commit's content.
    pub fn compute_id(&self) -> CommitId {
        compute_commit_id(
            &self.tree.id,
            self.parent.as_ref(),
            &self.other_parents,
            &self.author,
            self.committer.as_ref(),
            &self.message,
            &self.timestamp,
        )
    }

    /// Check the tree id against the entries and the commit id against the rest.
    /// The error names the first mismatch.
    pub fn check_content(&self) -> Result<(), String> {
        let tree_id = Tree::compute_id(&self.tree.entries);
        if tree_id != self.tree.id {
            return Err(format!(
                "tree of commit {} records {} but its entries hash to {}",
                self.id.short(),
                self.tree.id,
                tree_id
            ));
        }
        let computed = self.compute_id();
        if computed != self.id {
            return Err(format!("commit {} hashes to {}", self.id.short(), computed.short()));
        }
        Ok(())
    }

    /// Check that the stored ids still match the content.
    pub fn verify_id(&self) -> HubResult<()> {
        self.check_content().map_err(HubError::BrokenHistory)
    }

    pub fn is_merge(&self) -> bool {
        !self.other_parents.is_empty()
    }

    /// first line of the message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    pub fn licence_sha(&self) -> Option<&ContentHash> {
        self.tree.licence_sha()
    }
}

fn unix_date(ts: &DateTime<Utc>) -> String {
    ts.format("%a %b %e %H:%M:%S UTC %Y").to_string()
}

fn compute_commit_id(
    tree: &ContentHash,
    parent: Option<&CommitId>,
    other_parents: &[CommitId],
    author: &Signature,
    committer: Option<&Signature>,
    message: &str,
    timestamp: &DateTime<Utc>,
) -> CommitId {
    let stamp = unix_date(timestamp);
    let mut text = format!("tree {}\n", tree);
    if let Some(parent) = parent {
        text.push_str(&format!("parent {}\n", parent));
    }
    for other in other_parents {
        text.push_str(&format!("parent {}\n", other));
    }
    text.push_str(&format!("author {} <{}> {}\n", author.name, author.email, stamp));
    if let Some(committer) = committer.filter(|c| !c.email.is_empty()) {
        text.push_str(&format!("committer {} <{}> {}\n", committer.name, committer.email, stamp));
    }
    text.push('\n');
    text.push_str(message);

    let mut bytes = text.into_bytes();
    bytes.push(0);
    CommitId::from_digest(&Sha256::digest(&bytes))
}

/// builder for commits with a fluent interface
pub struct CommitBuilder {
    tree: Option<Tree>,
    parent: Option<CommitId>,
    other_parents: Vec<CommitId>,
    author: Option<Signature>,
    committer: Option<Signature>,
    message: String,
    timestamp: Option<DateTime<Utc>>,
}

impl CommitBuilder {
    pub fn new() -> Self {
        Self {
            tree: None,
            parent: None,
            other_parents: Vec::new(),
            author: None,
            committer: None,
            message: String::new(),
            timestamp: None,
        }
    }

    pub fn tree(mut self, tree: Tree) -> Self {
        self.tree = Some(tree);
        self
    }

    /// set the primary parent
    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// add an extra parent (merge commits)
    pub fn other_parent(mut self, parent: CommitId) -> Self {
        self.other_parents.push(parent);
        self
    }

    pub fn author(mut self, author: Signature) -> Self {
        self.author = Some(author);
        self
    }

    pub fn committer(mut self, committer: Signature) -> Self {
        self.committer = Some(committer);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// defaults to now
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// assemble the commit and compute its id
    pub fn build(self) -> HubResult<Commit> {
        let tree = self
            .tree
            .ok_or_else(|| HubError::BadRequest("commit requires a tree".to_string()))?;
        let author = self
            .author
            .ok_or_else(|| HubError::BadRequest("commit requires an author".to_string()))?;
        // second precision, the id only sees seconds
        let timestamp = self.timestamp.unwrap_or_else(Utc::now);
        let timestamp = DateTime::from_timestamp(timestamp.timestamp(), 0).unwrap_or(timestamp);

        let id = compute_commit_id(
            &tree.id,
            self.parent.as_ref(),
            &self.other_parents,
            &author,
            self.committer.as_ref(),
            &self.message,
            &timestamp,
        );

        Ok(Commit {
            id,
            parent: self.parent,
            other_parents: self.other_parents,
            tree,
            author,
            committer: self.committer,
            message: self.message,
            timestamp,
        })
    }
}

impl Default for CommitBuilder {
    fn default() -> Self {
        Self::new()
    }
}
