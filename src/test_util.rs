//! Fixtures shared by unit tests.

use chrono::{TimeZone, Utc};
use rusqlite::Connection;
use tempfile::TempDir;

use crate::graph::{CommitBuilder, CommitMap, Tree, TreeEntry};
use crate::storage::{CommitId, ContentHash, Signature};

/// Build a SQLite file from statements and return its bytes.
pub(crate) fn sqlite_bytes(statements: &[&str]) -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fixture.sqlite");
    {
        let conn = Connection::open(&path).unwrap();
        for statement in statements {
            conn.execute_batch(statement).unwrap();
        }
    }
    std::fs::read(&path).unwrap_or_default()
}

fn tree_for(label: &str) -> Tree {
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    Tree::new(vec![TreeEntry::database(
        "fixture.sqlite",
        ContentHash::of(label.as_bytes()),
        label.len() as u64,
        ts,
        None,
    )])
}

/// Commit on top of `parent` with a tree derived from `label`.
pub(crate) fn commit_on(map: &mut CommitMap, parent: &CommitId, others: &[CommitId], label: &str) -> CommitId {
    let mut builder = CommitBuilder::new()
        .tree(tree_for(label))
        .parent(parent.clone())
        .author(Signature::new("Tester", "tester@example.org"))
        .message(label)
        .timestamp(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    for other in others {
        builder = builder.other_parent(other.clone());
    }
    let commit = builder.build().unwrap();
    let id = commit.id.clone();
    map.insert(id.clone(), commit);
    id
}

/// Parentless commit.
pub(crate) fn root_commit(map: &mut CommitMap, label: &str) -> CommitId {
    let commit = CommitBuilder::new()
        .tree(tree_for(label))
        .author(Signature::new("Tester", "tester@example.org"))
        .message(label)
        .timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        .build()
        .unwrap();
    let id = commit.id.clone();
    map.insert(id.clone(), commit);
    id
}
