//! SQLite-backed metadata store.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::graph::{Commit, CommitMap};
use crate::merge::{Comment, MergeRequest};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::schema;
use crate::storage::types::{CommitId, DatabaseRef};
use crate::storage::{
    AuthorIdentity, BranchEntry, CommitStore, DatabaseInfo, IdentityResolver, TagEntry, TagKind,
};

/// Commit graph store and identity resolver over one SQLite connection.
///
/// `rusqlite::Connection` is not `Sync`, so access goes through a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a metadata file, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(schema::CREATE_TABLES)?;
        conn.pragma_update(None, "user_version", schema::SCHEMA_VERSION)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Register a user account for author resolution.
    pub fn add_user(&self, username: &str, email: &str, avatar_url: Option<&str>) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO users (user_name, email, avatar_url) VALUES (?1, ?2, ?3)",
            params![username, email.to_lowercase(), avatar_url],
        )?;
        Ok(())
    }

    fn db_id(conn: &Connection, db: &DatabaseRef) -> StorageResult<i64> {
        conn.query_row(
            "SELECT db_id FROM databases WHERE owner_key = ?1 AND name = ?2",
            params![db.owner_key(), db.name],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StorageError::DatabaseNotFound(db.to_string()))
    }

    fn branch_exists(conn: &Connection, db_id: i64, name: &str) -> StorageResult<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM branches WHERE db_id = ?1 AND name = ?2",
                params![db_id, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn tag_body(tx: &Transaction<'_>, db_id: i64, kind: TagKind, name: &str) -> StorageResult<Option<String>> {
        Ok(tx
            .query_row(
                "SELECT body FROM tags WHERE db_id = ?1 AND kind = ?2 AND name = ?3",
                params![db_id, kind.as_str(), name],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Reject commits whose recorded ids don't match their content.
    fn check_commit(commit: &Commit) -> StorageResult<()> {
        commit.check_content().map_err(|reason| StorageError::CorruptedData {
            key: commit.id.to_string(),
            reason,
        })
    }

    fn insert_database(tx: &Transaction<'_>, db: &DatabaseRef, default_branch: &str) -> StorageResult<i64> {
        let exists: Option<i64> = tx
            .query_row(
                "SELECT db_id FROM databases WHERE owner_key = ?1 AND name = ?2",
                params![db.owner_key(), db.name],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StorageError::DatabaseAlreadyExists(db.to_string()));
        }

        tx.execute(
            "INSERT INTO databases (owner, owner_key, name, default_branch, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![db.owner, db.owner_key(), db.name, default_branch, Utc::now().to_rfc3339()],
        )?;
        Ok(tx.last_insert_rowid())
    }

    fn insert_branch_row(tx: &Transaction<'_>, db_id: i64, name: &str, entry: &BranchEntry) -> StorageResult<()> {
        tx.execute(
            "INSERT INTO branches (db_id, name, commit_id, commit_count, description) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                db_id,
                name,
                entry.commit.as_str(),
                entry.commit_count as i64,
                entry.description
            ],
        )?;
        Ok(())
    }

    fn merge_request_exists(conn: &Connection, db_id: i64, mr_id: u64) -> StorageResult<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM merge_requests WHERE db_id = ?1 AND mr_id = ?2",
                params![db_id, mr_id as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn parse_time(key: &str, value: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StorageError::CorruptedData {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}

impl CommitStore for SqliteStore {
    fn create_database(
        &self,
        db: &DatabaseRef,
        default_branch: &str,
        root: &Commit,
        branch: &BranchEntry,
    ) -> StorageResult<()> {
        Self::check_commit(root)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let db_id = Self::insert_database(&tx, db, default_branch)?;

        tx.execute(
            "INSERT INTO commits (db_id, commit_id, body) VALUES (?1, ?2, ?3)",
            params![db_id, root.id.as_str(), serde_json::to_string(root)?],
        )?;
        Self::insert_branch_row(&tx, db_id, default_branch, branch)?;

        tx.commit()?;
        Ok(())
    }

    fn import_database(
        &self,
        db: &DatabaseRef,
        default_branch: &str,
        commits: &CommitMap,
        branches: &BTreeMap<String, BranchEntry>,
    ) -> StorageResult<()> {
        for commit in commits.values() {
            Self::check_commit(commit)?;
        }
        if !branches.contains_key(default_branch) {
            return Err(StorageError::BranchNotFound(default_branch.to_string()));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let db_id = Self::insert_database(&tx, db, default_branch)?;

        for commit in commits.values() {
            tx.execute(
                "INSERT INTO commits (db_id, commit_id, body) VALUES (?1, ?2, ?3)",
                params![db_id, commit.id.as_str(), serde_json::to_string(commit)?],
            )?;
        }
        for (name, entry) in branches {
            Self::insert_branch_row(&tx, db_id, name, entry)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn database_info(&self, db: &DatabaseRef) -> StorageResult<DatabaseInfo> {
        let conn = self.conn.lock();
        let (owner, name, default_branch, created_at): (String, String, String, String) = conn
            .query_row(
                "SELECT owner, name, default_branch, created_at FROM databases WHERE owner_key = ?1 AND name = ?2",
                params![db.owner_key(), db.name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?
            .ok_or_else(|| StorageError::DatabaseNotFound(db.to_string()))?;

        Ok(DatabaseInfo {
            database: DatabaseRef::new(owner, name)?,
            default_branch,
            created_at: Self::parse_time(&db.to_string(), &created_at)?,
        })
    }

    fn database_exists(&self, db: &DatabaseRef) -> StorageResult<bool> {
        let conn = self.conn.lock();
        match Self::db_id(&conn, db) {
            Ok(_) => Ok(true),
            Err(StorageError::DatabaseNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn load_commits(&self, db: &DatabaseRef) -> StorageResult<CommitMap> {
        let conn = self.conn.lock();
        let db_id = Self::db_id(&conn, db)?;

        let mut stmt = conn.prepare("SELECT commit_id, body FROM commits WHERE db_id = ?1")?;
        let rows = stmt
            .query_map([db_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut commits = CommitMap::with_capacity(rows.len());
        for (key, body) in rows {
            let commit: Commit = serde_json::from_str(&body)?;
            if commit.id.as_str() != key {
                return Err(StorageError::CorruptedData {
                    key,
                    reason: format!("row holds commit {}", commit.id),
                });
            }
            Self::check_commit(&commit)?;
            commits.insert(commit.id.clone(), commit);
        }
        Ok(commits)
    }

    fn save_commit(&self, db: &DatabaseRef, commit: &Commit) -> StorageResult<()> {
        Self::check_commit(commit)?;
        let conn = self.conn.lock();
        let db_id = Self::db_id(&conn, db)?;
        conn.execute(
            "INSERT OR IGNORE INTO commits (db_id, commit_id, body) VALUES (?1, ?2, ?3)",
            params![db_id, commit.id.as_str(), serde_json::to_string(commit)?],
        )?;
        Ok(())
    }

    fn load_branches(&self, db: &DatabaseRef) -> StorageResult<BTreeMap<String, BranchEntry>> {
        let conn = self.conn.lock();
        let db_id = Self::db_id(&conn, db)?;

        let mut stmt = conn.prepare(
            "SELECT name, commit_id, commit_count, description FROM branches WHERE db_id = ?1 ORDER BY name",
        )?;
        let rows = stmt
            .query_map([db_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut branches = BTreeMap::new();
        for (name, commit, count, description) in rows {
            branches.insert(
                name,
                BranchEntry {
                    commit: CommitId::from_hex(&commit)?,
                    commit_count: count.max(0) as usize,
                    description,
                },
            );
        }
        Ok(branches)
    }

    fn insert_branch(&self, db: &DatabaseRef, name: &str, entry: &BranchEntry) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let db_id = Self::db_id(&tx, db)?;

        if Self::branch_exists(&tx, db_id, name)? {
            return Err(StorageError::BranchAlreadyExists(name.to_string()));
        }
        Self::insert_branch_row(&tx, db_id, name, entry)?;

        tx.commit()?;
        Ok(())
    }

    fn update_branch_head(
        &self,
        db: &DatabaseRef,
        name: &str,
        expected: &CommitId,
        new_head: &CommitId,
        commit_count: usize,
    ) -> StorageResult<()> {
        let conn = self.conn.lock();
        let db_id = Self::db_id(&conn, db)?;

        let updated = conn.execute(
            "UPDATE branches SET commit_id = ?1, commit_count = ?2 \
             WHERE db_id = ?3 AND name = ?4 AND commit_id = ?5",
            params![new_head.as_str(), commit_count as i64, db_id, name, expected.as_str()],
        )?;

        if updated == 0 {
            if !Self::branch_exists(&conn, db_id, name)? {
                return Err(StorageError::BranchNotFound(name.to_string()));
            }
            tracing::warn!(database = %db, branch = name, expected = expected.short(), "branch head moved underneath update");
            return Err(StorageError::ConcurrentModification {
                branch: name.to_string(),
            });
        }
        Ok(())
    }

    fn update_branch(
        &self,
        db: &DatabaseRef,
        old_name: &str,
        new_name: &str,
        description: Option<&str>,
    ) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let db_id = Self::db_id(&tx, db)?;

        if !Self::branch_exists(&tx, db_id, old_name)? {
            return Err(StorageError::BranchNotFound(old_name.to_string()));
        }
        if new_name != old_name && Self::branch_exists(&tx, db_id, new_name)? {
            return Err(StorageError::BranchAlreadyExists(new_name.to_string()));
        }

        tx.execute(
            "UPDATE branches SET name = ?1, description = ?2 WHERE db_id = ?3 AND name = ?4",
            params![new_name, description, db_id, old_name],
        )?;
        tx.execute(
            "UPDATE databases SET default_branch = ?1 WHERE db_id = ?2 AND default_branch = ?3",
            params![new_name, db_id, old_name],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn delete_branch(&self, db: &DatabaseRef, name: &str) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let db_id = Self::db_id(&tx, db)?;

        let deleted = tx.execute(
            "DELETE FROM branches WHERE db_id = ?1 AND name = ?2 \
             AND name != (SELECT default_branch FROM databases WHERE db_id = ?1) \
             AND (SELECT count(*) FROM branches WHERE db_id = ?1) > 1",
            params![db_id, name],
        )?;
        if deleted == 0 {
            if !Self::branch_exists(&tx, db_id, name)? {
                return Err(StorageError::BranchNotFound(name.to_string()));
            }
            let default: String = tx.query_row(
                "SELECT default_branch FROM databases WHERE db_id = ?1",
                [db_id],
                |row| row.get(0),
            )?;
            let reason = if default == name {
                "it is the default branch"
            } else {
                "it is the only branch"
            };
            return Err(StorageError::BranchProtected {
                branch: name.to_string(),
                reason,
            });
        }

        tx.commit()?;
        Ok(())
    }

    fn set_default_branch(&self, db: &DatabaseRef, name: &str) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let db_id = Self::db_id(&tx, db)?;

        if !Self::branch_exists(&tx, db_id, name)? {
            return Err(StorageError::BranchNotFound(name.to_string()));
        }
        tx.execute(
            "UPDATE databases SET default_branch = ?1 WHERE db_id = ?2",
            params![name, db_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn load_tags(&self, db: &DatabaseRef, kind: TagKind) -> StorageResult<BTreeMap<String, TagEntry>> {
        let conn = self.conn.lock();
        let db_id = Self::db_id(&conn, db)?;

        let mut stmt = conn.prepare("SELECT name, body FROM tags WHERE db_id = ?1 AND kind = ?2 ORDER BY name")?;
        let rows = stmt
            .query_map(params![db_id, kind.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tags = BTreeMap::new();
        for (name, body) in rows {
            tags.insert(name, serde_json::from_str(&body)?);
        }
        Ok(tags)
    }

    fn insert_tag(&self, db: &DatabaseRef, kind: TagKind, name: &str, entry: &TagEntry) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let db_id = Self::db_id(&tx, db)?;

        if Self::tag_body(&tx, db_id, kind, name)?.is_some() {
            return Err(StorageError::TagAlreadyExists {
                kind: kind.as_str(),
                name: name.to_string(),
            });
        }
        tx.execute(
            "INSERT INTO tags (db_id, kind, name, body) VALUES (?1, ?2, ?3, ?4)",
            params![db_id, kind.as_str(), name, serde_json::to_string(entry)?],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn update_tag(
        &self,
        db: &DatabaseRef,
        kind: TagKind,
        old_name: &str,
        new_name: &str,
        description: Option<&str>,
    ) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let db_id = Self::db_id(&tx, db)?;

        let body = Self::tag_body(&tx, db_id, kind, old_name)?.ok_or_else(|| StorageError::TagNotFound {
            kind: kind.as_str(),
            name: old_name.to_string(),
        })?;
        if new_name != old_name && Self::tag_body(&tx, db_id, kind, new_name)?.is_some() {
            return Err(StorageError::TagAlreadyExists {
                kind: kind.as_str(),
                name: new_name.to_string(),
            });
        }

        let mut entry: TagEntry = serde_json::from_str(&body)?;
        entry.description = description.map(str::to_string);
        tx.execute(
            "UPDATE tags SET name = ?1, body = ?2 WHERE db_id = ?3 AND kind = ?4 AND name = ?5",
            params![new_name, serde_json::to_string(&entry)?, db_id, kind.as_str(), old_name],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn delete_tag(&self, db: &DatabaseRef, kind: TagKind, name: &str) -> StorageResult<()> {
        let conn = self.conn.lock();
        let db_id = Self::db_id(&conn, db)?;
        let deleted = conn.execute(
            "DELETE FROM tags WHERE db_id = ?1 AND kind = ?2 AND name = ?3",
            params![db_id, kind.as_str(), name],
        )?;
        if deleted == 0 {
            return Err(StorageError::TagNotFound {
                kind: kind.as_str(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn insert_merge_request(&self, db: &DatabaseRef, mr: &MergeRequest) -> StorageResult<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let db_id = Self::db_id(&tx, db)?;

        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(mr_id), 0) + 1 FROM merge_requests WHERE db_id = ?1",
            [db_id],
            |row| row.get(0),
        )?;
        let mut record = mr.clone();
        record.id = next as u64;

        tx.execute(
            "INSERT INTO merge_requests (db_id, mr_id, body) VALUES (?1, ?2, ?3)",
            params![db_id, next, serde_json::to_string(&record)?],
        )?;

        tx.commit()?;
        Ok(record.id)
    }

    fn load_merge_request(&self, db: &DatabaseRef, id: u64) -> StorageResult<MergeRequest> {
        let conn = self.conn.lock();
        let db_id = Self::db_id(&conn, db)?;
        let body: String = conn
            .query_row(
                "SELECT body FROM merge_requests WHERE db_id = ?1 AND mr_id = ?2",
                params![db_id, id as i64],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StorageError::MergeRequestNotFound(id))?;
        Ok(serde_json::from_str(&body)?)
    }

    fn list_merge_requests(&self, db: &DatabaseRef) -> StorageResult<Vec<MergeRequest>> {
        let conn = self.conn.lock();
        let db_id = Self::db_id(&conn, db)?;

        let mut stmt = conn.prepare("SELECT body FROM merge_requests WHERE db_id = ?1 ORDER BY mr_id")?;
        let bodies = stmt
            .query_map([db_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(StorageError::from))
            .collect()
    }

    fn update_merge_request(&self, db: &DatabaseRef, mr: &MergeRequest) -> StorageResult<()> {
        let conn = self.conn.lock();
        let db_id = Self::db_id(&conn, db)?;
        let updated = conn.execute(
            "UPDATE merge_requests SET body = ?1 WHERE db_id = ?2 AND mr_id = ?3",
            params![serde_json::to_string(mr)?, db_id, mr.id as i64],
        )?;
        if updated == 0 {
            return Err(StorageError::MergeRequestNotFound(mr.id));
        }
        Ok(())
    }

    fn insert_comment(&self, db: &DatabaseRef, mr_id: u64, comment: &Comment) -> StorageResult<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let db_id = Self::db_id(&tx, db)?;
        if !Self::merge_request_exists(&tx, db_id, mr_id)? {
            return Err(StorageError::MergeRequestNotFound(mr_id));
        }

        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(comment_id), 0) + 1 FROM merge_request_comments WHERE db_id = ?1 AND mr_id = ?2",
            params![db_id, mr_id as i64],
            |row| row.get(0),
        )?;
        let mut record = comment.clone();
        record.id = next as u64;

        tx.execute(
            "INSERT INTO merge_request_comments (db_id, mr_id, comment_id, body) VALUES (?1, ?2, ?3, ?4)",
            params![db_id, mr_id as i64, next, serde_json::to_string(&record)?],
        )?;

        tx.commit()?;
        Ok(record.id)
    }

    fn list_comments(&self, db: &DatabaseRef, mr_id: u64) -> StorageResult<Vec<Comment>> {
        let conn = self.conn.lock();
        let db_id = Self::db_id(&conn, db)?;
        if !Self::merge_request_exists(&conn, db_id, mr_id)? {
            return Err(StorageError::MergeRequestNotFound(mr_id));
        }

        let mut stmt = conn.prepare(
            "SELECT body FROM merge_request_comments WHERE db_id = ?1 AND mr_id = ?2 ORDER BY comment_id",
        )?;
        let bodies = stmt
            .query_map(params![db_id, mr_id as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(StorageError::from))
            .collect()
    }

    fn update_comment(&self, db: &DatabaseRef, mr_id: u64, comment: &Comment) -> StorageResult<()> {
        let conn = self.conn.lock();
        let db_id = Self::db_id(&conn, db)?;
        let updated = conn.execute(
            "UPDATE merge_request_comments SET body = ?1 WHERE db_id = ?2 AND mr_id = ?3 AND comment_id = ?4",
            params![serde_json::to_string(comment)?, db_id, mr_id as i64, comment.id as i64],
        )?;
        if updated == 0 {
            return Err(StorageError::CommentNotFound(comment.id));
        }
        Ok(())
    }

    fn delete_comment(&self, db: &DatabaseRef, mr_id: u64, comment_id: u64) -> StorageResult<()> {
        let conn = self.conn.lock();
        let db_id = Self::db_id(&conn, db)?;
        let deleted = conn.execute(
            "DELETE FROM merge_request_comments WHERE db_id = ?1 AND mr_id = ?2 AND comment_id = ?3",
            params![db_id, mr_id as i64, comment_id as i64],
        )?;
        if deleted == 0 {
            return Err(StorageError::CommentNotFound(comment_id));
        }
        Ok(())
    }
}

impl IdentityResolver for SqliteStore {
    fn resolve_author(&self, email: &str) -> StorageResult<Option<AuthorIdentity>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT user_name, avatar_url FROM users WHERE email = ?1",
                [email.to_lowercase()],
                |row| {
                    Ok(AuthorIdentity {
                        username: row.get(0)?,
                        avatar_url: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{commit_on, root_commit};

    fn setup_store() -> (SqliteStore, DatabaseRef, CommitId) {
        let store = SqliteStore::open_in_memory().unwrap();
        let db = DatabaseRef::new("alice", "stats.sqlite").unwrap();

        let mut map = CommitMap::new();
        let c0 = root_commit(&mut map, "Initial commit");
        let root = map.remove(&c0).unwrap();
        let branch = BranchEntry {
            commit: c0.clone(),
            commit_count: 1,
            description: None,
        };
        store.create_database(&db, "main", &root, &branch).unwrap();
        (store, db, c0)
    }

    #[test]
    fn test_create_and_load() {
        let (store, db, c0) = setup_store();

        let commits = store.load_commits(&db).unwrap();
        assert_eq!(commits.len(), 1);
        assert!(commits.contains_key(&c0));

        let branches = store.load_branches(&db).unwrap();
        assert_eq!(branches["main"].commit, c0);
        assert_eq!(store.database_info(&db).unwrap().default_branch, "main");
    }

    #[test]
    fn test_owner_case_insensitive() {
        let (store, _db, _c0) = setup_store();
        let shouty = DatabaseRef::new("ALICE", "stats.sqlite").unwrap();
        assert!(store.database_exists(&shouty).unwrap());

        let other_name = DatabaseRef::new("alice", "Stats.sqlite").unwrap();
        assert!(!store.database_exists(&other_name).unwrap());
    }

    #[test]
    fn test_duplicate_database() {
        let (store, db, c0) = setup_store();
        let commits = store.load_commits(&db).unwrap();
        let branch = BranchEntry {
            commit: c0.clone(),
            commit_count: 1,
            description: None,
        };
        let err = store.create_database(&db, "main", &commits[&c0], &branch).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_branch_head_compare_and_swap() {
        let (store, db, c0) = setup_store();
        let mut map = store.load_commits(&db).unwrap();
        let c1 = commit_on(&mut map, &c0, &[], "c1");
        store.save_commit(&db, &map[&c1]).unwrap();

        store.update_branch_head(&db, "main", &c0, &c1, 2).unwrap();

        // a second writer still expecting c0 loses
        let err = store.update_branch_head(&db, "main", &c0, &c1, 2).unwrap_err();
        assert!(matches!(err, StorageError::ConcurrentModification { .. }));

        let err = store.update_branch_head(&db, "nope", &c0, &c1, 2).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_rename_repoints_default() {
        let (store, db, c0) = setup_store();
        let entry = BranchEntry {
            commit: c0,
            commit_count: 1,
            description: None,
        };
        store.insert_branch(&db, "dev", &entry).unwrap();
        assert!(store.insert_branch(&db, "dev", &entry).unwrap_err().is_conflict());

        assert!(store.update_branch(&db, "main", "dev", None).unwrap_err().is_conflict());

        store.update_branch(&db, "main", "trunk", Some("renamed")).unwrap();
        assert_eq!(store.database_info(&db).unwrap().default_branch, "trunk");
        let branches = store.load_branches(&db).unwrap();
        assert!(!branches.contains_key("main"));
        assert_eq!(branches["trunk"].description.as_deref(), Some("renamed"));
    }

    #[test]
    fn test_tags_and_releases_are_separate() {
        let (store, db, c0) = setup_store();
        let entry = TagEntry {
            commit: c0,
            date: Utc::now(),
            description: Some("first".into()),
            tagger: crate::storage::Signature::new("Alice", "alice@example.org"),
            size: None,
        };
        store.insert_tag(&db, TagKind::Tag, "v1", &entry).unwrap();
        store.insert_tag(&db, TagKind::Release, "v1", &entry).unwrap();
        assert!(store.insert_tag(&db, TagKind::Tag, "v1", &entry).unwrap_err().is_conflict());

        store.update_tag(&db, TagKind::Tag, "v1", "v1.0", None).unwrap();
        let tags = store.load_tags(&db, TagKind::Tag).unwrap();
        assert!(tags["v1.0"].description.is_none());
        assert!(store.load_tags(&db, TagKind::Release).unwrap().contains_key("v1"));

        store.delete_tag(&db, TagKind::Release, "v1").unwrap();
        assert!(store.delete_tag(&db, TagKind::Release, "v1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_forged_commit_rejected_on_save() {
        let (store, db, c0) = setup_store();
        let mut map = store.load_commits(&db).unwrap();
        let c1 = commit_on(&mut map, &c0, &[], "c1");

        let mut forged = map[&c1].clone();
        forged.tree.entries[0].sha256 = crate::storage::ContentHash::of(b"something else");
        let err = store.save_commit(&db, &forged).unwrap_err();
        assert!(matches!(err, StorageError::CorruptedData { .. }));
        assert!(!store.load_commits(&db).unwrap().contains_key(&c1));
    }

    #[test]
    fn test_tampered_row_fails_load() {
        let (store, db, c0) = setup_store();
        let mut root = store.load_commits(&db).unwrap().remove(&c0).unwrap();
        root.message = "rewritten".into();
        {
            let conn = store.conn.lock();
            conn.execute(
                "UPDATE commits SET body = ?1 WHERE commit_id = ?2",
                params![serde_json::to_string(&root).unwrap(), c0.as_str()],
            )
            .unwrap();
        }

        let err = store.load_commits(&db).unwrap_err();
        assert!(matches!(err, StorageError::CorruptedData { ref key, .. } if key == c0.as_str()));
    }

    #[test]
    fn test_delete_branch_guards() {
        let (store, db, c0) = setup_store();
        let err = store.delete_branch(&db, "main").unwrap_err();
        assert!(err.is_precondition());

        let entry = BranchEntry {
            commit: c0,
            commit_count: 1,
            description: None,
        };
        store.insert_branch(&db, "dev", &entry).unwrap();
        let err = store.delete_branch(&db, "main").unwrap_err();
        assert!(matches!(err, StorageError::BranchProtected { reason, .. } if reason.contains("default")));

        store.set_default_branch(&db, "dev").unwrap();
        store.delete_branch(&db, "main").unwrap();
        let err = store.delete_branch(&db, "dev").unwrap_err();
        assert!(err.is_precondition());
        assert!(store.delete_branch(&db, "main").unwrap_err().is_not_found());
        assert_eq!(store.load_branches(&db).unwrap().len(), 1);
    }

    #[test]
    fn test_import_database_is_all_or_nothing() {
        let (store, db, c0) = setup_store();
        let mut commits = store.load_commits(&db).unwrap();
        let c1 = commit_on(&mut commits, &c0, &[], "c1");
        let mut branches = BTreeMap::new();
        branches.insert(
            "main".to_string(),
            BranchEntry {
                commit: c1.clone(),
                commit_count: 2,
                description: None,
            },
        );

        let fork = DatabaseRef::new("bob", "stats.sqlite").unwrap();
        let mut broken = commits.clone();
        if let Some(commit) = broken.get_mut(&c1) {
            commit.message = "edited".into();
        }
        assert!(store.import_database(&fork, "main", &broken, &branches).is_err());
        assert!(!store.database_exists(&fork).unwrap());

        store.import_database(&fork, "main", &commits, &branches).unwrap();
        assert_eq!(store.load_commits(&fork).unwrap().len(), 2);
        assert_eq!(store.load_branches(&fork).unwrap()["main"].commit, c1);
    }

    #[test]
    fn test_comment_thread() {
        let (store, db, _c0) = setup_store();
        let mr = MergeRequest::new(
            "thread",
            "alice",
            crate::storage::BranchRef::new(db.clone(), "dev"),
            crate::storage::BranchRef::new(db.clone(), "main"),
            Vec::new(),
        );
        let mr_id = store.insert_merge_request(&db, &mr).unwrap();

        let first = store.insert_comment(&db, mr_id, &Comment::text("bob", "why?")).unwrap();
        let second = store
            .insert_comment(&db, mr_id, &Comment::event(crate::merge::CommentKind::Close, "alice"))
            .unwrap();
        assert_eq!((first, second), (1, 2));

        let mut thread = store.list_comments(&db, mr_id).unwrap();
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[0].id, 1);

        thread[0].body = "never mind".into();
        store.update_comment(&db, mr_id, &thread[0]).unwrap();
        store.delete_comment(&db, mr_id, second).unwrap();
        assert!(store.delete_comment(&db, mr_id, second).unwrap_err().is_not_found());

        let thread = store.list_comments(&db, mr_id).unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].body, "never mind");

        let err = store.insert_comment(&db, mr_id + 1, &Comment::text("bob", "hi")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_resolve_author() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_user("alice", "Alice@Example.org", Some("https://example.org/a.png")).unwrap();

        let found = store.resolve_author("alice@example.org").unwrap().unwrap();
        assert_eq!(found.username, "alice");
        assert!(store.resolve_author("bob@example.org").unwrap().is_none());
    }
}
