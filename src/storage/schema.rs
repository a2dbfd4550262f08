//! Table layout of the metadata store.
//!
//! Commits, tags, merge requests and their comments are stored as JSON bodies; the columns
//! next to them exist for lookups and uniqueness only.

pub(crate) const SCHEMA_VERSION: i64 = 2;

pub(crate) const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS databases (
    db_id          INTEGER PRIMARY KEY AUTOINCREMENT,
    owner          TEXT NOT NULL,
    owner_key      TEXT NOT NULL,
    name           TEXT NOT NULL,
    default_branch TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    UNIQUE (owner_key, name)
);

CREATE TABLE IF NOT EXISTS commits (
    db_id     INTEGER NOT NULL REFERENCES databases (db_id) ON DELETE CASCADE,
    commit_id TEXT NOT NULL,
    body      TEXT NOT NULL,
    PRIMARY KEY (db_id, commit_id)
);

CREATE TABLE IF NOT EXISTS branches (
    db_id        INTEGER NOT NULL REFERENCES databases (db_id) ON DELETE CASCADE,
    name         TEXT NOT NULL,
    commit_id    TEXT NOT NULL,
    commit_count INTEGER NOT NULL,
    description  TEXT,
    PRIMARY KEY (db_id, name)
);

CREATE TABLE IF NOT EXISTS tags (
    db_id INTEGER NOT NULL REFERENCES databases (db_id) ON DELETE CASCADE,
    kind  TEXT NOT NULL,
    name  TEXT NOT NULL,
    body  TEXT NOT NULL,
    PRIMARY KEY (db_id, kind, name)
);

CREATE TABLE IF NOT EXISTS merge_requests (
    db_id INTEGER NOT NULL REFERENCES databases (db_id) ON DELETE CASCADE,
    mr_id INTEGER NOT NULL,
    body  TEXT NOT NULL,
    PRIMARY KEY (db_id, mr_id)
);

CREATE TABLE IF NOT EXISTS merge_request_comments (
    db_id      INTEGER NOT NULL,
    mr_id      INTEGER NOT NULL,
    comment_id INTEGER NOT NULL,
    body       TEXT NOT NULL,
    PRIMARY KEY (db_id, mr_id, comment_id),
    FOREIGN KEY (db_id, mr_id) REFERENCES merge_requests (db_id, mr_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS users (
    user_name  TEXT PRIMARY KEY,
    email      TEXT NOT NULL UNIQUE,
    avatar_url TEXT
);
";
