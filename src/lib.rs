//! sqlhub - version control for hosted SQLite databases
//!
//! Every upload of a database file becomes a commit in a per-database
//! history. Branches, tags and releases point into that history, commits can
//! be diffed down to the row level, and merge requests fast-forward one branch
//! onto another, across forks of the same database.
//!
//! # Example
//!
//! ```no_run
//! use sqlhub::diff::DiffOptions;
//! use sqlhub::hub::{CommitRef, Hub, HubConfig};
//! use sqlhub::storage::{DatabaseRef, Signature};
//!
//! let hub = Hub::open(HubConfig::new("./hub-data")).unwrap();
//! let db = DatabaseRef::new("alice", "stats.sqlite").unwrap();
//! let author = Signature::new("Alice", "alice@example.org");
//!
//! let first = hub
//!     .create_database(&db, &std::fs::read("v1.sqlite").unwrap(), None, author.clone(), "Initial commit")
//!     .unwrap();
//! let second = hub
//!     .commit_snapshot(&db, "main", &std::fs::read("v2.sqlite").unwrap(), None, author, "Add readings")
//!     .unwrap();
//!
//! let diffs = hub
//!     .diff(
//!         &CommitRef::new(db.clone(), first.id),
//!         &CommitRef::new(db, second.id),
//!         None,
//!         DiffOptions::new().include_data(true),
//!     )
//!     .unwrap();
//! println!("{} objects changed", diffs.diff.len());
//! ```

pub mod diff;
pub mod error;
pub mod graph;
pub mod hub;
pub mod logging;
pub mod merge;
pub mod refs;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::{ErrorKind, HubError, HubResult};
pub use hub::{CommitRef, Hub, HubConfig};
