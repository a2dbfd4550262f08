//! Commit graph engine.
//!
//! Pure data model and algorithms over a database's full commit map. Nothing
//! in here touches storage; callers load the map, ask a question, and persist
//! whatever decision comes back.

mod ancestor;
mod commit;
mod history;

pub use ancestor::{common_ancestor, AncestorCommits, CommitOrder};
pub use commit::{Commit, CommitBuilder, CommitMap, EntryType, Tree, TreeEntry};
pub use history::{branch_history, commit_count, is_commit_in_history, primary_chain};
