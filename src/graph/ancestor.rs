//! Fast-forward ancestor search between two branches.
//!
//! The two sides may live in different databases; all that matters is the
//! source's commit map and the destination's head id. A fast-forward is
//! possible when the destination head sits on the source's primary chain.

use crate::error::{HubError, HubResult};
use crate::graph::commit::{Commit, CommitMap};
use crate::storage::CommitId;

/// Order of the commits returned by an ancestor search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitOrder {
    /// source head first (display order)
    #[default]
    NewestFirst,
    /// the commit right after the ancestor first (application order)
    OldestFirst,
}

/// Result of a successful ancestor search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestorCommits {
    /// the destination head, found on the source's chain
    pub ancestor: CommitId,
    /// source commits after the ancestor
    pub commits: Vec<Commit>,
}

/// Find the commits a fast-forward of `dst_head` to `src_head` would apply.
///
/// Fails with `NoCommonAncestor` when the destination head is not on the
/// source's chain, i.e. the destination has diverged.
pub fn common_ancestor(
    src_head: &CommitId,
    src_commits: &CommitMap,
    dst_head: &CommitId,
    order: CommitOrder,
) -> HubResult<AncestorCommits> {
    let mut commits = Vec::new();
    let mut next = Some(src_head);

    loop {
        let id = match next {
            Some(id) => id,
            None => {
                return Err(HubError::NoCommonAncestor {
                    from: src_head.short().to_string(),
                    onto: dst_head.short().to_string(),
                })
            }
        };
        if id == dst_head {
            break;
        }

        let commit = src_commits
            .get(id)
            .ok_or_else(|| HubError::BrokenHistory(format!("commit {} missing from commit map", id.short())))?;
        if commits.len() > src_commits.len() {
            return Err(HubError::BrokenHistory(format!("parent cycle at commit {}", id.short())));
        }
        commits.push(commit.clone());
        next = commit.parent.as_ref();
    }

    if order == CommitOrder::OldestFirst {
        commits.reverse();
    }

    Ok(AncestorCommits {
        ancestor: dst_head.clone(),
        commits,
    })
}
