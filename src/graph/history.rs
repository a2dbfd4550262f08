//! Branch history walks.
//!
//! A branch's history is its primary parent chain plus, for every merge commit
//! on it, the commits merged in through the extra parents. Those merged-in
//! commits are spliced in right after the merge commit that brought them in.
//! Walks are iterative with explicit stacks so long histories never recurse.

use std::collections::HashSet;

use crate::error::{HubError, HubResult};
use crate::graph::commit::{Commit, CommitMap};
use crate::storage::CommitId;

fn lookup<'a>(commits: &'a CommitMap, id: &CommitId) -> HubResult<&'a Commit> {
    commits
        .get(id)
        .ok_or_else(|| HubError::BrokenHistory(format!("commit {} missing from commit map", id.short())))
}

/// Follow primary parents from `head` back to the root.
pub fn primary_chain<'a>(head: &CommitId, commits: &'a CommitMap) -> HubResult<Vec<&'a Commit>> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut next = Some(head);

    while let Some(id) = next {
        if !visited.insert(id) {
            return Err(HubError::BrokenHistory(format!("parent cycle at commit {}", id.short())));
        }
        let commit = lookup(commits, id)?;
        chain.push(commit);
        next = commit.parent.as_ref();
    }

    Ok(chain)
}

/// Full history of a branch, newest first, each commit exactly once.
pub fn branch_history<'a>(head: &CommitId, commits: &'a CommitMap) -> HubResult<Vec<&'a Commit>> {
    // pass 1: the primary chain
    let regular = primary_chain(head, commits)?;
    let regular_ids: HashSet<&CommitId> = regular.iter().copied().map(|c| &c.id).collect();

    // pass 2: splice in merged-in commits
    let mut history = Vec::with_capacity(regular.len());
    let mut seen: HashSet<&CommitId> = HashSet::new();

    for commit in regular {
        if !seen.insert(&commit.id) {
            continue;
        }
        history.push(commit);

        let mut stack: Vec<&CommitId> = commit.other_parents.iter().rev().collect();
        while let Some(id) = stack.pop() {
            if regular_ids.contains(id) || seen.contains(id) {
                continue;
            }
            let off_branch = lookup(commits, id)?;
            seen.insert(&off_branch.id);
            history.push(off_branch);

            // primary parent goes on top so it is walked first
            stack.extend(off_branch.other_parents.iter().rev());
            if let Some(parent) = &off_branch.parent {
                stack.push(parent);
            }
        }
    }

    Ok(history)
}

/// Whether `target` is part of the history of `head`.
pub fn is_commit_in_history(head: &CommitId, target: &CommitId, commits: &CommitMap) -> HubResult<bool> {
    Ok(branch_history(head, commits)?.iter().any(|c| &c.id == target))
}

/// Number of commits in the history of `head`.
pub fn commit_count(head: &CommitId, commits: &CommitMap) -> HubResult<usize> {
    Ok(branch_history(head, commits)?.len())
}
