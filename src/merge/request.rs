//! Merge request records and their state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HubError, HubResult};
use crate::graph::Commit;
use crate::storage::{BranchRef, CommitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRequestState {
    Open,
    Merged,
    Closed,
}

impl fmt::Display for MergeRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MergeRequestState::Open => "open",
            MergeRequestState::Merged => "merged",
            MergeRequestState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of the last mergeability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStatus {
    /// the destination can be fast-forwarded with the recorded commits
    pub usable: bool,
    /// the source database and branch still exist
    pub source_available: bool,
    /// shown to users when something is off
    pub message: Option<String>,
}

/// A proposal to fast-forward `destination` with commits from `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    /// assigned by the store, unique per destination database
    pub id: u64,
    pub title: String,
    pub description: Option<String>,
    pub creator: String,
    pub created_at: DateTime<Utc>,
    pub source: BranchRef,
    pub destination: BranchRef,
    /// commits to apply, newest first
    pub commits: Vec<Commit>,
    pub state: MergeRequestState,
    #[serde(default)]
    pub status: Option<MergeStatus>,
}

impl MergeRequest {
    pub fn new(
        title: impl Into<String>,
        creator: impl Into<String>,
        source: BranchRef,
        destination: BranchRef,
        commits: Vec<Commit>,
    ) -> Self {
        Self {
            id: 0,
            title: title.into(),
            description: None,
            creator: creator.into(),
            created_at: Utc::now(),
            source,
            destination,
            commits,
            state: MergeRequestState::Open,
            status: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Where the destination ends up after the merge.
    pub fn target_head(&self) -> Option<&CommitId> {
        self.commits.first().map(|c| &c.id)
    }

    /// Destination head the recorded commits apply to.
    pub fn merge_point(&self) -> Option<&CommitId> {
        self.commits.last().and_then(|c| c.parent.as_ref())
    }

    fn transition(&mut self, allowed_from: MergeRequestState, to: MergeRequestState) -> HubResult<()> {
        if self.state != allowed_from {
            return Err(HubError::PreconditionFailed(format!(
                "merge request #{} is {}, cannot become {}",
                self.id, self.state, to
            )));
        }
        self.state = to;
        Ok(())
    }

    pub fn close(&mut self) -> HubResult<()> {
        self.transition(MergeRequestState::Open, MergeRequestState::Closed)
    }

    pub fn reopen(&mut self) -> HubResult<()> {
        self.transition(MergeRequestState::Closed, MergeRequestState::Open)
    }

    pub fn mark_merged(&mut self) -> HubResult<()> {
        self.transition(MergeRequestState::Open, MergeRequestState::Merged)
    }
}
