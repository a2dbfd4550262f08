//! Merge requests and the fast-forward merge orchestrator.

mod comment;
mod orchestrator;
mod request;

pub use comment::{Comment, CommentKind};
pub use orchestrator::{
    LicenceWarning, MergeOrchestrator, MergeOutcome, DESTINATION_CHANGED, DESTINATION_MISSING, NOTHING_TO_MERGE,
    SOURCE_MISSING,
};
pub use request::{MergeRequest, MergeRequestState, MergeStatus};
