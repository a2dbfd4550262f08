//! Discussion thread entries of a merge request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a thread entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentKind {
    #[serde(rename = "txt")]
    Text,
    #[serde(rename = "cls")]
    Close,
    #[serde(rename = "rop")]
    Reopen,
    #[serde(rename = "mrg")]
    Merge,
}

/// One entry on a merge request thread: a comment or a state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// assigned by the store, unique per merge request
    pub id: u64,
    pub commenter: String,
    /// empty for state changes made without a remark
    pub body: String,
    pub kind: CommentKind,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Comment {
    pub fn text(commenter: impl Into<String>, body: impl Into<String>) -> Self {
        Self::entry(CommentKind::Text, commenter, body)
    }

    pub fn event(kind: CommentKind, commenter: impl Into<String>) -> Self {
        Self::entry(kind, commenter, String::new())
    }

    fn entry(kind: CommentKind, commenter: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: 0,
            commenter: commenter.into(),
            body: body.into(),
            kind,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn is_event(&self) -> bool {
        self.kind != CommentKind::Text
    }
}
