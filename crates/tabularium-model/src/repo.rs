//! Repository interface types.
//!
//! The coordination core treats the version-control backend as an external
//! collaborator reached through a narrow commit/log interface. These are the
//! values that cross it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One commit in the repository history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogInfo {
    /// Backend revision identifier.
    pub revision: String,
    /// Commit author (user id).
    pub author: String,
    /// Commit comment.
    pub comment: String,
    /// Commit timestamp.
    pub date_time: DateTime<Utc>,
    /// Structured properties attached to the commit.
    pub properties: Vec<LogPropertyInfo>,
}

/// A structured key/value property attached to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPropertyInfo {
    /// Property key.
    pub key: String,
    /// Property value.
    pub value: String,
}

/// Working-copy state of one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepositoryItemState {
    /// Not under version control.
    Untracked,
    /// Scheduled for addition.
    Added,
    /// Tracked and changed since the last commit.
    Modified,
    /// Scheduled for deletion.
    Deleted,
    /// Tracked and unchanged.
    Unchanged,
}

/// One entry in a repository status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryItem {
    /// The path.
    pub path: String,
    /// Its working-copy state.
    pub state: RepositoryItemState,
}
