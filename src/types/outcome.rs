#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::types::{TaskId, WorkItemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    Restricted,
    NotFound,
    ExhaustedPool,
    Unknown,
}

impl FailureReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Restricted => "restricted",
            Self::NotFound => "not-found",
            Self::ExhaustedPool => "exhausted-pool",
            Self::Unknown => "unknown",
        }
    }
}

impl TryFrom<&str> for FailureReason {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "restricted" => Ok(Self::Restricted),
            "not-found" => Ok(Self::NotFound),
            "exhausted-pool" => Ok(Self::ExhaustedPool),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Unknown failure reason: {s}")),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionCount {
    pub emoji: String,
    pub count: u64,
}

/// Per-emoji counts of the parent post, bucketed into positive and negative sums.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionTally {
    pub counts: Vec<ReactionCount>,
    pub positive: u64,
    pub negative: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum WorkItemOutcome {
    Success {
        content: Value,
        reactions: ReactionTally,
    },
    Failure {
        reason: FailureReason,
        detail: String,
    },
}

impl WorkItemOutcome {
    #[must_use]
    pub fn failure(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self::Failure {
            reason,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub const fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { reason, .. } => Some(*reason),
        }
    }

    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub sequence: i64,
    pub task_id: TaskId,
    pub work_item_id: WorkItemId,
    pub locator: String,
    #[serde(flatten)]
    pub outcome: WorkItemOutcome,
    pub recorded_at: DateTime<Utc>,
}
