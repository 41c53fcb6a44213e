#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::types::{StoredResult, TaskId, WorkItemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Done,
    Error,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown task status: {s}")),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    #[must_use]
    pub const fn from_ascending(ascending: bool) -> Self {
        if ascending {
            Self::Asc
        } else {
            Self::Desc
        }
    }
}

impl TryFrom<&str> for SortOrder {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(format!("Unknown sort order: {s}")),
        }
    }
}

/// One unit of requested content retrieval. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub task_id: TaskId,
    pub locator: String,
    pub limit: u32,
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWorkItem {
    pub locator: String,
    pub limit: u32,
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub items: Vec<NewWorkItem>,
}

impl NewTask {
    pub const DEFAULT_LIMIT: u32 = 100;

    /// Builds a task whose items share one limit and ordering, the shape bulk
    /// submissions arrive in.
    #[must_use]
    pub fn uniform(locators: &[String], limit: u32, order: SortOrder) -> Self {
        Self {
            items: locators
                .iter()
                .map(|locator| NewWorkItem {
                    locator: locator.clone(),
                    limit,
                    order,
                })
                .collect(),
        }
    }

    /// # Errors
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.items.is_empty() {
            return Err("task must contain at least one work item".to_string());
        }
        self.items.iter().try_for_each(|item| {
            if item.locator.trim().is_empty() {
                Err("work item locator must not be empty".to_string())
            } else if item.limit == 0 {
                Err(format!("work item {} has a zero limit", item.locator))
            } else {
                Ok(())
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: TaskId,
    pub correlation_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub correlation_id: Uuid,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub work_items: u32,
    pub results: Vec<StoredResult>,
}

impl TaskReport {
    #[must_use]
    pub fn pending_items(&self) -> u32 {
        let settled = u32::try_from(self.results.len()).unwrap_or(u32::MAX);
        self.work_items.saturating_sub(settled)
    }
}
