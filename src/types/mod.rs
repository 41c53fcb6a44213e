#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod identifiers;
mod locator;
mod outcome;
mod resource;
mod task;

pub use identifiers::{CredentialId, EgressId, TaskId, TaskRef, WorkItemId};
pub use locator::{ContentLocator, LocatorError};
pub use outcome::{FailureReason, ReactionCount, ReactionTally, StoredResult, WorkItemOutcome};
pub use resource::{Credential, CredentialHealth, Egress, EgressKind};
pub use task::{
    NewTask, NewWorkItem, SortOrder, TaskHandle, TaskReport, TaskStatus, WorkItem,
};
