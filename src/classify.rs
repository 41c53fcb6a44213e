#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Maps gateway faults onto retry decisions and credential health changes.

use crate::gateway::Fault;
use crate::types::{CredentialHealth, FailureReason};

/// Who a fault is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// The credential is unusable; try another one.
    Credential,
    /// The work item itself cannot succeed with any credential.
    Terminal(FailureReason),
    /// Possibly temporary; try another credential, fail on exhaustion.
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Open,
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthChange {
    pub next: CredentialHealth,
    /// The persisted session blob must be deleted as well.
    pub purge_session: bool,
}

#[must_use]
pub const fn classify(fault: &Fault) -> FaultClass {
    match fault {
        Fault::Banned | Fault::Unauthorized | Fault::RateLimited { .. } => FaultClass::Credential,
        Fault::RestrictedContent(_) => FaultClass::Terminal(FailureReason::Restricted),
        Fault::NotFound(_) => FaultClass::Terminal(FailureReason::NotFound),
        Fault::NetworkError(_) | Fault::Unknown(_) => FaultClass::Transient,
    }
}

/// Health the credential moves to after `fault` was raised in `phase`, if any.
#[must_use]
pub const fn health_change(fault: &Fault, phase: Phase) -> Option<HealthChange> {
    match (fault, phase) {
        (Fault::Banned, _) => Some(HealthChange {
            next: CredentialHealth::Banned,
            purge_session: true,
        }),
        (Fault::Unauthorized, _) => Some(HealthChange {
            next: CredentialHealth::Banned,
            purge_session: false,
        }),
        (Fault::RateLimited { .. }, _)
        | (Fault::NetworkError(_) | Fault::Unknown(_), Phase::Open) => Some(HealthChange {
            next: CredentialHealth::Errored,
            purge_session: false,
        }),
        _ => None,
    }
}
