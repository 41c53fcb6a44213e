#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Drives one work item across the credential pool until it succeeds, fails
//! terminally or runs out of credentials.

#[cfg(test)]
mod tests;

use crate::classify::{classify, health_change, FaultClass, HealthChange, Phase};
use crate::error::Result;
use crate::gateway::{Capability, CapabilityResult, ClientFactory, Fault, Session, SessionGateway};
use crate::payload::{content_to_json, tally_reactions};
use crate::pool::PoolSelector;
use crate::store::CredentialStore;
use crate::types::{
    ContentLocator, Credential, CredentialId, FailureReason, LocatorError, WorkItem,
    WorkItemOutcome,
};
use std::time::Duration;
use tracing::{info, warn};

enum Attempt {
    Settled(WorkItemOutcome),
    Retry(Fault),
}

pub struct RetryOrchestrator<S, F> {
    store: S,
    selector: PoolSelector<S>,
    gateway: SessionGateway<F>,
    cooldown: Duration,
}

impl<S, F> RetryOrchestrator<S, F>
where
    S: CredentialStore + Clone,
    F: ClientFactory,
{
    #[must_use]
    pub fn new(store: S, gateway: SessionGateway<F>, cooldown: Duration) -> Self {
        Self {
            selector: PoolSelector::new(store.clone()),
            store,
            gateway,
            cooldown,
        }
    }

    /// Produces exactly one outcome for `item`. Credential-level faults are
    /// absorbed by moving on to the next credential.
    ///
    /// # Errors
    /// Returns an error only when the store fails; no outcome is produced then.
    pub async fn run(&self, item: &WorkItem) -> Result<WorkItemOutcome> {
        let locator = match ContentLocator::parse(&item.locator) {
            Ok(locator) => locator,
            Err(LocatorError::Restricted(detail)) => {
                info!("Work item {} addresses a private channel", item.id);
                return Ok(WorkItemOutcome::failure(
                    FailureReason::Restricted,
                    format!("private channel link: {detail}"),
                ));
            }
            Err(LocatorError::Malformed(detail)) => {
                info!("Work item {} has an unusable locator", item.id);
                return Ok(WorkItemOutcome::failure(FailureReason::NotFound, detail));
            }
        };

        let budget = self.store.active_credential_count().await?;
        let mut tried: Vec<CredentialId> = Vec::new();
        let mut last_fault: Option<Fault> = None;

        for _ in 0..budget {
            let Some(credential) = self.selector.select_credential(&tried).await? else {
                break;
            };
            tried.push(credential.id);

            let attempt = self.attempt(&credential, &locator, item).await;
            if !self.cooldown.is_zero() {
                tokio::time::sleep(self.cooldown).await;
            }

            match attempt? {
                Attempt::Settled(outcome) => return Ok(outcome),
                Attempt::Retry(fault) => last_fault = Some(fault),
            }
        }

        warn!(
            "Work item {} exhausted the pool after {} attempt(s)",
            item.id,
            tried.len()
        );
        let detail = last_fault.map_or_else(
            || format!("no usable credential after {} attempt(s)", tried.len()),
            |fault| {
                format!(
                    "no usable credential after {} attempt(s); last fault: {fault}",
                    tried.len()
                )
            },
        );
        Ok(WorkItemOutcome::failure(FailureReason::ExhaustedPool, detail))
    }

    async fn attempt(
        &self,
        credential: &Credential,
        locator: &ContentLocator,
        item: &WorkItem,
    ) -> Result<Attempt> {
        let egress = self.selector.assign_egress(credential).await?;

        let mut session = match self.gateway.open(credential, egress.as_ref()).await {
            Ok(session) => session,
            Err(fault) => return self.absorb(credential, fault, Phase::Open).await,
        };

        let harvested = self.harvest(&session, credential, locator, item).await;
        self.gateway.close(&mut session).await;
        debug_assert!(session.is_closed());

        match harvested? {
            Ok(outcome) => {
                info!(
                    "Work item {} harvested with {}",
                    item.id, credential.login
                );
                Ok(Attempt::Settled(outcome))
            }
            Err(fault) => self.absorb(credential, fault, Phase::Execute).await,
        }
    }

    /// Fetches the post and its replies. The outer error is a store failure,
    /// the inner one a gateway fault.
    async fn harvest(
        &self,
        session: &Session<F::Client>,
        credential: &Credential,
        locator: &ContentLocator,
        item: &WorkItem,
    ) -> Result<std::result::Result<WorkItemOutcome, Fault>> {
        self.store.record_usage(credential.id).await?;

        let fetch = Capability::FetchContent {
            channel: locator.channel.clone(),
            message_id: locator.message_id,
        };
        let content = match self.gateway.execute(session, &fetch).await {
            Ok(CapabilityResult::Content(content)) => content,
            Ok(CapabilityResult::Replies(_)) => {
                return Ok(Err(Fault::Unknown(
                    "content request answered with replies".to_string(),
                )))
            }
            Err(fault) => return Ok(Err(fault)),
        };

        let replies = Capability::IterateReplies {
            channel: locator.channel.clone(),
            parent_id: content.id,
            limit: item.limit,
            order: item.order,
        };
        let replies = match self.gateway.execute(session, &replies).await {
            Ok(CapabilityResult::Replies(replies)) => replies,
            Ok(CapabilityResult::Content(_)) => {
                return Ok(Err(Fault::Unknown(
                    "reply request answered with content".to_string(),
                )))
            }
            Err(fault) => return Ok(Err(fault)),
        };

        Ok(Ok(WorkItemOutcome::Success {
            content: content_to_json(&content, &replies),
            reactions: tally_reactions(&content.reactions),
        }))
    }

    async fn absorb(&self, credential: &Credential, fault: Fault, phase: Phase) -> Result<Attempt> {
        if let Some(change) = health_change(&fault, phase) {
            self.apply_health(credential, change).await?;
        }

        match classify(&fault) {
            FaultClass::Terminal(reason) => {
                info!(
                    "Work item failed terminally on {}: {}",
                    credential.login, fault
                );
                Ok(Attempt::Settled(WorkItemOutcome::failure(
                    reason,
                    fault.to_string(),
                )))
            }
            FaultClass::Credential | FaultClass::Transient => {
                warn!(
                    "Attempt with {} failed ({:?}): {}; trying next credential",
                    credential.login, phase, fault
                );
                Ok(Attempt::Retry(fault))
            }
        }
    }

    async fn apply_health(&self, credential: &Credential, change: HealthChange) -> Result<()> {
        let moved = self
            .store
            .transition_health(credential.id, change.next)
            .await?;
        if moved {
            info!("Credential {} is now {}", credential.login, change.next);
        }

        if change.purge_session {
            if let Err(e) = self.gateway.vault().purge(credential).await {
                warn!(
                    "Failed to purge session blob of {}: {}",
                    credential.login, e
                );
            }
        }
        Ok(())
    }
}
