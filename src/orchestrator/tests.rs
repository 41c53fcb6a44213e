#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use super::RetryOrchestrator;
use crate::gateway::scripted::Step;
use crate::gateway::{Fault, ScriptedFactory, SessionGateway, SessionVault};
use crate::store::{CredentialStore, MemoryStore, TaskStore};
use crate::types::{
    Credential, CredentialHealth, FailureReason, NewTask, SortOrder, WorkItem, WorkItemOutcome,
};
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    store: MemoryStore,
    factory: ScriptedFactory,
    orchestrator: RetryOrchestrator<MemoryStore, ScriptedFactory>,
    sessions: TempDir,
}

impl Harness {
    fn new() -> Self {
        let store = MemoryStore::new();
        let factory = ScriptedFactory::new();
        let sessions = tempfile::tempdir().expect("tempdir");
        let gateway = SessionGateway::new(
            factory.clone(),
            SessionVault::new(sessions.path()),
            Duration::from_secs(60),
        );
        Self {
            orchestrator: RetryOrchestrator::new(store.clone(), gateway, Duration::ZERO),
            store,
            factory,
            sessions,
        }
    }

    async fn credential(&self, login: &str, step: Step) -> Credential {
        let credential = self.store.register_credential(login).await;
        std::fs::write(
            self.sessions.path().join(credential.session_file_name()),
            b"session",
        )
        .expect("write session blob");
        self.factory.script(login, step).await;
        credential
    }

    fn blob_exists(&self, credential: &Credential) -> bool {
        self.sessions
            .path()
            .join(credential.session_file_name())
            .exists()
    }

    async fn work_item(&self, locator: &str, limit: u32) -> WorkItem {
        let task = NewTask::uniform(&[locator.to_string()], limit, SortOrder::Asc);
        let handle = self.store.submit_task(&task).await.expect("submit");
        self.store
            .work_items(handle.id)
            .await
            .into_iter()
            .next()
            .expect("work item")
    }

    async fn health(&self, credential: &Credential) -> CredentialHealth {
        self.store
            .credential(credential.id)
            .await
            .expect("credential")
            .health
    }

    async fn usage(&self, credential: &Credential) -> u64 {
        self.store
            .credential(credential.id)
            .await
            .expect("credential")
            .usage_count
    }
}

#[tokio::test]
async fn given_first_credential_banned_on_open_when_running_then_next_credential_succeeds() {
    let harness = Harness::new();
    let a = harness
        .credential("+10000000001", Step::connect_fault(Fault::Banned))
        .await;
    let b = harness.credential("+10000000002", Step::healthy()).await;
    let item = harness.work_item("https://t.me/news/7", 10).await;

    let outcome = harness.orchestrator.run(&item).await.expect("run");

    assert!(outcome.is_success());
    assert_eq!(harness.health(&a).await, CredentialHealth::Banned);
    assert!(!harness.blob_exists(&a));
    assert_eq!(harness.health(&b).await, CredentialHealth::Active);
    assert!(harness.blob_exists(&b));
    assert_eq!(
        harness.factory.connect_order().await,
        vec!["+10000000001".to_string(), "+10000000002".to_string()]
    );
}

#[tokio::test]
async fn given_usage_zero_and_five_when_running_then_fresh_credential_is_used() {
    let harness = Harness::new();
    let a = harness.credential("+10000000001", Step::healthy()).await;
    let b = harness.credential("+10000000002", Step::healthy()).await;
    harness.store.set_usage(a.id, 5).await;
    let item = harness.work_item("https://t.me/news/7", 10).await;

    let outcome = harness.orchestrator.run(&item).await.expect("run");

    assert!(outcome.is_success());
    assert_eq!(harness.factory.connect_order().await, vec![b.login.clone()]);
    assert_eq!(harness.usage(&b).await, 1);
    assert_eq!(harness.usage(&a).await, 5);
}

#[tokio::test]
async fn when_open_fails_transiently_then_usage_is_not_counted_and_credential_is_errored() {
    let harness = Harness::new();
    let a = harness
        .credential(
            "+10000000001",
            Step::connect_fault(Fault::NetworkError("timeout".to_string())),
        )
        .await;
    let b = harness.credential("+10000000002", Step::healthy()).await;
    let item = harness.work_item("https://t.me/news/7", 10).await;

    let outcome = harness.orchestrator.run(&item).await.expect("run");

    assert!(outcome.is_success());
    assert_eq!(harness.health(&a).await, CredentialHealth::Errored);
    assert_eq!(harness.usage(&a).await, 0);
    assert_eq!(harness.usage(&b).await, 1);
}

#[tokio::test]
async fn given_only_unhealthy_credentials_when_running_then_pool_is_exhausted_without_attempts() {
    let harness = Harness::new();
    let a = harness.credential("+10000000001", Step::healthy()).await;
    let b = harness.credential("+10000000002", Step::healthy()).await;
    harness.store.set_health(a.id, CredentialHealth::Banned).await;
    harness.store.set_health(b.id, CredentialHealth::Errored).await;
    let item = harness.work_item("https://t.me/news/7", 10).await;

    let outcome = harness.orchestrator.run(&item).await.expect("run");

    assert_eq!(outcome.failure_reason(), Some(FailureReason::ExhaustedPool));
    assert!(harness.factory.connect_order().await.is_empty());
}

#[tokio::test]
async fn when_content_is_restricted_then_work_item_fails_without_retry() {
    let harness = Harness::new();
    let a = harness
        .credential(
            "+10000000001",
            Step::healthy().fetch_fault(Fault::RestrictedContent("CHANNEL_PRIVATE".to_string())),
        )
        .await;
    harness.credential("+10000000002", Step::healthy()).await;
    let item = harness.work_item("https://t.me/closed/1", 10).await;

    let outcome = harness.orchestrator.run(&item).await.expect("run");

    assert_eq!(outcome.failure_reason(), Some(FailureReason::Restricted));
    assert_eq!(harness.factory.connect_order().await, vec![a.login.clone()]);
    assert_eq!(harness.health(&a).await, CredentialHealth::Active);
    assert_eq!(harness.usage(&a).await, 1);
}

#[tokio::test]
async fn given_n_failing_credentials_when_running_then_exactly_n_attempts_are_made() {
    let harness = Harness::new();
    let logins = ["+10000000001", "+10000000002", "+10000000003"];
    let mut credentials = Vec::new();
    for login in logins {
        credentials.push(
            harness
                .credential(
                    login,
                    Step::healthy().fetch_fault(Fault::NetworkError("reset".to_string())),
                )
                .await,
        );
    }
    let item = harness.work_item("https://t.me/news/7", 10).await;

    let outcome = harness.orchestrator.run(&item).await.expect("run");

    assert_eq!(harness.factory.connect_order().await.len(), logins.len());
    match outcome {
        WorkItemOutcome::Failure { reason, detail } => {
            assert_eq!(reason, FailureReason::ExhaustedPool);
            assert!(detail.contains("reset"));
        }
        WorkItemOutcome::Success { .. } => panic!("expected exhausted pool"),
    }
    for credential in &credentials {
        assert_eq!(harness.health(credential).await, CredentialHealth::Active);
        assert_eq!(harness.usage(credential).await, 1);
    }
}

#[tokio::test]
async fn when_locator_is_private_link_then_no_credential_is_consumed() {
    let harness = Harness::new();
    harness.credential("+10000000001", Step::healthy()).await;
    let item = harness.work_item("https://t.me/c/1234567/89", 10).await;

    let outcome = harness.orchestrator.run(&item).await.expect("run");

    assert_eq!(outcome.failure_reason(), Some(FailureReason::Restricted));
    assert!(harness.factory.connect_order().await.is_empty());
}

#[tokio::test]
async fn when_locator_cannot_be_parsed_then_work_item_is_not_found() {
    let harness = Harness::new();
    harness.credential("+10000000001", Step::healthy()).await;
    let item = harness.work_item("https://t.me/news/latest", 10).await;

    let outcome = harness.orchestrator.run(&item).await.expect("run");

    assert_eq!(outcome.failure_reason(), Some(FailureReason::NotFound));
    assert!(harness.factory.connect_order().await.is_empty());
}

#[tokio::test]
async fn when_identity_is_placeholder_then_credential_is_banned_but_blob_is_kept() {
    let harness = Harness::new();
    let a = harness
        .credential("+10000000001", Step::placeholder())
        .await;
    let item = harness.work_item("https://t.me/news/7", 10).await;

    let outcome = harness.orchestrator.run(&item).await.expect("run");

    assert_eq!(outcome.failure_reason(), Some(FailureReason::ExhaustedPool));
    assert_eq!(harness.health(&a).await, CredentialHealth::Banned);
    assert!(harness.blob_exists(&a));
}

#[tokio::test]
async fn when_banned_during_execute_then_credential_is_banned_and_next_one_succeeds() {
    let harness = Harness::new();
    let a = harness
        .credential("+10000000001", Step::healthy().fetch_fault(Fault::Banned))
        .await;
    let b = harness.credential("+10000000002", Step::healthy()).await;
    let item = harness.work_item("https://t.me/news/7", 10).await;

    let outcome = harness.orchestrator.run(&item).await.expect("run");

    assert!(outcome.is_success());
    assert_eq!(harness.health(&a).await, CredentialHealth::Banned);
    assert!(!harness.blob_exists(&a));
    assert_eq!(harness.usage(&a).await, 1);
    assert_eq!(harness.usage(&b).await, 1);
}

#[tokio::test]
async fn when_flood_wait_exceeds_ceiling_then_credential_is_errored_and_next_one_is_tried() {
    let harness = Harness::new();
    let a = harness
        .credential(
            "+10000000001",
            Step::healthy().fetch_fault(Fault::RateLimited {
                wait: Duration::from_secs(3_600),
            }),
        )
        .await;
    harness.credential("+10000000002", Step::healthy()).await;
    let item = harness.work_item("https://t.me/news/7", 10).await;

    let outcome = harness.orchestrator.run(&item).await.expect("run");

    assert!(outcome.is_success());
    assert_eq!(harness.health(&a).await, CredentialHealth::Errored);
}

#[tokio::test]
async fn when_replies_are_harvested_then_payload_carries_comments_and_tally() {
    let harness = Harness::new();
    harness
        .credential(
            "+10000000001",
            Step::healthy()
                .with_reactions(&[("👍", 4), ("😢", 1)])
                .with_replies(30),
        )
        .await;
    let item = harness.work_item("https://t.me/news/7", 10).await;

    let outcome = harness.orchestrator.run(&item).await.expect("run");

    match outcome {
        WorkItemOutcome::Success { content, reactions } => {
            assert_eq!(content["post"]["id"], 7);
            assert_eq!(content["comments"].as_array().map(Vec::len), Some(10));
            assert_eq!((reactions.positive, reactions.negative), (4, 1));
        }
        WorkItemOutcome::Failure { .. } => panic!("expected success"),
    }
}

#[tokio::test]
async fn when_replies_fail_after_open_then_session_is_still_closed() {
    let harness = Harness::new();
    harness
        .credential(
            "+10000000001",
            Step::healthy().replies_fault(Fault::NotFound("MSG_ID_INVALID".to_string())),
        )
        .await;
    let item = harness.work_item("https://t.me/news/7", 10).await;

    let outcome = harness.orchestrator.run(&item).await.expect("run");

    assert_eq!(outcome.failure_reason(), Some(FailureReason::NotFound));
    let calls = harness.factory.calls("+10000000001").await;
    assert_eq!(calls.connects, 1);
    assert_eq!(calls.disconnects, 1);
}

#[tokio::test]
async fn when_store_is_unreachable_then_run_returns_an_error() {
    let harness = Harness::new();
    harness.credential("+10000000001", Step::healthy()).await;
    let item = harness.work_item("https://t.me/news/7", 10).await;
    harness.store.set_unavailable(true).await;

    let result = harness.orchestrator.run(&item).await;

    assert!(result.is_err_and(|e| e.is_store_failure()));
    assert!(harness.store.active_credential_count().await.is_err());
}
