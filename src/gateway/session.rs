use super::{ClientFactory, Content, Fault, Identity, NetworkClient, Reply};
use crate::error::{HarvestError, Result};
use crate::types::{Credential, Egress, SortOrder};
use futures_util::{StreamExt, TryStreamExt};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    FetchContent {
        channel: String,
        message_id: Option<i64>,
    },
    IterateReplies {
        channel: String,
        parent_id: i64,
        limit: u32,
        order: SortOrder,
    },
}

impl Capability {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FetchContent { .. } => "fetch-content",
            Self::IterateReplies { .. } => "iterate-replies",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityResult {
    Content(Content),
    Replies(Vec<Reply>),
}

/// Persisted session-state blobs, one file per credential login.
#[derive(Debug, Clone)]
pub struct SessionVault {
    sessions_dir: PathBuf,
}

impl SessionVault {
    #[must_use]
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    #[must_use]
    pub fn session_path(&self, credential: &Credential) -> PathBuf {
        self.sessions_dir.join(credential.session_file_name())
    }

    /// Removes the blob of a banned credential. A missing file is not an error.
    ///
    /// # Errors
    /// Returns `IoError` when the file exists but cannot be removed.
    pub async fn purge(&self, credential: &Credential) -> Result<bool> {
        let path = self.session_path(credential);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(login = %credential.login, path = %path.display(), "purged session blob");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(HarvestError::IoError(e)),
        }
    }
}

/// An opened, identity-checked connection. Must be handed back to
/// `SessionGateway::close`.
pub struct Session<C> {
    client: C,
    login: String,
    closed: bool,
}

impl<C> Session<C> {
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

pub struct SessionGateway<F> {
    factory: F,
    vault: SessionVault,
    flood_wait_ceiling: Duration,
}

impl<F> SessionGateway<F>
where
    F: ClientFactory,
{
    #[must_use]
    pub const fn new(factory: F, vault: SessionVault, flood_wait_ceiling: Duration) -> Self {
        Self {
            factory,
            vault,
            flood_wait_ceiling,
        }
    }

    #[must_use]
    pub const fn vault(&self) -> &SessionVault {
        &self.vault
    }

    /// Connects with the credential's session blob and egress, then checks the
    /// identity behind it. The client is disconnected on every failure path.
    ///
    /// # Errors
    /// Returns the connect fault unchanged, or `Fault::Unauthorized` when the
    /// identity is a placeholder.
    pub async fn open(
        &self,
        credential: &Credential,
        egress: Option<&Egress>,
    ) -> std::result::Result<Session<F::Client>, Fault> {
        let client = self.factory.create();
        let session_path = self.vault.session_path(credential);

        if let Err(fault) = client.connect(&session_path, egress).await {
            client.disconnect().await;
            return Err(fault);
        }

        match client.verify_identity().await {
            Ok(Identity::GenuineUser { id, .. }) => {
                debug!(login = %credential.login, user_id = id, "session opened");
                Ok(Session {
                    client,
                    login: credential.login.clone(),
                    closed: false,
                })
            }
            Ok(Identity::Placeholder) => {
                client.disconnect().await;
                warn!(login = %credential.login, "session identity is a placeholder");
                Err(Fault::Unauthorized)
            }
            Err(fault) => {
                client.disconnect().await;
                Err(fault)
            }
        }
    }

    /// Runs one capability call. A flood wait within the ceiling is slept off
    /// and the call re-issued once; every other fault is returned as raised.
    ///
    /// # Errors
    /// Returns the fault raised by the client.
    pub async fn execute(
        &self,
        session: &Session<F::Client>,
        capability: &Capability,
    ) -> std::result::Result<CapabilityResult, Fault> {
        match call(&session.client, capability).await {
            Err(Fault::RateLimited { wait }) if wait <= self.flood_wait_ceiling => {
                warn!(
                    login = %session.login,
                    capability = capability.name(),
                    wait_secs = wait.as_secs(),
                    "flood wait within ceiling, sleeping before re-issue"
                );
                tokio::time::sleep(wait).await;
                call(&session.client, capability).await
            }
            other => other,
        }
    }

    pub async fn close(&self, session: &mut Session<F::Client>) {
        if session.closed {
            return;
        }
        session.client.disconnect().await;
        session.closed = true;
        debug!(login = %session.login, "session closed");
    }
}

async fn call<C>(client: &C, capability: &Capability) -> std::result::Result<CapabilityResult, Fault>
where
    C: NetworkClient,
{
    match capability {
        Capability::FetchContent {
            channel,
            message_id,
        } => client
            .fetch_content(channel, *message_id)
            .await
            .map(CapabilityResult::Content),
        Capability::IterateReplies {
            channel,
            parent_id,
            limit,
            order,
        } => client
            .iterate_replies(channel, *parent_id, *limit, *order)
            .take(usize::try_from(*limit).unwrap_or(usize::MAX))
            .try_collect::<Vec<_>>()
            .await
            .map(CapabilityResult::Replies),
    }
}

#[cfg(test)]
mod tests {
    use super::{Capability, CapabilityResult, SessionGateway, SessionVault};
    use crate::gateway::scripted::{ScriptedFactory, Step};
    use crate::gateway::Fault;
    use crate::types::{Credential, CredentialHealth, CredentialId, SortOrder};
    use chrono::Utc;
    use std::time::Duration;

    fn credential(login: &str) -> Credential {
        Credential {
            id: CredentialId::new(1),
            login: login.to_string(),
            health: CredentialHealth::Active,
            usage_count: 0,
            egress_id: None,
            registered_at: Utc::now(),
        }
    }

    fn gateway(factory: ScriptedFactory, ceiling: Duration) -> SessionGateway<ScriptedFactory> {
        SessionGateway::new(factory, SessionVault::new("sessions"), ceiling)
    }

    #[tokio::test]
    async fn when_identity_is_placeholder_then_open_fails_unauthorized_and_disconnects() {
        let factory = ScriptedFactory::new();
        factory.script("+1", Step::placeholder()).await;
        let gateway = gateway(factory.clone(), Duration::ZERO);

        let opened = gateway.open(&credential("+1"), None).await;

        assert!(matches!(opened, Err(Fault::Unauthorized)));
        assert_eq!(factory.disconnects("+1").await, 1);
    }

    #[tokio::test]
    async fn when_flood_wait_is_within_ceiling_then_call_is_reissued_once() {
        let factory = ScriptedFactory::new();
        factory
            .script(
                "+1",
                Step::healthy()
                    .fetch_fault(Fault::RateLimited {
                        wait: Duration::from_millis(5),
                    })
                    .then_fetch_ok("news", 7),
            )
            .await;
        let gateway = gateway(factory.clone(), Duration::from_secs(1));
        let capability = Capability::FetchContent {
            channel: "news".to_string(),
            message_id: Some(7),
        };

        let result = match gateway.open(&credential("+1"), None).await {
            Ok(mut session) => {
                let result = gateway.execute(&session, &capability).await;
                gateway.close(&mut session).await;
                gateway.close(&mut session).await;
                result
            }
            Err(fault) => Err(fault),
        };

        assert!(matches!(result, Ok(CapabilityResult::Content(ref c)) if c.id == 7));
        assert_eq!(factory.fetch_calls("+1").await, 2);
        assert_eq!(factory.disconnects("+1").await, 1);
    }

    #[tokio::test]
    async fn when_flood_wait_exceeds_ceiling_then_fault_is_surfaced_without_retry() {
        let factory = ScriptedFactory::new();
        factory
            .script(
                "+1",
                Step::healthy().fetch_fault(Fault::RateLimited {
                    wait: Duration::from_secs(600),
                }),
            )
            .await;
        let gateway = gateway(factory.clone(), Duration::from_secs(60));
        let capability = Capability::FetchContent {
            channel: "news".to_string(),
            message_id: None,
        };

        let result = match gateway.open(&credential("+1"), None).await {
            Ok(session) => gateway.execute(&session, &capability).await,
            Err(fault) => Err(fault),
        };

        assert!(matches!(result, Err(Fault::RateLimited { .. })));
        assert_eq!(factory.fetch_calls("+1").await, 1);
    }

    #[tokio::test]
    async fn when_replies_exceed_limit_then_collection_stops_at_limit() {
        let factory = ScriptedFactory::new();
        factory
            .script("+1", Step::healthy().with_replies(12))
            .await;
        let gateway = gateway(factory, Duration::ZERO);
        let capability = Capability::IterateReplies {
            channel: "news".to_string(),
            parent_id: 7,
            limit: 5,
            order: SortOrder::Asc,
        };

        let result = match gateway.open(&credential("+1"), None).await {
            Ok(session) => gateway.execute(&session, &capability).await,
            Err(fault) => Err(fault),
        };

        assert!(matches!(result, Ok(CapabilityResult::Replies(ref r)) if r.len() == 5));
    }

    #[tokio::test]
    async fn when_banned_blob_is_purged_then_second_purge_removes_nothing() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let vault = SessionVault::new(dir.path());
        let banned = credential("+79990001122");
        let path = vault.session_path(&banned);
        std::fs::write(&path, b"blob").unwrap_or_else(|e| unreachable!("write: {e}"));

        assert!(matches!(vault.purge(&banned).await, Ok(true)));
        assert!(!path.exists());
        assert!(matches!(vault.purge(&banned).await, Ok(false)));
    }
}
