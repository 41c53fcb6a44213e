//! HTTP client for the session sidecar that owns the wire protocol.

use super::{ClientFactory, ClientFuture, Content, Fault, Identity, NetworkClient, Reply};
use crate::config::HarvestConfig;
use crate::error::{HarvestError, Result};
use crate::types::{Egress, SortOrder};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Pause between reply pages.
const PAGE_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct BridgeFactory {
    inner: reqwest::Client,
    base_url: String,
    api_id: i64,
    api_hash: String,
    page_size: u32,
    page_pause: Duration,
}

impl BridgeFactory {
    /// # Errors
    /// Returns `ConfigError` when API credentials are missing, or `HttpError`
    /// when the HTTP client cannot be built.
    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        let (api_id, api_hash) = config.require_api_credentials()?;
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            inner,
            base_url: config.bridge_url.trim_end_matches('/').to_string(),
            api_id,
            api_hash: api_hash.to_string(),
            page_size: config.reply_page_size,
            page_pause: PAGE_PAUSE,
        })
    }

    #[must_use]
    pub const fn with_page_pause(mut self, page_pause: Duration) -> Self {
        self.page_pause = page_pause;
        self
    }

    /// Checks the sidecar answers at all.
    ///
    /// # Errors
    /// Returns `BridgeError` when the health endpoint is unreachable or
    /// unhealthy.
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        debug!(url = %url, "Checking bridge health");
        let response = self.inner.get(&url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(HarvestError::BridgeError(format!(
                "HTTP {} from {url}",
                response.status()
            )))
        }
    }
}

impl ClientFactory for BridgeFactory {
    type Client = BridgeClient;

    fn create(&self) -> Self::Client {
        BridgeClient {
            inner: self.inner.clone(),
            base_url: self.base_url.clone(),
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            page_size: self.page_size,
            page_pause: self.page_pause,
            session_id: Mutex::new(None),
        }
    }
}

pub struct BridgeClient {
    inner: reqwest::Client,
    base_url: String,
    api_id: i64,
    api_hash: String,
    page_size: u32,
    page_pause: Duration,
    session_id: Mutex<Option<String>>,
}

#[derive(Debug, Serialize)]
struct ConnectRequest<'a> {
    session_path: String,
    api_id: i64,
    api_hash: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    id: i64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    is_user: bool,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct ReplyPage {
    #[serde(default)]
    replies: Vec<Reply>,
    #[serde(default)]
    next_offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BridgeErrorBody {
    error: String,
    #[serde(default)]
    seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageCursor {
    offset: Option<u64>,
    remaining: u32,
}

impl PageCursor {
    const fn first(limit: u32) -> Self {
        Self {
            offset: None,
            remaining: limit,
        }
    }

    /// Replies to request for this page.
    fn page_limit(self, page_size: u32) -> u32 {
        self.remaining.min(page_size.max(1))
    }

    /// Cursor for the following page, or `None` when the limit is reached,
    /// the page was empty, or the bridge reported no further offset.
    fn advance(self, fetched: u32, next_offset: Option<u64>) -> Option<Self> {
        let remaining = self.remaining.saturating_sub(fetched);
        next_offset
            .filter(|_| fetched > 0 && remaining > 0)
            .map(|offset| Self {
                offset: Some(offset),
                remaining,
            })
    }
}

/// Maps an RPC error name reported by the sidecar to a fault.
#[must_use]
pub fn fault_from_rpc_error(name: &str, seconds: Option<u64>) -> Fault {
    match name {
        "PHONE_NUMBER_BANNED" | "USER_DEACTIVATED_BAN" => Fault::Banned,
        "AUTH_KEY_UNREGISTERED" | "SESSION_REVOKED" | "AUTH_KEY_INVALID" => Fault::Unauthorized,
        "MSG_ID_INVALID" | "USERNAME_NOT_OCCUPIED" | "USERNAME_INVALID" | "CHANNEL_INVALID" => {
            Fault::NotFound(name.to_string())
        }
        "CHANNEL_PRIVATE" | "CHAT_FORBIDDEN" => Fault::RestrictedContent(name.to_string()),
        flood if flood.starts_with("FLOOD_WAIT") => {
            let from_name = flood
                .strip_prefix("FLOOD_WAIT_")
                .and_then(|secs| secs.parse::<u64>().ok());
            Fault::RateLimited {
                wait: Duration::from_secs(from_name.or(seconds).unwrap_or(0)),
            }
        }
        other => Fault::Unknown(other.to_string()),
    }
}

impl BridgeClient {
    async fn session_id(&self) -> std::result::Result<String, Fault> {
        self.session_id
            .lock()
            .await
            .clone()
            .ok_or_else(|| Fault::Unknown("bridge session is not connected".to_string()))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<T, Fault> {
        let response = request
            .send()
            .await
            .map_err(|e| Fault::NetworkError(e.to_string()))?;
        let status = response.status();

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| Fault::Unknown(format!("invalid bridge payload: {e}")));
        }

        let body = response.json::<BridgeErrorBody>().await.ok();
        Err(body.map_or_else(
            || Fault::Unknown(format!("bridge returned HTTP {status}")),
            |body| fault_from_rpc_error(&body.error, body.seconds),
        ))
    }

    async fn reply_page(
        &self,
        channel: &str,
        parent_id: i64,
        limit: u32,
        offset: Option<u64>,
        order: SortOrder,
    ) -> std::result::Result<ReplyPage, Fault> {
        let sid = self.session_id().await?;
        let url = format!(
            "{}/sessions/{sid}/channels/{channel}/messages/{parent_id}/replies",
            self.base_url
        );
        debug!(url = %url, limit, offset = ?offset, "GET reply page");

        let mut query = vec![
            ("limit", limit.to_string()),
            ("order", order.as_str().to_string()),
        ];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        self.send_json(self.inner.get(&url).query(&query)).await
    }
}

impl NetworkClient for BridgeClient {
    fn connect<'a>(
        &'a self,
        session_path: &'a Path,
        egress: Option<&'a Egress>,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{}/sessions/connect", self.base_url);
            debug!(url = %url, session = %session_path.display(), "POST connect");
            let body = ConnectRequest {
                session_path: session_path.to_string_lossy().into_owned(),
                api_id: self.api_id,
                api_hash: &self.api_hash,
                proxy: egress.map(Egress::proxy_url),
            };
            let connected: ConnectResponse =
                self.send_json(self.inner.post(&url).json(&body)).await?;
            *self.session_id.lock().await = Some(connected.session_id);
            Ok(())
        })
    }

    fn verify_identity(&self) -> ClientFuture<'_, Identity> {
        Box::pin(async move {
            let sid = self.session_id().await?;
            let url = format!("{}/sessions/{sid}/me", self.base_url);
            debug!(url = %url, "GET me");
            let me: MeResponse = self.send_json(self.inner.get(&url)).await?;
            if me.is_user && !me.deleted {
                Ok(Identity::GenuineUser {
                    id: me.id,
                    username: me.username,
                })
            } else {
                Ok(Identity::Placeholder)
            }
        })
    }

    fn fetch_content<'a>(
        &'a self,
        channel: &'a str,
        message_id: Option<i64>,
    ) -> ClientFuture<'a, Content> {
        Box::pin(async move {
            let sid = self.session_id().await?;
            let target = message_id.map_or_else(|| "latest".to_string(), |id| id.to_string());
            let url = format!(
                "{}/sessions/{sid}/channels/{channel}/messages/{target}",
                self.base_url
            );
            debug!(url = %url, "GET content");
            self.send_json(self.inner.get(&url)).await
        })
    }

    fn iterate_replies<'a>(
        &'a self,
        channel: &'a str,
        parent_id: i64,
        limit: u32,
        order: SortOrder,
    ) -> BoxStream<'a, std::result::Result<Reply, Fault>> {
        stream::try_unfold(Some(PageCursor::first(limit)), move |cursor| async move {
            let Some(cursor) = cursor.filter(|c| c.remaining > 0) else {
                return Ok(None);
            };
            if cursor.offset.is_some() {
                tokio::time::sleep(self.page_pause).await;
            }

            let mut page = self
                .reply_page(
                    channel,
                    parent_id,
                    cursor.page_limit(self.page_size),
                    cursor.offset,
                    order,
                )
                .await?;
            page.replies.truncate(usize::try_from(cursor.remaining).unwrap_or(usize::MAX));
            let fetched = u32::try_from(page.replies.len()).unwrap_or(u32::MAX);
            let next = cursor.advance(fetched, page.next_offset);
            Ok::<_, Fault>(Some((page.replies, next)))
        })
        .map_ok(|replies| stream::iter(replies.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let Some(sid) = self.session_id.lock().await.take() else {
                return;
            };
            let url = format!("{}/sessions/{sid}", self.base_url);
            debug!(url = %url, "DELETE session");
            if let Err(e) = self.inner.delete(&url).send().await {
                debug!(error = %e, "bridge disconnect failed, session left to expire");
            }
        })
    }
}
