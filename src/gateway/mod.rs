#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! The external network client and the session lifecycle built on top of it.
//!
//! `NetworkClient` is the only seam to the remote service. The production
//! implementation talks to a session sidecar over HTTP (`bridge`); tests drive
//! a deterministic `scripted` client.

pub mod bridge;
pub mod scripted;
mod session;

pub use bridge::{BridgeClient, BridgeFactory};
pub use scripted::{ScriptedClient, ScriptedFactory};
pub use session::{Capability, CapabilityResult, Session, SessionGateway, SessionVault};

use crate::types::{Egress, ReactionCount, SortOrder};
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Fault>> + Send + 'a>>;

/// Everything the remote side can raise. Faults are data for the classifier,
/// not crate errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("session is not authorized")]
    Unauthorized,

    #[error("rate limited for {}s", wait.as_secs())]
    RateLimited { wait: Duration },

    #[error("account is banned")]
    Banned,

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("restricted content: {0}")]
    RestrictedContent(String),

    #[error("unknown fault: {0}")]
    Unknown(String),
}

impl Fault {
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::RateLimited { .. } => "rate-limited",
            Self::Banned => "banned",
            Self::NetworkError(_) => "network-error",
            Self::NotFound(_) => "not-found",
            Self::RestrictedContent(_) => "restricted-content",
            Self::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    GenuineUser { id: i64, username: Option<String> },
    /// Deleted, deactivated or non-user identity behind the session.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub id: i64,
    pub channel: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub views: Option<u64>,
    #[serde(default)]
    pub reactions: Vec<ReactionCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyAuthor {
    pub tg_id: Option<i64>,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: i64,
    #[serde(default)]
    pub author: ReplyAuthor,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub reactions: Vec<ReactionCount>,
}

/// One live connection to the remote service for one credential.
pub trait NetworkClient: Send + Sync {
    fn connect<'a>(
        &'a self,
        session_path: &'a Path,
        egress: Option<&'a Egress>,
    ) -> ClientFuture<'a, ()>;

    fn verify_identity(&self) -> ClientFuture<'_, Identity>;

    /// `message_id = None` fetches the most recent post.
    fn fetch_content<'a>(
        &'a self,
        channel: &'a str,
        message_id: Option<i64>,
    ) -> ClientFuture<'a, Content>;

    /// Lazy, finite. Pages are pulled from the remote side as the stream is
    /// polled.
    fn iterate_replies<'a>(
        &'a self,
        channel: &'a str,
        parent_id: i64,
        limit: u32,
        order: SortOrder,
    ) -> BoxStream<'a, Result<Reply, Fault>>;

    /// Idempotent and infallible.
    fn disconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

pub trait ClientFactory: Send + Sync {
    type Client: NetworkClient;

    fn create(&self) -> Self::Client;
}
