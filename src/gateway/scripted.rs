//! Deterministic `NetworkClient` driven by per-login scripts. Used by tests
//! and by `harvester worker --dry-run`.

use super::{ClientFactory, ClientFuture, Content, Fault, Identity, NetworkClient, Reply, ReplyAuthor};
use crate::types::{Egress, ReactionCount, SortOrder};
use chrono::{TimeZone, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

const LATEST_MESSAGE_ID: i64 = 100;

/// Behaviour of every session opened for one login.
#[derive(Debug, Clone)]
pub struct Step {
    connect: Result<(), Fault>,
    identity: Result<Identity, Fault>,
    fetches: VecDeque<Result<Content, Fault>>,
    replies: usize,
    replies_fault: Option<Fault>,
    reactions: Vec<ReactionCount>,
}

impl Default for Step {
    fn default() -> Self {
        Self::healthy()
    }
}

impl Step {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            connect: Ok(()),
            identity: Ok(Identity::GenuineUser {
                id: 1,
                username: None,
            }),
            fetches: VecDeque::new(),
            replies: 0,
            replies_fault: None,
            reactions: Vec::new(),
        }
    }

    #[must_use]
    pub fn placeholder() -> Self {
        Self {
            identity: Ok(Identity::Placeholder),
            ..Self::healthy()
        }
    }

    #[must_use]
    pub fn connect_fault(fault: Fault) -> Self {
        Self {
            connect: Err(fault),
            ..Self::healthy()
        }
    }

    #[must_use]
    pub fn fetch_fault(mut self, fault: Fault) -> Self {
        self.fetches.push_back(Err(fault));
        self
    }

    #[must_use]
    pub fn then_fetch_ok(mut self, channel: &str, message_id: i64) -> Self {
        let content = default_content(channel, Some(message_id), &self.reactions);
        self.fetches.push_back(Ok(content));
        self
    }

    #[must_use]
    pub const fn with_replies(mut self, count: usize) -> Self {
        self.replies = count;
        self
    }

    #[must_use]
    pub fn replies_fault(mut self, fault: Fault) -> Self {
        self.replies_fault = Some(fault);
        self
    }

    #[must_use]
    pub fn with_reactions(mut self, reactions: &[(&str, u64)]) -> Self {
        self.reactions = reactions
            .iter()
            .map(|(emoji, count)| ReactionCount {
                emoji: (*emoji).to_string(),
                count: *count,
            })
            .collect();
        self
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub connects: u32,
    pub fetches: u32,
    pub reply_pulls: u32,
    pub disconnects: u32,
}

#[derive(Debug, Default)]
struct ScriptState {
    steps: HashMap<String, Step>,
    calls: HashMap<String, CallCounts>,
    connect_order: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedFactory {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, login: &str, step: Step) {
        self.state
            .lock()
            .await
            .steps
            .insert(login.to_string(), step);
    }

    pub async fn calls(&self, login: &str) -> CallCounts {
        self.state
            .lock()
            .await
            .calls
            .get(login)
            .copied()
            .unwrap_or_default()
    }

    pub async fn fetch_calls(&self, login: &str) -> u32 {
        self.calls(login).await.fetches
    }

    pub async fn disconnects(&self, login: &str) -> u32 {
        self.calls(login).await.disconnects
    }

    /// Logins in the order sessions were attempted.
    pub async fn connect_order(&self) -> Vec<String> {
        self.state.lock().await.connect_order.clone()
    }
}

impl ClientFactory for ScriptedFactory {
    type Client = ScriptedClient;

    fn create(&self) -> Self::Client {
        ScriptedClient {
            state: Arc::clone(&self.state),
            login: Arc::new(Mutex::new(None)),
        }
    }
}

pub struct ScriptedClient {
    state: Arc<Mutex<ScriptState>>,
    login: Arc<Mutex<Option<String>>>,
}

impl ScriptedClient {
    async fn current_login(&self) -> String {
        self.login.lock().await.clone().unwrap_or_default()
    }

    async fn reply_batch(&self, channel: &str, parent_id: i64, order: SortOrder) -> Vec<Result<Reply, Fault>> {
        let login = self.current_login().await;
        let mut state = self.state.lock().await;
        state.calls.entry(login.clone()).or_default().reply_pulls += 1;
        let step = state.steps.get(&login).cloned().unwrap_or_default();

        if let Some(fault) = step.replies_fault {
            return vec![Err(fault)];
        }

        let mut replies: Vec<Result<Reply, Fault>> = (1..=step.replies)
            .map(|n| {
                let n = i64::try_from(n).unwrap_or(i64::MAX);
                Ok(Reply {
                    id: parent_id.saturating_mul(1_000).saturating_add(n),
                    author: ReplyAuthor {
                        tg_id: Some(n),
                        name: Some(format!("{channel}_reader{n}")),
                        first_name: Some(format!("Reader {n}")),
                        last_name: None,
                        phone: None,
                    },
                    date: fixed_date(),
                    text: format!("reply {n}"),
                    reactions: Vec::new(),
                })
            })
            .collect();
        if order == SortOrder::Desc {
            replies.reverse();
        }
        replies
    }
}

impl NetworkClient for ScriptedClient {
    fn connect<'a>(
        &'a self,
        session_path: &'a Path,
        _egress: Option<&'a Egress>,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let login = session_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            *self.login.lock().await = Some(login.clone());

            let mut state = self.state.lock().await;
            state.connect_order.push(login.clone());
            state.calls.entry(login.clone()).or_default().connects += 1;
            state
                .steps
                .get(&login)
                .map_or(Ok(()), |step| step.connect.clone())
        })
    }

    fn verify_identity(&self) -> ClientFuture<'_, Identity> {
        Box::pin(async move {
            let login = self.current_login().await;
            let state = self.state.lock().await;
            state
                .steps
                .get(&login)
                .map_or(Ok(Identity::GenuineUser { id: 1, username: None }), |step| {
                    step.identity.clone()
                })
        })
    }

    fn fetch_content<'a>(
        &'a self,
        channel: &'a str,
        message_id: Option<i64>,
    ) -> ClientFuture<'a, Content> {
        Box::pin(async move {
            let login = self.current_login().await;
            let mut state = self.state.lock().await;
            state.calls.entry(login.clone()).or_default().fetches += 1;
            let step = state.steps.entry(login).or_default();
            step.fetches.pop_front().unwrap_or_else(|| {
                Ok(default_content(channel, message_id, &step.reactions))
            })
        })
    }

    fn iterate_replies<'a>(
        &'a self,
        channel: &'a str,
        parent_id: i64,
        _limit: u32,
        order: SortOrder,
    ) -> BoxStream<'a, Result<Reply, Fault>> {
        stream::once(self.reply_batch(channel, parent_id, order))
            .flat_map(stream::iter)
            .boxed()
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let login = self.current_login().await;
            self.state
                .lock()
                .await
                .calls
                .entry(login)
                .or_default()
                .disconnects += 1;
        })
    }
}

fn fixed_date() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

fn default_content(channel: &str, message_id: Option<i64>, reactions: &[ReactionCount]) -> Content {
    Content {
        id: message_id.unwrap_or(LATEST_MESSAGE_ID),
        channel: channel.to_string(),
        date: fixed_date(),
        text: format!("post in {channel}"),
        views: Some(1_000),
        reactions: reactions.to_vec(),
    }
}
