#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::types::{CredentialId, EgressId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialHealth {
    Active,
    Banned,
    Errored,
}

impl CredentialHealth {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Banned => "banned",
            Self::Errored => "error",
        }
    }

    #[must_use]
    pub const fn is_selectable(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Transitions the core may perform on its own. Leaving `Banned` takes an
    /// administrative reset, which does not go through this check.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Banned, Self::Active | Self::Errored) => false,
            (Self::Active | Self::Errored | Self::Banned, _) => true,
        }
    }
}

impl TryFrom<&str> for CredentialHealth {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "active" => Ok(Self::Active),
            "banned" => Ok(Self::Banned),
            "error" | "errored" => Ok(Self::Errored),
            _ => Err(format!("Unknown credential health: {s}")),
        }
    }
}

impl fmt::Display for CredentialHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub login: String,
    pub health: CredentialHealth,
    pub usage_count: u64,
    pub egress_id: Option<EgressId>,
    pub registered_at: DateTime<Utc>,
}

impl Credential {
    /// File name of the opaque session-state blob kept for this login.
    #[must_use]
    pub fn session_file_name(&self) -> String {
        format!("{}.session", self.login)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EgressKind {
    Http,
    Socks4,
    Socks5,
}

impl EgressKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
        }
    }
}

impl TryFrom<&str> for EgressKind {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(Self::Http),
            "socks4" => Ok(Self::Socks4),
            "socks5" => Ok(Self::Socks5),
            _ => Err(format!("Unknown egress kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Egress {
    pub id: EgressId,
    pub kind: EgressKind,
    pub address: String,
    pub port: u16,
    pub username: Option<String>,
    pub secret: Option<String>,
}

impl Egress {
    /// Proxy URL handed to the network client. Auth is only embedded when both
    /// halves are present.
    #[must_use]
    pub fn proxy_url(&self) -> String {
        match (&self.username, &self.secret) {
            (Some(user), Some(secret)) => format!(
                "{}://{user}:{secret}@{}:{}",
                self.kind.as_str(),
                self.address,
                self.port
            ),
            _ => format!("{}://{}:{}", self.kind.as_str(), self.address, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CredentialHealth, Egress, EgressKind};
    use crate::types::EgressId;

    fn egress(username: Option<&str>, secret: Option<&str>) -> Egress {
        Egress {
            id: EgressId::new(1),
            kind: EgressKind::Socks5,
            address: "10.0.0.7".to_string(),
            port: 1080,
            username: username.map(str::to_string),
            secret: secret.map(str::to_string),
        }
    }

    #[test]
    fn when_credential_is_banned_then_core_cannot_reactivate_it() {
        assert!(!CredentialHealth::Banned.can_transition_to(CredentialHealth::Active));
        assert!(!CredentialHealth::Banned.can_transition_to(CredentialHealth::Errored));
        assert!(CredentialHealth::Errored.can_transition_to(CredentialHealth::Active));
        assert!(CredentialHealth::Active.can_transition_to(CredentialHealth::Banned));
    }

    #[test]
    fn only_active_credentials_are_selectable() {
        assert!(CredentialHealth::Active.is_selectable());
        assert!(!CredentialHealth::Banned.is_selectable());
        assert!(!CredentialHealth::Errored.is_selectable());
    }

    #[test]
    fn health_round_trips_through_storage_strings() {
        for health in [
            CredentialHealth::Active,
            CredentialHealth::Banned,
            CredentialHealth::Errored,
        ] {
            assert_eq!(CredentialHealth::try_from(health.as_str()), Ok(health));
        }
    }

    #[test]
    fn proxy_url_embeds_auth_only_when_complete() {
        assert_eq!(
            egress(Some("u"), Some("p")).proxy_url(),
            "socks5://u:p@10.0.0.7:1080"
        );
        assert_eq!(egress(Some("u"), None).proxy_url(), "socks5://10.0.0.7:1080");
    }

    #[test]
    fn egress_kind_accepts_https_alias() {
        assert_eq!(EgressKind::try_from("HTTPS"), Ok(EgressKind::Http));
        assert!(EgressKind::try_from("quic").is_err());
    }
}
