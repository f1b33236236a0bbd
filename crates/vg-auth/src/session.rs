use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Principal;

/// Access and refresh credentials, always replaced together
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_seconds: u64,
    pub issued_at: DateTime<Utc>,
}

impl CredentialPair {
    pub fn new(access_token: String, refresh_token: String, expires_in_seconds: u64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_in_seconds,
            issued_at: Utc::now(),
        }
    }

    /// Expiry according to the grant's `expiresIn`, independent of the token body.
    ///
    /// Saturates at the latest representable instant.
    pub fn nominal_expiry(&self) -> DateTime<Utc> {
        let seconds = i64::try_from(self.expires_in_seconds).unwrap_or(i64::MAX);
        TimeDelta::try_seconds(seconds)
            .and_then(|lifetime| self.issued_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in_seconds", &self.expires_in_seconds)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// An authenticated session: a principal is only ever held next to its credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub pair: CredentialPair,
    pub principal: Principal,
}

impl Session {
    pub fn access_token(&self) -> &str {
        &self.pair.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.pair.refresh_token
    }
}

/// What survives a restart. The principal may be missing on disk, in which
/// case initialization has to renew before the session can be exposed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredCredentials {
    pub pair: CredentialPair,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
}

impl From<&Session> for StoredCredentials {
    fn from(session: &Session) -> Self {
        Self {
            pair: session.pair.clone(),
            principal: Some(session.principal.clone()),
        }
    }
}

/// Lifecycle of the session façade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Authenticated,
    Unauthenticated,
    /// Torn down; no further transitions
    Closed,
}

impl SessionState {
    /// Whether consumers may act on this state yet
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::Uninitialized | Self::Initializing)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Authenticated => "authenticated",
            Self::Unauthenticated => "unauthenticated",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}
