//! Shared fixtures for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use crate::client::RenewalClient;
use crate::errors::RenewalError;
use crate::models::Principal;
use crate::session::{CredentialPair, Session};

/// Unsigned JWT whose payload carries the given `exp`
pub fn jwt_expiring_at(exp: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"1","exp":{}}}"#, exp.timestamp()));
    format!("{}.{}.signature", header, payload)
}

pub fn principal(username: &str) -> Principal {
    Principal {
        id: "1".to_string(),
        username: username.to_string(),
        role: Some("operator".to_string()),
        display_name: None,
        email: None,
    }
}

pub fn session(access: &str, refresh: &str) -> Session {
    Session {
        pair: CredentialPair::new(access.to_string(), refresh.to_string(), 1800),
        principal: principal("ops"),
    }
}

/// Renewal client with scripted failures and an optional release gate.
///
/// Successful call `n` (1-based, counting every call) yields access
/// `access-n` and refresh `refresh-n`, unless minting JWTs.
pub struct ScriptedRenewer {
    gate: Option<Semaphore>,
    failures: Mutex<VecDeque<RenewalError>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
    jwt_lifetime: Option<chrono::Duration>,
}

impl ScriptedRenewer {
    /// Answers as soon as it is called
    pub fn immediate() -> Self {
        Self {
            gate: None,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            jwt_lifetime: None,
        }
    }

    /// Blocks every call until [`release`](Self::release)
    pub fn held() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::immediate()
        }
    }

    /// Mint JWT access tokens valid for `lifetime` from the moment of renewal
    pub fn minting_jwts(mut self, lifetime: chrono::Duration) -> Self {
        self.jwt_lifetime = Some(lifetime);
        self
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1024);
        }
    }

    pub fn push_failure(&self, error: RenewalError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn token_for(&self, call: usize) -> String {
        format!("access-{}", call)
    }
}

#[async_trait::async_trait]
impl RenewalClient for ScriptedRenewer {
    async fn renew(&self, refresh_token: &str) -> Result<Session, RenewalError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().unwrap().push(refresh_token.to_string());

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }

        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let access = match self.jwt_lifetime {
            Some(lifetime) => jwt_expiring_at(Utc::now() + lifetime),
            None => self.token_for(call),
        };
        Ok(session(&access, &format!("refresh-{}", call)))
    }
}
