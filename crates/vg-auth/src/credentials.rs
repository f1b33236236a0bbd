//! Process-wide credential state.
//!
//! Reads are synchronous so every outgoing request can attach the current
//! access token without waiting. Writes replace the whole session at once and
//! are then mirrored to the durable [`TokenStore`]. Disk writes are serialized
//! and skipped once memory has moved on, so a late write never resurrects a
//! session that was already cleared.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error};

use crate::models::Principal;
use crate::session::{CredentialPair, Session, StoredCredentials};
use crate::store::TokenStore;

#[derive(Debug, Default)]
struct Slot {
    pair: Option<CredentialPair>,
    principal: Option<Principal>,
}

/// Shared holder of the current credential pair and principal
#[derive(Clone)]
pub struct CredentialStore {
    slot: Arc<RwLock<Slot>>,
    persistence: Arc<dyn TokenStore>,
    disk: Arc<tokio::sync::Mutex<()>>,
}

impl CredentialStore {
    pub fn new(persistence: Arc<dyn TokenStore>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Slot::default())),
            persistence,
            disk: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// The complete session, or None unless both pair and principal are held
    pub fn session(&self) -> Option<Session> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        match (&slot.pair, &slot.principal) {
            (Some(pair), Some(principal)) => Some(Session {
                pair: pair.clone(),
                principal: principal.clone(),
            }),
            _ => None,
        }
    }

    pub fn principal(&self) -> Option<Principal> {
        self.session().map(|s| s.principal)
    }

    pub fn access_token(&self) -> Option<String> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        slot.pair.as_ref().map(|p| p.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        slot.pair.as_ref().map(|p| p.refresh_token.clone())
    }

    pub fn has_credentials(&self) -> bool {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        slot.pair.is_some()
    }

    /// Read the persisted credentials left by a previous run
    pub async fn load_persisted(&self) -> Option<StoredCredentials> {
        self.persistence.load().await
    }

    /// Hold a restored pair whose principal still has to be fetched.
    ///
    /// [`session`](Self::session) keeps returning None until a renewal
    /// supplies the principal.
    pub fn restore_pair(&self, pair: CredentialPair) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.pair = Some(pair);
        slot.principal = None;
    }

    /// Install a restored session without writing it back to disk
    pub fn restore(&self, session: Session) {
        self.swap(Some(session));
    }

    /// Replace pair and principal together, then persist.
    ///
    /// The in-memory swap always happens; a persistence failure is logged and
    /// returned for the caller to report.
    pub async fn replace(&self, session: Session) -> crate::errors::Result<()> {
        let stored = StoredCredentials::from(&session);
        self.swap(Some(session));
        debug!("Credential pair replaced");
        self.persist(&stored).await
    }

    /// Install a renewed session, but only if the pair it was renewed from is
    /// still the current one.
    ///
    /// Returns false when a logout or login replaced the pair while the
    /// renewal was out; the renewed session is then discarded.
    pub async fn adopt_renewal(&self, renewed_from: &str, session: Session) -> bool {
        let stored = StoredCredentials::from(&session);
        {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            let current = slot.pair.as_ref().map(|p| p.refresh_token.as_str());
            if current != Some(renewed_from) {
                debug!("Discarding renewal for a superseded pair");
                return false;
            }
            slot.pair = Some(session.pair);
            slot.principal = Some(session.principal);
        }
        debug!("Credential pair renewed");

        // A failed disk write leaves the renewed session usable in memory.
        let _ = self.persist(&stored).await;
        true
    }

    /// Drop the in-memory credentials only
    pub fn clear_memory(&self) {
        self.swap(None);
    }

    /// Forget everything, in memory and on disk
    pub async fn clear(&self) -> crate::errors::Result<()> {
        self.clear_memory();
        debug!("Credentials cleared");
        self.clear_persisted().await
    }

    /// Remove the persisted credentials, unless a newer session is already in
    /// memory and owns the file.
    pub async fn clear_persisted(&self) -> crate::errors::Result<()> {
        let _disk = self.disk.lock().await;
        if self.has_credentials() {
            debug!("Skipping clear, a newer session is in memory");
            return Ok(());
        }

        self.persistence.clear().await.inspect_err(|e| {
            error!("Failed to clear persisted credentials: {}", e);
        })
    }

    async fn persist(&self, stored: &StoredCredentials) -> crate::errors::Result<()> {
        let _disk = self.disk.lock().await;
        if self.refresh_token().as_deref() != Some(stored.pair.refresh_token.as_str()) {
            debug!("Skipping write of superseded credentials");
            return Ok(());
        }

        self.persistence.save(stored).await.inspect_err(|e| {
            error!("Failed to persist credentials: {}", e);
        })
    }

    fn swap(&self, session: Option<Session>) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        match session {
            Some(Session { pair, principal }) => {
                slot.pair = Some(pair);
                slot.principal = Some(principal);
            }
            None => {
                slot.pair = None;
                slot.principal = None;
            }
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("has_credentials", &self.has_credentials())
            .finish_non_exhaustive()
    }
}
