use std::sync::{Arc, RwLock};

use crate::errors::{Result, VgAuthError};
use crate::session::StoredCredentials;

/// Durable storage for the credentials that must survive a restart
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the persisted credentials, if any
    async fn load(&self) -> Option<StoredCredentials>;

    /// Replace the persisted credentials
    async fn save(&self, credentials: &StoredCredentials) -> Result<()>;

    /// Forget the persisted credentials
    async fn clear(&self) -> Result<()>;
}

/// In-memory token store for testing and ephemeral sessions
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    credentials: Arc<RwLock<Option<StoredCredentials>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with credentials, as if left behind by a previous run
    pub fn with_credentials(credentials: StoredCredentials) -> Self {
        Self {
            credentials: Arc::new(RwLock::new(Some(credentials))),
        }
    }
}

#[async_trait::async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Option<StoredCredentials> {
        self.credentials.read().ok()?.clone()
    }

    async fn save(&self, credentials: &StoredCredentials) -> Result<()> {
        *self
            .credentials
            .write()
            .map_err(|_| VgAuthError::InvalidResponse("Lock poisoned".to_string()))? =
            Some(credentials.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.credentials
            .write()
            .map_err(|_| VgAuthError::InvalidResponse("Lock poisoned".to_string()))?
            .take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CredentialPair;

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_clear() {
        let store = MemoryTokenStore::new();
        assert!(store.load().await.is_none());

        let credentials = StoredCredentials {
            pair: CredentialPair::new("a".to_string(), "r".to_string(), 60),
            principal: None,
        };
        store.save(&credentials).await.unwrap();
        assert_eq!(store.load().await, Some(credentials));

        store.clear().await.unwrap();
        assert!(store.load().await.is_none());
    }
}
