use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tokio::fs;
use zeroize::Zeroizing;

use crate::crypto::{self, EncryptedBlob};
use crate::errors::{Result, VgAuthError};
use crate::key_manager::{KdfParams, KeyManager};
use crate::secret::SecretProvider;
use crate::session::StoredCredentials;
use crate::store::TokenStore;

/// Encrypted, file-backed credential storage
///
/// One file per namespace (typically one per backend), so a console that
/// talks to several sites keeps their sessions apart.
///
/// # Directory Structure
/// ```text
/// ~/.config/vigil-console/credentials/
/// ├── meta.json              # Key derivation metadata
/// ├── lock                   # Advisory lock file
/// └── sessions/
///     └── <namespace>.json   # Encrypted StoredCredentials
/// ```
#[derive(Debug)]
pub struct FileTokenStore {
    namespace: String,
    session_path: PathBuf,
    lock_file: PathBuf,
    key_manager: KeyManager,
}

impl FileTokenStore {
    /// Open (or create) the store in `storage_dir` with default key derivation cost
    pub async fn new(
        storage_dir: impl AsRef<Path>,
        namespace: impl Into<String>,
        secret_provider: Arc<dyn SecretProvider>,
    ) -> Result<Self> {
        Self::with_kdf(storage_dir, namespace, secret_provider, KdfParams::default()).await
    }

    pub async fn with_kdf(
        storage_dir: impl AsRef<Path>,
        namespace: impl Into<String>,
        secret_provider: Arc<dyn SecretProvider>,
        kdf: KdfParams,
    ) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.is_empty()
            || !namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            || namespace.starts_with('.')
        {
            return Err(VgAuthError::InvalidResponse(format!(
                "Invalid store namespace: {:?}",
                namespace
            )));
        }

        let storage_dir = storage_dir.as_ref().to_path_buf();
        let sessions_dir = storage_dir.join("sessions");

        fs::create_dir_all(&sessions_dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&storage_dir, perms.clone())?;
            std::fs::set_permissions(&sessions_dir, perms)?;
        }

        let key_manager = KeyManager::new(&storage_dir, secret_provider, kdf).await?;

        Ok(Self {
            session_path: sessions_dir.join(format!("{}.json", namespace)),
            lock_file: storage_dir.join("lock"),
            namespace,
            key_manager,
        })
    }

    /// Default storage directory for the current platform
    pub fn default_storage_dir() -> Result<PathBuf> {
        let project_dirs = directories::ProjectDirs::from("com", "vigil", "vigil-console")
            .ok_or_else(|| {
                VgAuthError::InvalidResponse("Could not determine config directory".to_string())
            })?;

        Ok(project_dirs.config_dir().join("credentials"))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn acquire_lock(&self) -> Result<std::fs::File> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| VgAuthError::LockTimeout)?;

        Ok(lock_file)
    }

    async fn load_from_disk(&self) -> Result<Option<StoredCredentials>> {
        if !fs::try_exists(&self.session_path).await? {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.session_path).await?;
        let encrypted: EncryptedBlob = serde_json::from_str(&content)
            .map_err(|e| VgAuthError::InvalidResponse(format!("Invalid encrypted data: {}", e)))?;

        let plaintext = Zeroizing::new(crypto::decrypt(
            self.key_manager.key(),
            &encrypted,
            &self.namespace,
        )?);

        let credentials = serde_json::from_slice(&plaintext)
            .map_err(|e| VgAuthError::InvalidResponse(format!("Invalid session data: {}", e)))?;

        Ok(Some(credentials))
    }

    async fn save_to_disk(&self, credentials: &StoredCredentials) -> Result<()> {
        let plaintext = Zeroizing::new(serde_json::to_vec(credentials)?);
        let encrypted = crypto::encrypt(self.key_manager.key(), &plaintext, &self.namespace)?;
        let encrypted_json = serde_json::to_string_pretty(&encrypted)?;

        // Write to a temp file, sync, then rename over the old one
        let temp_path = self.session_path.with_extension("tmp");
        fs::write(&temp_path, encrypted_json).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        fs::File::open(&temp_path).await?.sync_all().await?;
        fs::rename(&temp_path, &self.session_path).await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Option<StoredCredentials> {
        match self.load_from_disk().await {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::error!("Failed to load credentials for {}: {}", self.namespace, e);
                None
            }
        }
    }

    async fn save(&self, credentials: &StoredCredentials) -> Result<()> {
        let _lock = self.acquire_lock()?;
        self.save_to_disk(credentials).await
    }

    async fn clear(&self) -> Result<()> {
        let _lock = self.acquire_lock()?;

        match fs::remove_file(&self.session_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Principal;
    use crate::secret::StaticSecretProvider;
    use crate::session::CredentialPair;
    use tempfile::TempDir;

    const FAST_KDF: KdfParams = KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    };

    async fn open(dir: &Path, namespace: &str, passphrase: &str) -> Result<FileTokenStore> {
        let secret_provider = Arc::new(StaticSecretProvider::new(passphrase));
        FileTokenStore::with_kdf(dir, namespace, secret_provider, FAST_KDF).await
    }

    fn credentials(principal: bool) -> StoredCredentials {
        StoredCredentials {
            pair: CredentialPair::new("access".to_string(), "refresh".to_string(), 1800),
            principal: principal.then(|| Principal {
                id: "42".to_string(),
                username: "operator".to_string(),
                role: Some("admin".to_string()),
                display_name: None,
                email: None,
            }),
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = open(temp.path(), "nvr-main", "test-passphrase").await.unwrap();

        let saved = credentials(true);
        store.save(&saved).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.principal.unwrap().username, "operator");
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store = open(temp.path(), "nvr-main", "pw").await.unwrap();
            store.save(&credentials(false)).await.unwrap();
        }

        let reopened = open(temp.path(), "nvr-main", "pw").await.unwrap();
        let loaded = reopened.load().await.unwrap();
        assert_eq!(loaded.pair.refresh_token, "refresh");
        assert!(loaded.principal.is_none());
    }

    #[tokio::test]
    async fn test_file_is_not_plaintext() {
        let temp = TempDir::new().unwrap();
        let store = open(temp.path(), "nvr-main", "pw").await.unwrap();
        store.save(&credentials(true)).await.unwrap();

        let raw = std::fs::read_to_string(temp.path().join("sessions/nvr-main.json")).unwrap();
        assert!(!raw.contains("refresh"));
        assert!(!raw.contains("operator"));
    }

    #[tokio::test]
    async fn test_clear() {
        let temp = TempDir::new().unwrap();
        let store = open(temp.path(), "nvr-main", "pw").await.unwrap();

        store.save(&credentials(true)).await.unwrap();
        assert!(store.load().await.is_some());

        store.clear().await.unwrap();
        assert!(store.load().await.is_none());

        // Clearing twice is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let temp = TempDir::new().unwrap();
        let site_a = open(temp.path(), "site-a", "pw").await.unwrap();
        let site_b = open(temp.path(), "site-b", "pw").await.unwrap();

        site_a.save(&credentials(true)).await.unwrap();
        assert!(site_b.load().await.is_none());

        // A file copied across namespaces does not decrypt
        std::fs::copy(
            temp.path().join("sessions/site-a.json"),
            temp.path().join("sessions/site-b.json"),
        )
        .unwrap();
        assert!(site_b.load().await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_as_empty() {
        let temp = TempDir::new().unwrap();
        let store = open(temp.path(), "nvr-main", "pw").await.unwrap();
        std::fs::write(temp.path().join("sessions/nvr-main.json"), "{not json").unwrap();
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_namespace() {
        let temp = TempDir::new().unwrap();
        for namespace in ["", "../escape", "a/b", ".hidden"] {
            assert!(open(temp.path(), namespace, "pw").await.is_err(), "{namespace:?}");
        }
    }
}
