use std::path::Path;
use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tokio::fs;
use zeroize::Zeroizing;

use crate::crypto::{self, EncryptionKey};
use crate::errors::{Result, VgAuthError};
use crate::secret::SecretProvider;

const SALT_LEN: usize = 32;

#[cfg(feature = "keyring-support")]
const KEYRING_SERVICE: &str = "vigil-console";
#[cfg(feature = "keyring-support")]
const KEYRING_USER: &str = "vg-auth:v1";

/// Argon2id cost parameters for passphrase-derived keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Key derivation metadata, stored next to the credential files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMeta {
    pub version: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Base64 salt for Argon2id, present once a passphrase has been used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase_salt: Option<String>,
    #[serde(default)]
    pub kdf: KdfParams,
}

impl KeyMeta {
    fn new(kdf: KdfParams) -> Self {
        Self {
            version: 1,
            created_at: chrono::Utc::now(),
            passphrase_salt: None,
            kdf,
        }
    }
}

/// Resolves the file encryption key: OS keyring first, passphrase second
pub struct KeyManager {
    meta: KeyMeta,
    key: EncryptionKey,
}

impl KeyManager {
    /// Load or create the key for `storage_dir`.
    ///
    /// `kdf` only applies when no metadata exists yet; an existing store keeps
    /// the parameters its salt was created with.
    pub async fn new(
        storage_dir: &Path,
        secret_provider: Arc<dyn SecretProvider>,
        kdf: KdfParams,
    ) -> Result<Self> {
        let meta_path = storage_dir.join("meta.json");

        let mut meta = if fs::try_exists(&meta_path).await? {
            let content = fs::read_to_string(&meta_path).await?;
            serde_json::from_str(&content)
                .map_err(|e| VgAuthError::InvalidResponse(format!("Invalid meta.json: {}", e)))?
        } else {
            KeyMeta::new(kdf)
        };

        let key = Self::resolve_key(&mut meta, &secret_provider).await?;

        let meta_json = serde_json::to_string_pretty(&meta)?;
        fs::write(&meta_path, meta_json).await?;

        Ok(Self { meta, key })
    }

    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    pub fn meta(&self) -> &KeyMeta {
        &self.meta
    }

    #[cfg(feature = "keyring-support")]
    async fn resolve_key(
        meta: &mut KeyMeta,
        secret_provider: &Arc<dyn SecretProvider>,
    ) -> Result<EncryptionKey> {
        match Self::load_from_keyring() {
            Ok(key) => {
                tracing::debug!("Loaded credential file key from OS keyring");
                Ok(key)
            }
            Err(e) => {
                tracing::debug!("Keyring unavailable ({}), deriving key from passphrase", e);
                let key = Self::derive_from_passphrase(meta, secret_provider).await?;
                if let Err(e) = Self::save_to_keyring(&key) {
                    tracing::warn!("Failed to save key to keyring: {}", e);
                }
                Ok(key)
            }
        }
    }

    #[cfg(not(feature = "keyring-support"))]
    async fn resolve_key(
        meta: &mut KeyMeta,
        secret_provider: &Arc<dyn SecretProvider>,
    ) -> Result<EncryptionKey> {
        Self::derive_from_passphrase(meta, secret_provider).await
    }

    #[cfg(feature = "keyring-support")]
    fn keyring_entry() -> Result<keyring::Entry> {
        keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
            .map_err(|e| VgAuthError::Keyring(format!("Failed to access keyring: {}", e)))
    }

    #[cfg(feature = "keyring-support")]
    fn load_from_keyring() -> Result<EncryptionKey> {
        let encoded = Zeroizing::new(
            Self::keyring_entry()?
                .get_password()
                .map_err(|e| VgAuthError::Keyring(format!("Failed to read from keyring: {}", e)))?,
        );

        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.as_bytes())
                .map_err(|_| VgAuthError::CorruptedStore)?,
        );
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| VgAuthError::CorruptedStore)?;

        Ok(EncryptionKey::from_bytes(key))
    }

    #[cfg(feature = "keyring-support")]
    fn save_to_keyring(key: &EncryptionKey) -> Result<()> {
        let encoded = Zeroizing::new(STANDARD.encode(key.as_bytes()));
        Self::keyring_entry()?
            .set_password(&encoded)
            .map_err(|e| VgAuthError::Keyring(format!("Failed to write to keyring: {}", e)))
    }

    async fn derive_from_passphrase(
        meta: &mut KeyMeta,
        secret_provider: &Arc<dyn SecretProvider>,
    ) -> Result<EncryptionKey> {
        let salt = match &meta.passphrase_salt {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(|_| VgAuthError::CorruptedStore)?,
            None => {
                let mut salt = vec![0u8; SALT_LEN];
                crypto::random_fill(&mut salt)?;
                meta.passphrase_salt = Some(STANDARD.encode(&salt));
                salt
            }
        };

        let passphrase = secret_provider
            .get_passphrase("Enter passphrase for the credential store")
            .await
            .ok_or(VgAuthError::UserCancelled)?;

        let params = Params::new(
            meta.kdf.memory_kib,
            meta.kdf.iterations,
            meta.kdf.parallelism,
            Some(32),
        )
        .map_err(|e| VgAuthError::Crypto(format!("Invalid Argon2 params: {}", e)))?;

        let mut key = Zeroizing::new([0u8; 32]);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(passphrase.as_bytes(), &salt, &mut key[..])
            .map_err(|e| VgAuthError::Crypto(format!("Key derivation failed: {}", e)))?;

        Ok(EncryptionKey::from_bytes(*key))
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("meta", &self.meta)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
