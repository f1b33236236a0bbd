use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use zeroize::ZeroizeOnDrop;

use crate::errors::{Result, VgAuthError};

const NONCE_LEN: usize = 12;
const AAD_VERSION: &str = "v1";

/// AES-256 key (32 bytes)
#[derive(Clone, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; 32],
}

impl EncryptionKey {
    /// Fresh key from the OS random source
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; 32];
        random_fill(&mut key)?;
        Ok(Self { key })
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { key: bytes }
    }

    /// Raw key bytes (sensitive)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Ciphertext as written to disk
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EncryptedBlob {
    /// Base64url nonce (12 bytes)
    pub nonce: String,
    /// Base64url ciphertext including the GCM tag
    pub ciphertext: String,
    pub aad_version: String,
}

pub(crate) fn random_fill(buf: &mut [u8]) -> Result<()> {
    getrandom::fill(buf).map_err(|e| VgAuthError::Crypto(format!("OS random source failed: {}", e)))
}

fn aad(version: &str, namespace: &str) -> String {
    format!("vg-auth|{}|{}", version, namespace)
}

/// Encrypt with AES-256-GCM, binding the ciphertext to `namespace`
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8], namespace: &str) -> Result<EncryptedBlob> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_LEN];
    random_fill(&mut nonce_bytes)?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = aad(AAD_VERSION, namespace);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|e| VgAuthError::Crypto(format!("Encryption failed: {}", e)))?;

    Ok(EncryptedBlob {
        nonce: URL_SAFE_NO_PAD.encode(nonce_bytes),
        ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        aad_version: AAD_VERSION.to_string(),
    })
}

/// Decrypt a blob produced by [`encrypt`] for the same namespace
pub fn decrypt(key: &EncryptionKey, blob: &EncryptedBlob, namespace: &str) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let nonce_bytes = URL_SAFE_NO_PAD
        .decode(&blob.nonce)
        .map_err(|e| VgAuthError::Crypto(format!("Invalid nonce: {}", e)))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(VgAuthError::CorruptedStore);
    }
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = URL_SAFE_NO_PAD
        .decode(&blob.ciphertext)
        .map_err(|e| VgAuthError::Crypto(format!("Invalid ciphertext: {}", e)))?;

    let aad = aad(&blob.aad_version, namespace);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &ciphertext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| VgAuthError::CorruptedStore)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = EncryptionKey::generate().unwrap();
        let encrypted = encrypt(&key, b"refresh-token-material", "nvr-main").unwrap();
        let decrypted = decrypt(&key, &encrypted, "nvr-main").unwrap();
        assert_eq!(decrypted, b"refresh-token-material");
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = encrypt(&EncryptionKey::generate().unwrap(), b"data", "ns").unwrap();
        let result = decrypt(&EncryptionKey::generate().unwrap(), &encrypted, "ns");
        assert!(matches!(result, Err(VgAuthError::CorruptedStore)));
    }

    #[test]
    fn test_other_namespace_fails() {
        let key = EncryptionKey::generate().unwrap();
        let encrypted = encrypt(&key, b"data", "site-a").unwrap();
        let result = decrypt(&key, &encrypted, "site-b");
        assert!(matches!(result, Err(VgAuthError::CorruptedStore)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = EncryptionKey::generate().unwrap();
        let mut encrypted = encrypt(&key, b"data", "ns").unwrap();

        let mut bytes = URL_SAFE_NO_PAD.decode(&encrypted.ciphertext).unwrap();
        bytes[0] ^= 0xFF;
        encrypted.ciphertext = URL_SAFE_NO_PAD.encode(bytes);

        let result = decrypt(&key, &encrypted, "ns");
        assert!(matches!(result, Err(VgAuthError::CorruptedStore)));
    }

    #[test]
    fn test_short_nonce_is_corruption() {
        let key = EncryptionKey::generate().unwrap();
        let mut encrypted = encrypt(&key, b"data", "ns").unwrap();
        encrypted.nonce = URL_SAFE_NO_PAD.encode([0u8; 4]);
        assert!(matches!(decrypt(&key, &encrypted, "ns"), Err(VgAuthError::CorruptedStore)));
    }
}
