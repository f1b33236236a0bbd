//! Session and access-token lifecycle for the Vigil console
//!
//! This crate keeps a user's access token valid across any number of
//! concurrent backend calls. Tokens are renewed silently, at most one renewal
//! is ever in flight, and the session is only ended when the authority
//! actually refuses the refresh credential.
//!
//! # Components
//!
//! 1. [`CredentialStore`] holds the credential pair and principal, mirrored to a [`TokenStore`]
//! 2. [`CredentialCodec`] reads the access token's expiry locally
//! 3. [`RenewalClient`] exchanges the refresh token for a fresh pair
//! 4. [`RenewalCoordinator`] makes sure concurrent renewals collapse into one call
//! 5. [`RequestGate`] renews and replays a request refused for an invalid token, once
//! 6. [`RenewalScheduler`] renews proactively on a coarse and a fine timer
//! 7. [`SessionManager`] ties it together: init, login, logout, dispatch, teardown
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use url::Url;
//! use vg_auth::{ApiRequest, LoginCredentials, MemoryTokenStore, SessionManager, VgAuthConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = VgAuthConfig::new(Url::parse("https://nvr.example.com/")?);
//!     let session = SessionManager::new(config, Arc::new(MemoryTokenStore::new()))?;
//!
//!     session.initialize().await;
//!     if !session.is_authenticated() {
//!         session.login(&LoginCredentials::new("operator", "secret")).await?;
//!     }
//!
//!     // Renewal and replay happen behind this call
//!     let response = session.dispatch(&ApiRequest::get("api/cameras")).await?;
//!     println!("{}", response.status);
//!
//!     session.logout();
//!     session.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Token Storage
//!
//! ## In-Memory Storage (Testing)
//!
//! ```
//! use std::sync::Arc;
//! use vg_auth::{MemoryTokenStore, SessionManager, SessionState, VgAuthConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let session = SessionManager::new(VgAuthConfig::default(), Arc::new(MemoryTokenStore::new()))?;
//!
//! // Nothing persisted, so the session settles as logged out
//! assert_eq!(session.initialize().await, SessionState::Unauthenticated);
//! assert!(session.principal().is_none());
//! # Ok(())
//! # }
//! # tokio_test::block_on(example()).unwrap();
//! ```
//!
//! ## File-Based Encrypted Storage (Production)
//!
//! ```no_run
//! use std::sync::Arc;
//! use vg_auth::{FileTokenStore, NoSecretProvider, SessionManager, VgAuthConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! // Use OS keyring for key storage (no passphrase needed)
//! let secret_provider = Arc::new(NoSecretProvider);
//! let storage_dir = FileTokenStore::default_storage_dir()?;
//! let store = FileTokenStore::new(storage_dir, "nvr-main", secret_provider).await?;
//!
//! // Sessions are encrypted using AES-256-GCM and survive restarts
//! let session = SessionManager::new(VgAuthConfig::default(), Arc::new(store))?;
//! session.initialize().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Important Notes
//!
//! - Only a refused refresh credential (or no credential at all) ends the session;
//!   timeouts and 5xx from the refresh endpoint leave it in place
//! - A request is replayed at most once; a second refusal fails that request only
//! - Tokens should be stored securely and never logged

pub mod client;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod crypto;
pub mod errors;
pub mod file_store;
pub mod gate;
pub mod key_manager;
pub mod manager;
pub mod models;
pub mod scheduler;
pub mod secret;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types
pub use client::{AuthClient, LoginCredentials, RenewalClient};
pub use codec::{CredentialCodec, JwtExpiryCodec, renewal_due};
pub use config::{ScheduleConfig, VgAuthConfig};
pub use coordinator::{FlightState, RenewalCoordinator, WaiterQueue};
pub use credentials::CredentialStore;
pub use errors::{MalformedTokenError, RenewalError, Result, VgAuthError};
pub use file_store::FileTokenStore;
pub use gate::RequestGate;
pub use manager::{SessionManager, SessionManagerBuilder};
pub use models::Principal;
pub use scheduler::{RenewalScheduler, SchedulerHandle, TickOutcome};
pub use secret::{NoSecretProvider, SecretProvider, StaticSecretProvider};
pub use session::{CredentialPair, Session, SessionState, StoredCredentials};
pub use store::{MemoryTokenStore, TokenStore};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
