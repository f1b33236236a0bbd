use reqwest::{Client, Response, StatusCode};
use tracing::{debug, instrument, warn};

use crate::config::VgAuthConfig;
use crate::errors::{RenewalError, Result, VgAuthError};
use crate::models::{ErrorBody, LoginRequest, RefreshRequest, TokenResponse};
use crate::session::Session;

/// Exchanges a refresh credential for a fresh pair and principal.
///
/// One stateless call; queuing and deduplication live in the coordinator.
#[async_trait::async_trait]
pub trait RenewalClient: Send + Sync {
    async fn renew(&self, refresh_token: &str) -> std::result::Result<Session, RenewalError>;
}

/// Login credentials typed by the user
pub struct LoginCredentials {
    pub identifier: String,
    pub password: zeroize::Zeroizing<String>,
}

impl LoginCredentials {
    pub fn new(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            password: zeroize::Zeroizing::new(password.into()),
        }
    }
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("identifier", &self.identifier)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// HTTP client for the authority's `/auth/*` endpoints
#[derive(Debug, Clone)]
pub struct AuthClient {
    config: VgAuthConfig,
    http: Client,
}

impl AuthClient {
    pub fn new(config: VgAuthConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.http_timeouts.connect)
            .timeout(config.http_timeouts.request)
            .user_agent(config.user_agent.as_deref().unwrap_or("vigil-console"))
            .build()?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &VgAuthConfig {
        &self.config
    }

    /// `POST /auth/login`
    #[instrument(skip(self, credentials), fields(identifier = %credentials.identifier))]
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<Session> {
        let url = self.config.api_url(&self.config.endpoints.login)?;
        let request = LoginRequest {
            identifier: &credentials.identifier,
            password: &credentials.password,
        };

        debug!("Logging in");
        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| VgAuthError::NetworkUnavailable(e.to_string()))?;

        let status = response.status();
        if self.config.is_rejection(status) {
            return Err(VgAuthError::LoginRejected { status });
        }
        if !status.is_success() {
            return Err(http_error(status, response).await);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| VgAuthError::NetworkUnavailable(e.to_string()))?;
        let token_response: TokenResponse = serde_json::from_slice(&body)?;
        Ok(token_response.into_session()?)
    }

    /// `POST /auth/logout`; best effort, failures are only logged
    #[instrument(skip(self, access_token))]
    pub async fn logout(&self, access_token: Option<&str>) {
        let url = match self.config.api_url(&self.config.endpoints.logout) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot build logout URL: {}", e);
                return;
            }
        };

        let mut request = self.http.post(url);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => debug!("Remote logout acknowledged"),
            Ok(response) => debug!("Remote logout answered {}", response.status()),
            Err(e) => debug!("Remote logout failed: {}", e),
        }
    }
}

#[async_trait::async_trait]
impl RenewalClient for AuthClient {
    /// `POST /auth/refresh`
    ///
    /// Rejection statuses are terminal; every other failure, including timeouts
    /// and 5xx, is `NetworkUnavailable`.
    #[instrument(skip(self, refresh_token))]
    async fn renew(&self, refresh_token: &str) -> std::result::Result<Session, RenewalError> {
        let url = self
            .config
            .api_url(&self.config.endpoints.refresh)
            .map_err(|e| RenewalError::NetworkUnavailable(e.to_string()))?;

        debug!("Renewing access token");
        let response = self
            .http
            .post(url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RenewalError::NetworkUnavailable(describe(&e)))?;

        let status = response.status();
        if self.config.is_rejection(status) {
            warn!("Authority rejected the refresh credential ({})", status);
            return Err(RenewalError::Rejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(RenewalError::NetworkUnavailable(format!(
                "authority answered {}",
                status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RenewalError::NetworkUnavailable(describe(&e)))?;
        let token_response: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| RenewalError::MalformedResponse(e.to_string()))?;

        token_response.into_session()
    }
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("timed out: {}", error)
    } else {
        error.to_string()
    }
}

async fn http_error(status: StatusCode, response: Response) -> VgAuthError {
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|e| e.message.or(e.error))
        .unwrap_or(body);

    VgAuthError::Http {
        status,
        body_snippet: detail.chars().take(200).collect(),
    }
}
