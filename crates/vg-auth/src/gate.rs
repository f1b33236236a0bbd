//! Authenticated dispatch with one renewal-and-replay on an invalid credential.

use std::sync::Arc;

use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use crate::coordinator::RenewalCoordinator;
use crate::credentials::CredentialStore;
use crate::errors::{Result, VgAuthError};
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Wraps every outgoing authenticated call
#[derive(Clone)]
pub struct RequestGate {
    transport: Arc<dyn Transport>,
    store: CredentialStore,
    coordinator: RenewalCoordinator,
    invalid_credential_status: StatusCode,
}

impl RequestGate {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: CredentialStore,
        coordinator: RenewalCoordinator,
        invalid_credential_status: StatusCode,
    ) -> Self {
        Self {
            transport,
            store,
            coordinator,
            invalid_credential_status,
        }
    }

    /// Send `request` with the current access token.
    ///
    /// On the invalid-credential status the request is replayed exactly once
    /// with a fresh token. If the token changed while the request was out, the
    /// replay uses it directly instead of starting another renewal. A second
    /// invalid-credential answer fails with [`VgAuthError::GateRetryExhausted`].
    /// Renewal failures come back as [`VgAuthError::Renewal`]; every other
    /// status is returned untouched.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let sent_with = self.store.access_token();
        let response = self.transport.send(request, sent_with.as_deref()).await?;
        if response.status != self.invalid_credential_status {
            return Ok(response);
        }

        let token = match self.store.access_token() {
            Some(current) if sent_with.as_deref() != Some(current.as_str()) => {
                debug!("Access token rotated while request was out, replaying");
                current
            }
            _ => {
                debug!("Access token refused, renewing");
                self.coordinator.obtain_fresh_access_token().await?
            }
        };

        let retried = self.transport.send(request, Some(&token)).await?;
        if retried.status == self.invalid_credential_status {
            warn!("Request refused again after renewal, giving up");
            return Err(VgAuthError::GateRetryExhausted {
                status: retried.status,
            });
        }

        Ok(retried)
    }
}
