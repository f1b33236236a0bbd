use serde::{Deserialize, Serialize};

use crate::errors::RenewalError;
use crate::session::{CredentialPair, Session};

/// `POST /auth/login` request body
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub identifier: &'a str,
    pub password: &'a str,
}

/// `POST /auth/refresh` request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Token response shared by login and refresh
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    #[serde(default, alias = "principal")]
    pub user: Option<serde_json::Value>,
}

impl TokenResponse {
    /// Validate the response into a complete session.
    ///
    /// A response without a usable principal is refused outright rather than
    /// patched up with a previously known one.
    pub fn into_session(self) -> std::result::Result<Session, RenewalError> {
        if self.access_token.is_empty() || self.refresh_token.is_empty() {
            return Err(RenewalError::MalformedResponse(
                "empty token in response".to_string(),
            ));
        }

        let user = self
            .user
            .ok_or_else(|| RenewalError::MalformedResponse("missing principal".to_string()))?;
        let principal: Principal = serde_json::from_value(user)
            .map_err(|e| RenewalError::MalformedResponse(format!("invalid principal: {}", e)))?;

        Ok(Session {
            pair: CredentialPair::new(self.access_token, self.refresh_token, self.expires_in),
            principal,
        })
    }
}

/// Authenticated user profile as returned by the authority
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Principal {
    /// Name suitable for display
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// Error body some endpoints attach to a failure
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(user: Option<serde_json::Value>) -> TokenResponse {
        TokenResponse {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_in: 1800,
            user,
        }
    }

    #[test]
    fn test_token_response_parses_camel_case() {
        let body = r#"{
            "accessToken": "a",
            "refreshToken": "r",
            "expiresIn": 1800,
            "user": {"id": "7", "username": "ops", "role": "admin", "displayName": "Ops Desk"}
        }"#;
        let parsed: TokenResponse = serde_json::from_str(body).unwrap();
        let session = parsed.into_session().unwrap();
        assert_eq!(session.pair.access_token, "a");
        assert_eq!(session.pair.expires_in_seconds, 1800);
        assert_eq!(session.principal.label(), "Ops Desk");
        assert_eq!(session.principal.role.as_deref(), Some("admin"));
    }

    #[test]
    fn test_missing_principal_is_malformed() {
        let err = response(None).into_session().unwrap_err();
        assert!(matches!(err, RenewalError::MalformedResponse(_)));
        assert!(err.is_terminal());
    }

    #[test]
    fn test_invalid_principal_is_malformed() {
        let err = response(Some(serde_json::json!({"name": "no id"})))
            .into_session()
            .unwrap_err();
        assert!(matches!(err, RenewalError::MalformedResponse(_)));
    }

    #[test]
    fn test_huge_expires_in_is_accepted() {
        let body = r#"{"accessToken":"a","refreshToken":"r","expiresIn":18446744073709551,
            "user":{"id":"1","username":"ops"}}"#;
        let parsed: TokenResponse = serde_json::from_str(body).unwrap();
        let session = parsed.into_session().unwrap();
        assert!(session.pair.nominal_expiry() > session.pair.issued_at);
    }

    #[test]
    fn test_principal_alias() {
        let body = r#"{"accessToken":"a","refreshToken":"r","expiresIn":60,
            "principal":{"id":"1","username":"viewer"}}"#;
        let parsed: TokenResponse = serde_json::from_str(body).unwrap();
        let session = parsed.into_session().unwrap();
        assert_eq!(session.principal.label(), "viewer");
    }
}
