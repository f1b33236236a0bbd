use thiserror::Error;

/// Session and credential error types
#[derive(Error, Debug)]
pub enum VgAuthError {
    #[error("User cancelled the passphrase prompt")]
    UserCancelled,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("HTTP error {status}: {body_snippet}")]
    Http {
        status: reqwest::StatusCode,
        body_snippet: String,
    },

    #[error("Login rejected by the authority (HTTP {status})")]
    LoginRejected { status: reqwest::StatusCode },

    #[error(transparent)]
    Renewal(#[from] RenewalError),

    #[error("Request rejected with HTTP {status} even after renewing the access token")]
    GateRetryExhausted { status: reqwest::StatusCode },

    #[error("Session has been closed")]
    SessionClosed,

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cryptographic failure: {0}")]
    Crypto(String),

    #[error("Credential store is corrupted or was encrypted with another key")]
    CorruptedStore,

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Credential store is locked by another process")]
    LockTimeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Outcome of a failed renewal, shared by every caller waiting on the same flight
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenewalError {
    #[error("Session expired, please log in again (authority answered HTTP {status})")]
    Rejected { status: u16 },

    #[error("Renewal failed, network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("No refresh credential available")]
    NoCredential,

    #[error("Renewal response was unusable: {0}")]
    MalformedResponse(String),
}

impl RenewalError {
    /// Terminal failures destroy the session; the rest leave it for a later retry.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Rejected { .. } | Self::NoCredential | Self::MalformedResponse(_) => true,
            Self::NetworkUnavailable(_) => false,
        }
    }
}

/// The access token's embedded expiry could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed access token: {0}")]
pub struct MalformedTokenError(pub String);

pub type Result<T> = std::result::Result<T, VgAuthError>;
