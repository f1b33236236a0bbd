use std::time::Duration;

use reqwest::StatusCode;
use url::Url;

use crate::errors::Result;

/// Authority endpoints, relative to the configured base URL
pub mod endpoints {
    pub const LOGIN: &str = "auth/login";
    pub const REFRESH: &str = "auth/refresh";
    pub const LOGOUT: &str = "auth/logout";
}

/// Default backend address used when nothing else is configured
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/";

/// Total lifetime the authority gives an access token unless told otherwise
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Remaining lifetime below which the fine timer renews
pub const DEFAULT_RENEWAL_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Relative endpoint paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub login: String,
    pub refresh: String,
    pub logout: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: endpoints::LOGIN.to_string(),
            refresh: endpoints::REFRESH.to_string(),
            logout: endpoints::LOGOUT.to_string(),
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpTimeouts {
    pub connect: Duration,
    /// Also bounds the renewal call; a timeout surfaces as `NetworkUnavailable`.
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(15),
        }
    }
}

/// Cadences of the two proactive renewal timers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Unconditional renewal period
    pub coarse_interval: Duration,
    /// Period of the remaining-lifetime check
    pub fine_interval: Duration,
    /// The fine timer renews once remaining lifetime is at or below this
    pub renewal_threshold: Duration,
}

impl ScheduleConfig {
    /// Derive the coarse period from the access token lifetime (fires at 80% of it).
    pub fn for_lifetime(lifetime: Duration) -> Self {
        Self {
            coarse_interval: lifetime * 4 / 5,
            ..Self::default()
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            coarse_interval: DEFAULT_TOKEN_LIFETIME * 4 / 5,
            fine_interval: Duration::from_secs(60),
            renewal_threshold: DEFAULT_RENEWAL_THRESHOLD,
        }
    }
}

/// Configuration for the session layer
#[derive(Debug, Clone)]
pub struct VgAuthConfig {
    /// Backend base URL; endpoint paths are resolved against it
    pub base_url: Url,

    pub endpoints: Endpoints,

    pub http_timeouts: HttpTimeouts,

    /// Custom user agent (optional)
    pub user_agent: Option<String>,

    /// Status an authenticated endpoint answers with when the access token is invalid
    pub invalid_credential_status: StatusCode,

    /// Statuses from the refresh endpoint meaning the refresh credential is dead
    pub rejection_statuses: Vec<StatusCode>,

    /// Upper bound on one renewal flight, whatever the renewal client does
    pub flight_timeout: Duration,

    pub schedule: ScheduleConfig,
}

impl VgAuthConfig {
    /// Config pointing at the given backend with default policy
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            endpoints: Endpoints::default(),
            http_timeouts: HttpTimeouts::default(),
            user_agent: Some(concat!("vigil-console/", env!("CARGO_PKG_VERSION")).to_string()),
            invalid_credential_status: StatusCode::UNAUTHORIZED,
            rejection_statuses: vec![
                StatusCode::BAD_REQUEST,
                StatusCode::UNAUTHORIZED,
                StatusCode::FORBIDDEN,
            ],
            flight_timeout: Duration::from_secs(30),
            schedule: ScheduleConfig::default(),
        }
    }

    /// Resolve a path against the base URL, keeping any path prefix the base carries
    pub fn api_url(&self, path: &str) -> Result<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        Ok(base.join(path.trim_start_matches('/'))?)
    }

    pub fn is_rejection(&self, status: StatusCode) -> bool {
        self.rejection_statuses.contains(&status)
    }
}

impl Default for VgAuthConfig {
    fn default() -> Self {
        Self::new(Url::parse(DEFAULT_BASE_URL).expect("valid default base URL"))
    }
}
