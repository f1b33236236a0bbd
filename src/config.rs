use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use url::Url;
use vg_auth::{ScheduleConfig, VgAuthConfig};

/// `console.toml`; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub server_url: Option<Url>,
    /// Separates stored sessions of different backends
    pub namespace: Option<String>,
    pub storage_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub timeouts: TimeoutConfig,
    pub renewal: RenewalConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: Option<u64>,
    pub request_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalConfig {
    /// Access token lifetime the backend issues; the coarse timer fires at 80% of it
    pub token_lifetime_secs: Option<u64>,
    pub check_interval_secs: Option<u64>,
    pub threshold_secs: Option<u64>,
    pub flight_timeout_secs: Option<u64>,
}

impl ConsoleConfig {
    /// Read the config file.
    ///
    /// An explicit path must exist; a missing file at the default location
    /// just means defaults.
    pub async fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from(path).await,
            None => {
                let path = default_config_path()?;
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Ok(Self::default());
                }
                Self::load_from(&path).await
            }
        }
    }

    pub async fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or("default")
    }

    /// Session configuration, with `server` taking precedence over the file
    pub fn auth_config(&self, server: Option<&Url>) -> anyhow::Result<VgAuthConfig> {
        let base_url = server
            .or(self.server_url.as_ref())
            .context("No server configured; pass --server or set server_url in console.toml")?;

        let mut config = VgAuthConfig::new(base_url.clone());
        if let Some(secs) = self.timeouts.connect_secs {
            config.http_timeouts.connect = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeouts.request_secs {
            config.http_timeouts.request = Duration::from_secs(secs);
        }

        let renewal = &self.renewal;
        if let Some(secs) = renewal.token_lifetime_secs {
            config.schedule = ScheduleConfig::for_lifetime(Duration::from_secs(secs.max(1)));
        }
        if let Some(secs) = renewal.check_interval_secs {
            config.schedule.fine_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = renewal.threshold_secs {
            config.schedule.renewal_threshold = Duration::from_secs(secs);
        }
        if let Some(secs) = renewal.flight_timeout_secs {
            config.flight_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "vigil", "vigil-console")
        .context("Failed to get project directories")?;
    Ok(proj_dirs.config_dir().join("console.toml"))
}
