use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

/// Operator console for a Vigil surveillance backend
#[derive(Debug, Parser)]
#[command(name = "vigil-console", version)]
pub struct Cli {
    /// Config file (default: console.toml in the platform config directory)
    #[arg(long, env = "VIGIL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Backend base URL, overriding the config file
    #[arg(long, env = "VIGIL_SERVER")]
    pub server: Option<Url>,

    /// Passphrase for the credential store when no OS keyring is available
    #[arg(long, env = "VIGIL_STORE_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Log filter (e.g. "info" or "vg_auth=debug")
    #[arg(long, env = "VIGIL_LOG")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and store the session
    Login {
        #[arg(long, short)]
        user: String,

        /// Read from stdin when omitted
        #[arg(long, env = "VIGIL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Show the current session
    Status,
    /// End the session here and at the backend
    Logout,
    /// Authenticated GET against the backend, body printed to stdout
    Get {
        /// Path relative to the server URL, e.g. api/cameras
        path: String,

        /// Query parameter as key=value; repeatable
        #[arg(long, short, value_parser = parse_key_value)]
        query: Vec<(String, String)>,
    },
    /// Keep the session fresh until interrupted
    Watch,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}
