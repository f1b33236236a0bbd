mod cli;
mod config;

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::debug;
use vg_auth::{
    ApiRequest, FileTokenStore, LoginCredentials, NoSecretProvider, SecretProvider, SessionManager,
    SessionState, StaticSecretProvider,
};

use crate::cli::{Cli, Command};
use crate::config::ConsoleConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ConsoleConfig::load(cli.config.as_deref()).await?;

    init_tracing(
        cli.log_level
            .as_deref()
            .or(config.log_level.as_deref())
            .unwrap_or("warn"),
    );

    let session = open_session(&cli, &config).await?;
    session.initialize().await;

    let result = run(cli.command, &session).await;
    session.close().await;
    result
}

fn init_tracing(filter: &str) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn open_session(cli: &Cli, config: &ConsoleConfig) -> anyhow::Result<SessionManager> {
    let auth_config = config.auth_config(cli.server.as_ref())?;

    let storage_dir = match &config.storage_dir {
        Some(dir) => dir.clone(),
        None => FileTokenStore::default_storage_dir()?,
    };
    let secret_provider: Arc<dyn SecretProvider> = match &cli.passphrase {
        Some(passphrase) => Arc::new(StaticSecretProvider::new(passphrase.clone())),
        None => Arc::new(NoSecretProvider),
    };

    debug!(
        dir = %storage_dir.display(),
        namespace = config.namespace(),
        "Opening credential store"
    );
    let store = FileTokenStore::new(&storage_dir, config.namespace(), secret_provider)
        .await
        .context(
            "Failed to open the credential store \
             (set VIGIL_STORE_PASSPHRASE if no keyring is available)",
        )?;

    Ok(SessionManager::new(auth_config, Arc::new(store))?)
}

async fn run(command: Command, session: &SessionManager) -> anyhow::Result<()> {
    match command {
        Command::Login { user, password } => {
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };

            let principal = session.login(&LoginCredentials::new(user, password)).await?;
            println!(
                "Logged in as {} ({})",
                principal.label(),
                principal.role.as_deref().unwrap_or("no role")
            );
        }
        Command::Status => match session.session() {
            Some(current) => println!(
                "{}: {} [{}], token valid until {}",
                session.state(),
                current.principal.label(),
                current.principal.id,
                current.pair.nominal_expiry().format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => println!("{}", session.state()),
        },
        Command::Logout => {
            session.logout();
            println!("Logged out");
        }
        Command::Get { path, query } => {
            require_login(session)?;

            let mut request = ApiRequest::get(path);
            for (key, value) in query {
                request = request.with_query(key, value);
            }

            let response = session.dispatch(&request).await?;
            if !response.status.is_success() {
                bail!("Backend answered {}: {}", response.status, response.text());
            }

            match response.json::<serde_json::Value>() {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", response.text()),
            }
        }
        Command::Watch => {
            require_login(session)?;
            eprintln!("Keeping the session fresh, press Ctrl-C to stop");

            let mut state = session.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = *state.borrow_and_update();
                        if current == SessionState::Unauthenticated {
                            bail!("Session ended, log in again");
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn require_login(session: &SessionManager) -> anyhow::Result<()> {
    if !session.is_authenticated() {
        bail!("Not logged in; run `vigil-console login --user <name>` first");
    }
    Ok(())
}

fn read_password() -> anyhow::Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush()?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
