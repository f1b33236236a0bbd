//! The session façade the rest of the application talks to.
//!
//! Owns the process-wide session state machine:
//!
//! ```text
//! Uninitialized -> Initializing -> Authenticated <-> Unauthenticated -> Closed
//! ```
//!
//! Nothing may treat `Initializing` as either logged in or logged out;
//! [`SessionManager::wait_ready`] blocks until initialization has settled, and
//! `login`/`dispatch` wait on it implicitly.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::client::{AuthClient, LoginCredentials, RenewalClient};
use crate::codec::{CredentialCodec, JwtExpiryCodec};
use crate::config::VgAuthConfig;
use crate::coordinator::RenewalCoordinator;
use crate::credentials::CredentialStore;
use crate::errors::{Result, VgAuthError};
use crate::gate::RequestGate;
use crate::models::Principal;
use crate::scheduler::{RenewalScheduler, SchedulerHandle};
use crate::session::{Session, SessionState, StoredCredentials};
use crate::store::TokenStore;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};

struct Inner {
    auth: AuthClient,
    store: CredentialStore,
    coordinator: RenewalCoordinator,
    gate: RequestGate,
    scheduler: RenewalScheduler,
    state: Arc<watch::Sender<SessionState>>,
    timers: Mutex<Option<SchedulerHandle>>,
    cleanup: Mutex<Vec<JoinHandle<()>>>,
}

/// Process-wide session: state, login/logout, and authenticated dispatch
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

/// Assembles a [`SessionManager`], with optional stand-ins for its collaborators
pub struct SessionManagerBuilder {
    config: VgAuthConfig,
    persistence: Arc<dyn TokenStore>,
    renewal_client: Option<Arc<dyn RenewalClient>>,
    transport: Option<Arc<dyn Transport>>,
    codec: Option<Arc<dyn CredentialCodec>>,
}

impl SessionManagerBuilder {
    /// Renew through this client instead of the HTTP refresh endpoint
    pub fn renewal_client(mut self, client: Arc<dyn RenewalClient>) -> Self {
        self.renewal_client = Some(client);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn CredentialCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn build(self) -> Result<SessionManager> {
        let auth = AuthClient::new(self.config.clone())?;
        let renewal_client = match self.renewal_client {
            Some(client) => client,
            None => Arc::new(auth.clone()),
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.config.clone())?),
        };
        let codec = self.codec.unwrap_or_else(|| Arc::new(JwtExpiryCodec));

        let (state, _) = watch::channel(SessionState::Uninitialized);
        let state = Arc::new(state);
        let store = CredentialStore::new(self.persistence);
        let coordinator = RenewalCoordinator::new(
            renewal_client,
            store.clone(),
            Arc::clone(&state),
            self.config.flight_timeout,
        );
        let gate = RequestGate::new(
            transport,
            store.clone(),
            coordinator.clone(),
            self.config.invalid_credential_status,
        );
        let scheduler = RenewalScheduler::new(
            coordinator.clone(),
            store.clone(),
            codec,
            self.config.schedule.clone(),
        );

        Ok(SessionManager {
            inner: Arc::new(Inner {
                auth,
                store,
                coordinator,
                gate,
                scheduler,
                state,
                timers: Mutex::new(None),
                cleanup: Mutex::new(Vec::new()),
            }),
        })
    }
}

impl SessionManager {
    /// Manager talking HTTP to `config.base_url`
    pub fn new(config: VgAuthConfig, persistence: Arc<dyn TokenStore>) -> Result<Self> {
        Self::builder(config, persistence).build()
    }

    pub fn builder(
        config: VgAuthConfig,
        persistence: Arc<dyn TokenStore>,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder {
            config,
            persistence,
            renewal_client: None,
            transport: None,
            codec: None,
        }
    }

    /// Restore the persisted session, if any. Runs once; later calls just
    /// return the current state.
    ///
    /// A persisted pair with its principal is trusted as-is (the fine timer
    /// renews it straight away if it is close to expiry). A pair without a
    /// principal is renewed first. If that renewal fails transiently the
    /// session starts unauthenticated but the persisted pair is kept for the
    /// next start.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> SessionState {
        let started = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Uninitialized {
                *state = SessionState::Initializing;
                true
            } else {
                false
            }
        });
        if !started {
            return self.state();
        }

        let restored = match self.inner.store.load_persisted().await {
            None => {
                debug!("No persisted session");
                SessionState::Unauthenticated
            }
            Some(StoredCredentials {
                pair,
                principal: Some(principal),
            }) => {
                info!(user = %principal.username, "Restored persisted session");
                self.inner.store.restore(Session { pair, principal });
                SessionState::Authenticated
            }
            Some(StoredCredentials { pair, principal: None }) => {
                debug!("Persisted pair has no principal, renewing");
                self.inner.store.restore_pair(pair);
                match self.inner.coordinator.obtain_fresh_access_token().await {
                    Ok(_) => SessionState::Authenticated,
                    Err(e) if e.is_terminal() => {
                        info!("Persisted session is no longer valid: {}", e);
                        SessionState::Unauthenticated
                    }
                    Err(e) => {
                        warn!("Could not restore session, keeping it for next start: {}", e);
                        self.inner.store.clear_memory();
                        SessionState::Unauthenticated
                    }
                }
            }
        };

        let settled = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Initializing {
                *state = restored;
                true
            } else {
                false
            }
        });
        if settled && restored == SessionState::Authenticated {
            self.start_timers();
        }

        let state = self.state();
        info!(%state, "Session initialized");
        state
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Wait until initialization has settled and return the state it settled in
    pub async fn wait_ready(&self) -> Result<SessionState> {
        let mut receiver = self.subscribe();
        let state = receiver
            .wait_for(|state| state.is_settled())
            .await
            .map_err(|_| VgAuthError::SessionClosed)?;
        Ok(*state)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated && self.inner.store.session().is_some()
    }

    /// True until initialization has settled
    pub fn is_initializing(&self) -> bool {
        !self.state().is_settled()
    }

    /// The signed-in principal; None unless authenticated
    pub fn principal(&self) -> Option<Principal> {
        if self.state() != SessionState::Authenticated {
            return None;
        }
        self.inner.store.principal()
    }

    /// Pair and principal together; None unless authenticated
    pub fn session(&self) -> Option<Session> {
        if self.state() != SessionState::Authenticated {
            return None;
        }
        self.inner.store.session()
    }

    /// Log in, replacing any current session
    #[instrument(skip(self, credentials), fields(identifier = %credentials.identifier))]
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<Principal> {
        if self.wait_ready().await? == SessionState::Closed {
            return Err(VgAuthError::SessionClosed);
        }

        let session = self.inner.auth.login(credentials).await?;
        let principal = session.principal.clone();

        // A failed disk write still leaves a usable session; it was logged.
        let _ = self.inner.store.replace(session).await;

        let authenticated = self.inner.state.send_if_modified(|state| match state {
            SessionState::Closed => false,
            _ => {
                *state = SessionState::Authenticated;
                true
            }
        });
        if !authenticated {
            return Err(VgAuthError::SessionClosed);
        }

        self.start_timers();
        info!(user = %principal.username, "Logged in");
        Ok(principal)
    }

    /// Log out locally right away.
    ///
    /// The persisted session is cleared and the authority notified in the
    /// background; [`close`](Self::close) waits for that to finish.
    pub fn logout(&self) {
        self.inner.state.send_if_modified(|state| match state {
            SessionState::Closed | SessionState::Unauthenticated => false,
            _ => {
                *state = SessionState::Unauthenticated;
                true
            }
        });
        self.stop_timers();

        let access_token = self.inner.store.access_token();
        self.inner.store.clear_memory();
        info!("Logged out");

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = self.inner.store.clone();
                let auth = self.inner.auth.clone();
                let task = runtime.spawn(async move {
                    let _ = store.clear_persisted().await;
                    auth.logout(access_token.as_deref()).await;
                });

                let mut cleanup = self.inner.cleanup.lock().unwrap_or_else(PoisonError::into_inner);
                cleanup.retain(|pending| !pending.is_finished());
                cleanup.push(task);
            }
            Err(_) => warn!("No async runtime, persisted session left in place"),
        }
    }

    /// Send an authenticated request through the gate
    pub async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse> {
        if self.wait_ready().await? == SessionState::Closed {
            return Err(VgAuthError::SessionClosed);
        }
        self.inner.gate.dispatch(request).await
    }

    /// Stop the timers, finish background cleanup, and move to `Closed`.
    ///
    /// The persisted session is kept for the next start.
    pub async fn close(&self) {
        self.stop_timers();

        let pending = {
            let mut cleanup = self.inner.cleanup.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *cleanup)
        };
        for task in pending {
            if let Err(e) = task.await {
                warn!("Logout cleanup task failed: {}", e);
            }
        }

        self.inner.state.send_replace(SessionState::Closed);
        info!("Session closed");
    }

    /// Whether the proactive renewal timers are running
    pub fn timers_running(&self) -> bool {
        self.inner
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(SchedulerHandle::is_running)
    }

    fn start_timers(&self) {
        let handle = self.inner.scheduler.spawn();
        // Replacing the old handle stops its timers.
        *self.inner.timers.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn stop_timers(&self) {
        let handle = self.inner.timers.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
