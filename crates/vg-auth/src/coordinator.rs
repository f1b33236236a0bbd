//! Single-flight renewal of the access token.
//!
//! At most one renewal call is outstanding at any time. Everyone who asks for
//! a fresh token while a flight is running joins its FIFO waiter queue and is
//! settled with the same outcome when the flight lands. Going back to idle
//! drains the queue in the same critical section, so no waiter can outlive
//! its flight.
//!
//! A refused refresh credential clears the credentials and moves the session
//! to unauthenticated. Asking with nothing to renew only moves the state; a
//! pair kept on disk for the next start stays there. Transient failures leave
//! everything as it was.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::{debug, info, instrument, warn};

use crate::client::RenewalClient;
use crate::credentials::CredentialStore;
use crate::errors::RenewalError;
use crate::session::{Session, SessionState};

type Outcome = Result<String, RenewalError>;

/// Whether a renewal call is currently outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightState {
    Idle,
    InFlight,
}

/// FIFO queue of callers waiting on the current flight
#[derive(Debug, Default)]
pub struct WaiterQueue {
    waiters: VecDeque<oneshot::Sender<Outcome>>,
}

impl WaiterQueue {
    /// Add a waiter and get the receiving end of its settlement
    pub fn enqueue(&mut self) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(tx);
        rx
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Settle every waiter with the same outcome, oldest first.
    ///
    /// Returns how many waiters were still listening.
    pub fn settle(self, outcome: &Outcome) -> usize {
        let mut delivered = 0;
        for waiter in self.waiters {
            if waiter.send(outcome.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

#[derive(Debug)]
enum Flight {
    Idle,
    InFlight(WaiterQueue),
}

struct Inner {
    client: Arc<dyn RenewalClient>,
    store: CredentialStore,
    state: Arc<watch::Sender<SessionState>>,
    flight: Mutex<Flight>,
    flight_timeout: Duration,
}

/// Hands out fresh access tokens, renewing at most once at a time
#[derive(Clone)]
pub struct RenewalCoordinator {
    inner: Arc<Inner>,
}

impl RenewalCoordinator {
    pub fn new(
        client: Arc<dyn RenewalClient>,
        store: CredentialStore,
        state: Arc<watch::Sender<SessionState>>,
        flight_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                store,
                state,
                flight: Mutex::new(Flight::Idle),
                flight_timeout,
            }),
        }
    }

    pub fn flight_state(&self) -> FlightState {
        match *self.lock_flight() {
            Flight::Idle => FlightState::Idle,
            Flight::InFlight(_) => FlightState::InFlight,
        }
    }

    /// Callers currently waiting on the flight, the initiator included
    pub fn waiter_count(&self) -> usize {
        match &*self.lock_flight() {
            Flight::Idle => 0,
            Flight::InFlight(queue) => queue.len(),
        }
    }

    /// Get a freshly renewed access token.
    ///
    /// Starts a flight when idle, otherwise joins the one in progress. With no
    /// refresh credential at all this fails with [`RenewalError::NoCredential`]
    /// without touching the network.
    #[instrument(skip(self))]
    pub async fn obtain_fresh_access_token(&self) -> Outcome {
        let receiver = {
            let mut flight = self.lock_flight();
            match *flight {
                Flight::InFlight(ref mut queue) => {
                    debug!(position = queue.len(), "Renewal already in flight, queueing");
                    Some(queue.enqueue())
                }
                Flight::Idle => self.inner.store.refresh_token().map(|refresh_token| {
                    let mut queue = WaiterQueue::default();
                    let receiver = queue.enqueue();
                    *flight = Flight::InFlight(queue);

                    // Detached so the waiters are settled even if this caller is dropped.
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move { inner.fly(refresh_token).await });
                    receiver
                }),
            }
        };

        let Some(receiver) = receiver else {
            return Err(self.fail_without_credential());
        };

        receiver.await.unwrap_or_else(|_| {
            Err(RenewalError::NetworkUnavailable(
                "renewal flight was abandoned".to_string(),
            ))
        })
    }

    fn fail_without_credential(&self) -> RenewalError {
        warn!("Renewal requested with no refresh credential");
        self.inner.mark_unauthenticated();
        RenewalError::NoCredential
    }

    fn lock_flight(&self) -> std::sync::MutexGuard<'_, Flight> {
        self.inner.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    async fn fly(&self, refresh_token: String) {
        let renewal = self.client.renew(&refresh_token);
        let result = match tokio::time::timeout(self.flight_timeout, renewal).await {
            Ok(result) => result,
            Err(_) => Err(RenewalError::NetworkUnavailable(format!(
                "renewal did not complete within {:?}",
                self.flight_timeout
            ))),
        };

        let outcome = match result {
            Ok(session) => self.adopt(&refresh_token, session).await,
            Err(e) if e.is_terminal() => {
                info!("Renewal failed terminally: {}", e);
                // A pair installed by a login meanwhile is not ours to end.
                if self.store.refresh_token().as_deref() == Some(refresh_token.as_str()) {
                    self.end_session().await;
                }
                Err(e)
            }
            Err(e) => {
                warn!("Renewal failed, keeping session: {}", e);
                Err(e)
            }
        };

        let queue = {
            let mut flight = self.flight.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *flight, Flight::Idle) {
                Flight::InFlight(queue) => queue,
                Flight::Idle => WaiterQueue::default(),
            }
        };

        let waiting = queue.len();
        let delivered = queue.settle(&outcome);
        debug!(waiting, delivered, ok = outcome.is_ok(), "Renewal flight landed");
    }

    async fn adopt(&self, renewed_from: &str, session: Session) -> Outcome {
        let access_token = session.pair.access_token.clone();
        if self.store.adopt_renewal(renewed_from, session).await {
            return Ok(access_token);
        }

        // Logged out or logged in again while the flight was out.
        self.store.access_token().ok_or(RenewalError::NoCredential)
    }

    async fn end_session(&self) {
        let _ = self.store.clear().await;
        self.mark_unauthenticated();
    }

    fn mark_unauthenticated(&self) {
        self.state.send_if_modified(|state| match state {
            SessionState::Authenticated | SessionState::Initializing => {
                *state = SessionState::Unauthenticated;
                true
            }
            _ => false,
        });
    }
}
