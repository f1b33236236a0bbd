//! Proactive renewal on two independent timers.
//!
//! The coarse timer renews unconditionally every `coarse_interval`. The fine
//! timer fires every `fine_interval` (first tick immediately) and renews only
//! when the access token has `renewal_threshold` or less left to live. Both go
//! through the coordinator, so they collapse with any reactive renewal into a
//! single call. Both stop on their own once there is no session left.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{CredentialCodec, renewal_due};
use crate::config::ScheduleConfig;
use crate::coordinator::RenewalCoordinator;
use crate::credentials::CredentialStore;
use crate::errors::RenewalError;

/// What one timer tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    NoSession,
    NotDue,
    Renewed,
    Failed(RenewalError),
}

impl TickOutcome {
    fn from_renewal(result: Result<String, RenewalError>) -> Self {
        match result {
            Ok(_) => Self::Renewed,
            Err(e) => Self::Failed(e),
        }
    }

    /// Whether the timer that produced this should keep running
    fn keeps_running(&self) -> bool {
        match self {
            Self::NoSession => false,
            Self::Failed(e) => !e.is_terminal(),
            Self::NotDue | Self::Renewed => true,
        }
    }
}

#[derive(Clone)]
pub struct RenewalScheduler {
    coordinator: RenewalCoordinator,
    store: CredentialStore,
    codec: Arc<dyn CredentialCodec>,
    config: ScheduleConfig,
}

impl RenewalScheduler {
    pub fn new(
        coordinator: RenewalCoordinator,
        store: CredentialStore,
        codec: Arc<dyn CredentialCodec>,
        config: ScheduleConfig,
    ) -> Self {
        Self {
            coordinator,
            store,
            codec,
            config,
        }
    }

    /// Whether the fine timer would renew at `now`; false without a session
    pub fn fine_check_due(&self, now: DateTime<Utc>) -> bool {
        let threshold = self.config.renewal_threshold;
        self.store
            .access_token()
            .is_some_and(|token| renewal_due(self.codec.as_ref(), &token, now, threshold))
    }

    pub async fn coarse_tick(&self) -> TickOutcome {
        if !self.store.has_credentials() {
            return TickOutcome::NoSession;
        }
        debug!("Scheduled renewal");
        TickOutcome::from_renewal(self.coordinator.obtain_fresh_access_token().await)
    }

    pub async fn fine_tick(&self, now: DateTime<Utc>) -> TickOutcome {
        if !self.store.has_credentials() {
            return TickOutcome::NoSession;
        }
        if !self.fine_check_due(now) {
            return TickOutcome::NotDue;
        }
        debug!("Access token close to expiry, renewing");
        TickOutcome::from_renewal(self.coordinator.obtain_fresh_access_token().await)
    }

    /// Start both timers. They run until the handle is stopped or dropped,
    /// the session ends, or a renewal fails terminally.
    pub fn spawn(&self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        info!(
            coarse_secs = self.config.coarse_interval.as_secs(),
            fine_secs = self.config.fine_interval.as_secs(),
            "Starting renewal timers"
        );

        // Coarse timer
        let coarse = {
            let scheduler = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let period = scheduler.config.coarse_interval;
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {}
                    }

                    let outcome = scheduler.coarse_tick().await;
                    if !scheduler.settle("coarse", &outcome, &cancel) {
                        break;
                    }
                }
            })
        };

        // Fine timer
        let fine = {
            let scheduler = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(scheduler.config.fine_interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {}
                    }

                    let outcome = scheduler.fine_tick(Utc::now()).await;
                    if !scheduler.settle("fine", &outcome, &cancel) {
                        break;
                    }
                }
            })
        };

        SchedulerHandle {
            cancel,
            tasks: vec![coarse, fine],
        }
    }

    fn settle(
        &self,
        timer: &'static str,
        outcome: &TickOutcome,
        cancel: &CancellationToken,
    ) -> bool {
        if let TickOutcome::Failed(e) = outcome {
            if e.is_terminal() {
                info!(timer, "Renewal timers stopping: {}", e);
            } else {
                warn!(timer, "Proactive renewal failed, will retry: {}", e);
            }
        }

        if outcome.keeps_running() {
            return true;
        }
        debug!(timer, "Renewal timer exiting");
        cancel.cancel();
        false
    }
}

/// Running timers; dropping the handle stops them
#[derive(Debug)]
pub struct SchedulerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
