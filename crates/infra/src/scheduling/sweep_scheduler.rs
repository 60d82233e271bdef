//! Periodic sweep of expired pending authorizations.
//!
//! Consumption already enforces the TTL, so the sweeper is pure hygiene: it
//! keeps abandoned flows (user closed the consent tab) from accumulating in
//! the state table.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokenbridge_core::ports::StateStore;
use tokenbridge_domain::constants::STATE_SWEEP_INTERVAL_SECONDS;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::error::{SchedulerError, SchedulerResult};

type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

#[derive(Debug, Clone)]
pub struct SweepSchedulerConfig {
    pub interval: Duration,
}

impl Default for SweepSchedulerConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(STATE_SWEEP_INTERVAL_SECONDS) }
    }
}

/// Interval-driven expiry sweeper with start/stop lifecycle.
pub struct SweepScheduler {
    states: Arc<dyn StateStore>,
    config: SweepSchedulerConfig,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl SweepScheduler {
    pub fn new(states: Arc<dyn StateStore>, config: SweepSchedulerConfig) -> Self {
        Self {
            states,
            config,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the background sweep loop.
    ///
    /// # Errors
    /// Returns [`SchedulerError::AlreadyRunning`] if already started.
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        // Fresh token so the scheduler can be restarted after a stop.
        self.cancellation_token = CancellationToken::new();
        let cancel = self.cancellation_token.clone();
        let states = Arc::clone(&self.states);
        let interval = self.config.interval;

        let handle = tokio::spawn(async move {
            sweep_loop(states, interval, cancel).await;
        });
        *self.task_handle.lock().await = Some(handle);

        info!(interval_secs = self.config.interval.as_secs(), "expiry sweeper started");
        Ok(())
    }

    /// Cancel the loop and await its completion.
    ///
    /// # Errors
    /// Returns [`SchedulerError::NotRunning`] if not started.
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        self.cancellation_token.cancel();
        if let Some(handle) = self.task_handle.lock().await.take() {
            let join_timeout = Duration::from_secs(5);
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|source| SchedulerError::Timeout { duration: join_timeout, source })??;
        }

        info!("expiry sweeper stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .map(|guard| guard.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(true)
    }
}

async fn sweep_loop(states: Arc<dyn StateStore>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately; skip it so start() is not a sweep.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // Log and keep ticking; a failed sweep is retried next round.
                if let Err(err) = states.purge_expired(Utc::now()).await {
                    error!(error = %err, "expiry sweep failed");
                }
            }
        }
    }
}
