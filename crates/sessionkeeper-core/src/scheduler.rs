//! The rotation loop.
//!
//! Each cycle lists the active sessions and rotates them one at a time:
//!
//! ```text
//! list_active_sessions()
//!     │ empty ───────────────────────────────→ sleep(empty_backoff)
//!     ▼
//! for each session: refresh()
//!     RotatedTo        → already persisted, log
//!     AuthRejected     → deactivate_session()
//!     TransientFailure → log, leave active
//!     ▼
//! sleep(cycle_interval)
//! ```
//!
//! A failed or panicking cycle is logged and followed by `error_backoff`; the
//! loop only ends when its [`ShutdownListener`] fires.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::StorageError;
use crate::refresh::{RefreshOutcome, Refresher};
use crate::session::Session;
use crate::shutdown::ShutdownListener;
use crate::store::SessionStore;

/// Pause between completed cycles
pub const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 600;

/// Pause when there is nothing to rotate
pub const DEFAULT_EMPTY_BACKOFF_SECS: u64 = 60;

/// Pause after a cycle failed outright
pub const DEFAULT_ERROR_BACKOFF_SECS: u64 = 60;

/// Fixed loop intervals; none of them grow on repeated failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub cycle_interval: Duration,
    pub empty_backoff: Duration,
    pub error_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(DEFAULT_CYCLE_INTERVAL_SECS),
            empty_backoff: Duration::from_secs(DEFAULT_EMPTY_BACKOFF_SECS),
            error_backoff: Duration::from_secs(DEFAULT_ERROR_BACKOFF_SECS),
        }
    }
}

/// Tally of one pass over the active sessions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Active sessions found at the start of the cycle
    pub sessions: usize,
    pub rotated: usize,
    pub deactivated: usize,
    pub failed: usize,
}

impl CycleReport {
    pub fn is_empty(&self) -> bool {
        self.sessions == 0
    }

    /// Sessions that got an outcome before the cycle ended
    pub fn processed(&self) -> usize {
        self.rotated + self.deactivated + self.failed
    }
}

pub struct RotationScheduler<R> {
    store: SessionStore,
    refresher: R,
    config: SchedulerConfig,
}

impl<R: Refresher> RotationScheduler<R> {
    pub fn new(store: SessionStore, refresher: R, config: SchedulerConfig) -> Self {
        Self {
            store,
            refresher,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Rotate every active session once, sequentially.
    ///
    /// Only listing the sessions can fail the cycle; per-session problems are
    /// counted in the report and never stop the remaining sessions.
    pub async fn run_cycle(
        &self,
        shutdown: &mut ShutdownListener,
    ) -> Result<CycleReport, StorageError> {
        let sessions = self.store.list_active_sessions().await?;
        let mut report = CycleReport {
            sessions: sessions.len(),
            ..CycleReport::default()
        };

        for session in &sessions {
            info!(session = %session.short_id(), "Rotating session");

            let Some(outcome) = shutdown
                .run_until_triggered(self.refresher.refresh(session))
                .await
            else {
                info!(
                    remaining = sessions.len() - report.processed(),
                    "Shutdown requested, abandoning cycle"
                );
                break;
            };

            self.apply_outcome(session, outcome, &mut report).await;
        }

        Ok(report)
    }

    async fn apply_outcome(&self, session: &Session, outcome: RefreshOutcome, report: &mut CycleReport) {
        let short_id = session.short_id();
        match outcome {
            RefreshOutcome::RotatedTo(_) => {
                info!(session = %short_id, "Rotated session secret");
                report.rotated += 1;
            }
            RefreshOutcome::AuthRejected => {
                error!(session = %short_id, "Session rejected by service, deactivating");
                match self.store.deactivate_session(&session.session_id).await {
                    Ok(_) => report.deactivated += 1,
                    Err(err) => {
                        error!(session = %short_id, error = %err, "Failed to deactivate session");
                        report.failed += 1;
                    }
                }
            }
            RefreshOutcome::TransientFailure(err) => {
                warn!(session = %short_id, error = %err, "Failed to rotate session, will retry next cycle");
                report.failed += 1;
            }
        }
    }

    /// Run cycles until shutdown. Never returns early on error.
    pub async fn run(&self, mut shutdown: ShutdownListener) {
        info!(
            cycle_secs = self.config.cycle_interval.as_secs(),
            "Rotation scheduler started"
        );

        while !shutdown.is_triggered() {
            let cycle = AssertUnwindSafe(self.run_cycle(&mut shutdown))
                .catch_unwind()
                .await;

            let pause = match cycle {
                Ok(Ok(report)) if report.is_empty() => {
                    warn!("No active sessions found. Waiting...");
                    self.config.empty_backoff
                }
                Ok(Ok(report)) => {
                    info!(
                        rotated = report.rotated,
                        deactivated = report.deactivated,
                        failed = report.failed,
                        "Rotation cycle complete"
                    );
                    self.config.cycle_interval
                }
                Ok(Err(err)) => {
                    error!(error = %err, "Rotation cycle failed");
                    self.config.error_backoff
                }
                Err(panic) => {
                    error!(error = %panic_message(panic.as_ref()), "Unexpected error in rotation loop");
                    self.config.error_backoff
                }
            };

            if !shutdown.sleep(pause).await {
                break;
            }
        }

        info!("Rotation scheduler stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
