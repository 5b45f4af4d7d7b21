//! Integration tests for the rotation loop against an in-memory store.
//!
//! A scripted `Refresher` stands in for the network exchange. Like the real
//! client, it persists a rotated secret before reporting it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sessionkeeper_core::{
    CycleReport, RefreshError, RefreshOutcome, Refresher, RotationScheduler, SchedulerConfig,
    Session, SessionStore, Shutdown,
};

// =========================================================================
// Helpers
// =========================================================================

#[derive(Clone)]
enum Step {
    Rotate(&'static str),
    Reject,
    /// The store goes away mid-cycle, then the service rejects the session
    RejectDuringOutage,
    Fail,
    Panic,
    Hang,
}

#[derive(Clone)]
struct ScriptedRefresher {
    store: SessionStore,
    script: Arc<Mutex<HashMap<String, VecDeque<Step>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRefresher {
    fn new(store: SessionStore) -> Self {
        Self {
            store,
            script: Arc::default(),
            calls: Arc::default(),
        }
    }

    fn script(&self, session_id: &str, steps: &[Step]) {
        self.script
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .extend(steps.iter().cloned());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_step(&self, session_id: &str) -> Step {
        self.calls.lock().unwrap().push(session_id.to_string());
        let mut script = self.script.lock().unwrap();
        let step = script.get_mut(session_id).and_then(|steps| steps.pop_front());
        step.unwrap_or(Step::Fail)
    }
}

impl Refresher for ScriptedRefresher {
    async fn refresh(&self, session: &Session) -> RefreshOutcome {
        match self.next_step(&session.session_id) {
            Step::Rotate(secret) => {
                self.store
                    .upsert_session(&session.session_id, secret)
                    .await
                    .unwrap();
                RefreshOutcome::RotatedTo(secret.to_string())
            }
            Step::Reject => RefreshOutcome::AuthRejected,
            Step::RejectDuringOutage => {
                self.store.close().await;
                RefreshOutcome::AuthRejected
            }
            Step::Fail => RefreshOutcome::TransientFailure(RefreshError::Timeout),
            Step::Panic => panic!("scripted refresh panic"),
            Step::Hang => std::future::pending::<RefreshOutcome>().await,
        }
    }
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        cycle_interval: Duration::from_secs(3600),
        empty_backoff: Duration::from_millis(20),
        error_backoff: Duration::from_millis(20),
    }
}

async fn setup() -> (SessionStore, ScriptedRefresher, RotationScheduler<ScriptedRefresher>) {
    let store = SessionStore::in_memory().await.unwrap();
    let refresher = ScriptedRefresher::new(store.clone());
    let scheduler = RotationScheduler::new(store.clone(), refresher.clone(), fast_config());
    (store, refresher, scheduler)
}

/// Poll until `cond` holds, failing the test after two seconds.
async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =========================================================================
// Single cycles
// =========================================================================

#[tokio::test]
async fn test_empty_store_cycle_is_not_an_error() {
    let (_store, refresher, scheduler) = setup().await;
    let shutdown = Shutdown::new();

    let report = scheduler.run_cycle(&mut shutdown.listener()).await.unwrap();
    assert!(report.is_empty());
    assert_eq!(refresher.call_count(), 0);
}

#[tokio::test]
async fn test_successful_rotation_updates_secret() {
    let (store, refresher, scheduler) = setup().await;
    store.upsert_session("S1", "T1").await.unwrap();
    let before = store.get_session("S1").await.unwrap().unwrap().updated_at;
    refresher.script("S1", &[Step::Rotate("T2")]);

    let shutdown = Shutdown::new();
    let report = scheduler.run_cycle(&mut shutdown.listener()).await.unwrap();

    assert_eq!(report.rotated, 1);
    assert_eq!(store.get_active_secret("S1").await.unwrap().as_deref(), Some("T2"));
    let after = store.get_session("S1").await.unwrap().unwrap().updated_at;
    assert!(after > before);
}

#[tokio::test]
async fn test_auth_rejection_deactivates_until_upsert() {
    let (store, refresher, scheduler) = setup().await;
    store.upsert_session("S1", "T1").await.unwrap();
    refresher.script("S1", &[Step::Reject]);

    let shutdown = Shutdown::new();
    let report = scheduler.run_cycle(&mut shutdown.listener()).await.unwrap();
    assert_eq!(report.deactivated, 1);

    let active = store.list_active_sessions().await.unwrap();
    assert!(active.iter().all(|s| s.session_id != "S1"));
    assert_eq!(store.get_active_secret("S1").await.unwrap(), None);

    // Deactivated sessions are no longer rotated
    let report = scheduler.run_cycle(&mut shutdown.listener()).await.unwrap();
    assert!(report.is_empty());
    assert_eq!(refresher.call_count(), 1);

    // Only an explicit upsert brings it back
    store.upsert_session("S1", "T3").await.unwrap();
    let active = store.list_active_sessions().await.unwrap();
    assert_eq!(active, vec![Session::new("S1", "T3")]);
}

#[tokio::test]
async fn test_transient_failure_leaves_session_active() {
    let (store, refresher, scheduler) = setup().await;
    store.upsert_session("S1", "T1").await.unwrap();
    let before = store.get_session("S1").await.unwrap().unwrap();
    refresher.script("S1", &[Step::Fail]);

    let shutdown = Shutdown::new();
    let report = scheduler.run_cycle(&mut shutdown.listener()).await.unwrap();
    assert_eq!(report.failed, 1);

    let after = store.get_session("S1").await.unwrap().unwrap();
    assert!(after.active);
    assert_eq!(after.secret_token, "T1");
    assert_eq!(after.updated_at, before.updated_at);
}

#[tokio::test]
async fn test_one_session_failing_does_not_stop_others() {
    let (store, refresher, scheduler) = setup().await;
    store.upsert_session("A", "a1").await.unwrap();
    store.upsert_session("B", "b1").await.unwrap();
    store.upsert_session("C", "c1").await.unwrap();
    refresher.script("A", &[Step::Reject]);
    refresher.script("B", &[Step::Fail]);
    refresher.script("C", &[Step::Rotate("c2")]);

    let shutdown = Shutdown::new();
    let report = scheduler.run_cycle(&mut shutdown.listener()).await.unwrap();

    assert_eq!(report.sessions, 3);
    assert_eq!(report.deactivated, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.rotated, 1);

    let mut calls = refresher.calls();
    calls.sort();
    assert_eq!(calls, vec!["A", "B", "C"]);

    assert_eq!(store.get_active_secret("A").await.unwrap(), None);
    assert_eq!(store.get_active_secret("B").await.unwrap().as_deref(), Some("b1"));
    assert_eq!(store.get_active_secret("C").await.unwrap().as_deref(), Some("c2"));
}

#[tokio::test]
async fn test_storage_failure_fails_the_cycle() {
    let (store, _refresher, scheduler) = setup().await;
    store.close().await;

    let shutdown = Shutdown::new();
    assert!(scheduler.run_cycle(&mut shutdown.listener()).await.is_err());
}

#[tokio::test]
async fn test_failed_deactivation_counts_as_failure() {
    let dir = std::env::temp_dir().join(format!(
        "sessionkeeper-rotation-deactivate-{}",
        std::process::id()
    ));
    let url = format!("sqlite://{}/sessions.db", dir.display());
    let store = SessionStore::connect(&url).await.unwrap();
    store.upsert_session("S1", "T1").await.unwrap();
    store.upsert_session("S2", "U1").await.unwrap();

    let refresher = ScriptedRefresher::new(store.clone());
    refresher.script("S1", &[Step::RejectDuringOutage]);
    refresher.script("S2", &[Step::Fail]);
    let scheduler = RotationScheduler::new(store.clone(), refresher.clone(), fast_config());

    let shutdown = Shutdown::new();
    let report = scheduler.run_cycle(&mut shutdown.listener()).await.unwrap();

    // Both sessions were attempted; neither outcome stopped the cycle
    assert_eq!(
        report,
        CycleReport {
            sessions: 2,
            rotated: 0,
            deactivated: 0,
            failed: 2,
        }
    );
    assert_eq!(refresher.call_count(), 2);

    // The rejected session could not be deactivated, so it is still active
    let reopened = SessionStore::connect(&url).await.unwrap();
    assert_eq!(reopened.get_active_secret("S1").await.unwrap().as_deref(), Some("T1"));
    reopened.close().await;

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_shutdown_abandons_in_flight_refresh() {
    let (store, refresher, scheduler) = setup().await;
    store.upsert_session("S1", "T1").await.unwrap();
    refresher.script("S1", &[Step::Hang]);

    let shutdown = Shutdown::new();
    let mut listener = shutdown.listener();
    let (report, _) = tokio::join!(scheduler.run_cycle(&mut listener), async {
        eventually(|| refresher.call_count() == 1).await;
        shutdown.trigger();
    });

    let report = report.unwrap();
    assert_eq!(report.sessions, 1);
    assert_eq!(report.processed(), 0);
    assert_eq!(store.get_active_secret("S1").await.unwrap().as_deref(), Some("T1"));
}

// =========================================================================
// The long-running loop
// =========================================================================

#[tokio::test]
async fn test_empty_store_backs_off_then_picks_up_sessions() {
    let (store, refresher, scheduler) = setup().await;
    refresher.script("S1", &[Step::Rotate("T2")]);
    let shutdown = Shutdown::new();

    let ((), ()) = tokio::join!(scheduler.run(shutdown.listener()), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.upsert_session("S1", "T1").await.unwrap();

        // Found on an empty-backoff wake, long before the hour-long cycle interval
        eventually(|| refresher.call_count() == 1).await;
        shutdown.trigger();
    });

    assert_eq!(store.get_active_secret("S1").await.unwrap().as_deref(), Some("T2"));
}

#[tokio::test]
async fn test_shutdown_interrupts_cycle_sleep() {
    let (store, refresher, scheduler) = setup().await;
    store.upsert_session("S1", "T1").await.unwrap();
    refresher.script("S1", &[Step::Rotate("T2")]);
    let shutdown = Shutdown::new();

    let stopped = tokio::time::timeout(Duration::from_secs(2), async {
        tokio::join!(scheduler.run(shutdown.listener()), async {
            eventually(|| refresher.call_count() == 1).await;
            // Now sleeping out the hour-long cycle interval
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.trigger();
        })
    })
    .await;

    assert!(stopped.is_ok());
    assert_eq!(refresher.call_count(), 1);
}

#[tokio::test]
async fn test_panic_in_cycle_is_contained() {
    let (store, refresher, scheduler) = setup().await;
    store.upsert_session("S1", "T1").await.unwrap();
    refresher.script("S1", &[Step::Panic, Step::Rotate("T2")]);
    let shutdown = Shutdown::new();

    tokio::join!(scheduler.run(shutdown.listener()), async {
        // Second attempt comes after the short error backoff
        eventually(|| refresher.call_count() == 2).await;
        shutdown.trigger();
    });

    assert_eq!(store.get_active_secret("S1").await.unwrap().as_deref(), Some("T2"));
}

#[tokio::test]
async fn test_storage_outage_does_not_end_loop() {
    let (store, _refresher, scheduler) = setup().await;
    store.close().await;
    let shutdown = Shutdown::new();

    let stopped = tokio::time::timeout(Duration::from_secs(2), async {
        tokio::join!(scheduler.run(shutdown.listener()), async {
            // Several error-backoff rounds go by without the loop exiting
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown.trigger();
        })
    })
    .await;

    assert!(stopped.is_ok());
}

#[tokio::test]
async fn test_already_stopped_scheduler_does_nothing() {
    let (store, refresher, scheduler) = setup().await;
    store.upsert_session("S1", "T1").await.unwrap();
    let shutdown = Shutdown::new();
    shutdown.trigger();

    scheduler.run(shutdown.listener()).await;
    assert_eq!(refresher.call_count(), 0);
}
