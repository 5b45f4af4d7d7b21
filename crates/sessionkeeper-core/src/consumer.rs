//! Read-only session access for services that authenticate with a session.
//!
//! A consumer does not care which session it gets. It picks any active one at
//! startup, tolerates there being none yet, and re-reads the store when its
//! own calls are rejected. It never writes to the store.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::StorageError;
use crate::session::Session;
use crate::shutdown::ShutdownListener;
use crate::store::SessionStore;

/// Health snapshot suitable for a `/health` endpoint
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Health {
    pub status: &'static str,
    pub client_initialized: bool,
}

pub struct SessionConsumer {
    store: SessionStore,
    current: RwLock<Option<Session>>,
}

impl SessionConsumer {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            current: RwLock::new(None),
        }
    }

    /// Pick an active session from the store.
    ///
    /// Returns `Ok(false)` when none exists; the consumer stays uninitialized
    /// and a later [`ensure_ready`](Self::ensure_ready) tries again.
    pub async fn init(&self) -> Result<bool, StorageError> {
        match self.store.pick_active_session().await? {
            Some(session) => {
                info!(session = %session.short_id(), "Consumer initialized with session");
                *self.current.write().await = Some(session);
                Ok(true)
            }
            None => {
                warn!("No active session available, deferring initialization");
                *self.current.write().await = None;
                Ok(false)
            }
        }
    }

    /// The held session, initializing from the store first if needed.
    pub async fn ensure_ready(&self) -> Result<Option<Session>, StorageError> {
        if let Some(session) = self.current().await {
            return Ok(Some(session));
        }
        self.init().await?;
        Ok(self.current().await)
    }

    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    /// Forget the held session, e.g. after the service rejected it.
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }

    /// Poll the store until an active session appears or shutdown fires.
    pub async fn wait_ready(
        &self,
        poll_interval: Duration,
        mut shutdown: ShutdownListener,
    ) -> Option<Session> {
        loop {
            match self.ensure_ready().await {
                Ok(Some(session)) => return Some(session),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "Failed to read sessions"),
            }
            if !shutdown.sleep(poll_interval).await {
                return None;
            }
        }
    }

    pub async fn health(&self) -> Health {
        Health {
            status: "ok",
            client_initialized: self.current.read().await.is_some(),
        }
    }
}
