//! Explicit handle over the process-wide resources.
//!
//! The store pool and the rotation HTTP client are created once by
//! [`KeeperContext::open`] and released by [`KeeperContext::close`].
//! Components receive clones; nothing is initialized lazily.

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::consumer::SessionConsumer;
use crate::refresh::RefreshClient;
use crate::scheduler::{RotationScheduler, SchedulerConfig};
use crate::session::Session;
use crate::store::SessionStore;

/// Clone is cheap - the pool and the HTTP client are shared.
#[derive(Clone)]
pub struct KeeperContext {
    store: SessionStore,
    refresh_client: RefreshClient,
    scheduler_config: SchedulerConfig,
}

impl KeeperContext {
    pub async fn open(config: &Config) -> Result<Self> {
        let database_url = config.database_url()?;
        let store = SessionStore::connect(&database_url)
            .await
            .context("Failed to open session store")?;

        let refresh_client = RefreshClient::new(
            store.clone(),
            config.rotate_url.clone(),
            config.proxy.as_deref(),
            config.request_timeout(),
        )?;

        Ok(Self::from_parts(store, refresh_client, config.scheduler_config()))
    }

    pub fn from_parts(
        store: SessionStore,
        refresh_client: RefreshClient,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            refresh_client,
            scheduler_config,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn refresh_client(&self) -> &RefreshClient {
        &self.refresh_client
    }

    /// Apply the startup session pair, if one was supplied.
    pub async fn bootstrap(&self, session: Option<&Session>) -> Result<bool> {
        let Some(session) = session else {
            return Ok(false);
        };
        info!(session = %session.short_id(), "Found initial session, upserting to store");
        self.store
            .upsert_session(&session.session_id, &session.secret_token)
            .await
            .context("Failed to store initial session")?;
        Ok(true)
    }

    pub fn scheduler(&self) -> RotationScheduler<RefreshClient> {
        RotationScheduler::new(
            self.store.clone(),
            self.refresh_client.clone(),
            self.scheduler_config,
        )
    }

    pub fn consumer(&self) -> SessionConsumer {
        SessionConsumer::new(self.store.clone())
    }

    pub async fn close(self) {
        self.store.close().await;
    }
}
