//! The rotation exchange.
//!
//! One POST to the rotation endpoint per session, presenting the session's
//! cookie pair. The response is classified into a closed set of outcomes:
//!
//! - 2xx with a fresh `__Secure-1PSIDTS` cookie: the new secret is persisted,
//!   then `RotatedTo` is returned
//! - 401: `AuthRejected`, the only outcome that deactivates a session
//! - anything else (other statuses, timeouts, transport errors, a 2xx without
//!   a new secret): `TransientFailure`, no store mutation

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, redirect, Client, StatusCode};
use tracing::debug;

use crate::error::RefreshError;
use crate::session::Session;
use crate::store::SessionStore;

// ============================================================================
// Constants
// ============================================================================

/// Default rotation endpoint
pub const DEFAULT_ROTATE_URL: &str = "https://accounts.google.com/RotateCookies";

/// Cookie carrying the stable session id
pub const SESSION_COOKIE: &str = "__Secure-1PSID";

/// Cookie carrying the rotating secret
pub const SECRET_COOKIE: &str = "__Secure-1PSIDTS";

/// Fixed request body expected by the rotation endpoint
const ROTATE_BODY: &str = r#"[000,"-0000000000000000000"]"#;

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Result of one rotation attempt.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// The secret was rotated and the new value is already stored.
    RotatedTo(String),
    /// The service no longer honors this session.
    AuthRejected,
    /// Anything else; the session stays active for the next cycle.
    TransientFailure(RefreshError),
}

/// Performs a rotation for one session.
pub trait Refresher {
    fn refresh(&self, session: &Session) -> impl Future<Output = RefreshOutcome> + Send;
}

/// Rotation client. Clone is cheap - reqwest::Client and the store pool are shared.
#[derive(Clone)]
pub struct RefreshClient {
    client: Client,
    store: SessionStore,
    rotate_url: String,
}

impl RefreshClient {
    pub fn new(
        store: SessionStore,
        rotate_url: impl Into<String>,
        proxy: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        // Redirects count as non-success, like any other non-2xx status
        let mut builder = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none());

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .with_context(|| format!("Invalid proxy URL: {}", proxy))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().context("Failed to build rotation HTTP client")?;

        Ok(Self {
            client,
            store,
            rotate_url: rotate_url.into(),
        })
    }

    pub fn rotate_url(&self) -> &str {
        &self.rotate_url
    }

    fn cookie_header(session: &Session) -> Result<header::HeaderValue, RefreshError> {
        let value = format!(
            "{}={}; {}={}",
            SESSION_COOKIE, session.session_id, SECRET_COOKIE, session.secret_token
        );
        header::HeaderValue::from_str(&value)
            .map_err(|_| RefreshError::InvalidCredential("cookie contains invalid characters".into()))
    }

    /// Send the rotation request and return the new secret, if one was issued.
    async fn exchange(&self, session: &Session) -> Result<Option<String>, ExchangeError> {
        let response = self
            .client
            .post(&self.rotate_url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::COOKIE, Self::cookie_header(session)?)
            .body(ROTATE_BODY)
            .send()
            .await
            .map_err(RefreshError::from_transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ExchangeError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::from_status(status, &body).into());
        }

        let secret = response
            .cookies()
            .find(|c| c.name() == SECRET_COOKIE && !c.value().is_empty())
            .map(|c| c.value().to_string());
        Ok(secret)
    }
}

enum ExchangeError {
    Unauthorized,
    Failed(RefreshError),
}

impl From<RefreshError> for ExchangeError {
    fn from(err: RefreshError) -> Self {
        ExchangeError::Failed(err)
    }
}

impl Refresher for RefreshClient {
    async fn refresh(&self, session: &Session) -> RefreshOutcome {
        debug!(session = %session.short_id(), url = %self.rotate_url, "Sending rotation request");

        let new_secret = match self.exchange(session).await {
            Ok(Some(secret)) => secret,
            Ok(None) => return RefreshOutcome::TransientFailure(RefreshError::MissingSecret),
            Err(ExchangeError::Unauthorized) => return RefreshOutcome::AuthRejected,
            Err(ExchangeError::Failed(err)) => return RefreshOutcome::TransientFailure(err),
        };

        // Persist before reporting, so the store already reflects the rotation
        // even if the caller never observes the result.
        if let Err(err) = self
            .store
            .upsert_session(&session.session_id, &new_secret)
            .await
        {
            return RefreshOutcome::TransientFailure(err.into());
        }

        RefreshOutcome::RotatedTo(new_secret)
    }
}

// ============================================================================
// Tests
// ============================================================================
