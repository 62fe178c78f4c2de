// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Bearer token lifecycle
//!
//! The token is refreshed lazily: a valid cached token is reused, an
//! absent or expired one is exchanged for a new one right before the remote
//! call that needs it. There is no background renewal.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{CollectorConfig, Credentials};
use crate::error::{FleetError, Result};
use crate::transport::Transport;

/// A bearer token and when it was obtained
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    acquired_at: Instant,
}

impl CachedToken {
    fn is_valid(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.acquired_at) < ttl
    }
}

/// Obtains and caches the short-lived bearer token
pub struct TokenManager {
    credentials: Result<Credentials>,
    token_url: String,
    ttl: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenManager {
    /// Create a token manager from the collector configuration
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            credentials: config.credentials(),
            token_url: config.token_url.clone(),
            ttl: config.token_ttl(),
            cached: Mutex::new(None),
        }
    }

    /// Whether login and secret are usable
    pub fn is_configured(&self) -> bool {
        self.credentials.is_ok()
    }

    /// Token time-to-live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return a valid bearer token, exchanging credentials if needed.
    ///
    /// # Errors
    ///
    /// - [`FleetError::NotConfigured`] when credentials are missing; no
    ///   remote call is made.
    /// - [`FleetError::Auth`] when the exchange fails. It is not retried here.
    pub async fn valid_token(&self, transport: &dyn Transport) -> Result<String> {
        let credentials = self.credentials.as_ref().map_err(|e| e.clone())?;

        let mut cached = self.cached.lock().await;
        if let Some(ref token) = *cached {
            if token.is_valid(Instant::now(), self.ttl) {
                return Ok(token.access_token.clone());
            }
            log::debug!("Bearer token expired, refreshing");
        }

        let acquired_at = Instant::now();
        let access_token = self.exchange(credentials, transport).await?;
        *cached = Some(CachedToken {
            access_token: access_token.clone(),
            acquired_at,
        });
        log::info!("Obtained new bearer token (ttl {}s)", self.ttl.as_secs());
        Ok(access_token)
    }

    /// Drop the cached token so the next call re-authenticates
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn exchange(&self, credentials: &Credentials, transport: &dyn Transport) -> Result<String> {
        let form = vec![
            ("client_id".to_string(), credentials.client_id.clone()),
            ("client_secret".to_string(), credentials.client_secret.clone()),
            ("refresh_token".to_string(), credentials.refresh_token.clone()),
            ("grant_type".to_string(), "refresh_token".to_string()),
        ];

        let response = transport
            .post_form(&self.token_url, &form)
            .await
            .map_err(|e| FleetError::Auth(format!("token exchange failed: {}", e)))?;

        response
            .get("access_token")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| FleetError::Auth("token response has no access_token".to_string()))
    }
}
