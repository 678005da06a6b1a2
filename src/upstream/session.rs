//! Bearer-token session against the agent's watcher login endpoint.
//!
//! The token is cached behind an async mutex and handed out until either the
//! login-reported expiry passes or a caller reports an authorization failure
//! via [`UpstreamSession::invalidate`]. Concurrent callers that find the cache
//! empty queue on the mutex, so only one login is in flight at a time.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::UpstreamError;

/// Tokens are refreshed this long before the upstream-reported expiry.
const EXPIRY_SKEW_SECS: i64 = 10;

#[derive(Serialize)]
struct LoginRequest<'a> {
    machine_id: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
    expire: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(exp) => now + Duration::seconds(EXPIRY_SKEW_SECS) >= exp,
            None => false,
        }
    }
}

pub struct UpstreamSession {
    client: Client,
    login_url: String,
    machine_id: String,
    password: String,
    token: Mutex<Option<CachedToken>>,
}

impl UpstreamSession {
    pub fn new(client: Client, base_url: &str, machine_id: &str, password: &str) -> Self {
        Self {
            client,
            login_url: format!("{}/v1/watchers/login", base_url.trim_end_matches('/')),
            machine_id: machine_id.to_string(),
            password: password.to_string(),
            token: Mutex::new(None),
        }
    }

    /// Return the cached token, logging in first if there is none or it expired.
    pub async fn acquire(&self) -> Result<String, UpstreamError> {
        let mut guard = self.token.lock().await;

        if let Some(cached) = guard.as_ref() {
            if !cached.is_expired(Utc::now()) {
                return Ok(cached.value.clone());
            }
            debug!("cached upstream token expired");
        }

        let fresh = self.login().await?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        Ok(value)
    }

    /// Drop the cached token so the next [`acquire`](Self::acquire) logs in again.
    pub async fn invalidate(&self) {
        *self.token.lock().await = None;
    }

    async fn login(&self) -> Result<CachedToken, UpstreamError> {
        info!(machine_id = %self.machine_id, url = %self.login_url, "logging in to upstream agent");

        let resp = self
            .client
            .post(&self.login_url)
            .json(&LoginRequest {
                machine_id: &self.machine_id,
                password: &self.password,
            })
            .send()
            .await
            .map_err(|e| UpstreamError::Auth(format!("login request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Auth(format!("login rejected with {status}: {body}")));
        }

        let parsed: LoginResponse = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Auth(format!("unreadable login response: {e}")))?;

        let value = parsed
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| UpstreamError::Auth("login response carried no token".to_string()))?;

        let expires_at = parsed.expire.as_deref().and_then(|raw| {
            match DateTime::parse_from_rfc3339(raw) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(e) => {
                    warn!(expire = raw, error = %e, "ignoring unparseable token expiry");
                    None
                }
            }
        });

        info!(expires_at = ?expires_at, "upstream login succeeded");
        Ok(CachedToken { value, expires_at })
    }
}
