//! Client side of the intrusion-detection agent's local API.

pub mod fetcher;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use self::fetcher::AlertFetcher;
use self::session::UpstreamSession;
use crate::config::UpstreamConfig;

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Login rejected, unreachable, or answered without a token.
    #[error("upstream authentication failed: {0}")]
    Auth(String),
    /// A request carrying the token was refused.
    #[error("upstream refused the token (HTTP {0})")]
    Unauthorized(u16),
    #[error("alert fetch failed: {0}")]
    Fetch(String),
}

/// Somewhere the sync loop can pull raw alerts from.
#[async_trait::async_trait]
pub trait AlertSource: Send + Sync {
    /// Establish credentials before the first pull.
    async fn authenticate(&self) -> Result<(), UpstreamError>;

    /// Pull one batch of raw alerts.
    async fn pull(&self) -> Result<Vec<Value>, UpstreamError>;
}

/// [`AlertSource`] backed by the agent's HTTP API.
pub struct LapiSource {
    session: UpstreamSession,
    fetcher: AlertFetcher,
}

impl LapiSource {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("sentinel-backend/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build upstream HTTP client")?;

        Ok(Self {
            session: UpstreamSession::new(
                client.clone(),
                &config.base_url,
                &config.machine_id,
                &config.password,
            ),
            fetcher: AlertFetcher::new(client, &config.base_url),
        })
    }
}

#[async_trait::async_trait]
impl AlertSource for LapiSource {
    async fn authenticate(&self) -> Result<(), UpstreamError> {
        self.session.acquire().await.map(|_| ())
    }

    /// One immediate re-login on an authorization failure, no further retries.
    async fn pull(&self) -> Result<Vec<Value>, UpstreamError> {
        let token = self.session.acquire().await?;
        match self.fetcher.fetch(&token).await {
            Err(UpstreamError::Unauthorized(status)) => {
                warn!(status, "upstream token refused, logging in again");
                self.session.invalidate().await;

                let token = self.session.acquire().await?;
                match self.fetcher.fetch(&token).await {
                    Err(UpstreamError::Unauthorized(status)) => {
                        self.session.invalidate().await;
                        Err(UpstreamError::Auth(format!(
                            "fresh token refused by alert listing (HTTP {status})"
                        )))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::mock::{spawn_lapi, MockLapi};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn source(base_url: &str) -> LapiSource {
        let config = UpstreamConfig {
            base_url: base_url.to_string(),
            machine_id: "backend".to_string(),
            password: "secret".to_string(),
            timeout_secs: 5,
        };
        LapiSource::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_pull_reuses_token_across_cycles() {
        let mock = MockLapi {
            alerts: json!([{"uuid": "a"}]),
            ..Default::default()
        };
        let (base_url, lapi) = spawn_lapi(mock).await;
        let source = source(&base_url);

        source.authenticate().await.unwrap();
        assert_eq!(source.pull().await.unwrap().len(), 1);
        assert_eq!(source.pull().await.unwrap().len(), 1);
        assert_eq!(lapi.logins.load(Ordering::SeqCst), 1);
        assert_eq!(lapi.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pull_relogs_once_on_401() {
        let mock = MockLapi {
            alerts: json!([{"uuid": "a"}]),
            reject_fetches: AtomicUsize::new(1),
            ..Default::default()
        };
        let (base_url, lapi) = spawn_lapi(mock).await;
        let source = source(&base_url);

        assert_eq!(source.pull().await.unwrap().len(), 1);
        assert_eq!(lapi.logins.load(Ordering::SeqCst), 2);
        assert_eq!(lapi.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pull_gives_up_after_second_401() {
        let mock = MockLapi {
            reject_fetches: AtomicUsize::new(5),
            ..Default::default()
        };
        let (base_url, lapi) = spawn_lapi(mock).await;
        let source = source(&base_url);

        let err = source.pull().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Auth(_)));
        assert_eq!(lapi.logins.load(Ordering::SeqCst), 2);
        assert_eq!(lapi.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_auth_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = source(&format!("http://{addr}")).authenticate().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Auth(_)));
    }
}
