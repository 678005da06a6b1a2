//! Authenticated read of the agent's alert listing.

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::UpstreamError;

pub struct AlertFetcher {
    client: Client,
    alerts_url: String,
}

impl AlertFetcher {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            alerts_url: format!("{}/v1/alerts", base_url.trim_end_matches('/')),
        }
    }

    /// Fetch one batch of raw alerts. Pagination is not followed.
    pub async fn fetch(&self, token: &str) -> Result<Vec<Value>, UpstreamError> {
        let resp = self
            .client
            .get(&self.alerts_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| UpstreamError::Fetch(format!("request to {} failed: {e}", self.alerts_url)))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(UpstreamError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(UpstreamError::Fetch(format!(
                "{} returned {status}",
                self.alerts_url
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Fetch(format!("unreadable alert listing: {e}")))?;

        let batch = into_batch(body)?;
        debug!(count = batch.len(), "fetched upstream alerts");
        Ok(batch)
    }
}

/// The listing is normally an array; the agent answers `null` when it has no
/// alerts.
fn into_batch(body: Value) -> Result<Vec<Value>, UpstreamError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        obj @ Value::Object(_) => Ok(vec![obj]),
        other => Err(UpstreamError::Fetch(format!(
            "unexpected alert listing body: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::mock::{spawn_lapi, MockLapi};
    use serde_json::json;

    #[test]
    fn test_into_batch_shapes() {
        assert_eq!(into_batch(json!([{"id": 1}, {"id": 2}])).unwrap().len(), 2);
        assert!(into_batch(json!(null)).unwrap().is_empty());
        assert_eq!(into_batch(json!({"id": 1})).unwrap().len(), 1);
        assert!(matches!(into_batch(json!("oops")), Err(UpstreamError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_fetch_with_valid_token() {
        let mock = MockLapi {
            alerts: json!([{"uuid": "a"}, {"uuid": "b"}]),
            ..Default::default()
        };
        let (base_url, _lapi) = spawn_lapi(mock).await;
        let fetcher = AlertFetcher::new(Client::new(), &base_url);

        let batch = fetcher.fetch("tok-1").await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_with_bad_token_is_unauthorized() {
        let (base_url, _lapi) = spawn_lapi(MockLapi::default()).await;
        let fetcher = AlertFetcher::new(Client::new(), &base_url);

        let err = fetcher.fetch("forged").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Unauthorized(401)));
    }

    #[tokio::test]
    async fn test_fetch_server_error() {
        let mock = MockLapi {
            fail_alerts: true,
            ..Default::default()
        };
        let (base_url, _lapi) = spawn_lapi(mock).await;
        let fetcher = AlertFetcher::new(Client::new(), &base_url);

        let err = fetcher.fetch("tok-1").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Fetch(_)));
    }
}
