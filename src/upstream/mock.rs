//! In-process stand-in for the agent API, served on an ephemeral port.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

pub struct MockLapi {
    pub accept_login: bool,
    pub omit_token: bool,
    pub expire: Option<String>,
    pub alerts: Value,
    pub fail_alerts: bool,
    /// Answer this many alert listings with 401 regardless of the token.
    pub reject_fetches: AtomicUsize,
    pub logins: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl Default for MockLapi {
    fn default() -> Self {
        Self {
            accept_login: true,
            omit_token: false,
            expire: None,
            alerts: json!([]),
            fail_alerts: false,
            reject_fetches: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }
}

pub async fn spawn_lapi(mock: MockLapi) -> (String, Arc<MockLapi>) {
    let lapi = Arc::new(mock);
    let app = Router::new()
        .route("/v1/watchers/login", post(login))
        .route("/v1/alerts", get(alerts))
        .with_state(lapi.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), lapi)
}

async fn login(State(lapi): State<Arc<MockLapi>>, Json(body): Json<Value>) -> Response {
    let n = lapi.logins.fetch_add(1, Ordering::SeqCst) + 1;
    let has_credentials = body.get("machine_id").is_some() && body.get("password").is_some();
    if !lapi.accept_login || !has_credentials {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "invalid machine credentials"})),
        )
            .into_response();
    }
    if lapi.omit_token {
        return Json(json!({"code": 200})).into_response();
    }
    Json(json!({"code": 200, "token": format!("tok-{n}"), "expire": lapi.expire})).into_response()
}

async fn alerts(State(lapi): State<Arc<MockLapi>>, headers: HeaderMap) -> Response {
    lapi.fetches.fetch_add(1, Ordering::SeqCst);

    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer tok-"));
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let rejected = lapi
        .reject_fetches
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if rejected {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    if lapi.fail_alerts {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(lapi.alerts.clone()).into_response()
}
