//! Headless JSON control API: start and stop scans, watch progress, read
//! and clear discovered servers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    config::{validate_concurrency, validate_timeout, ScanConfig},
    error::{ConfigError, ScanError},
    ranges,
    scanner::Scanner,
    types::ScanProgress,
};

#[derive(Clone)]
pub struct AppState {
    scanner: Arc<Scanner>,
    defaults: Arc<ScanConfig>,
}

impl AppState {
    pub fn new(scanner: Arc<Scanner>, defaults: ScanConfig) -> Self {
        Self {
            scanner,
            defaults: Arc::new(defaults),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Status {
    pub state: String, // "idle" | "running"
    #[serde(flatten)]
    pub progress: ScanProgress,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub ranges: Vec<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Scan ranges that fail the safety check. The target ceiling still applies.
    #[serde(default)]
    pub allow_unsafe: bool,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/stop", post(post_stop))
        .route("/servers", get(get_servers).delete(delete_servers))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind control API on {bind}"))?;
    info!("control API listening on http://{}", bind);
    axum::serve(listener, router(state))
        .await
        .context("control API server failed")?;
    Ok(())
}

fn status_of(scanner: &Scanner) -> Status {
    Status {
        state: if scanner.is_scanning() { "running" } else { "idle" }.into(),
        progress: scanner.progress(),
    }
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(status_of(&app.scanner)))
}

async fn get_servers(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.scanner.get_servers()))
}

async fn delete_servers(State(app): State<AppState>) -> impl IntoResponse {
    app.scanner.clear_servers();
    StatusCode::NO_CONTENT
}

async fn post_stop(State(app): State<AppState>) -> impl IntoResponse {
    app.scanner.stop();
    (StatusCode::ACCEPTED, Json(status_of(&app.scanner)))
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    let bad_request = |msg: String| (StatusCode::BAD_REQUEST, msg).into_response();

    if req.ranges.is_empty() {
        return bad_request("no ranges given".to_string());
    }
    let ports = if req.ports.is_empty() {
        app.defaults.ports.clone()
    } else {
        req.ports
    };
    if ports.contains(&0) {
        return bad_request(ConfigError::InvalidPort(0).to_string());
    }
    let concurrency = req.concurrency.unwrap_or(app.defaults.concurrency);
    let timeout = req
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(app.defaults.timeout);
    if let Err(e) = validate_concurrency(concurrency).and_then(|_| validate_timeout(timeout)) {
        return bad_request(e.to_string());
    }

    let mut total_targets = 0u64;
    for r in &req.ranges {
        match ranges::vet(r, &ports, req.allow_unsafe) {
            Ok(n) => total_targets += n,
            Err(e) => return bad_request(e.to_string()),
        }
    }
    if total_targets > ranges::MAX_TARGETS {
        let e = ConfigError::TooManyTargets {
            count: total_targets,
            max: ranges::MAX_TARGETS,
        };
        return bad_request(e.to_string());
    }

    // Claim the run before answering so a concurrent request sees 409.
    let reservation = match app.scanner.reserve() {
        Ok(r) => r,
        Err(ScanError::AlreadyRunning) => {
            return (StatusCode::CONFLICT, "a scan is already running".to_string()).into_response()
        }
        Err(e) => return bad_request(e.to_string()),
    };

    info!(ranges = req.ranges.len(), targets = total_targets, "scan requested");
    let ranges = req.ranges;
    tokio::spawn(async move {
        match reservation
            .scan_multiple_ranges(&ranges, &ports, concurrency, timeout)
            .await
        {
            Ok(outcomes) => info!(ranges = outcomes.len(), "requested scan finished"),
            Err(e) => error!(error = %e, "requested scan failed"),
        }
    });

    (StatusCode::ACCEPTED, Json(status_of(&app.scanner))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<Scanner>) {
        let scanner = Arc::new(Scanner::default());
        let state = AppState::new(scanner.clone(), ScanConfig::default());
        (router(state), scanner)
    }

    #[tokio::test]
    async fn status_starts_idle() {
        let (app, _) = app();
        let res = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let status: Status = serde_json::from_slice(&body).unwrap();
        assert_eq!(status.state, "idle");
        assert_eq!(status.progress.total, 0);
    }

    #[tokio::test]
    async fn scan_rejects_bad_range() {
        let (app, _) = app();
        let req = Request::post("/api/scan")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"ranges":["1.2.3.4/99"]}"#))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn scan_rejects_zero_concurrency() {
        let (app, scanner) = app();
        let req = Request::post("/api/scan")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"ranges":["203.0.113.0/30"],"concurrency":0}"#))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(!scanner.is_scanning());
    }

    async fn post_scan_status(app: &Router, body: String) -> StatusCode {
        let req = Request::post("/api/scan")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        app.clone().oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn scan_rejects_unsafe_ranges() {
        let (app, scanner) = app();
        for range in ["0.0.0.0/0", "10.0.0.0/8", "127.0.0.1"] {
            let body = format!(r#"{{"ranges":["{range}"]}}"#);
            assert_eq!(post_scan_status(&app, body).await, StatusCode::BAD_REQUEST, "{range}");
        }
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn allow_unsafe_still_caps_target_count() {
        let (app, scanner) = app();
        let body = r#"{"ranges":["0.0.0.0/0"],"allow_unsafe":true}"#.to_string();
        assert_eq!(post_scan_status(&app, body).await, StatusCode::BAD_REQUEST);

        // Each range is small enough, together they are not.
        let ranges: Vec<String> = (0..=128).map(|i| format!("\"{i}.0.0.0/16\"")).collect();
        let body = format!(
            r#"{{"ranges":[{}],"ports":[25565,25566],"allow_unsafe":true}}"#,
            ranges.join(",")
        );
        assert_eq!(post_scan_status(&app, body).await, StatusCode::BAD_REQUEST);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn scan_rejects_port_zero() {
        let (app, scanner) = app();
        let body = r#"{"ranges":["203.0.113.0/30"],"ports":[25565,0]}"#.to_string();
        assert_eq!(post_scan_status(&app, body).await, StatusCode::BAD_REQUEST);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn scan_conflicts_with_a_reserved_run() {
        let (app, scanner) = app();
        let held = scanner.reserve().unwrap();
        let body = r#"{"ranges":["203.0.113.0/30"]}"#.to_string();
        assert_eq!(post_scan_status(&app, body).await, StatusCode::CONFLICT);
        drop(held);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn accepted_scan_is_running_before_the_reply() {
        let (app, scanner) = app();
        // Accepts connections through the backlog but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let body = format!(
            r#"{{"ranges":["127.0.0.1/32"],"ports":[{port}],"allow_unsafe":true,"concurrency":1,"timeout_ms":5000}}"#
        );

        assert_eq!(post_scan_status(&app, body.clone()).await, StatusCode::ACCEPTED);
        assert!(scanner.is_scanning());
        assert_eq!(post_scan_status(&app, body).await, StatusCode::CONFLICT);
        scanner.stop();
    }

    #[tokio::test]
    async fn delete_clears_servers() {
        let (app, scanner) = app();
        let res = app
            .oneshot(Request::delete("/api/servers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(scanner.get_servers().is_empty());
    }
}
