//! HTTP surface for classifier pipelines and the crew console.
//!
//! This module provides an HTTP server that:
//! - Accepts classifier output via POST /observations
//! - Lists and acknowledges critical issues
//! - Serves well-being reports as JSON or text
//!
//! # Architecture
//!
//! ```text
//! FER / SER pipelines ──→ POST /observations ──→ MonitorSession ──→ ground control
//!                                                      ↑
//! Crew console ──→ GET /issues, POST /issues/:id/ack, GET /report
//! ```

use crate::core::issue::{CriticalIssue, TimeWindow};
use crate::core::report::WellBeingReport;
use crate::error::MonitorError;
use crate::ingest::{Observation, RawObservation};
use crate::session::MonitorSession;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    pub session: Arc<MonitorSession>,
}

impl ServerConfig {
    pub fn new(port: u16, session: Arc<MonitorSession>) -> Self {
        Self { port, session }
    }
}

struct ServerState {
    session: Arc<MonitorSession>,
    tz: chrono_tz::Tz,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub session_active: bool,
}

/// Response from the observation endpoint
#[derive(Serialize)]
pub struct IngestResponse {
    pub status: String,
    pub observation: Observation,
    pub open_issues: usize,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(error: MonitorError) -> ApiError {
    let (status, code) = match &error {
        MonitorError::InvalidLabel { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_LABEL"),
        MonitorError::InvalidConfidence(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_CONFIDENCE"),
        MonitorError::OutOfOrderObservation { .. } => (StatusCode::CONFLICT, "OUT_OF_ORDER"),
        MonitorError::UnknownIssue(_) => (StatusCode::NOT_FOUND, "UNKNOWN_ISSUE"),
        MonitorError::SessionInactive => (StatusCode::SERVICE_UNAVAILABLE, "SESSION_INACTIVE"),
        MonitorError::EmptyHistory => (StatusCode::NOT_FOUND, "EMPTY_HISTORY"),
        MonitorError::RetentionTooShort { .. }
        | MonitorError::InvalidConfig(_)
        | MonitorError::WorkerSpawn { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

/// GET /health
async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        session_active: state.session.is_active(),
    })
}

/// POST /observations
async fn ingest(
    State(state): State<Arc<ServerState>>,
    Json(raw): Json<RawObservation>,
) -> Result<Json<IngestResponse>, ApiError> {
    let observation = state.session.ingest_raw(&raw).map_err(api_error)?;
    Ok(Json(IngestResponse {
        status: "ok".to_string(),
        observation,
        open_issues: state.session.get_open_issues().len(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct IssueQuery {
    /// Only unacknowledged issues
    #[serde(default)]
    open: bool,
    /// Only issues ground control has not confirmed
    #[serde(default)]
    unreported: bool,
    since: Option<DateTime<Utc>>,
}

/// GET /issues
async fn list_issues(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<IssueQuery>,
) -> Json<Vec<CriticalIssue>> {
    let mut issues = match query.since {
        Some(since) => state.session.issue_history(since),
        None => state.session.issues(),
    };
    if query.open {
        issues.retain(CriticalIssue::is_open);
    }
    if query.unreported {
        issues.retain(|issue| !issue.reported);
    }
    Json(issues)
}

/// POST /issues/:id/ack
async fn ack_issue(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CriticalIssue>, ApiError> {
    state.session.ack_issue(id).map_err(api_error)?;
    state
        .session
        .issue(id)
        .map(Json)
        .ok_or_else(|| api_error(MonitorError::UnknownIssue(id)))
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    format: ReportFormat,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum ReportFormat {
    #[default]
    Json,
    Text,
}

/// GET /report
///
/// Defaults to the last hour.
async fn report(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let end = query.end.unwrap_or_else(Utc::now);
    let start = query.start.unwrap_or(end - Duration::hours(1));
    let report: WellBeingReport = state
        .session
        .generate_report(TimeWindow::new(start, end))
        .map_err(api_error)?;

    Ok(match query.format {
        ReportFormat::Json => Json(report).into_response(),
        ReportFormat::Text => report.render_text(state.tz).into_response(),
    })
}

/// Build the router for a session.
pub fn router(session: Arc<MonitorSession>) -> Router {
    let tz = session.config().tz();
    let state = Arc::new(ServerState { session, tz });

    Router::new()
        .route("/health", get(health))
        .route("/observations", post(ingest))
        .route("/issues", get(list_issues))
        .route("/issues/:id/ack", post(ack_issue))
        .route("/report", get(report))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(config: ServerConfig) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(config.session);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("monitor server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("server shutdown signal received");
            })
            .await
        {
            tracing::error!("server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
