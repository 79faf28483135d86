//! HTTP collection boundary and risk read surface.
//!
//! ```text
//! DeliveryQueue ──→ POST /analytics[/batch] ──→ SessionStore ──→ GET /sessions
//!                   POST /activity ───────────────┘                  ↑
//!                                                        [Reconcile + Classify]
//! ```
//!
//! Routes:
//! - `GET /health`
//! - `POST /analytics`: one snapshot, upserted as the session's behavioral row
//! - `POST /analytics/batch`: `{"analytics": [...]}`
//! - `POST /activity`: one activity row, appended
//! - `GET /sessions`: risk report over every stored row
//! - `GET /sessions/:id`: one session, 404 when unknown
//! - `DELETE /analytics/:id`: remove a session from both tables

use crate::reconcile::{ReconcileConfig, Reconciler};
use crate::report::{RiskReport, SessionRisk};
use crate::risk::{RiskClassifier, RiskThresholds};
use crate::snapshot::{MetricSnapshot, SessionRecord};
use crate::store::{JsonFileStore, MemoryStore, SessionStore, StoreError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// File-backed store location; in-memory when unset
    pub store_path: Option<PathBuf>,
    pub reconcile: ReconcileConfig,
    pub risk: RiskThresholds,
}

impl ServerConfig {
    /// In-memory store, default reconcile and risk settings.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            store_path: None,
            reconcile: ReconcileConfig::default(),
            risk: RiskThresholds::default(),
        }
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn with_reconcile(mut self, reconcile: ReconcileConfig) -> Self {
        self.reconcile = reconcile;
        self
    }

    pub fn with_thresholds(mut self, risk: RiskThresholds) -> Self {
        self.risk = risk;
        self
    }
}

/// Shared server state
pub struct ServerState {
    store: Arc<dyn SessionStore>,
    reconciler: Reconciler,
    classifier: RiskClassifier,
}

impl ServerState {
    pub fn new(config: &ServerConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn SessionStore> = match config.store_path {
            Some(ref path) => Arc::new(JsonFileStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::with_store(store, config))
    }

    /// State over an existing store.
    pub fn with_store(store: Arc<dyn SessionStore>, config: &ServerConfig) -> Self {
        Self {
            store,
            reconciler: Reconciler::from_config(&config.reconcile),
            classifier: RiskClassifier::from_thresholds(&config.risk),
        }
    }

    fn report(&self) -> Result<RiskReport, StoreError> {
        let records = self.store.records()?;
        Ok(RiskReport::build(&records, &self.reconciler, &self.classifier))
    }
}

/// Batch request body
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub analytics: Vec<MetricSnapshot>,
}

/// Response from write endpoints
#[derive(Debug, Clone, Serialize)]
pub struct WriteResponse {
    pub status: String,
    pub accepted: usize,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::MissingSessionId => {
            api_error(StatusCode::BAD_REQUEST, "INVALID_SESSION", e.to_string())
        }
        other => {
            tracing::error!("Store failure: {}", other);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", other.to_string())
        }
    }
}

fn accepted(count: usize) -> Json<WriteResponse> {
    Json(WriteResponse {
        status: "ok".to_string(),
        accepted: count,
    })
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// POST /analytics
async fn ingest_one(
    State(state): State<Arc<ServerState>>,
    Json(snapshot): Json<MetricSnapshot>,
) -> Result<Json<WriteResponse>, ApiError> {
    state
        .store
        .upsert(SessionRecord::from(&snapshot))
        .map_err(store_error)?;
    tracing::debug!(session_id = %snapshot.session_id, "Stored snapshot");
    Ok(accepted(1))
}

/// POST /analytics/batch
///
/// Rows are written in order; a bad row fails the request but earlier rows
/// stay written.
async fn ingest_batch(
    State(state): State<Arc<ServerState>>,
    Json(batch): Json<BatchRequest>,
) -> Result<Json<WriteResponse>, ApiError> {
    for snapshot in &batch.analytics {
        state
            .store
            .upsert(SessionRecord::from(snapshot))
            .map_err(store_error)?;
    }
    tracing::debug!(count = batch.analytics.len(), "Stored snapshot batch");
    Ok(accepted(batch.analytics.len()))
}

/// POST /activity
async fn ingest_activity(
    State(state): State<Arc<ServerState>>,
    Json(mut record): Json<SessionRecord>,
) -> Result<Json<WriteResponse>, ApiError> {
    if record.created_at.is_none() {
        record.created_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
    }
    state.store.append_activity(record).map_err(store_error)?;
    Ok(accepted(1))
}

/// GET /sessions
async fn list_sessions(State(state): State<Arc<ServerState>>) -> Result<Json<RiskReport>, ApiError> {
    state.report().map(Json).map_err(store_error)
}

/// GET /sessions/:id
async fn get_session(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionRisk>, ApiError> {
    let report = state.report().map_err(store_error)?;
    report
        .session(&session_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Unknown session: {session_id}"),
            )
        })
}

/// DELETE /analytics/:id
async fn delete_session(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.store.delete(&session_id).map_err(store_error)? {
        tracing::info!(session_id = %session_id, "Deleted session");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Unknown session: {session_id}"),
        ))
    }
}

/// Build the router over a prepared state.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analytics", post(ingest_one))
        .route("/analytics/batch", post(ingest_batch))
        .route("/analytics/:id", delete(delete_session))
        .route("/activity", post(ingest_activity))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", get(get_session))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(config: ServerConfig) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(&config)?);
    serve(state, config.port).await
}

/// Run the HTTP server over a prepared state.
pub async fn serve(
    state: Arc<ServerState>,
    port: u16,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Session agent server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
