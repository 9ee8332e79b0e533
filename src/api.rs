use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::analysis::{AnalysisResult, BatchAnalysis};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::history::{AnalysisLog, HistoryEntry};
use crate::metrics;
use crate::records::{DifferenceRecord, TrainingSet};
use crate::snapshot::{EngineHandle, SnapshotInfo};

const HISTORY_CAP: usize = 2000;
const HISTORY_VIEW: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub history: Arc<AnalysisLog>,
    pub config: Arc<EngineConfig>,
}

impl AppState {
    pub fn new(engine: EngineHandle, config: EngineConfig) -> Self {
        Self {
            engine,
            history: Arc::new(AnalysisLog::with_capacity(HISTORY_CAP)),
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/model", get(model_info))
        .route("/analyze", post(analyze))
        .route("/analyze/batch", post(analyze_batch))
        .route("/admin/retrain", post(retrain))
        .route("/debug/history", get(debug_history))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Error surface of the HTTP layer.
#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Engine(e) => {
                let status = match e {
                    EngineError::ModelNotTrained(_) => StatusCode::SERVICE_UNAVAILABLE,
                    EngineError::Data { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    EngineError::Config(_) => StatusCode::BAD_REQUEST,
                };
                (status, e.kind(), e.to_string())
            }
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", m),
        };
        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

async fn model_info(State(state): State<AppState>) -> Result<Json<SnapshotInfo>, ApiError> {
    Ok(Json(state.engine.snapshot()?.info()))
}

async fn analyze(
    State(state): State<AppState>,
    Json(record): Json<DifferenceRecord>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let result = state.engine.analyze_one(&record)?;
    metrics::record_analysis(&result);
    state.history.push(&result);
    Ok(Json(result))
}

async fn analyze_batch(
    State(state): State<AppState>,
    Json(records): Json<Vec<DifferenceRecord>>,
) -> Result<Json<BatchAnalysis>, ApiError> {
    let started = Instant::now();
    let snapshot = state.engine.snapshot()?;
    let batch = tokio::task::spawn_blocking(move || snapshot.analyze_batch(&records))
        .await
        .map_err(|e| ApiError::Internal(format!("batch worker failed: {e}")))??;

    metrics::record_batch(&batch.summary, started.elapsed());
    state.history.extend(&batch.results);
    Ok(Json(batch))
}

async fn retrain(
    State(state): State<AppState>,
    Json(set): Json<TrainingSet>,
) -> Result<Json<SnapshotInfo>, ApiError> {
    let engine = state.engine.clone();
    let config = state.config.clone();
    let outcome = tokio::task::spawn_blocking(move || engine.retrain(&set, &config))
        .await
        .map_err(|e| ApiError::Internal(format!("retrain worker failed: {e}")))?;

    match outcome {
        Ok(info) => {
            metrics::record_retrain(&info);
            info!(target: "api", cases = info.cases, labels = info.labels.len(), "retrained");
            Ok(Json(info))
        }
        Err(e) => {
            warn!(target: "api", error = %e, "retrain rejected");
            Err(e.into())
        }
    }
}

async fn debug_history(State(state): State<AppState>) -> Json<Vec<HistoryEntry>> {
    Json(state.history.snapshot_last_n(HISTORY_VIEW))
}
