use axum::extract::State;
use axum::Json;

use pgcluster_core::orchestrator::Status;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/status — manifest, artifact presence and tool availability.
pub async fn get_status(State(app): State<AppState>) -> Result<Json<Status>, AppError> {
    let orchestrator = app.orchestrator.clone();
    let status = tokio::task::spawn_blocking(move || orchestrator.status()).await??;
    Ok(Json(status))
}

/// GET /api/health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
