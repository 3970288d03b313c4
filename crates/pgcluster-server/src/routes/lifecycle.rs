use axum::extract::State;
use axum::Json;

use pgcluster_core::orchestrator::PhaseReport;

use crate::error::AppError;
use crate::state::AppState;

/// POST /api/plan — `terraform init` then `terraform plan`.
pub async fn plan(State(app): State<AppState>) -> Result<Json<PhaseReport>, AppError> {
    let orchestrator = app.orchestrator;
    Ok(Json(super::detached(async move { orchestrator.plan().await }).await?))
}

/// POST /api/apply — `terraform apply -auto-approve`.
pub async fn apply(State(app): State<AppState>) -> Result<Json<PhaseReport>, AppError> {
    let orchestrator = app.orchestrator;
    Ok(Json(super::detached(async move { orchestrator.apply().await }).await?))
}
