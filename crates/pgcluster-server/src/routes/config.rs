use axum::body::Bytes;
use axum::extract::State;
use axum::Json;

use pgcluster_core::orchestrator::PhaseReport;
use pgcluster_core::types::TuningRequest;

use crate::error::AppError;
use crate::state::AppState;

/// POST /api/config — render the playbook and run it against the inventory.
pub async fn configure(
    State(app): State<AppState>,
    body: Bytes,
) -> Result<Json<PhaseReport>, AppError> {
    let tuning: TuningRequest = super::parse_body(&body)?;
    let orchestrator = app.orchestrator;
    let report =
        super::detached(async move { orchestrator.render_and_run_config(&tuning).await }).await?;
    Ok(Json(report))
}
