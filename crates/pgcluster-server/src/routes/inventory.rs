use axum::extract::State;
use axum::Json;

use pgcluster_core::orchestrator::InventoryReport;

use crate::error::AppError;
use crate::state::AppState;

/// POST /api/inventory — derive the Ansible inventory from Terraform outputs.
pub async fn derive_inventory(
    State(app): State<AppState>,
) -> Result<Json<InventoryReport>, AppError> {
    let orchestrator = app.orchestrator;
    let report = super::detached(async move { orchestrator.derive_inventory().await }).await?;
    Ok(Json(report))
}
