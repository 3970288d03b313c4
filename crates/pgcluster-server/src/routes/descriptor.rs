use axum::body::Bytes;
use axum::extract::State;
use axum::Json;

use pgcluster_core::orchestrator::DescriptorReport;
use pgcluster_core::types::ProvisioningRequest;

use crate::error::AppError;
use crate::state::AppState;

/// POST /api/descriptor — render and persist the infrastructure descriptor.
pub async fn generate_descriptor(
    State(app): State<AppState>,
    body: Bytes,
) -> Result<Json<DescriptorReport>, AppError> {
    let request: ProvisioningRequest = super::parse_body(&body)?;
    let orchestrator = app.orchestrator;
    let report =
        super::detached(async move { orchestrator.generate_descriptor(request).await }).await?;
    Ok(Json(report))
}
