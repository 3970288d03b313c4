use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use pgcluster_core::orchestrator::PhaseReport;
use pgcluster_core::types::{ProvisioningRequest, TuningRequest};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ProvisionBody {
    #[serde(default)]
    pub request: ProvisioningRequest,
    #[serde(default)]
    pub tuning: TuningRequest,
}

/// POST /api/provision — every phase, descriptor through configuration.
pub async fn provision(
    State(app): State<AppState>,
    body: Bytes,
) -> Result<Json<PhaseReport>, AppError> {
    let body: ProvisionBody = super::parse_body(&body)?;
    let orchestrator = app.orchestrator;
    let report = super::detached(async move {
        orchestrator.provision(body.request, &body.tuning).await
    })
    .await?;
    Ok(Json(report))
}
