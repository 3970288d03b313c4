use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pgcluster_core::error::{FailureKind, ProvisionError};

// ---------------------------------------------------------------------------
// AppError — unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(ProvisionError::InvalidRequest(msg.into()).into())
    }
}

pub fn status_for(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::Busy => StatusCode::CONFLICT,
        FailureKind::RenderFailure | FailureKind::InvalidRequest => StatusCode::BAD_REQUEST,
        FailureKind::InventoryDerivationFailure => StatusCode::UNPROCESSABLE_ENTITY,
        FailureKind::ProvisioningFailure => StatusCode::BAD_GATEWAY,
        FailureKind::TimeoutFailure => StatusCode::GATEWAY_TIMEOUT,
        FailureKind::IoFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let Some(e) = self.0.downcast_ref::<ProvisionError>() else {
            tracing::error!(error = %format!("{:#}", self.0), "request failed");
            let body = serde_json::json!({
                "error": self.0.to_string(),
                "kind": FailureKind::IoFailure,
            });
            return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response();
        };

        let kind = e.kind();
        let mut body = serde_json::json!({
            "error": e.to_string(),
            "kind": kind,
        });
        if let Some(phase) = e.phase() {
            body["phase"] = serde_json::json!(phase);
        }
        if let Some(result) = e.phase_result() {
            body["stdout"] = serde_json::json!(result.stdout);
            body["stderr"] = serde_json::json!(result.stderr);
            body["exit_code"] = serde_json::json!(result.exit_code);
        }
        tracing::warn!(%kind, error = %e, "request failed");
        (status_for(kind), axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
