pub mod config;
pub mod descriptor;
pub mod inventory;
pub mod lifecycle;
pub mod provision;
pub mod status;

use crate::error::AppError;
use serde::de::DeserializeOwned;
use std::future::Future;

/// Run an operation on its own task and wait for it.
///
/// A client that disconnects drops the handler future; the operation keeps
/// going so a half-finished `terraform apply` is never killed with it.
pub(crate) async fn detached<F, T>(operation: F) -> Result<T, AppError>
where
    F: Future<Output = pgcluster_core::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::spawn(operation).await??)
}

/// Decode an optional JSON body. An empty body means "all defaults"; a body
/// that does not decode is rejected rather than coerced.
pub(crate) fn parse_body<T>(bytes: &[u8]) -> Result<T, AppError>
where
    T: DeserializeOwned + Default,
{
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes)
        .map_err(|e| AppError::bad_request(format!("invalid request body: {e}")))
}
