pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use pgcluster_core::config::Config;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(config: Config) -> Router {
    router_with_state(state::AppState::new(config))
}

/// Build the router around an existing state, e.g. one backed by a fake
/// process runner.
pub fn router_with_state(app_state: state::AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Pipeline phases
        .route("/api/descriptor", post(routes::descriptor::generate_descriptor))
        .route("/api/plan", post(routes::lifecycle::plan))
        .route("/api/apply", post(routes::lifecycle::apply))
        .route("/api/inventory", post(routes::inventory::derive_inventory))
        .route("/api/config", post(routes::config::configure))
        .route("/api/provision", post(routes::provision::provision))
        // Introspection
        .route("/api/status", get(routes::status::get_status))
        .route("/api/health", get(routes::status::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the control plane on `0.0.0.0:<port>`.
pub async fn serve(config: Config, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(config, listener).await
}

/// Start the control plane on a pre-bound listener.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so the
/// caller can read the actual port before starting (useful when `port = 0` and
/// the OS picks a free port).
pub async fn serve_on(config: Config, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    tracing::info!(
        terraform_dir = %config.terraform_dir().display(),
        ansible_dir = %config.ansible_dir().display(),
        "pgcluster control plane listening on http://localhost:{actual_port}"
    );

    let app = build_router(config);
    axum::serve(listener, app).await?;
    Ok(())
}
