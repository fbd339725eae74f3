// src/routes/health.rs
//! Liveness and readiness endpoints for the meterflow backend.
//!
//! - `GET /health` answers without touching any dependency, for container
//!   orchestrators that only need to know the process is serving HTTP.
//! - `GET /health/db` round-trips a trivial query through the pool and lists
//!   the registered entity kinds, so deployments can tell whether time series
//!   requests can actually be served.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;

/// JSON response body for the health endpoints.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kinds: Option<Vec<&'static str>>,
}

/// Handle `GET /health`.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        kinds: None,
    })
}

/// Handle `GET /health/db`. Returns 503 when the database is unreachable.
async fn health_db(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // ---
    let kinds = Some(state.registry.kind_names());
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => (StatusCode::OK, Json(HealthResponse { status: "ok", kinds })),
        Err(e) => {
            tracing::warn!("Database health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    kinds,
                }),
            )
        }
    }
}

/// Subrouter with the `/health` and `/health/db` routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/db", get(health_db))
}
