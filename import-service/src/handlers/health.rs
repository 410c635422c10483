use crate::services::get_metrics;
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Liveness check; reports the store's health.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.entries.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "import-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "import-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check; needs the store and the cache.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.entries.health_check().await;
    let cache = state.entries.cache_health_check().await;

    match (store, cache) {
        (Ok(_), Ok(_)) => {
            tracing::debug!("Readiness check passed");
            StatusCode::OK
        }
        (store, cache) => {
            tracing::warn!(
                store_ok = store.is_ok(),
                cache_ok = cache.is_ok(),
                "Readiness check failed"
            );
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Prometheus scrape endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
