//! Streaming column-mapping suggestions over server-sent events.

use crate::services::metrics;
use crate::services::providers::ProviderError;
use crate::startup::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use service_core::error::AppError;
use service_core::middleware::tenant::TenantContext;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SuggestMappingRequest {
    pub file_columns: Vec<String>,
    #[serde(default)]
    pub first_rows: Vec<BTreeMap<String, String>>,
}

fn provider_error(err: ProviderError) -> AppError {
    match err {
        ProviderError::InvalidRequest(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
        ProviderError::NotConfigured(_) => AppError::ServiceUnavailable,
        other => AppError::BadGateway(other.to_string()),
    }
}

/// `POST /mappings/suggest`
///
/// Emits one `partial` event per delivery, an `error` event if the provider
/// stream fails, and a closing `done` event.
pub async fn suggest_mapping(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(request): Json<SuggestMappingRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    if request.file_columns.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "file_columns must not be empty"
        )));
    }

    tracing::info!(
        team_id = %tenant.team_id,
        columns = request.file_columns.len(),
        rows = request.first_rows.len(),
        "Starting mapping suggestion stream"
    );

    let deliveries = state
        .provider
        .suggest_mapping(&request.file_columns, &request.first_rows)
        .await
        .map_err(|e| {
            metrics::record_suggestion_stream("error");
            tracing::warn!(error = %e, "Failed to start mapping suggestion");
            provider_error(e)
        })?;

    let failed = Arc::new(AtomicBool::new(false));
    let stream_failed = failed.clone();

    let events = deliveries
        .map(move |item| match item {
            Ok(partial) => Event::default().event("partial").json_data(&partial),
            Err(e) => {
                tracing::warn!(error = %e, "Mapping suggestion stream failed");
                stream_failed.store(true, Ordering::Relaxed);
                Ok(Event::default().event("error").data(e.to_string()))
            }
        })
        .chain(stream::once(async move {
            let outcome = if failed.load(Ordering::Relaxed) {
                "error"
            } else {
                "completed"
            };
            metrics::record_suggestion_stream(outcome);
            Ok(Event::default().event("done").data("{}"))
        }));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
