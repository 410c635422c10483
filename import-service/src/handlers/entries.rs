use crate::models::{CreateEntriesRequest, TrackerEntry};
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;
use service_core::middleware::tenant::TenantContext;
use validator::Validate;

/// `POST /entries`: stamp the caller's team onto every entry and write the
/// batch.
pub async fn create_entries(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(request): Json<CreateEntriesRequest>,
) -> Result<(StatusCode, Json<Vec<TrackerEntry>>), AppError> {
    request.validate()?;

    let inserted = state
        .entries
        .create_entries(&tenant.team_id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(inserted)))
}

/// `GET /entries`
pub async fn list_entries(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<Vec<TrackerEntry>>, AppError> {
    let entries = state.entries.list_entries(&tenant.team_id).await?;
    Ok(Json(entries))
}
