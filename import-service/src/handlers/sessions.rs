//! Import session endpoints: the mapping step of a CSV import, driven
//! server-side.

use crate::mapping::{ConfirmedMapping, FormError, ImportSession, SessionSnapshot};
use crate::models::{Account, FileSample, MappableField};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::middleware::tenant::TenantContext;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct SetFieldRequest {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct SetCurrencyRequest {
    pub currency: String,
}

impl From<FormError> for AppError {
    fn from(err: FormError) -> Self {
        AppError::BadRequest(anyhow::Error::new(err))
    }
}

fn find(state: &AppState, tenant: &TenantContext, id: Uuid) -> Result<ImportSession, AppError> {
    state
        .sessions
        .get(&tenant.team_id, id)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Import session {} not found", id)))
}

fn respond(id: Uuid, session: &ImportSession) -> Json<SessionResponse> {
    Json(SessionResponse {
        id,
        snapshot: session.snapshot(),
    })
}

/// `POST /imports`
pub async fn create_session(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> (StatusCode, Json<SessionResponse>) {
    let (id, session) = state.sessions.create(&tenant.team_id);
    (StatusCode::CREATED, respond(id, &session))
}

/// `GET /imports/:id`
pub async fn get_session(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = find(&state, &tenant, id)?;
    Ok(respond(id, &session))
}

/// `DELETE /imports/:id`
pub async fn delete_session(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.sessions.remove(&tenant.team_id, id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(anyhow::anyhow!(
            "Import session {} not found",
            id
        )))
    }
}

/// `PUT /imports/:id/sample`: the parsed file's headers and first rows.
/// Starts a suggestion request in the background.
pub async fn set_sample(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(sample): Json<FileSample>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = find(&state, &tenant, id)?;
    let started = session.set_file_sample(sample).is_some();
    tracing::info!(session_id = %id, started, "File sample received");
    Ok(respond(id, &session))
}

/// `POST /imports/:id/suggestions`: ask for suggestions again.
pub async fn restart_suggestions(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let session = find(&state, &tenant, id)?;
    if session.start_suggestions().is_none() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Import session has no file columns yet"
        )));
    }
    Ok((StatusCode::ACCEPTED, respond(id, &session)))
}

/// `PUT /imports/:id/fields/:field`
pub async fn set_field(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((id, field)): Path<(Uuid, String)>,
    Json(request): Json<SetFieldRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = find(&state, &tenant, id)?;
    let field: MappableField = field
        .parse()
        .map_err(|e| AppError::NotFound(anyhow::Error::new(e)))?;

    session.set_field(field, &request.value)?;
    Ok(respond(id, &session))
}

/// `PUT /imports/:id/account`
pub async fn select_account(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(account): Json<Account>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = find(&state, &tenant, id)?;
    session.select_account(&account);
    Ok(respond(id, &session))
}

/// `PUT /imports/:id/currency`
pub async fn set_currency(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(request): Json<SetCurrencyRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = find(&state, &tenant, id)?;
    session.set_currency(&request.currency);
    Ok(respond(id, &session))
}

/// `POST /imports/:id/confirm`: the "proceed" check.
pub async fn confirm(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ConfirmedMapping>, AppError> {
    let session = find(&state, &tenant, id)?;
    let confirmed = session.validate()?;
    tracing::info!(session_id = %id, fields = confirmed.columns.len(), "Column mapping confirmed");
    Ok(Json(confirmed))
}
