//! Caller context extracted from request headers.
//!
//! The gateway authenticates the user and forwards their team (organization)
//! and user ids as headers. Every tenant-scoped handler takes a
//! [`TenantContext`] argument.

use crate::error::AppError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

pub const TEAM_ID_HEADER: &str = "X-Team-ID";
pub const USER_ID_HEADER: &str = "X-User-ID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    /// Organization identifier every write is stamped with.
    pub team_id: String,
    pub user_id: Option<String>,
}

impl TenantContext {
    pub fn new(team_id: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            team_id: team_id.into(),
            user_id,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let team_id = parts
            .headers
            .get(TEAM_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing X-Team-ID header")))?;

        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let span = tracing::Span::current();
        span.record("team_id", team_id);
        if let Some(ref uid) = user_id {
            span.record("user_id", uid.as_str());
        }

        Ok(TenantContext::new(team_id, user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<TenantContext, AppError> {
        let (mut parts, _) = request.into_parts();
        TenantContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_team_and_user_headers() {
        let request = Request::builder()
            .header(TEAM_ID_HEADER, "org_1")
            .header(USER_ID_HEADER, "user_9")
            .body(())
            .unwrap();

        let tenant = extract(request).await.unwrap();
        assert_eq!(tenant.team_id, "org_1");
        assert_eq!(tenant.user_id.as_deref(), Some("user_9"));
    }

    #[tokio::test]
    async fn missing_team_header_is_rejected() {
        let request = Request::builder().body(()).unwrap();
        let result = extract(request).await;
        assert!(matches!(result, Err(AppError::AuthError(_))));
    }

    #[tokio::test]
    async fn blank_team_header_is_rejected() {
        let request = Request::builder()
            .header(TEAM_ID_HEADER, "   ")
            .body(())
            .unwrap();
        assert!(extract(request).await.is_err());
    }
}
