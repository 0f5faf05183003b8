use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::UserRole;

/// The authenticated principal, resolved from the `Authorization: TOKEN
/// <api_key>` header against the `users` table.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub role: UserRole,
}

fn extract_api_key(parts: &Parts) -> Result<&str, AppError> {
    let header = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing Authorization header".into()))?;

    let (scheme, key) = header
        .split_once(' ')
        .ok_or_else(|| AppError::Unauthorized("malformed Authorization header".into()))?;

    if !scheme.eq_ignore_ascii_case("token") {
        return Err(AppError::Unauthorized("unsupported auth scheme".into()));
    }
    if key.is_empty() {
        return Err(AppError::Unauthorized("empty api key".into()));
    }
    Ok(key)
}

#[async_trait]
impl FromRequestParts<PgPool> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, pool: &PgPool) -> Result<Self, Self::Rejection> {
        let api_key = extract_api_key(parts)?;

        let row = sqlx::query_as::<_, (Uuid, UserRole, bool)>(
            "SELECT id, role, is_deleted FROM users WHERE api_key = $1",
        )
        .bind(api_key)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::Unauthorized("invalid api key".into()))?;

        let (id, role, is_deleted) = row;
        if is_deleted {
            return Err(AppError::Unauthorized("user deleted".into()));
        }

        Ok(CurrentUser { id, role })
    }
}

/// Same resolution as [`CurrentUser`], additionally requiring the
/// `ADMIN` role — used as the extractor on administrator-only routes.
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

#[async_trait]
impl FromRequestParts<PgPool> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, pool: &PgPool) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, pool).await?;
        if user.role != UserRole::Admin {
            return Err(AppError::Forbidden("admin role required".into()));
        }
        Ok(AdminUser(user))
    }
}
