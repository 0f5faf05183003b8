use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::error::{AppError, ApiResult};
use crate::ledger;
use crate::matching;
use crate::models::{Instrument, UserResponse};

#[derive(Debug, Deserialize)]
pub struct CreateInstrumentRequest {
    pub ticker: String,
    pub name: String,
}

/// §3: a ticker is 2-10 uppercase letters. Checked here so a malformed
/// ticker surfaces as a normal validation error rather than the raw
/// `instruments_ticker_check` constraint violation from migration 002.
fn validate_ticker(ticker: &str) -> ApiResult<()> {
    let len_ok = (2..=10).contains(&ticker.len());
    if len_ok && ticker.bytes().all(|b| b.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(AppError::InvalidAmount(format!(
            "ticker must be 2-10 uppercase letters, got {ticker:?}"
        )))
    }
}

pub async fn create_instrument(
    State(pool): State<PgPool>,
    _admin: AdminUser,
    Json(body): Json<CreateInstrumentRequest>,
) -> ApiResult<Json<Instrument>> {
    validate_ticker(&body.ticker)?;
    let existing: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM instruments WHERE ticker = $1)")
        .bind(&body.ticker)
        .fetch_one(&pool)
        .await?;
    if existing {
        return Err(AppError::Duplicate(format!("instrument {} already exists", body.ticker)));
    }
    let instrument = sqlx::query_as::<_, Instrument>(
        "INSERT INTO instruments (ticker, name) VALUES ($1, $2) RETURNING ticker, name",
    )
    .bind(&body.ticker)
    .bind(&body.name)
    .fetch_one(&pool)
    .await?;
    Ok(Json(instrument))
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

const OK: SuccessResponse = SuccessResponse { success: true };

pub async fn delete_instrument(
    State(pool): State<PgPool>,
    _admin: AdminUser,
    Path(ticker): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    let deleted = sqlx::query("DELETE FROM instruments WHERE ticker = $1")
        .bind(&ticker)
        .execute(&pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::UnknownTicker(ticker));
    }
    Ok(Json(OK))
}

#[derive(Debug, Deserialize)]
pub struct BalanceAdjustRequest {
    pub user_id: Uuid,
    pub ticker: String,
    pub amount: i64,
}

async fn ensure_user_and_ticker(pool: &PgPool, user_id: Uuid, ticker: &str) -> ApiResult<()> {
    let user_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    if !user_exists {
        return Err(AppError::UnknownUser(user_id.to_string()));
    }
    let ticker_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM instruments WHERE ticker = $1)")
        .bind(ticker)
        .fetch_one(pool)
        .await?;
    if !ticker_exists {
        return Err(AppError::UnknownTicker(ticker.to_string()));
    }
    Ok(())
}

pub async fn deposit(
    State(pool): State<PgPool>,
    _admin: AdminUser,
    Json(body): Json<BalanceAdjustRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    ensure_user_and_ticker(&pool, body.user_id, &body.ticker).await?;
    ledger::deposit(&pool, body.user_id, &body.ticker, body.amount).await?;
    Ok(Json(OK))
}

pub async fn withdraw(
    State(pool): State<PgPool>,
    _admin: AdminUser,
    Json(body): Json<BalanceAdjustRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    ensure_user_and_ticker(&pool, body.user_id, &body.ticker).await?;
    ledger::withdraw(&pool, body.user_id, &body.ticker, body.amount).await?;
    Ok(Json(OK))
}

/// Soft-deletes the user, then cancels every active order they hold —
/// the cascade mandated by §4.5, releasing each cancelled order's
/// reservation back to them before they're locked out.
pub async fn delete_user(
    State(pool): State<PgPool>,
    _admin: AdminUser,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<UserResponse>> {
    let user = sqlx::query_as::<_, crate::models::User>(
        "UPDATE users SET is_deleted = TRUE WHERE id = $1 AND is_deleted = FALSE \
         RETURNING id, name, role, api_key, is_deleted, created_at",
    )
    .bind(user_id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::UnknownUser(user_id.to_string()))?;
    matching::cancel_all_for_user(&pool, user_id).await?;
    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use super::validate_ticker;

    #[test]
    fn accepts_well_formed_tickers() {
        assert!(validate_ticker("RUB").is_ok());
        assert!(validate_ticker("TOY").is_ok());
        assert!(validate_ticker("AB").is_ok());
        assert!(validate_ticker("ABCDEFGHIJ").is_ok());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(validate_ticker("A").is_err());
        assert!(validate_ticker("ABCDEFGHIJK").is_err());
    }

    #[test]
    fn rejects_non_uppercase() {
        assert!(validate_ticker("toy").is_err());
        assert!(validate_ticker("To1").is_err());
        assert!(validate_ticker("TO-Y").is_err());
    }
}
