use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::book::{self, OrderBook};
use crate::error::{AppError, ApiResult};
use crate::models::{Instrument, RegisterRequest, TransactionResponse, User, UserResponse};
use crate::trades;

const MIN_NAME_LEN: usize = 3;

pub async fn register(
    State(pool): State<PgPool>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<Json<UserResponse>> {
    if body.name.trim().chars().count() < MIN_NAME_LEN {
        return Err(AppError::InvalidAmount(format!(
            "name must be at least {MIN_NAME_LEN} characters"
        )));
    }
    let api_key = format!("key-{}", Uuid::new_v4());
    let mut tx = pool.begin().await?;
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (name, role, api_key) VALUES ($1, 'USER', $2) \
         RETURNING id, name, role, api_key, is_deleted, created_at",
    )
    .bind(&body.name)
    .bind(&api_key)
    .fetch_one(&mut *tx)
    .await?;
    // Every user has a balance row for RUB from registration onward.
    sqlx::query("INSERT INTO balances (user_id, ticker, total, locked) VALUES ($1, 'RUB', 0, 0)")
        .bind(user.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(Json(user.into()))
}

pub async fn list_instruments(State(pool): State<PgPool>) -> ApiResult<Json<Vec<Instrument>>> {
    let rows = sqlx::query_as::<_, Instrument>("SELECT ticker, name FROM instruments ORDER BY ticker")
        .fetch_all(&pool)
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    pub limit: Option<i64>,
}

pub async fn orderbook(
    State(pool): State<PgPool>,
    Path(ticker): Path<String>,
    Query(q): Query<DepthQuery>,
) -> ApiResult<Json<OrderBook>> {
    let depth = trades::clamp_limit(q.limit, 10, 25);
    let snapshot = book::snapshot(&pool, &ticker, depth, None).await?;
    Ok(Json(snapshot))
}

pub async fn transactions(
    State(pool): State<PgPool>,
    Path(ticker): Path<String>,
    Query(q): Query<DepthQuery>,
) -> ApiResult<Json<Vec<TransactionResponse>>> {
    let limit = trades::clamp_limit(q.limit, 10, 100);
    let rows = trades::recent_for_ticker(&pool, &ticker, limit).await?;
    Ok(Json(rows.into_iter().map(TransactionResponse::from).collect()))
}
