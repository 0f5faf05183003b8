use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use sqlx::PgPool;

use crate::auth::CurrentUser;
use crate::error::ApiResult;
use crate::ledger;

/// `locked` is an implementation detail the public balance surface
/// never shows; callers see only `total` per ticker (spec.md §6).
pub async fn list(State(pool): State<PgPool>, user: CurrentUser) -> ApiResult<Json<HashMap<String, i64>>> {
    let rows = ledger::get_all(&pool, user.id).await?;
    Ok(Json(rows.into_iter().map(|b| (b.ticker, b.total)).collect()))
}
