//! Aggregated order book depth derived from the order store.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Level {
    pub price: i64,
    pub qty: i64,
}

#[derive(Debug, Serialize)]
pub struct OrderBook {
    pub bid_levels: Vec<Level>,
    pub ask_levels: Vec<Level>,
}

/// Aggregates resting (active) limit orders by price level, bids
/// richest-first and asks cheapest-first, each capped to `depth`
/// levels. `exclude_user` drops one user's own resting orders from the
/// aggregate — used for a pre-trade depth estimate; the public
/// `/orderbook` endpoint passes `None`.
pub async fn snapshot(
    pool: &PgPool,
    ticker: &str,
    depth: i64,
    exclude_user: Option<Uuid>,
) -> Result<OrderBook, AppError> {
    let bids = sqlx::query_as::<_, Level>(
        "SELECT price, SUM(qty - filled)::BIGINT AS qty FROM orders \
         WHERE ticker = $1 AND direction = 'BUY' AND status IN ('NEW','PARTIALLY_EXECUTED') \
           AND price IS NOT NULL AND ($3::UUID IS NULL OR user_id <> $3) \
         GROUP BY price ORDER BY price DESC LIMIT $2",
    )
    .bind(ticker)
    .bind(depth)
    .bind(exclude_user)
    .fetch_all(pool)
    .await?;

    let asks = sqlx::query_as::<_, Level>(
        "SELECT price, SUM(qty - filled)::BIGINT AS qty FROM orders \
         WHERE ticker = $1 AND direction = 'SELL' AND status IN ('NEW','PARTIALLY_EXECUTED') \
           AND price IS NOT NULL AND ($3::UUID IS NULL OR user_id <> $3) \
         GROUP BY price ORDER BY price ASC LIMIT $2",
    )
    .bind(ticker)
    .bind(depth)
    .bind(exclude_user)
    .fetch_all(pool)
    .await?;

    Ok(OrderBook {
        bid_levels: bids,
        ask_levels: asks,
    })
}
