//! Append-only trade log.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Trade;

pub async fn record<'a>(
    tx: &mut Transaction<'a, Postgres>,
    ticker: &str,
    buy_order_id: Uuid,
    sell_order_id: Uuid,
    price: i64,
    qty: i64,
) -> Result<Trade, AppError> {
    let trade = sqlx::query_as::<_, Trade>(
        "INSERT INTO trades (ticker, buy_order_id, sell_order_id, price, qty) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING id, ticker, buy_order_id, sell_order_id, price, qty, created_at",
    )
    .bind(ticker)
    .bind(buy_order_id)
    .bind(sell_order_id)
    .bind(price)
    .bind(qty)
    .fetch_one(&mut **tx)
    .await?;
    Ok(trade)
}

/// Clamped the way the teacher's history queries clamp their `limit`
/// parameter: `1 <= n <= max`.
pub fn clamp_limit(requested: Option<i64>, default: i64, max: i64) -> i64 {
    requested.unwrap_or(default).clamp(1, max)
}

pub async fn recent_for_ticker(pool: &PgPool, ticker: &str, limit: i64) -> Result<Vec<Trade>, AppError> {
    let rows = sqlx::query_as::<_, Trade>(
        "SELECT id, ticker, buy_order_id, sell_order_id, price, qty, created_at \
         FROM trades WHERE ticker = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(ticker)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::clamp_limit;

    #[test]
    fn default_used_when_absent() {
        assert_eq!(clamp_limit(None, 10, 25), 10);
    }

    #[test]
    fn clamps_to_max() {
        assert_eq!(clamp_limit(Some(1_000), 10, 25), 25);
    }

    #[test]
    fn clamps_non_positive_up_to_one() {
        assert_eq!(clamp_limit(Some(0), 10, 25), 1);
        assert_eq!(clamp_limit(Some(-5), 10, 25), 1);
    }

    #[test]
    fn passes_through_in_range() {
        assert_eq!(clamp_limit(Some(7), 10, 25), 7);
    }
}
