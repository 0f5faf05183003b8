use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub ticker: String,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub price: i64,
    pub qty: i64,
    pub created_at: DateTime<Utc>,
}

/// Public transaction-tape shape: one row per executed quantum, newest
/// first, with no reference to the counter-parties' order ids.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionResponse {
    pub ticker: String,
    pub amount: i64,
    pub price: i64,
    pub timestamp: DateTime<Utc>,
}

impl From<Trade> for TransactionResponse {
    fn from(trade: Trade) -> Self {
        Self {
            ticker: trade.ticker,
            amount: trade.qty,
            price: trade.price,
            timestamp: trade.created_at,
        }
    }
}
