use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_direction", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    PartiallyExecuted,
    Executed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyExecuted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub seq: i64,
    pub user_id: Uuid,
    pub ticker: String,
    pub direction: Direction,
    pub qty: i64,
    pub price: Option<i64>,
    pub filled: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn is_market(&self) -> bool {
        self.price.is_none()
    }

    pub fn remaining(&self) -> i64 {
        self.qty - self.filled
    }
}

/// `price = None` places a market order; `price = Some(p)` places a
/// resting limit order at `p`.
#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub ticker: String,
    pub direction: Direction,
    pub qty: i64,
    pub price: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub success: bool,
    pub order_id: Uuid,
}

impl From<Order> for CreateOrderResponse {
    fn from(order: Order) -> Self {
        Self {
            success: true,
            order_id: order.id,
        }
    }
}

/// The body of the order as the caller originally submitted it.
#[derive(Debug, Serialize)]
pub struct OrderBody {
    pub direction: Direction,
    pub ticker: String,
    pub qty: i64,
    pub price: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub status: OrderStatus,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub body: OrderBody,
    pub filled: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            status: order.status,
            user_id: order.user_id,
            timestamp: order.created_at,
            body: OrderBody {
                direction: order.direction,
                ticker: order.ticker,
                qty: order.qty,
                price: order.price,
            },
            filled: order.filled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(qty: i64, filled: i64, price: Option<i64>) -> Order {
        Order {
            id: Uuid::nil(),
            seq: 0,
            user_id: Uuid::nil(),
            ticker: "TOY".to_string(),
            direction: Direction::Buy,
            qty,
            price,
            filled,
            status: OrderStatus::New,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn remaining_is_qty_minus_filled() {
        assert_eq!(order(10, 4, Some(5)).remaining(), 6);
    }

    #[test]
    fn market_order_has_no_price() {
        assert!(order(10, 0, None).is_market());
        assert!(!order(10, 0, Some(5)).is_market());
    }

    #[test]
    fn only_new_and_partially_executed_are_active() {
        assert!(OrderStatus::New.is_active());
        assert!(OrderStatus::PartiallyExecuted.is_active());
        assert!(!OrderStatus::Executed.is_active());
        assert!(!OrderStatus::Cancelled.is_active());
    }
}
