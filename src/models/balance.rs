use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// `(user_id, ticker)` keyed balance row. `available = total - locked`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Balance {
    pub user_id: Uuid,
    pub ticker: String,
    pub total: i64,
    pub locked: i64,
}

impl Balance {
    pub fn available(&self) -> i64 {
        self.total - self.locked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(total: i64, locked: i64) -> Balance {
        Balance {
            user_id: Uuid::nil(),
            ticker: "RUB".to_string(),
            total,
            locked,
        }
    }

    #[test]
    fn available_subtracts_locked_from_total() {
        assert_eq!(balance(100, 40).available(), 60);
    }

    #[test]
    fn fully_locked_balance_has_zero_available() {
        assert_eq!(balance(50, 50).available(), 0);
    }
}
