//! Balance ledger: deposit/withdraw/reserve/release/settle_trade.
//!
//! All mutations take row-level `SELECT ... FOR UPDATE` locks in a
//! fixed order — the RUB balance row(s) first (ascending user id), then
//! the traded-ticker balance row(s) (ascending user id) — so concurrent
//! opposite-side matches never deadlock against each other.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Balance;

const RUB: &str = "RUB";

async fn lock_row<'a>(
    tx: &mut Transaction<'a, Postgres>,
    user_id: Uuid,
    ticker: &str,
) -> Result<Option<Balance>, AppError> {
    let row = sqlx::query_as::<_, Balance>(
        "SELECT user_id, ticker, total, locked FROM balances \
         WHERE user_id = $1 AND ticker = $2 FOR UPDATE",
    )
    .bind(user_id)
    .bind(ticker)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row)
}

async fn lock_or_create<'a>(
    tx: &mut Transaction<'a, Postgres>,
    user_id: Uuid,
    ticker: &str,
) -> Result<Balance, AppError> {
    if let Some(balance) = lock_row(tx, user_id, ticker).await? {
        return Ok(balance);
    }
    sqlx::query(
        "INSERT INTO balances (user_id, ticker, total, locked) VALUES ($1, $2, 0, 0) \
         ON CONFLICT (user_id, ticker) DO NOTHING",
    )
    .bind(user_id)
    .bind(ticker)
    .execute(&mut **tx)
    .await?;
    lock_row(tx, user_id, ticker)
        .await?
        .ok_or_else(|| AppError::InvariantViolation("balance row vanished after insert".into()))
}

/// Locks the RUB row (unless `ticker` already is RUB) then the
/// `ticker` row for `user_id`, in that order, inside the caller's
/// transaction. Used by single-user operations (deposit/withdraw).
async fn lock_user_pair<'a>(
    tx: &mut Transaction<'a, Postgres>,
    user_id: Uuid,
    ticker: &str,
) -> Result<Balance, AppError> {
    if ticker != RUB {
        lock_or_create(tx, user_id, RUB).await?;
    }
    lock_or_create(tx, user_id, ticker).await
}

fn check_amount(amount: i64) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

pub async fn deposit(pool: &PgPool, user_id: Uuid, ticker: &str, amount: i64) -> Result<Balance, AppError> {
    check_amount(amount)?;
    let mut tx = pool.begin().await?;
    lock_user_pair(&mut tx, user_id, ticker).await?;
    let balance = sqlx::query_as::<_, Balance>(
        "UPDATE balances SET total = total + $3 WHERE user_id = $1 AND ticker = $2 \
         RETURNING user_id, ticker, total, locked",
    )
    .bind(user_id)
    .bind(ticker)
    .bind(amount)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(balance)
}

pub async fn withdraw(pool: &PgPool, user_id: Uuid, ticker: &str, amount: i64) -> Result<Balance, AppError> {
    check_amount(amount)?;
    let mut tx = pool.begin().await?;
    let balance = lock_user_pair(&mut tx, user_id, ticker).await?;
    if balance.available() < amount {
        return Err(AppError::Insufficient(format!(
            "available {} < requested {}",
            balance.available(),
            amount
        )));
    }
    let balance = sqlx::query_as::<_, Balance>(
        "UPDATE balances SET total = total - $3 WHERE user_id = $1 AND ticker = $2 \
         RETURNING user_id, ticker, total, locked",
    )
    .bind(user_id)
    .bind(ticker)
    .bind(amount)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(balance)
}

/// Reserves `amount` of `ticker` for `user_id`: `locked += amount`,
/// requires `available >= amount` beforehand. Must be called with the
/// RUB-then-ticker lock already held when used from a matching-engine
/// transaction that also touches the counterparty — callers that only
/// reserve for a single user/ticker may use this directly.
pub async fn reserve<'a>(
    tx: &mut Transaction<'a, Postgres>,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
) -> Result<Balance, AppError> {
    check_amount(amount)?;
    let balance = lock_or_create(tx, user_id, ticker).await?;
    if balance.available() < amount {
        return Err(AppError::Insufficient(format!(
            "available {} < requested {}",
            balance.available(),
            amount
        )));
    }
    let balance = sqlx::query_as::<_, Balance>(
        "UPDATE balances SET locked = locked + $3 WHERE user_id = $1 AND ticker = $2 \
         RETURNING user_id, ticker, total, locked",
    )
    .bind(user_id)
    .bind(ticker)
    .bind(amount)
    .fetch_one(&mut **tx)
    .await?;
    Ok(balance)
}

/// Releases a previously-reserved amount: `locked -= amount`. Assumes
/// the row is already locked by the caller's transaction.
pub async fn release<'a>(
    tx: &mut Transaction<'a, Postgres>,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
) -> Result<Balance, AppError> {
    check_amount(amount)?;
    let balance = lock_or_create(tx, user_id, ticker).await?;
    if balance.locked < amount {
        return Err(AppError::InvariantViolation(format!(
            "cannot release {amount}, only {} locked",
            balance.locked
        )));
    }
    let balance = sqlx::query_as::<_, Balance>(
        "UPDATE balances SET locked = locked - $3 WHERE user_id = $1 AND ticker = $2 \
         RETURNING user_id, ticker, total, locked",
    )
    .bind(user_id)
    .bind(ticker)
    .bind(amount)
    .fetch_one(&mut **tx)
    .await?;
    Ok(balance)
}

/// Atomically settles one trade quantum between a buyer and a seller.
///
/// Locking order: RUB row(s) first, ascending user id, then the
/// `ticker` row(s), ascending user id — this is the single locking
/// discipline shared by every call site that touches two users' rows
/// in the same transaction.
///
/// `rub_amount` moves from the buyer's RUB to the seller's total RUB;
/// `asset_amount` moves from the seller's locked `ticker` to the
/// buyer's total `ticker`. When `buyer_prelocked` is true the buyer's
/// RUB is drawn from an existing reservation (`locked`, as a resting
/// buy-limit order holds); when false — the market-buy taker, which
/// holds no standing reservation — it is drawn straight from the
/// buyer's available balance (`total - locked`).
pub async fn settle_trade<'a>(
    tx: &mut Transaction<'a, Postgres>,
    buyer_id: Uuid,
    seller_id: Uuid,
    ticker: &str,
    rub_amount: i64,
    asset_amount: i64,
    buyer_prelocked: bool,
) -> Result<(), AppError> {
    check_amount(rub_amount)?;
    check_amount(asset_amount)?;

    let (first, second) = if buyer_id <= seller_id {
        (buyer_id, seller_id)
    } else {
        (seller_id, buyer_id)
    };
    lock_or_create(tx, first, RUB).await?;
    if first != second {
        lock_or_create(tx, second, RUB).await?;
    }
    let (first_t, second_t) = if buyer_id <= seller_id {
        (buyer_id, seller_id)
    } else {
        (seller_id, buyer_id)
    };
    lock_or_create(tx, first_t, ticker).await?;
    if first_t != second_t {
        lock_or_create(tx, second_t, ticker).await?;
    }

    let buyer_rub = sqlx::query_as::<_, Balance>(
        "SELECT user_id, ticker, total, locked FROM balances WHERE user_id = $1 AND ticker = $2",
    )
    .bind(buyer_id)
    .bind(RUB)
    .fetch_one(&mut **tx)
    .await?;
    if buyer_prelocked {
        if buyer_rub.locked < rub_amount {
            return Err(AppError::InvariantViolation(format!(
                "buyer {buyer_id} has only {} RUB locked, need {rub_amount}",
                buyer_rub.locked
            )));
        }
    } else if buyer_rub.available() < rub_amount {
        return Err(AppError::Insufficient(format!(
            "buyer {buyer_id} has only {} RUB available, need {rub_amount}",
            buyer_rub.available()
        )));
    }
    let seller_asset = sqlx::query_as::<_, Balance>(
        "SELECT user_id, ticker, total, locked FROM balances WHERE user_id = $1 AND ticker = $2",
    )
    .bind(seller_id)
    .bind(ticker)
    .fetch_one(&mut **tx)
    .await?;
    if seller_asset.locked < asset_amount {
        return Err(AppError::InvariantViolation(format!(
            "seller {seller_id} has only {} {ticker} locked, need {asset_amount}",
            seller_asset.locked
        )));
    }

    if buyer_prelocked {
        sqlx::query(
            "UPDATE balances SET total = total - $3, locked = locked - $3 WHERE user_id = $1 AND ticker = $2",
        )
        .bind(buyer_id)
        .bind(RUB)
        .bind(rub_amount)
        .execute(&mut **tx)
        .await?;
    } else {
        sqlx::query("UPDATE balances SET total = total - $3 WHERE user_id = $1 AND ticker = $2")
            .bind(buyer_id)
            .bind(RUB)
            .bind(rub_amount)
            .execute(&mut **tx)
            .await?;
    }
    sqlx::query(
        "INSERT INTO balances (user_id, ticker, total, locked) VALUES ($1, $2, $3, 0) \
         ON CONFLICT (user_id, ticker) DO UPDATE SET total = balances.total + $3",
    )
    .bind(seller_id)
    .bind(RUB)
    .bind(rub_amount)
    .execute(&mut **tx)
    .await?;

    sqlx::query("UPDATE balances SET total = total - $3, locked = locked - $3 WHERE user_id = $1 AND ticker = $2")
        .bind(seller_id)
        .bind(ticker)
        .bind(asset_amount)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        "INSERT INTO balances (user_id, ticker, total, locked) VALUES ($1, $2, $3, 0) \
         ON CONFLICT (user_id, ticker) DO UPDATE SET total = balances.total + $3",
    )
    .bind(buyer_id)
    .bind(ticker)
    .bind(asset_amount)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn get_all(pool: &PgPool, user_id: Uuid) -> Result<Vec<Balance>, AppError> {
    let rows = sqlx::query_as::<_, Balance>(
        "SELECT user_id, ticker, total, locked FROM balances WHERE user_id = $1 ORDER BY ticker",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
