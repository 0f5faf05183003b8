//! Durable, row-lockable order store. This is the single source of
//! truth the matching engine serializes against — `fill` is the one
//! atomic primitive that makes concurrent matchers safe.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Direction, Order};

pub async fn insert<'a>(
    tx: &mut Transaction<'a, Postgres>,
    user_id: Uuid,
    ticker: &str,
    direction: Direction,
    qty: i64,
    price: Option<i64>,
) -> Result<Order, AppError> {
    let order = sqlx::query_as::<_, Order>(
        "INSERT INTO orders (user_id, ticker, direction, qty, price, filled, status) \
         VALUES ($1, $2, $3, $4, $5, 0, 'NEW') \
         RETURNING id, seq, user_id, ticker, direction, qty, price, filled, status, created_at",
    )
    .bind(user_id)
    .bind(ticker)
    .bind(direction)
    .bind(qty)
    .bind(price)
    .fetch_one(&mut **tx)
    .await?;
    Ok(order)
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Order, AppError> {
    sqlx::query_as::<_, Order>(
        "SELECT id, seq, user_id, ticker, direction, qty, price, filled, status, created_at \
         FROM orders WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::UnknownOrder(id.to_string()))
}

pub async fn get_locked<'a>(
    tx: &mut Transaction<'a, Postgres>,
    id: Uuid,
) -> Result<Order, AppError> {
    sqlx::query_as::<_, Order>(
        "SELECT id, seq, user_id, ticker, direction, qty, price, filled, status, created_at \
         FROM orders WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::UnknownOrder(id.to_string()))
}

/// The single best resting order on `resting_side` eligible to match
/// against an incoming order: best price first, then earliest
/// `created_at`, ties broken by `seq` (insertion order). `price_bound`
/// is `None` for a market taker (no bound); `Some(p)` restricts to
/// prices the taker is willing to cross at. `exclude_order_ids` keeps
/// out candidates the caller has already ruled out this acceptance
/// (contended or settlement-failed) without re-fetching them. Only the
/// row actually returned is locked `FOR UPDATE` — the rest of the book
/// on that side stays untouched so a concurrent matcher on a different
/// ticker price level is never blocked by this one.
pub async fn best_candidate<'a>(
    tx: &mut Transaction<'a, Postgres>,
    ticker: &str,
    resting_side: Direction,
    price_bound: Option<i64>,
    exclude_user: Uuid,
    exclude_order_ids: &[Uuid],
) -> Result<Option<Order>, AppError> {
    let row = match resting_side {
        Direction::Sell => {
            // Incoming buy matches resting sells, cheapest first.
            sqlx::query_as::<_, Order>(
                "SELECT id, seq, user_id, ticker, direction, qty, price, filled, status, created_at \
                 FROM orders \
                 WHERE ticker = $1 AND direction = 'SELL' AND status IN ('NEW','PARTIALLY_EXECUTED') \
                   AND user_id <> $2 AND price IS NOT NULL \
                   AND ($3::BIGINT IS NULL OR price <= $3) \
                   AND id <> ALL($4::uuid[]) \
                 ORDER BY price ASC, created_at ASC, seq ASC \
                 LIMIT 1 \
                 FOR UPDATE",
            )
            .bind(ticker)
            .bind(exclude_user)
            .bind(price_bound)
            .bind(exclude_order_ids)
            .fetch_optional(&mut **tx)
            .await?
        }
        Direction::Buy => {
            // Incoming sell matches resting buys, richest first.
            sqlx::query_as::<_, Order>(
                "SELECT id, seq, user_id, ticker, direction, qty, price, filled, status, created_at \
                 FROM orders \
                 WHERE ticker = $1 AND direction = 'BUY' AND status IN ('NEW','PARTIALLY_EXECUTED') \
                   AND user_id <> $2 AND price IS NOT NULL \
                   AND ($3::BIGINT IS NULL OR price >= $3) \
                   AND id <> ALL($4::uuid[]) \
                 ORDER BY price DESC, created_at ASC, seq ASC \
                 LIMIT 1 \
                 FOR UPDATE",
            )
            .bind(ticker)
            .bind(exclude_user)
            .bind(price_bound)
            .bind(exclude_order_ids)
            .fetch_optional(&mut **tx)
            .await?
        }
    };
    Ok(row)
}

/// Atomically advances `filled` by `delta` and recomputes status.
/// Returns `None` (the "skip" signal) if the row is no longer active
/// or cannot accept `delta` more — the caller should re-read the order
/// store rather than assume the fill landed.
pub async fn fill<'a>(
    tx: &mut Transaction<'a, Postgres>,
    order_id: Uuid,
    delta: i64,
) -> Result<Option<Order>, AppError> {
    if delta <= 0 {
        return Err(AppError::InvariantViolation(format!(
            "fill delta must be positive, got {delta}"
        )));
    }
    let row = sqlx::query_as::<_, Order>(
        "UPDATE orders SET \
            filled = filled + $2, \
            status = CASE WHEN filled + $2 >= qty THEN 'EXECUTED'::order_status \
                          ELSE 'PARTIALLY_EXECUTED'::order_status END \
         WHERE id = $1 AND status IN ('NEW','PARTIALLY_EXECUTED') AND filled + $2 <= qty \
         RETURNING id, seq, user_id, ticker, direction, qty, price, filled, status, created_at",
    )
    .bind(order_id)
    .bind(delta)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row)
}

/// Compensates a `fill` whose settlement failed after the fact: undoes
/// the quantity bump and restores the prior active status.
pub async fn release_fill<'a>(
    tx: &mut Transaction<'a, Postgres>,
    order_id: Uuid,
    delta: i64,
) -> Result<Order, AppError> {
    let row = sqlx::query_as::<_, Order>(
        "UPDATE orders SET \
            filled = filled - $2, \
            status = CASE WHEN filled - $2 <= 0 THEN 'NEW'::order_status \
                          ELSE 'PARTIALLY_EXECUTED'::order_status END \
         WHERE id = $1 \
         RETURNING id, seq, user_id, ticker, direction, qty, price, filled, status, created_at",
    )
    .bind(order_id)
    .bind(delta)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row)
}

/// Market orders never rest (spec §4.3.2): once the book is exhausted
/// mid-match, whatever remains unfilled becomes terminal immediately
/// rather than sitting as an open `NEW`/`PARTIALLY_EXECUTED` order. An
/// order that matched nothing moves `NEW` -> `CANCELLED`; one that
/// matched something stays at the `PARTIALLY_EXECUTED` `fill` already
/// left it in, which is itself a terminal state for market orders.
pub async fn finalize_market<'a>(tx: &mut Transaction<'a, Postgres>, order_id: Uuid) -> Result<Order, AppError> {
    let row = sqlx::query_as::<_, Order>(
        "UPDATE orders SET status = 'CANCELLED' WHERE id = $1 AND status = 'NEW' \
         RETURNING id, seq, user_id, ticker, direction, qty, price, filled, status, created_at",
    )
    .bind(order_id)
    .fetch_optional(&mut **tx)
    .await?;
    match row {
        Some(order) => Ok(order),
        None => get_locked(tx, order_id).await,
    }
}

pub async fn cancel<'a>(tx: &mut Transaction<'a, Postgres>, order_id: Uuid) -> Result<Order, AppError> {
    let order = get_locked(tx, order_id).await?;
    if !order.status.is_active() {
        return Err(AppError::IllegalState(format!(
            "order {order_id} is {:?}, not cancellable",
            order.status
        )));
    }
    let row = sqlx::query_as::<_, Order>(
        "UPDATE orders SET status = 'CANCELLED' WHERE id = $1 \
         RETURNING id, seq, user_id, ticker, direction, qty, price, filled, status, created_at",
    )
    .bind(order_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row)
}

pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Order>, AppError> {
    let rows = sqlx::query_as::<_, Order>(
        "SELECT id, seq, user_id, ticker, direction, qty, price, filled, status, created_at \
         FROM orders WHERE user_id = $1 ORDER BY created_at DESC, seq DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn active_for_user<'a>(
    tx: &mut Transaction<'a, Postgres>,
    user_id: Uuid,
) -> Result<Vec<Order>, AppError> {
    let rows = sqlx::query_as::<_, Order>(
        "SELECT id, seq, user_id, ticker, direction, qty, price, filled, status, created_at \
         FROM orders WHERE user_id = $1 AND status IN ('NEW','PARTIALLY_EXECUTED') FOR UPDATE",
    )
    .bind(user_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows)
}
