//! Matching engine: `buy_limit`, `sell_limit`, `buy_market`,
//! `sell_market`, `cancel`. Price-time priority, self-trade filtering
//! (via the order store's `exclude_user`), and the market-order
//! reservation rules are all realized here against the durable order
//! store and ledger rather than an in-memory book.
//!
//! An order's acceptance (validate, reserve, insert) is one
//! transaction; each matched quantum after that is its own transaction,
//! committed independently, so a later quantum's failure never rolls
//! back quanta that already settled. A quantum that fails with a
//! transient storage error is retried a bounded number of times before
//! the engine gives up on it and moves to the next candidate.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;
use crate::ledger;
use crate::models::{Balance, Direction, Order};
use crate::orders;
use crate::trades;

const RUB: &str = "RUB";
const MAX_QUANTUM_ATTEMPTS: u32 = 3;

fn validate_qty(qty: i64) -> Result<(), AppError> {
    if qty < 1 {
        return Err(AppError::InvalidAmount(format!("qty must be >= 1, got {qty}")));
    }
    Ok(())
}

fn validate_price(price: i64) -> Result<(), AppError> {
    if price <= 0 {
        return Err(AppError::InvalidAmount(format!("price must be > 0, got {price}")));
    }
    Ok(())
}

/// Surplus refunded to a buy-limit taker when the maker's price is
/// below the taker's own limit: the taker reserved `qty * limit_price`
/// up front but only owes `qty * maker_price`.
fn surplus_to_release(trade_qty: i64, limit_price: i64, maker_price: i64) -> i64 {
    trade_qty * (limit_price - maker_price)
}

async fn ensure_ticker<'a>(tx: &mut Transaction<'a, Postgres>, ticker: &str) -> Result<(), AppError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM instruments WHERE ticker = $1)")
        .bind(ticker)
        .fetch_one(&mut **tx)
        .await?;
    if !exists {
        return Err(AppError::UnknownTicker(ticker.to_string()));
    }
    Ok(())
}

/// Retries `op` up to [`MAX_QUANTUM_ATTEMPTS`] times while it keeps
/// failing with [`AppError::Transient`] (sqlx surfacing a storage
/// timeout or a serialization/deadlock conflict); any other error, or
/// exhausting the attempt budget, is returned as-is.
async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AppError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(AppError::Transient(msg)) if attempt < MAX_QUANTUM_ATTEMPTS => {
                tracing::warn!(attempt, error = %msg, "retrying transient failure in match quantum");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Outcome of a single matched-quantum attempt.
enum QuantumOutcome {
    /// A trade settled against `maker_id`; `rub_spent` is what the RUB
    /// side of the trade cost (used by market buys to track budget).
    Matched { maker_id: Uuid, rub_spent: i64 },
    /// `maker_id` turned out to be unusable this attempt (contended,
    /// or its settlement failed an invariant) — exclude it and retry
    /// with the next-best candidate.
    Skip(Uuid),
    /// Nothing left to do: the taker is filled, inactive (including
    /// concurrently cancelled), or the book has no eligible candidate.
    Done,
}

pub async fn buy_limit(pool: &PgPool, user_id: Uuid, ticker: &str, qty: i64, price: i64) -> Result<Order, AppError> {
    validate_qty(qty)?;
    validate_price(price)?;
    let taker = {
        let mut tx = pool.begin().await?;
        ensure_ticker(&mut tx, ticker).await?;
        let cost = qty
            .checked_mul(price)
            .ok_or_else(|| AppError::InvalidAmount("qty * price overflows".into()))?;
        ledger::reserve(&mut tx, user_id, RUB, cost).await?;
        let taker = orders::insert(&mut tx, user_id, ticker, Direction::Buy, qty, Some(price)).await?;
        tx.commit().await?;
        taker
    };
    tracing::info!(order_id = %taker.id, %user_id, ticker, qty, price, "buy limit order accepted");

    let mut exclude = Vec::new();
    loop {
        match with_retry(|| quantum_buy(pool, taker.id, ticker, Some(price), true, None, &exclude)).await? {
            QuantumOutcome::Matched { .. } => {}
            QuantumOutcome::Skip(maker_id) => exclude.push(maker_id),
            QuantumOutcome::Done => break,
        }
    }
    orders::get(pool, taker.id).await
}

pub async fn sell_limit(pool: &PgPool, user_id: Uuid, ticker: &str, qty: i64, price: i64) -> Result<Order, AppError> {
    validate_qty(qty)?;
    validate_price(price)?;
    let taker = {
        let mut tx = pool.begin().await?;
        ensure_ticker(&mut tx, ticker).await?;
        ledger::reserve(&mut tx, user_id, ticker, qty).await?;
        let taker = orders::insert(&mut tx, user_id, ticker, Direction::Sell, qty, Some(price)).await?;
        tx.commit().await?;
        taker
    };
    tracing::info!(order_id = %taker.id, %user_id, ticker, qty, price, "sell limit order accepted");

    let mut exclude = Vec::new();
    loop {
        match with_retry(|| quantum_sell(pool, taker.id, ticker, Some(price), &exclude)).await? {
            QuantumOutcome::Matched { .. } => {}
            QuantumOutcome::Skip(maker_id) => exclude.push(maker_id),
            QuantumOutcome::Done => break,
        }
    }
    orders::get(pool, taker.id).await
}

/// A market buy holds no standing RUB reservation (spec §4.3.2): the
/// buyer's available RUB is read once before matching starts and
/// cumulative spend across quanta is capped at that figure.
pub async fn buy_market(pool: &PgPool, user_id: Uuid, ticker: &str, qty: i64) -> Result<Order, AppError> {
    validate_qty(qty)?;
    let (taker, mut budget) = {
        let mut tx = pool.begin().await?;
        ensure_ticker(&mut tx, ticker).await?;
        let budget = sqlx::query_as::<_, Balance>(
            "SELECT user_id, ticker, total, locked FROM balances WHERE user_id = $1 AND ticker = $2",
        )
        .bind(user_id)
        .bind(RUB)
        .fetch_optional(&mut *tx)
        .await?
        .map(|b| b.available())
        .unwrap_or(0);
        let taker = orders::insert(&mut tx, user_id, ticker, Direction::Buy, qty, None).await?;
        tx.commit().await?;
        (taker, budget)
    };
    tracing::info!(order_id = %taker.id, %user_id, ticker, qty, budget, "buy market order accepted");

    let mut exclude = Vec::new();
    loop {
        match with_retry(|| quantum_buy(pool, taker.id, ticker, None, false, Some(budget), &exclude)).await? {
            QuantumOutcome::Matched { rub_spent, .. } => budget -= rub_spent,
            QuantumOutcome::Skip(maker_id) => exclude.push(maker_id),
            QuantumOutcome::Done => break,
        }
    }

    let taker = orders::get(pool, taker.id).await?;
    if taker.remaining() > 0 {
        // No standing reservation to release on the buy side.
        let mut tx = pool.begin().await?;
        let finalized = orders::finalize_market(&mut tx, taker.id).await?;
        tx.commit().await?;
        tracing::info!(order_id = %finalized.id, "market buy finalized with unfilled remainder");
        return Ok(finalized);
    }
    Ok(taker)
}

/// A market sell reserves its full quantity upfront, exactly like a
/// resting sell-limit order.
pub async fn sell_market(pool: &PgPool, user_id: Uuid, ticker: &str, qty: i64) -> Result<Order, AppError> {
    validate_qty(qty)?;
    let taker = {
        let mut tx = pool.begin().await?;
        ensure_ticker(&mut tx, ticker).await?;
        ledger::reserve(&mut tx, user_id, ticker, qty).await?;
        let taker = orders::insert(&mut tx, user_id, ticker, Direction::Sell, qty, None).await?;
        tx.commit().await?;
        taker
    };
    tracing::info!(order_id = %taker.id, %user_id, ticker, qty, "sell market order accepted");

    let mut exclude = Vec::new();
    loop {
        match with_retry(|| quantum_sell(pool, taker.id, ticker, None, &exclude)).await? {
            QuantumOutcome::Matched { .. } => {}
            QuantumOutcome::Skip(maker_id) => exclude.push(maker_id),
            QuantumOutcome::Done => break,
        }
    }

    let taker = orders::get(pool, taker.id).await?;
    if taker.remaining() > 0 {
        let unfilled = taker.remaining();
        let mut tx = pool.begin().await?;
        let finalized = orders::finalize_market(&mut tx, taker.id).await?;
        ledger::release(&mut tx, finalized.user_id, &finalized.ticker, unfilled).await?;
        tx.commit().await?;
        tracing::info!(order_id = %finalized.id, qty = unfilled, "market sell finalized, unfilled reservation released");
        return Ok(finalized);
    }
    Ok(taker)
}

/// Attempts to settle a single buy-side quantum in its own transaction.
/// Covers both the reserved-upfront limit path (`buyer_prelocked`,
/// `price_bound = Some`) and the capped-budget market path
/// (`budget_cap = Some`, `price_bound = None`).
///
/// Per §4.3.1 step 3, a candidate that turns out to be contended (its
/// `fill` reports "skip") or whose settlement fails an invariant check
/// is not fatal to the whole acceptance: the caller excludes it and
/// tries the next-best candidate, so quanta that already committed are
/// never rolled back by a later candidate's failure.
async fn quantum_buy(
    pool: &PgPool,
    taker_id: Uuid,
    ticker: &str,
    price_bound: Option<i64>,
    buyer_prelocked: bool,
    budget_cap: Option<i64>,
    exclude: &[Uuid],
) -> Result<QuantumOutcome, AppError> {
    if budget_cap == Some(0) {
        return Ok(QuantumOutcome::Done);
    }
    let mut tx = pool.begin().await?;
    let taker = orders::get_locked(&mut tx, taker_id).await?;
    let remaining = taker.remaining();
    if remaining <= 0 || !taker.status.is_active() {
        tx.commit().await?;
        return Ok(QuantumOutcome::Done);
    }
    let Some(maker) =
        orders::best_candidate(&mut tx, ticker, Direction::Sell, price_bound, taker.user_id, exclude).await?
    else {
        tx.commit().await?;
        return Ok(QuantumOutcome::Done);
    };
    let maker_price = maker.price.expect("resting limit orders always carry a price");

    let affordable = match budget_cap {
        Some(budget) if maker_price > 0 => budget / maker_price,
        Some(_) | None => remaining,
    };
    let trade_qty = remaining.min(maker.remaining()).min(affordable);
    if trade_qty <= 0 {
        tx.commit().await?;
        return Ok(QuantumOutcome::Skip(maker.id));
    }

    let Some(_) = orders::fill(&mut tx, maker.id, trade_qty).await? else {
        tx.commit().await?;
        return Ok(QuantumOutcome::Skip(maker.id));
    };

    let rub_spent = trade_qty * maker_price;
    let settled =
        ledger::settle_trade(&mut tx, taker.user_id, maker.user_id, ticker, rub_spent, trade_qty, buyer_prelocked)
            .await;
    if settled.is_err() {
        orders::release_fill(&mut tx, maker.id, trade_qty).await?;
        tx.commit().await?;
        return Ok(QuantumOutcome::Skip(maker.id));
    }
    if buyer_prelocked {
        let limit_price = price_bound.expect("buy_limit always supplies its own limit price");
        let surplus = surplus_to_release(trade_qty, limit_price, maker_price);
        if surplus > 0 {
            ledger::release(&mut tx, taker.user_id, RUB, surplus).await?;
        }
    }

    let taker = orders::fill(&mut tx, taker.id, trade_qty)
        .await?
        .ok_or_else(|| AppError::InvariantViolation(format!("taker {} vanished mid-match", taker.id)))?;
    trades::record(&mut tx, ticker, taker.id, maker.id, maker_price, trade_qty).await?;
    tx.commit().await?;
    tracing::info!(
        taker_id = %taker.id, maker_id = %maker.id, ticker, qty = trade_qty, price = maker_price,
        "match quantum settled",
    );
    Ok(QuantumOutcome::Matched {
        maker_id: maker.id,
        rub_spent,
    })
}

/// Attempts to settle a single sell-side quantum in its own
/// transaction, against resting buy orders (best/highest price, then
/// earliest, first).
async fn quantum_sell(
    pool: &PgPool,
    taker_id: Uuid,
    ticker: &str,
    price_bound: Option<i64>,
    exclude: &[Uuid],
) -> Result<QuantumOutcome, AppError> {
    let mut tx = pool.begin().await?;
    let taker = orders::get_locked(&mut tx, taker_id).await?;
    let remaining = taker.remaining();
    if remaining <= 0 || !taker.status.is_active() {
        tx.commit().await?;
        return Ok(QuantumOutcome::Done);
    }
    let Some(maker) =
        orders::best_candidate(&mut tx, ticker, Direction::Buy, price_bound, taker.user_id, exclude).await?
    else {
        tx.commit().await?;
        return Ok(QuantumOutcome::Done);
    };
    let maker_price = maker.price.expect("resting limit orders always carry a price");
    let trade_qty = remaining.min(maker.remaining());
    if trade_qty <= 0 {
        tx.commit().await?;
        return Ok(QuantumOutcome::Skip(maker.id));
    }

    let Some(_) = orders::fill(&mut tx, maker.id, trade_qty).await? else {
        tx.commit().await?;
        return Ok(QuantumOutcome::Skip(maker.id));
    };

    let rub_amount = trade_qty * maker_price;
    let settled = ledger::settle_trade(&mut tx, maker.user_id, taker.user_id, ticker, rub_amount, trade_qty, true).await;
    if settled.is_err() {
        orders::release_fill(&mut tx, maker.id, trade_qty).await?;
        tx.commit().await?;
        return Ok(QuantumOutcome::Skip(maker.id));
    }

    let taker = orders::fill(&mut tx, taker.id, trade_qty)
        .await?
        .ok_or_else(|| AppError::InvariantViolation(format!("taker {} vanished mid-match", taker.id)))?;
    trades::record(&mut tx, ticker, maker.id, taker.id, maker_price, trade_qty).await?;
    tx.commit().await?;
    tracing::info!(
        taker_id = %taker.id, maker_id = %maker.id, ticker, qty = trade_qty, price = maker_price,
        "match quantum settled",
    );
    Ok(QuantumOutcome::Matched {
        maker_id: maker.id,
        rub_spent: rub_amount,
    })
}

/// Cancels `order_id` on behalf of `requester`. Per spec §4.4, the
/// requester must either own the order or be an administrator.
pub async fn cancel(pool: &PgPool, requester: Uuid, is_admin: bool, order_id: Uuid) -> Result<Order, AppError> {
    let mut tx = pool.begin().await?;
    let order = orders::get_locked(&mut tx, order_id).await?;
    if order.user_id != requester && !is_admin {
        return Err(AppError::Forbidden(format!(
            "order {order_id} does not belong to caller"
        )));
    }
    let cancelled = orders::cancel(&mut tx, order_id).await?;
    release_reservation(&mut tx, &cancelled).await?;
    tx.commit().await?;
    tracing::info!(order_id = %cancelled.id, %requester, "order cancelled");
    Ok(cancelled)
}

/// Cancels every active order belonging to `user_id`, releasing each
/// order's reservation as it goes — the cascade triggered by admin
/// user deletion (§4.5). Each order is cancelled in its own
/// transaction so a later cancellation's failure leaves earlier
/// cancellations committed and the remaining orders active/retryable,
/// rather than rolling the whole cascade back.
pub async fn cancel_all_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Order>, AppError> {
    let ids = {
        let mut tx = pool.begin().await?;
        let active = orders::active_for_user(&mut tx, user_id).await?;
        tx.commit().await?;
        active.into_iter().map(|o| o.id).collect::<Vec<_>>()
    };

    let mut cancelled = Vec::with_capacity(ids.len());
    for order_id in ids {
        let mut tx = pool.begin().await?;
        let order = orders::get_locked(&mut tx, order_id).await?;
        if !order.status.is_active() {
            // Already resolved (e.g. matched or cancelled independently
            // between the snapshot above and this transaction).
            tx.commit().await?;
            continue;
        }
        let c = orders::cancel(&mut tx, order_id).await?;
        release_reservation(&mut tx, &c).await?;
        tx.commit().await?;
        tracing::info!(order_id = %c.id, %user_id, "order cancelled as part of cascade");
        cancelled.push(c);
    }
    Ok(cancelled)
}

/// Releases whatever of an order's upfront reservation is still
/// un-consumed. Market buys hold no standing reservation, so there is
/// nothing to release on that side.
async fn release_reservation<'a>(tx: &mut Transaction<'a, Postgres>, order: &Order) -> Result<(), AppError> {
    let remaining = order.remaining();
    if remaining <= 0 {
        return Ok(());
    }
    match (order.direction, order.price) {
        (Direction::Buy, Some(price)) => {
            let amount = remaining * price;
            if amount > 0 {
                ledger::release(tx, order.user_id, RUB, amount).await?;
            }
        }
        (Direction::Buy, None) => {}
        (Direction::Sell, _) => {
            ledger::release(tx, order.user_id, &order.ticker, remaining).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::surplus_to_release;

    #[test]
    fn surplus_is_zero_at_the_limit_price() {
        assert_eq!(surplus_to_release(10, 10, 10), 0);
    }

    #[test]
    fn surplus_is_the_per_unit_gap_times_quantity() {
        assert_eq!(surplus_to_release(5, 12, 10), 10);
        assert_eq!(surplus_to_release(1, 100, 1), 99);
    }

    #[test]
    fn surplus_scales_with_quantity() {
        assert_eq!(surplus_to_release(3, 20, 15), 15);
        assert_eq!(surplus_to_release(6, 20, 15), 30);
    }
}
