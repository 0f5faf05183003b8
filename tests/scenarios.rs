mod common;

use serial_test::serial;
use tochka_exchange::models::OrderStatus;
use tochka_exchange::{matching, trades};

use common::{balance_of, create_instrument, create_user, credit, reload, setup_db};

#[tokio::test]
#[serial]
async fn s1_basic_limit_cross() {
    let pool = setup_db().await;
    create_instrument(&pool, "TOY").await;
    let a = create_user(&pool, "alice").await;
    let b = create_user(&pool, "bob").await;
    credit(&pool, a, "RUB", 100).await;
    credit(&pool, b, "TOY", 10).await;

    let sell = matching::sell_limit(&pool, b, "TOY", 10, 10).await.unwrap();
    let buy = matching::buy_limit(&pool, a, "TOY", 10, 10).await.unwrap();

    assert_eq!(buy.status, OrderStatus::Executed);
    assert_eq!(buy.filled, 10);
    let sell = reload(&pool, &sell).await;
    assert_eq!(sell.status, OrderStatus::Executed);
    assert_eq!(sell.filled, 10);

    let (a_toy, a_toy_locked) = balance_of(&pool, a, "TOY").await;
    let (a_rub, a_rub_locked) = balance_of(&pool, a, "RUB").await;
    assert_eq!((a_toy, a_toy_locked), (10, 0));
    assert_eq!((a_rub, a_rub_locked), (0, 0));

    let (b_toy, _) = balance_of(&pool, b, "TOY").await;
    let (b_rub, b_rub_locked) = balance_of(&pool, b, "RUB").await;
    assert_eq!(b_toy, 0);
    assert_eq!((b_rub, b_rub_locked), (100, 0));

    let quanta = trades::recent_for_ticker(&pool, "TOY", 10).await.unwrap();
    assert_eq!(quanta.len(), 1);
    assert_eq!(quanta[0].qty, 10);
    assert_eq!(quanta[0].price, 10);
}

#[tokio::test]
#[serial]
async fn s2_partial_fill_then_rest() {
    let pool = setup_db().await;
    create_instrument(&pool, "TOY").await;
    let a = create_user(&pool, "alice").await;
    let b = create_user(&pool, "bob").await;
    credit(&pool, a, "RUB", 100).await;
    credit(&pool, b, "TOY", 10).await;

    let sell = matching::sell_limit(&pool, b, "TOY", 10, 10).await.unwrap();
    let buy = matching::buy_limit(&pool, a, "TOY", 4, 10).await.unwrap();

    assert_eq!(buy.status, OrderStatus::Executed);
    assert_eq!(buy.filled, 4);

    let sell = reload(&pool, &sell).await;
    assert_eq!(sell.status, OrderStatus::PartiallyExecuted);
    assert_eq!(sell.filled, 4);

    let (b_toy_total, b_toy_locked) = balance_of(&pool, b, "TOY").await;
    assert_eq!(b_toy_total, 6);
    assert_eq!(b_toy_locked, 6);

    let book = tochka_exchange::book::snapshot(&pool, "TOY", 10, None).await.unwrap();
    assert_eq!(book.ask_levels.len(), 1);
    assert_eq!(book.ask_levels[0].price, 10);
    assert_eq!(book.ask_levels[0].qty, 6);
}

#[tokio::test]
#[serial]
async fn s3_price_priority() {
    let pool = setup_db().await;
    create_instrument(&pool, "TOY").await;
    let a = create_user(&pool, "alice").await;
    let b = create_user(&pool, "bob").await;
    let c = create_user(&pool, "carol").await;
    credit(&pool, a, "RUB", 1_000).await;
    credit(&pool, b, "TOY", 5).await;
    credit(&pool, c, "TOY", 5).await;

    matching::sell_limit(&pool, b, "TOY", 5, 11).await.unwrap();
    matching::sell_limit(&pool, c, "TOY", 5, 10).await.unwrap();

    let buy = matching::buy_market(&pool, a, "TOY", 7).await.unwrap();
    assert_eq!(buy.status, OrderStatus::Executed);

    let (a_rub, _) = balance_of(&pool, a, "RUB").await;
    assert_eq!(a_rub, 1_000 - (5 * 10 + 2 * 11));

    let quanta = trades::recent_for_ticker(&pool, "TOY", 10).await.unwrap();
    assert_eq!(quanta.len(), 2);
    // newest first: the second quantum (against the 11 maker) comes first.
    assert_eq!(quanta[0].price, 11);
    assert_eq!(quanta[0].qty, 2);
    assert_eq!(quanta[1].price, 10);
    assert_eq!(quanta[1].qty, 5);
}

#[tokio::test]
#[serial]
async fn s4_time_priority() {
    let pool = setup_db().await;
    create_instrument(&pool, "TOY").await;
    let a = create_user(&pool, "alice").await;
    let b = create_user(&pool, "bob").await;
    let c = create_user(&pool, "carol").await;
    credit(&pool, a, "RUB", 1_000).await;
    credit(&pool, b, "TOY", 5).await;
    credit(&pool, c, "TOY", 5).await;

    let sell_b = matching::sell_limit(&pool, b, "TOY", 5, 10).await.unwrap();
    let sell_c = matching::sell_limit(&pool, c, "TOY", 5, 10).await.unwrap();

    matching::buy_limit(&pool, a, "TOY", 5, 10).await.unwrap();

    let sell_b = reload(&pool, &sell_b).await;
    let sell_c = reload(&pool, &sell_c).await;
    assert_eq!(sell_b.status, OrderStatus::Executed);
    assert_eq!(sell_b.filled, 5);
    assert_eq!(sell_c.status, OrderStatus::New);
    assert_eq!(sell_c.filled, 0);
}

#[tokio::test]
#[serial]
async fn s5_market_with_no_book() {
    let pool = setup_db().await;
    create_instrument(&pool, "TOY").await;
    let a = create_user(&pool, "alice").await;
    credit(&pool, a, "RUB", 100).await;

    let order = matching::buy_market(&pool, a, "TOY", 5).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.filled, 0);

    let (a_rub, a_rub_locked) = balance_of(&pool, a, "RUB").await;
    assert_eq!((a_rub, a_rub_locked), (100, 0));
}

#[tokio::test]
#[serial]
async fn s6_cancel_releases_reserve() {
    let pool = setup_db().await;
    create_instrument(&pool, "TOY").await;
    let a = create_user(&pool, "alice").await;
    credit(&pool, a, "RUB", 100).await;

    let order = matching::buy_limit(&pool, a, "TOY", 10, 10).await.unwrap();
    let (total, locked) = balance_of(&pool, a, "RUB").await;
    assert_eq!((total, locked), (100, 100));

    let cancelled = matching::cancel(&pool, a, false, order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    let (total, locked) = balance_of(&pool, a, "RUB").await;
    assert_eq!((total, locked), (100, 0));
}

#[tokio::test]
#[serial]
async fn s7_self_trade_suppression() {
    let pool = setup_db().await;
    create_instrument(&pool, "TOY").await;
    let a = create_user(&pool, "alice").await;
    credit(&pool, a, "TOY", 5).await;
    credit(&pool, a, "RUB", 50).await;

    let sell = matching::sell_limit(&pool, a, "TOY", 5, 10).await.unwrap();
    let buy = matching::buy_limit(&pool, a, "TOY", 5, 10).await.unwrap();

    assert_eq!(sell.status, OrderStatus::New);
    assert_eq!(buy.status, OrderStatus::New);

    let quanta = trades::recent_for_ticker(&pool, "TOY", 10).await.unwrap();
    assert!(quanta.is_empty());

    let book = tochka_exchange::book::snapshot(&pool, "TOY", 10, None).await.unwrap();
    assert_eq!(book.bid_levels.len(), 1);
    assert_eq!(book.ask_levels.len(), 1);
}

#[tokio::test]
#[serial]
async fn s8_concurrent_take() {
    let pool = setup_db().await;
    create_instrument(&pool, "TOY").await;
    let seller = create_user(&pool, "seller").await;
    let a = create_user(&pool, "alice").await;
    let b = create_user(&pool, "bob").await;
    credit(&pool, seller, "TOY", 10).await;
    credit(&pool, a, "RUB", 1_000).await;
    credit(&pool, b, "RUB", 1_000).await;

    matching::sell_limit(&pool, seller, "TOY", 10, 10).await.unwrap();

    let (r1, r2) = tokio::join!(
        matching::buy_market(&pool, a, "TOY", 10),
        matching::buy_market(&pool, b, "TOY", 10),
    );
    let order_a = r1.unwrap();
    let order_b = r2.unwrap();

    let statuses = [order_a.status, order_b.status];
    assert!(statuses.contains(&OrderStatus::Executed));
    assert!(statuses.contains(&OrderStatus::Cancelled));

    let filled_total = order_a.filled + order_b.filled;
    assert_eq!(filled_total, 10);

    let (seller_rub, _) = balance_of(&pool, seller, "RUB").await;
    assert_eq!(seller_rub, 100);
}
