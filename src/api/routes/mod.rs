use axum::{
    routing::{delete, get, post},
    Router,
};
use sqlx::PgPool;

use crate::api::handlers;

/// Assembles the full `/api/v1` router. Public routes need no
/// extractor; user and admin routes are gated per-handler by the
/// `CurrentUser`/`AdminUser` axum extractors (resolved straight from
/// the pool via `FromRequestParts`), so there is no separate auth
/// middleware layer — unlike the teacher, which gates a whole
/// sub-router with `from_fn_with_state`.
pub fn create_router(pool: PgPool) -> Router {
    let public_routes = Router::new()
        .route("/public/register", post(handlers::public::register))
        .route("/public/instrument", get(handlers::public::list_instruments))
        .route("/public/orderbook/:ticker", get(handlers::public::orderbook))
        .route("/public/transactions/:ticker", get(handlers::public::transactions));

    let user_routes = Router::new()
        .route("/balance", get(handlers::balance::list))
        .route("/order", post(handlers::order::create))
        .route("/order", get(handlers::order::list))
        .route("/order/:order_id", get(handlers::order::get))
        .route("/order/:order_id", delete(handlers::order::cancel));

    let admin_routes = Router::new()
        .route("/admin/instrument", post(handlers::admin::create_instrument))
        .route("/admin/instrument/:ticker", delete(handlers::admin::delete_instrument))
        .route("/admin/balance/deposit", post(handlers::admin::deposit))
        .route("/admin/balance/withdraw", post(handlers::admin::withdraw))
        .route("/admin/user/:user_id", delete(handlers::admin::delete_user));

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(admin_routes)
        .with_state(pool)
}
