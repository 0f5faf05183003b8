use axum::extract::{Path, State};
use axum::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::{AppError, ApiResult};
use crate::matching;
use crate::models::{CreateOrderResponse, Direction, OrderResponse, PlaceOrderRequest, UserRole};
use crate::orders;

pub async fn create(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Json(body): Json<PlaceOrderRequest>,
) -> ApiResult<Json<CreateOrderResponse>> {
    let order = match (body.direction, body.price) {
        (Direction::Buy, Some(price)) => matching::buy_limit(&pool, user.id, &body.ticker, body.qty, price).await?,
        (Direction::Sell, Some(price)) => matching::sell_limit(&pool, user.id, &body.ticker, body.qty, price).await?,
        (Direction::Buy, None) => matching::buy_market(&pool, user.id, &body.ticker, body.qty).await?,
        (Direction::Sell, None) => matching::sell_market(&pool, user.id, &body.ticker, body.qty).await?,
    };
    Ok(Json(order.into()))
}

pub async fn list(State(pool): State<PgPool>, user: CurrentUser) -> ApiResult<Json<Vec<OrderResponse>>> {
    let rows = orders::list_for_user(&pool, user.id).await?;
    Ok(Json(rows.into_iter().map(OrderResponse::from).collect()))
}

pub async fn get(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Json<OrderResponse>> {
    let order = orders::get(&pool, order_id).await?;
    if order.user_id != user.id && user.role != UserRole::Admin {
        return Err(AppError::Forbidden(format!(
            "order {order_id} does not belong to caller"
        )));
    }
    Ok(Json(order.into()))
}

pub async fn cancel(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Json<CreateOrderResponse>> {
    let order = matching::cancel(&pool, user.id, user.role == UserRole::Admin, order_id).await?;
    Ok(Json(order.into()))
}
