//! Order endpoints under `/api/order`.

use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{Address, Order, OrderStatus};
use serde::{Deserialize, Serialize};

use super::{body, parse_order_id};
use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub message: &'static str,
    pub order_details: Order,
    /// False when the cart clear failed and was queued for retry.
    pub cart_cleared: bool,
}

#[derive(Serialize)]
pub struct OrdersResponse {
    pub message: &'static str,
    pub orders: Vec<Order>,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub message: &'static str,
    pub order: Order,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdatedResponse {
    pub message: &'static str,
    pub order_id: String,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
}

// -- Handlers --

/// POST /api/order/create: turn the caller's cart into a pending order.
#[tracing::instrument(skip(state, caller), fields(user_id = %caller.0.user_id))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let created = state.orders.create(&caller.0).await?;
    Ok((
        StatusCode::CREATED,
        Json(OrderCreatedResponse {
            message: "Order created successfully",
            order_details: created.order,
            cart_cleared: created.cart_cleared,
        }),
    ))
}

/// GET /api/order/get: the caller's orders, newest first.
#[tracing::instrument(skip(state, caller), fields(user_id = %caller.0.user_id))]
pub async fn list(State(state): State<Arc<AppState>>, caller: AuthUser) -> Result<Json<OrdersResponse>, ApiError> {
    let orders = state.orders.list(&caller.0).await?;
    Ok(Json(OrdersResponse {
        message: "Orders fetched successfully",
        orders,
    }))
}

/// GET /api/order/get/{id}
#[tracing::instrument(skip(state, caller), fields(user_id = %caller.0.user_id))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state.orders.get(&caller.0, parse_order_id(&id)?).await?;
    Ok(Json(OrderResponse {
        message: "Order fetched successfully",
        order,
    }))
}

/// PATCH /api/order/cancle/{id}
#[tracing::instrument(skip(state, caller), fields(user_id = %caller.0.user_id))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let change = state.orders.cancel(&caller.0, parse_order_id(&id)?).await?;
    Ok(Json(OrderResponse {
        message: "Order cancelled successfully",
        order: change.order,
    }))
}

/// PATCH /api/order/update/address/{id}
#[tracing::instrument(skip(state, caller, payload), fields(user_id = %caller.0.user_id))]
pub async fn update_address(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<Address>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let address = body(payload)?;
    let order = state.orders.update_address(&caller.0, order_id, address).await?;
    Ok(Json(OrderResponse {
        message: "Address updated successfully",
        order,
    }))
}

/// PATCH /api/order/update/status/{id}
#[tracing::instrument(skip(state, caller, payload), fields(user_id = %caller.0.user_id))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<StatusUpdatedResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let request = body(payload)?;
    let next = OrderStatus::from_str(request.status.trim())
        .map_err(|_| ApiError::InvalidStatus("Invalid order status".into()))?;

    let change = state.orders.update_status(&caller.0, order_id, next).await?;
    Ok(Json(StatusUpdatedResponse {
        message: "Order status updated successfully",
        order_id: order_id.to_string(),
        old_status: change.previous,
        new_status: change.order.status,
    }))
}
