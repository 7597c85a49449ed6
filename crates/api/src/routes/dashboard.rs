//! Seller dashboard endpoints under `/api/sellerdashboard`.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use consumers::DashboardMetrics;
use domain::Order;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

/// GET /api/sellerdashboard/get/metrics: delivered-order figures for the
/// current UTC month.
#[tracing::instrument(skip(state, caller), fields(user_id = %caller.0.user_id))]
pub async fn metrics(State(state): State<Arc<AppState>>, caller: AuthUser) -> Result<Json<DashboardMetrics>, ApiError> {
    Ok(Json(state.dashboard.metrics(Utc::now()).await))
}

/// GET /api/sellerdashboard/get/order: every order seen on the dashboard
/// queues, newest first.
#[tracing::instrument(skip(state, caller), fields(user_id = %caller.0.user_id))]
pub async fn orders(State(state): State<Arc<AppState>>, caller: AuthUser) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.dashboard.orders().await))
}
