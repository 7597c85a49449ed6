//! HTTP API for the order and payment services.
//!
//! Routes sit behind bearer-token authentication (except `/health` and
//! `/metrics`) and delegate to the orchestrators. Seller dashboard reads
//! come from the read model the consumers maintain.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use consumers::SellerDashboardView;
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::{OrderOrchestrator, PaymentOrchestrator};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::TokenVerifier;

/// Shared state for all authenticated routes.
#[derive(Clone)]
pub struct AppState {
    pub orders: OrderOrchestrator,
    pub payments: PaymentOrchestrator,
    pub dashboard: SellerDashboardView,
    pub tokens: Arc<TokenVerifier>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    let orders = Router::new()
        .route("/create", post(routes::orders::create))
        .route("/get", get(routes::orders::list))
        .route("/get/{id}", get(routes::orders::get))
        .route("/cancle/{id}", patch(routes::orders::cancel))
        .route("/update/address/{id}", patch(routes::orders::update_address))
        .route("/update/status/{id}", patch(routes::orders::update_status));

    let payments = Router::new()
        .route("/create/{order_id}", post(routes::payments::create))
        .route("/verify/{payment_id}", post(routes::payments::verify));

    let dashboard = Router::new()
        .route("/get/metrics", get(routes::dashboard::metrics))
        .route("/get/order", get(routes::dashboard::orders));

    Router::new()
        .route("/health", get(routes::health::check))
        .nest("/api/order", orders)
        .nest("/api/payment", payments)
        .nest("/api/sellerdashboard", dashboard)
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
