pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod providers;
pub mod services;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub booking: services::BookingService,
    pub settlement: services::SettlementService,
    pub payouts: services::PayoutService,
    pub webhook_secret: String,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/appointments", post(handlers::appointments::create_appointment))
        .route("/appointments/:id", get(handlers::appointments::get_appointment))
        .route("/appointments/:id/cancel", post(handlers::appointments::cancel_appointment))
        .route("/appointments/:id/start", post(handlers::appointments::start_lesson))
        .route("/appointments/:id/no-show", post(handlers::appointments::mark_no_show))
        .route("/appointments/:id/complete", post(handlers::appointments::complete_lesson))
        .route(
            "/appointments/:id/transfer/approve",
            post(handlers::appointments::approve_bank_transfer),
        )
        .route(
            "/appointments/:id/transfer/reject",
            post(handlers::appointments::reject_bank_transfer),
        )
        .route("/payments/callback", post(handlers::payments::gateway_callback))
        .route("/reports/monthly", get(handlers::reports::monthly_report))
        .route("/payouts", post(handlers::payouts::create_payout))
        .route("/payouts/bulk", post(handlers::payouts::bulk_payout))
        .with_state(state)
}

/// CORS layer for the configured origins; `*` means permissive.
pub fn cors_layer(allowed_origins: Option<&str>) -> Option<CorsLayer> {
    let origins = allowed_origins?;
    if origins.trim() == "*" {
        return Some(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));
    }

    let parsed: Vec<_> = origins
        .split(',')
        .filter_map(|origin| origin.trim().parse::<axum::http::HeaderValue>().ok())
        .collect();
    if parsed.is_empty() {
        return None;
    }
    Some(CorsLayer::new().allow_origin(parsed).allow_methods(Any).allow_headers(Any))
}
