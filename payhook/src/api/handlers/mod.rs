//! HTTP request handlers.
//!
//! - [`webhooks`]: Provider webhook ingestion (Stripe, Coinbase Commerce)
//! - [`admin`]: Ledger inspection and manual retry for administrators
//!
//! Handlers return [`crate::errors::Result`], which converts to a status code and a
//! `{"error": ...}` body.

pub mod admin;
pub mod webhooks;

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::AppState;

/// Liveness check.
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "health",
    responses((status = 200, description = "Service is running", body = String))
)]
pub async fn healthz() -> &'static str {
    "OK"
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}
