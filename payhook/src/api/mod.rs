//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Webhooks** (`/webhooks/stripe`, `/webhooks/coinbase`): signed provider deliveries
//! - **Admin** (`/admin/webhooks/*`): ledger listing, inspection and manual retry
//! - **Operations** (`/healthz`, `/internal/metrics`)
//!
//! All endpoints are documented with `utoipa`; the docs are served at `/admin/docs`.

pub mod handlers;
pub mod models;
