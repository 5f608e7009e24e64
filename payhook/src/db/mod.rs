//! Database layer for data persistence and access.
//!
//! Everything the webhook pipeline persists goes through the [`Store`] trait so the pipeline
//! can run against PostgreSQL in production and an in-process store in tests and local runs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   Pipeline   │  (webhooks::pipeline, api handlers)
//! └──────┬───────┘
//!        │
//!        ↓
//! ┌──────────────┐
//! │    Store     │  (this module - narrow async interface)
//! └──┬────────┬──┘
//!    │        │
//!    ↓        ↓
//! PgStore  MemoryStore
//!    │
//!    ↓
//! ┌──────────────┐
//! │ Repositories │  (db::handlers - queries against a PgConnection)
//! └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: PostgreSQL repositories, one per table group
//! - [`models`]: Database record structures matching table schemas
//! - [`errors`]: Database-specific error types
//! - [`postgres`]: [`PgStore`], the sqlx-backed store
//! - [`memory`]: [`MemoryStore`], the in-process store
//!
//! # Atomicity
//!
//! Every [`Store`] method is atomic on its own. [`Store::create_order_with_payment`] writes
//! both records in one transaction and a unique violation on
//! [`PAYMENTS_PROVIDER_PAYMENT_ID_UNIQUE`](models::payments::PAYMENTS_PROVIDER_PAYMENT_ID_UNIQUE)
//! rolls both back. Conditional status updates only apply when the entry is still in one of
//! the expected statuses, so two concurrent callers cannot both win.

pub mod errors;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;

use crate::types::{CustomerId, Provider, WebhookEventId};
use errors::Result;
use models::{
    customers::{Customer, CustomerCreateDBRequest, CustomerGapFill},
    orders::{Order, OrderCreateDBRequest},
    payments::{CorrelationKeys, Payment, PaymentCreateDBRequest},
    webhook_events::{RetryMetadata, StatusTransition, WebhookEvent, WebhookEventCreateDBRequest, WebhookEventFilter, WebhookEventStatus},
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Persistence interface for the ledger, customers, orders and payments.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a ledger entry in `received` status.
    async fn insert_webhook_event(&self, request: &WebhookEventCreateDBRequest) -> Result<WebhookEvent>;

    async fn get_webhook_event(&self, id: WebhookEventId) -> Result<Option<WebhookEvent>>;

    async fn list_webhook_events(&self, filter: &WebhookEventFilter) -> Result<Vec<WebhookEvent>>;

    /// True when any entry for this provider event reached `processed` or `skipped_duplicate`.
    async fn has_settled_webhook_event(&self, provider: Provider, provider_event_id: &str) -> Result<bool>;

    /// Unconditionally set the status. `error_message` replaces the stored one.
    async fn set_webhook_event_status(
        &self,
        id: WebhookEventId,
        status: WebhookEventStatus,
        error_message: Option<&str>,
    ) -> Result<WebhookEvent>;

    /// Move an entry to `to` only if its current status is one of `from`.
    /// Returns [`DbError::NotFound`](errors::DbError::NotFound) for unknown ids.
    async fn transition_webhook_event(
        &self,
        id: WebhookEventId,
        from: &[WebhookEventStatus],
        to: WebhookEventStatus,
        retry_metadata: Option<&RetryMetadata>,
    ) -> Result<StatusTransition>;

    /// Claim up to `limit` entries in `retrying`, moving them to `processing` and
    /// incrementing their attempt counter.
    async fn claim_retrying_webhook_events(&self, limit: i64) -> Result<Vec<WebhookEvent>>;

    async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>>;

    async fn create_customer(&self, request: &CustomerCreateDBRequest) -> Result<Customer>;

    /// Set the supplied fields where the stored value is empty. Existing values are kept.
    async fn fill_customer_gaps(&self, id: CustomerId, fill: &CustomerGapFill) -> Result<Customer>;

    /// True when a payment from `provider` matches any of the supplied keys.
    async fn payment_exists(&self, provider: Provider, keys: &CorrelationKeys) -> Result<bool>;

    /// Write an order and its payment in one transaction.
    async fn create_order_with_payment(
        &self,
        order: &OrderCreateDBRequest,
        payment: &PaymentCreateDBRequest,
    ) -> Result<(Order, Payment)>;
}
