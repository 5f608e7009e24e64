//! [`Store`] implementation on PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use super::Store;
use super::errors::Result;
use super::handlers::{Customers, Payments, WebhookEvents};
use super::models::{
    customers::{Customer, CustomerCreateDBRequest, CustomerGapFill},
    orders::{Order, OrderCreateDBRequest},
    payments::{CorrelationKeys, Payment, PaymentCreateDBRequest},
    webhook_events::{RetryMetadata, StatusTransition, WebhookEvent, WebhookEventCreateDBRequest, WebhookEventFilter, WebhookEventStatus},
};
use crate::types::{CustomerId, Provider, WebhookEventId};

/// Store backed by a sqlx connection pool. Each call runs on its own pooled connection.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_webhook_event(&self, request: &WebhookEventCreateDBRequest) -> Result<WebhookEvent> {
        let mut conn = self.pool.acquire().await?;
        WebhookEvents::new(&mut conn).create(request).await
    }

    async fn get_webhook_event(&self, id: WebhookEventId) -> Result<Option<WebhookEvent>> {
        let mut conn = self.pool.acquire().await?;
        WebhookEvents::new(&mut conn).get_by_id(id).await
    }

    async fn list_webhook_events(&self, filter: &WebhookEventFilter) -> Result<Vec<WebhookEvent>> {
        let mut conn = self.pool.acquire().await?;
        WebhookEvents::new(&mut conn).list(filter).await
    }

    async fn has_settled_webhook_event(&self, provider: Provider, provider_event_id: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        WebhookEvents::new(&mut conn).has_settled(provider, provider_event_id).await
    }

    async fn set_webhook_event_status(
        &self,
        id: WebhookEventId,
        status: WebhookEventStatus,
        error_message: Option<&str>,
    ) -> Result<WebhookEvent> {
        let mut conn = self.pool.acquire().await?;
        WebhookEvents::new(&mut conn).set_status(id, status, error_message).await
    }

    async fn transition_webhook_event(
        &self,
        id: WebhookEventId,
        from: &[WebhookEventStatus],
        to: WebhookEventStatus,
        retry_metadata: Option<&RetryMetadata>,
    ) -> Result<StatusTransition> {
        let mut conn = self.pool.acquire().await?;
        WebhookEvents::new(&mut conn).transition(id, from, to, retry_metadata).await
    }

    async fn claim_retrying_webhook_events(&self, limit: i64) -> Result<Vec<WebhookEvent>> {
        let mut tx = self.pool.begin().await?;
        let claimed = WebhookEvents::new(&mut tx).claim_retrying(limit).await?;
        tx.commit().await?;
        Ok(claimed)
    }

    async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>> {
        let mut conn = self.pool.acquire().await?;
        Customers::new(&mut conn).get_by_email(email).await
    }

    async fn create_customer(&self, request: &CustomerCreateDBRequest) -> Result<Customer> {
        let mut conn = self.pool.acquire().await?;
        Customers::new(&mut conn).create(request).await
    }

    async fn fill_customer_gaps(&self, id: CustomerId, fill: &CustomerGapFill) -> Result<Customer> {
        let mut conn = self.pool.acquire().await?;
        Customers::new(&mut conn).fill_gaps(id, fill).await
    }

    async fn payment_exists(&self, provider: Provider, keys: &CorrelationKeys) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        Payments::new(&mut conn).exists_for_correlation_keys(provider, keys).await
    }

    async fn create_order_with_payment(
        &self,
        order: &OrderCreateDBRequest,
        payment: &PaymentCreateDBRequest,
    ) -> Result<(Order, Payment)> {
        // Dropping the transaction on error rolls the order back
        let mut tx = self.pool.begin().await?;
        let mut repo = Payments::new(&mut tx);
        let order = repo.create_order(order).await?;
        let payment = repo.create_payment(order.id, payment).await?;
        tx.commit().await?;
        Ok((order, payment))
    }
}
