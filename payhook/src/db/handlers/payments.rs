//! Database repository for orders and payments.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::db::errors::{DbError, Result};
use crate::db::models::{
    orders::{Order, OrderCreateDBRequest, OrderStatus},
    payments::{CorrelationKeys, Payment, PaymentCreateDBRequest, PaymentStatus},
};
use crate::types::{OrderId, Provider, abbrev_uuid};

fn parse<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse::<T>().map_err(|e| DbError::Other(anyhow::anyhow!(e)))
}

// Database entity model for an order row
#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    id: Uuid,
    customer_id: Uuid,
    status: String,
    total_amount: i64,
    currency: String,
    provider: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DbError;

    fn try_from(row: OrderRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            customer_id: row.customer_id,
            status: parse::<OrderStatus>(&row.status)?,
            total_amount: row.total_amount,
            currency: row.currency,
            provider: parse::<Provider>(&row.provider)?,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// Database entity model for a payment row
#[derive(Debug, Clone, FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: Uuid,
    customer_id: Uuid,
    provider: String,
    provider_payment_id: String,
    provider_session_id: Option<String>,
    provider_charge_id: Option<String>,
    amount: i64,
    currency: String,
    status: String,
    payment_method: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DbError;

    fn try_from(row: PaymentRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            customer_id: row.customer_id,
            provider: parse::<Provider>(&row.provider)?,
            provider_payment_id: row.provider_payment_id,
            provider_session_id: row.provider_session_id,
            provider_charge_id: row.provider_charge_id,
            amount: row.amount,
            currency: row.currency,
            status: parse::<PaymentStatus>(&row.status)?,
            payment_method: row.payment_method,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for orders and payments. Build it from a transaction when writing both.
pub struct Payments<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Payments<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, keys), fields(provider = %provider), err)]
    pub async fn exists_for_correlation_keys(&mut self, provider: Provider, keys: &CorrelationKeys) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM payments
                WHERE provider = $1
                  AND (
                      ($2::text IS NOT NULL AND provider_session_id = $2)
                      OR ($3::text IS NOT NULL AND provider_charge_id = $3)
                      OR ($4::text IS NOT NULL AND provider_payment_id = $4)
                  )
            )
            "#,
        )
        .bind(provider.as_str())
        .bind(&keys.provider_session_id)
        .bind(&keys.provider_charge_id)
        .bind(&keys.provider_payment_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(exists)
    }

    #[instrument(skip(self, request), fields(customer_id = %abbrev_uuid(&request.customer_id)), err)]
    pub async fn create_order(&mut self, request: &OrderCreateDBRequest) -> Result<Order> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            INSERT INTO orders (id, customer_id, status, total_amount, currency, provider, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, customer_id, status, total_amount, currency, provider, metadata, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.customer_id)
        .bind(request.status.as_str())
        .bind(request.total_amount)
        .bind(&request.currency)
        .bind(request.provider.as_str())
        .bind(&request.metadata)
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }

    #[instrument(skip(self, request), fields(order_id = %abbrev_uuid(&order_id), provider_payment_id = %request.provider_payment_id), err)]
    pub async fn create_payment(&mut self, order_id: OrderId, request: &PaymentCreateDBRequest) -> Result<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            INSERT INTO payments (
                id, order_id, customer_id, provider, provider_payment_id, provider_session_id,
                provider_charge_id, amount, currency, status, payment_method, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id, order_id, customer_id, provider, provider_payment_id, provider_session_id,
                      provider_charge_id, amount, currency, status, payment_method, metadata,
                      created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(request.customer_id)
        .bind(request.provider.as_str())
        .bind(&request.provider_payment_id)
        .bind(&request.provider_session_id)
        .bind(&request.provider_charge_id)
        .bind(request.amount)
        .bind(&request.currency)
        .bind(request.status.as_str())
        .bind(&request.payment_method)
        .bind(&request.metadata)
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }
}
