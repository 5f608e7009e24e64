//! Database repository for customers.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::db::errors::Result;
use crate::db::models::customers::{Customer, CustomerCreateDBRequest, CustomerGapFill};
use crate::types::{CustomerId, abbrev_uuid};

// Database entity model for a customer row
#[derive(Debug, Clone, FromRow)]
struct CustomerRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    stripe_customer_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            name: row.name,
            stripe_customer_id: row.stripe_customer_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub struct Customers<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Customers<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Oldest customer with exactly this email.
    #[instrument(skip(self, email), err)]
    pub async fn get_by_email(&mut self, email: &str) -> Result<Option<Customer>> {
        let row = sqlx::query_as::<_, CustomerRow>(
            r#"
            SELECT id, email, name, stripe_customer_id, created_at, updated_at
            FROM customers
            WHERE email = $1
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(row.map(Customer::from))
    }

    #[instrument(skip(self, request), err)]
    pub async fn create(&mut self, request: &CustomerCreateDBRequest) -> Result<Customer> {
        let row = sqlx::query_as::<_, CustomerRow>(
            r#"
            INSERT INTO customers (id, email, name, stripe_customer_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, name, stripe_customer_id, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.email)
        .bind(&request.name)
        .bind(&request.stripe_customer_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(row.into())
    }

    /// Only empty columns are written, so a concurrent fill can never be overwritten.
    #[instrument(skip(self, fill), fields(customer_id = %abbrev_uuid(&id)), err)]
    pub async fn fill_gaps(&mut self, id: CustomerId, fill: &CustomerGapFill) -> Result<Customer> {
        let row = sqlx::query_as::<_, CustomerRow>(
            r#"
            UPDATE customers
            SET name = CASE WHEN COALESCE(name, '') = '' THEN COALESCE($2, name) ELSE name END,
                stripe_customer_id = CASE
                    WHEN COALESCE(stripe_customer_id, '') = '' THEN COALESCE($3, stripe_customer_id)
                    ELSE stripe_customer_id
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, email, name, stripe_customer_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&fill.name)
        .bind(&fill.stripe_customer_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(row.into())
    }
}
