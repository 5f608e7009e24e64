//! In-process [`Store`] used by tests and by `database.type: memory`.
//!
//! All tables sit behind a single [`RwLock`], so each call is atomic in the same way a
//! single statement or transaction is on PostgreSQL. Constraint checks mirror the migrations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Store;
use super::errors::{DbError, Result};
use super::models::{
    customers::{Customer, CustomerCreateDBRequest, CustomerGapFill},
    orders::{Order, OrderCreateDBRequest},
    payments::{CorrelationKeys, PAYMENTS_PROVIDER_PAYMENT_ID_UNIQUE, Payment, PaymentCreateDBRequest},
    webhook_events::{RetryMetadata, StatusTransition, WebhookEvent, WebhookEventCreateDBRequest, WebhookEventFilter, WebhookEventStatus},
};
use crate::types::{CustomerId, Provider, WebhookEventId};

#[derive(Default)]
struct Tables {
    // insertion order
    webhook_events: Vec<WebhookEvent>,
    customers: Vec<Customer>,
    orders: HashMap<Uuid, Order>,
    payments: HashMap<Uuid, Payment>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_payment_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_order_with_payment` fail after the order has been staged,
    /// as if the transaction were interrupted before commit.
    pub fn fail_next_payment_write(&self) {
        self.fail_payment_writes.store(true, Ordering::SeqCst);
    }

    pub async fn webhook_events(&self) -> Vec<WebhookEvent> {
        self.tables.read().await.webhook_events.clone()
    }

    pub async fn customers(&self) -> Vec<Customer> {
        self.tables.read().await.customers.clone()
    }

    pub async fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<_> = self.tables.read().await.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    pub async fn payments(&self) -> Vec<Payment> {
        let mut payments: Vec<_> = self.tables.read().await.payments.values().cloned().collect();
        payments.sort_by_key(|p| p.created_at);
        payments
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.is_empty())
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_webhook_event(&self, request: &WebhookEventCreateDBRequest) -> Result<WebhookEvent> {
        let now = Utc::now();
        let event = WebhookEvent {
            id: Uuid::new_v4(),
            provider: request.provider,
            provider_event_id: request.provider_event_id.clone(),
            event_type: request.event_type.clone(),
            status: WebhookEventStatus::Received,
            raw_payload: request.raw_payload.clone(),
            error_message: None,
            retry_metadata: None,
            attempts: 0,
            received_at: now,
            updated_at: now,
        };
        self.tables.write().await.webhook_events.push(event.clone());
        Ok(event)
    }

    async fn get_webhook_event(&self, id: WebhookEventId) -> Result<Option<WebhookEvent>> {
        let tables = self.tables.read().await;
        Ok(tables.webhook_events.iter().find(|e| e.id == id).cloned())
    }

    async fn list_webhook_events(&self, filter: &WebhookEventFilter) -> Result<Vec<WebhookEvent>> {
        let tables = self.tables.read().await;
        let events = tables
            .webhook_events
            .iter()
            .rev()
            .filter(|e| filter.provider.is_none_or(|p| e.provider == p))
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .skip(filter.skip.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect();
        Ok(events)
    }

    async fn has_settled_webhook_event(&self, provider: Provider, provider_event_id: &str) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .webhook_events
            .iter()
            .any(|e| e.provider == provider && e.provider_event_id == provider_event_id && e.status.is_terminal_success()))
    }

    async fn set_webhook_event_status(
        &self,
        id: WebhookEventId,
        status: WebhookEventStatus,
        error_message: Option<&str>,
    ) -> Result<WebhookEvent> {
        let mut tables = self.tables.write().await;
        let event = tables.webhook_events.iter_mut().find(|e| e.id == id).ok_or(DbError::NotFound)?;
        event.status = status;
        event.error_message = error_message.map(str::to_string);
        event.updated_at = Utc::now();
        Ok(event.clone())
    }

    async fn transition_webhook_event(
        &self,
        id: WebhookEventId,
        from: &[WebhookEventStatus],
        to: WebhookEventStatus,
        retry_metadata: Option<&RetryMetadata>,
    ) -> Result<StatusTransition> {
        let mut tables = self.tables.write().await;
        let event = tables.webhook_events.iter_mut().find(|e| e.id == id).ok_or(DbError::NotFound)?;
        if !from.contains(&event.status) {
            return Ok(StatusTransition::Rejected(event.clone()));
        }
        event.status = to;
        if let Some(metadata) = retry_metadata {
            event.retry_metadata = Some(metadata.clone());
        }
        event.updated_at = Utc::now();
        Ok(StatusTransition::Applied(event.clone()))
    }

    async fn claim_retrying_webhook_events(&self, limit: i64) -> Result<Vec<WebhookEvent>> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let mut candidates: Vec<&mut WebhookEvent> = tables
            .webhook_events
            .iter_mut()
            .filter(|e| e.status == WebhookEventStatus::Retrying)
            .collect();
        candidates.sort_by_key(|e| e.updated_at);

        Ok(candidates
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|event| {
                event.status = WebhookEventStatus::Processing;
                event.attempts += 1;
                event.updated_at = now;
                event.clone()
            })
            .collect())
    }

    async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>> {
        let tables = self.tables.read().await;
        Ok(tables.customers.iter().find(|c| c.email == email).cloned())
    }

    async fn create_customer(&self, request: &CustomerCreateDBRequest) -> Result<Customer> {
        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4(),
            email: request.email.clone(),
            name: request.name.clone(),
            stripe_customer_id: request.stripe_customer_id.clone(),
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.customers.push(customer.clone());
        Ok(customer)
    }

    async fn fill_customer_gaps(&self, id: CustomerId, fill: &CustomerGapFill) -> Result<Customer> {
        let mut tables = self.tables.write().await;
        let customer = tables.customers.iter_mut().find(|c| c.id == id).ok_or(DbError::NotFound)?;
        if blank(&customer.name) && fill.name.is_some() {
            customer.name = fill.name.clone();
        }
        if blank(&customer.stripe_customer_id) && fill.stripe_customer_id.is_some() {
            customer.stripe_customer_id = fill.stripe_customer_id.clone();
        }
        customer.updated_at = Utc::now();
        Ok(customer.clone())
    }

    async fn payment_exists(&self, provider: Provider, keys: &CorrelationKeys) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables.payments.values().any(|p| p.provider == provider && keys.matches(p)))
    }

    async fn create_order_with_payment(
        &self,
        order: &OrderCreateDBRequest,
        payment: &PaymentCreateDBRequest,
    ) -> Result<(Order, Payment)> {
        let mut tables = self.tables.write().await;

        if !tables.customers.iter().any(|c| c.id == order.customer_id) {
            return Err(DbError::ForeignKeyViolation {
                constraint: Some("orders_customer_id_fkey".to_string()),
                table: Some("orders".to_string()),
                message: "customer does not exist".to_string(),
            });
        }

        let now = Utc::now();
        let staged_order = Order {
            id: Uuid::new_v4(),
            customer_id: order.customer_id,
            status: order.status,
            total_amount: order.total_amount,
            currency: order.currency.clone(),
            provider: order.provider,
            metadata: order.metadata.clone(),
            created_at: now,
            updated_at: now,
        };

        if self.fail_payment_writes.swap(false, Ordering::SeqCst) {
            return Err(DbError::Other(anyhow::anyhow!("connection lost while inserting payment")));
        }

        let conflict = tables
            .payments
            .values()
            .any(|p| p.provider == payment.provider && p.provider_payment_id == payment.provider_payment_id);
        if conflict {
            return Err(DbError::UniqueViolation {
                constraint: Some(PAYMENTS_PROVIDER_PAYMENT_ID_UNIQUE.to_string()),
                table: Some("payments".to_string()),
                message: format!(
                    "duplicate key value violates unique constraint \"{PAYMENTS_PROVIDER_PAYMENT_ID_UNIQUE}\""
                ),
            });
        }

        let stored_payment = Payment {
            id: Uuid::new_v4(),
            order_id: staged_order.id,
            customer_id: payment.customer_id,
            provider: payment.provider,
            provider_payment_id: payment.provider_payment_id.clone(),
            provider_session_id: payment.provider_session_id.clone(),
            provider_charge_id: payment.provider_charge_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            status: payment.status,
            payment_method: payment.payment_method.clone(),
            metadata: payment.metadata.clone(),
            created_at: now,
            updated_at: now,
        };

        tables.orders.insert(staged_order.id, staged_order.clone());
        tables.payments.insert(stored_payment.id, stored_payment.clone());
        Ok((staged_order, stored_payment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{orders::OrderStatus, payments::PaymentStatus};
    use serde_json::json;

    async fn customer(store: &MemoryStore) -> Customer {
        store
            .create_customer(&CustomerCreateDBRequest {
                email: "buyer@example.com".to_string(),
                name: None,
                stripe_customer_id: None,
            })
            .await
            .unwrap()
    }

    fn requests(customer_id: CustomerId, provider_payment_id: &str) -> (OrderCreateDBRequest, PaymentCreateDBRequest) {
        (
            OrderCreateDBRequest {
                customer_id,
                status: OrderStatus::Processing,
                total_amount: 9900,
                currency: "usd".to_string(),
                provider: Provider::Stripe,
                metadata: json!({}),
            },
            PaymentCreateDBRequest {
                customer_id,
                provider: Provider::Stripe,
                provider_payment_id: provider_payment_id.to_string(),
                provider_session_id: Some("cs_test_1".to_string()),
                provider_charge_id: None,
                amount: 9900,
                currency: "usd".to_string(),
                status: PaymentStatus::Succeeded,
                payment_method: "card".to_string(),
                metadata: json!({}),
            },
        )
    }

    #[tokio::test]
    async fn test_unique_violation_leaves_no_second_order() {
        let store = MemoryStore::new();
        let customer = customer(&store).await;
        let (order, payment) = requests(customer.id, "pi_1");

        store.create_order_with_payment(&order, &payment).await.unwrap();
        let err = store.create_order_with_payment(&order, &payment).await.unwrap_err();

        assert!(err.is_unique_violation_on(PAYMENTS_PROVIDER_PAYMENT_ID_UNIQUE));
        assert_eq!(store.orders().await.len(), 1);
        assert_eq!(store.payments().await.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_writes_nothing_and_resets() {
        let store = MemoryStore::new();
        let customer = customer(&store).await;
        let (order, payment) = requests(customer.id, "pi_1");

        store.fail_next_payment_write();
        assert!(store.create_order_with_payment(&order, &payment).await.is_err());
        assert!(store.orders().await.is_empty());
        assert!(store.payments().await.is_empty());

        store.create_order_with_payment(&order, &payment).await.unwrap();
        assert_eq!(store.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_payment_exists_matches_any_key_within_provider() {
        let store = MemoryStore::new();
        let customer = customer(&store).await;
        let (order, payment) = requests(customer.id, "pi_1");
        store.create_order_with_payment(&order, &payment).await.unwrap();

        let by_session = CorrelationKeys {
            provider_session_id: Some("cs_test_1".to_string()),
            ..Default::default()
        };
        assert!(store.payment_exists(Provider::Stripe, &by_session).await.unwrap());
        assert!(!store.payment_exists(Provider::Coinbase, &by_session).await.unwrap());

        let unrelated = CorrelationKeys {
            provider_payment_id: Some("pi_2".to_string()),
            ..Default::default()
        };
        assert!(!store.payment_exists(Provider::Stripe, &unrelated).await.unwrap());
    }

    #[tokio::test]
    async fn test_conditional_transition_rejects_wrong_status() {
        let store = MemoryStore::new();
        let event = store
            .insert_webhook_event(&WebhookEventCreateDBRequest {
                provider: Provider::Stripe,
                provider_event_id: "evt_1".to_string(),
                event_type: "checkout.session.completed".to_string(),
                raw_payload: json!({}),
            })
            .await
            .unwrap();

        let result = store
            .transition_webhook_event(event.id, &[WebhookEventStatus::Failed], WebhookEventStatus::Retrying, None)
            .await
            .unwrap();
        assert!(matches!(result, StatusTransition::Rejected(e) if e.status == WebhookEventStatus::Received));

        let missing = store
            .transition_webhook_event(Uuid::new_v4(), &[WebhookEventStatus::Failed], WebhookEventStatus::Retrying, None)
            .await;
        assert!(matches!(missing, Err(DbError::NotFound)));
    }
}
