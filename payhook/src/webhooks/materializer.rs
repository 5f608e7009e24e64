//! Charge materialization: turn a confirmed provider charge into a Customer, an Order and a
//! Payment.
//!
//! Each provider payload is first normalized into [`ChargeDetails`]; from there the write
//! path is shared. The order and the payment are written in one store transaction, so a
//! failure never leaves one without the other.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{info, instrument};

use crate::db::Store;
use crate::db::errors::DbError;
use crate::db::models::{
    orders::{OrderCreateDBRequest, OrderStatus},
    payments::{CorrelationKeys, PAYMENTS_PROVIDER_PAYMENT_ID_UNIQUE, PaymentCreateDBRequest, PaymentStatus},
};
use crate::types::{CustomerId, OrderId, PaymentId, Provider, abbrev_uuid};
use crate::webhooks::customers;
use crate::webhooks::events::{CheckoutSession, CoinbaseCharge, EventPayload, Money, PricingType, ProviderEvent};

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("no customer email in {provider} payload")]
    MissingEmail { provider: Provider },

    #[error("invalid amount {amount:?}")]
    InvalidAmount { amount: String },

    #[error("event type {0} is not materialized")]
    NotActionable(String),

    /// A payment with the same provider payment id was written first
    #[error("payment already exists")]
    DuplicatePayment,

    #[error(transparent)]
    Database(#[from] DbError),
}

/// Provider-independent description of a settled charge.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeDetails {
    pub provider: Provider,
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    /// Order total in minor units of `order_currency`
    pub order_total: i64,
    pub order_currency: String,
    /// Settled amount in minor units of `currency`
    pub amount: i64,
    pub currency: String,
    pub provider_payment_id: String,
    pub correlation: CorrelationKeys,
    pub offering_id: Option<String>,
    pub transaction_id: Option<String>,
    /// Identifier quoted to the customer: the Checkout Session id or the charge code
    pub reference: String,
    pub payment_method: String,
    pub provider_customer_id: Option<String>,
    pub transaction_url: Option<String>,
    /// Provider-specific payment metadata (session id, charge code, ...)
    pub payment_metadata: Map<String, Value>,
    /// Metadata pairs the storefront attached to the checkout
    pub provider_metadata: Map<String, Value>,
}

impl ChargeDetails {
    /// Normalize an actionable event.
    pub fn from_event(event: &ProviderEvent) -> Result<Self, MaterializeError> {
        match &event.payload {
            EventPayload::StripeCheckoutSession(session) => Self::from_stripe(session),
            EventPayload::CoinbaseCharge(charge) => Self::from_coinbase(charge),
            EventPayload::Ignored => Err(MaterializeError::NotActionable(event.event_type.clone())),
        }
    }

    pub fn from_stripe(session: &CheckoutSession) -> Result<Self, MaterializeError> {
        let email = session
            .customer_email()
            .ok_or(MaterializeError::MissingEmail { provider: Provider::Stripe })?;
        let amount = session.amount_total.unwrap_or(0);
        if amount < 0 {
            return Err(MaterializeError::InvalidAmount {
                amount: amount.to_string(),
            });
        }
        let currency = session
            .currency
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "usd".to_string());
        let provider_payment_id = session.payment_intent_id().unwrap_or(&session.id).to_string();

        let mut payment_metadata = Map::new();
        payment_metadata.insert("session_id".to_string(), json!(session.id));

        Ok(Self {
            provider: Provider::Stripe,
            email,
            name: session.customer_name(),
            phone: session.customer_phone(),
            order_total: amount,
            order_currency: currency.clone(),
            amount,
            currency,
            correlation: CorrelationKeys {
                provider_session_id: Some(session.id.clone()),
                provider_charge_id: None,
                provider_payment_id: Some(provider_payment_id.clone()),
            },
            provider_payment_id,
            offering_id: session.metadata_str("offeringId").or_else(|| session.metadata_str("offering_id")),
            transaction_id: session
                .metadata_str("transaction_id")
                .or_else(|| session.metadata_str("transactionId")),
            reference: session.id.clone(),
            payment_method: session
                .payment_method_types
                .first()
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
            provider_customer_id: session.customer_id().map(str::to_string),
            transaction_url: None,
            payment_metadata,
            provider_metadata: session.metadata.clone(),
        })
    }

    pub fn from_coinbase(charge: &CoinbaseCharge) -> Result<Self, MaterializeError> {
        let email = charge
            .metadata_str("customer_email")
            .ok_or(MaterializeError::MissingEmail {
                provider: Provider::Coinbase,
            })?;

        let zero_usd = Money {
            amount: "0".to_string(),
            currency: "USD".to_string(),
        };
        let local = charge.pricing.local().unwrap_or(&zero_usd);

        let settled = match charge.pricing_type {
            PricingType::FixedPrice => local,
            PricingType::NoPrice => charge
                .payments
                .first()
                .and_then(|p| p.value.crypto.as_ref())
                .unwrap_or(&zero_usd),
            PricingType::Other => charge.pricing.first_settlement().unwrap_or(local),
        };

        let networks: Vec<&str> = charge
            .payments
            .iter()
            .filter_map(|p| p.network.as_deref())
            .filter(|n| !n.is_empty())
            .collect();
        let payment_method = if networks.is_empty() {
            "crypto".to_string()
        } else {
            networks.join(", ")
        };

        let mut payment_metadata = Map::new();
        payment_metadata.insert("charge_id".to_string(), json!(charge.id));
        payment_metadata.insert("charge_code".to_string(), json!(charge.code));
        if let Some(url) = &charge.hosted_url {
            payment_metadata.insert("hosted_url".to_string(), json!(url));
        }

        Ok(Self {
            provider: Provider::Coinbase,
            email,
            name: charge.metadata_str("customer_name"),
            phone: charge.metadata_str("customer_phone"),
            order_total: to_minor_units(&local.amount)?,
            order_currency: local.currency.to_lowercase(),
            amount: to_minor_units(&settled.amount)?,
            currency: settled.currency.to_uppercase(),
            provider_payment_id: charge.code.clone(),
            correlation: CorrelationKeys {
                provider_session_id: None,
                provider_charge_id: Some(charge.id.clone()),
                provider_payment_id: Some(charge.code.clone()),
            },
            offering_id: charge.metadata_str("offeringId").or_else(|| charge.metadata_str("offering_id")),
            transaction_id: charge
                .metadata_str("transaction_id")
                .or_else(|| charge.metadata_str("transactionId")),
            reference: charge.code.clone(),
            payment_method,
            provider_customer_id: None,
            transaction_url: charge.hosted_url.clone(),
            payment_metadata,
            provider_metadata: charge.metadata.clone(),
        })
    }

    /// Contact and correlation fields shared by the order and payment metadata.
    fn contact_metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("customer_email".to_string(), json!(self.email));
        metadata.insert("customer_name".to_string(), json!(self.name));
        metadata.insert("customer_phone".to_string(), json!(self.phone));
        metadata.insert("offering_id".to_string(), json!(self.offering_id));
        metadata.insert("transaction_id".to_string(), json!(self.transaction_id));
        metadata
    }

    fn order_request(&self, customer_id: CustomerId) -> OrderCreateDBRequest {
        let mut metadata = self.contact_metadata();
        metadata.extend(self.payment_metadata.clone());
        // storefront metadata is kept verbatim and wins on key collisions
        metadata.extend(self.provider_metadata.clone());

        OrderCreateDBRequest {
            customer_id,
            status: OrderStatus::Processing,
            total_amount: self.order_total,
            currency: self.order_currency.clone(),
            provider: self.provider,
            metadata: Value::Object(metadata),
        }
    }

    fn payment_request(&self, customer_id: CustomerId) -> PaymentCreateDBRequest {
        let mut metadata = self.contact_metadata();
        metadata.extend(self.payment_metadata.clone());
        metadata.extend(self.provider_metadata.clone());

        PaymentCreateDBRequest {
            customer_id,
            provider: self.provider,
            provider_payment_id: self.provider_payment_id.clone(),
            provider_session_id: self.correlation.provider_session_id.clone(),
            provider_charge_id: self.correlation.provider_charge_id.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            status: PaymentStatus::Succeeded,
            payment_method: self.payment_method.clone(),
            metadata: Value::Object(metadata),
        }
    }
}

/// Convert a decimal major-unit amount ("25.00") to minor units (2500), rounding half away
/// from zero.
pub fn to_minor_units(amount: &str) -> Result<i64, MaterializeError> {
    let invalid = || MaterializeError::InvalidAmount {
        amount: amount.to_string(),
    };

    let value: Decimal = amount.trim().parse().map_err(|_| invalid())?;
    let minor = value
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or_else(invalid)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

    if minor.is_sign_negative() && !minor.is_zero() {
        return Err(invalid());
    }
    minor.to_i64().ok_or_else(invalid)
}

/// Records written for one charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Materialized {
    pub customer_id: CustomerId,
    pub order_id: OrderId,
    pub payment_id: PaymentId,
}

/// Resolve the customer, then write the order and payment atomically.
#[instrument(skip_all, fields(provider = %details.provider, provider_payment_id = %details.provider_payment_id), err)]
pub async fn materialize(store: &dyn Store, details: &ChargeDetails) -> Result<Materialized, MaterializeError> {
    let customer_id = customers::resolve(
        store,
        &details.email,
        details.name.as_deref(),
        details.provider_customer_id.as_deref(),
    )
    .await?;

    let (order, payment) = store
        .create_order_with_payment(&details.order_request(customer_id), &details.payment_request(customer_id))
        .await
        .map_err(|e| {
            if e.is_unique_violation_on(PAYMENTS_PROVIDER_PAYMENT_ID_UNIQUE) {
                MaterializeError::DuplicatePayment
            } else {
                MaterializeError::Database(e)
            }
        })?;

    info!(
        customer_id = %abbrev_uuid(&customer_id),
        order_id = %abbrev_uuid(&order.id),
        payment_id = %abbrev_uuid(&payment.id),
        amount = payment.amount,
        currency = %payment.currency,
        "Materialized charge"
    );

    Ok(Materialized {
        customer_id,
        order_id: order.id,
        payment_id: payment.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn session(value: Value) -> CheckoutSession {
        serde_json::from_value(value).unwrap()
    }

    fn charge(value: Value) -> CoinbaseCharge {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units("25.00").unwrap(), 2500);
        assert_eq!(to_minor_units("0.1").unwrap(), 10);
        assert_eq!(to_minor_units("19.995").unwrap(), 2000);
        assert_eq!(to_minor_units("0.00050000").unwrap(), 0);
        assert_eq!(to_minor_units(" 7 ").unwrap(), 700);
        assert!(matches!(to_minor_units("abc"), Err(MaterializeError::InvalidAmount { .. })));
        assert!(matches!(to_minor_units("-5.00"), Err(MaterializeError::InvalidAmount { .. })));
    }

    #[test]
    fn test_stripe_details() {
        let details = ChargeDetails::from_stripe(&session(json!({
            "id": "cs_1",
            "amount_total": 9900,
            "currency": "usd",
            "customer": "cus_1",
            "payment_intent": "pi_1",
            "payment_method_types": ["card", "link"],
            "customer_details": {"email": "buyer@example.com", "name": "Ada Lovelace"},
            "metadata": {"offeringId": "off_1", "transaction_id": "tx_1"}
        })))
        .unwrap();

        assert_eq!(details.amount, 9900);
        assert_eq!(details.order_total, 9900);
        assert_eq!(details.currency, "usd");
        assert_eq!(details.provider_payment_id, "pi_1");
        assert_eq!(details.reference, "cs_1");
        assert_eq!(details.payment_method, "card");
        assert_eq!(details.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(details.offering_id.as_deref(), Some("off_1"));
        assert_eq!(details.transaction_id.as_deref(), Some("tx_1"));
        assert_eq!(details.provider_customer_id.as_deref(), Some("cus_1"));
    }

    #[test]
    fn test_stripe_defaults() {
        let details = ChargeDetails::from_stripe(&session(json!({
            "id": "cs_1",
            "metadata": {"customer_email": "buyer@example.com"}
        })))
        .unwrap();

        assert_eq!(details.amount, 0);
        assert_eq!(details.currency, "usd");
        assert_eq!(details.provider_payment_id, "cs_1");
        assert_eq!(details.payment_method, "unknown");
    }

    #[test]
    fn test_stripe_requires_email() {
        let err = ChargeDetails::from_stripe(&session(json!({"id": "cs_1"}))).unwrap_err();
        assert!(matches!(err, MaterializeError::MissingEmail { provider: Provider::Stripe }));
    }

    #[test]
    fn test_coinbase_fixed_price() {
        let details = ChargeDetails::from_coinbase(&charge(json!({
            "id": "charge_1",
            "code": "ABCD1234",
            "hosted_url": "https://commerce.coinbase.com/charges/ABCD1234",
            "pricing_type": "fixed_price",
            "pricing": {"local": {"amount": "25.00", "currency": "USD"}},
            "payments": [],
            "metadata": {"customer_email": "buyer@example.com", "customer_name": "Ada"}
        })))
        .unwrap();

        assert_eq!(details.order_total, 2500);
        assert_eq!(details.order_currency, "usd");
        assert_eq!(details.amount, 2500);
        assert_eq!(details.currency, "USD");
        assert_eq!(details.provider_payment_id, "ABCD1234");
        assert_eq!(details.reference, "ABCD1234");
        assert_eq!(details.payment_method, "crypto");
        assert_eq!(
            details.transaction_url.as_deref(),
            Some("https://commerce.coinbase.com/charges/ABCD1234")
        );
    }

    #[test]
    fn test_coinbase_no_price_uses_first_payment() {
        let details = ChargeDetails::from_coinbase(&charge(json!({
            "id": "charge_1",
            "code": "CODE",
            "pricing_type": "no_price",
            "payments": [
                {"network": "bitcoin", "value": {"crypto": {"amount": "0.5", "currency": "btc"}}},
                {"network": "ethereum", "value": {"crypto": {"amount": "1.0", "currency": "eth"}}}
            ],
            "metadata": {"customer_email": "buyer@example.com"}
        })))
        .unwrap();

        assert_eq!(details.amount, 50);
        assert_eq!(details.currency, "BTC");
        assert_eq!(details.payment_method, "bitcoin, ethereum");
        // no local pricing on a no_price charge
        assert_eq!(details.order_total, 0);
        assert_eq!(details.order_currency, "usd");
    }

    #[test]
    fn test_coinbase_no_price_without_payments() {
        let details = ChargeDetails::from_coinbase(&charge(json!({
            "id": "charge_1",
            "code": "CODE",
            "pricing_type": "no_price",
            "metadata": {"customer_email": "buyer@example.com"}
        })))
        .unwrap();
        assert_eq!(details.amount, 0);
        assert_eq!(details.currency, "USD");
    }

    #[test]
    fn test_coinbase_other_pricing_uses_first_settlement_entry() {
        let details = ChargeDetails::from_coinbase(&charge(json!({
            "id": "charge_1",
            "code": "CODE",
            "pricing_type": "dynamic_price",
            "pricing": {
                "local": {"amount": "10.00", "currency": "EUR"},
                "usdc": {"amount": "10.85", "currency": "usdc"}
            },
            "metadata": {"customer_email": "buyer@example.com"}
        })))
        .unwrap();
        assert_eq!(details.order_total, 1000);
        assert_eq!(details.order_currency, "eur");
        assert_eq!(details.amount, 1085);
        assert_eq!(details.currency, "USDC");
    }

    #[test]
    fn test_coinbase_invalid_amount() {
        let err = ChargeDetails::from_coinbase(&charge(json!({
            "id": "charge_1",
            "code": "CODE",
            "pricing_type": "fixed_price",
            "pricing": {"local": {"amount": "twenty", "currency": "USD"}},
            "metadata": {"customer_email": "buyer@example.com"}
        })))
        .unwrap_err();
        assert!(matches!(err, MaterializeError::InvalidAmount { .. }));
    }

    #[test]
    fn test_storefront_metadata_kept_on_order_and_payment() {
        let details = ChargeDetails::from_stripe(&session(json!({
            "id": "cs_1",
            "metadata": {"customer_email": "buyer@example.com", "campaign": "spring"}
        })))
        .unwrap();
        let order = details.order_request(uuid::Uuid::new_v4());
        assert_eq!(order.metadata["campaign"], "spring");
        assert_eq!(order.metadata["session_id"], "cs_1");
        assert_eq!(order.metadata["customer_email"], "buyer@example.com");

        let payment = details.payment_request(uuid::Uuid::new_v4());
        assert_eq!(payment.metadata["campaign"], "spring");
        assert_eq!(payment.metadata["session_id"], "cs_1");
        assert_eq!(payment.provider_session_id.as_deref(), Some("cs_1"));
    }

    #[tokio::test]
    async fn test_materialize_writes_linked_records() {
        let store = MemoryStore::new();
        let details = ChargeDetails::from_stripe(&session(json!({
            "id": "cs_1",
            "amount_total": 9900,
            "currency": "usd",
            "payment_intent": "pi_1",
            "metadata": {"customer_email": "buyer@example.com"}
        })))
        .unwrap();

        let materialized = materialize(&store, &details).await.unwrap();

        let orders = store.orders().await;
        let payments = store.payments().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(payments.len(), 1);
        assert_eq!(orders[0].id, materialized.order_id);
        assert_eq!(orders[0].status, OrderStatus::Processing);
        assert_eq!(payments[0].order_id, materialized.order_id);
        assert_eq!(payments[0].customer_id, materialized.customer_id);
        assert_eq!(payments[0].status, PaymentStatus::Succeeded);

        let err = materialize(&store, &details).await.unwrap_err();
        assert!(matches!(err, MaterializeError::DuplicatePayment));
        assert_eq!(store.orders().await.len(), 1);
    }
}
