//! Provider webhook payloads.
//!
//! Inbound bodies are parsed once, after signature verification, into a [`ProviderEvent`].
//! Only the event types the service acts on are parsed into typed payloads; required fields
//! of those are validated here, so a malformed payload is rejected before anything is
//! written to the ledger. Everything else becomes [`EventPayload::Ignored`].

use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::db::models::webhook_events::WebhookEvent;
use crate::types::Provider;

pub const STRIPE_CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const COINBASE_CHARGE_CONFIRMED: &str = "charge:confirmed";
pub const COINBASE_CHARGE_RESOLVED: &str = "charge:resolved";

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid webhook payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {event_type} payload: {source}")]
    InvalidObject {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A verified, parsed provider delivery.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub provider: Provider,
    pub event_id: String,
    pub event_type: String,
    /// The provider object (Stripe `data.object`, Coinbase `event.data`) as delivered
    pub raw_payload: Value,
    pub payload: EventPayload,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    StripeCheckoutSession(CheckoutSession),
    CoinbaseCharge(CoinbaseCharge),
    /// An event type the service acknowledges without recording
    Ignored,
}

#[derive(Deserialize)]
struct StripeEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEnvelopeData,
}

#[derive(Deserialize)]
struct StripeEnvelopeData {
    object: Value,
}

#[derive(Deserialize)]
struct CoinbaseEnvelope {
    event: CoinbaseEventEnvelope,
}

#[derive(Deserialize)]
struct CoinbaseEventEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: Value,
}

impl ProviderEvent {
    /// Parse a Stripe event body (`{id, type, data: {object}}`).
    pub fn from_stripe_body(body: &[u8]) -> Result<Self, PayloadError> {
        let envelope: StripeEnvelope = serde_json::from_slice(body)?;
        Self::build(Provider::Stripe, envelope.id, envelope.event_type, envelope.data.object)
    }

    /// Parse a Coinbase Commerce webhook body (`{event: {id, type, data}}`).
    pub fn from_coinbase_body(body: &[u8]) -> Result<Self, PayloadError> {
        let envelope: CoinbaseEnvelope = serde_json::from_slice(body)?;
        let event = envelope.event;
        Self::build(Provider::Coinbase, event.id, event.event_type, event.data)
    }

    /// Rebuild the event from a ledger entry, for re-execution.
    pub fn from_ledger(entry: &WebhookEvent) -> Result<Self, PayloadError> {
        Self::build(
            entry.provider,
            entry.provider_event_id.clone(),
            entry.event_type.clone(),
            entry.raw_payload.clone(),
        )
    }

    fn build(provider: Provider, event_id: String, event_type: String, raw_payload: Value) -> Result<Self, PayloadError> {
        let invalid = |source| PayloadError::InvalidObject {
            event_type: event_type.clone(),
            source,
        };

        let payload = match (provider, event_type.as_str()) {
            (Provider::Stripe, STRIPE_CHECKOUT_SESSION_COMPLETED) => {
                EventPayload::StripeCheckoutSession(CheckoutSession::deserialize(&raw_payload).map_err(invalid)?)
            }
            (Provider::Coinbase, COINBASE_CHARGE_CONFIRMED | COINBASE_CHARGE_RESOLVED) => {
                EventPayload::CoinbaseCharge(CoinbaseCharge::deserialize(&raw_payload).map_err(invalid)?)
            }
            _ => EventPayload::Ignored,
        };

        Ok(Self {
            provider,
            event_id,
            event_type,
            raw_payload,
            payload,
        })
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self.payload, EventPayload::Ignored)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ===== Stripe =====

/// The subset of a Stripe Checkout Session the materializer reads.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer: Option<Expandable>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub payment_intent: Option<Expandable>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub payment_method_types: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: serde_json::Map<String, Value>,
}

/// A Stripe reference that is either an id or the expanded object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl CheckoutSession {
    pub fn metadata_str(&self, key: &str) -> Option<String> {
        metadata_str(&self.metadata, key)
    }

    pub fn customer_email(&self) -> Option<String> {
        self.metadata_str("customer_email").or_else(|| {
            let details = self.customer_details.as_ref()?;
            non_empty(details.email.as_deref()).map(str::to_string)
        })
    }

    pub fn customer_name(&self) -> Option<String> {
        self.metadata_str("customer_name").or_else(|| {
            let details = self.customer_details.as_ref()?;
            non_empty(details.name.as_deref()).map(str::to_string)
        })
    }

    pub fn customer_phone(&self) -> Option<String> {
        self.metadata_str("customer_phone").or_else(|| {
            let details = self.customer_details.as_ref()?;
            non_empty(details.phone.as_deref()).map(str::to_string)
        })
    }

    pub fn payment_intent_id(&self) -> Option<&str> {
        self.payment_intent.as_ref().map(Expandable::id).filter(|id| !id.is_empty())
    }

    pub fn customer_id(&self) -> Option<&str> {
        self.customer.as_ref().map(Expandable::id).filter(|id| !id.is_empty())
    }
}

// ===== Coinbase Commerce =====

/// The subset of a Coinbase Commerce charge the materializer reads.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinbaseCharge {
    pub id: String,
    pub code: String,
    #[serde(default)]
    pub hosted_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: serde_json::Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pricing_type: PricingType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pricing: Pricing,
    #[serde(default, deserialize_with = "null_as_default")]
    pub payments: Vec<CoinbasePayment>,
}

impl CoinbaseCharge {
    pub fn metadata_str(&self, key: &str) -> Option<String> {
        metadata_str(&self.metadata, key)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingType {
    FixedPrice,
    NoPrice,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Money {
    #[serde(deserialize_with = "amount_string")]
    pub amount: String,
    pub currency: String,
}

// Coinbase sends decimal strings; tolerate bare numbers
fn amount_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("invalid amount: {other}"))),
    }
}

/// Charge pricing entries in the order they were delivered. `local` is the price the
/// merchant set; the other entries are the equivalent in each accepted currency.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pricing {
    pub entries: Vec<(String, Money)>,
}

impl Pricing {
    pub fn local(&self) -> Option<&Money> {
        self.entries.iter().find(|(key, _)| key == "local").map(|(_, money)| money)
    }

    /// The first entry that is not `local`.
    pub fn first_settlement(&self) -> Option<&Money> {
        self.entries.iter().find(|(key, _)| key != "local").map(|(_, money)| money)
    }
}

impl<'de> Deserialize<'de> for Pricing {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PricingVisitor;

        impl<'de> Visitor<'de> for PricingVisitor {
            type Value = Pricing;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of pricing entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Pricing, A::Error> {
                let mut entries = Vec::new();
                while let Some((key, money)) = map.next_entry::<String, Option<Money>>()? {
                    if let Some(money) = money {
                        entries.push((key, money));
                    }
                }
                Ok(Pricing { entries })
            }
        }

        deserializer.deserialize_map(PricingVisitor)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinbasePayment {
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: PaymentValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentValue {
    #[serde(default)]
    pub local: Option<Money>,
    #[serde(default)]
    pub crypto: Option<Money>,
}

/// Read a metadata value as a non-empty string. Numbers and booleans are stringified.
fn metadata_str(metadata: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match metadata.get(key)? {
        Value::String(s) => non_empty(Some(s.as_str())).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
