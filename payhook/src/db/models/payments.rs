//! Database models for payments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CustomerId, OrderId, PaymentId, Provider};

/// Name of the unique constraint on (provider, provider_payment_id).
pub const PAYMENTS_PROVIDER_PAYMENT_ID_UNIQUE: &str = "payments_provider_payment_id_unique";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            _ => Err(format!("Unknown payment status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub provider: Provider,
    pub provider_payment_id: String,
    pub provider_session_id: Option<String>,
    pub provider_charge_id: Option<String>,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payment to write alongside its order. `order_id` is assigned by the store.
#[derive(Debug, Clone)]
pub struct PaymentCreateDBRequest {
    pub customer_id: CustomerId,
    pub provider: Provider,
    pub provider_payment_id: String,
    pub provider_session_id: Option<String>,
    pub provider_charge_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: String,
    pub metadata: serde_json::Value,
}

/// Provider identifiers that tie a payment back to the charge that produced it.
/// A payment matches when any supplied key matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationKeys {
    pub provider_session_id: Option<String>,
    pub provider_charge_id: Option<String>,
    pub provider_payment_id: Option<String>,
}

impl CorrelationKeys {
    pub fn is_empty(&self) -> bool {
        self.provider_session_id.is_none() && self.provider_charge_id.is_none() && self.provider_payment_id.is_none()
    }

    /// Whether `payment` carries any of these keys.
    pub fn matches(&self, payment: &Payment) -> bool {
        fn eq(key: &Option<String>, value: Option<&str>) -> bool {
            matches!((key.as_deref(), value), (Some(k), Some(v)) if k == v)
        }

        eq(&self.provider_session_id, payment.provider_session_id.as_deref())
            || eq(&self.provider_charge_id, payment.provider_charge_id.as_deref())
            || eq(&self.provider_payment_id, Some(payment.provider_payment_id.as_str()))
    }
}
