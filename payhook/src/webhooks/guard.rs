//! Duplicate-payment guard.
//!
//! Providers re-deliver, and the same charge can arrive under different event ids (Coinbase
//! sends both `charge:confirmed` and `charge:resolved`). Before materializing, the guard looks
//! for an existing payment carrying any of the charge's correlation keys.
//!
//! This is a fast path only. The unique constraint on (provider, provider_payment_id) is what
//! actually prevents a second payment when two deliveries race past this check.

use tracing::debug;

use crate::db::Store;
use crate::db::errors::Result;
use crate::db::models::payments::CorrelationKeys;
use crate::types::Provider;
use crate::webhooks::events::{EventPayload, ProviderEvent};

/// Correlation keys for an actionable event; empty for ignored events.
pub fn correlation_keys(event: &ProviderEvent) -> CorrelationKeys {
    match &event.payload {
        EventPayload::StripeCheckoutSession(session) => CorrelationKeys {
            provider_session_id: Some(session.id.clone()),
            provider_charge_id: None,
            provider_payment_id: Some(session.payment_intent_id().unwrap_or(&session.id).to_string()),
        },
        EventPayload::CoinbaseCharge(charge) => CorrelationKeys {
            provider_session_id: None,
            provider_charge_id: Some(charge.id.clone()),
            provider_payment_id: Some(charge.code.clone()),
        },
        EventPayload::Ignored => CorrelationKeys::default(),
    }
}

/// Whether a payment matching any of `keys` already exists for `provider`.
pub async fn exists_for_correlation_keys(store: &dyn Store, provider: Provider, keys: &CorrelationKeys) -> Result<bool> {
    if keys.is_empty() {
        return Ok(false);
    }

    let exists = store.payment_exists(provider, keys).await?;
    if exists {
        debug!(provider = %provider, ?keys, "Payment already recorded for correlation keys");
    }
    Ok(exists)
}
