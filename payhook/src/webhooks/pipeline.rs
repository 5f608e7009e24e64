//! Webhook processing pipeline.
//!
//! ```text
//! verified event ─┬─ ignored type ───────────────────────────────> Ignored
//!                 ├─ ledger says settled ────────────────────────> AlreadyProcessed
//!                 └─ record (received) -> processing
//!                        ├─ guard finds payment ─> skipped_duplicate ─> DuplicatePayment
//!                        ├─ materialize ok ──────> processed ─> notify ─> Processed
//!                        ├─ unique violation ────> skipped_duplicate ─> DuplicatePayment
//!                        └─ error ───────────────> failed ─> Error::Materialization
//! ```

use std::sync::Arc;

use metrics::counter;
use tracing::{info, instrument, warn};

use crate::db::Store;
use crate::db::models::webhook_events::{WebhookEvent, WebhookEventStatus};
use crate::errors::{Error, Result};
use crate::types::{WebhookEventId, abbrev_uuid};
use crate::webhooks::events::ProviderEvent;
use crate::webhooks::guard;
use crate::webhooks::ledger::Ledger;
use crate::webhooks::materializer::{self, ChargeDetails, MaterializeError, Materialized};
use crate::webhooks::notify::{Notifications, PaymentConfirmation, spawn_payment_confirmation};

/// How a delivery was settled. All variants are acknowledged with 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Event type the service does not act on; nothing recorded
    Ignored,
    /// A previous delivery of this event was already settled; nothing recorded
    AlreadyProcessed,
    /// The charge already has a payment; recorded as `skipped_duplicate`
    DuplicatePayment { webhook_event_id: WebhookEventId },
    /// Order and payment written; recorded as `processed`
    Processed {
        webhook_event_id: WebhookEventId,
        materialized: Materialized,
    },
}

impl PipelineOutcome {
    /// Acknowledgement message returned to the provider, if any.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            Self::AlreadyProcessed => Some("Event already processed"),
            Self::DuplicatePayment { .. } => Some("Payment already exists"),
            Self::Ignored | Self::Processed { .. } => None,
        }
    }
}

enum Settlement {
    Duplicate,
    Materialized(Materialized, Box<ChargeDetails>),
}

#[derive(Clone)]
pub struct WebhookPipeline {
    store: Arc<dyn Store>,
    ledger: Ledger,
    notifications: Option<Notifications>,
}

impl WebhookPipeline {
    pub fn new(store: Arc<dyn Store>, notifications: Option<Notifications>) -> Self {
        Self {
            ledger: Ledger::new(store.clone()),
            store,
            notifications,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Process a freshly delivered, verified event.
    #[instrument(skip_all, fields(provider = %event.provider, event_id = %event.event_id, event_type = %event.event_type))]
    pub async fn process(&self, event: ProviderEvent) -> Result<PipelineOutcome> {
        if !event.is_actionable() {
            info!("Ignoring unhandled event type");
            return Ok(PipelineOutcome::Ignored);
        }

        if self.ledger.is_already_processed(event.provider, &event.event_id).await? {
            info!("Event already processed");
            return Ok(PipelineOutcome::AlreadyProcessed);
        }

        let webhook_event_id = self.ledger.record_event(&event).await?;
        counter!("payhook_webhooks_received_total", "provider" => event.provider.as_str()).increment(1);
        self.ledger.mark_processing(webhook_event_id).await;

        match self.settle(&event).await {
            Ok(Settlement::Duplicate) => {
                self.ledger
                    .update_status(webhook_event_id, WebhookEventStatus::SkippedDuplicate, None)
                    .await;
                counter!("payhook_webhooks_duplicate_total", "provider" => event.provider.as_str()).increment(1);
                info!(webhook_event_id = %abbrev_uuid(&webhook_event_id), "Payment already exists, skipping");
                Ok(PipelineOutcome::DuplicatePayment { webhook_event_id })
            }
            Ok(Settlement::Materialized(materialized, details)) => {
                self.ledger
                    .update_status(webhook_event_id, WebhookEventStatus::Processed, None)
                    .await;
                counter!("payhook_webhooks_processed_total", "provider" => event.provider.as_str()).increment(1);
                self.notify(&details, &event);
                Ok(PipelineOutcome::Processed {
                    webhook_event_id,
                    materialized,
                })
            }
            Err(e) => {
                let message = e.to_string();
                self.ledger
                    .update_status(webhook_event_id, WebhookEventStatus::Failed, Some(&message))
                    .await;
                counter!("payhook_webhooks_failed_total", "provider" => event.provider.as_str()).increment(1);
                Err(Error::Materialization {
                    provider: event.provider,
                    event_id: event.event_id.clone(),
                    message,
                })
            }
        }
    }

    /// Re-run guard and materializer for an entry the retry worker has claimed.
    ///
    /// No new ledger row is created; the entry's own status is updated. A failure on the
    /// final attempt abandons the entry instead of failing it.
    #[instrument(skip_all, fields(webhook_event_id = %abbrev_uuid(&entry.id), attempts = entry.attempts))]
    pub async fn reprocess(&self, entry: &WebhookEvent, final_attempt: bool) -> WebhookEventStatus {
        let failure_status = if final_attempt {
            WebhookEventStatus::Abandoned
        } else {
            WebhookEventStatus::Failed
        };

        let event = match ProviderEvent::from_ledger(entry) {
            Ok(event) => event,
            Err(e) => {
                // A stored payload that no longer parses will not parse next time either
                warn!(error = %e, "Stored payload could not be parsed");
                self.ledger
                    .update_status(entry.id, WebhookEventStatus::Failed, Some(&e.to_string()))
                    .await;
                return WebhookEventStatus::Failed;
            }
        };

        let status = match self.settle(&event).await {
            Ok(Settlement::Duplicate) => WebhookEventStatus::SkippedDuplicate,
            Ok(Settlement::Materialized(_, details)) => {
                self.notify(&details, &event);
                WebhookEventStatus::Processed
            }
            Err(e) => {
                self.ledger.update_status(entry.id, failure_status, Some(&e.to_string())).await;
                counter!("payhook_webhooks_failed_total", "provider" => event.provider.as_str()).increment(1);
                return failure_status;
            }
        };

        self.ledger.update_status(entry.id, status, None).await;
        status
    }

    async fn settle(&self, event: &ProviderEvent) -> std::result::Result<Settlement, MaterializeError> {
        let keys = guard::correlation_keys(event);
        if guard::exists_for_correlation_keys(self.store.as_ref(), event.provider, &keys).await? {
            return Ok(Settlement::Duplicate);
        }

        let details = ChargeDetails::from_event(event)?;
        match materializer::materialize(self.store.as_ref(), &details).await {
            Ok(materialized) => Ok(Settlement::Materialized(materialized, Box::new(details))),
            Err(MaterializeError::DuplicatePayment) => Ok(Settlement::Duplicate),
            Err(e) => Err(e),
        }
    }

    fn notify(&self, details: &ChargeDetails, event: &ProviderEvent) {
        let confirmation = PaymentConfirmation {
            to_email: details.email.clone(),
            customer_name: details.name.clone(),
            amount: details.amount,
            currency: details.currency.clone(),
            provider: details.provider,
            transaction_id: details.reference.clone(),
            transaction_url: details.transaction_url.clone(),
        };
        tracing::debug!(event_id = %event.event_id, "Queueing payment confirmation");
        spawn_payment_confirmation(self.notifications.clone(), confirmation);
    }
}
