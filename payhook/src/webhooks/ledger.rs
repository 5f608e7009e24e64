//! Append-only ledger of provider deliveries.
//!
//! Every actionable delivery gets its own row, so duplicates and failures stay visible to
//! operators. The ledger is also the idempotency check: an event that has already been
//! settled is acknowledged without touching the materializer again.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, instrument};

use crate::db::Store;
use crate::db::errors::DbError;
use crate::db::models::webhook_events::{
    RetryMetadata, StatusTransition, WebhookEvent, WebhookEventCreateDBRequest, WebhookEventFilter, WebhookEventStatus,
};
use crate::errors::{Error, Result};
use crate::types::{Provider, WebhookEventId, abbrev_uuid};
use crate::webhooks::events::ProviderEvent;

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Whether a delivery of this event has already been processed or skipped as a duplicate.
    pub async fn is_already_processed(&self, provider: Provider, provider_event_id: &str) -> Result<bool> {
        Ok(self.store.has_settled_webhook_event(provider, provider_event_id).await?)
    }

    /// Record a delivery in `received`. Failing to record is fatal for the request.
    #[instrument(skip(self, event), fields(provider = %event.provider, event_id = %event.event_id), err)]
    pub async fn record_event(&self, event: &ProviderEvent) -> Result<WebhookEventId> {
        let entry = self
            .store
            .insert_webhook_event(&WebhookEventCreateDBRequest {
                provider: event.provider,
                provider_event_id: event.event_id.clone(),
                event_type: event.event_type.clone(),
                raw_payload: event.raw_payload.clone(),
            })
            .await?;
        Ok(entry.id)
    }

    pub async fn mark_processing(&self, id: WebhookEventId) {
        self.update_status(id, WebhookEventStatus::Processing, None).await;
    }

    /// Best-effort status write. The error message is only kept for `failed` and `abandoned`.
    ///
    /// Errors are logged and swallowed: by the time this runs the outcome of the delivery is
    /// already decided and the caller must still acknowledge it.
    pub async fn update_status(&self, id: WebhookEventId, status: WebhookEventStatus, error_message: Option<&str>) {
        let error_message = error_message.filter(|_| status.is_failure());
        if let Err(e) = self.store.set_webhook_event_status(id, status, error_message).await {
            error!(
                webhook_event_id = %abbrev_uuid(&id),
                status = %status,
                error = %e,
                "Failed to update webhook event status"
            );
        }
    }

    /// Queue a failed or abandoned entry for another attempt.
    ///
    /// The status check and the write are one conditional update, so of two concurrent
    /// requests for the same entry exactly one succeeds.
    #[instrument(skip(self), fields(webhook_event_id = %abbrev_uuid(&id)), err)]
    pub async fn request_retry(&self, id: WebhookEventId, triggered_by: &str) -> Result<WebhookEvent> {
        let current = self.get_event(id).await?;
        if !current.status.is_retryable() {
            return Err(Error::InvalidStateTransition {
                from: current.status,
                to: WebhookEventStatus::Retrying,
            });
        }

        let metadata = RetryMetadata {
            retry_triggered_by: triggered_by.to_string(),
            retry_triggered_at: Utc::now(),
            previous_status: current.status,
        };

        let retryable = [WebhookEventStatus::Failed, WebhookEventStatus::Abandoned];
        match self
            .store
            .transition_webhook_event(id, &retryable, WebhookEventStatus::Retrying, Some(&metadata))
            .await
        {
            Ok(StatusTransition::Applied(entry)) => Ok(entry),
            Ok(StatusTransition::Rejected(entry)) => Err(Error::InvalidStateTransition {
                from: entry.status,
                to: WebhookEventStatus::Retrying,
            }),
            Err(DbError::NotFound) => Err(not_found(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_event(&self, id: WebhookEventId) -> Result<WebhookEvent> {
        self.store.get_webhook_event(id).await?.ok_or_else(|| not_found(id))
    }

    pub async fn list_events(&self, filter: &WebhookEventFilter) -> Result<Vec<WebhookEvent>> {
        Ok(self.store.list_webhook_events(filter).await?)
    }
}

fn not_found(id: WebhookEventId) -> Error {
    Error::NotFound {
        resource: "Webhook event".to_string(),
        id: id.to_string(),
    }
}
