//! API request/response models for webhook ingestion and the admin ledger view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::models::webhook_events::{RetryMetadata, WebhookEvent, WebhookEventStatus};
use crate::types::{Provider, WebhookEventId};
use crate::webhooks::PipelineOutcome;

/// Acknowledgement returned to the provider for every accepted delivery.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&PipelineOutcome> for WebhookAck {
    fn from(outcome: &PipelineOutcome) -> Self {
        Self {
            received: true,
            message: outcome.message().map(str::to_string),
        }
    }
}

/// Admin request to requeue a ledger entry.
///
/// The id is taken as an optional string so that a missing or malformed value is a `400`
/// rather than a body rejection.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryWebhookRequest {
    #[schema(format = "uuid")]
    pub webhook_event_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryWebhookResponse {
    pub success: bool,
    pub message: String,
    #[schema(value_type = String, format = "uuid")]
    pub webhook_event_id: WebhookEventId,
}

/// Query parameters for listing ledger entries.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListWebhookEventsQuery {
    /// Only entries from this provider
    pub provider: Option<Provider>,
    /// Only entries in this status
    pub status: Option<WebhookEventStatus>,
}

/// Ledger entry as listed, without the raw payload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookEventSummary {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub provider: Provider,
    pub provider_event_id: String,
    pub event_type: String,
    pub status: WebhookEventStatus,
    pub error_message: Option<String>,
    pub attempts: i32,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WebhookEvent> for WebhookEventSummary {
    fn from(event: WebhookEvent) -> Self {
        Self {
            id: event.id,
            provider: event.provider,
            provider_event_id: event.provider_event_id,
            event_type: event.event_type,
            status: event.status,
            error_message: event.error_message,
            attempts: event.attempts,
            received_at: event.received_at,
            updated_at: event.updated_at,
        }
    }
}

/// Full ledger entry, including the payload as delivered.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookEventResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub provider: Provider,
    pub provider_event_id: String,
    pub event_type: String,
    pub status: WebhookEventStatus,
    #[schema(value_type = Object)]
    pub raw_payload: Value,
    pub error_message: Option<String>,
    pub retry_metadata: Option<RetryMetadata>,
    pub attempts: i32,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WebhookEvent> for WebhookEventResponse {
    fn from(event: WebhookEvent) -> Self {
        Self {
            id: event.id,
            provider: event.provider,
            provider_event_id: event.provider_event_id,
            event_type: event.event_type,
            status: event.status,
            raw_payload: event.raw_payload,
            error_message: event.error_message,
            retry_metadata: event.retry_metadata,
            attempts: event.attempts,
            received_at: event.received_at,
            updated_at: event.updated_at,
        }
    }
}
