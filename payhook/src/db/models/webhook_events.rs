//! Database models for the webhook event ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::{Provider, WebhookEventId};

/// Processing status of a ledger entry.
///
/// ```text
/// received -> processing -> processed | skipped_duplicate | failed
/// failed | abandoned -> retrying -> processing -> processed | skipped_duplicate | failed | abandoned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventStatus {
    /// Recorded, not yet picked up
    Received,
    /// Materialization in progress
    Processing,
    /// Order and payment written
    Processed,
    /// A payment for the same charge already existed
    SkippedDuplicate,
    /// Materialization failed, eligible for manual retry
    Failed,
    /// Queued for re-execution by the retry worker
    Retrying,
    /// Retry worker gave up after the maximum number of attempts
    Abandoned,
}

impl WebhookEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::SkippedDuplicate => "skipped_duplicate",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Abandoned => "abandoned",
        }
    }

    /// Statuses that mean the event never needs materializing again.
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, Self::Processed | Self::SkippedDuplicate)
    }

    /// Statuses that record why processing stopped.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Abandoned)
    }

    /// Statuses an administrator may move back to `retrying`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed | Self::Abandoned)
    }

    pub fn can_transition_to(&self, next: WebhookEventStatus) -> bool {
        use WebhookEventStatus::*;
        match self {
            // `processing` may be skipped if writing it failed
            Received => matches!(next, Processing | Processed | SkippedDuplicate | Failed),
            Processing => matches!(next, Processed | SkippedDuplicate | Failed | Abandoned),
            Failed | Abandoned => next == Retrying,
            Retrying => next == Processing,
            Processed | SkippedDuplicate => false,
        }
    }
}

impl std::fmt::Display for WebhookEventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WebhookEventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "skipped_duplicate" => Ok(Self::SkippedDuplicate),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(format!("Unknown webhook event status: {}", s)),
        }
    }
}

/// Audit trail written when an administrator requests a retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RetryMetadata {
    pub retry_triggered_by: String,
    pub retry_triggered_at: DateTime<Utc>,
    pub previous_status: WebhookEventStatus,
}

/// A single provider delivery as recorded in the ledger.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: WebhookEventId,
    pub provider: Provider,
    pub provider_event_id: String,
    pub event_type: String,
    pub status: WebhookEventStatus,
    /// Provider object exactly as delivered, kept for audit and replay
    pub raw_payload: serde_json::Value,
    pub error_message: Option<String>,
    pub retry_metadata: Option<RetryMetadata>,
    /// Number of times the retry worker has claimed this entry
    pub attempts: i32,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to record a new delivery.
#[derive(Debug, Clone)]
pub struct WebhookEventCreateDBRequest {
    pub provider: Provider,
    pub provider_event_id: String,
    pub event_type: String,
    pub raw_payload: serde_json::Value,
}

/// Filter for listing ledger entries, newest first.
#[derive(Debug, Clone)]
pub struct WebhookEventFilter {
    pub provider: Option<Provider>,
    pub status: Option<WebhookEventStatus>,
    pub skip: i64,
    pub limit: i64,
}

impl Default for WebhookEventFilter {
    fn default() -> Self {
        Self {
            provider: None,
            status: None,
            skip: 0,
            limit: 50,
        }
    }
}

/// Result of a conditional status change.
#[derive(Debug, Clone)]
pub enum StatusTransition {
    /// The entry was in one of the expected statuses and has been updated
    Applied(WebhookEvent),
    /// The entry exists but its current status did not match; nothing was written
    Rejected(WebhookEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use WebhookEventStatus::*;

    const ALL: [WebhookEventStatus; 7] = [Received, Processing, Processed, SkippedDuplicate, Failed, Retrying, Abandoned];

    #[test]
    fn test_status_round_trips_through_its_text_form() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<WebhookEventStatus>().unwrap(), status);
            assert_eq!(serde_json::to_value(status).unwrap(), serde_json::json!(status.as_str()));
        }
    }

    #[test]
    fn test_only_failed_and_abandoned_are_retryable() {
        let retryable: Vec<_> = ALL.into_iter().filter(|s| s.is_retryable()).collect();
        assert_eq!(retryable, vec![Failed, Abandoned]);
    }

    #[test]
    fn test_terminal_success_statuses_have_no_outgoing_transitions() {
        for status in ALL.into_iter().filter(|s| s.is_terminal_success()) {
            assert!(ALL.iter().all(|next| !status.can_transition_to(*next)));
        }
    }

    #[test]
    fn test_retry_path() {
        assert!(Failed.can_transition_to(Retrying));
        assert!(Abandoned.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Abandoned));

        assert!(!Processed.can_transition_to(Retrying));
        assert!(!Received.can_transition_to(Retrying));
        assert!(!Retrying.can_transition_to(Processed));
    }
}
