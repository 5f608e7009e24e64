//! Database repository for the webhook event ledger.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::db::errors::{DbError, Result};
use crate::db::models::webhook_events::{
    RetryMetadata, StatusTransition, WebhookEvent, WebhookEventCreateDBRequest, WebhookEventFilter, WebhookEventStatus,
};
use crate::types::{Provider, WebhookEventId, abbrev_uuid};

const COLUMNS: &str = "id, provider, provider_event_id, event_type, status, raw_payload, error_message, \
                       retry_metadata, attempts, received_at, updated_at";

// Database entity model for a ledger row
#[derive(Debug, Clone, FromRow)]
struct WebhookEventRow {
    id: Uuid,
    provider: String,
    provider_event_id: String,
    event_type: String,
    status: String,
    raw_payload: serde_json::Value,
    error_message: Option<String>,
    retry_metadata: Option<serde_json::Value>,
    attempts: i32,
    received_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WebhookEventRow> for WebhookEvent {
    type Error = DbError;

    fn try_from(row: WebhookEventRow) -> Result<Self> {
        let provider = row.provider.parse::<Provider>().map_err(|e| DbError::Other(anyhow::anyhow!(e)))?;
        let status = row
            .status
            .parse::<WebhookEventStatus>()
            .map_err(|e| DbError::Other(anyhow::anyhow!(e)))?;
        let retry_metadata = row
            .retry_metadata
            .map(serde_json::from_value::<RetryMetadata>)
            .transpose()
            .map_err(|e| DbError::Other(e.into()))?;

        Ok(Self {
            id: row.id,
            provider,
            provider_event_id: row.provider_event_id,
            event_type: row.event_type,
            status,
            raw_payload: row.raw_payload,
            error_message: row.error_message,
            retry_metadata,
            attempts: row.attempts,
            received_at: row.received_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_events(rows: Vec<WebhookEventRow>) -> Result<Vec<WebhookEvent>> {
    rows.into_iter().map(WebhookEvent::try_from).collect()
}

/// Repository for ledger operations.
pub struct WebhookEvents<'c> {
    db: &'c mut PgConnection,
}

impl<'c> WebhookEvents<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(provider = %request.provider, provider_event_id = %request.provider_event_id), err)]
    pub async fn create(&mut self, request: &WebhookEventCreateDBRequest) -> Result<WebhookEvent> {
        let row = sqlx::query_as::<_, WebhookEventRow>(&format!(
            r#"
            INSERT INTO webhook_events (id, provider, provider_event_id, event_type, status, raw_payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(request.provider.as_str())
        .bind(&request.provider_event_id)
        .bind(&request.event_type)
        .bind(WebhookEventStatus::Received.as_str())
        .bind(&request.raw_payload)
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }

    #[instrument(skip(self), fields(webhook_event_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: WebhookEventId) -> Result<Option<WebhookEvent>> {
        let row = sqlx::query_as::<_, WebhookEventRow>(&format!("SELECT {COLUMNS} FROM webhook_events WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        row.map(WebhookEvent::try_from).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self, filter: &WebhookEventFilter) -> Result<Vec<WebhookEvent>> {
        let rows = sqlx::query_as::<_, WebhookEventRow>(&format!(
            r#"
            SELECT {COLUMNS} FROM webhook_events
            WHERE ($1::text IS NULL OR provider = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY received_at DESC, id
            OFFSET $3
            LIMIT $4
            "#
        ))
        .bind(filter.provider.map(|p| p.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.skip)
        .bind(filter.limit)
        .fetch_all(&mut *self.db)
        .await?;

        into_events(rows)
    }

    #[instrument(skip(self), err)]
    pub async fn has_settled(&mut self, provider: Provider, provider_event_id: &str) -> Result<bool> {
        let settled = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM webhook_events
                WHERE provider = $1
                  AND provider_event_id = $2
                  AND status = ANY($3)
            )
            "#,
        )
        .bind(provider.as_str())
        .bind(provider_event_id)
        .bind(vec![
            WebhookEventStatus::Processed.as_str().to_string(),
            WebhookEventStatus::SkippedDuplicate.as_str().to_string(),
        ])
        .fetch_one(&mut *self.db)
        .await?;

        Ok(settled)
    }

    #[instrument(skip(self, error_message), fields(webhook_event_id = %abbrev_uuid(&id), status = %status), err)]
    pub async fn set_status(&mut self, id: WebhookEventId, status: WebhookEventStatus, error_message: Option<&str>) -> Result<WebhookEvent> {
        let row = sqlx::query_as::<_, WebhookEventRow>(&format!(
            r#"
            UPDATE webhook_events
            SET status = $2, error_message = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }

    /// Conditional update; a row that exists but is in another status is reported as rejected.
    #[instrument(skip(self, from, retry_metadata), fields(webhook_event_id = %abbrev_uuid(&id), to = %to), err)]
    pub async fn transition(
        &mut self,
        id: WebhookEventId,
        from: &[WebhookEventStatus],
        to: WebhookEventStatus,
        retry_metadata: Option<&RetryMetadata>,
    ) -> Result<StatusTransition> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let retry_metadata = retry_metadata
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| DbError::Other(e.into()))?;

        let updated = sqlx::query_as::<_, WebhookEventRow>(&format!(
            r#"
            UPDATE webhook_events
            SET status = $3,
                retry_metadata = COALESCE($4, retry_metadata),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(from)
        .bind(to.as_str())
        .bind(retry_metadata)
        .fetch_optional(&mut *self.db)
        .await?;

        if let Some(row) = updated {
            return Ok(StatusTransition::Applied(row.try_into()?));
        }

        match self.get_by_id(id).await? {
            Some(current) => Ok(StatusTransition::Rejected(current)),
            None => Err(DbError::NotFound),
        }
    }

    /// Claim retrying entries. `SKIP LOCKED` lets several workers poll the same table.
    #[instrument(skip(self), err)]
    pub async fn claim_retrying(&mut self, limit: i64) -> Result<Vec<WebhookEvent>> {
        let rows = sqlx::query_as::<_, WebhookEventRow>(&format!(
            r#"
            UPDATE webhook_events
            SET status = $1, attempts = attempts + 1, updated_at = NOW()
            WHERE id IN (
                SELECT id FROM webhook_events
                WHERE status = $2
                ORDER BY updated_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COLUMNS}
            "#
        ))
        .bind(WebhookEventStatus::Processing.as_str())
        .bind(WebhookEventStatus::Retrying.as_str())
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        into_events(rows)
    }
}
