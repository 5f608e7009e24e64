//! Admin endpoints over the webhook ledger.
//!
//! All routes require a session token for the `admin` role: no token is `401`, any other
//! role is `403`.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    AppState,
    api::models::{
        pagination::Pagination,
        users::CurrentUser,
        webhooks::{ListWebhookEventsQuery, RetryWebhookRequest, RetryWebhookResponse, WebhookEventResponse, WebhookEventSummary},
    },
    db::models::webhook_events::WebhookEventFilter,
    errors::{Error, Result},
    types::{WebhookEventId, abbrev_uuid},
};

fn parse_webhook_event_id(raw: &str) -> Result<WebhookEventId> {
    Uuid::parse_str(raw.trim()).map_err(|_| Error::BadRequest {
        message: format!("Invalid webhookEventId '{raw}'"),
    })
}

#[utoipa::path(
    post,
    path = "/admin/webhooks/retry",
    tag = "admin",
    summary = "Retry webhook event",
    description = "Move a `failed` or `abandoned` ledger entry to `retrying`. The retry worker re-runs it on its next poll.",
    request_body = RetryWebhookRequest,
    responses(
        (status = 200, description = "Entry queued for retry", body = RetryWebhookResponse),
        (status = 400, description = "Missing or invalid id, or the entry is not in a retryable status"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Webhook event not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[instrument(skip_all)]
pub async fn retry_webhook_event(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<RetryWebhookRequest>,
) -> Result<Json<RetryWebhookResponse>> {
    let admin = current_user.require_admin()?;
    let raw_id = request.webhook_event_id.ok_or_else(|| Error::BadRequest {
        message: "Missing required parameter: webhookEventId".to_string(),
    })?;
    let id = parse_webhook_event_id(&raw_id)?;

    let entry = state.pipeline.ledger().request_retry(id, &admin.email).await?;
    info!(
        webhook_event_id = %abbrev_uuid(&entry.id),
        triggered_by = %admin.email,
        "Webhook event queued for retry"
    );

    Ok(Json(RetryWebhookResponse {
        success: true,
        message: "Webhook queued for retry".to_string(),
        webhook_event_id: entry.id,
    }))
}

#[utoipa::path(
    get,
    path = "/admin/webhooks/events",
    tag = "admin",
    summary = "List webhook events",
    description = "List ledger entries, newest first. Raw payloads are omitted.",
    params(ListWebhookEventsQuery, Pagination),
    responses(
        (status = 200, description = "Ledger entries", body = [WebhookEventSummary]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[instrument(skip_all)]
pub async fn list_webhook_events(
    State(state): State<AppState>,
    Query(query): Query<ListWebhookEventsQuery>,
    Query(pagination): Query<Pagination>,
    current_user: CurrentUser,
) -> Result<Json<Vec<WebhookEventSummary>>> {
    current_user.require_admin()?;

    let filter = WebhookEventFilter {
        provider: query.provider,
        status: query.status,
        skip: pagination.skip(),
        limit: pagination.limit(),
    };
    let events = state.pipeline.ledger().list_events(&filter).await?;

    Ok(Json(events.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/admin/webhooks/events/{id}",
    tag = "admin",
    summary = "Get webhook event",
    description = "Get a single ledger entry, including the payload as delivered and any retry metadata.",
    params(
        ("id" = uuid::Uuid, Path, description = "Webhook event ID"),
    ),
    responses(
        (status = 200, description = "Ledger entry", body = WebhookEventResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Webhook event not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[instrument(skip_all, fields(webhook_event_id = %abbrev_uuid(&id)))]
pub async fn get_webhook_event(
    State(state): State<AppState>,
    Path(id): Path<WebhookEventId>,
    current_user: CurrentUser,
) -> Result<Json<WebhookEventResponse>> {
    current_user.require_admin()?;

    let event = state.pipeline.ledger().get_event(id).await?;
    Ok(Json(event.into()))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use uuid::Uuid;

    use crate::{
        api::models::users::Role,
        db::models::webhook_events::WebhookEventStatus,
        test_utils::{
            STRIPE_TEST_SECRET, create_test_app, create_test_config, session_token, sign_stripe, stripe_body,
        },
    };

    /// Deliver one Stripe event whose payment write fails, leaving a `failed` entry.
    async fn failed_event(server: &axum_test::TestServer, store: &crate::db::MemoryStore) -> Uuid {
        store.fail_next_payment_write();
        let body = stripe_body("evt_fail", "cs_fail", "buyer@example.com", 4200);
        server
            .post("/webhooks/stripe")
            .add_header("stripe-signature", sign_stripe(&body, STRIPE_TEST_SECRET))
            .bytes(body.into())
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);

        let events = store.webhook_events().await;
        assert_eq!(events[0].status, WebhookEventStatus::Failed);
        events[0].id
    }

    #[tokio::test]
    async fn test_retry_requires_authentication() {
        let config = create_test_config();
        let (server, _store) = create_test_app(config);

        let response = server
            .post("/admin/webhooks/retry")
            .json(&json!({"webhookEventId": Uuid::new_v4()}))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_retry_requires_admin_role() {
        let config = create_test_config();
        let token = session_token(&config, Role::Staff);
        let (server, _store) = create_test_app(config);

        let response = server
            .post("/admin/webhooks/retry")
            .authorization_bearer(token)
            .json(&json!({"webhookEventId": Uuid::new_v4()}))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_retry_unknown_event_is_not_found() {
        let config = create_test_config();
        let token = session_token(&config, Role::Admin);
        let (server, _store) = create_test_app(config);

        let response = server
            .post("/admin/webhooks/retry")
            .authorization_bearer(token)
            .json(&json!({"webhookEventId": Uuid::new_v4()}))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_retry_malformed_id_is_bad_request() {
        let config = create_test_config();
        let token = session_token(&config, Role::Admin);
        let (server, _store) = create_test_app(config);

        let response = server
            .post("/admin/webhooks/retry")
            .authorization_bearer(token)
            .json(&json!({"webhookEventId": "not-a-uuid"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_retry_missing_id_is_bad_request() {
        let config = create_test_config();
        let token = session_token(&config, Role::Admin);
        let (server, _store) = create_test_app(config);

        let response = server
            .post("/admin/webhooks/retry")
            .authorization_bearer(token)
            .json(&json!({}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "Missing required parameter: webhookEventId");
    }

    #[tokio::test]
    async fn test_retry_processed_event_is_rejected_and_left_unchanged() {
        let config = create_test_config();
        let token = session_token(&config, Role::Admin);
        let (server, store) = create_test_app(config);

        let body = stripe_body("evt_ok", "cs_ok", "buyer@example.com", 9900);
        server
            .post("/webhooks/stripe")
            .add_header("stripe-signature", sign_stripe(&body, STRIPE_TEST_SECRET))
            .bytes(body.into())
            .await
            .assert_status_ok();
        let before = store.webhook_events().await.remove(0);
        assert_eq!(before.status, WebhookEventStatus::Processed);

        let response = server
            .post("/admin/webhooks/retry")
            .authorization_bearer(token)
            .json(&json!({"webhookEventId": before.id}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&json!({"error": "Cannot retry webhook event with status 'processed'"}));

        let after = store.webhook_events().await.remove(0);
        assert_eq!(after.status, WebhookEventStatus::Processed);
        assert!(after.retry_metadata.is_none());
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn test_retry_failed_event_queues_it_and_records_who() {
        let config = create_test_config();
        let token = session_token(&config, Role::Admin);
        let (server, store) = create_test_app(config);
        let id = failed_event(&server, &store).await;

        let response = server
            .post("/admin/webhooks/retry")
            .authorization_bearer(token.clone())
            .json(&json!({"webhookEventId": id}))
            .await;
        response.assert_status_ok();
        response.assert_json(&json!({
            "success": true,
            "message": "Webhook queued for retry",
            "webhookEventId": id,
        }));

        let response = server
            .get(&format!("/admin/webhooks/events/{id}"))
            .authorization_bearer(token)
            .await;
        response.assert_status_ok();
        let entry: Value = response.json();
        assert_eq!(entry["status"], "retrying");
        assert_eq!(entry["retry_metadata"]["retry_triggered_by"], "admin@example.com");
        assert_eq!(entry["retry_metadata"]["previous_status"], "failed");
        assert_eq!(entry["raw_payload"]["id"], "cs_fail");
    }

    #[tokio::test]
    async fn test_session_cookie_is_accepted() {
        let config = create_test_config();
        let token = session_token(&config, Role::Admin);
        let (server, store) = create_test_app(config);
        let id = failed_event(&server, &store).await;

        let response = server
            .get(&format!("/admin/webhooks/events/{id}"))
            .add_header("cookie", format!("payhook_session={token}"))
            .await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn test_list_events_filters_by_status() {
        let config = create_test_config();
        let token = session_token(&config, Role::Admin);
        let (server, store) = create_test_app(config);
        failed_event(&server, &store).await;

        let body = stripe_body("evt_ok", "cs_ok", "buyer@example.com", 9900);
        server
            .post("/webhooks/stripe")
            .add_header("stripe-signature", sign_stripe(&body, STRIPE_TEST_SECRET))
            .bytes(body.into())
            .await
            .assert_status_ok();

        let response = server
            .get("/admin/webhooks/events")
            .authorization_bearer(token.clone())
            .await;
        response.assert_status_ok();
        let all: Vec<Value> = response.json();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|e| e.get("raw_payload").is_none()));

        let response = server
            .get("/admin/webhooks/events")
            .add_query_param("status", "failed")
            .add_query_param("provider", "stripe")
            .authorization_bearer(token.clone())
            .await;
        response.assert_status_ok();
        let failed: Vec<Value> = response.json();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["provider_event_id"], "evt_fail");

        let response = server
            .get("/admin/webhooks/events")
            .add_query_param("limit", "1")
            .add_query_param("skip", "1")
            .authorization_bearer(token)
            .await;
        let page: Vec<Value> = response.json();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_event_is_not_found() {
        let config = create_test_config();
        let token = session_token(&config, Role::Admin);
        let (server, _store) = create_test_app(config);

        let response = server
            .get(&format!("/admin/webhooks/events/{}", Uuid::new_v4()))
            .authorization_bearer(token)
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }
}
