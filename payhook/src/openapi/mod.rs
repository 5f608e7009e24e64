//! OpenAPI documentation for the webhook and admin endpoints, served at `/admin/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, db, types};

/// Security schemes for the admin endpoints.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Admin session token. Include it in the `Authorization` header:\n\n\
                            ```\nAuthorization: Bearer YOUR_SESSION_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
            components.security_schemes.insert(
                "CookieAuth".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "payhook_session",
                    "The same session token, carried in the session cookie (name set by `auth.cookie_name`).",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "payhook",
        description = "Webhook ingestion and idempotent payment recording for Stripe Checkout and Coinbase Commerce."
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::healthz,
        api::handlers::webhooks::stripe_webhook,
        api::handlers::webhooks::coinbase_webhook,
        api::handlers::admin::retry_webhook_event,
        api::handlers::admin::list_webhook_events,
        api::handlers::admin::get_webhook_event,
    ),
    components(
        schemas(
            types::Provider,
            db::models::webhook_events::WebhookEventStatus,
            db::models::webhook_events::RetryMetadata,
            api::models::webhooks::WebhookAck,
            api::models::webhooks::RetryWebhookRequest,
            api::models::webhooks::RetryWebhookResponse,
            api::models::webhooks::WebhookEventSummary,
            api::models::webhooks::WebhookEventResponse,
        )
    ),
    tags(
        (name = "webhooks", description = "Signed deliveries from payment providers"),
        (name = "admin", description = "Webhook ledger inspection and manual retry"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_lists_all_routes() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthz",
            "/webhooks/stripe",
            "/webhooks/coinbase",
            "/admin/webhooks/retry",
            "/admin/webhooks/events",
            "/admin/webhooks/events/{id}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }

        let schemes = &doc.components.as_ref().unwrap().security_schemes;
        assert!(schemes.contains_key("BearerAuth"));
        assert!(schemes.contains_key("CookieAuth"));
    }
}
