//! Provider webhook endpoints.
//!
//! Both handlers take the raw body as [`Bytes`] so that signature verification runs over the
//! exact bytes the provider signed. Nothing is written until the signature checks out and the
//! payload parses.

use axum::{Json, body::Bytes, extract::State, http::HeaderMap, http::StatusCode};
use tracing::{instrument, warn};

use crate::{
    AppState,
    api::models::webhooks::WebhookAck,
    errors::{Error, Result},
    types::Provider,
    webhooks::{
        ProviderEvent,
        events::PayloadError,
        signing::{
            COINBASE_SIGNATURE_HEADER, STRIPE_SIGNATURE_HEADER, SignatureError, verify_coinbase_signature, verify_stripe_signature,
        },
    },
};

fn signature_header<'a>(headers: &'a HeaderMap, name: &'static str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn missing_secret(provider: Provider) -> Error {
    warn!(%provider, "Webhook received but no webhook secret is configured");
    Error::Configuration {
        message: format!("{} webhook secret not configured", provider.display_name()),
    }
}

fn malformed_payload(provider: Provider, e: PayloadError) -> Error {
    Error::BadRequest {
        message: format!("Invalid {} webhook payload: {e}", provider.display_name()),
    }
}

#[utoipa::path(
    post,
    path = "/webhooks/stripe",
    tag = "webhooks",
    summary = "Stripe webhook",
    description = "Receives Stripe events. `checkout.session.completed` records the customer, order and payment; \
                   other event types are acknowledged without action.",
    params(
        ("stripe-signature" = String, Header, description = "Stripe signature header `t=...,v1=...`"),
    ),
    request_body(content = Object, content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature, or malformed payload"),
        (status = 500, description = "Webhook secret not configured, or the event could not be recorded"),
    )
)]
#[instrument(skip_all, fields(provider = "stripe"))]
pub async fn stripe_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<WebhookAck>> {
    let secret = state.config.stripe_webhook_secret().ok_or_else(|| missing_secret(Provider::Stripe))?;

    let signature = signature_header(&headers, STRIPE_SIGNATURE_HEADER).ok_or_else(|| Error::InvalidSignature {
        message: "Stripe signature missing".to_string(),
        status: StatusCode::BAD_REQUEST,
    })?;

    verify_stripe_signature(&body, signature, secret).map_err(|e| Error::InvalidSignature {
        message: format!("Webhook Error: {e}"),
        status: StatusCode::BAD_REQUEST,
    })?;

    let event = ProviderEvent::from_stripe_body(&body).map_err(|e| malformed_payload(Provider::Stripe, e))?;
    let outcome = state.pipeline.process(event).await?;

    Ok(Json(WebhookAck::from(&outcome)))
}

#[utoipa::path(
    post,
    path = "/webhooks/coinbase",
    tag = "webhooks",
    summary = "Coinbase Commerce webhook",
    description = "Receives Coinbase Commerce events. `charge:confirmed` and `charge:resolved` record the customer, \
                   order and payment; other event types are acknowledged without action.",
    params(
        ("x-cc-webhook-signature" = String, Header, description = "Hex HMAC-SHA256 of the raw body"),
    ),
    request_body(content = Object, content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Missing signature header, or malformed payload"),
        (status = 401, description = "Signature does not match the body"),
        (status = 500, description = "Webhook secret not configured, or the event could not be recorded"),
    )
)]
#[instrument(skip_all, fields(provider = "coinbase"))]
pub async fn coinbase_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<WebhookAck>> {
    let secret = state
        .config
        .coinbase_webhook_secret()
        .ok_or_else(|| missing_secret(Provider::Coinbase))?;

    let signature = signature_header(&headers, COINBASE_SIGNATURE_HEADER).ok_or_else(|| Error::InvalidSignature {
        message: "Missing signature header".to_string(),
        status: StatusCode::BAD_REQUEST,
    })?;

    verify_coinbase_signature(&body, signature, secret).map_err(|e| Error::InvalidSignature {
        status: match e {
            SignatureError::Mismatch => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        },
        message: match e {
            SignatureError::Mismatch => "Invalid signature".to_string(),
            other => format!("Invalid signature: {other}"),
        },
    })?;

    let event = ProviderEvent::from_coinbase_body(&body).map_err(|e| malformed_payload(Provider::Coinbase, e))?;
    let outcome = state.pipeline.process(event).await?;

    Ok(Json(WebhookAck::from(&outcome)))
}
