//! Shared helpers for unit and HTTP-level tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::{
    AppState,
    api::models::users::{CurrentUser, Role},
    auth::session::create_session_token,
    config::{Config, DatabaseConfig, PaymentsConfig, ProviderWebhookConfig, RetryWorkerConfig},
    db::MemoryStore,
    errors::Result,
    webhooks::{
        WebhookPipeline,
        notify::Notifier,
        signing::{sign_coinbase_payload, sign_stripe_payload},
    },
};

pub const STRIPE_TEST_SECRET: &str = "whsec_test_secret";
pub const COINBASE_TEST_SECRET: &str = "coinbase-shared-secret";

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        database: DatabaseConfig::Memory,
        payments: PaymentsConfig {
            stripe: Some(ProviderWebhookConfig {
                webhook_secret: STRIPE_TEST_SECRET.to_string(),
            }),
            coinbase: Some(ProviderWebhookConfig {
                webhook_secret: COINBASE_TEST_SECRET.to_string(),
            }),
        },
        retry_worker: RetryWorkerConfig {
            enabled: false,
            interval: Duration::from_millis(50),
            batch_size: 10,
            max_attempts: 3,
        },
        enable_metrics: false,
        ..Default::default()
    }
}

/// App state over a fresh in-memory store, without notifications.
pub fn create_test_state(config: Config) -> AppState {
    let store = Arc::new(MemoryStore::new());
    AppState::builder()
        .store(store.clone())
        .config(config)
        .pipeline(WebhookPipeline::new(store, None))
        .build()
}

/// Router over a fresh in-memory store. The store is returned for inspecting what was written.
pub fn create_test_app(config: Config) -> (TestServer, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::builder()
        .store(store.clone())
        .config(config)
        .pipeline(WebhookPipeline::new(store.clone(), None))
        .build();

    let server = TestServer::new(crate::build_router(state).into_make_service()).expect("Failed to create test server");
    (server, store)
}

/// Signed session JWT for a user with `role`.
pub fn session_token(config: &Config, role: Role) -> String {
    let email = match role {
        Role::Admin => "admin@example.com",
        Role::Staff => "staff@example.com",
    };
    let user = CurrentUser {
        id: Uuid::new_v4(),
        email: email.to_string(),
        role,
    };
    create_session_token(&user, config).expect("Failed to create session token")
}

pub fn sign_stripe(body: &str, secret: &str) -> String {
    sign_stripe_payload(body.as_bytes(), secret, Utc::now().timestamp()).expect("Failed to sign payload")
}

pub fn sign_coinbase(body: &str, secret: &str) -> String {
    sign_coinbase_payload(body.as_bytes(), secret).expect("Failed to sign payload")
}

/// A `checkout.session.completed` event body paid in USD.
///
/// No payment intent is attached, so the session id is the payment correlation key.
pub fn stripe_body(event_id: &str, session_id: &str, email: &str, amount_total: i64) -> String {
    json!({
        "id": event_id,
        "object": "event",
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "amount_total": amount_total,
                "currency": "usd",
                "customer": null,
                "customer_details": {
                    "email": email,
                    "name": "Test Buyer",
                    "phone": null
                },
                "payment_intent": null,
                "payment_method_types": ["card"],
                "metadata": {
                    "offering_id": "offering_1"
                }
            }
        }
    })
    .to_string()
}

/// A Coinbase Commerce event body for a fixed-price charge of 25.00 USD.
pub fn coinbase_body(event_id: &str, event_type: &str, charge_id: &str, code: &str, email: &str) -> String {
    json!({
        "event": {
            "id": event_id,
            "type": event_type,
            "data": {
                "id": charge_id,
                "code": code,
                "hosted_url": format!("https://commerce.coinbase.com/charges/{code}"),
                "pricing_type": "fixed_price",
                "pricing": {
                    "local": {"amount": "25.00", "currency": "USD"},
                    "bitcoin": {"amount": "0.00041000", "currency": "BTC"}
                },
                "metadata": {
                    "customer_email": email,
                    "customer_name": "Crypto Buyer"
                },
                "payments": [{
                    "network": "ethereum",
                    "transaction_id": format!("0x{code}"),
                    "status": "CONFIRMED",
                    "value": {
                        "local": {"amount": "25.00", "currency": "USD"},
                        "crypto": {"amount": "0.0100", "currency": "ETH"}
                    }
                }]
            }
        }
    })
    .to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub to_email: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html_body: String,
}

/// Notifier that keeps every message instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentEmail>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, to_email: &str, to_name: Option<&str>, subject: &str, html_body: &str) -> Result<()> {
        self.sent.lock().unwrap().push(SentEmail {
            to_email: to_email.to_string(),
            to_name: to_name.map(str::to_string),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        });
        Ok(())
    }
}
