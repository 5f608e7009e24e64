//! # payhook: payment webhook ingestion
//!
//! `payhook` receives payment-completion webhooks from Stripe Checkout and Coinbase Commerce,
//! verifies their signatures, and turns each settled charge into exactly one customer, order
//! and payment record. Every delivery is kept in an append-only ledger so that duplicates,
//! failures and manual retries stay visible to operators.
//!
//! ## Request Flow
//!
//! ```text
//! POST /webhooks/{stripe,coinbase}
//!   ├─ signature check over the raw body        (webhooks::signing)
//!   ├─ typed payload parse                      (webhooks::events)
//!   ├─ already settled?  -> 200 "Event already processed"
//!   ├─ ledger row: received -> processing       (webhooks::ledger)
//!   ├─ payment exists for the charge?           (webhooks::guard)  -> skipped_duplicate
//!   ├─ customer + order + payment               (webhooks::materializer)
//!   │     └─ unique (provider, provider_payment_id) violation -> skipped_duplicate
//!   ├─ ledger: processed | failed
//!   └─ payment confirmation email, detached     (webhooks::notify)
//! ```
//!
//! Administrators can list ledger entries and move a `failed` or `abandoned` entry back to
//! `retrying`; the [`webhooks::RetryWorker`] picks those up in the background.
//!
//! ## Storage
//!
//! All persistence goes through [`db::Store`]. [`db::PgStore`] is the production
//! implementation (migrations in `migrations/` run at startup); [`db::MemoryStore`] keeps
//! everything in process for tests and local runs (`database.type: memory`).
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use payhook::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = payhook::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     payhook::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
mod email;
pub mod errors;
mod openapi;
pub mod telemetry;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub mod test_utils;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use bon::Builder;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;

use crate::{
    config::{DatabaseConfig, PoolSettings},
    db::{MemoryStore, PgStore, Store},
    email::EmailService,
    openapi::ApiDoc,
    webhooks::{RetryWorker, WebhookPipeline, notify::Notifications},
};

/// Shared state handed to every handler.
#[derive(Clone, Builder)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Config,
    pub pipeline: WebhookPipeline,
    pub metrics: Option<PrometheusHandle>,
}

/// Get the payhook database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder once and return its handle.
///
/// The recorder is process-global, so repeated calls return the handle from the first install.
pub fn get_or_install_prometheus_handle() -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

async fn connect_postgres(url: &str, settings: &PoolSettings) -> anyhow::Result<PgPool> {
    let non_zero = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(non_zero(settings.idle_timeout_secs))
        .max_lifetime(non_zero(settings.max_lifetime_secs))
        .connect(url)
        .await?;

    migrator().run(&pool).await?;
    Ok(pool)
}

/// Open the configured store. PostgreSQL runs migrations before returning.
async fn setup_store(config: &Config) -> anyhow::Result<(Arc<dyn Store>, Option<PgPool>)> {
    match &config.database {
        DatabaseConfig::Postgres { url, pool } => {
            info!("Using PostgreSQL database");
            let pool = connect_postgres(url, pool).await?;
            Ok((Arc::new(PgStore::new(pool.clone())), Some(pool)))
        }
        DatabaseConfig::Memory => {
            warn!("Using in-memory store: all records will be lost on shutdown");
            Ok((Arc::new(MemoryStore::new()), None))
        }
    }
}

fn setup_notifications(config: &Config) -> anyhow::Result<Option<Notifications>> {
    let Some(email) = &config.email else {
        info!("Email not configured: payment confirmations will not be sent");
        return Ok(None);
    };

    let service = EmailService::new(email)?;
    Ok(Some(Notifications {
        notifier: Arc::new(service),
        company_name: email.company_name.clone(),
        support_email: email.support_email.clone(),
    }))
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let enable_metrics = state.metrics.is_some();

    let mut router = Router::new()
        .route("/healthz", get(api::handlers::healthz))
        .route("/webhooks/stripe", post(api::handlers::webhooks::stripe_webhook))
        .route("/webhooks/coinbase", post(api::handlers::webhooks::coinbase_webhook))
        .route("/admin/webhooks/retry", post(api::handlers::admin::retry_webhook_event))
        .route("/admin/webhooks/events", get(api::handlers::admin::list_webhook_events))
        .route("/admin/webhooks/events/{id}", get(api::handlers::admin::get_webhook_event))
        .merge(Scalar::with_url("/admin/docs", ApiDoc::openapi()));

    if enable_metrics {
        router = router.route("/internal/metrics", get(api::handlers::metrics));
    }

    router.with_state(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// Main application struct that owns all resources and background tasks.
///
/// 1. **Create**: [`Application::new`] opens the store, runs migrations and starts the retry worker
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, stops the worker and closes the pool
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
    pool: Option<PgPool>,
    shutdown_token: CancellationToken,
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting payhook with configuration: {:#?}", config);

        let (store, pool) = setup_store(&config).await?;
        let notifications = setup_notifications(&config)?;
        let pipeline = WebhookPipeline::new(store.clone(), notifications);

        if config.payments.stripe.is_none() {
            warn!("Stripe webhook secret not configured: /webhooks/stripe will return 500");
        }
        if config.payments.coinbase.is_none() {
            warn!("Coinbase webhook secret not configured: /webhooks/coinbase will return 500");
        }

        let metrics = if config.enable_metrics {
            Some(get_or_install_prometheus_handle()?)
        } else {
            None
        };

        let shutdown_token = CancellationToken::new();
        let mut background_tasks = Vec::new();

        if config.retry_worker.enabled {
            let worker = RetryWorker::new(store.clone(), pipeline.clone(), config.retry_worker.clone());
            let worker_shutdown = shutdown_token.clone();
            background_tasks.push(tokio::spawn(async move {
                if let Err(e) = worker.run(worker_shutdown).await {
                    tracing::error!("Webhook retry worker error: {}", e);
                }
            }));
        } else {
            info!("Retry worker disabled: entries queued for retry will not be re-executed");
        }

        let app_state = AppState::builder()
            .store(store)
            .config(config.clone())
            .pipeline(pipeline)
            .maybe_metrics(metrics)
            .build();

        let router = build_router(app_state.clone());

        Ok(Self {
            router,
            app_state,
            config,
            pool,
            shutdown_token,
            background_tasks,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.app_state
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, CancellationToken) {
        let server = axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server");
        (server, self.shutdown_token)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "payhook listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Stop background tasks and wait for them to finish their current cycle
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
