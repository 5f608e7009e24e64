//! Retry worker: re-executes ledger entries an administrator moved to `retrying`.
//!
//! ```text
//! worker.tick()
//!   ├─ DB: claim_retrying_webhook_events()   // retrying -> processing, attempts += 1
//!   └─ for each claimed entry:
//!        └─ pipeline.reprocess()              // -> processed | skipped_duplicate | failed | abandoned
//! ```
//!
//! Entries that fail again go back to `failed` and wait for another manual retry; once an
//! entry has been claimed `max_attempts` times a further failure abandons it.

use std::sync::Arc;

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RetryWorkerConfig;
use crate::db::Store;
use crate::webhooks::pipeline::WebhookPipeline;

pub struct RetryWorker {
    store: Arc<dyn Store>,
    pipeline: WebhookPipeline,
    config: RetryWorkerConfig,
}

impl RetryWorker {
    pub fn new(store: Arc<dyn Store>, pipeline: WebhookPipeline, config: RetryWorkerConfig) -> Self {
        Self { store, pipeline, config }
    }

    /// Run one cycle. Returns the number of entries re-executed.
    pub async fn tick(&self) -> usize {
        let claimed = match self.store.claim_retrying_webhook_events(self.config.batch_size).await {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(error = %e, "Failed to claim retrying webhook events");
                return 0;
            }
        };

        if claimed.is_empty() {
            debug!("No webhook events to retry");
            return 0;
        }

        for entry in &claimed {
            counter!("payhook_retry_attempts_total", "provider" => entry.provider.as_str()).increment(1);
            let final_attempt = entry.attempts >= self.config.max_attempts;
            let status = self.pipeline.reprocess(entry, final_attempt).await;
            info!(
                provider = %entry.provider,
                provider_event_id = %entry.provider_event_id,
                attempts = entry.attempts,
                status = %status,
                "Retried webhook event"
            );
        }

        claimed.len()
    }

    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(
            "Starting webhook retry worker with {:?} interval, batch size {}",
            self.config.interval, self.config.batch_size
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Webhook retry worker shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::db::models::webhook_events::WebhookEventStatus;
    use crate::test_utils::stripe_body;
    use crate::webhooks::events::ProviderEvent;
    use std::time::Duration;

    fn worker(store: Arc<MemoryStore>, max_attempts: i32) -> RetryWorker {
        let pipeline = WebhookPipeline::new(store.clone(), None);
        RetryWorker::new(
            store,
            pipeline,
            RetryWorkerConfig {
                enabled: true,
                interval: Duration::from_millis(10),
                batch_size: 10,
                max_attempts,
            },
        )
    }

    /// Deliver one Stripe event whose materialization fails, then queue it for retry.
    async fn failed_and_queued(store: &Arc<MemoryStore>, pipeline: &WebhookPipeline) -> uuid::Uuid {
        store.fail_next_payment_write();
        let event = ProviderEvent::from_stripe_body(stripe_body("evt_1", "cs_1", "buyer@example.com", 9900).as_bytes()).unwrap();
        assert!(pipeline.process(event).await.is_err());

        let id = store.webhook_events().await[0].id;
        pipeline.ledger().request_retry(id, "admin@example.com").await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_retry_worker_materializes_queued_event() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker(store.clone(), 3);
        let id = failed_and_queued(&store, &worker.pipeline).await;

        assert_eq!(worker.tick().await, 1);

        let entry = worker.pipeline.ledger().get_event(id).await.unwrap();
        assert_eq!(entry.status, WebhookEventStatus::Processed);
        assert_eq!(entry.attempts, 1);
        assert_eq!(store.payments().await.len(), 1);

        // nothing left to claim
        assert_eq!(worker.tick().await, 0);
    }

    #[tokio::test]
    async fn test_retry_worker_fails_then_abandons() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker(store.clone(), 2);
        let id = failed_and_queued(&store, &worker.pipeline).await;

        store.fail_next_payment_write();
        worker.tick().await;
        let entry = worker.pipeline.ledger().get_event(id).await.unwrap();
        assert_eq!(entry.status, WebhookEventStatus::Failed);
        assert_eq!(entry.attempts, 1);

        worker.pipeline.ledger().request_retry(id, "admin@example.com").await.unwrap();
        store.fail_next_payment_write();
        worker.tick().await;
        let entry = worker.pipeline.ledger().get_event(id).await.unwrap();
        assert_eq!(entry.status, WebhookEventStatus::Abandoned);
        assert_eq!(entry.attempts, 2);
        assert!(entry.error_message.is_some(), "abandoned entry lost its failure reason");
        assert!(store.payments().await.is_empty());

        // abandoned entries can still be retried by hand
        worker.pipeline.ledger().request_retry(id, "admin@example.com").await.unwrap();
        worker.tick().await;
        assert_eq!(
            worker.pipeline.ledger().get_event(id).await.unwrap().status,
            WebhookEventStatus::Processed
        );
    }

    #[tokio::test]
    async fn test_retry_worker_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker(store, 3).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "worker did not stop after cancellation");
    }
}
