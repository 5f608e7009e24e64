//! Inbound payment webhook processing.
//!
//! - [`signing`]: HMAC-SHA256 verification of Stripe and Coinbase signature headers
//! - [`events`]: Provider payload types, validated at the boundary
//! - [`ledger`]: Append-only record of every delivery and its processing status
//! - [`guard`]: Duplicate-payment check on provider correlation keys
//! - [`customers`]: Email-keyed customer resolution with gap-fill
//! - [`materializer`]: Customer + Order + Payment creation from a settled charge
//! - [`notify`]: Payment confirmation side effect
//! - [`pipeline`]: Orchestration of the above for one delivery
//! - [`retry`]: Background re-execution of entries queued for retry

pub mod customers;
pub mod events;
pub mod guard;
pub mod ledger;
pub mod materializer;
pub mod notify;
pub mod pipeline;
pub mod retry;
pub mod signing;

pub use events::ProviderEvent;
pub use ledger::Ledger;
pub use pipeline::{PipelineOutcome, WebhookPipeline};
pub use retry::RetryWorker;
