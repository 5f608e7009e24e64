//! PostgreSQL repositories.
//!
//! Each repository wraps a `&mut PgConnection`, so it can be built from a pooled connection
//! or from an open transaction:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let order = Payments::new(&mut tx).create_order(&order_request).await?;
//! tx.commit().await?;
//! ```
//!
//! - [`WebhookEvents`]: the event ledger
//! - [`Customers`]: customer lookup and gap-fill
//! - [`Payments`]: orders and payments

pub mod customers;
pub mod payments;
pub mod webhook_events;

pub use customers::Customers;
pub use payments::Payments;
pub use webhook_events::WebhookEvents;
