//! API request and response data models.
//!
//! These are distinct from the database models in [`crate::db::models`], so the wire format
//! can evolve independently of storage. All models are annotated with `utoipa` for the
//! generated API docs.
//!
//! - [`webhooks`]: Provider acknowledgements and admin ledger views
//! - [`users`]: The authenticated administrator
//! - [`pagination`]: `skip`/`limit` query parameters

pub mod pagination;
pub mod users;
pub mod webhooks;
