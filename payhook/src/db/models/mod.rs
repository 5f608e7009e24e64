//! Database models.
//!
//! These are the shapes the [`Store`](crate::db::Store) reads and writes. API-facing
//! representations live in [`crate::api::models`].

pub mod customers;
pub mod orders;
pub mod payments;
pub mod webhook_events;
