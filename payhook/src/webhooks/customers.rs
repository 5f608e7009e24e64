//! Customer resolution by email.
//!
//! Resolution is read-then-write and is not part of the order/payment transaction. Two
//! concurrent first purchases by the same email can therefore create two customers; `email`
//! is indexed but not unique, and lookups take the oldest match.

use tracing::{debug, instrument};

use crate::db::Store;
use crate::db::errors::Result;
use crate::db::models::customers::{CustomerCreateDBRequest, CustomerGapFill};
use crate::types::{CustomerId, abbrev_uuid};

/// Find the customer for `email`, creating one if none exists.
///
/// An existing customer only gains `name` / `stripe_customer_id` where those are empty;
/// stored values are never overwritten.
#[instrument(skip_all, err)]
pub async fn resolve(
    store: &dyn Store,
    email: &str,
    name: Option<&str>,
    provider_customer_id: Option<&str>,
) -> Result<CustomerId> {
    let email = email.trim();

    if let Some(existing) = store.find_customer_by_email(email).await? {
        let fill = CustomerGapFill::for_customer(&existing, name, provider_customer_id);
        if !fill.is_empty() {
            debug!(customer_id = %abbrev_uuid(&existing.id), "Filling empty customer fields");
            store.fill_customer_gaps(existing.id, &fill).await?;
        }
        return Ok(existing.id);
    }

    let created = store
        .create_customer(&CustomerCreateDBRequest {
            email: email.to_string(),
            name: name.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string),
            stripe_customer_id: provider_customer_id.filter(|id| !id.is_empty()).map(str::to_string),
        })
        .await?;
    debug!(customer_id = %abbrev_uuid(&created.id), "Created customer");
    Ok(created.id)
}
