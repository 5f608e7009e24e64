//! Database models for customers.

use chrono::{DateTime, Utc};

use crate::types::CustomerId;

/// A purchaser, keyed by email address.
#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    pub id: CustomerId,
    pub email: String,
    pub name: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a new customer.
#[derive(Debug, Clone)]
pub struct CustomerCreateDBRequest {
    pub email: String,
    pub name: Option<String>,
    pub stripe_customer_id: Option<String>,
}

/// Fields to set on an existing customer. Only fields that are currently empty are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerGapFill {
    pub name: Option<String>,
    pub stripe_customer_id: Option<String>,
}

impl CustomerGapFill {
    /// Work out which supplied values would fill an empty field on `customer`.
    pub fn for_customer(customer: &Customer, name: Option<&str>, stripe_customer_id: Option<&str>) -> Self {
        fn fills(current: &Option<String>, supplied: Option<&str>) -> Option<String> {
            let supplied = supplied.map(str::trim).filter(|s| !s.is_empty())?;
            match current.as_deref().map(str::trim) {
                Some(existing) if !existing.is_empty() => None,
                _ => Some(supplied.to_string()),
            }
        }

        Self {
            name: fills(&customer.name, name),
            stripe_customer_id: fills(&customer.stripe_customer_id, stripe_customer_id),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.stripe_customer_id.is_none()
    }
}
