//! Authenticated administrator model.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May inspect the ledger and requeue events
    Admin,
    /// Authenticated but without access to the admin endpoints
    Staff,
}

/// The administrator behind a verified session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Pass the user through if they hold the admin role, `403` otherwise.
    pub fn require_admin(self) -> Result<Self> {
        if self.is_admin() {
            Ok(self)
        } else {
            Err(Error::Forbidden {
                message: "Admin role required".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_require_admin() {
        let admin = CurrentUser {
            id: Uuid::new_v4(),
            email: "admin@example.com".to_string(),
            role: Role::Admin,
        };
        assert!(admin.require_admin().is_ok());

        let staff = CurrentUser {
            id: Uuid::new_v4(),
            email: "staff@example.com".to_string(),
            role: Role::Staff,
        };
        let error = staff.require_admin().unwrap_err();
        assert_eq!(error.status_code(), StatusCode::FORBIDDEN);
    }
}
