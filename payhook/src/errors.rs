use crate::db::errors::DbError;
use crate::db::models::webhook_events::WebhookEventStatus;
use crate::types::Provider;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Webhook signature header missing, malformed or not matching the body
    #[error("{message}")]
    InvalidSignature { message: String, status: StatusCode },

    /// Required configuration (such as a webhook secret) is missing
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Invalid request data, including malformed provider payloads
    #[error("{message}")]
    BadRequest { message: String },

    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Authenticated, but the role does not allow the operation
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// A ledger entry is not in a status that allows the requested change
    #[error("Cannot move webhook event from {from} to {to}")]
    InvalidStateTransition {
        from: WebhookEventStatus,
        to: WebhookEventStatus,
    },

    /// Writing the customer, order or payment for an event failed
    #[error("Failed to materialize {provider} event {event_id}: {message}")]
    Materialization {
        provider: Provider,
        event_id: String,
        message: String,
    },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidSignature { status, .. } => *status,
            Error::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::InvalidStateTransition { .. } => StatusCode::BAD_REQUEST,
            Error::Materialization { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(DbError::NotFound) => StatusCode::NOT_FOUND,
            Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidSignature { message, .. } => message.clone(),
            Error::Configuration { message } => message.clone(),
            Error::BadRequest { message } => message.clone(),
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Forbidden { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::InvalidStateTransition { from, .. } => {
                format!("Cannot retry webhook event with status '{from}'")
            }
            Error::Materialization { .. } => "Failed to process webhook".to_string(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(DbError::NotFound) => "Resource not found".to_string(),
            Error::Database(_) => "Database error occurred".to_string(),
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::NotFound) => {
                tracing::debug!("Client error: {}", self);
            }
            Error::Database(_)
            | Error::Internal { .. }
            | Error::Other(_)
            | Error::Configuration { .. }
            | Error::Materialization { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::InvalidSignature { .. } => {
                tracing::warn!("Rejected webhook: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::InvalidStateTransition { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        (status, Json(json!({ "error": self.user_message() }))).into_response()
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
